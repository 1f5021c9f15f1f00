//! Entity types persisted by the store. One file per related group of
//! entities, mirroring how the teacher splits its `models/` directory.

mod catalog;
mod import;
mod operation;

pub use catalog::*;
pub use import::*;
pub use operation::*;
