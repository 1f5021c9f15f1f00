//! Author, Series, Work, Book, MetadataFieldState, VersionGroup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Author {
    pub id: String,
    pub display_name: String,
    pub canonical_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Series {
    pub id: String,
    pub name: String,
    pub author_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Work {
    pub id: String,
    pub title: String,
    pub author_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Library lifecycle state, see the Book state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LibraryState {
    Wanted,
    Import,
    Organized,
    Deleted,
}

impl fmt::Display for LibraryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LibraryState::Wanted => "wanted",
            LibraryState::Import => "import",
            LibraryState::Organized => "organized",
            LibraryState::Deleted => "deleted",
        };
        write!(f, "{s}")
    }
}

/// The ten provenance-tracked fields of a Book. `Author`/`Series` here carry
/// the resolved entity's display name, not the foreign key itself: the
/// reconciler resolves the effective name string to an Author/Series id as a
/// separate step after computing precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedField {
    Title,
    Author,
    Series,
    SeriesPosition,
    Narrator,
    Publisher,
    PublishDate,
    Language,
    Description,
    CoverUrl,
}

impl TrackedField {
    pub const ALL: [TrackedField; 10] = [
        TrackedField::Title,
        TrackedField::Author,
        TrackedField::Series,
        TrackedField::SeriesPosition,
        TrackedField::Narrator,
        TrackedField::Publisher,
        TrackedField::PublishDate,
        TrackedField::Language,
        TrackedField::Description,
        TrackedField::CoverUrl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackedField::Title => "title",
            TrackedField::Author => "author",
            TrackedField::Series => "series",
            TrackedField::SeriesPosition => "series_position",
            TrackedField::Narrator => "narrator",
            TrackedField::Publisher => "publisher",
            TrackedField::PublishDate => "publish_date",
            TrackedField::Language => "language",
            TrackedField::Description => "description",
            TrackedField::CoverUrl => "cover_url",
        }
    }
}

/// Which of the four sources contributed a field's effective value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    File,
    Lookup,
    Stored,
    Override,
}

/// One row per (book, tracked field). The four source values plus the lock
/// bit are the system of record; `Book`'s cached fields are a projection of
/// this table computed by the provenance precedence rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataFieldState {
    pub book_id: String,
    pub field: TrackedField,
    pub value_from_file: Option<String>,
    pub value_from_lookup: Option<String>,
    pub value_stored: Option<String>,
    pub value_override: Option<String>,
    pub locked: bool,
    pub last_updated: DateTime<Utc>,
    pub last_source: Option<FieldSource>,
}

impl MetadataFieldState {
    pub fn new(book_id: impl Into<String>, field: TrackedField) -> Self {
        Self {
            book_id: book_id.into(),
            field,
            value_from_file: None,
            value_from_lookup: None,
            value_stored: None,
            value_override: None,
            locked: false,
            last_updated: Utc::now(),
            last_source: None,
        }
    }

    /// The precedence rule from the data model's provenance invariant:
    /// override if locked or set, else stored, else lookup, else file.
    pub fn effective(&self) -> Option<&str> {
        if self.locked {
            if let Some(v) = self.value_override.as_deref() {
                return Some(v);
            }
        }
        self.value_override
            .as_deref()
            .filter(|v| !v.is_empty())
            .or_else(|| self.value_stored.as_deref().filter(|v| !v.is_empty()))
            .or_else(|| self.value_from_lookup.as_deref().filter(|v| !v.is_empty()))
            .or_else(|| self.value_from_file.as_deref().filter(|v| !v.is_empty()))
    }

    pub fn effective_source(&self) -> Option<FieldSource> {
        if self.locked && self.value_override.is_some() {
            return Some(FieldSource::Override);
        }
        if self.value_override.as_deref().is_some_and(|v| !v.is_empty()) {
            Some(FieldSource::Override)
        } else if self.value_stored.as_deref().is_some_and(|v| !v.is_empty()) {
            Some(FieldSource::Stored)
        } else if self
            .value_from_lookup
            .as_deref()
            .is_some_and(|v| !v.is_empty())
        {
            Some(FieldSource::Lookup)
        } else if self.value_from_file.as_deref().is_some_and(|v| !v.is_empty()) {
            Some(FieldSource::File)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    pub title: Option<String>,
    pub author_id: Option<String>,
    pub series_id: Option<String>,
    pub work_id: Option<String>,
    pub series_position: Option<i32>,
    pub narrator: Option<String>,
    pub publisher: Option<String>,
    pub publish_date: Option<String>,
    pub language: Option<String>,
    pub description: Option<String>,
    pub cover_url: Option<String>,
    pub duration_seconds: Option<u64>,
    pub file_path: Option<String>,
    pub original_hash: Option<String>,
    pub organized_hash: Option<String>,
    pub file_size: Option<u64>,
    pub library_state: LibraryState,
    pub quantity: u32,
    pub wanted: bool,
    pub soft_deleted: bool,
    pub soft_deleted_at: Option<DateTime<Utc>>,
    pub version_group_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Book {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: None,
            author_id: None,
            series_id: None,
            work_id: None,
            series_position: None,
            narrator: None,
            publisher: None,
            publish_date: None,
            language: None,
            description: None,
            cover_url: None,
            duration_seconds: None,
            file_path: None,
            original_hash: None,
            organized_hash: None,
            file_size: None,
            library_state: LibraryState::Wanted,
            quantity: 1,
            wanted: false,
            soft_deleted: false,
            soft_deleted_at: None,
            version_group_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionGroup {
    pub id: String,
    pub primary_book_id: String,
    pub member_book_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_override_wins_even_when_empty_would_not() {
        let mut state = MetadataFieldState::new("book-1", TrackedField::Title);
        state.value_from_file = Some("Hobbit".into());
        state.value_stored = Some("The Hobbit".into());
        state.value_override = Some("The Hobbit (Unabridged)".into());
        state.locked = true;
        assert_eq!(state.effective(), Some("The Hobbit (Unabridged)"));
        assert_eq!(state.effective_source(), Some(FieldSource::Override));
    }

    #[test]
    fn falls_through_to_file_when_nothing_else_set() {
        let mut state = MetadataFieldState::new("book-1", TrackedField::Narrator);
        state.value_from_file = Some("Rob Inglis".into());
        assert_eq!(state.effective(), Some("Rob Inglis"));
        assert_eq!(state.effective_source(), Some(FieldSource::File));
    }

    #[test]
    fn empty_override_does_not_shadow_stored() {
        let mut state = MetadataFieldState::new("book-1", TrackedField::Title);
        state.value_stored = Some("The Hobbit".into());
        state.value_override = Some(String::new());
        assert_eq!(state.effective(), Some("The Hobbit"));
    }
}
