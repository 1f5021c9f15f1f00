//! Moves or copies a Book's file into its canonical, template-derived
//! location under the library root, verifying bytes with a streamed hash
//! before ever touching the destination path.

use crate::models::{Book, LibraryState};
use shelfkeeper_common::events::{Event, EventHub, EventKind};
use shelfkeeper_common::{Error, Result};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use crate::store::Store;
use tracing::{info, warn};

/// How the file is transplanted to its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrganizeMode {
    Move,
    Copy,
    Hardlink,
    /// Copy-on-write clone where the filesystem supports it. No crate in
    /// this dependency stack exposes `reflink(2)`/`FICLONE` directly, so
    /// this degrades to a regular copy.
    Reflink,
}

/// Collision policy when the destination path is already occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwritePolicy {
    Never,
    IfHashMatches,
    Always,
}

#[derive(Debug, Clone)]
pub struct OrganizeOptions {
    pub mode: OrganizeMode,
    pub overwrite_policy: OverwritePolicy,
    pub create_dirs: bool,
    pub destination_template: String,
}

impl Default for OrganizeOptions {
    fn default() -> Self {
        Self {
            mode: OrganizeMode::Move,
            overwrite_policy: OverwritePolicy::IfHashMatches,
            create_dirs: true,
            destination_template: DEFAULT_DESTINATION_TEMPLATE.to_string(),
        }
    }
}

pub const DEFAULT_DESTINATION_TEMPLATE: &str =
    "{author}/{series}/{volume:02d} - {title}/{title} ({narrator}).{ext}";

/// Path segment length cap, in UTF-16 code units, per the sanitization rule.
const MAX_SEGMENT_LEN_UTF16: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizeResult {
    pub noop: bool,
    pub destination: PathBuf,
    pub hash: String,
}

pub struct Organizer {
    store: Store,
    events: EventHub,
}

impl Organizer {
    pub fn new(store: Store, events: EventHub) -> Self {
        Self { store, events }
    }

    /// Runs the full copy-first / verify / atomic-rename algorithm for one
    /// book. `operation_id` tags the emitted progress/status events.
    pub async fn organize(
        &self,
        book_id: &str,
        library_root: &Path,
        options: &OrganizeOptions,
        operation_id: &str,
    ) -> Result<OrganizeResult> {
        let book = self
            .store
            .get_book(book_id)?
            .ok_or_else(|| Error::NotFound(format!("book {book_id}")))?;
        let source = book
            .file_path
            .as_ref()
            .ok_or_else(|| Error::InvalidInput(format!("book {book_id} has no file_path")))?;
        let source = PathBuf::from(source);
        let source_hash = book
            .original_hash
            .clone()
            .ok_or_else(|| Error::InvalidInput(format!("book {book_id} has no original_hash")))?;

        let destination = self.render_destination(&book, library_root, &options.destination_template)?;

        if destination == source {
            self.publish_status(operation_id, "completed", true);
            return Ok(OrganizeResult {
                noop: true,
                destination,
                hash: source_hash,
            });
        }

        if let Some(parent) = destination.parent() {
            if options.create_dirs {
                std::fs::create_dir_all(parent)?;
            } else if !parent.exists() {
                return Err(Error::InvalidInput(format!(
                    "destination directory {} does not exist",
                    parent.display()
                )));
            }
        }

        if destination.exists() {
            match options.overwrite_policy {
                OverwritePolicy::Never => {
                    return Err(Error::Conflict(format!(
                        "destination {} already exists",
                        destination.display()
                    )))
                }
                OverwritePolicy::IfHashMatches => {
                    let existing_hash = hash_file(&destination)?;
                    if existing_hash == source_hash {
                        self.finish(&book, &destination, &existing_hash, operation_id)?;
                        return Ok(OrganizeResult {
                            noop: false,
                            destination,
                            hash: existing_hash,
                        });
                    }
                    return Err(Error::Conflict(format!(
                        "destination {} exists with a different hash",
                        destination.display()
                    )));
                }
                OverwritePolicy::Always => {}
            }
        }

        self.publish_progress(operation_id, 0, 1);

        let tmp_path = sibling_tmp_path(&destination);
        let verified_hash = match copy_with_streamed_hash(&source, &tmp_path) {
            Ok(hash) => hash,
            Err(e) => {
                let _ = std::fs::remove_file(&tmp_path);
                return Err(e);
            }
        };
        if verified_hash != source_hash {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(Error::Conflict(format!(
                "copied bytes for {} hashed to {verified_hash}, expected {source_hash}",
                destination.display()
            )));
        }

        std::fs::rename(&tmp_path, &destination)?;

        if options.mode == OrganizeMode::Move {
            if let Err(e) = std::fs::remove_file(&source) {
                warn!(
                    source = %source.display(),
                    destination = %destination.display(),
                    error = %e,
                    "organized file in place but failed to remove source; both now exist"
                );
            }
        }

        self.finish(&book, &destination, &verified_hash, operation_id)?;

        Ok(OrganizeResult {
            noop: false,
            destination,
            hash: verified_hash,
        })
    }

    /// Step 6-7: update the Book row and publish completion. A failure here
    /// leaves the filesystem in the new layout with a stale store entry; the
    /// caller (the queue executor) marks the operation `failed` and a later
    /// scan reconciles the mismatch via its path/hash dual lookup.
    fn finish(&self, book: &Book, destination: &Path, hash: &str, operation_id: &str) -> Result<()> {
        let mut updated = book.clone();
        updated.file_path = Some(destination.to_string_lossy().to_string());
        updated.organized_hash = Some(hash.to_string());
        updated.library_state = LibraryState::Organized;
        self.store.update_book(updated)?;
        self.publish_progress(operation_id, 1, 1);
        self.publish_status(operation_id, "completed", false);
        Ok(())
    }

    fn render_destination(&self, book: &Book, library_root: &Path, template: &str) -> Result<PathBuf> {
        let author = book
            .author_id
            .as_deref()
            .and_then(|id| self.store.get_author(id).ok().flatten())
            .map(|a| a.display_name);
        let series = book
            .series_id
            .as_deref()
            .and_then(|id| self.store.get_series(id).ok().flatten())
            .map(|s| s.name);
        let ext = book
            .file_path
            .as_deref()
            .and_then(|p| Path::new(p).extension())
            .and_then(|e| e.to_str())
            .unwrap_or("m4b")
            .to_string();

        let ctx = TemplateContext {
            author,
            series,
            title: book.title.clone(),
            volume: book.series_position,
            narrator: book.narrator.clone(),
            ext: Some(ext),
        };

        let relative = render_template(template, &ctx)?;
        Ok(library_root.join(relative))
    }

    fn publish_progress(&self, operation_id: &str, current: u64, total: u64) {
        futures::executor::block_on(self.events.publish(Event::new(
            EventKind::OperationProgress,
            Some(operation_id.to_string()),
            serde_json::json!({ "current": current, "total": total }),
        )));
    }

    fn publish_status(&self, operation_id: &str, state: &str, noop: bool) {
        info!(operation_id, state, noop, "organize finished");
        futures::executor::block_on(self.events.publish(Event::new(
            EventKind::OperationStatus,
            Some(operation_id.to_string()),
            serde_json::json!({ "state": state, "noop": noop }),
        )));
    }
}

struct TemplateContext {
    author: Option<String>,
    series: Option<String>,
    title: Option<String>,
    volume: Option<i32>,
    narrator: Option<String>,
    ext: Option<String>,
}

impl TemplateContext {
    fn is_structural(field: &str) -> bool {
        matches!(field, "author" | "series" | "volume")
    }

    /// `None` means the field has no value at all (drives structural
    /// omission); textual placeholders instead substitute `Unknown`.
    fn value(&self, field: &str, format_spec: Option<&str>) -> Option<String> {
        match field {
            "author" => self.author.clone(),
            "series" => self.series.clone(),
            "title" => self.title.clone(),
            "narrator" => self.narrator.clone(),
            "ext" => self.ext.clone(),
            "volume" => self.volume.map(|v| format_volume(v, format_spec)),
            _ => None,
        }
    }
}

/// `format_spec` is a `printf`-style width spec like `02d`; only the
/// zero-padded-width case is needed by the destination template.
fn format_volume(v: i32, format_spec: Option<&str>) -> String {
    match format_spec {
        Some(spec) if spec.ends_with('d') => {
            let width: usize = spec[..spec.len() - 1].parse().unwrap_or(0);
            format!("{v:0width$}")
        }
        _ => v.to_string(),
    }
}

/// Splits the template on `/`, substituting each segment independently so a
/// segment consisting of exactly one structural placeholder can be dropped
/// (with its separator) when that field is absent, per §4.8.
fn render_template(template: &str, ctx: &TemplateContext) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for segment in template.split('/') {
        match render_segment(segment, ctx)? {
            Some(rendered) => out.push(rendered),
            None => continue,
        }
    }
    Ok(out)
}

fn render_segment(segment: &str, ctx: &TemplateContext) -> Result<Option<String>> {
    let placeholders = parse_placeholders(segment);

    if placeholders.len() == 1 {
        let (field, format_spec, whole_segment) = &placeholders[0];
        if whole_segment.as_str() == segment.trim() && TemplateContext::is_structural(field) {
            return match ctx.value(field, format_spec.as_deref()) {
                Some(v) => Ok(Some(sanitize_segment(&v))),
                None => Ok(None),
            };
        }
    }

    let mut rendered = String::new();
    let mut rest = segment;
    while let Some(start) = rest.find('{') {
        rendered.push_str(&rest[..start]);
        let Some(end) = rest[start..].find('}') else {
            rendered.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let inner = &rest[start + 1..start + end];
        let (field, format_spec) = split_format_spec(inner);
        let value = ctx
            .value(field, format_spec)
            .unwrap_or_else(|| "Unknown".to_string());
        rendered.push_str(&value);
        rest = &rest[start + end + 1..];
    }
    rendered.push_str(rest);

    if rendered.is_empty() {
        Ok(None)
    } else {
        Ok(Some(sanitize_segment(&rendered)))
    }
}

fn split_format_spec(inner: &str) -> (&str, Option<&str>) {
    match inner.split_once(':') {
        Some((field, spec)) => (field, Some(spec)),
        None => (inner, None),
    }
}

/// Every `{field}` or `{field:spec}` placeholder in a segment, in order.
fn parse_placeholders(segment: &str) -> Vec<(String, Option<String>, String)> {
    let mut out = Vec::new();
    let mut rest = segment;
    while let Some(start) = rest.find('{') {
        let Some(end) = rest[start..].find('}') else { break };
        let whole = &rest[start..start + end + 1];
        let inner = &rest[start + 1..start + end];
        let (field, spec) = split_format_spec(inner);
        out.push((field.to_string(), spec.map(str::to_string), whole.to_string()));
        rest = &rest[start + end + 1..];
    }
    out
}

/// Reserved characters become `-`, trailing dots/spaces are stripped, and
/// the result is capped at 200 UTF-16 code units (the host-filesystem limit
/// this crate targets, grounded on §4.8's sanitization rule).
fn sanitize_segment(value: &str) -> String {
    let replaced: String = value
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect();
    let trimmed = replaced.trim_end_matches(['.', ' ']).trim();

    let mut units = 0usize;
    let mut capped = String::new();
    for c in trimmed.chars() {
        let w = c.len_utf16();
        if units + w > MAX_SEGMENT_LEN_UTF16 {
            break;
        }
        units += w;
        capped.push(c);
    }
    if capped.is_empty() {
        "Unknown".to_string()
    } else {
        capped
    }
}

fn sibling_tmp_path(destination: &Path) -> PathBuf {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let file_name = destination
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    destination.with_file_name(format!(".tmp-{suffix}-{file_name}"))
}

fn hash_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Copies `source` to `tmp_path` while streaming a hash of the bytes as
/// they're written, so the caller can verify against the known source hash
/// without a second read pass.
fn copy_with_streamed_hash(source: &Path, tmp_path: &Path) -> Result<String> {
    let mut src = std::fs::File::open(source)?;
    let mut dst = std::fs::File::create(tmp_path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = src.read(&mut buf)?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n])?;
        hasher.update(&buf[..n]);
    }
    dst.flush()?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Author;
    use std::time::Duration;
    use tempfile::tempdir;

    fn open_store() -> (tempfile::TempDir, Store) {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.redb")).unwrap();
        (dir, store)
    }

    #[test]
    fn structural_field_omits_its_segment_and_separator_when_absent() {
        let ctx = TemplateContext {
            author: Some("Tolkien".into()),
            series: None,
            title: Some("The Hobbit".into()),
            volume: None,
            narrator: None,
            ext: Some("m4b".into()),
        };
        let path = render_template(DEFAULT_DESTINATION_TEMPLATE, &ctx).unwrap();
        assert_eq!(path, PathBuf::from("Tolkien/The Hobbit (Unknown).m4b"));
    }

    #[test]
    fn textual_field_substitutes_unknown_when_absent() {
        let ctx = TemplateContext {
            author: Some("Asimov".into()),
            series: Some("Foundation".into()),
            title: Some("Foundation".into()),
            volume: Some(1),
            narrator: None,
            ext: Some("mp3".into()),
        };
        let path = render_template(DEFAULT_DESTINATION_TEMPLATE, &ctx).unwrap();
        assert_eq!(
            path,
            PathBuf::from("Asimov/Foundation/01 - Foundation/Foundation (Unknown).mp3")
        );
    }

    #[test]
    fn reserved_characters_are_replaced_and_trailing_dots_stripped() {
        let sanitized = sanitize_segment("Vol: 1/2 ... ");
        assert_eq!(sanitized, "Vol- 1-2");
    }

    #[tokio::test]
    async fn organize_is_a_noop_when_destination_equals_source() {
        let (_d, store) = open_store();
        let lib = tempdir().unwrap();
        let src = lib.path().join("Author/Series/01 - Title/Title (Narrator).m4b");
        std::fs::create_dir_all(src.parent().unwrap()).unwrap();
        std::fs::write(&src, b"audio").unwrap();

        let author = Author {
            id: "auth-1".into(),
            display_name: "Author".into(),
            canonical_name: "author".into(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        store.create_author(author.clone()).unwrap();

        let mut book = Book::new("book-1".to_string());
        book.title = Some("Title".into());
        book.narrator = Some("Narrator".into());
        book.series_position = Some(1);
        book.author_id = Some(author.id.clone());
        book.file_path = Some(src.to_string_lossy().to_string());
        book.original_hash = Some(hash_file(&src).unwrap());
        store.create_book(book).unwrap();

        let organizer = Organizer::new(store, EventHub::new(8, Duration::from_secs(3600)));
        let result = organizer
            .organize(
                "book-1",
                lib.path(),
                &OrganizeOptions::default(),
                "op-1",
            )
            .await
            .unwrap();
        assert!(result.noop);
    }

    #[tokio::test]
    async fn organize_moves_the_file_and_updates_the_book_row() {
        let (_d, store) = open_store();
        let import_dir = tempdir().unwrap();
        let lib = tempdir().unwrap();
        let src = import_dir.path().join("raw.m4b");
        std::fs::write(&src, b"some audio bytes").unwrap();

        let mut book = Book::new("book-1".to_string());
        book.title = Some("Title".into());
        book.file_path = Some(src.to_string_lossy().to_string());
        book.original_hash = Some(hash_file(&src).unwrap());
        store.create_book(book).unwrap();

        let organizer = Organizer::new(store.clone(), EventHub::new(8, Duration::from_secs(3600)));
        let result = organizer
            .organize("book-1", lib.path(), &OrganizeOptions::default(), "op-1")
            .await
            .unwrap();

        assert!(!result.noop);
        assert!(result.destination.exists());
        assert!(!src.exists());
        let updated = store.get_book("book-1").unwrap().unwrap();
        assert_eq!(updated.library_state, LibraryState::Organized);
        assert_eq!(updated.organized_hash, Some(result.hash));
    }
}
