//! Merges TagCandidate / HeuristicCandidate / LlmCandidate into
//! MetadataFieldState updates and a cached-effective Book, per the
//! provenance precedence rule (invariant 2).

use crate::extractors::TagCandidate;
use crate::models::{Book, FieldSource, LibraryState, MetadataFieldState, TrackedField};
use crate::parsing::{HeuristicCandidate, LlmCandidate};
use crate::store::Store;
use shelfkeeper_common::Result;

/// The lookup-tier input: heuristic always present, LLM optional and
/// preferred over heuristic when both contributed a non-empty value.
#[derive(Debug, Clone, Default)]
pub struct LookupCandidate {
    pub heuristic: HeuristicCandidate,
    pub llm: Option<LlmCandidate>,
}

impl LookupCandidate {
    fn field(&self, field: TrackedField) -> Option<String> {
        let llm_value = self.llm.as_ref().and_then(|c| match field {
            TrackedField::Author => c.author.clone(),
            TrackedField::Series => c.series.clone(),
            TrackedField::Title => c.title.clone(),
            TrackedField::SeriesPosition => c.series_position.map(|n| n.to_string()),
            _ => None,
        });
        if let Some(v) = llm_value.filter(|v| !v.is_empty()) {
            return Some(v);
        }
        match field {
            TrackedField::Author => self.heuristic.author.clone(),
            TrackedField::Series => self.heuristic.series.clone(),
            TrackedField::Title => self.heuristic.title.clone(),
            TrackedField::SeriesPosition => self.heuristic.series_position.map(|n| n.to_string()),
            _ => None,
        }
    }
}

fn file_field(tag: Option<&TagCandidate>, field: TrackedField) -> Option<String> {
    let tag = tag?;
    match field {
        TrackedField::Title => tag.title.clone(),
        TrackedField::Author => tag.author_primary.clone(),
        TrackedField::Series => tag.series.clone(),
        TrackedField::SeriesPosition => tag.series_position.map(|n| n.to_string()),
        TrackedField::Narrator => tag.narrator.clone(),
        TrackedField::Publisher => tag.publisher.clone(),
        TrackedField::PublishDate => tag.publish_year.map(|y| y.to_string()),
        TrackedField::Language => tag.language.clone(),
        TrackedField::Description => tag.comment.clone(),
        TrackedField::CoverUrl => None,
    }
}

pub struct Reconciler<'a> {
    store: &'a Store,
}

/// Outcome of reconciling one file's candidates against a (possibly new)
/// Book: the field states as persisted, and the Book row with effective
/// values and resolved foreign keys filled in.
pub struct ReconciledBook {
    pub book: Book,
    pub field_states: Vec<MetadataFieldState>,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// `is_first_observation` MUST be set by the caller, not inferred from
    /// `book_id`: the scanner always persists a seed `Book` row (so it has
    /// an id to reconcile against) before calling this on the very first
    /// sighting of a file, so `book_id` is `Some` on every call. It governs
    /// whether `value_stored` is seeded from the precedence rule and
    /// whether `library_state` transitions out of `wanted`; an existing
    /// book's prior `value_stored`/`value_override`/`locked` is always
    /// carried forward unchanged.
    pub fn reconcile(
        &self,
        book_id: Option<&str>,
        is_first_observation: bool,
        tag: Option<&TagCandidate>,
        lookup: &LookupCandidate,
        under_library_root: bool,
    ) -> Result<ReconciledBook> {
        let existing_book = book_id.map(|id| self.store.get_book(id)).transpose()?.flatten();
        let mut book = existing_book
            .clone()
            .unwrap_or_else(|| Book::new(book_id.map(str::to_string).unwrap_or_default()));

        let mut field_states = Vec::with_capacity(TrackedField::ALL.len());

        for field in TrackedField::ALL {
            let mut state = if let Some(id) = book_id {
                self.store
                    .get_field_state(id, field)?
                    .unwrap_or_else(|| MetadataFieldState::new(id, field))
            } else {
                MetadataFieldState::new("", field)
            };

            state.value_from_file = file_field(tag, field);
            state.value_from_lookup = lookup.field(field);
            if is_first_observation {
                // First observation: value_stored seeds from whatever the
                // precedence rule would compute without a stored value yet.
                state.value_stored = state
                    .value_override
                    .clone()
                    .or_else(|| state.value_from_lookup.clone())
                    .or_else(|| state.value_from_file.clone());
            }
            // value_override/locked are left untouched either way.

            state.last_source = state.effective_source();
            self.apply_effective(&mut book, field, state.effective());
            field_states.push(state);
        }

        book.library_state = if is_first_observation {
            if under_library_root {
                LibraryState::Organized
            } else {
                LibraryState::Import
            }
        } else {
            book.library_state
        };

        book = self.resolve_foreign_keys(book, &field_states)?;

        Ok(ReconciledBook { book, field_states })
    }

    fn apply_effective(&self, book: &mut Book, field: TrackedField, value: Option<&str>) {
        match field {
            TrackedField::Title => book.title = value.map(str::to_string),
            TrackedField::Author => {} // resolved to author_id separately below
            TrackedField::Series => {} // resolved to series_id separately below
            TrackedField::SeriesPosition => {
                book.series_position = value.and_then(|v| v.parse().ok())
            }
            TrackedField::Narrator => book.narrator = value.map(str::to_string),
            TrackedField::Publisher => book.publisher = value.map(str::to_string),
            TrackedField::PublishDate => book.publish_date = value.map(str::to_string),
            TrackedField::Language => book.language = value.map(str::to_string),
            TrackedField::Description => book.description = value.map(str::to_string),
            TrackedField::CoverUrl => book.cover_url = value.map(str::to_string),
        }
    }

    /// Author name -> Author id, Series name -> Series id, title+author ->
    /// Work id. Name matching is NFC-normalized, case-insensitive,
    /// whitespace-collapsed (handled inside the store's `get_or_create_*`).
    fn resolve_foreign_keys(&self, mut book: Book, field_states: &[MetadataFieldState]) -> Result<Book> {
        let field_value = |field: TrackedField| -> Option<String> {
            field_states
                .iter()
                .find(|s| s.field == field)
                .and_then(|s| s.effective())
                .map(str::to_string)
                .filter(|v| !v.is_empty())
        };

        if let Some(name) = field_value(TrackedField::Author) {
            let author = self.store.get_or_create_author(&name)?;
            book.author_id = Some(author.id);
        }

        if let Some(name) = field_value(TrackedField::Series) {
            let series = self
                .store
                .get_or_create_series(&name, book.author_id.as_deref())?;
            book.series_id = Some(series.id);
        }

        if let Some(title) = book.title.clone().filter(|t| !t.is_empty()) {
            let work = self
                .store
                .get_or_create_work(&title, book.author_id.as_deref())?;
            book.work_id = Some(work.id);
        }

        Ok(book)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::AudioFormat;
    use shelfkeeper_common::ids::new_id;
    use tempfile::tempdir;

    fn open_store() -> (tempfile::TempDir, Store) {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.redb")).unwrap();
        (dir, store)
    }

    #[test]
    fn new_book_seeds_stored_from_file_tag() {
        let (_d, store) = open_store();
        let id = new_id();
        store.create_book(Book::new(id.clone())).unwrap();

        let tag = TagCandidate {
            title: Some("The Hobbit".into()),
            author_primary: Some("J.R.R. Tolkien".into()),
            format: AudioFormat::M4b,
            ..Default::default()
        };
        let lookup = LookupCandidate::default();

        let reconciler = Reconciler::new(&store);
        let result = reconciler
            .reconcile(Some(&id), true, Some(&tag), &lookup, false)
            .unwrap();
        assert_eq!(result.book.title.as_deref(), Some("The Hobbit"));

        let title_state = result
            .field_states
            .iter()
            .find(|s| s.field == TrackedField::Title)
            .unwrap();
        assert_eq!(title_state.value_stored.as_deref(), Some("The Hobbit"));
        assert_eq!(title_state.last_source, Some(FieldSource::File));
    }

    #[test]
    fn locked_override_survives_a_rescan_with_unchanged_file_tag() {
        let (_d, store) = open_store();
        let id = new_id();
        store.create_book(Book::new(id.clone())).unwrap();

        let mut title_state = MetadataFieldState::new(id.clone(), TrackedField::Title);
        title_state.value_from_file = Some("Hobbit".into());
        title_state.value_stored = Some("The Hobbit".into());
        title_state.value_override = Some("The Hobbit (Unabridged)".into());
        title_state.locked = true;
        store.put_field_state(&title_state).unwrap();

        let tag = TagCandidate {
            title: Some("Hobbit".into()),
            format: AudioFormat::M4b,
            ..Default::default()
        };
        let reconciler = Reconciler::new(&store);
        let result = reconciler
            .reconcile(Some(&id), false, Some(&tag), &LookupCandidate::default(), false)
            .unwrap();

        assert_eq!(result.book.title.as_deref(), Some("The Hobbit (Unabridged)"));
        let title = result
            .field_states
            .iter()
            .find(|s| s.field == TrackedField::Title)
            .unwrap();
        assert_eq!(title.value_override.as_deref(), Some("The Hobbit (Unabridged)"));
        assert!(title.locked);
    }

    #[test]
    fn llm_value_takes_precedence_over_heuristic_when_both_present() {
        let (_d, store) = open_store();
        let id = new_id();
        store.create_book(Book::new(id.clone())).unwrap();

        let lookup = LookupCandidate {
            heuristic: HeuristicCandidate {
                title: Some("Heuristic Title".into()),
                ..Default::default()
            },
            llm: Some(LlmCandidate {
                title: Some("LLM Title".into()),
                ..Default::default()
            }),
        };
        let reconciler = Reconciler::new(&store);
        let result = reconciler
            .reconcile(Some(&id), true, None, &lookup, false)
            .unwrap();
        assert_eq!(result.book.title.as_deref(), Some("LLM Title"));
    }
}
