//! Two-phase parallel directory scan: sequential `walkdir` traversal to
//! build the file list (and honor the opt-out marker), then a `rayon`
//! worker pool hashing, extracting, and upserting each file.

use crate::extractors::TagExtractor;
use crate::models::{Book, LibraryState};
use crate::parsing::{HeuristicParser, LlmContext, LlmParser};
use crate::reconcile::{LookupCandidate, Reconciler};
use crate::store::{BookFilter, ListOptions, Store, UpsertBookBy};
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use shelfkeeper_common::events::{Event, EventHub, EventKind};
use shelfkeeper_common::ids::new_id;
use shelfkeeper_common::Result;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Minimum heuristic confidence below which the (optional) LLM parser is
/// consulted, per §4.5's policy.
pub const DEFAULT_LLM_CONFIDENCE_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub force_update: bool,
    pub include_library_root: bool,
    pub extension_allowlist: Vec<String>,
    pub opt_out_marker: String,
    pub worker_count: usize,
    pub llm_confidence_threshold: f32,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            force_update: false,
            include_library_root: false,
            extension_allowlist: vec![
                "mp3".into(),
                "m4a".into(),
                "m4b".into(),
                "aac".into(),
                "flac".into(),
                "ogg".into(),
                "wma".into(),
                "opus".into(),
            ],
            opt_out_marker: ".jabexclude".into(),
            worker_count: 4,
            llm_confidence_threshold: DEFAULT_LLM_CONFIDENCE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ScanSummary {
    pub files_seen: u64,
    pub books_created: u64,
    pub books_updated: u64,
    pub conflicts: u64,
    pub blocked_skips: u64,
    pub elapsed_ms: u64,
}

/// Cooperative cancellation token, checked between files.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct Counters {
    created: AtomicU64,
    updated: AtomicU64,
    conflicts: AtomicU64,
    blocked: AtomicU64,
}

pub struct Scanner {
    store: Store,
    events: EventHub,
    tag_extractor: TagExtractor,
    heuristic_parser: HeuristicParser,
    llm_parser: Option<LlmParser>,
}

impl Scanner {
    pub fn new(
        store: Store,
        events: EventHub,
        tag_extractor: TagExtractor,
        heuristic_parser: HeuristicParser,
        llm_parser: Option<LlmParser>,
    ) -> Self {
        Self {
            store,
            events,
            tag_extractor,
            heuristic_parser,
            llm_parser,
        }
    }

    /// Walk `root`, reconcile every matching file, and upsert it into the
    /// catalog. `operation_id` tags every emitted event so subscribers can
    /// filter to this scan.
    pub async fn scan(
        &self,
        root: &Path,
        library_root: &Path,
        options: &ScanOptions,
        cancel: CancelToken,
        operation_id: &str,
    ) -> Result<ScanSummary> {
        let start = Instant::now();
        let files = self.walk(root, options)?;
        let total = files.len() as u64;
        self.publish_progress(operation_id, 0, total);

        let counters = Counters {
            created: AtomicU64::new(0),
            updated: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
        };
        let processed = AtomicU64::new(0);
        let canceled_mid_scan = AtomicBool::new(false);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.worker_count.max(1).min(files.len().max(1)))
            .build()
            .map_err(|e| shelfkeeper_common::Error::Internal(e.to_string()))?;

        // Rayon's pool.install blocks the calling thread until every file is
        // processed, so this runs on a blocking-pool thread rather than the
        // async task's own worker thread.
        let rt_handle = tokio::runtime::Handle::current();
        let library_root = library_root.to_path_buf();
        let operation_id_owned = operation_id.to_string();
        tokio::task::block_in_place(|| {
            pool.install(|| {
                files.par_iter().for_each(|path| {
                    if cancel.is_canceled() {
                        canceled_mid_scan.store(true, Ordering::SeqCst);
                        return;
                    }
                    self.process_file(
                        path,
                        &library_root,
                        options,
                        &counters,
                        &operation_id_owned,
                        &rt_handle,
                    );
                    let done = processed.fetch_add(1, Ordering::SeqCst) + 1;
                    if done % 10 == 0 || done == total {
                        self.publish_progress(&operation_id_owned, done, total);
                    }
                });
            });
        });

        if canceled_mid_scan.load(Ordering::SeqCst) {
            self.publish_log(operation_id, "warn", "scan canceled");
        }

        Ok(ScanSummary {
            files_seen: total,
            books_created: counters.created.load(Ordering::SeqCst),
            books_updated: counters.updated.load(Ordering::SeqCst),
            conflicts: counters.conflicts.load(Ordering::SeqCst),
            blocked_skips: counters.blocked.load(Ordering::SeqCst),
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// First pass: depth-first traversal collecting the matching file list,
    /// skipping any directory directly containing the opt-out marker,
    /// symlinks, hidden files, and zero-byte files.
    fn walk(&self, root: &Path, options: &ScanOptions) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        let walker = walkdir::WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                if entry.file_type().is_dir() {
                    let marker = entry.path().join(&options.opt_out_marker);
                    if marker.exists() {
                        info!(dir = %entry.path().display(), "skipping subtree: opt-out marker present");
                        return false;
                    }
                }
                true
            });

        for entry in walker {
            let entry = entry.map_err(|e| shelfkeeper_common::Error::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or_default()
                .to_ascii_lowercase();
            if !options.extension_allowlist.iter().any(|e| e == &ext) {
                continue;
            }
            match entry.metadata() {
                Ok(meta) if meta.len() == 0 => {
                    warn!(path = %path.display(), "skipping zero-byte file");
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable file");
                    continue;
                }
            }
            out.push(path.to_path_buf());
        }
        Ok(out)
    }

    fn process_file(
        &self,
        path: &Path,
        library_root: &Path,
        options: &ScanOptions,
        counters: &Counters,
        operation_id: &str,
        rt_handle: &tokio::runtime::Handle,
    ) {
        if let Err(e) =
            self.process_file_inner(path, library_root, options, counters, operation_id, rt_handle)
        {
            warn!(path = %path.display(), error = %e, "error processing file during scan");
            self.publish_log(
                operation_id,
                "error",
                &format!("failed to process {}: {e}", path.display()),
            );
        }
    }

    fn process_file_inner(
        &self,
        path: &Path,
        library_root: &Path,
        options: &ScanOptions,
        counters: &Counters,
        operation_id: &str,
        rt_handle: &tokio::runtime::Handle,
    ) -> Result<()> {
        let hash = hash_file(path)?;

        if self.store.is_hash_blocked(&hash)? {
            counters.blocked.fetch_add(1, Ordering::SeqCst);
            self.publish_log(
                operation_id,
                "warn",
                &format!("skipped blocked hash for {}", path.display()),
            );
            return Ok(());
        }

        let tag = self.tag_extractor.extract(path).ok();
        let heuristic = self.heuristic_parser.parse(path);

        let llm_candidate = if heuristic.confidence < options.llm_confidence_threshold {
            if let Some(parser) = &self.llm_parser {
                let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
                let context = LlmContext {
                    directory_chain: path
                        .ancestors()
                        .skip(1)
                        .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
                        .collect(),
                };
                rt_handle.block_on(parser.parse(filename, &context)).ok()
            } else {
                None
            }
        } else {
            None
        };

        let lookup = LookupCandidate {
            heuristic,
            llm: llm_candidate,
        };

        let path_str = path.to_string_lossy().to_string();
        let under_library_root = path.starts_with(library_root);
        let book_by_path = self.store.get_book_by_path(&path_str)?;
        let book_by_hash = self.store.get_books_by_hash(&hash)?.into_iter().next();

        match (book_by_path, book_by_hash) {
            (None, None) => {
                let reconciler = Reconciler::new(&self.store);
                let id = new_id();
                self.store.create_book(seed_book(&id, &path_str, &hash, path)?)?;
                let reconciled = reconciler.reconcile(
                    Some(&id),
                    true,
                    tag.as_ref(),
                    &lookup,
                    under_library_root,
                )?;
                self.store.update_book(finalize(reconciled.book, &path_str, &hash, path)?)?;
                for state in &reconciled.field_states {
                    self.store.put_field_state(state)?;
                }
                counters.created.fetch_add(1, Ordering::SeqCst);
            }
            (Some(by_path), Some(by_hash)) if by_path.id == by_hash.id => {
                // Path matches and hash matches: unchanged file, no state change.
                self.reconcile_existing(&by_path.id, tag.as_ref(), &lookup, &path_str, &hash, path)?;
                counters.updated.fetch_add(1, Ordering::SeqCst);
            }
            (Some(by_path), Some(by_hash)) => {
                // Both keys resolve, but to different Books: the user must
                // resolve this through the version-linking UI.
                counters.conflicts.fetch_add(1, Ordering::SeqCst);
                self.publish_log(
                    operation_id,
                    "error",
                    &format!(
                        "conflict at {}: path belongs to {} but hash belongs to {}",
                        path.display(),
                        by_path.id,
                        by_hash.id
                    ),
                );
            }
            (Some(by_path), None) => {
                // Path matches but hash differs: the file was replaced.
                info!(path = %path.display(), "file replaced in place, updating hash");
                self.reconcile_existing(&by_path.id, tag.as_ref(), &lookup, &path_str, &hash, path)?;
                counters.updated.fetch_add(1, Ordering::SeqCst);
            }
            (None, Some(by_hash)) => {
                // Hash matches but path differs: the file moved.
                info!(path = %path.display(), "file moved, updating path");
                self.reconcile_existing(&by_hash.id, tag.as_ref(), &lookup, &path_str, &hash, path)?;
                counters.updated.fetch_add(1, Ordering::SeqCst);
            }
        }

        Ok(())
    }

    fn reconcile_existing(
        &self,
        book_id: &str,
        tag: Option<&crate::extractors::TagCandidate>,
        lookup: &LookupCandidate,
        path_str: &str,
        hash: &str,
        path: &Path,
    ) -> Result<()> {
        let reconciler = Reconciler::new(&self.store);
        let under_library_root = false;
        let reconciled = reconciler.reconcile(Some(book_id), false, tag, lookup, under_library_root)?;
        self.store.update_book(finalize(reconciled.book, path_str, hash, path)?)?;
        for state in &reconciled.field_states {
            self.store.put_field_state(state)?;
        }
        Ok(())
    }

    /// Rayon worker threads have no Tokio reactor, so publishing here uses a
    /// plain futures executor rather than `tokio::spawn` (which requires
    /// being called from inside a Tokio worker thread). `EventHub::publish`
    /// only ever touches in-memory channels, never I/O, so blocking on it
    /// briefly is cheap.
    fn publish_progress(&self, operation_id: &str, current: u64, total: u64) {
        debug!(current, total, "scan progress");
        futures::executor::block_on(self.events.publish(Event::new(
            EventKind::OperationProgress,
            Some(operation_id.to_string()),
            serde_json::json!({ "current": current, "total": total }),
        )));
    }

    fn publish_log(&self, operation_id: &str, level: &str, message: &str) {
        futures::executor::block_on(self.events.publish(Event::new(
            EventKind::OperationLog,
            Some(operation_id.to_string()),
            serde_json::json!({ "level": level, "message": message }),
        )));
    }
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

fn seed_book(id: &str, path_str: &str, hash: &str, path: &Path) -> Result<Book> {
    let mut book = Book::new(id.to_string());
    book.file_path = Some(path_str.to_string());
    book.original_hash = Some(hash.to_string());
    book.file_size = std::fs::metadata(path).ok().map(|m| m.len());
    Ok(book)
}

fn finalize(mut book: Book, path_str: &str, hash: &str, path: &Path) -> Result<Book> {
    book.file_path = Some(path_str.to_string());
    book.original_hash = Some(hash.to_string());
    book.file_size = std::fs::metadata(path).ok().map(|m| m.len());
    Ok(book)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn open_store() -> (tempfile::TempDir, Store) {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.redb")).unwrap();
        (dir, store)
    }

    fn scanner(store: Store) -> Scanner {
        Scanner::new(
            store,
            EventHub::new(32, std::time::Duration::from_secs(3600)),
            TagExtractor::new(),
            HeuristicParser::new(),
            None,
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn scan_creates_one_book_per_file() {
        let (_store_dir, store) = open_store();
        let import_dir = tempdir().unwrap();
        let mut f = std::fs::File::create(import_dir.path().join("Tolkien - The Hobbit.m4b")).unwrap();
        f.write_all(b"fake audio bytes").unwrap();

        let scanner = scanner(store.clone());
        let summary = scanner
            .scan(
                import_dir.path(),
                Path::new("/lib"),
                &ScanOptions::default(),
                CancelToken::new(),
                "op-1",
            )
            .await
            .unwrap();

        assert_eq!(summary.files_seen, 1);
        assert_eq!(summary.books_created, 1);
        let books = store.list_books(&BookFilter::default(), &ListOptions::default()).unwrap();
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].library_state, LibraryState::Import);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn opt_out_marker_skips_entire_subtree() {
        let (_store_dir, store) = open_store();
        let import_dir = tempdir().unwrap();
        std::fs::write(import_dir.path().join("keep-A.m4b"), b"aaa").unwrap();
        let skip_dir = import_dir.path().join("skip");
        std::fs::create_dir(&skip_dir).unwrap();
        std::fs::write(skip_dir.join("B.m4b"), b"bbb").unwrap();
        std::fs::write(skip_dir.join(".jabexclude"), b"").unwrap();

        let scanner = scanner(store.clone());
        let summary = scanner
            .scan(
                import_dir.path(),
                Path::new("/lib"),
                &ScanOptions::default(),
                CancelToken::new(),
                "op-1",
            )
            .await
            .unwrap();

        assert_eq!(summary.files_seen, 1);
        assert_eq!(summary.books_created, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn duplicate_hash_without_version_group_is_a_conflict() {
        let (_store_dir, store) = open_store();
        let lib_dir = tempdir().unwrap();
        std::fs::write(lib_dir.path().join("x.m4b"), b"same bytes").unwrap();

        let scanner = scanner(store.clone());
        scanner
            .scan(lib_dir.path(), lib_dir.path(), &ScanOptions::default(), CancelToken::new(), "op-1")
            .await
            .unwrap();

        let import_dir = tempdir().unwrap();
        std::fs::write(import_dir.path().join("x-copy.m4b"), b"same bytes").unwrap();
        let summary = scanner
            .scan(
                import_dir.path(),
                lib_dir.path(),
                &ScanOptions::default(),
                CancelToken::new(),
                "op-2",
            )
            .await
            .unwrap();

        assert_eq!(summary.conflicts, 1);
        assert_eq!(summary.books_created, 0);
    }
}
