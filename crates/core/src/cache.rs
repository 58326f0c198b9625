use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::document::{document_name, Document, FileType, Fingerprint, EXTRACTION_VERSION};
use crate::error::{ExtractionError, Result};
use crate::extract::extract;

/// Extracted-text cache backed by one JSON file per (path, extraction version).
///
/// A document is re-extracted whenever its fingerprint differs from the cached
/// one, so stale text is never served. Requests for the same path are
/// serialized, which makes concurrent callers share a single extraction.
#[derive(Debug)]
pub struct TextCache {
    dir: PathBuf,
    memo: Mutex<HashMap<PathBuf, Arc<Document>>>,
    path_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl TextCache {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            memo: Mutex::new(HashMap::new()),
            path_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get_text(&self, path: &Path) -> Result<Arc<Document>> {
        self.load(path, false)
    }

    /// Re-extracts unconditionally and replaces both cache layers.
    pub fn force_refresh(&self, path: &Path) -> Result<Arc<Document>> {
        self.load(path, true)
    }

    pub fn invalidate(&self, path: &Path) -> Result<()> {
        let key = cache_key(path);
        self.memo.lock().remove(&key);
        match fs::remove_file(self.entry_path(&key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn load(&self, path: &Path, force_refresh: bool) -> Result<Arc<Document>> {
        let fingerprint = Fingerprint::of(path)?;
        let file_type = FileType::from_path(path)
            .ok_or_else(|| ExtractionError::Unsupported(path.to_path_buf()))?;
        let key = cache_key(path);

        let lock = self.lock_for(&key);
        let _held = lock.lock();

        if !force_refresh {
            if let Some(doc) = self.memo.lock().get(&key) {
                if is_fresh(doc, &fingerprint) {
                    return Ok(Arc::clone(doc));
                }
            }
            if let Some(doc) = self.read_entry(&key, &fingerprint) {
                let doc = Arc::new(doc);
                self.memo.lock().insert(key, Arc::clone(&doc));
                return Ok(doc);
            }
        }

        let extracted = extract(path, file_type)?;
        let doc = Document {
            name: document_name(path),
            path: key.clone(),
            file_type,
            size: fingerprint.size,
            fingerprint,
            text: extracted.text,
            extraction_version: EXTRACTION_VERSION.to_string(),
            extraction_method: extracted.method.to_string(),
            page_boundaries: extracted.page_boundaries,
        };
        info!(
            document = %doc.name,
            method = extracted.method,
            chars = doc.char_len(),
            pages = doc.page_count(),
            "extracted document text"
        );
        if let Err(err) = self.write_entry(&key, &doc) {
            warn!(document = %doc.name, error = %err, "failed to persist text cache entry");
        }
        let doc = Arc::new(doc);
        self.memo.lock().insert(key, Arc::clone(&doc));
        Ok(doc)
    }

    fn lock_for(&self, key: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.path_locks.lock();
        Arc::clone(locks.entry(key.to_path_buf()).or_default())
    }

    fn entry_path(&self, key: &Path) -> PathBuf {
        let mut hasher = blake3::Hasher::new();
        hasher.update(key.to_string_lossy().as_bytes());
        hasher.update(b"\0");
        hasher.update(EXTRACTION_VERSION.as_bytes());
        self.dir.join(format!("{}.json", hasher.finalize().to_hex()))
    }

    fn read_entry(&self, key: &Path, fingerprint: &Fingerprint) -> Option<Document> {
        let entry = self.entry_path(key);
        let raw = fs::read(&entry).ok()?;
        match serde_json::from_slice::<Document>(&raw) {
            Ok(doc) if is_fresh(&doc, fingerprint) => Some(doc),
            Ok(_) => {
                debug!(entry = %entry.display(), "stale text cache entry");
                None
            }
            Err(err) => {
                warn!(entry = %entry.display(), error = %err, "corrupt text cache entry");
                None
            }
        }
    }

    fn write_entry(&self, key: &Path, doc: &Document) -> Result<()> {
        let payload = serde_json::to_vec(doc)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&payload)?;
        tmp.flush()?;
        tmp.persist(self.entry_path(key))
            .map_err(|err| ExtractionError::Io(err.error))?;
        Ok(())
    }
}

fn is_fresh(doc: &Document, fingerprint: &Fingerprint) -> bool {
    doc.fingerprint == *fingerprint && doc.extraction_version == EXTRACTION_VERSION
}

fn cache_key(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memoizes_until_fingerprint_changes() {
        let docs = tempdir().unwrap();
        let cache = TextCache::new(docs.path().join("cache")).unwrap();
        let path = docs.path().join("notes.txt");
        fs::write(&path, "first draft").unwrap();

        let first = cache.get_text(&path).unwrap();
        let again = cache.get_text(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(first.text, "first draft");
        assert!(first.page_boundaries.is_empty());

        fs::write(&path, "second, longer draft").unwrap();
        let refreshed = cache.get_text(&path).unwrap();
        assert_eq!(refreshed.text, "second, longer draft");
    }

    #[test]
    fn persisted_entries_survive_a_new_cache() {
        let docs = tempdir().unwrap();
        let cache_dir = docs.path().join("cache");
        let path = docs.path().join("notes.md");
        fs::write(&path, "# Title").unwrap();

        let cache = TextCache::new(&cache_dir).unwrap();
        let doc = cache.get_text(&path).unwrap();
        let entry = cache.entry_path(&doc.path);
        let mut stored: Document = serde_json::from_slice(&fs::read(&entry).unwrap()).unwrap();
        stored.text = "from disk".to_string();
        fs::write(&entry, serde_json::to_vec(&stored).unwrap()).unwrap();

        let reopened = TextCache::new(&cache_dir).unwrap();
        assert_eq!(reopened.get_text(&path).unwrap().text, "from disk");
        assert_eq!(reopened.force_refresh(&path).unwrap().text, "# Title");
    }

    #[test]
    fn invalidate_drops_both_layers() {
        let docs = tempdir().unwrap();
        let cache = TextCache::new(docs.path().join("cache")).unwrap();
        let path = docs.path().join("a.txt");
        fs::write(&path, "alpha").unwrap();
        let doc = cache.get_text(&path).unwrap();
        let entry = cache.entry_path(&doc.path);
        assert!(entry.exists());

        cache.invalidate(&path).unwrap();
        assert!(!entry.exists());
        assert!(cache.memo.lock().is_empty());
        cache.invalidate(&path).unwrap();
    }

    #[test]
    fn reports_missing_and_unsupported_files() {
        let docs = tempdir().unwrap();
        let cache = TextCache::new(docs.path().join("cache")).unwrap();
        assert!(matches!(
            cache.get_text(&docs.path().join("gone.pdf")),
            Err(ExtractionError::Missing(_))
        ));
        let blob = docs.path().join("image.png");
        fs::write(&blob, [0u8, 1, 2]).unwrap();
        assert!(matches!(
            cache.get_text(&blob),
            Err(ExtractionError::Unsupported(_))
        ));
    }

    #[test]
    fn concurrent_requests_share_one_extraction() {
        let docs = tempdir().unwrap();
        let cache = TextCache::new(docs.path().join("cache")).unwrap();
        let path = docs.path().join("shared.txt");
        fs::write(&path, "shared body").unwrap();

        let results: Vec<Arc<Document>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| cache.get_text(&path).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(results.iter().all(|doc| Arc::ptr_eq(doc, &results[0])));
    }
}
