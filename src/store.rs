//! Artifact store: uniquely named temporary files owned by request scopes.
//!
//! ## Ownership model
//!
//! ```text
//! ArtifactStore (root dir, shared, append-only)
//!  ├─ req-3k9x…/            RequestScope #1 (exclusive)
//!  │   ├─ staged-q81…​.pdf    input
//!  │   └─ out-7tz…​.docx      result
//!  └─ req-p02m…/            RequestScope #2 (exclusive)
//! ```
//!
//! Every request opens its own [`RequestScope`], which is a private
//! sub-directory of the store root. All artifacts the request creates live
//! in that directory and are tracked by the scope. Closing the scope (or
//! dropping it, e.g. when the request future is cancelled) deletes every
//! tracked file and then the directory itself, so a blocking task that
//! finishes after cancellation cannot leave a file behind either.
//!
//! File names come from `tempfile`'s random generator plus the kind's
//! extension, and are created with `O_EXCL`. Caller-supplied file names are
//! never used on disk.

use crate::error::StorageError;
use crate::media::MediaKind;
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;
use tempfile::{TempDir, TempPath};
use tracing::{debug, warn};

/// Shared root under which request scopes are created.
///
/// Cheap to clone; clones share the same root.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    inner: Arc<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    root: PathBuf,
    /// Present when the store created its own private directory.
    _private: Option<TempDir>,
}

impl ArtifactStore {
    /// Open a store rooted at `work_dir`, or at a fresh private temporary
    /// directory when `None`.
    pub fn open(work_dir: Option<&Path>) -> Result<Self, StorageError> {
        let inner = match work_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)
                    .map_err(|e| StorageError::io("create working directory", e))?;
                StoreInner {
                    root: dir.to_path_buf(),
                    _private: None,
                }
            }
            None => {
                let dir = tempfile::Builder::new()
                    .prefix("pdfops-")
                    .tempdir()
                    .map_err(|e| StorageError::io("create working directory", e))?;
                StoreInner {
                    root: dir.path().to_path_buf(),
                    _private: Some(dir),
                }
            }
        };
        debug!("Artifact store rooted at {}", inner.root.display());
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Open a new exclusive scope for one request.
    pub fn open_scope(&self) -> Result<RequestScope, StorageError> {
        let dir = tempfile::Builder::new()
            .prefix("req-")
            .rand_bytes(12)
            .tempdir_in(&self.inner.root)
            .map_err(|e| StorageError::io("open request scope", e))?;
        let id = dir
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        debug!(scope = %id, "Opened request scope");
        Ok(RequestScope {
            id,
            dir: Some(dir),
            entries: Mutex::new(Vec::new()),
        })
    }

    /// Check that the root accepts new files.
    pub fn probe(&self) -> Result<(), StorageError> {
        tempfile::Builder::new()
            .prefix(".probe-")
            .tempfile_in(&self.inner.root)
            .map(drop)
            .map_err(|e| StorageError::io("write to working directory", e))
    }
}

/// Identifier of an artifact; its unique on-disk file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactId(String);

impl ArtifactId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle to binary data at rest, owned by exactly one [`RequestScope`].
///
/// The handle is a plain description; the file it points to lives until
/// its scope releases it.
#[derive(Debug, Clone)]
pub struct Artifact {
    id: ArtifactId,
    path: PathBuf,
    kind: MediaKind,
    created_at: SystemTime,
}

impl Artifact {
    pub fn id(&self) -> &ArtifactId {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Current size of the backing file.
    pub fn size(&self) -> io::Result<u64> {
        std::fs::metadata(&self.path).map(|m| m.len())
    }
}

struct Entry {
    id: ArtifactId,
    /// `None` once released.
    temp: Option<TempPath>,
}

/// Unit of ownership and guaranteed cleanup for one dispatch call.
///
/// Scopes never nest and never share artifacts. [`RequestScope::close`]
/// consumes the scope, so nothing can be created in a closed scope.
pub struct RequestScope {
    id: String,
    dir: Option<TempDir>,
    entries: Mutex<Vec<Entry>>,
}

impl fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestScope")
            .field("id", &self.id)
            .field("live", &self.live_count())
            .finish()
    }
}

impl RequestScope {
    /// Scope identifier (its directory name), used for log correlation.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Write `bytes` to a fresh uniquely named file owned by this scope.
    pub fn stage(&self, bytes: &[u8], kind: MediaKind) -> Result<Artifact, StorageError> {
        let mut file = self.create_file("staged-", kind)?;
        file.write_all(bytes)
            .and_then(|_| file.flush())
            .map_err(|e| StorageError::io("write artifact", e))?;
        Ok(self.track(file.into_temp_path(), kind))
    }

    /// Reserve an empty uniquely named file for a routine to fill in.
    pub fn allocate(&self, kind: MediaKind) -> Result<Artifact, StorageError> {
        let file = self.create_file("out-", kind)?;
        Ok(self.track(file.into_temp_path(), kind))
    }

    /// Delete the artifact's backing file.
    ///
    /// Idempotent: releasing an already released artifact, or one whose file
    /// a routine already removed, succeeds. Artifacts of other scopes are
    /// refused.
    pub fn release(&self, artifact: &Artifact) -> Result<(), StorageError> {
        let mut entries = self.lock();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == artifact.id)
            .ok_or_else(|| StorageError::NotOwned {
                id: artifact.id.to_string(),
            })?;
        match entry.temp.take() {
            Some(temp) => remove(temp).map_err(|e| StorageError::io("delete artifact", e)),
            None => Ok(()),
        }
    }

    /// Whether `artifact` was created by this scope and is still live.
    pub fn owns(&self, artifact: &Artifact) -> bool {
        self.lock()
            .iter()
            .any(|e| e.id == artifact.id && e.temp.is_some())
    }

    /// Number of artifacts not yet released.
    pub fn live_count(&self) -> usize {
        self.lock().iter().filter(|e| e.temp.is_some()).count()
    }

    /// Release every artifact and remove the scope directory.
    pub fn close(mut self) -> CleanupReport {
        self.release_all()
    }

    fn create_file(
        &self,
        role: &str,
        kind: MediaKind,
    ) -> Result<tempfile::NamedTempFile, StorageError> {
        let dir = self.dir.as_ref().ok_or_else(|| {
            StorageError::io(
                "create artifact",
                io::Error::new(io::ErrorKind::Other, "scope closed"),
            )
        })?;
        let suffix = format!(".{}", kind.extension());
        tempfile::Builder::new()
            .prefix(role)
            .suffix(&suffix)
            .rand_bytes(16)
            .tempfile_in(dir.path())
            .map_err(|e| StorageError::io("create artifact", e))
    }

    fn track(&self, temp: TempPath, kind: MediaKind) -> Artifact {
        let id = ArtifactId(
            temp.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        let artifact = Artifact {
            id: id.clone(),
            path: temp.to_path_buf(),
            kind,
            created_at: SystemTime::now(),
        };
        debug!(scope = %self.id, artifact = %id, %kind, "Tracked artifact");
        self.lock().push(Entry {
            id,
            temp: Some(temp),
        });
        artifact
    }

    fn release_all(&mut self) -> CleanupReport {
        let entries = std::mem::take(
            self.entries
                .get_mut()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        let mut report = CleanupReport {
            scope: self.id.clone(),
            released: 0,
            failures: Vec::new(),
        };

        for entry in entries.into_iter().rev() {
            let Some(temp) = entry.temp else { continue };
            match remove(temp) {
                Ok(()) => report.released += 1,
                Err(e) => report.failures.push(CleanupFailure {
                    artifact: Some(entry.id),
                    reason: e.kind().to_string(),
                }),
            }
        }

        if let Some(dir) = self.dir.take() {
            if let Err(e) = dir.close() {
                report.failures.push(CleanupFailure {
                    artifact: None,
                    reason: e.kind().to_string(),
                });
            }
        }
        report
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        if self.dir.is_none() {
            return;
        }
        // Reached when the owning future was cancelled before close().
        let report = self.release_all();
        warn!(
            scope = %report.scope,
            released = report.released,
            "Request scope dropped without close; released its artifacts"
        );
        report.log();
    }
}

/// Delete a tracked file, treating "already gone" as success.
fn remove(temp: TempPath) -> io::Result<()> {
    match temp.close() {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Outcome of releasing a scope. Failures are reported, never raised.
#[derive(Debug, Clone)]
pub struct CleanupReport {
    pub scope: String,
    pub released: usize,
    pub failures: Vec<CleanupFailure>,
}

/// One file or directory that could not be removed.
#[derive(Debug, Clone)]
pub struct CleanupFailure {
    /// `None` for the scope directory itself.
    pub artifact: Option<ArtifactId>,
    pub reason: String,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Emit the report through `tracing`.
    pub fn log(&self) {
        if self.is_clean() {
            debug!(scope = %self.scope, released = self.released, "Scope closed");
            return;
        }
        for failure in &self.failures {
            match &failure.artifact {
                Some(id) => warn!(
                    scope = %self.scope,
                    artifact = %id,
                    "Failed to delete artifact: {}",
                    failure.reason
                ),
                None => warn!(
                    scope = %self.scope,
                    "Failed to remove scope directory: {}",
                    failure.reason
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[test]
    fn stage_writes_bytes_under_scope_dir() {
        let root = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(Some(root.path())).unwrap();
        let scope = store.open_scope().unwrap();

        let a = scope.stage(b"%PDF-1.4 hello", MediaKind::Pdf).unwrap();
        assert_eq!(std::fs::read(a.path()).unwrap(), b"%PDF-1.4 hello");
        assert_eq!(a.size().unwrap(), 14);
        assert_eq!(a.kind(), MediaKind::Pdf);
        assert!(a.id().as_str().ends_with(".pdf"));
        assert!(a.path().starts_with(root.path()));
        assert!(scope.owns(&a));

        let report = scope.close();
        assert!(report.is_clean());
        assert_eq!(report.released, 1);
        assert!(!a.path().exists());
        assert_eq!(entries(root.path()), 0);
    }

    #[test]
    fn allocate_creates_empty_placeholder() {
        let store = ArtifactStore::open(None).unwrap();
        let scope = store.open_scope().unwrap();
        let a = scope.allocate(MediaKind::Docx).unwrap();
        assert!(a.path().exists());
        assert_eq!(a.size().unwrap(), 0);
        assert!(a.id().as_str().ends_with(".docx"));
    }

    #[test]
    fn release_is_idempotent() {
        let store = ArtifactStore::open(None).unwrap();
        let scope = store.open_scope().unwrap();
        let a = scope.stage(b"x", MediaKind::Txt).unwrap();

        scope.release(&a).unwrap();
        assert!(!a.path().exists());
        scope.release(&a).unwrap();
        assert!(!scope.owns(&a));
        assert_eq!(scope.live_count(), 0);
    }

    #[test]
    fn release_tolerates_file_removed_by_routine() {
        let store = ArtifactStore::open(None).unwrap();
        let scope = store.open_scope().unwrap();
        let a = scope.stage(b"x", MediaKind::Txt).unwrap();
        std::fs::remove_file(a.path()).unwrap();
        scope.release(&a).unwrap();
        assert!(scope.close().is_clean());
    }

    #[test]
    fn foreign_artifacts_are_refused() {
        let store = ArtifactStore::open(None).unwrap();
        let first = store.open_scope().unwrap();
        let second = store.open_scope().unwrap();
        let a = first.stage(b"mine", MediaKind::Txt).unwrap();

        let err = second.release(&a).unwrap_err();
        assert!(matches!(err, StorageError::NotOwned { .. }));
        assert!(a.path().exists(), "another scope must not delete it");
        assert!(!second.owns(&a));
    }

    #[test]
    fn dropping_an_open_scope_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(Some(root.path())).unwrap();
        let path = {
            let scope = store.open_scope().unwrap();
            let a = scope.stage(b"abc", MediaKind::Pdf).unwrap();
            scope.allocate(MediaKind::Txt).unwrap();
            a.path().to_path_buf()
        };
        assert!(!path.exists());
        assert_eq!(entries(root.path()), 0);
    }

    #[test]
    fn untracked_files_in_scope_dir_are_removed_on_close() {
        let root = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(Some(root.path())).unwrap();
        let scope = store.open_scope().unwrap();
        let a = scope.allocate(MediaKind::Png).unwrap();
        let stray = a.path().with_file_name("stray.bin");
        std::fs::write(&stray, b"left behind by a codec").unwrap();

        assert!(scope.close().is_clean());
        assert!(!stray.exists());
        assert_eq!(entries(root.path()), 0);
    }

    #[test]
    fn concurrent_scopes_never_collide() {
        let store = ArtifactStore::open(None).unwrap();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let scope = store.open_scope().unwrap();
                    let names: Vec<PathBuf> = (0..8)
                        .map(|_| {
                            scope
                                .stage(b"%PDF", MediaKind::Pdf)
                                .unwrap()
                                .path()
                                .to_path_buf()
                        })
                        .collect();
                    // Keep files alive until the names are collected.
                    std::mem::forget(scope);
                    names
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for p in h.join().unwrap() {
                assert!(seen.insert(p), "duplicate artifact path");
            }
        }
        assert_eq!(seen.len(), 128);
    }

    #[test]
    fn probe_succeeds_on_writable_root() {
        let store = ArtifactStore::open(None).unwrap();
        store.probe().unwrap();
    }
}
