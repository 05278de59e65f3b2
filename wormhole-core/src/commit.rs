//! Download commit: copy a completed inbound file into durable storage without ever leaving a
//! half-written visible record behind.
//!
//! Protocol against the storage collaborator: insert a pending (invisible) record, copy every
//! byte, finalize (make visible). Any failure after the insert deletes the pending record before
//! the error is returned.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

const COPY_BUF_SIZE: usize = 32 * 1024;

/// Fallback MIME type when the extension is unknown.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Reference to a committed, visible record. `display_name` may differ from the requested name
/// when storage disambiguated a duplicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRef {
    pub display_name: String,
    pub location: PathBuf,
}

/// Storage collaborator primitives.
pub trait DownloadStore: Send + Sync {
    type Handle;

    fn insert_pending(&self, name: &str, mime_type: &str, size: u64) -> io::Result<Self::Handle>;
    fn write(&self, handle: &mut Self::Handle, bytes: &[u8]) -> io::Result<()>;
    fn finalize(&self, handle: Self::Handle) -> Result<DownloadRef, (Self::Handle, io::Error)>;
    fn delete(&self, handle: Self::Handle) -> io::Result<()>;
}

/// Best-effort hook run after a successful commit (e.g. a "download complete" notification).
pub trait CommitNotifier: Send + Sync {
    fn notify(&self, committed: &DownloadRef, mime_type: &str) -> Result<(), String>;
}

#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("failed to create pending record for {name}: {source}")]
    Insert {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to open source {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to copy into {name}: {source}")]
    Copy {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to finalize {name}: {source}")]
    Finalize {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// Object-safe commit entry point used by the session controller.
pub trait Committer: Send + Sync {
    fn commit(
        &self,
        display_name: &str,
        source: &Path,
        mime_type: &str,
        size: u64,
    ) -> Result<DownloadRef, CommitError>;
}

/// Commits files into a [`DownloadStore`].
pub struct DownloadCommitter<S> {
    store: S,
    notifier: Option<Box<dyn CommitNotifier>>,
}

impl<S: DownloadStore> DownloadCommitter<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Box<dyn CommitNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn rollback(&self, handle: S::Handle, name: &str) {
        if let Err(e) = self.store.delete(handle) {
            warn!(name, error = %e, "rollback of pending record failed");
        } else {
            debug!(name, "pending record rolled back");
        }
    }
}

impl<S: DownloadStore> Committer for DownloadCommitter<S> {
    fn commit(
        &self,
        display_name: &str,
        source: &Path,
        mime_type: &str,
        size: u64,
    ) -> Result<DownloadRef, CommitError> {
        let mut handle = self
            .store
            .insert_pending(display_name, mime_type, size)
            .map_err(|source| CommitError::Insert {
                name: display_name.to_string(),
                source,
            })?;

        let mut input = match File::open(source) {
            Ok(f) => f,
            Err(e) => {
                self.rollback(handle, display_name);
                return Err(CommitError::Open {
                    path: source.to_path_buf(),
                    source: e,
                });
            }
        };
        if let Err(e) = copy_into(&self.store, &mut handle, &mut input) {
            self.rollback(handle, display_name);
            return Err(CommitError::Copy {
                name: display_name.to_string(),
                source: e,
            });
        }

        let committed = match self.store.finalize(handle) {
            Ok(r) => r,
            Err((handle, e)) => {
                self.rollback(handle, display_name);
                return Err(CommitError::Finalize {
                    name: display_name.to_string(),
                    source: e,
                });
            }
        };
        info!(
            requested = display_name,
            saved = %committed.display_name,
            size,
            "download committed"
        );

        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.notify(&committed, mime_type) {
                warn!(name = %committed.display_name, error = %e, "post-commit notification failed");
            }
        }
        Ok(committed)
    }
}

fn copy_into<S: DownloadStore>(
    store: &S,
    handle: &mut S::Handle,
    input: &mut impl Read,
) -> io::Result<u64> {
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut copied = 0u64;
    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => return Ok(copied),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        store.write(handle, &buf[..n])?;
        copied += n as u64;
    }
}

/// MIME type from the file extension; [`DEFAULT_MIME_TYPE`] when unknown.
pub fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "apk" => "application/vnd.android.package-archive",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        _ => DEFAULT_MIME_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// In-memory store with switchable failures.
    #[derive(Default)]
    struct MemStore {
        records: Mutex<Vec<(String, Vec<u8>, bool)>>,
        fail_write_after: Option<usize>,
        fail_finalize: bool,
    }

    struct MemHandle {
        index: usize,
        writes: usize,
    }

    impl DownloadStore for MemStore {
        type Handle = MemHandle;

        fn insert_pending(&self, name: &str, _mime: &str, _size: u64) -> io::Result<MemHandle> {
            let mut r = self.records.lock().unwrap();
            r.push((name.to_string(), Vec::new(), false));
            Ok(MemHandle {
                index: r.len() - 1,
                writes: 0,
            })
        }

        fn write(&self, handle: &mut MemHandle, bytes: &[u8]) -> io::Result<()> {
            if self.fail_write_after == Some(handle.writes) {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            handle.writes += 1;
            self.records.lock().unwrap()[handle.index]
                .1
                .extend_from_slice(bytes);
            Ok(())
        }

        fn finalize(&self, handle: MemHandle) -> Result<DownloadRef, (MemHandle, io::Error)> {
            if self.fail_finalize {
                return Err((handle, io::Error::new(io::ErrorKind::Other, "busy")));
            }
            let mut r = self.records.lock().unwrap();
            r[handle.index].2 = true;
            Ok(DownloadRef {
                display_name: r[handle.index].0.clone(),
                location: PathBuf::from(format!("mem://{}", handle.index)),
            })
        }

        fn delete(&self, handle: MemHandle) -> io::Result<()> {
            self.records.lock().unwrap().remove(handle.index);
            Ok(())
        }
    }

    impl MemStore {
        fn visible(&self) -> Vec<(String, Vec<u8>)> {
            self.records
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.2)
                .map(|r| (r.0.clone(), r.1.clone()))
                .collect()
        }

        fn len(&self) -> usize {
            self.records.lock().unwrap().len()
        }
    }

    fn source_file(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn commit_copies_and_finalizes() {
        let payload: Vec<u8> = (0..100_000u32).map(|i| i as u8).collect();
        let src = source_file(&payload);
        let committer = DownloadCommitter::new(MemStore::default());
        let r = committer
            .commit("photo.jpg", src.path(), "image/jpeg", payload.len() as u64)
            .unwrap();
        assert_eq!(r.display_name, "photo.jpg");
        assert_eq!(committer.store().visible(), vec![("photo.jpg".to_string(), payload)]);
    }

    #[test]
    fn copy_failure_rolls_back() {
        let src = source_file(&vec![7u8; 100_000]);
        let committer = DownloadCommitter::new(MemStore {
            fail_write_after: Some(1),
            ..Default::default()
        });
        let err = committer
            .commit("big.bin", src.path(), DEFAULT_MIME_TYPE, 100_000)
            .unwrap_err();
        assert!(matches!(err, CommitError::Copy { .. }));
        let cause = std::error::Error::source(&err).unwrap().to_string();
        assert_eq!(cause, "disk full");
        assert!(committer.store().visible().is_empty());
        assert_eq!(committer.store().len(), 0);
    }

    #[test]
    fn missing_source_rolls_back() {
        let committer = DownloadCommitter::new(MemStore::default());
        let err = committer
            .commit("x.txt", Path::new("/nonexistent/wormhole/x.txt"), "text/plain", 1)
            .unwrap_err();
        assert!(matches!(err, CommitError::Open { .. }));
        assert_eq!(committer.store().len(), 0);
    }

    #[test]
    fn finalize_failure_rolls_back() {
        let src = source_file(b"hello");
        let committer = DownloadCommitter::new(MemStore {
            fail_finalize: true,
            ..Default::default()
        });
        let err = committer
            .commit("a.txt", src.path(), "text/plain", 5)
            .unwrap_err();
        assert!(matches!(err, CommitError::Finalize { .. }));
        assert_eq!(committer.store().len(), 0);
    }

    struct FailingNotifier(Arc<AtomicUsize>);

    impl CommitNotifier for FailingNotifier {
        fn notify(&self, _: &DownloadRef, _: &str) -> Result<(), String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err("notifications disabled".into())
        }
    }

    #[test]
    fn notifier_failure_keeps_commit() {
        let src = source_file(b"hello");
        let calls = Arc::new(AtomicUsize::new(0));
        let committer = DownloadCommitter::new(MemStore::default())
            .with_notifier(Box::new(FailingNotifier(calls.clone())));
        committer
            .commit("a.txt", src.path(), "text/plain", 5)
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(committer.store().visible().len(), 1);
    }

    #[test]
    fn mime_from_extension() {
        assert_eq!(mime_type_for(Path::new("/tmp/a.PNG")), "image/png");
        assert_eq!(mime_type_for(Path::new("notes.txt")), "text/plain");
        assert_eq!(mime_type_for(Path::new("archive")), DEFAULT_MIME_TYPE);
        assert_eq!(mime_type_for(Path::new("x.unknownext")), DEFAULT_MIME_TYPE);
    }
}
