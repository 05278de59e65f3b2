//! Downloads directory store: the filesystem implementation of [`DownloadStore`].
//!
//! Pending records are hidden dot-files (`.pending-<uuid>-<name>`) in the target directory, so
//! file managers and directory listings never show a partial download. Finalize hard-links the
//! pending file under the first free visible name, then unlinks the pending name.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::commit::{DownloadRef, DownloadStore};

const PENDING_PREFIX: &str = ".pending-";
const FALLBACK_NAME: &str = "download";
/// Give up disambiguating after this many collisions.
const MAX_DUPLICATES: u32 = 10_000;

pub struct DownloadsDir {
    dir: PathBuf,
}

/// Open pending record.
pub struct PendingFile {
    file: File,
    path: PathBuf,
    name: String,
}

impl PendingFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DownloadsDir {
    /// Store rooted at `dir`; the directory is created on first insert.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Visible (finalized) file names, sorted.
    pub fn visible_names(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Link `pending` under the first free visible name. `hard_link` fails on an existing
    /// target, so two concurrent finalizes of the same name never overwrite each other.
    fn publish(&self, pending: &Path, name: &str) -> io::Result<(String, PathBuf)> {
        let (stem, ext) = split_extension(name);
        for n in 0..=MAX_DUPLICATES {
            let candidate = if n == 0 {
                name.to_string()
            } else {
                format!("{} ({}){}", stem, n, ext)
            };
            let target = self.dir.join(&candidate);
            match fs::hard_link(pending, &target) {
                Ok(()) => return Ok((candidate, target)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free name for {}", name),
        ))
    }
}

impl DownloadStore for DownloadsDir {
    type Handle = PendingFile;

    fn insert_pending(&self, name: &str, _mime_type: &str, _size: u64) -> io::Result<PendingFile> {
        fs::create_dir_all(&self.dir)?;
        let name = sanitize_file_name(name);
        let path = self
            .dir
            .join(format!("{}{}-{}", PENDING_PREFIX, uuid::Uuid::new_v4().simple(), name));
        let file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        Ok(PendingFile { file, path, name })
    }

    fn write(&self, handle: &mut PendingFile, bytes: &[u8]) -> io::Result<()> {
        handle.file.write_all(bytes)
    }

    fn finalize(&self, handle: PendingFile) -> Result<DownloadRef, (PendingFile, io::Error)> {
        if let Err(e) = handle.file.sync_all() {
            return Err((handle, e));
        }
        let (display_name, target) = match self.publish(&handle.path, &handle.name) {
            Ok(x) => x,
            Err(e) => return Err((handle, e)),
        };
        let PendingFile { file, path, .. } = handle;
        drop(file);
        if let Err(e) = fs::remove_file(&path) {
            warn!(path = %path.display(), error = %e, "published download but pending file remains");
        }
        Ok(DownloadRef {
            display_name,
            location: target,
        })
    }

    fn delete(&self, handle: PendingFile) -> io::Result<()> {
        let PendingFile { file, path, .. } = handle;
        drop(file);
        fs::remove_file(path)
    }
}

/// Strip path components and leading dots from a peer-supplied name.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .trim_start_matches('.')
        .to_string();
    if cleaned.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        cleaned
    }
}

/// `"a.tar.gz"` -> `("a.tar", ".gz")`; names without an extension keep everything in the stem.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) if i > 0 => name.split_at(i),
        _ => (name, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::{Committer, DownloadCommitter};

    #[test]
    fn pending_is_hidden_until_finalized() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DownloadsDir::new(tmp.path());
        let mut h = store.insert_pending("report.pdf", "application/pdf", 3).unwrap();
        store.write(&mut h, b"abc").unwrap();
        assert!(store.visible_names().unwrap().is_empty());
        let pending = h.path().to_path_buf();

        let r = store.finalize(h).map_err(|(_, e)| e).unwrap();
        assert_eq!(r.display_name, "report.pdf");
        assert_eq!(fs::read(&r.location).unwrap(), b"abc");
        assert!(!pending.exists());
        assert_eq!(store.visible_names().unwrap(), vec!["report.pdf"]);
    }

    #[test]
    fn duplicates_are_disambiguated() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DownloadsDir::new(tmp.path());
        for _ in 0..3 {
            let h = store.insert_pending("a.tar.gz", "application/gzip", 0).unwrap();
            store.finalize(h).map_err(|(_, e)| e).unwrap();
        }
        assert_eq!(
            store.visible_names().unwrap(),
            vec!["a.tar (1).gz", "a.tar (2).gz", "a.tar.gz"]
        );
    }

    #[test]
    fn concurrent_finalize_never_overwrites() {
        use std::sync::{Arc, Barrier};
        use std::thread;

        for _ in 0..50 {
            let tmp = tempfile::tempdir().unwrap();
            let store = Arc::new(DownloadsDir::new(tmp.path()));
            let barrier = Arc::new(Barrier::new(2));
            let workers: Vec<_> = [b"first".as_slice(), b"second".as_slice()]
                .into_iter()
                .map(|body| {
                    let store = store.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        let mut h = store.insert_pending("a.txt", "text/plain", 0).unwrap();
                        store.write(&mut h, body).unwrap();
                        barrier.wait();
                        store.finalize(h).map_err(|(_, e)| e).unwrap()
                    })
                })
                .collect();
            let mut saved: Vec<DownloadRef> =
                workers.into_iter().map(|w| w.join().unwrap()).collect();
            saved.sort_by(|a, b| a.display_name.cmp(&b.display_name));

            assert_ne!(saved[0].location, saved[1].location);
            assert_eq!(store.visible_names().unwrap(), vec!["a (1).txt", "a.txt"]);
            let mut bodies: Vec<Vec<u8>> = saved.iter().map(|r| fs::read(&r.location).unwrap()).collect();
            bodies.sort();
            assert_eq!(bodies, vec![b"first".to_vec(), b"second".to_vec()]);
            assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 2);
        }
    }

    #[test]
    fn finalize_skips_existing_visible_file() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("notes.txt"), b"keep me").unwrap();
        let store = DownloadsDir::new(tmp.path());
        let mut h = store.insert_pending("notes.txt", "text/plain", 3).unwrap();
        store.write(&mut h, b"new").unwrap();
        let r = store.finalize(h).map_err(|(_, e)| e).unwrap();
        assert_eq!(r.display_name, "notes (1).txt");
        assert_eq!(fs::read(tmp.path().join("notes.txt")).unwrap(), b"keep me");
    }

    #[test]
    fn delete_removes_pending() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DownloadsDir::new(tmp.path());
        let h = store.insert_pending("x.bin", "", 0).unwrap();
        let pending = h.path().to_path_buf();
        store.delete(h).unwrap();
        assert!(!pending.exists());
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn failed_commit_leaves_no_record() {
        let tmp = tempfile::tempdir().unwrap();
        let downloads = tmp.path().join("Downloads");
        let committer = DownloadCommitter::new(DownloadsDir::new(&downloads));
        let missing = tmp.path().join("gone.bin");
        assert!(committer
            .commit("gone.bin", &missing, "application/octet-stream", 10)
            .is_err());
        assert_eq!(fs::read_dir(&downloads).unwrap().count(), 0);
    }

    #[test]
    fn commit_into_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("scratch.txt");
        fs::write(&src, b"hello wormhole").unwrap();
        let committer = DownloadCommitter::new(DownloadsDir::new(tmp.path().join("dl")));
        let r = committer.commit("notes.txt", &src, "text/plain", 14).unwrap();
        assert_eq!(fs::read(&r.location).unwrap(), b"hello wormhole");
        assert_eq!(committer.store().visible_names().unwrap(), vec!["notes.txt"]);
    }

    #[test]
    fn sanitize() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\x\\doc.txt"), "doc.txt");
        assert_eq!(sanitize_file_name(".bashrc"), "bashrc");
        assert_eq!(sanitize_file_name("..."), "download");
        assert_eq!(sanitize_file_name(""), "download");
        assert_eq!(sanitize_file_name("photo 1.jpg"), "photo 1.jpg");
    }
}
