//! Positional per-item artifacts for one job, plus atomic file replacement.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One directory per job, one file per `sequence_index`.
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn open(download_dir: &Path, job_id: &str) -> io::Result<Self> {
        let root = download_dir.join(job_id);
        fs::create_dir_all(&root)?;
        Ok(ArtifactStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn item_path(&self, sequence_index: usize) -> PathBuf {
        self.root.join(format!("{:05}.txt", sequence_index))
    }

    pub fn has(&self, sequence_index: usize) -> bool {
        self.item_path(sequence_index).is_file()
    }

    pub fn write(&self, sequence_index: usize, content: &str) -> io::Result<()> {
        write_atomic(&self.item_path(sequence_index), content.as_bytes())
    }

    /// `Ok(None)` when nothing has been stored for the index yet.
    pub fn read(&self, sequence_index: usize) -> io::Result<Option<String>> {
        match fs::read_to_string(self.item_path(sequence_index)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn remove_all(&self) -> io::Result<()> {
        fs::remove_dir_all(&self.root)
    }
}

/// Create-or-replace: readers see either the old file or the complete new one.
/// Every call writes its own temp file, so concurrent writers to one path
/// never share a half-written file; the last rename wins.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".{}.part", Uuid::new_v4().simple()));
    let tmp = PathBuf::from(tmp);

    let written = fs::File::create(&tmp).and_then(|mut f| {
        f.write_all(bytes)?;
        f.sync_all()
    });
    match written.and_then(|()| fs::rename(&tmp, path)) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}

/// Strips characters that are illegal in file names on common platforms.
pub fn sanitize_filename(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| !matches!(c, '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|') && !c.is_control())
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "Unknown_Novel".to_string()
    } else {
        cleaned.to_string()
    }
}
