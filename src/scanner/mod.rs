use std::path::Path;
use crate::Result;

pub mod local;

pub use local::LocalScanner;

/// One file or directory below a scan root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Relative path (using / as separator)
    pub path: String,
    /// File size (bytes)
    pub size: u64,
    pub is_dir: bool,
}

/// Everything found below one root, parents before children
#[derive(Debug, Clone)]
pub struct Manifest {
    pub root_path: String,
    pub entries: Vec<FileEntry>,
}

impl Manifest {
    pub fn files(&self) -> impl Iterator<Item = &FileEntry> {
        self.entries.iter().filter(|e| !e.is_dir)
    }

    pub fn total_bytes(&self) -> u64 {
        self.files().map(|e| e.size).sum()
    }
}

pub trait Scanner {
    fn scan(&mut self, path: &Path) -> Result<Manifest>;
}
