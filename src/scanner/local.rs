use crate::scanner::{FileEntry, Manifest, Scanner};
use crate::{DeltaBoxError, Result};
use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use std::path::Path;

pub struct LocalScanner {
    excludes: Vec<String>,
}

impl LocalScanner {
    pub fn new(excludes: Vec<String>) -> Self {
        Self { excludes }
    }
}

impl Scanner for LocalScanner {
    fn scan(&mut self, path: &Path) -> Result<Manifest> {
        let root = path.canonicalize()?;

        let mut builder = WalkBuilder::new(&root);
        builder.hidden(false);
        builder.git_ignore(true);
        // symlinks are not followed
        builder.follow_links(false);
        builder.sort_by_file_path(|a, b| a.cmp(b));

        if !self.excludes.is_empty() {
            let mut overrides = OverrideBuilder::new(&root);
            for pattern in &self.excludes {
                // "!" turns an override glob into an ignore rule
                overrides
                    .add(&format!("!{}", pattern))
                    .map_err(|e| DeltaBoxError::Config(format!("bad exclude {:?}: {}", pattern, e)))?;
            }
            builder.overrides(overrides.build()?);
        }

        let mut entries = Vec::new();
        for result in builder.build() {
            let entry = match result {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!("Scan error: {}", err);
                    continue;
                }
            };

            let p = entry.path();
            let relative_path = match p.strip_prefix(&root) {
                Ok(rp) if !rp.as_os_str().is_empty() => rp,
                _ => continue,
            };

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!("Failed to get metadata for {:?}: {}", p, e);
                    continue;
                }
            };
            if !metadata.is_dir() && !metadata.is_file() {
                continue;
            }

            entries.push(FileEntry {
                path: relative_path.to_string_lossy().replace('\\', "/"),
                size: if metadata.is_dir() { 0 } else { metadata.len() },
                is_dir: metadata.is_dir(),
            });
        }

        Ok(Manifest {
            root_path: root.to_string_lossy().to_string(),
            entries,
        })
    }
}
