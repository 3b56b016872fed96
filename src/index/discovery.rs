//! Filesystem discovery of specification files

use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::DiscoveryConfig;

/// A candidate specification file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    /// Position of the scan root it was found under (later roots override earlier ones)
    pub root_rank: usize,
}

/// Walk every root in order, returning matching files sorted by path within each root
///
/// Hidden files and directories below a root are skipped. A missing root is
/// not an error; it simply contributes nothing.
pub fn discover_files(roots: &[PathBuf], config: &DiscoveryConfig) -> Vec<DiscoveredFile> {
    debug!(?roots, "discover_files: called");
    let mut found = Vec::new();

    for (rank, root) in roots.iter().enumerate() {
        if !root.is_dir() {
            debug!(?root, "discover_files: root does not exist, skipping");
            continue;
        }

        let root_for_filter = root.clone();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |e| {
                if e.path() == root_for_filter {
                    return true;
                }
                e.file_name().to_str().map(|s| !s.starts_with('.')).unwrap_or(true)
            });

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "discover_files: unreadable entry skipped");
                    continue;
                }
            };
            if entry.file_type().is_file() && config.matches_extension(entry.path()) {
                found.push(DiscoveredFile {
                    path: entry.path().to_path_buf(),
                    root_rank: rank,
                });
            }
        }
    }

    debug!(count = found.len(), "discover_files: complete");
    found
}

/// Rank of the most specific root containing `path`; unknown paths rank last
pub fn root_rank(roots: &[PathBuf], path: &Path) -> usize {
    roots.iter().rposition(|r| path.starts_with(r)).unwrap_or(roots.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_discover_in_root_order() {
        let global = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        fs::create_dir_all(global.path().join("nested")).unwrap();
        fs::write(global.path().join("b.yml"), "").unwrap();
        fs::write(global.path().join("nested/a.yaml"), "").unwrap();
        fs::write(global.path().join("notes.md"), "").unwrap();
        fs::create_dir_all(project.path().join(".hidden")).unwrap();
        fs::write(project.path().join(".hidden/x.yml"), "").unwrap();
        fs::write(project.path().join("c.yml"), "").unwrap();

        let roots = vec![global.path().to_path_buf(), project.path().to_path_buf()];
        let files = discover_files(&roots, &DiscoveryConfig::default());
        let names: Vec<(String, usize)> = files
            .iter()
            .map(|f| (f.path.file_name().unwrap().to_string_lossy().into_owned(), f.root_rank))
            .collect();
        assert_eq!(
            names,
            vec![("b.yml".to_string(), 0), ("a.yaml".to_string(), 0), ("c.yml".to_string(), 1)]
        );
    }

    #[test]
    fn test_missing_root_is_skipped() {
        let files = discover_files(&[PathBuf::from("/nonexistent/promptd-specs")], &DiscoveryConfig::default());
        assert!(files.is_empty());
    }

    #[test]
    fn test_root_rank() {
        let roots = vec![PathBuf::from("/a"), PathBuf::from("/a/b")];
        assert_eq!(root_rank(&roots, Path::new("/a/b/x.yml")), 1);
        assert_eq!(root_rank(&roots, Path::new("/a/x.yml")), 0);
        assert_eq!(root_rank(&roots, Path::new("/c/x.yml")), 2);
    }
}
