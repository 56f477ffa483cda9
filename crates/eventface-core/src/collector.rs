//! Reference image discovery inside a person folder.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default extensions accepted as reference images. Every entry must be
/// decodable by the upload preprocessing, so HEIC is not listed.
pub const DEFAULT_FORMATS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

/// Lists the usable reference images directly inside a folder.
#[derive(Debug, Clone)]
pub struct ReferenceCollector {
    /// Lowercase extensions without the leading dot.
    formats: HashSet<String>,
}

impl Default for ReferenceCollector {
    fn default() -> Self {
        Self::new(DEFAULT_FORMATS)
    }
}

impl ReferenceCollector {
    /// Extensions are matched case-insensitively; a leading `.` is ignored.
    pub fn new<I, S>(formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            formats: formats
                .into_iter()
                .map(|f| f.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .filter(|f| !f.is_empty())
                .collect(),
        }
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.formats.contains(&ext.to_ascii_lowercase()))
    }

    /// Return at most `max_refs` reference images from `folder`.
    ///
    /// Only direct children are considered: regular files (symlinks are
    /// skipped, not followed) with an allowed extension. Raw directory order
    /// is filesystem-dependent, so entries are sorted by file name before
    /// truncation to make the chosen subset reproducible.
    pub fn collect(&self, folder: &Path, max_refs: usize) -> io::Result<Vec<PathBuf>> {
        let mut images = Vec::new();

        for entry in fs::read_dir(folder)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(folder = %folder.display(), error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            // DirEntry::file_type does not follow symlinks.
            let is_regular = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            let path = entry.path();
            if is_regular && self.is_supported(&path) {
                images.push(path);
            }
        }

        images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        let found = images.len();
        images.truncate(max_refs);

        tracing::debug!(
            folder = %folder.display(),
            found,
            used = images.len(),
            max_refs,
            "collected reference images"
        );

        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_filters_by_extension() {
        let tmp = TempDir::new().unwrap();
        for name in ["photo1.jpg", "photo2.png", "document.txt", "video.mp4"] {
            fs::write(tmp.path().join(name), b"x").unwrap();
        }
        let images = ReferenceCollector::default().collect(tmp.path(), 20).unwrap();
        assert_eq!(names(&images), vec!["photo1.jpg", "photo2.png"]);
    }

    #[test]
    fn test_extension_match_is_case_insensitive() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("IMG_0001.JPG"), b"x").unwrap();
        fs::write(tmp.path().join("scan.Png"), b"x").unwrap();
        let collector = ReferenceCollector::new([".JPG", "png"]);
        let images = collector.collect(tmp.path(), 20).unwrap();
        assert_eq!(images.len(), 2);
    }

    #[test]
    fn test_ignores_subdirectories() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("photo1.jpg"), b"x").unwrap();
        let sub = tmp.path().join("subfolder");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("photo2.jpg"), b"x").unwrap();
        // A directory whose name looks like an image is still not a file.
        fs::create_dir(tmp.path().join("album.jpg")).unwrap();

        let images = ReferenceCollector::default().collect(tmp.path(), 20).unwrap();
        assert_eq!(names(&images), vec!["photo1.jpg"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_skips_symlinks() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("real.jpg");
        fs::write(&target, b"x").unwrap();
        let folder = tmp.path().join("refs");
        fs::create_dir(&folder).unwrap();
        std::os::unix::fs::symlink(&target, folder.join("link.jpg")).unwrap();

        let images = ReferenceCollector::default().collect(&folder, 20).unwrap();
        assert!(images.is_empty());
    }

    #[test]
    fn test_limits_reference_count() {
        let tmp = TempDir::new().unwrap();
        for i in 0..10 {
            fs::write(tmp.path().join(format!("photo{i}.jpg")), b"x").unwrap();
        }
        let images = ReferenceCollector::default().collect(tmp.path(), 5).unwrap();
        assert_eq!(
            names(&images),
            vec!["photo0.jpg", "photo1.jpg", "photo2.jpg", "photo3.jpg", "photo4.jpg"]
        );
    }

    #[test]
    fn test_empty_folder_is_not_an_error() {
        let tmp = TempDir::new().unwrap();
        let images = ReferenceCollector::default().collect(tmp.path(), 5).unwrap();
        assert!(images.is_empty());
    }

    #[test]
    fn test_missing_folder_is_an_error() {
        let tmp = TempDir::new().unwrap();
        assert!(ReferenceCollector::default()
            .collect(&tmp.path().join("missing"), 5)
            .is_err());
    }

    #[test]
    fn test_file_without_extension_is_skipped() {
        let collector = ReferenceCollector::default();
        assert!(!collector.is_supported(Path::new("refs/README")));
        assert!(collector.is_supported(Path::new("refs/face.WEBP")));
    }

    #[test]
    fn test_heic_is_not_collected_by_default() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.jpg"), b"x").unwrap();
        fs::write(tmp.path().join("b.heic"), b"x").unwrap();
        let refs = ReferenceCollector::default().collect(tmp.path(), 10).unwrap();
        assert_eq!(refs, vec![tmp.path().join("a.jpg")]);
    }
}
