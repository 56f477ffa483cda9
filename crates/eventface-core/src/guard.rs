//! Allow-list check for user-supplied folders.
//!
//! Every folder handed to the pipeline is resolved (absolute, symlinks
//! followed) and must sit at or below one of the administrator-configured
//! roots. The check runs before the folder is listed or read.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PathError {
    #[error("path {0} is not under allowed directories")]
    NotAllowed(PathBuf),
    #[error("folder not found: {0}")]
    NotFound(PathBuf),
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("failed to resolve {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Validates folders against a fixed set of allowed root directories.
#[derive(Debug, Clone)]
pub struct PathGuard {
    allowed: Vec<PathBuf>,
}

impl PathGuard {
    /// An empty allow-list rejects every path.
    pub fn new<I, P>(allowed: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allowed(&self) -> &[PathBuf] {
        &self.allowed
    }

    /// Resolve `path` and return it if it is an existing directory inside an allowed root.
    ///
    /// The allow-list decision is made on the resolved path before anything
    /// else is inspected, so callers learn nothing about paths outside the roots.
    pub fn validate(&self, path: &Path) -> Result<PathBuf, PathError> {
        let resolved = resolve(path)?;

        if !self.allows(&resolved) {
            tracing::warn!(
                path = %path.display(),
                resolved = %resolved.display(),
                "rejected path outside allowed directories"
            );
            return Err(PathError::NotAllowed(path.to_path_buf()));
        }

        match fs::metadata(&resolved) {
            Ok(meta) if meta.is_dir() => Ok(resolved),
            Ok(_) => Err(PathError::NotADirectory(resolved)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(PathError::NotFound(resolved)),
            Err(source) => Err(PathError::Io {
                path: resolved,
                source,
            }),
        }
    }

    fn allows(&self, resolved: &Path) -> bool {
        self.allowed.iter().any(|root| match resolve(root) {
            Ok(root) => resolved.starts_with(&root),
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "skipping unresolvable allowed directory");
                false
            }
        })
    }
}

/// Absolute, symlink-normalized form of `path`.
///
/// The deepest ancestor that canonicalizes is used as the base; the
/// components below it are appended lexically. Canonicalization errors are
/// never reported here: a path through a file or an unreadable directory
/// must still reach the allow-list check rather than leak what exists.
fn resolve(path: &Path) -> Result<PathBuf, PathError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|source| PathError::Io {
                path: path.to_path_buf(),
                source,
            })?
            .join(path)
    };

    let components: Vec<Component> = absolute.components().collect();
    for split in (1..=components.len()).rev() {
        let prefix: PathBuf = components[..split].iter().collect();
        match fs::canonicalize(&prefix) {
            Ok(base) => return Ok(append_lexically(base, &components[split..])),
            Err(_) => continue,
        }
    }

    Ok(append_lexically(PathBuf::new(), &components))
}

fn append_lexically(mut base: PathBuf, rest: &[Component]) -> PathBuf {
    for component in rest {
        match component {
            Component::ParentDir => {
                base.pop();
            }
            Component::CurDir => {}
            other => base.push(other.as_os_str()),
        }
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let allowed = tmp.path().join("refs");
        let outside = tmp.path().join("private");
        fs::create_dir_all(allowed.join("Jane_Doe")).unwrap();
        fs::create_dir_all(&outside).unwrap();
        (tmp, allowed, outside)
    }

    #[test]
    fn test_accepts_nested_folder() {
        let (_tmp, allowed, _) = setup();
        let guard = PathGuard::new([allowed.clone()]);
        let resolved = guard.validate(&allowed.join("Jane_Doe")).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("refs/Jane_Doe"));
    }

    #[test]
    fn test_accepts_root_itself() {
        let (_tmp, allowed, _) = setup();
        let guard = PathGuard::new([allowed.clone()]);
        assert!(guard.validate(&allowed).is_ok());
    }

    #[test]
    fn test_rejects_folder_outside_roots() {
        let (_tmp, allowed, outside) = setup();
        let guard = PathGuard::new([allowed]);
        let err = guard.validate(&outside).unwrap_err();
        assert!(matches!(err, PathError::NotAllowed(_)));
        assert!(err.to_string().contains("not under allowed directories"));
    }

    #[test]
    fn test_rejects_parent_traversal() {
        let (_tmp, allowed, _) = setup();
        let guard = PathGuard::new([allowed.clone()]);
        let sneaky = allowed.join("Jane_Doe").join("..").join("..").join("private");
        assert!(matches!(guard.validate(&sneaky), Err(PathError::NotAllowed(_))));
    }

    #[test]
    fn test_rejects_sibling_with_shared_prefix() {
        let (tmp, allowed, _) = setup();
        let sibling = tmp.path().join("refs2");
        fs::create_dir_all(&sibling).unwrap();
        let guard = PathGuard::new([allowed]);
        assert!(matches!(guard.validate(&sibling), Err(PathError::NotAllowed(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_symlink_escaping_root() {
        let (_tmp, allowed, outside) = setup();
        let link = allowed.join("escape");
        std::os::unix::fs::symlink(&outside, &link).unwrap();
        let guard = PathGuard::new([allowed]);
        assert!(matches!(guard.validate(&link), Err(PathError::NotAllowed(_))));
    }

    #[test]
    fn test_missing_folder_inside_root_is_not_found() {
        let (_tmp, allowed, _) = setup();
        let guard = PathGuard::new([allowed.clone()]);
        let err = guard.validate(&allowed.join("Nobody")).unwrap_err();
        assert!(matches!(err, PathError::NotFound(_)));
    }

    #[test]
    fn test_missing_folder_outside_root_is_not_allowed() {
        let (_tmp, allowed, outside) = setup();
        let guard = PathGuard::new([allowed]);
        let err = guard.validate(&outside.join("ghost")).unwrap_err();
        assert!(matches!(err, PathError::NotAllowed(_)));
    }

    #[test]
    fn test_path_through_outside_file_is_not_allowed() {
        let (_tmp, allowed, outside) = setup();
        fs::write(outside.join("secret.txt"), b"x").unwrap();
        let guard = PathGuard::new([allowed]);

        let existing = guard.validate(&outside.join("secret.txt").join("x")).unwrap_err();
        let absent = guard.validate(&outside.join("nothing.txt").join("x")).unwrap_err();
        assert!(matches!(existing, PathError::NotAllowed(_)));
        assert!(matches!(absent, PathError::NotAllowed(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_outside_folder_is_not_allowed() {
        use std::os::unix::fs::PermissionsExt;

        let (_tmp, allowed, outside) = setup();
        let locked = outside.join("locked");
        fs::create_dir_all(locked.join("inner")).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        let guard = PathGuard::new([allowed]);
        let result = guard.validate(&locked.join("inner"));
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        assert!(matches!(result, Err(PathError::NotAllowed(_))));
    }

    #[test]
    fn test_path_through_file_inside_root_is_still_checked() {
        let (_tmp, allowed, _) = setup();
        fs::write(allowed.join("notes.txt"), b"x").unwrap();
        let guard = PathGuard::new([allowed.clone()]);
        let err = guard.validate(&allowed.join("notes.txt").join("x")).unwrap_err();
        assert!(!matches!(err, PathError::NotAllowed(_)));
    }

    #[test]
    fn test_file_is_not_a_directory() {
        let (_tmp, allowed, _) = setup();
        let file = allowed.join("notes.txt");
        fs::write(&file, b"x").unwrap();
        let guard = PathGuard::new([allowed]);
        assert!(matches!(guard.validate(&file), Err(PathError::NotADirectory(_))));
    }

    #[test]
    fn test_empty_allow_list_rejects_everything() {
        let (_tmp, allowed, _) = setup();
        let guard = PathGuard::new(Vec::<PathBuf>::new());
        assert!(matches!(guard.validate(&allowed), Err(PathError::NotAllowed(_))));
    }

    #[test]
    fn test_append_lexically_handles_dots() {
        let base = PathBuf::from("/a/b");
        let rest: Vec<Component> = Path::new("c/./../d").components().collect();
        assert_eq!(append_lexically(base, &rest), PathBuf::from("/a/b/d"));
    }
}
