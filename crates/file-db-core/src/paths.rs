//! Path text helpers. The catalog stores full directory paths as UTF-8 text.

use std::fs;
use std::io;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

/// Normalized catalog text for `path`, or `None` when it is not valid UTF-8.
pub fn path_to_string(path: &Path) -> Option<String> {
    let normalized: PathBuf = path.components().collect();
    normalized.to_str().map(str::to_string)
}

/// Absolute form of `path` with symlinks resolved. A path that does not exist
/// yet is only made absolute against the current directory.
pub fn resolve_path(path: &Path) -> io::Result<PathBuf> {
    match fs::canonicalize(path) {
        Ok(resolved) => Ok(resolved),
        Err(err) if err.kind() == io::ErrorKind::NotFound => std::path::absolute(path),
        Err(err) => Err(err),
    }
}

pub fn join(dir_path: &str, name: &str) -> String {
    Path::new(dir_path).join(name).to_string_lossy().into_owned()
}

pub fn parent_path(dir_path: &str) -> Option<String> {
    Path::new(dir_path)
        .parent()
        .and_then(|parent| parent.to_str())
        .filter(|parent| !parent.is_empty())
        .map(str::to_string)
}

/// Text every descendant path of `dir_path` starts with.
pub fn descendant_prefix(dir_path: &str) -> String {
    if dir_path.ends_with(MAIN_SEPARATOR) {
        dir_path.to_string()
    } else {
        format!("{}{}", dir_path, MAIN_SEPARATOR)
    }
}

/// Splits a file path into (directory text, file name).
pub fn split_file_path(path: &Path) -> Option<(String, String)> {
    let name = path.file_name()?.to_str()?.to_string();
    let dir = path_to_string(path.parent()?)?;
    if dir.is_empty() {
        return None;
    }
    Some((dir, name))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_separator_removed() {
        assert_eq!(path_to_string(Path::new("/a/b/")), Some("/a/b".to_string()));
        assert_eq!(path_to_string(Path::new("/")), Some("/".to_string()));
    }

    #[test]
    fn test_resolve_follows_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let real = fs::canonicalize(dir.path()).unwrap().join("real");
        fs::create_dir(&real).unwrap();
        let alias = dir.path().join("alias");
        std::os::unix::fs::symlink(&real, &alias).unwrap();

        assert_eq!(resolve_path(&alias).unwrap(), real);
        assert_eq!(resolve_path(&alias.join(".")).unwrap(), real);
    }

    #[test]
    fn test_resolve_missing_path_is_absolute() {
        let resolved = resolve_path(Path::new("not-there/yet")).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("not-there/yet"));
    }

    #[test]
    fn test_parent_of_root_is_none() {
        assert_eq!(parent_path("/a/b"), Some("/a".to_string()));
        assert_eq!(parent_path("/"), None);
    }

    #[test]
    fn test_descendant_prefix_does_not_match_siblings() {
        let prefix = descendant_prefix("/data");
        assert!("/data/x".starts_with(&prefix));
        assert!(!"/data2/x".starts_with(&prefix));
        assert_eq!(descendant_prefix("/"), "/");
    }

    #[test]
    fn test_split_file_path() {
        assert_eq!(
            split_file_path(Path::new("/a/b/f1.txt")),
            Some(("/a/b".to_string(), "f1.txt".to_string()))
        );
        assert_eq!(split_file_path(Path::new("f1.txt")), None);
    }
}
