//! Purpose: Local origin-directory and origin-name path resolution helpers.
//! Exports: `default_origin_dir` and `resolve_named_origin_path`.
//! Role: Keep every CLI command's origin naming aligned from one source.
//! Invariants: Default origin directory remains `~/.portstash/origins`.
//! Invariants: Named origins must not contain path separators.

use std::path::{Path, PathBuf};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OriginNameResolveError {
    Empty,
    ContainsPathSeparator,
}

pub(crate) fn default_origin_dir() -> PathBuf {
    let home = std::env::var_os("HOME").unwrap_or_default();
    PathBuf::from(home).join(".portstash").join("origins")
}

pub(crate) fn resolve_named_origin_path(
    name: &str,
    origin_dir: &Path,
) -> Result<PathBuf, OriginNameResolveError> {
    if name.is_empty() {
        return Err(OriginNameResolveError::Empty);
    }
    if name.contains('/') || name.contains('\\') {
        return Err(OriginNameResolveError::ContainsPathSeparator);
    }
    if name.ends_with(".json") {
        return Ok(origin_dir.join(name));
    }
    Ok(origin_dir.join(format!("{name}.json")))
}

#[cfg(test)]
mod tests {
    use super::{OriginNameResolveError, resolve_named_origin_path};
    use std::path::{Path, PathBuf};

    #[test]
    fn name_gains_json_extension() {
        let path = resolve_named_origin_path("app", Path::new("/tmp/origins")).expect("path");
        assert_eq!(path, PathBuf::from("/tmp/origins/app.json"));
    }

    #[test]
    fn name_keeps_existing_extension() {
        let path = resolve_named_origin_path("app.json", Path::new("/tmp/origins")).expect("path");
        assert_eq!(path, PathBuf::from("/tmp/origins/app.json"));
    }

    #[test]
    fn separators_and_empty_names_are_rejected() {
        let dir = Path::new("/tmp/origins");
        assert_eq!(
            resolve_named_origin_path("a/b", dir),
            Err(OriginNameResolveError::ContainsPathSeparator)
        );
        assert_eq!(
            resolve_named_origin_path("", dir),
            Err(OriginNameResolveError::Empty)
        );
    }
}
