//! Helpers for the relative object paths used as cache keys.
//!
//! Pipeline paths are relative to the mount point and use `/` separators with
//! no leading slash: `"a/b/c"`. The empty string is the mount root. Directory
//! paths may arrive with a trailing separator from the kernel binding; every
//! cache key is normalized with [`trim_dir`] first.

/// Strips trailing `/` separators. The root path stays `""`.
#[must_use]
pub fn trim_dir(path: &str) -> &str {
    path.trim_end_matches('/')
}

/// Returns the parent directory of `path`, or `""` for top-level entries and
/// the root itself.
#[must_use]
pub fn parent_dir(path: &str) -> &str {
    let path = trim_dir(path);
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Returns the final path component.
#[must_use]
pub fn base_name(path: &str) -> &str {
    let path = trim_dir(path);
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Joins a parent path and a base name.
#[must_use]
pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_owned()
    } else {
        format!("{parent}/{name}")
    }
}
