//! Utility functions for chorano

/// Longest accepted namespace path
const MAX_PATH_LEN: usize = 1024;

/// Validate a namespace path (absolute, no empty segments, no trailing slash)
pub fn validate_path(path: &str) -> crate::Result<()> {
    if path == "/" {
        return Ok(());
    }

    if !path.starts_with('/') {
        return Err(crate::Error::InvalidPath(format!(
            "{} (must be absolute)",
            path
        )));
    }

    if path.len() > MAX_PATH_LEN {
        return Err(crate::Error::InvalidPath(format!(
            "path too long (max {} bytes)",
            MAX_PATH_LEN
        )));
    }

    if path[1..].split('/').any(|segment| segment.is_empty()) {
        return Err(crate::Error::InvalidPath(format!(
            "{} (empty segment)",
            path
        )));
    }

    if path.chars().any(|c| c.is_control()) {
        return Err(crate::Error::InvalidPath(format!(
            "{:?} (contains invalid characters)",
            path
        )));
    }

    Ok(())
}

/// Join a child name onto a parent path
pub fn join_path(parent: &str, child: &str) -> String {
    if parent == "/" {
        format!("/{}", child)
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Parent of a path; `None` for the root itself
pub fn parent_path(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of a path
pub fn node_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Is `path` a direct child of `parent`?
pub fn is_child_of(path: &str, parent: &str) -> bool {
    parent_path(path) == Some(parent)
}
