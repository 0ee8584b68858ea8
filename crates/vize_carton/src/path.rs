//! Module id and path helpers.
//!
//! Bundlers hand plugins ids that may carry a query string and, on Windows,
//! backslash separators. Everything keyed by filename goes through
//! [`normalize_path`] first so that one file never owns two cache entries.

/// Strip the query string from a module id.
#[inline]
pub fn clean_id(id: &str) -> &str {
    match id.find('?') {
        Some(pos) => &id[..pos],
        None => id,
    }
}

/// Normalize a filesystem path into the forward-slash form used as a cache key.
///
/// Collapses `.` segments, resolves `..` against preceding segments and
/// removes duplicate separators. A leading separator (or drive prefix) is kept.
pub fn normalize_path(path: &str) -> String {
    let slashed = path.replace('\\', "/");
    let absolute = slashed.starts_with('/');

    let mut segments: Vec<&str> = Vec::new();
    for segment in slashed.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(segments.last(), Some(last) if *last != "..") {
                    segments.pop();
                } else if !absolute {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Express `path` relative to `root`, both normalized.
///
/// Returns the normalized `path` unchanged when it does not live under `root`.
pub fn relative_to(path: &str, root: &str) -> String {
    let path = normalize_path(path);
    let root = normalize_path(root);
    if root.is_empty() || root == "/" {
        return path.trim_start_matches('/').to_string();
    }

    match path.strip_prefix(&root) {
        Some(rest) if rest.is_empty() => String::new(),
        Some(rest) if rest.starts_with('/') => rest[1..].to_string(),
        _ => path,
    }
}
