//! Slash-separated virtual path helpers shared by the backends and the
//! subtree view. Paths handled here are always absolute after `resolve`.

/// Resolve `name` against the working directory `cwd` and clean the result.
pub fn resolve(cwd: &str, name: &str) -> String {
    if name.starts_with('/') {
        clean(name)
    } else {
        clean(&format!("{}/{}", cwd, name))
    }
}

/// Lexically clean an absolute path: collapse repeated separators, drop `.`
/// elements and apply `..` (which stops at the root).
pub fn clean(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

/// Non-empty elements of a cleaned absolute path.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|p| !p.is_empty())
}

/// Split a cleaned absolute path into its parent directory and base name.
pub fn split(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(i) => (&path[..i], &path[i + 1..]),
        None => (".", path),
    }
}

/// Last element of `path`, or `/` for the root.
pub fn base(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/";
    }
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Join a view-relative name onto a directory. `.` names the directory itself.
pub fn join(dir: &str, name: &str) -> String {
    if name == "." {
        dir.to_string()
    } else if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Names accepted by a subtree view: unrooted, slash separated, with no empty,
/// `.` or `..` elements. The lone name `.` is the view root.
pub fn valid_view_path(name: &str) -> bool {
    if name == "." {
        return true;
    }
    !name.is_empty()
        && name
            .split('/')
            .all(|elem| !elem.is_empty() && elem != "." && elem != "..")
}
