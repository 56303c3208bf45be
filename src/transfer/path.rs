//! `/`-separated path helpers shared by both backends.

/// Drop trailing separators, keeping a lone `/`.
pub fn trim_end(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/"
    } else {
        trimmed
    }
}

pub fn join(base: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if name.is_empty() {
        return trim_end(base).to_string();
    }
    if base.is_empty() {
        return name.to_string();
    }
    let base = trim_end(base);
    if base.ends_with('/') {
        format!("{}{}", base, name)
    } else {
        format!("{}/{}", base, name)
    }
}

pub fn base_name(path: &str) -> &str {
    let path = trim_end(path);
    match path.rfind('/') {
        Some(pos) if path.len() > 1 => &path[pos + 1..],
        _ => path,
    }
}

pub fn parent(path: &str) -> &str {
    let path = trim_end(path);
    match path.rfind('/') {
        Some(0) => "/",
        Some(pos) => &path[..pos],
        None => ".",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_handles_separators() {
        assert_eq!(join("/root", "a.txt"), "/root/a.txt");
        assert_eq!(join("/root/", "a.txt"), "/root/a.txt");
        assert_eq!(join("/", "a.txt"), "/a.txt");
        assert_eq!(join("dst", ""), "dst");
        assert_eq!(join("", "sub/a.txt"), "sub/a.txt");
    }

    #[test]
    fn base_name_and_parent() {
        assert_eq!(base_name("/root/example.txt"), "example.txt");
        assert_eq!(base_name("src/dir/"), "dir");
        assert_eq!(base_name("plain"), "plain");
        assert_eq!(parent("/root/example.txt"), "/root");
        assert_eq!(parent("/example.txt"), "/");
        assert_eq!(parent("example.txt"), ".");
        assert_eq!(parent("dst/renamed.txt"), "dst");
    }
}
