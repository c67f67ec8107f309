//! Path and time utility functions / 路径与时间工具函数
//!
//! All index paths are POSIX-style regardless of the host platform; backslashes
//! from network-drive sources are normalized to forward slashes.

use chrono::Utc;

/// Join a POSIX-style path segment onto a base / 拼接 POSIX 路径
pub fn join_path(base: &str, name: &str) -> String {
    let name = name.trim_matches('/');
    if base.is_empty() || base == "/" {
        return format!("/{}", name);
    }
    if name.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), name)
}

/// Normalize separators and strip trailing slash / 规范化分隔符
pub fn normalize_slashes(p: &str) -> String {
    let p = p.replace('\\', "/");
    if p.len() > 1 {
        p.trim_end_matches('/').to_string()
    } else {
        p
    }
}

/// Last path segment / 最后一段路径
pub fn path_basename(p: &str) -> &str {
    let p = p.trim_end_matches('/');
    p.rsplit('/').next().unwrap_or(p)
}

/// Parent path (POSIX), "/" for top-level entries / 父路径
pub fn path_parent(p: &str) -> &str {
    let p = p.trim_end_matches('/');
    match p.rfind('/') {
        Some(0) => "/",
        Some(i) => &p[..i],
        None => "",
    }
}

/// Generation timestamp for index documents / 索引文档时间戳
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "a"), "/a");
        assert_eq!(join_path("/", "a"), "/a");
        assert_eq!(join_path("/a", "b"), "/a/b");
        assert_eq!(join_path("/a/", "b/"), "/a/b");
        assert_eq!(join_path("/a", ""), "/a");
    }

    #[test]
    fn test_path_basename() {
        assert_eq!(path_basename("/a/b/c"), "c");
        assert_eq!(path_basename("/a/b/c/"), "c");
        assert_eq!(path_basename("c"), "c");
    }

    #[test]
    fn test_path_parent() {
        assert_eq!(path_parent("/a/b/c"), "/a/b");
        assert_eq!(path_parent("/a"), "/");
        assert_eq!(path_parent("a"), "");
    }

    #[test]
    fn test_normalize_slashes() {
        assert_eq!(normalize_slashes("\\scan\\A\\"), "/scan/A");
        assert_eq!(normalize_slashes("/scan/A/"), "/scan/A");
        assert_eq!(normalize_slashes("/"), "/");
    }
}
