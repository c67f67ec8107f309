//! Pattern matching and scan-path decomposition / 匹配与扫描路径解析
//!
//! Scan paths are laid out `.../class*/wafer/lot/film/date`; the date leaf is
//! an 8-digit or `YYYY-MM-DD`-like folder name. Lot matching has an extra
//! normalization layer so split-lot suffixes (`RGBT017_10`) still match their
//! base lot pattern (`RGBT017`).

use crate::utils::path_basename;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

/// Date leaf pattern: `20240101` or `2024-01-01` / `2024_01_01`
pub static DATE_RX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{8}$|^\d{4}[_-]\d{2}[_-]\d{2}$").expect("date regex"));

/// Whether a folder name is a date leaf / 是否为日期叶目录
pub fn is_date_name(name: &str) -> bool {
    DATE_RX.is_match(name)
}

/// Collapse whitespace runs and trim / 压缩空白并去首尾
pub fn normalize_spaces(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn fold_case(s: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        s.to_string()
    } else {
        s.to_lowercase()
    }
}

/// Compile a filter pattern; case-insensitivity goes through the builder, not
/// pattern mangling.
fn compile_pattern(p: &str, case_sensitive: bool) -> Result<Regex, regex::Error> {
    RegexBuilder::new(p).case_insensitive(!case_sensitive).build()
}

/// Return the patterns that do not compile / 返回无法编译的模式
pub fn validate_regex_patterns(patterns: &[String], case_sensitive: bool) -> Vec<String> {
    patterns
        .iter()
        .filter(|p| compile_pattern(p, case_sensitive).is_err())
        .cloned()
        .collect()
}

/// Substring / exact / regex match of a value against a pattern list.
/// Empty pattern list matches everything. Unparseable regex patterns are
/// skipped (surfaced separately as notices). / 文本匹配
pub fn match_text(
    val: Option<&str>,
    patterns: &[String],
    exact: bool,
    regex: bool,
    case_sensitive: bool,
) -> bool {
    if patterns.is_empty() {
        return true;
    }
    let val = match val {
        Some(v) => normalize_spaces(v),
        None => return false,
    };
    let valc = fold_case(&val, case_sensitive);

    if regex {
        for p in patterns {
            let rx = match compile_pattern(p, case_sensitive) {
                Ok(rx) => rx,
                Err(_) => continue,
            };
            if rx.is_match(&val) {
                return true;
            }
        }
        return false;
    }

    for p in patterns {
        let p = fold_case(&normalize_spaces(p), case_sensitive);
        let hit = if exact { valc == p } else { valc.contains(&p) };
        if hit {
            return true;
        }
    }
    false
}

/// Match a name or its full path against a pattern list / 名称或路径匹配
pub fn match_name(
    name: &str,
    path: &str,
    patterns: &[String],
    exact: bool,
    regex: bool,
    case_sensitive: bool,
) -> bool {
    match_text(Some(name), patterns, exact, regex, case_sensitive)
        || match_text(Some(path), patterns, exact, regex, case_sensitive)
}

/// Leading token of a lot name before the first `_`, `-` or space, upper-cased.
pub fn lot_stem(val: &str) -> String {
    let v = normalize_spaces(val);
    let head = v
        .split(|c| c == '_' || c == '-' || c == ' ')
        .next()
        .unwrap_or("");
    head.to_uppercase()
}

/// Lot matching with stem normalization / 批次号匹配
///
/// Patterns containing `/` are treated as full lot-level paths and compared
/// exactly; bare patterns compare by stem so split-lot suffixes do not
/// prevent a match.
pub fn lot_match(
    name: &str,
    path: &str,
    patterns: &[String],
    exact: bool,
    regex: bool,
    case_sensitive: bool,
) -> bool {
    if patterns.is_empty() {
        return true;
    }
    if regex {
        return match_name(name, path, patterns, exact, true, case_sensitive);
    }
    if exact {
        for p in patterns {
            if p.contains('/') {
                if normalize_spaces(path) == normalize_spaces(p) {
                    return true;
                }
            } else {
                let nm = fold_case(&normalize_spaces(name), case_sensitive);
                let pc = fold_case(&normalize_spaces(p), case_sensitive);
                if nm == pc {
                    return true;
                }
            }
        }
        return false;
    }

    let nm = fold_case(&normalize_spaces(name), case_sensitive);
    let base = fold_case(&normalize_spaces(path_basename(path)), case_sensitive);
    for p in patterns {
        if p.contains('/') {
            let pc = fold_case(&normalize_spaces(p), case_sensitive);
            if pc == nm || pc == base {
                return true;
            }
        }
        if lot_stem(&nm) == lot_stem(p) || lot_stem(&base) == lot_stem(p) {
            return true;
        }
    }
    false
}

/// Decomposed scan path components / 扫描路径各级组件
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanPathParts {
    pub wafer: Option<String>,
    pub lot: Option<String>,
    pub film: Option<String>,
    pub date: Option<String>,
}

/// Parse a scan data path into wafer/lot/film/date. / 解析扫描路径
///
/// `/scan/CMP/A01/RGBT017_10/RGZF_M0/20241014` ->
/// wafer `A01`, lot `RGBT017_10`, film `RGZF_M0`, date `20241014`.
pub fn parse_scan_path(p: &str) -> ScanPathParts {
    let norm = crate::utils::normalize_slashes(p);
    let mut parts: Vec<&str> = norm.split('/').filter(|x| !x.is_empty()).collect();
    let mut out = ScanPathParts::default();
    if parts.is_empty() {
        return out;
    }
    if is_date_name(parts[parts.len() - 1]) {
        out.date = Some(parts.pop().map(str::to_string).unwrap_or_default());
    }
    let n = parts.len();
    if n >= 1 {
        out.film = Some(parts[n - 1].to_string());
    }
    if n >= 2 {
        out.lot = Some(parts[n - 2].to_string());
    }
    if n >= 3 {
        out.wafer = Some(parts[n - 3].to_string());
    }
    out
}

/// Film component used for recipe linkage: the directory immediately above the
/// date leaf, or the last segment when no date is present. / 配方联动用膜层名
pub fn extract_film_from_scan_path(p: &str) -> String {
    parse_scan_path(p).film.unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_rx() {
        assert!(is_date_name("20240101"));
        assert!(is_date_name("2024-01-01"));
        assert!(is_date_name("2024_01_01"));
        assert!(!is_date_name("2024010"));
        assert!(!is_date_name("RGBT017"));
    }

    #[test]
    fn test_match_text_substring_and_exact() {
        let pats = vec!["rgzf".to_string()];
        assert!(match_text(Some("RGZF_M0CWCMP"), &pats, false, false, false));
        assert!(!match_text(Some("RGZF_M0CWCMP"), &pats, true, false, false));
        assert!(match_text(Some("rgzf"), &pats, true, false, false));
        assert!(!match_text(Some("RGZF"), &pats, true, false, true));
        // empty pattern list matches everything
        assert!(match_text(Some("anything"), &[], true, false, true));
        assert!(!match_text(None, &pats, false, false, false));
    }

    #[test]
    fn test_match_text_whitespace_normalized() {
        let pats = vec!["M0  CMP".to_string()];
        assert!(match_text(Some("RGZF M0 CMP PRE"), &pats, false, false, false));
    }

    #[test]
    fn test_match_text_regex_skips_invalid() {
        let pats = vec!["(unclosed".to_string(), "RG.*CMP".to_string()];
        assert!(match_text(Some("RGZF_M0CWCMP"), &pats, false, true, false));
        let only_bad = vec!["(unclosed".to_string()];
        assert!(!match_text(Some("RGZF_M0CWCMP"), &only_bad, false, true, false));
        assert_eq!(validate_regex_patterns(&only_bad, false), only_bad);
    }

    #[test]
    fn test_lot_stem() {
        assert_eq!(lot_stem("RGBT017_10"), "RGBT017");
        assert_eq!(lot_stem("rgbt017-2"), "RGBT017");
        assert_eq!(lot_stem("RGBT017 X"), "RGBT017");
        assert_eq!(lot_stem("RGBT017"), "RGBT017");
    }

    #[test]
    fn test_lot_match_stem() {
        // split-lot suffix still matches the base pattern
        assert!(lot_match(
            "RGBT017_10",
            "/scan/A/RGBT017_10",
            &["RGBT017".to_string()],
            false,
            false,
            false
        ));
        assert!(!lot_match(
            "RGBT017_10",
            "/scan/A/RGBT017_10",
            &["RGBT018".to_string()],
            false,
            false,
            false
        ));
    }

    #[test]
    fn test_lot_match_full_path_exact() {
        assert!(lot_match(
            "RGBT017_10",
            "/scan/A/RGBT017_10",
            &["/scan/A/RGBT017_10".to_string()],
            true,
            false,
            false
        ));
        assert!(!lot_match(
            "RGBT017_10",
            "/scan/A/RGBT017_10",
            &["/scan/B/RGBT017_10".to_string()],
            true,
            false,
            false
        ));
    }

    #[test]
    fn test_parse_scan_path() {
        let parts = parse_scan_path("/scan/A/L1/F1/20240101");
        assert_eq!(parts.date.as_deref(), Some("20240101"));
        assert_eq!(parts.film.as_deref(), Some("F1"));
        assert_eq!(parts.lot.as_deref(), Some("L1"));
        assert_eq!(parts.wafer.as_deref(), Some("A"));

        // no date leaf: film is the last segment
        let parts = parse_scan_path("/scan/A/L1/F1");
        assert_eq!(parts.date, None);
        assert_eq!(parts.film.as_deref(), Some("F1"));
        assert_eq!(parts.lot.as_deref(), Some("L1"));

        // network-drive paths with backslashes and trailing separators
        let parts = parse_scan_path("\\scan\\A\\L1\\F1\\20240101\\");
        assert_eq!(parts.date.as_deref(), Some("20240101"));
        assert_eq!(parts.film.as_deref(), Some("F1"));
        assert_eq!(parts.wafer.as_deref(), Some("A"));
    }

    #[test]
    fn test_extract_film() {
        assert_eq!(extract_film_from_scan_path("/scan/A/L1/F1/20240101"), "F1");
        assert_eq!(extract_film_from_scan_path("/scan/A/L1/F1"), "F1");
        assert_eq!(extract_film_from_scan_path(""), "");
    }
}
