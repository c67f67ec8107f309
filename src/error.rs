//! Error taxonomy for the crawler/index/search core / 扫描索引核心错误类型
//!
//! Per-entity and per-branch failures are caught at the smallest scope and
//! recorded as notices; only resource setup failures escalate to the caller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    /// Session establishment failed. Fatal to that session, the caller skips
    /// the source/branch and reports it. / 会话建立失败
    #[error("connect failed: {0}")]
    Connect(String),

    /// A single remote operation exceeded its deadline. The underlying
    /// connection has been force-closed; the session must be discarded.
    #[error("operation deadline exceeded after {0:.1}s")]
    DeadlineExceeded(f64),

    /// All directory-listing strategies failed for a path. / 目录枚举全部失败
    #[error("no listing strategy available for {0}")]
    ListUnavailable(String),

    /// Strategy-header or path-decomposition parsing failed. The affected
    /// entity is still indexed with best-effort fields.
    #[error("parse failed: {0}")]
    Parse(String),

    /// Regex compile failure in a search filter; the pattern is skipped and
    /// surfaced as a notice.
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    /// lots/films cross-reference invariant violated. Reported, never
    /// auto-repaired. / 索引交叉引用损坏
    #[error("index inconsistency: {0}")]
    IndexInconsistency(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ftp error: {0}")]
    Ftp(String),
}

impl ScanError {
    /// Whether the session that produced this error can still be reused.
    pub fn session_reusable(&self) -> bool {
        !matches!(self, ScanError::DeadlineExceeded(_) | ScanError::Connect(_))
    }
}

pub type ScanResult<T> = Result<T, ScanError>;
