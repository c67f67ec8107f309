//! Source adapters / 数据源适配器
//!
//! One uniform capability surface over the two source variants: a remote FTP
//! server and a local/network filesystem mount. The concrete variant is chosen
//! once per source descriptor at startup.

pub mod ftp;
pub mod local;

use crate::error::ScanResult;
use crate::models::SourceConfig;
use async_trait::async_trait;
use std::sync::Arc;

/// Uniform source capability set / 统一的数据源能力接口
///
/// Paths are POSIX-style and rooted at the source namespace (not the host
/// filesystem). Every remote call is bounded by the session's operation
/// deadline; no method may block unboundedly.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// List subdirectory names at `path`.
    async fn list_dirs(&self, path: &str) -> ScanResult<Vec<String>>;

    /// List child names at `path` matching a trailing-wildcard pattern such as
    /// `as1*`. An empty pattern lists everything.
    async fn list_names(&self, path: &str, pattern: &str) -> ScanResult<Vec<String>>;

    /// Read the first `n` lines of a small text file.
    async fn read_head(&self, path: &str, n: usize) -> ScanResult<Vec<String>>;

    /// Release pooled resources, best-effort. / 释放连接资源
    async fn shutdown(&self) {}
}

/// Construct the adapter variant selected by the source descriptor.
/// / 按数据源描述创建适配器
pub fn create_adapter(cfg: &SourceConfig) -> Arc<dyn SourceAdapter> {
    if cfg.use_local_fs {
        Arc::new(local::LocalAdapter::new(&cfg.root))
    } else {
        Arc::new(ftp::FtpAdapter::new(cfg))
    }
}
