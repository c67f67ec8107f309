//! Local/network filesystem adapter / 本地与网络盘适配器
//!
//! Presents the same POSIX-path capability surface as the FTP adapter over a
//! mounted directory (local disk, SMB/UNC network drive).

use super::SourceAdapter;
use crate::error::{ScanError, ScanResult};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncBufReadExt;

pub struct LocalAdapter {
    root: PathBuf,
}

impl LocalAdapter {
    pub fn new(root: &str) -> Self {
        Self {
            root: PathBuf::from(root),
        }
    }

    /// Map a namespace path onto the mounted root, rejecting traversal.
    /// Accepts both root-prefixed paths (as stored in index documents) and
    /// root-relative ones. / 将命名空间路径映射到挂载根，拒绝越界
    fn real_path(&self, path: &str) -> ScanResult<PathBuf> {
        let path = path.replace('\\', "/");
        let root_str = self.root.to_string_lossy().replace('\\', "/");
        let root_trim = root_str.trim_end_matches('/');
        let rel = if !root_trim.is_empty()
            && (path == root_trim || path.starts_with(&format!("{}/", root_trim)))
        {
            &path[root_trim.len()..]
        } else {
            path.as_str()
        };
        let mut real = self.root.clone();
        for part in rel.split('/') {
            match part {
                "" | "." => continue,
                ".." => {
                    return Err(ScanError::Parse(format!(
                        "path escapes namespace root: {}",
                        path
                    )))
                }
                other => real.push(other),
            }
        }
        Ok(real)
    }
}

#[async_trait]
impl SourceAdapter for LocalAdapter {
    async fn list_dirs(&self, path: &str) -> ScanResult<Vec<String>> {
        let real = self.real_path(path)?;
        let mut rd = tokio::fs::read_dir(&real).await?;
        let mut out = Vec::new();
        while let Some(entry) = rd.next_entry().await? {
            let ft = entry.file_type().await?;
            // symlinks are not followed, same guard as the traversal depth cap
            if ft.is_dir() {
                out.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        out.sort();
        Ok(out)
    }

    async fn list_names(&self, path: &str, pattern: &str) -> ScanResult<Vec<String>> {
        let real = self.real_path(path)?;
        let prefix = pattern.trim_end_matches('*');
        let mut rd = tokio::fs::read_dir(&real).await?;
        let mut out = Vec::new();
        while let Some(entry) = rd.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(prefix) {
                out.push(name);
            }
        }
        out.sort();
        Ok(out)
    }

    async fn read_head(&self, path: &str, n: usize) -> ScanResult<Vec<String>> {
        let real = self.real_path(path)?;
        let file = tokio::fs::File::open(&real).await?;
        let mut lines = tokio::io::BufReader::new(file).lines();
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            match lines.next_line().await? {
                Some(line) => out.push(line.trim_end_matches('\r').to_string()),
                None => break,
            }
        }
        Ok(out)
    }
}
