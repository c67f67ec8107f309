//! Core data models / 核心数据模型
//!
//! Source descriptors are loaded once from the sources file and are immutable
//! for the lifetime of the process.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const DEFAULT_USER: &str = "FTP_TEST";
pub const DEFAULT_PASS: &str = "FTP_TEST";
pub const DEFAULT_PORT: u16 = 21;
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_OP_DEADLINE_SECS: f64 = 25.0;
pub const DEFAULT_RECIPE_ROOT: &str = "/Film List";
pub const DEFAULT_SCAN_ROOT: &str = "/auto scan data";
pub const DEFAULT_PREFIX: &str = "as";

/// Role of a data source / 数据源角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceRole {
    /// Flat namespace of recipe folders. Config files historically call this
    /// role "film". / 配方（film）角色
    #[serde(alias = "film")]
    Recipe,
    /// Deep hierarchical namespace terminating in dated leaf directories.
    Scan,
}

impl SourceRole {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "film" | "recipe" => Ok(SourceRole::Recipe),
            "scan" => Ok(SourceRole::Scan),
            other => bail!("role must be film|scan, got '{}'", other),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceRole::Recipe => "recipe",
            SourceRole::Scan => "scan",
        }
    }
}

/// Source descriptor: one configured server or mounted filesystem.
/// / 单个数据源的连接与命名空间描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub role: SourceRole,
    pub group: String,
    /// Namespace root path on the source / 命名空间根路径
    pub root: String,
    /// Naming prefix for recipe folder enumeration / 配方文件夹名前缀
    pub prefix: String,
    /// Connect/socket timeout in seconds
    pub timeout: u64,
    /// Hard per-operation deadline in seconds
    pub op_deadline: f64,
    pub pool_size: usize,
    /// true: local/network filesystem adapter, false: FTP adapter
    pub use_local_fs: bool,
    /// Listing encoding for non-UTF-8 servers, empty = UTF-8
    #[serde(default)]
    pub encoding: String,
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

/// Search filter criteria / 搜索过滤条件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub servers: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub wafer: Vec<String>,
    #[serde(default)]
    pub lot: Vec<String>,
    #[serde(default)]
    pub film: Vec<String>,
    #[serde(default)]
    pub exact: bool,
    #[serde(default)]
    pub regex: bool,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub link_recipe: bool,
}

impl SearchFilters {
    /// Drop empty strings and lowercase the roles. / 规范化过滤条件
    pub fn prepared(mut self) -> Self {
        self.servers.retain(|s| !s.is_empty());
        self.roles = self
            .roles
            .iter()
            .filter(|r| !r.is_empty())
            .map(|r| r.to_ascii_lowercase())
            .collect();
        self.wafer.retain(|s| !s.is_empty());
        self.lot.retain(|s| !s.is_empty());
        self.film.retain(|s| !s.is_empty());
        self
    }
}

/// A single search result / 单条搜索结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hit {
    pub server: String,
    pub role: String,
    pub level: String,
    pub path: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub wafer: Option<String>,
    #[serde(default)]
    pub lot: Option<String>,
    #[serde(default)]
    pub film: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub recipe_linked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe_paths: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe_primary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe_server: Option<String>,
}

/// Parse the line-oriented sources file (servers.txt).
///
/// Format per line: `name, address, max_depth, save_level[, user, pass][, k=v ...]`
/// `#` starts a comment. Meta keys: role, group, root, prefix, port, timeout,
/// op_deadline, pool_size, source, encoding.
pub fn read_source_list(path: &Path) -> Result<Vec<SourceConfig>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("source file not found: {}", path.display()))?;

    let mut out = Vec::new();
    for (lineno, line) in raw.lines().enumerate() {
        let lineno = lineno + 1;
        let base = line.split('#').next().unwrap_or("").trim();
        if base.is_empty() {
            continue;
        }
        let row: Vec<&str> = base
            .split(',')
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .collect();
        if row.len() < 4 {
            bail!(
                "line {}: need >=4 columns (name, address, max_depth, save_level)",
                lineno
            );
        }
        let name = row[0].to_string();
        let address = row[1].to_string();

        // columns 5/6 are credentials only when they are not key=value tokens
        let (user, password, meta_tokens) =
            if row.len() >= 6 && !row[4].contains('=') && !row[5].contains('=') {
                (row[4].to_string(), row[5].to_string(), &row[6..])
            } else {
                (DEFAULT_USER.to_string(), DEFAULT_PASS.to_string(), &row[4..])
            };

        let mut meta: HashMap<String, String> = HashMap::new();
        for tok in meta_tokens {
            let (k, v) = tok
                .split_once('=')
                .ok_or_else(|| anyhow!("line {}: meta token needs key=value => {}", lineno, tok))?;
            let k = k.trim().to_ascii_lowercase();
            if meta.contains_key(&k) {
                bail!("line {}: duplicate meta key {}", lineno, k);
            }
            meta.insert(k, v.trim().to_string());
        }

        let role = match meta.get("role") {
            Some(r) => SourceRole::parse(r).with_context(|| format!("line {}", lineno))?,
            None => SourceRole::Recipe,
        };
        let group = meta.get("group").cloned().unwrap_or_else(|| name.clone());
        let default_root = match role {
            SourceRole::Recipe => DEFAULT_RECIPE_ROOT,
            SourceRole::Scan => DEFAULT_SCAN_ROOT,
        };
        let root = meta
            .get("root")
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| default_root.to_string());
        let prefix = meta
            .get("prefix")
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_PREFIX.to_string());
        let port = meta
            .get("port")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let timeout = meta
            .get("timeout")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let op_deadline = meta
            .get("op_deadline")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_OP_DEADLINE_SECS);
        let pool_size = meta
            .get("pool_size")
            .and_then(|v| v.parse().ok())
            .unwrap_or(match role {
                SourceRole::Recipe => 6,
                SourceRole::Scan => 3,
            });
        // source=local|network|fs picks the filesystem adapter, anything else is FTP
        let use_local_fs = match meta.get("source") {
            Some(v) => matches!(
                v.to_ascii_lowercase().as_str(),
                "local" | "network" | "filesystem" | "fs" | "smb" | "unc"
            ),
            None => meta
                .get("local")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(false),
        };
        let encoding = meta.get("encoding").cloned().unwrap_or_default();

        out.push(SourceConfig {
            name,
            address,
            port,
            user,
            password,
            role,
            group,
            root,
            prefix,
            timeout,
            op_deadline,
            pool_size,
            use_local_fs,
            encoding,
            meta,
        });
    }

    if out.is_empty() {
        bail!("no sources loaded from {}", path.display());
    }
    Ok(out)
}
