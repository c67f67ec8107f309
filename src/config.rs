//! Application configuration module / 应用配置模块
//!
//! Manages application configuration loaded from config.json
//! Creates default config file on first run / 首次运行时创建默认配置文件
//!
//! Index tuning lives in [`IndexPolicy`]: an immutable value passed explicitly
//! into each builder/engine call, never process-wide mutable state.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Application configuration / 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration / 服务器配置
    pub server: ServerConfig,
    /// Index output configuration / 索引输出配置
    pub index: IndexConfig,
    /// Index tuning policy / 索引调优策略
    pub policy: IndexPolicy,
}

/// Server configuration / 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address / 服务器监听地址
    pub host: String,
    /// Server port / 服务器端口
    pub port: u16,
}

/// Index output configuration / 索引输出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Output directory for index documents / 索引文档输出目录
    pub out_dir: String,
    /// Sources file path (servers.txt) / 数据源列表文件
    pub sources_file: String,
}

/// Tuning thresholds, worker counts and depth limits for the builders.
/// Immutable once loaded. / 构建器调优参数
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IndexPolicy {
    /// Parallel workers for strategy header reading / 配方头并行读取数
    pub recipe_max_workers: usize,
    /// Cap for local sources, filesystem IO saturates earlier than network
    pub recipe_local_max_workers: usize,
    /// Log progress every N recipe folders
    pub recipe_progress_batch: usize,
    /// In update mode, skip folders already present in the index
    pub recipe_skip_existing: bool,
    /// Bucket result count at which enumeration partitions one digit deeper
    pub bucket_split_threshold: usize,
    /// Maximum prefix-digit depth for bucketed enumeration
    pub bucket_max_depth: usize,
    /// strategy.ini line expected to carry the key (1-based)
    pub strategy_line_index: usize,
    /// How many header lines to read
    pub strategy_head_lines: usize,
    /// Parallel workers for remote tree traversal / 远程目录遍历并行数
    pub scan_max_workers: usize,
    /// Log progress every N directories
    pub scan_progress_batch: usize,
    /// Abandon traversal beyond this depth (cyclic/pathological trees)
    pub scan_max_depth: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            index: IndexConfig::default(),
            policy: IndexPolicy::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8180,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            out_dir: "data".to_string(),
            sources_file: "servers.txt".to_string(),
        }
    }
}

impl Default for IndexPolicy {
    fn default() -> Self {
        Self {
            recipe_max_workers: 32,
            recipe_local_max_workers: 16,
            recipe_progress_batch: 500,
            recipe_skip_existing: true,
            bucket_split_threshold: 5000,
            bucket_max_depth: 2,
            strategy_line_index: 3,
            strategy_head_lines: 6,
            scan_max_workers: 16,
            scan_progress_batch: 1000,
            scan_max_depth: 15,
        }
    }
}

impl AppConfig {
    /// Get the index output directory / 获取索引输出目录
    pub fn get_out_dir(&self) -> PathBuf {
        PathBuf::from(&self.index.out_dir)
    }

    /// Get the sources file path / 获取数据源列表路径
    pub fn get_sources_path(&self) -> PathBuf {
        PathBuf::from(&self.index.sources_file)
    }

    /// Get the server bind address / 获取服务器绑定地址
    pub fn get_bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Get the config file path / 获取配置文件路径
fn get_config_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("config.json")
}

/// Load configuration from file, or create default if not exists / 加载配置文件，不存在则创建默认配置
pub fn load_config() -> Result<AppConfig, String> {
    let config_path = get_config_path();

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config file: {}", e))?;

        tracing::info!("Loaded configuration from {:?}", config_path);
        Ok(config)
    } else {
        let config = AppConfig::default();
        save_config(&config)?;
        tracing::info!("Created default configuration at {:?}", config_path);
        Ok(config)
    }
}

/// Save configuration to file / 保存配置到文件
pub fn save_config(config: &AppConfig) -> Result<(), String> {
    let config_path = get_config_path();

    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;

    std::fs::write(&config_path, content)
        .map_err(|e| format!("Failed to write config file: {}", e))?;

    Ok(())
}
