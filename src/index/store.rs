//! Index document persistence / 索引文档持久化
//!
//! One JSON document set per source under `<out>/<kind>/<name>_<suffix>.json`.
//! Missing files load as empty defaults, never as errors. Documents use
//! BTree collections so a rebuild of unchanged content is byte-identical.

use crate::error::ScanResult;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// lot name -> distinct lot-level paths / 批次名到批次路径
pub type LotsIndex = BTreeMap<String, BTreeSet<String>>;
/// lot-level path -> sorted date-leaf paths (authoritative membership map)
pub type FilmsIndex = BTreeMap<String, BTreeSet<String>>;

/// One indexed recipe folder / 单个配方文件夹
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecipeFolder {
    pub path: String,
    /// Parsed strategy name, empty when the header could not be parsed
    pub strategy: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecipeStats {
    pub folders: usize,
    pub recipes: usize,
}

/// Recipe index document / 配方索引文档
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecipeIndexDoc {
    pub server: String,
    pub recipes_root: Option<String>,
    pub generated_at: Option<String>,
    pub updated_at: Option<String>,
    pub folders: BTreeMap<String, RecipeFolder>,
    /// strategy name (or folder name when unparsed) -> folder paths, derived
    pub by_recipe: BTreeMap<String, Vec<String>>,
    pub stats: RecipeStats,
}

/// Lots index document / 批次索引文档
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LotsIndexDoc {
    pub server: String,
    pub lots_index: LotsIndex,
}

fn mode_map() -> String {
    "map".to_string()
}

/// Films index document; `mode` must be "map" / 膜层索引文档
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilmsIndexDoc {
    pub server: String,
    #[serde(default = "mode_map")]
    pub mode: String,
    pub films_index: FilmsIndex,
}

impl Default for FilmsIndexDoc {
    fn default() -> Self {
        Self {
            server: String::new(),
            mode: mode_map(),
            films_index: FilmsIndex::new(),
        }
    }
}

/// Visited set document, the delta baseline for incremental updates
/// / 增量更新基线
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisitedDoc {
    pub server: String,
    pub last_bootstrap: Option<String>,
    pub last_update: Option<String>,
    pub visited_lot_paths: BTreeSet<String>,
}

/// Wafer summary document written at bootstrap / 晶圆路径汇总文档
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FullDoc {
    pub server: String,
    pub scan_root: String,
    pub generated_at: Option<String>,
    pub updated_at: Option<String>,
    pub wafer_paths: Vec<String>,
}

/// Path set for one scan source's documents / 扫描索引文档路径
pub struct ScanPaths {
    pub full: PathBuf,
    pub lots_index: PathBuf,
    pub films_index: PathBuf,
    pub visited: PathBuf,
}

pub fn scan_paths(out_dir: &Path, server: &str) -> ScanPaths {
    let base = out_dir.join("required");
    ScanPaths {
        full: base.join(format!("{}_Full.json", server)),
        lots_index: base.join(format!("{}_lots_index.json", server)),
        films_index: base.join(format!("{}_films_index.json", server)),
        visited: base.join(format!("{}_visited.json", server)),
    }
}

pub fn recipe_index_path(out_dir: &Path, server: &str) -> PathBuf {
    out_dir
        .join("recipes")
        .join(format!("{}_recipes_index.json", server))
}

/// Load a JSON document, or the default when the file does not exist.
/// / 读取 JSON 文档，缺失时返回默认值
pub fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> ScanResult<T> {
    if !path.is_file() {
        return Ok(T::default());
    }
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| crate::error::ScanError::Parse(format!("{}: {}", path.display(), e)))
}

/// Write a JSON document, creating parent directories / 写出 JSON 文档
pub fn save_json<T: Serialize>(path: &Path, doc: &T) -> ScanResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(doc)
        .map_err(|e| crate::error::ScanError::Parse(e.to_string()))?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Cross-reference invariant: every films_index key must appear as a value
/// under some lots_index key. Violations are reported, never repaired.
/// / 校验批次/膜层索引交叉引用
pub fn check_consistency(lots: &LotsIndex, films: &FilmsIndex) -> Vec<String> {
    let known: BTreeSet<&String> = lots.values().flatten().collect();
    films
        .keys()
        .filter(|p| !known.contains(p))
        .map(|p| format!("films_index path missing from lots_index: {}", p))
        .collect()
}
