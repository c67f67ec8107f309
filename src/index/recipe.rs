//! Recipe (flat namespace) index builder / 配方索引构建器
//!
//! Full bootstrap and incremental update of one recipe source. Remote
//! enumeration buckets the namespace by appended prefix digits because large
//! flat listings get silently truncated by some servers; extra round trips
//! buy completeness.

use crate::config::IndexPolicy;
use crate::drivers::{create_adapter, SourceAdapter};
use crate::error::ScanResult;
use crate::index::store::{
    load_json_or_default, recipe_index_path, save_json, RecipeFolder, RecipeIndexDoc, RecipeStats,
};
use crate::models::SourceConfig;
use crate::search::matcher::normalize_spaces;
use crate::utils::{join_path, now_iso};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use std::sync::Arc;

/// Outcome of one recipe build/update call / 单次构建结果摘要
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecipeSummary {
    pub folders: usize,
    pub recipes: usize,
    pub processed: usize,
    pub skipped: usize,
    pub removed: usize,
}

/// Parse a strategy name out of the leading lines of strategy.ini.
///
/// The key normally sits at `strategy_line_index` (1-based); earlier lines are
/// checked as fallback to tolerate header reordering. / 解析策略名
pub fn parse_strategy(lines: &[String], policy: &IndexPolicy) -> String {
    let idx = policy.strategy_line_index;
    let candidates: Vec<&String> = if lines.len() >= idx {
        std::iter::once(&lines[idx - 1])
            .chain(lines[..idx - 1].iter())
            .collect()
    } else {
        lines.iter().collect()
    };
    for ln in candidates {
        if ln.contains("StrategyName") {
            let value = ln.splitn(2, '=').nth(1).unwrap_or("").trim();
            let value = value.trim_matches(|c| c == '\'' || c == '"');
            let value = normalize_spaces(value);
            if !value.is_empty() {
                return value;
            }
        }
    }
    String::new()
}

/// Seam over "list folder names matching `<pattern>`" so the bucketing
/// algorithm is testable without a server. / 名称枚举接口
#[async_trait]
pub trait NameLister: Send + Sync {
    async fn list_prefixed(&self, pattern: &str) -> ScanResult<Vec<String>>;
}

struct AdapterLister {
    adapter: Arc<dyn SourceAdapter>,
    root: String,
}

#[async_trait]
impl NameLister for AdapterLister {
    async fn list_prefixed(&self, pattern: &str) -> ScanResult<Vec<String>> {
        self.adapter.list_names(&self.root, pattern).await
    }
}

/// Prefix-bucketed enumeration of a flat namespace too large to list at once.
///
/// Starts from the configured prefix; whenever the union of one bucket's ten
/// digit sub-listings meets the split threshold and depth remains, the bucket
/// is re-partitioned one digit deeper. Per-bucket failures drop that bucket
/// only. / 前缀分桶枚举
pub async fn bucketed_enumerate(
    lister: &dyn NameLister,
    prefix: &str,
    workers: usize,
    policy: &IndexPolicy,
) -> BTreeSet<String> {
    let mut names: BTreeSet<String> = BTreeSet::new();
    let mut buckets: VecDeque<(String, usize)> = VecDeque::new();
    buckets.push_back((prefix.to_string(), 0));

    while let Some((pfx, depth)) = buckets.pop_front() {
        if depth < policy.bucket_max_depth {
            let patterns: Vec<String> = (0..10).map(|d| format!("{}{}*", pfx, d)).collect();
            let results: Vec<ScanResult<Vec<String>>> = futures::stream::iter(
                patterns
                    .into_iter()
                    .map(|pat| async move { lister.list_prefixed(&pat).await }),
            )
            .buffer_unordered(workers.max(1))
            .collect()
            .await;
            let mut sub: BTreeSet<String> = BTreeSet::new();
            for res in results {
                match res {
                    Ok(lst) => sub.extend(lst),
                    Err(e) => tracing::debug!("[recipe] bucket {}* failed: {}", pfx, e),
                }
            }
            if sub.len() >= policy.bucket_split_threshold && depth + 1 < policy.bucket_max_depth {
                for d in 0..10 {
                    buckets.push_back((format!("{}{}", pfx, d), depth + 1));
                }
            } else {
                names.extend(sub);
            }
        } else {
            match lister.list_prefixed(&format!("{}*", pfx)).await {
                Ok(lst) => names.extend(lst),
                Err(e) => tracing::debug!("[recipe] bucket {}* failed: {}", pfx, e),
            }
        }
    }

    names
        .into_iter()
        .map(|n| n.trim_end_matches('/').to_string())
        .collect()
}

/// List every recipe folder name for this source. Local sources need one
/// directory scan; remote sources go through the bucketing strategy.
async fn list_folder_names(
    cfg: &SourceConfig,
    adapter: Arc<dyn SourceAdapter>,
    policy: &IndexPolicy,
) -> ScanResult<Vec<String>> {
    tracing::info!(
        "[recipe] list server={} root={} prefix={} local={}",
        cfg.name,
        cfg.root,
        cfg.prefix,
        cfg.use_local_fs
    );
    if cfg.use_local_fs {
        return adapter
            .list_names(&cfg.root, &format!("{}*", cfg.prefix))
            .await;
    }
    let lister = AdapterLister {
        adapter,
        root: cfg.root.clone(),
    };
    let names = bucketed_enumerate(&lister, &cfg.prefix, cfg.pool_size.max(1), policy).await;
    Ok(names.into_iter().collect())
}

/// Read and parse strategy headers for `to_process`, bounded by `workers`.
/// Failures index the folder with an empty strategy, never abort the batch.
async fn read_strategies(
    cfg: &SourceConfig,
    adapter: Arc<dyn SourceAdapter>,
    to_process: &[String],
    workers: usize,
    policy: &IndexPolicy,
) -> BTreeMap<String, RecipeFolder> {
    let total = to_process.len();
    let mut folders = BTreeMap::new();
    let mut done = 0usize;

    let mut results = futures::stream::iter(to_process.to_vec().into_iter().map(|name| {
        let adapter = adapter.clone();
        let root = cfg.root.clone();
        let head_lines = policy.strategy_head_lines;
        let policy = *policy;
        async move {
            let folder_path = join_path(&root, &name);
            let ini_path = join_path(&folder_path, "strategy.ini");
            let strategy = match adapter.read_head(&ini_path, head_lines).await {
                Ok(lines) => parse_strategy(&lines, &policy),
                Err(e) => {
                    tracing::warn!("[recipe] strategy read failed {}: {}", name, e);
                    String::new()
                }
            };
            (
                name,
                RecipeFolder {
                    path: folder_path,
                    strategy,
                },
            )
        }
    }))
    .buffer_unordered(workers.max(1));

    while let Some((name, folder)) = results.next().await {
        folders.insert(name, folder);
        done += 1;
        if done % policy.recipe_progress_batch == 0 {
            tracing::info!("[recipe] progress: {}/{} folders", done, total);
        }
    }
    folders
}

/// Derive the reverse map: strategy name (or folder name when unparsed) to
/// folder paths. / 重建 by_recipe 反向索引
pub fn build_by_recipe(folders: &BTreeMap<String, RecipeFolder>) -> BTreeMap<String, Vec<String>> {
    let mut by_recipe: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, folder) in folders {
        let key = if folder.strategy.is_empty() {
            name.clone()
        } else {
            folder.strategy.clone()
        };
        by_recipe.entry(key).or_default().push(folder.path.clone());
    }
    by_recipe
}

fn strategy_workers(cfg: &SourceConfig, n: usize, policy: &IndexPolicy) -> usize {
    let cap = if cfg.use_local_fs {
        policy.recipe_max_workers.min(policy.recipe_local_max_workers)
    } else {
        policy.recipe_max_workers
    };
    cap.min(n).max(1)
}

/// Full rebuild: process every folder unconditionally. / 全量构建
pub async fn bootstrap(
    cfg: &SourceConfig,
    out_dir: &Path,
    policy: &IndexPolicy,
) -> ScanResult<RecipeSummary> {
    tracing::info!("=== [RECIPE] BOOTSTRAP {} ({}) root={} ===", cfg.name, cfg.address, cfg.root);
    let adapter = create_adapter(cfg);
    let names = list_folder_names(cfg, adapter.clone(), policy).await?;
    tracing::info!("[recipe] found {} folders", names.len());

    let workers = strategy_workers(cfg, names.len(), policy);
    let folders = read_strategies(cfg, adapter.clone(), &names, workers, policy).await;
    adapter.shutdown().await;
    let by_recipe = build_by_recipe(&folders);

    let doc = RecipeIndexDoc {
        server: cfg.name.clone(),
        recipes_root: Some(cfg.root.clone()),
        generated_at: Some(now_iso()),
        updated_at: None,
        stats: RecipeStats {
            folders: folders.len(),
            recipes: by_recipe.len(),
        },
        folders,
        by_recipe,
    };
    save_json(&recipe_index_path(out_dir, &cfg.name), &doc)?;

    tracing::info!(
        "[recipe] bootstrap done: {} folders, {} recipes",
        doc.stats.folders,
        doc.stats.recipes
    );
    Ok(RecipeSummary {
        folders: doc.stats.folders,
        recipes: doc.stats.recipes,
        processed: doc.stats.folders,
        skipped: 0,
        removed: 0,
    })
}

/// Incremental update: drop vanished folders, process only new ones
/// (configurable to reprocess all), rebuild the reverse map. / 增量更新
pub async fn update(
    cfg: &SourceConfig,
    out_dir: &Path,
    policy: &IndexPolicy,
) -> ScanResult<RecipeSummary> {
    tracing::info!("=== [RECIPE] UPDATE {} ({}) root={} ===", cfg.name, cfg.address, cfg.root);
    let index_path = recipe_index_path(out_dir, &cfg.name);
    let mut doc: RecipeIndexDoc = load_json_or_default(&index_path)?;
    tracing::info!("[recipe] existing index has {} folders", doc.folders.len());

    let adapter = create_adapter(cfg);
    let names = list_folder_names(cfg, adapter.clone(), policy).await?;
    tracing::info!("[recipe] found {} folders on server", names.len());

    let current: BTreeSet<&String> = names.iter().collect();
    let removed_names: Vec<String> = doc
        .folders
        .keys()
        .filter(|k| !current.contains(k))
        .cloned()
        .collect();
    for r in &removed_names {
        doc.folders.remove(r);
    }
    if !removed_names.is_empty() {
        tracing::info!("[recipe] {} folders removed from server", removed_names.len());
    }

    let (to_process, skipped): (Vec<String>, usize) = if policy.recipe_skip_existing {
        let fresh: Vec<String> = names
            .iter()
            .filter(|n| !doc.folders.contains_key(*n))
            .cloned()
            .collect();
        let skipped = names.len() - fresh.len();
        (fresh, skipped)
    } else {
        (names.clone(), 0)
    };
    if skipped > 0 {
        tracing::info!(
            "[recipe] skipping {} already indexed folders, processing {} new",
            skipped,
            to_process.len()
        );
    }

    let workers = strategy_workers(cfg, to_process.len(), policy);
    let fresh = read_strategies(cfg, adapter.clone(), &to_process, workers, policy).await;
    adapter.shutdown().await;
    let processed = fresh.len();
    doc.folders.extend(fresh);

    doc.by_recipe = build_by_recipe(&doc.folders);
    doc.stats = RecipeStats {
        folders: doc.folders.len(),
        recipes: doc.by_recipe.len(),
    };
    doc.server = cfg.name.clone();
    if doc.recipes_root.is_none() {
        doc.recipes_root = Some(cfg.root.clone());
    }
    doc.updated_at = Some(now_iso());
    save_json(&index_path, &doc)?;

    tracing::info!(
        "[recipe] update done: {} folders ({} new, {} skipped, {} removed)",
        doc.stats.folders,
        processed,
        skipped,
        removed_names.len()
    );
    Ok(RecipeSummary {
        folders: doc.stats.folders,
        recipes: doc.stats.recipes,
        processed,
        skipped,
        removed: removed_names.len(),
    })
}

/// Run bootstrap or update depending on whether an index exists yet.
pub async fn build(
    cfg: &SourceConfig,
    out_dir: &Path,
    policy: &IndexPolicy,
    incremental: bool,
) -> ScanResult<RecipeSummary> {
    if incremental && recipe_index_path(out_dir, &cfg.name).is_file() {
        update(cfg, out_dir, policy).await
    } else {
        bootstrap(cfg, out_dir, policy).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScanError;
    use crate::models::SourceRole;
    use tokio::sync::Mutex as AsyncMutex;

    fn policy() -> IndexPolicy {
        IndexPolicy::default()
    }

    #[test]
    fn test_parse_strategy_expected_line_first() {
        let p = policy();
        let lines: Vec<String> = vec![
            "[HEAD]".into(),
            "StrategyName = 'WRONG'".into(),
            "StrategyName = 'RIGHT  ONE'".into(),
            "Rev = 3".into(),
        ];
        // line 3 (1-based) wins over earlier lines
        assert_eq!(parse_strategy(&lines, &p), "RIGHT ONE");
    }

    #[test]
    fn test_parse_strategy_fallback_to_earlier_lines() {
        let p = policy();
        let lines: Vec<String> = vec![
            "StrategyName = \"EARLY\"".into(),
            "Rev = 3".into(),
            "Operator = kim".into(),
        ];
        assert_eq!(parse_strategy(&lines, &p), "EARLY");
    }

    #[test]
    fn test_parse_strategy_short_or_missing() {
        let p = policy();
        let lines: Vec<String> = vec!["StrategyName = 'X'".into()];
        assert_eq!(parse_strategy(&lines, &p), "X");
        assert_eq!(parse_strategy(&[], &p), "");
        let none: Vec<String> = vec!["a".into(), "b".into(), "c".into(), "d".into()];
        assert_eq!(parse_strategy(&none, &p), "");
    }

    /// Synthetic flat namespace with a per-call result cap, mimicking servers
    /// that truncate large listings.
    struct CappedLister {
        names: Vec<String>,
        cap: usize,
        calls: AsyncMutex<usize>,
    }

    #[async_trait]
    impl NameLister for CappedLister {
        async fn list_prefixed(&self, pattern: &str) -> ScanResult<Vec<String>> {
            *self.calls.lock().await += 1;
            let prefix = pattern.trim_end_matches('*');
            Ok(self
                .names
                .iter()
                .filter(|n| n.starts_with(prefix))
                .take(self.cap)
                .cloned()
                .collect())
        }
    }

    #[tokio::test]
    async fn test_bucketed_enumeration_complete_under_cap() {
        for n in [100usize, 5000, 20_000, 50_000] {
            let names: Vec<String> = (0..n).map(|i| format!("as{:05}", i)).collect();
            let lister = CappedLister {
                names: names.clone(),
                cap: 5000,
                calls: AsyncMutex::new(0),
            };
            let got = bucketed_enumerate(&lister, "as", 4, &policy()).await;
            assert_eq!(got.len(), n, "N={}", n);
            assert_eq!(got, names.into_iter().collect::<BTreeSet<_>>());
        }
    }

    #[tokio::test]
    async fn test_bucketed_enumeration_skips_failed_bucket() {
        struct FlakyLister;
        #[async_trait]
        impl NameLister for FlakyLister {
            async fn list_prefixed(&self, pattern: &str) -> ScanResult<Vec<String>> {
                if pattern.starts_with("as3") {
                    return Err(ScanError::ListUnavailable(pattern.to_string()));
                }
                Ok(vec![format!("{}x", pattern.trim_end_matches('*'))])
            }
        }
        let got = bucketed_enumerate(&FlakyLister, "as", 4, &policy()).await;
        // nine buckets answered, one failed and was dropped
        assert_eq!(got.len(), 9);
        assert!(!got.contains("as3x"));
    }

    // Builders run inside spawned handler tasks, so their futures must be
    // Send + 'static end to end. 构建任务必须能 spawn
    #[tokio::test]
    async fn test_bootstrap_runs_inside_spawned_task() {
        let (dir, cfg) = recipe_fixture().await;
        let out = tempfile::tempdir().unwrap();
        let out_path = out.path().to_path_buf();
        let summary = tokio::spawn(async move {
            bootstrap(&cfg, &out_path, &IndexPolicy::default()).await
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(summary.folders, 3);
        drop(dir);
    }

    async fn recipe_fixture() -> (tempfile::TempDir, SourceConfig) {
        let dir = tempfile::tempdir().unwrap();
        for (name, strategy) in [("as1000", "RGZF M0 CMP"), ("as1001", "RGBT PRE")] {
            let folder = dir.path().join(name);
            tokio::fs::create_dir_all(&folder).await.unwrap();
            tokio::fs::write(
                folder.join("strategy.ini"),
                format!("[HEAD]\nRev = 1\nStrategyName = '{}'\nDate = x\n", strategy),
            )
            .await
            .unwrap();
        }
        // folder without a parsable header still gets indexed
        tokio::fs::create_dir_all(dir.path().join("as1002")).await.unwrap();

        let cfg = SourceConfig {
            name: "EQ01".into(),
            address: "local".into(),
            port: 21,
            user: "u".into(),
            password: "p".into(),
            role: SourceRole::Recipe,
            group: "EQ01".into(),
            root: dir.path().to_string_lossy().to_string(),
            prefix: "as".into(),
            timeout: 5,
            op_deadline: 5.0,
            pool_size: 2,
            use_local_fs: true,
            encoding: String::new(),
            meta: Default::default(),
        };
        (dir, cfg)
    }

    #[tokio::test]
    async fn test_bootstrap_indexes_all_folders() {
        let (dir, cfg) = recipe_fixture().await;
        let out = tempfile::tempdir().unwrap();
        let summary = bootstrap(&cfg, out.path(), &policy()).await.unwrap();
        assert_eq!(summary.folders, 3);
        assert_eq!(summary.processed, 3);

        let doc: RecipeIndexDoc =
            load_json_or_default(&recipe_index_path(out.path(), "EQ01")).unwrap();
        assert_eq!(doc.folders["as1000"].strategy, "RGZF M0 CMP");
        assert_eq!(doc.folders["as1002"].strategy, "");
        // unparsed folder buckets under its own name
        assert!(doc.by_recipe.contains_key("as1002"));
        assert_eq!(doc.by_recipe["RGZF M0 CMP"].len(), 1);
        drop(dir);
    }

    #[tokio::test]
    async fn test_bootstrap_is_idempotent() {
        let (_dir, cfg) = recipe_fixture().await;
        let out = tempfile::tempdir().unwrap();
        bootstrap(&cfg, out.path(), &policy()).await.unwrap();
        let first: RecipeIndexDoc =
            load_json_or_default(&recipe_index_path(out.path(), "EQ01")).unwrap();
        bootstrap(&cfg, out.path(), &policy()).await.unwrap();
        let second: RecipeIndexDoc =
            load_json_or_default(&recipe_index_path(out.path(), "EQ01")).unwrap();
        assert_eq!(first.folders, second.folders);
        assert_eq!(first.by_recipe, second.by_recipe);
    }

    #[tokio::test]
    async fn test_update_adds_and_removes() {
        let (dir, cfg) = recipe_fixture().await;
        let out = tempfile::tempdir().unwrap();
        bootstrap(&cfg, out.path(), &policy()).await.unwrap();

        // one folder vanishes, one appears
        tokio::fs::remove_dir_all(dir.path().join("as1002")).await.unwrap();
        let added = dir.path().join("as2000");
        tokio::fs::create_dir_all(&added).await.unwrap();
        tokio::fs::write(
            added.join("strategy.ini"),
            "[HEAD]\nRev = 1\nStrategyName = 'NEW STRAT'\n",
        )
        .await
        .unwrap();

        let summary = update(&cfg, out.path(), &policy()).await.unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.removed, 1);
        assert_eq!(summary.folders, 3);

        let doc: RecipeIndexDoc =
            load_json_or_default(&recipe_index_path(out.path(), "EQ01")).unwrap();
        assert!(!doc.folders.contains_key("as1002"));
        assert!(!doc.by_recipe.contains_key("as1002"));
        assert!(doc.by_recipe.contains_key("NEW STRAT"));
    }
}
