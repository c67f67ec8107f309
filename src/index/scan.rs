//! Scan tree index builder / 扫描目录树索引构建器
//!
//! Walks a deep `wafer/lot/film/date` tree breadth-first, classifies the
//! dated leaf directories and assembles two lookup maps: lot name to lot
//! paths, and lot path to date-leaf paths. Incremental update re-walks the
//! tree and diffs against the visited baseline, so it converges to the same
//! state as a fresh bootstrap.

use crate::config::IndexPolicy;
use crate::drivers::{create_adapter, SourceAdapter};
use crate::error::{ScanError, ScanResult};
use crate::index::store::{
    load_json_or_default, save_json, scan_paths, FilmsIndex, FilmsIndexDoc, FullDoc, LotsIndex,
    LotsIndexDoc, VisitedDoc,
};
use crate::models::SourceConfig;
use crate::search::matcher::is_date_name;
use crate::utils::{join_path, now_iso, path_basename, path_parent};
use futures::StreamExt;
use serde::Serialize;
use std::collections::{BTreeSet, VecDeque};
use std::path::Path;
use std::sync::Arc;

/// One classified date leaf / 一个已归类的日期叶目录
#[derive(Debug, Clone, PartialEq)]
pub struct DateEntry {
    /// Full path of the date leaf
    pub date_path: String,
    /// Film directory name (parent of the date leaf)
    pub film: String,
    /// Lot directory name
    pub lot: String,
    /// Wafer directory name
    pub wafer: String,
    /// Full path of the lot directory
    pub lot_path: String,
}

/// Outcome of one scan build/update call / 单次扫描构建结果摘要
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSummary {
    pub lots: usize,
    pub films: usize,
    pub wafers: usize,
    pub entries: usize,
    pub added_lots: usize,
    pub added_films: usize,
    pub deleted_lots: usize,
}

/// Classify one child of `parent` at depth `depth`. Returns a date entry when
/// the child is a date leaf deep enough to carry wafer/lot/film levels,
/// otherwise the child path to keep walking.
fn classify_child(parent: &str, name: &str, root: &str) -> Result<DateEntry, String> {
    let date_path = join_path(parent, name);
    if !is_date_name(name) {
        return Err(date_path);
    }
    // need wafer/lot/film above the leaf, all inside the scan root
    let film_path = parent;
    let lot_path = path_parent(film_path);
    let wafer_path = path_parent(lot_path);
    if lot_path.is_empty() || wafer_path.len() <= root.trim_end_matches('/').len() {
        return Err(date_path);
    }
    Ok(DateEntry {
        film: path_basename(film_path).to_string(),
        lot: path_basename(lot_path).to_string(),
        wafer: path_basename(wafer_path).to_string(),
        lot_path: lot_path.to_string(),
        date_path,
    })
}

/// Breadth-first discovery of all date leaves under the source root.
///
/// Each round lists one frontier batch concurrently; a branch that fails to
/// list is logged and dropped, a branch past the depth limit is abandoned.
/// Connection-level failures on the very first listing abort the walk.
pub async fn discover(
    cfg: &SourceConfig,
    adapter: Arc<dyn SourceAdapter>,
    policy: &IndexPolicy,
) -> ScanResult<Vec<DateEntry>> {
    let root = cfg.root.trim_end_matches('/').to_string();

    // fail loudly when the root itself cannot be listed
    let first = adapter.list_dirs(&root).await?;

    let mut entries: Vec<DateEntry> = Vec::new();
    let mut queue: VecDeque<(String, usize)> = VecDeque::new();
    for name in first {
        match classify_child(&root, &name, &root) {
            Ok(e) => entries.push(e),
            Err(child) => queue.push_back((child, 1)),
        }
    }

    let batch = policy.scan_max_workers.max(1) * 2;
    let mut listed = 1usize;
    while !queue.is_empty() {
        let round: Vec<(String, usize)> = {
            let take = queue.len().min(batch);
            queue.drain(..take).collect()
        };
        let results: Vec<(String, usize, ScanResult<Vec<String>>)> =
            futures::stream::iter(round.into_iter().map(|(path, depth)| {
                let adapter = adapter.clone();
                async move {
                    let res = adapter.list_dirs(&path).await;
                    (path, depth, res)
                }
            }))
            .buffer_unordered(policy.scan_max_workers.max(1))
            .collect()
            .await;

        for (path, depth, res) in results {
            listed += 1;
            if listed % policy.scan_progress_batch == 0 {
                tracing::info!(
                    "[scan] progress: {} dirs listed, {} leaves, {} queued",
                    listed,
                    entries.len(),
                    queue.len()
                );
            }
            let children = match res {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!("[scan] cannot list {}: {}", path, e);
                    continue;
                }
            };
            for name in children {
                match classify_child(&path, &name, &root) {
                    Ok(e) => entries.push(e),
                    Err(child) => {
                        if depth + 1 > policy.scan_max_depth {
                            tracing::warn!("[scan] depth limit, abandoning {}", child);
                        } else {
                            queue.push_back((child, depth + 1));
                        }
                    }
                }
            }
        }
    }

    tracing::info!("[scan] walk done: {} dirs listed, {} date leaves", listed, entries.len());
    Ok(entries)
}

/// Assemble the lookup maps from classified leaves. Pure. / 组装索引映射
pub fn assemble(entries: &[DateEntry]) -> (LotsIndex, FilmsIndex, BTreeSet<String>) {
    let mut lots = LotsIndex::new();
    let mut films = FilmsIndex::new();
    let mut wafers = BTreeSet::new();
    for e in entries {
        lots.entry(e.lot.clone())
            .or_default()
            .insert(e.lot_path.clone());
        films
            .entry(e.lot_path.clone())
            .or_default()
            .insert(e.date_path.clone());
        wafers.insert(path_parent(&e.lot_path).to_string());
    }
    (lots, films, wafers)
}

fn save_all(
    out_dir: &Path,
    cfg: &SourceConfig,
    lots: LotsIndex,
    films: FilmsIndex,
    wafers: &BTreeSet<String>,
    visited: VisitedDoc,
    generated_at: Option<String>,
    updated_at: Option<String>,
) -> ScanResult<()> {
    let paths = scan_paths(out_dir, &cfg.name);
    save_json(
        &paths.full,
        &FullDoc {
            server: cfg.name.clone(),
            scan_root: cfg.root.clone(),
            generated_at,
            updated_at,
            wafer_paths: wafers.iter().cloned().collect(),
        },
    )?;
    save_json(
        &paths.lots_index,
        &LotsIndexDoc {
            server: cfg.name.clone(),
            lots_index: lots,
        },
    )?;
    save_json(
        &paths.films_index,
        &FilmsIndexDoc {
            server: cfg.name.clone(),
            mode: "map".to_string(),
            films_index: films,
        },
    )?;
    save_json(&paths.visited, &visited)?;
    Ok(())
}

/// Full rebuild of one scan source. / 全量构建
pub async fn bootstrap(
    cfg: &SourceConfig,
    out_dir: &Path,
    policy: &IndexPolicy,
) -> ScanResult<ScanSummary> {
    tracing::info!("=== [SCAN] BOOTSTRAP {} ({}) root={} ===", cfg.name, cfg.address, cfg.root);
    let adapter = create_adapter(cfg);
    let entries = discover(cfg, adapter.clone(), policy).await;
    adapter.shutdown().await;
    let entries = entries?;
    let (lots, films, wafers) = assemble(&entries);

    let visited = VisitedDoc {
        server: cfg.name.clone(),
        last_bootstrap: Some(now_iso()),
        last_update: None,
        visited_lot_paths: lots.values().flatten().cloned().collect(),
    };
    let summary = ScanSummary {
        lots: lots.len(),
        films: films.values().map(BTreeSet::len).sum(),
        wafers: wafers.len(),
        entries: entries.len(),
        ..Default::default()
    };
    save_all(out_dir, cfg, lots, films, &wafers, visited, Some(now_iso()), None)?;

    tracing::info!(
        "[scan] bootstrap done: {} lots, {} date leaves, {} wafers",
        summary.lots,
        summary.films,
        summary.wafers
    );
    Ok(summary)
}

/// Pure delta application: fresh walk result against the stored baseline.
/// Returns the new maps plus added/deleted counts. / 增量差分
pub fn apply_update(
    old_visited: &BTreeSet<String>,
    old_films: &FilmsIndex,
    entries: &[DateEntry],
) -> (LotsIndex, FilmsIndex, BTreeSet<String>, ScanSummary) {
    let (lots, films, wafers) = assemble(entries);

    // lot paths are the delta unit; lot names dedupe across wafers
    let new_visited: BTreeSet<String> = lots.values().flatten().cloned().collect();
    let added_lots = new_visited.difference(old_visited).count();
    let deleted_lots = old_visited.difference(&new_visited).count();
    // films delta counts newly seen date leaves, new ones under known lot
    // paths included
    let added_films: usize = films
        .iter()
        .map(|(lot_path, dates)| match old_films.get(lot_path) {
            Some(old) => dates.difference(old).count(),
            None => dates.len(),
        })
        .sum();

    let summary = ScanSummary {
        lots: lots.len(),
        films: films.values().map(BTreeSet::len).sum(),
        wafers: wafers.len(),
        entries: entries.len(),
        added_lots,
        added_films,
        deleted_lots,
    };
    (lots, films, wafers, summary)
}

/// Incremental update. Without a baseline it falls back to bootstrap; a stale
/// or partial baseline never corrupts the result because the fresh walk is
/// authoritative. / 增量更新
pub async fn update(
    cfg: &SourceConfig,
    out_dir: &Path,
    policy: &IndexPolicy,
) -> ScanResult<ScanSummary> {
    let paths = scan_paths(out_dir, &cfg.name);
    let old: VisitedDoc = load_json_or_default(&paths.visited)?;
    if old.visited_lot_paths.is_empty() && old.last_bootstrap.is_none() {
        tracing::info!("[scan] no baseline for {}, running bootstrap", cfg.name);
        return bootstrap(cfg, out_dir, policy).await;
    }

    tracing::info!("=== [SCAN] UPDATE {} ({}) root={} ===", cfg.name, cfg.address, cfg.root);
    let old_films_doc: FilmsIndexDoc = load_json_or_default(&paths.films_index)?;
    let old_full: FullDoc = load_json_or_default(&paths.full)?;

    let adapter = create_adapter(cfg);
    let entries = discover(cfg, adapter.clone(), policy).await;
    adapter.shutdown().await;
    let entries = entries?;
    let (lots, films, wafers, summary) =
        apply_update(&old.visited_lot_paths, &old_films_doc.films_index, &entries);

    let visited = VisitedDoc {
        server: cfg.name.clone(),
        last_bootstrap: old.last_bootstrap.clone(),
        last_update: Some(now_iso()),
        visited_lot_paths: lots.values().flatten().cloned().collect(),
    };
    save_all(
        out_dir,
        cfg,
        lots,
        films,
        &wafers,
        visited,
        old_full.generated_at.clone(),
        Some(now_iso()),
    )?;

    tracing::info!(
        "[scan] update done: {} lot paths (+{} / -{})",
        summary.films,
        summary.added_lots,
        summary.deleted_lots
    );
    Ok(summary)
}

/// Run bootstrap or update depending on whether a baseline exists.
pub async fn build(
    cfg: &SourceConfig,
    out_dir: &Path,
    policy: &IndexPolicy,
    incremental: bool,
) -> ScanResult<ScanSummary> {
    if incremental {
        update(cfg, out_dir, policy).await
    } else {
        bootstrap(cfg, out_dir, policy).await
    }
}

/// Summary line for the status endpoint, read straight off disk.
#[derive(Debug, Clone, Serialize)]
pub struct ScanStatus {
    pub server: String,
    pub last_bootstrap: Option<String>,
    pub last_update: Option<String>,
    pub indexed_lots: usize,
    pub indexed_films: usize,
    pub visited_lot_paths: usize,
    pub wafers: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notices: Vec<String>,
}

pub fn scan_status(cfg: &SourceConfig, out_dir: &Path) -> ScanResult<ScanStatus> {
    use crate::index::store::check_consistency;
    let paths = scan_paths(out_dir, &cfg.name);
    let lots: LotsIndexDoc = load_json_or_default(&paths.lots_index)?;
    let films: FilmsIndexDoc = load_json_or_default(&paths.films_index)?;
    let full: FullDoc = load_json_or_default(&paths.full)?;
    let visited: VisitedDoc = load_json_or_default(&paths.visited)?;

    let mut notices = Vec::new();
    if films.mode != "map" {
        return Err(ScanError::IndexInconsistency(format!(
            "films index for {} has mode '{}', expected 'map'",
            cfg.name, films.mode
        )));
    }
    notices.extend(check_consistency(&lots.lots_index, &films.films_index));

    Ok(ScanStatus {
        server: cfg.name.clone(),
        last_bootstrap: visited.last_bootstrap,
        last_update: visited.last_update,
        indexed_lots: lots.lots_index.len(),
        indexed_films: films.films_index.values().map(BTreeSet::len).sum(),
        visited_lot_paths: visited.visited_lot_paths.len(),
        wafers: full.wafer_paths.len(),
        notices,
    })
}
