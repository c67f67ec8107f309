//! Query engine / 查询引擎
//!
//! Cache search answers entirely from the on-disk index documents. Direct
//! search uses the same documents only to narrow candidates, then re-lists
//! those branches live so very recent changes show up. Both return the same
//! result envelope; index problems surface as notices, never as panics.

use crate::config::IndexPolicy;
use crate::drivers::create_adapter;
use crate::error::ScanResult;
use crate::index::store::{
    check_consistency, load_json_or_default, recipe_index_path, scan_paths, FilmsIndexDoc,
    LotsIndexDoc, RecipeIndexDoc,
};
use crate::models::{Hit, SearchFilters, SourceConfig, SourceRole};
use crate::search::matcher::{
    is_date_name, lot_match, match_name, match_text, normalize_spaces, parse_scan_path,
    validate_regex_patterns,
};
use crate::utils::{join_path, now_iso, path_basename, path_parent};
use futures::StreamExt;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;

/// Search response envelope / 搜索响应
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub mode: String,
    pub kind: String,
    pub hits: Vec<Hit>,
    pub count: usize,
    pub generated_at: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notices: Vec<String>,
}

fn normalize_role(r: &str) -> &str {
    // historic alias kept for older clients
    if r == "film" {
        "recipe"
    } else {
        r
    }
}

fn source_in_scope(cfg: &SourceConfig, filters: &SearchFilters) -> bool {
    if !filters.servers.is_empty()
        && !filters
            .servers
            .iter()
            .any(|s| s.eq_ignore_ascii_case(&cfg.name) || s.eq_ignore_ascii_case(&cfg.group))
    {
        return false;
    }
    if !filters.roles.is_empty()
        && !filters
            .roles
            .iter()
            .any(|r| normalize_role(r) == cfg.role.as_str())
    {
        return false;
    }
    true
}

/// Envelope kind, derived purely from the requested roles / 结果类型
pub fn decide_result_kind(roles: &[String]) -> String {
    let mut saw_recipe = false;
    let mut saw_scan = false;
    for r in roles {
        match normalize_role(r) {
            "recipe" => saw_recipe = true,
            "scan" => saw_scan = true,
            _ => return "mixed".to_string(),
        }
    }
    match (saw_recipe, saw_scan) {
        (true, false) => "recipe".to_string(),
        (false, true) => "scan".to_string(),
        _ => "mixed".to_string(),
    }
}

fn regex_notices(filters: &SearchFilters) -> Vec<String> {
    if !filters.regex {
        return Vec::new();
    }
    let mut all: Vec<String> = Vec::new();
    all.extend_from_slice(&filters.wafer);
    all.extend_from_slice(&filters.lot);
    all.extend_from_slice(&filters.film);
    validate_regex_patterns(&all, filters.case_sensitive)
        .into_iter()
        .map(|p| format!("Invalid regex pattern: '{}'", p))
        .collect()
}

/// Separator-insensitive canonical form for recipe linkage comparison.
fn link_canon(s: &str) -> String {
    normalize_spaces(&s.replace(['_', '-'], " ")).to_lowercase()
}

/// Recipe folders linked to one film name / 单个膜层的配方联动
#[derive(Debug, Clone, Default)]
pub struct RecipeLink {
    pub name: Option<String>,
    pub paths: Vec<String>,
    pub primary: Option<String>,
    pub server: Option<String>,
}

/// Find recipe folders whose strategy name contains the film name after
/// separator normalization. First matching source wins the attribution
/// fields; paths union across all sources.
pub fn link_recipe_for_film(film: &str, recipe_docs: &[(String, RecipeIndexDoc)]) -> RecipeLink {
    let film_c = link_canon(film);
    let mut link = RecipeLink::default();
    if film_c.is_empty() {
        return link;
    }
    let mut seen: BTreeSet<String> = BTreeSet::new();
    for (server, doc) in recipe_docs {
        for (key, paths) in &doc.by_recipe {
            let key_c = link_canon(key);
            if key_c.is_empty() || !key_c.contains(&film_c) {
                continue;
            }
            if link.name.is_none() {
                link.name = Some(key.clone());
                link.server = Some(server.clone());
            }
            for p in paths {
                if seen.insert(p.clone()) {
                    link.paths.push(p.clone());
                }
            }
        }
    }
    link.primary = link.paths.first().cloned();
    link
}

fn attach_link(hit: &mut Hit, link: &RecipeLink) {
    if link.paths.is_empty() {
        return;
    }
    hit.recipe_linked = true;
    hit.recipe_name = link.name.clone();
    hit.recipe_paths = Some(link.paths.clone());
    hit.recipe_primary = link.primary.clone();
    hit.recipe_server = link.server.clone();
}

fn scan_hit(cfg: &SourceConfig, path: &str, level: &str) -> Hit {
    let parts = parse_scan_path(path);
    Hit {
        server: cfg.name.clone(),
        role: cfg.role.as_str().to_string(),
        level: level.to_string(),
        path: path.to_string(),
        kind: Some("scan".to_string()),
        wafer: parts.wafer,
        lot: parts.lot,
        film: if level == "film" {
            Some(path_basename(path).to_string())
        } else {
            parts.film
        },
        date: parts.date,
        recipe_linked: false,
        recipe_name: None,
        recipe_paths: None,
        recipe_primary: None,
        recipe_server: None,
    }
}

fn load_recipe_docs(sources: &[SourceConfig], out_dir: &Path) -> Vec<(String, RecipeIndexDoc)> {
    let mut docs = Vec::new();
    for cfg in sources {
        if cfg.role != SourceRole::Recipe {
            continue;
        }
        match load_json_or_default::<RecipeIndexDoc>(&recipe_index_path(out_dir, &cfg.name)) {
            Ok(doc) if !doc.by_recipe.is_empty() => docs.push((cfg.name.clone(), doc)),
            Ok(_) => {}
            Err(e) => tracing::warn!("[search] recipe index for {} unreadable: {}", cfg.name, e),
        }
    }
    docs
}

/// Lot paths passing the wafer and lot filters, straight from the documents.
fn candidate_lot_paths(
    lots: &LotsIndexDoc,
    filters: &SearchFilters,
) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for (lot_name, lot_paths) in &lots.lots_index {
        for lot_path in lot_paths {
            if !lot_match(
                lot_name,
                lot_path,
                &filters.lot,
                filters.exact,
                filters.regex,
                filters.case_sensitive,
            ) {
                continue;
            }
            let wafer_path = path_parent(lot_path);
            if !match_name(
                path_basename(wafer_path),
                wafer_path,
                &filters.wafer,
                filters.exact,
                filters.regex,
                filters.case_sensitive,
            ) {
                continue;
            }
            out.push((lot_name.clone(), lot_path.clone()));
        }
    }
    out
}

/// Direct mode re-lists every candidate live, so a filter must narrow the
/// set first: with neither lot, wafer nor film patterns there are no
/// candidates. Film-only queries narrow through the films document instead
/// of re-listing every lot. / 无过滤条件时不做全量实时遍历
fn direct_candidate_lot_paths(
    lots: &LotsIndexDoc,
    films: &FilmsIndexDoc,
    filters: &SearchFilters,
) -> Vec<(String, String)> {
    if filters.lot.is_empty() && filters.wafer.is_empty() && filters.film.is_empty() {
        return Vec::new();
    }
    candidate_lot_paths(lots, filters)
        .into_iter()
        .filter(|(_, lot_path)| {
            if filters.film.is_empty() {
                return true;
            }
            films.films_index.get(lot_path).is_some_and(|dates| {
                dates.iter().any(|date_path| {
                    let film_name = parse_scan_path(date_path).film.unwrap_or_default();
                    match_name(
                        &film_name,
                        date_path,
                        &filters.film,
                        filters.exact,
                        filters.regex,
                        filters.case_sensitive,
                    )
                })
            })
        })
        .collect()
}

fn search_scan_cache(
    cfg: &SourceConfig,
    filters: &SearchFilters,
    out_dir: &Path,
    recipe_docs: &[(String, RecipeIndexDoc)],
    hits: &mut Vec<Hit>,
    notices: &mut Vec<String>,
) -> ScanResult<()> {
    let paths = scan_paths(out_dir, &cfg.name);
    let lots: LotsIndexDoc = load_json_or_default(&paths.lots_index)?;
    let films: FilmsIndexDoc = load_json_or_default(&paths.films_index)?;
    if films.mode != "map" {
        notices.push(format!(
            "films index for {} has unsupported mode '{}', source skipped",
            cfg.name, films.mode
        ));
        return Ok(());
    }
    for n in check_consistency(&lots.lots_index, &films.films_index) {
        notices.push(format!("{}: {}", cfg.name, n));
    }

    for (_lot_name, lot_path) in candidate_lot_paths(&lots, filters) {
        let Some(date_paths) = films.films_index.get(&lot_path) else {
            continue;
        };
        for date_path in date_paths {
            let film_name = parse_scan_path(date_path).film.unwrap_or_default();
            if !match_name(
                &film_name,
                date_path,
                &filters.film,
                filters.exact,
                filters.regex,
                filters.case_sensitive,
            ) {
                continue;
            }
            let mut hit = scan_hit(cfg, date_path, "date");
            if filters.link_recipe {
                attach_link(&mut hit, &link_recipe_for_film(&film_name, recipe_docs));
            }
            hits.push(hit);
        }
    }
    Ok(())
}

fn search_recipe_cache(
    cfg: &SourceConfig,
    filters: &SearchFilters,
    out_dir: &Path,
    hits: &mut Vec<Hit>,
    notices: &mut Vec<String>,
) -> ScanResult<()> {
    if filters.film.is_empty() {
        notices.push(format!(
            "recipe source {} needs a film filter, skipped",
            cfg.name
        ));
        return Ok(());
    }
    let doc: RecipeIndexDoc = load_json_or_default(&recipe_index_path(out_dir, &cfg.name))?;
    for (key, paths) in &doc.by_recipe {
        if !match_text(
            Some(key),
            &filters.film,
            filters.exact,
            filters.regex,
            filters.case_sensitive,
        ) {
            continue;
        }
        for p in paths {
            hits.push(Hit {
                server: cfg.name.clone(),
                role: cfg.role.as_str().to_string(),
                level: "folder".to_string(),
                path: p.clone(),
                kind: Some("recipe".to_string()),
                wafer: None,
                lot: None,
                film: None,
                date: None,
                recipe_linked: false,
                recipe_name: Some(key.clone()),
                recipe_paths: None,
                recipe_primary: None,
                recipe_server: None,
            });
        }
    }
    Ok(())
}

/// Cache-mode search over every in-scope source. / 缓存模式搜索
pub async fn search_cache(
    sources: &[SourceConfig],
    filters: SearchFilters,
    out_dir: &Path,
) -> ScanResult<SearchResult> {
    let filters = filters.prepared();
    let mut notices = regex_notices(&filters);
    let scoped: Vec<&SourceConfig> = sources
        .iter()
        .filter(|c| source_in_scope(c, &filters))
        .collect();
    let kind = decide_result_kind(&filters.roles);
    // linkage may reach recipe sources outside the role scope
    let recipe_docs = if filters.link_recipe {
        load_recipe_docs(sources, out_dir)
    } else {
        Vec::new()
    };

    let mut hits = Vec::new();
    for cfg in &scoped {
        let res = match cfg.role {
            SourceRole::Scan => {
                search_scan_cache(cfg, &filters, out_dir, &recipe_docs, &mut hits, &mut notices)
            }
            SourceRole::Recipe => {
                search_recipe_cache(cfg, &filters, out_dir, &mut hits, &mut notices)
            }
        };
        if let Err(e) = res {
            tracing::warn!("[search] source {} failed: {}", cfg.name, e);
            notices.push(format!("{}: {}", cfg.name, e));
        }
    }

    let count = hits.len();
    Ok(SearchResult {
        mode: "cache".to_string(),
        kind,
        hits,
        count,
        generated_at: now_iso(),
        notices,
    })
}

/// Live hits for one candidate lot path: list its film dirs, then their date
/// children. A film dir with no date children yields a film-level hit.
async fn list_lot_live(
    cfg: &SourceConfig,
    adapter: std::sync::Arc<dyn crate::drivers::SourceAdapter>,
    lot_path: String,
    filters: &SearchFilters,
) -> ScanResult<Vec<Hit>> {
    let mut hits = Vec::new();
    for film_name in adapter.list_dirs(&lot_path).await? {
        let film_path = join_path(&lot_path, &film_name);
        if !match_name(
            &film_name,
            &film_path,
            &filters.film,
            filters.exact,
            filters.regex,
            filters.case_sensitive,
        ) {
            continue;
        }
        let children = adapter.list_dirs(&film_path).await?;
        let mut dated = false;
        for child in &children {
            if is_date_name(child) {
                dated = true;
                hits.push(scan_hit(cfg, &join_path(&film_path, child), "date"));
            }
        }
        if !dated {
            hits.push(scan_hit(cfg, &film_path, "film"));
        }
    }
    Ok(hits)
}

/// Direct-mode search: index-narrowed candidates, re-listed live.
/// / 直连模式搜索
pub async fn search_direct(
    sources: &[SourceConfig],
    filters: SearchFilters,
    out_dir: &Path,
    policy: &IndexPolicy,
) -> ScanResult<SearchResult> {
    let filters = filters.prepared();
    let mut notices = regex_notices(&filters);
    let scoped: Vec<&SourceConfig> = sources
        .iter()
        .filter(|c| source_in_scope(c, &filters))
        .collect();
    let kind = decide_result_kind(&filters.roles);
    let recipe_docs = if filters.link_recipe {
        load_recipe_docs(sources, out_dir)
    } else {
        Vec::new()
    };

    let mut hits = Vec::new();
    for cfg in &scoped {
        match cfg.role {
            // recipe indexes refresh with the folder listing, cache is live enough
            SourceRole::Recipe => {
                if let Err(e) =
                    search_recipe_cache(cfg, &filters, out_dir, &mut hits, &mut notices)
                {
                    notices.push(format!("{}: {}", cfg.name, e));
                }
            }
            SourceRole::Scan => {
                let paths = scan_paths(out_dir, &cfg.name);
                let lots: LotsIndexDoc = match load_json_or_default(&paths.lots_index) {
                    Ok(doc) => doc,
                    Err(e) => {
                        notices.push(format!("{}: {}", cfg.name, e));
                        continue;
                    }
                };
                let films: FilmsIndexDoc = match load_json_or_default(&paths.films_index) {
                    Ok(doc) => doc,
                    Err(e) => {
                        notices.push(format!("{}: {}", cfg.name, e));
                        continue;
                    }
                };
                let candidates = direct_candidate_lot_paths(&lots, &films, &filters);
                let adapter = create_adapter(cfg);
                let results: Vec<(String, ScanResult<Vec<Hit>>)> =
                    futures::stream::iter(candidates.into_iter().map(|(_, lot_path)| {
                        let adapter = adapter.clone();
                        let filters = &filters;
                        async move {
                            let res =
                                list_lot_live(cfg, adapter, lot_path.clone(), filters).await;
                            (lot_path, res)
                        }
                    }))
                    .buffer_unordered(policy.scan_max_workers.max(1))
                    .collect()
                    .await;
                adapter.shutdown().await;
                for (lot_path, res) in results {
                    match res {
                        Ok(mut batch) => {
                            if filters.link_recipe {
                                for hit in &mut batch {
                                    if let Some(film) = hit.film.clone() {
                                        attach_link(
                                            hit,
                                            &link_recipe_for_film(&film, &recipe_docs),
                                        );
                                    }
                                }
                            }
                            hits.extend(batch);
                        }
                        Err(e) => {
                            tracing::warn!("[search] live listing {} failed: {}", lot_path, e);
                            notices.push(format!("{}: {}: {}", cfg.name, lot_path, e));
                        }
                    }
                }
            }
        }
    }

    let count = hits.len();
    Ok(SearchResult {
        mode: "direct".to_string(),
        kind,
        hits,
        count,
        generated_at: now_iso(),
        notices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::store::{save_json, RecipeFolder, RecipeStats};
    use std::collections::BTreeMap;

    fn scan_source(name: &str) -> SourceConfig {
        SourceConfig {
            name: name.into(),
            address: "10.0.0.1".into(),
            port: 21,
            user: "u".into(),
            password: "p".into(),
            role: SourceRole::Scan,
            group: name.into(),
            root: "/scan".into(),
            prefix: "as".into(),
            timeout: 5,
            op_deadline: 5.0,
            pool_size: 2,
            use_local_fs: false,
            encoding: String::new(),
            meta: Default::default(),
        }
    }

    fn recipe_source(name: &str) -> SourceConfig {
        SourceConfig {
            role: SourceRole::Recipe,
            ..scan_source(name)
        }
    }

    fn write_scan_docs(out: &Path, server: &str) {
        let paths = scan_paths(out, server);
        save_json(
            &paths.lots_index,
            &serde_json::json!({ "server": server, "lots_index": { "L1": ["/scan/A/L1"] } }),
        )
        .unwrap();
        save_json(
            &paths.films_index,
            &serde_json::json!({
                "server": server, "mode": "map",
                "films_index": { "/scan/A/L1": ["/scan/A/L1/F1/20240101"] }
            }),
        )
        .unwrap();
    }

    fn write_recipe_doc(out: &Path, server: &str, key: &str, folder: &str) {
        let mut folders = BTreeMap::new();
        folders.insert(
            folder.to_string(),
            RecipeFolder {
                path: format!("/Film List/{}", folder),
                strategy: key.to_string(),
            },
        );
        let mut by_recipe = BTreeMap::new();
        by_recipe.insert(key.to_string(), vec![format!("/Film List/{}", folder)]);
        let doc = RecipeIndexDoc {
            server: server.to_string(),
            recipes_root: Some("/Film List".into()),
            generated_at: None,
            updated_at: None,
            stats: RecipeStats {
                folders: 1,
                recipes: 1,
            },
            folders,
            by_recipe,
        };
        save_json(&recipe_index_path(out, server), &doc).unwrap();
    }

    #[tokio::test]
    async fn test_cache_lot_search_scenario() {
        let out = tempfile::tempdir().unwrap();
        write_scan_docs(out.path(), "SC01");
        let sources = vec![scan_source("SC01")];
        let filters = SearchFilters {
            lot: vec!["L1".into()],
            roles: vec!["scan".into()],
            ..Default::default()
        };
        let res = search_cache(&sources, filters, out.path()).await.unwrap();
        assert_eq!(res.mode, "cache");
        assert_eq!(res.kind, "scan");
        assert_eq!(res.count, 1);
        let hit = &res.hits[0];
        assert_eq!(hit.path, "/scan/A/L1/F1/20240101");
        assert_eq!(hit.lot.as_deref(), Some("L1"));
        assert_eq!(hit.film.as_deref(), Some("F1"));
        assert_eq!(hit.date.as_deref(), Some("20240101"));
        assert_eq!(hit.wafer.as_deref(), Some("A"));
        assert!(res.notices.is_empty());
    }

    #[tokio::test]
    async fn test_cache_invalid_regex_is_notice_not_panic() {
        let out = tempfile::tempdir().unwrap();
        write_scan_docs(out.path(), "SC01");
        let sources = vec![scan_source("SC01")];
        let filters = SearchFilters {
            lot: vec!["[".into()],
            regex: true,
            ..Default::default()
        };
        let res = search_cache(&sources, filters, out.path()).await.unwrap();
        assert_eq!(res.count, 0);
        assert_eq!(res.notices, vec!["Invalid regex pattern: '['".to_string()]);
    }

    #[tokio::test]
    async fn test_cache_mode_mismatch_skips_source() {
        let out = tempfile::tempdir().unwrap();
        let paths = scan_paths(out.path(), "SC01");
        save_json(
            &paths.lots_index,
            &serde_json::json!({ "server": "SC01", "lots_index": { "L1": ["/scan/A/L1"] } }),
        )
        .unwrap();
        save_json(
            &paths.films_index,
            &serde_json::json!({ "server": "SC01", "mode": "list", "films_index": {} }),
        )
        .unwrap();
        let sources = vec![scan_source("SC01")];
        let res = search_cache(&sources, SearchFilters::default(), out.path())
            .await
            .unwrap();
        assert_eq!(res.count, 0);
        assert_eq!(res.notices.len(), 1);
        assert!(res.notices[0].contains("unsupported mode"));
    }

    #[tokio::test]
    async fn test_cache_consistency_notice_surfaces() {
        let out = tempfile::tempdir().unwrap();
        let paths = scan_paths(out.path(), "SC01");
        save_json(
            &paths.lots_index,
            &serde_json::json!({ "server": "SC01", "lots_index": {} }),
        )
        .unwrap();
        save_json(
            &paths.films_index,
            &serde_json::json!({
                "server": "SC01", "mode": "map",
                "films_index": { "/scan/A/ORPHAN": ["/scan/A/ORPHAN/F1/20240101"] }
            }),
        )
        .unwrap();
        let sources = vec![scan_source("SC01")];
        let res = search_cache(&sources, SearchFilters::default(), out.path())
            .await
            .unwrap();
        assert_eq!(res.notices.len(), 1);
        assert!(res.notices[0].contains("ORPHAN"));
    }

    #[tokio::test]
    async fn test_recipe_cache_search_and_kind() {
        let out = tempfile::tempdir().unwrap();
        write_recipe_doc(out.path(), "EQ01", "RGZF M0 CMP", "as1000");
        let sources = vec![recipe_source("EQ01")];
        let filters = SearchFilters {
            film: vec!["rgzf".into()],
            roles: vec!["film".into()],
            ..Default::default()
        };
        let res = search_cache(&sources, filters, out.path()).await.unwrap();
        // the legacy "film" role name classifies as a recipe query
        assert_eq!(res.kind, "recipe");
        assert_eq!(res.count, 1);
        assert_eq!(res.hits[0].level, "folder");
        assert_eq!(res.hits[0].path, "/Film List/as1000");
        assert_eq!(res.hits[0].recipe_name.as_deref(), Some("RGZF M0 CMP"));
    }

    #[tokio::test]
    async fn test_recipe_source_without_film_filter_is_skipped() {
        let out = tempfile::tempdir().unwrap();
        write_recipe_doc(out.path(), "EQ01", "RGZF M0 CMP", "as1000");
        let sources = vec![recipe_source("EQ01")];
        let res = search_cache(&sources, SearchFilters::default(), out.path())
            .await
            .unwrap();
        assert_eq!(res.count, 0);
        assert!(res.notices[0].contains("needs a film filter"));
    }

    #[tokio::test]
    async fn test_link_recipe_attaches_across_separators() {
        let out = tempfile::tempdir().unwrap();
        write_scan_docs(out.path(), "SC01");
        let paths = scan_paths(out.path(), "SC01");
        save_json(
            &paths.films_index,
            &serde_json::json!({
                "server": "SC01", "mode": "map",
                "films_index": { "/scan/A/L1": ["/scan/A/L1/RGZF_M0_CMP/20240101"] }
            }),
        )
        .unwrap();
        write_recipe_doc(out.path(), "EQ01", "RGZF M0 CMP", "as1000");
        let sources = vec![scan_source("SC01"), recipe_source("EQ01")];
        let filters = SearchFilters {
            lot: vec!["L1".into()],
            roles: vec!["scan".into()],
            link_recipe: true,
            ..Default::default()
        };
        let res = search_cache(&sources, filters, out.path()).await.unwrap();
        assert_eq!(res.count, 1);
        let hit = &res.hits[0];
        assert!(hit.recipe_linked);
        assert_eq!(hit.recipe_name.as_deref(), Some("RGZF M0 CMP"));
        assert_eq!(hit.recipe_server.as_deref(), Some("EQ01"));
        assert_eq!(
            hit.recipe_primary.as_deref(),
            Some("/Film List/as1000")
        );
    }

    #[test]
    fn test_link_matches_film_inside_key_only() {
        let mut by_recipe = BTreeMap::new();
        by_recipe.insert("RGZF M0 CMP REV2".to_string(), vec!["/Film List/as1000".into()]);
        by_recipe.insert("RGZF".to_string(), vec!["/Film List/as1001".into()]);
        let doc = RecipeIndexDoc {
            server: "EQ01".into(),
            by_recipe,
            ..Default::default()
        };
        let docs = vec![("EQ01".to_string(), doc)];

        // the film name must appear inside the strategy key
        let link = link_recipe_for_film("RGZF_M0_CMP", &docs);
        assert_eq!(link.paths, vec!["/Film List/as1000".to_string()]);
        assert_eq!(link.name.as_deref(), Some("RGZF M0 CMP REV2"));

        // a key shorter than the film never links the other way round
        let link = link_recipe_for_film("RGZF_M0_CMP_X9_LONG", &docs);
        assert!(link.paths.is_empty());
    }

    #[tokio::test]
    async fn test_server_and_role_scoping() {
        let out = tempfile::tempdir().unwrap();
        write_scan_docs(out.path(), "SC01");
        write_scan_docs(out.path(), "SC02");
        let sources = vec![scan_source("SC01"), scan_source("SC02")];
        let filters = SearchFilters {
            servers: vec!["SC02".into()],
            lot: vec!["L1".into()],
            ..Default::default()
        };
        let res = search_cache(&sources, filters, out.path()).await.unwrap();
        assert_eq!(res.count, 1);
        assert_eq!(res.hits[0].server, "SC02");
    }

    #[test]
    fn test_decide_result_kind() {
        let roles = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(decide_result_kind(&roles(&["recipe"])), "recipe");
        assert_eq!(decide_result_kind(&roles(&["film"])), "recipe");
        assert_eq!(decide_result_kind(&roles(&["scan"])), "scan");
        assert_eq!(decide_result_kind(&roles(&["scan", "film"])), "mixed");
        assert_eq!(decide_result_kind(&roles(&[])), "mixed");
    }

    #[tokio::test]
    async fn test_direct_search_reflects_live_tree() {
        // local tree with indices built from it, then a date dir added on disk
        let tree = tempfile::tempdir().unwrap();
        let root = tree.path();
        tokio::fs::create_dir_all(root.join("class1/A01/LOT1/F1/20240101"))
            .await
            .unwrap();
        let mut cfg = scan_source("SC01");
        cfg.use_local_fs = true;
        cfg.root = root.to_string_lossy().to_string();
        let out = tempfile::tempdir().unwrap();
        crate::index::scan::bootstrap(&cfg, out.path(), &IndexPolicy::default())
            .await
            .unwrap();

        tokio::fs::create_dir_all(root.join("class1/A01/LOT1/F1/20240202"))
            .await
            .unwrap();

        let sources = vec![cfg];
        let filters = SearchFilters {
            lot: vec!["LOT1".into()],
            ..Default::default()
        };
        let cached = search_cache(&sources, filters.clone(), out.path())
            .await
            .unwrap();
        assert_eq!(cached.count, 1);

        let live = search_direct(&sources, filters, out.path(), &IndexPolicy::default())
            .await
            .unwrap();
        assert_eq!(live.mode, "direct");
        assert_eq!(live.count, 2);
        let mut dates: Vec<_> = live.hits.iter().filter_map(|h| h.date.clone()).collect();
        dates.sort();
        assert_eq!(dates, vec!["20240101", "20240202"]);
    }

    #[tokio::test]
    async fn test_direct_search_without_filters_returns_nothing() {
        let tree = tempfile::tempdir().unwrap();
        let root = tree.path();
        tokio::fs::create_dir_all(root.join("class1/A01/LOT1/F1/20240101"))
            .await
            .unwrap();
        let mut cfg = scan_source("SC01");
        cfg.use_local_fs = true;
        cfg.root = root.to_string_lossy().to_string();
        let out = tempfile::tempdir().unwrap();
        crate::index::scan::bootstrap(&cfg, out.path(), &IndexPolicy::default())
            .await
            .unwrap();

        let sources = vec![cfg];
        let live = search_direct(
            &sources,
            SearchFilters::default(),
            out.path(),
            &IndexPolicy::default(),
        )
        .await
        .unwrap();
        assert_eq!(live.count, 0);
    }

    #[test]
    fn test_direct_candidates_narrowed_by_film_filter() {
        let mut lots = LotsIndexDoc::default();
        lots.lots_index
            .entry("L1".into())
            .or_default()
            .insert("/scan/A/L1".into());
        lots.lots_index
            .entry("L2".into())
            .or_default()
            .insert("/scan/A/L2".into());
        let mut films = FilmsIndexDoc::default();
        films
            .films_index
            .entry("/scan/A/L1".into())
            .or_default()
            .insert("/scan/A/L1/RGZF_M0/20240101".into());
        films
            .films_index
            .entry("/scan/A/L2".into())
            .or_default()
            .insert("/scan/A/L2/RGBT_PRE/20240101".into());
        let filters = SearchFilters {
            film: vec!["RGZF".into()],
            ..Default::default()
        };
        // only the lot that actually carries a matching film is re-listed
        let got = direct_candidate_lot_paths(&lots, &films, &filters);
        assert_eq!(got, vec![("L1".to_string(), "/scan/A/L1".to_string())]);
    }
}
