//! Search across indexed sources / 跨数据源搜索
//!
//! [`matcher`] holds the pure matching primitives, [`engine`] drives the two
//! query modes: cache (index documents only) and direct (live re-listing of
//! index-derived candidates).

pub mod engine;
pub mod matcher;
