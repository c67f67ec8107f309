//! Index construction and persistence / 索引构建与持久化
//!
//! Two builders share one on-disk document store: [`recipe`] indexes flat
//! recipe namespaces, [`scan`] indexes deep dated measurement trees. Both are
//! idempotent; documents use sorted maps so a rebuild over unchanged data is
//! byte-identical.

pub mod recipe;
pub mod scan;
pub mod store;
