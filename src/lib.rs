//! scanlist-backend / 量测数据索引与检索服务
//!
//! Indexes heterogeneous measurement sources (FTP servers and mounted
//! filesystems) into JSON documents and answers cache/direct searches over
//! them through a small HTTP API.

pub mod api;
pub mod config;
pub mod drivers;
pub mod error;
pub mod index;
pub mod models;
pub mod search;
pub mod utils;
