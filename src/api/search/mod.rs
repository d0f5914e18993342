//! Search and pipeline admin handlers / 搜索与管道管理接口

pub mod admin;
pub mod query;
pub mod types;

pub use admin::*;
pub use query::*;
