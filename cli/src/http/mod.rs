//! HTTP服务器模块 - 暴露任务提交、状态查询与结果获取API

pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;
pub mod state;
pub mod validation;

pub use models::*;
pub use server::*;
pub use state::*;
