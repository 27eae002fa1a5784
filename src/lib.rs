//! 实验室资源管理库
//! 资源清单、文件持久化存储、租约调度与 HTTP 接口

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod routes;
pub mod scheduler;
pub mod services;
pub mod telemetry;
