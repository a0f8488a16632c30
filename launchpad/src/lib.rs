//! Launchpad Library
//!
//! Deployment orchestration core: queue, executor, container drivers,
//! recovery and log streaming.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod logstream;
pub mod models;
pub mod server;
pub mod storage;
pub mod store;
pub mod utils;
pub mod workers;
