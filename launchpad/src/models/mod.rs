//! Persisted entities

pub mod application;
pub mod deployment;
pub mod template;
pub mod update_log;
