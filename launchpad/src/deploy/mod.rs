//! Deployment pipeline

pub mod buildlog;
pub mod cancel;
pub mod compose;
pub mod config;
pub mod control;
pub mod docker;
pub mod executor;
pub mod fsm;
pub mod git;
pub mod lifecycle;
pub mod lock;
pub mod process;
