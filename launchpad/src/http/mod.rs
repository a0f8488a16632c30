//! HTTP clients for external providers

pub mod client;
