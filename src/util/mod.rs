//! Shared utilities

pub mod config;
pub mod logger;
