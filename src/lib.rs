pub mod config;
pub mod core;
pub mod engine;
pub mod error;
