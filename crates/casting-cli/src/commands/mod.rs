pub mod config;
pub mod tokens;
