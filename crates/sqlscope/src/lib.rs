#![forbid(unsafe_code)]

pub mod access;
pub mod cache;
pub mod cli;
pub mod config;
pub mod execute;
pub mod extract;
pub mod generation;
pub mod introspect;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod record;
pub mod sqlite;
pub mod utils;
pub mod validate;

pub use cli::app::{Cli, Command};
