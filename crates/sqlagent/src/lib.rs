#![forbid(unsafe_code)]

pub mod cli;
pub mod collaborators;
pub mod config;
pub mod measures;
pub mod models;
pub mod schema;
pub mod sql;
pub mod utils;
pub mod workflow;

pub use cli::app::{Cli, Command};
