pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod queue;
pub mod scanner;

#[cfg(feature = "api")]
pub mod api;
#[cfg(feature = "cli")]
pub mod cli;
