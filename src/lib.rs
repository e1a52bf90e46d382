pub mod api;
pub mod args;
pub mod commands;
mod config;
pub mod dates;
mod error;
pub mod export;
pub mod links;
pub mod model;
mod utils;
pub mod workflow;

#[cfg(test)]
mod test;

pub use api::{Mode, Runtime};
pub use config::{Config, ConfigSummary};
pub use error::{Error, ErrorType, Result};
