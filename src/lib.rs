pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use adapters::{feedback::TracingFeedback, ogr::ProcessRunner};
pub use app::Operation;
pub use config::SettingsStore;
pub use core::engine::AlgorithmRunner;
pub use utils::error::{BatchError, Result};
