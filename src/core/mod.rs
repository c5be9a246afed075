pub mod datasource_uri;
pub mod discovery;
pub mod engine;
pub mod layer;
pub mod project;
pub mod xml;

pub use crate::domain::model::AlgorithmOutput;
pub use crate::domain::ports::{Algorithm, Feedback, ToolRunner};
pub use crate::utils::error::Result;
