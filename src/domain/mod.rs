// Domain layer: report models and ports (interfaces) shared by the algorithms.

pub mod model;
pub mod ports;
