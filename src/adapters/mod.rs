// Adapters layer: concrete implementations of the domain ports (feedback, reports, external tools)

pub mod feedback;
pub mod ogr;
pub mod report;
