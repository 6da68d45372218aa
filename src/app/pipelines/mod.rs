pub mod normalize_pipeline;

pub use normalize_pipeline::{DryRunReport, NormalizePipeline};
