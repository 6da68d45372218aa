pub mod auditor;
pub mod batch;
pub mod etl;
pub mod normalizer;
pub mod parsers;
pub mod rules;
pub mod schema;

pub use crate::domain::ports::{ConfigProvider, Pipeline, Storage};
pub use crate::utils::error::Result;
