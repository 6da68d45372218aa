// Adapters layer: local storage, spreadsheet readers and artifact writers.

pub mod artifacts;
pub mod sheet;
pub mod storage;
