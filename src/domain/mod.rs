// Domain layer: records, field values, findings and the ports the pipeline talks through.

pub mod model;
pub mod ports;
