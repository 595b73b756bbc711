// Domain layer: records, destinations and the ports implemented by adapters.

pub mod model;
pub mod ports;
