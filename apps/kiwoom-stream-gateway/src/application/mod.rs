//! Application Layer - Request handling and port definitions.
//!
//! Ports describe what the gateway needs from the outside world (chart
//! history, upstream registration, downstream delivery); services route
//! downstream client requests across those ports.

/// Port interfaces implemented by infrastructure adapters.
pub mod ports;

/// Downstream request handling.
pub mod services;
