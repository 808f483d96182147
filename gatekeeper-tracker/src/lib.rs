pub mod calibration;
pub mod discovery_cache;
pub mod engine;
pub mod events;
pub mod registry;
pub mod service;
pub mod state;
pub mod zoning;

/// Satellite id under which locally observed advertisements are filed.
/// The only id the core ever synthesises.
pub const HUB_SATELLITE_ID: &str = "gatekeeper-hub";
