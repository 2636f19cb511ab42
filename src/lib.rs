pub mod api;
pub mod config;
pub mod congestion;
pub mod error;
pub mod geo;
pub mod polling;
pub mod recommend;
pub mod schedule;
pub mod state;
pub mod upstream;

/// Café identifier as issued by the café directory.
pub type CafeId = String;
