//! Agent modules for the interconnect engine
//!
//! - `interconnect`: multi-cloud site-to-site VPN orchestration

pub mod interconnect;

pub use interconnect::ConnectionOrchestrator;
