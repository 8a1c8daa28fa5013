//! Interconnect Engine Library
//!
//! Saga orchestration of site-to-site VPN connections across cloud providers.

pub mod agents;

pub use agents::interconnect;
pub use agents::interconnect::{ConnectionOrchestrator, EngineConfig, InterconnectError};
