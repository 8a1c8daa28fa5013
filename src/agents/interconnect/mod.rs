//! Multi-Cloud VPN Interconnect
//!
//! Provisions site-to-site IPsec VPN connections between AWS, Azure and GCP
//! as a saga: gateways on both sides, two tunnels between them, and
//! reverse-order compensation when any step fails.
//!
//! ## Architecture
//!
//! - **Provider Gateway Clients**: one capability set per cloud, backed by
//!   Crossplane claims (`providers`)
//! - **Connection Orchestrator**: create/delete state machine (`orchestrator`)
//! - **Status Reconciler**: bounded polling with backoff (`reconciler`)
//! - **Connection State Store**: durable records plus per-connection locks (`store`)
//!
//! ## Security
//!
//! - Pre-shared keys are redacted from `Debug` output and reach providers
//!   only through Kubernetes Secrets
//! - Provider credentials are injected and never persisted

pub mod config;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod providers;
pub mod reconciler;
pub mod retry;
pub mod store;
pub mod types;
pub mod validation;

pub use config::EngineConfig;
pub use error::{ConnectionError, ErrorKind, InterconnectError, ProviderErrorKind};
pub use events::{ConnectionEvent, EventSink, MemoryEventSink, TracingEventSink};
pub use orchestrator::ConnectionOrchestrator;
pub use providers::{GatewayClient, ProviderRegistry};
pub use reconciler::{wait_until, WaitOutcome, WaitPolicy};
pub use store::{FileStateStore, MemoryStateStore, StateStore, StoreLock};
pub use types::{
    BgpConfig, ConnectionState, GatewayRef, PresharedKey, ProviderTag, ResourceRef, SideSpec,
    TunnelSpec, TunnelStatus, VpnConnection, VpnConnectionSpec,
};
