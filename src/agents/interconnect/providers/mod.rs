//! Provider Gateway Clients
//!
//! One [`GatewayClient`] per cloud provider, each exposing the same
//! capability set so the orchestrator never branches on provider identity.
//!
//! ## Architecture
//!
//! ```text
//! ConnectionOrchestrator
//!   └─> ProviderRegistry ── ProviderTag ──> Arc<dyn GatewayClient>
//!         ├─ AwsGatewayClient    ┐
//!         ├─ AzureGatewayClient  ├─ CrossplaneGatewayClient<Profile>
//!         └─ GcpGatewayClient    ┘        └─> ClaimApi (Kubernetes)
//! ```
//!
//! Native resource names are derived from the labels every request
//! carries, which makes each create idempotent by name.

pub mod aws;
pub mod azure;
pub mod crossplane;
pub mod gcp;

#[cfg(test)]
pub(crate) mod fake;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use ipnet::Ipv4Net;
use tracing::info;

use super::error::InterconnectError;
use super::types::{
    GatewayRef, PresharedKey, ProviderTag, Side, TunnelHandle, TunnelStatus, VpnConnection,
};

pub use aws::{AwsCredentials, AwsGatewayClient};
pub use azure::{AzureCredentials, AzureGatewayClient};
pub use crossplane::{ClaimApi, CrossplaneGatewayClient, KubeClaimApi};
pub use gcp::{GcpCredentials, GcpGatewayClient};

type Result<T> = std::result::Result<T, InterconnectError>;

pub const LABEL_CONNECTION: &str = "net.interconnect.dev/connection";
pub const LABEL_SIDE: &str = "net.interconnect.dev/side";
pub const LABEL_CORRELATION: &str = "net.interconnect.dev/correlation";
pub const LABEL_MANAGED_BY: &str = "net.interconnect.dev/managed-by";
pub const MANAGED_BY: &str = "interconnect-engine";

/// Labels and tags shared by every native resource of a connection
fn connection_labels(conn: &VpnConnection) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_CONNECTION.to_string(), conn.name.clone()),
        (LABEL_CORRELATION.to_string(), conn.correlation_id.simple().to_string()),
        (LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string()),
    ])
}

fn label<'a>(labels: &'a BTreeMap<String, String>, key: &str) -> Result<&'a str> {
    labels
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| InterconnectError::Validation(format!("missing label {}", key)))
}

/// Native gateway name for a connection side
pub fn gateway_name(labels: &BTreeMap<String, String>) -> Result<String> {
    Ok(format!(
        "{}-{}-vpngw",
        label(labels, LABEL_CONNECTION)?,
        label(labels, LABEL_SIDE)?
    ))
}

/// Native tunnel name for the tunnel at `index`
pub fn tunnel_name(labels: &BTreeMap<String, String>, index: usize) -> Result<String> {
    Ok(format!("{}-tun{}", label(labels, LABEL_CONNECTION)?, index))
}

/// Map a provider's native tunnel status through its table.
///
/// Matching ignores case; anything not listed is `Unknown`.
pub fn map_tunnel_status(table: &[(&str, TunnelStatus)], native: &str) -> TunnelStatus {
    table
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(native.trim()))
        .map(|(_, status)| *status)
        .unwrap_or(TunnelStatus::Unknown)
}

/// Everything a provider needs to create one side's gateway
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub side: Side,
    pub region: String,
    pub network: String,
    /// Local ASN when BGP is enabled
    pub asn: Option<u32>,
    /// System labels; the native name derives from these
    pub labels: BTreeMap<String, String>,
    /// Caller labels, applied as cloud tags
    pub cloud_tags: BTreeMap<String, String>,
}

impl GatewayRequest {
    pub fn for_side(conn: &VpnConnection, side: Side) -> Self {
        let spec = conn.side(side);
        let mut labels = connection_labels(conn);
        labels.insert(LABEL_SIDE.to_string(), side.to_string());

        Self {
            side,
            region: spec.region.clone(),
            network: spec.network.clone(),
            asn: conn.bgp.as_ref().and_then(|b| b.asn(side)),
            labels,
            cloud_tags: conn.labels.clone(),
        }
    }

    pub fn name(&self) -> Result<String> {
        gateway_name(&self.labels)
    }
}

/// Everything a provider needs to create one tunnel
#[derive(Debug, Clone)]
pub struct TunnelRequest {
    pub index: usize,
    pub inside_cidr: Ipv4Net,
    pub preshared_key: PresharedKey,
    pub local_asn: Option<u32>,
    pub peer_asn: Option<u32>,
    pub labels: BTreeMap<String, String>,
    pub cloud_tags: BTreeMap<String, String>,
}

impl TunnelRequest {
    pub fn for_tunnel(conn: &VpnConnection, index: usize) -> Option<Self> {
        let tunnel = conn.tunnels.get(index)?;
        let bgp = conn.bgp.as_ref();

        Some(Self {
            index,
            inside_cidr: tunnel.inside_cidr,
            preshared_key: tunnel.preshared_key.clone(),
            local_asn: bgp.and_then(|b| b.asn(Side::A)),
            peer_asn: bgp.and_then(|b| b.asn(Side::B)),
            labels: connection_labels(conn),
            cloud_tags: conn.labels.clone(),
        })
    }

    pub fn name(&self) -> Result<String> {
        tunnel_name(&self.labels, self.index)
    }
}

/// Capability set implemented once per provider
#[async_trait]
pub trait GatewayClient: Send + Sync {
    fn provider(&self) -> ProviderTag;

    /// Create (or adopt) the gateway named by the request labels
    async fn create_gateway(&self, request: &GatewayRequest) -> Result<GatewayRef>;

    /// Refresh readiness and public address
    async fn get_gateway(&self, gateway: &GatewayRef) -> Result<GatewayRef>;

    /// Succeeds if the gateway is already gone
    async fn delete_gateway(&self, gateway: &GatewayRef) -> Result<()>;

    /// Create a tunnel from `local` (this provider) to `peer`. Both must be ready.
    async fn create_tunnel(
        &self,
        local: &GatewayRef,
        peer: &GatewayRef,
        request: &TunnelRequest,
    ) -> Result<TunnelHandle>;

    async fn get_tunnel_status(&self, handle: &TunnelHandle) -> Result<TunnelStatus>;

    /// Succeeds if the tunnel is already gone
    async fn delete_tunnel(&self, handle: &TunnelHandle) -> Result<()>;
}

/// Gateway clients keyed by provider
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    clients: HashMap<ProviderTag, Arc<dyn GatewayClient>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, client: Arc<dyn GatewayClient>) {
        info!(provider = %client.provider(), "Registered gateway client");
        self.clients.insert(client.provider(), client);
    }

    pub fn with(mut self, client: Arc<dyn GatewayClient>) -> Self {
        self.register(client);
        self
    }

    pub fn get(&self, provider: ProviderTag) -> Result<Arc<dyn GatewayClient>> {
        self.clients
            .get(&provider)
            .cloned()
            .ok_or_else(|| InterconnectError::Validation(format!("no client registered for provider {}", provider)))
    }

    pub fn providers(&self) -> Vec<ProviderTag> {
        let mut providers: Vec<_> = self.clients.keys().copied().collect();
        providers.sort();
        providers
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::interconnect::types::{SideSpec, TunnelSpec, VpnConnectionSpec};
    use super::fake::FakeGatewayClient;

    fn conn() -> VpnConnection {
        VpnConnection::from_spec(&VpnConnectionSpec {
            name: "dc-link".to_string(),
            side_a: SideSpec {
                provider: ProviderTag::Gcp,
                region: "europe-west1".to_string(),
                network: "core".to_string(),
            },
            side_b: SideSpec {
                provider: ProviderTag::Azure,
                region: "westeurope".to_string(),
                network: "hub".to_string(),
            },
            tunnels: vec![TunnelSpec {
                inside_cidr: "169.254.1.0/30".parse().unwrap(),
                preshared_key: PresharedKey::new("abcdefgh"),
            }],
            bgp: Some(crate::agents::interconnect::types::BgpConfig::new(64514, 65515)),
            labels: BTreeMap::from([("team".to_string(), "net".to_string())]),
        })
    }

    #[test]
    fn test_names_derive_from_labels() {
        let c = conn();
        let a = GatewayRequest::for_side(&c, Side::A);
        let b = GatewayRequest::for_side(&c, Side::B);

        assert_eq!(a.name().unwrap(), "dc-link-a-vpngw");
        assert_eq!(b.name().unwrap(), "dc-link-b-vpngw");
        assert_eq!(a.asn, Some(64514));
        assert_eq!(b.asn, Some(65515));
        assert_eq!(a.cloud_tags.get("team").map(String::as_str), Some("net"));

        let t = TunnelRequest::for_tunnel(&c, 0).unwrap();
        assert_eq!(t.name().unwrap(), "dc-link-tun0");
        assert_eq!(t.peer_asn, Some(65515));
        assert!(TunnelRequest::for_tunnel(&c, 5).is_none());
    }

    #[test]
    fn test_missing_labels_rejected() {
        assert!(gateway_name(&BTreeMap::new()).is_err());
    }

    #[test]
    fn test_status_mapping_ignores_case_and_defaults_unknown() {
        let table = [("ESTABLISHED", TunnelStatus::Up), ("STOPPED", TunnelStatus::Down)];
        assert_eq!(map_tunnel_status(&table, "established"), TunnelStatus::Up);
        assert_eq!(map_tunnel_status(&table, "Stopped"), TunnelStatus::Down);
        assert_eq!(map_tunnel_status(&table, "SOMETHING_NEW"), TunnelStatus::Unknown);
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ProviderRegistry::new()
            .with(Arc::new(FakeGatewayClient::new(ProviderTag::Aws)))
            .with(Arc::new(FakeGatewayClient::new(ProviderTag::Gcp)));

        assert_eq!(registry.providers(), vec![ProviderTag::Aws, ProviderTag::Gcp]);
        assert!(registry.get(ProviderTag::Aws).is_ok());
        assert!(matches!(
            registry.get(ProviderTag::Azure),
            Err(InterconnectError::Validation(_))
        ));
    }
}
