//! Azure site-to-site VPN
//!
//! Virtual network gateways live in a resource group; tunnels are
//! connections to a local network gateway describing the peer.

use std::sync::Arc;

use kube::Client;
use serde_json::{json, Value};

use super::crossplane::{ClaimKind, CrossplaneGatewayClient, KubeClaimApi, ProviderProfile, SecretKeyRef};
use super::{GatewayRequest, TunnelRequest};
use crate::agents::interconnect::error::ProviderErrorKind;
use crate::agents::interconnect::types::{GatewayRef, ProviderTag, TunnelStatus};

pub type AzureGatewayClient = CrossplaneGatewayClient<AzureCredentials>;

const DEFAULT_SKU: &str = "VpnGw1";

const TUNNEL_STATES: &[(&str, TunnelStatus)] = &[
    ("Connected", TunnelStatus::Up),
    ("NotConnected", TunnelStatus::Down),
    ("Connecting", TunnelStatus::Down),
];

const TERMINAL_FAILURES: &[(&str, ProviderErrorKind)] = &[
    ("AuthorizationFailed", ProviderErrorKind::Permission),
    ("LinkedAuthorizationFailed", ProviderErrorKind::Permission),
    ("QuotaExceeded", ProviderErrorKind::Quota),
    ("PublicIPCountLimitReached", ProviderErrorKind::Quota),
    ("ResourceGroupNotFound", ProviderErrorKind::InvalidRequest),
];

/// Crossplane `ProviderConfig` and resource group used for Azure claims
#[derive(Debug, Clone)]
pub struct AzureCredentials {
    pub provider_config: String,
    pub resource_group: String,
    pub sku: String,
}

impl AzureCredentials {
    pub fn new(provider_config: &str, resource_group: &str) -> Self {
        Self {
            provider_config: provider_config.to_string(),
            resource_group: resource_group.to_string(),
            sku: DEFAULT_SKU.to_string(),
        }
    }

    pub fn with_sku(mut self, sku: &str) -> Self {
        self.sku = sku.to_string();
        self
    }

    pub fn client(self, client: Client, namespace: &str) -> AzureGatewayClient {
        CrossplaneGatewayClient::new(self, Arc::new(KubeClaimApi::new(client, namespace, ProviderTag::Azure)))
    }
}

impl ProviderProfile for AzureCredentials {
    fn provider(&self) -> ProviderTag {
        ProviderTag::Azure
    }

    fn gateway_kind(&self) -> ClaimKind {
        ClaimKind::new("AzureVpnGateway", "azurevpngateways")
    }

    fn tunnel_kind(&self) -> ClaimKind {
        ClaimKind::new("AzureVpnTunnel", "azurevpntunnels")
    }

    fn tunnel_states(&self) -> &'static [(&'static str, TunnelStatus)] {
        TUNNEL_STATES
    }

    fn terminal_failures(&self) -> &'static [(&'static str, ProviderErrorKind)] {
        TERMINAL_FAILURES
    }

    fn gateway_spec(&self, request: &GatewayRequest) -> Value {
        let mut spec = json!({
            "location": request.region,
            "resourceGroupName": self.resource_group,
            "virtualNetworkName": request.network,
            "sku": self.sku,
            "enableBgp": request.asn.is_some(),
            "tags": request.cloud_tags,
            "providerConfigRef": { "name": self.provider_config },
        });
        if let Some(asn) = request.asn {
            spec["bgpAsn"] = json!(asn);
        }
        spec
    }

    fn tunnel_spec(&self, local: &GatewayRef, peer: &GatewayRef, request: &TunnelRequest, psk: &SecretKeyRef) -> Value {
        let mut spec = json!({
            "location": local.region,
            "resourceGroupName": self.resource_group,
            "virtualNetworkGatewayName": local.native_id,
            "localNetworkGatewayAddress": peer.public_ip.map(|ip| ip.to_string()),
            "tunnelInsideCidr": request.inside_cidr.to_string(),
            "connectionType": "IPsec",
            "sharedKeySecretRef": psk.to_json(),
            "enableBgp": request.peer_asn.is_some(),
            "tags": request.cloud_tags,
            "providerConfigRef": { "name": self.provider_config },
        });
        if let Some(asn) = request.peer_asn {
            spec["peerBgpAsn"] = json!(asn);
        }
        spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::interconnect::error::InterconnectError;
    use crate::agents::interconnect::providers::fake::{conn, MemoryClaimApi};
    use crate::agents::interconnect::providers::{map_tunnel_status, GatewayClient};
    use crate::agents::interconnect::retry::RetryConfig;
    use crate::agents::interconnect::types::Side;

    fn client(api: Arc<MemoryClaimApi>) -> AzureGatewayClient {
        CrossplaneGatewayClient::new(AzureCredentials::new("azure-default", "rg-network"), api)
            .with_retry(RetryConfig::none())
    }

    #[tokio::test]
    async fn test_create_gateway_is_idempotent() {
        let api = Arc::new(MemoryClaimApi::new());
        let azure = client(api.clone());
        let request = GatewayRequest::for_side(&conn(ProviderTag::Gcp, ProviderTag::Azure), Side::B);

        let first = azure.create_gateway(&request).await.unwrap();
        let second = azure.create_gateway(&request).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(api.count("AzureVpnGateway"), 1);
        let spec = api.spec("AzureVpnGateway", &first.native_id).unwrap();
        assert_eq!(spec["resourceGroupName"], "rg-network");
        assert_eq!(spec["virtualNetworkName"], "net-b");
        assert_eq!(spec["sku"], "VpnGw1");
    }

    #[tokio::test]
    async fn test_gateway_pending_deletion_is_recoverable() {
        let api = Arc::new(MemoryClaimApi::new());
        let azure = client(api.clone());
        let request = GatewayRequest::for_side(&conn(ProviderTag::Gcp, ProviderTag::Azure), Side::B);
        let gw = azure.create_gateway(&request).await.unwrap();
        api.mark_deleting("AzureVpnGateway", &gw.native_id);

        let err = azure.create_gateway(&request).await.unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(err, InterconnectError::Provider { .. }));
    }

    #[tokio::test]
    async fn test_quota_failure_is_non_recoverable() {
        let api = Arc::new(MemoryClaimApi::new());
        let azure = client(api.clone());
        let request = GatewayRequest::for_side(&conn(ProviderTag::Gcp, ProviderTag::Azure), Side::B);
        let gw = azure.create_gateway(&request).await.unwrap();
        api.mark_sync_failed("AzureVpnGateway", &gw.native_id, "QuotaExceeded: regional vCPU quota");

        let err = azure.create_gateway(&request).await.unwrap_err();
        assert!(matches!(
            err,
            InterconnectError::Provider {
                kind: ProviderErrorKind::Quota,
                ..
            }
        ));
    }

    #[test]
    fn test_tunnel_status_table() {
        assert_eq!(map_tunnel_status(TUNNEL_STATES, "Connected"), TunnelStatus::Up);
        assert_eq!(map_tunnel_status(TUNNEL_STATES, "NotConnected"), TunnelStatus::Down);
        assert_eq!(map_tunnel_status(TUNNEL_STATES, "Connecting"), TunnelStatus::Down);
        assert_eq!(map_tunnel_status(TUNNEL_STATES, "Unknown"), TunnelStatus::Unknown);
    }
}
