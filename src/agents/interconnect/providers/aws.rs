//! AWS site-to-site VPN
//!
//! Side A on AWS is a virtual private gateway attached to a VPC; tunnels are
//! VPN connections towards a customer gateway built from the peer's address.

use std::sync::Arc;

use kube::Client;
use serde_json::{json, Value};

use super::crossplane::{ClaimKind, CrossplaneGatewayClient, KubeClaimApi, ProviderProfile, SecretKeyRef};
use super::{GatewayRequest, TunnelRequest};
use crate::agents::interconnect::error::ProviderErrorKind;
use crate::agents::interconnect::types::{GatewayRef, ProviderTag, TunnelStatus};

pub type AwsGatewayClient = CrossplaneGatewayClient<AwsCredentials>;

/// Amazon's default private ASN for virtual private gateways
const DEFAULT_AMAZON_ASN: u32 = 64512;

const TUNNEL_STATES: &[(&str, TunnelStatus)] = &[("UP", TunnelStatus::Up), ("DOWN", TunnelStatus::Down)];

const TERMINAL_FAILURES: &[(&str, ProviderErrorKind)] = &[
    ("UnauthorizedOperation", ProviderErrorKind::Permission),
    ("AccessDenied", ProviderErrorKind::Permission),
    ("VpnGatewayLimitExceeded", ProviderErrorKind::Quota),
    ("VpnConnectionLimitExceeded", ProviderErrorKind::Quota),
    ("CustomerGatewayLimitExceeded", ProviderErrorKind::Quota),
    ("InvalidVpcID.NotFound", ProviderErrorKind::InvalidRequest),
];

/// Crossplane `ProviderConfig` used for AWS claims
#[derive(Debug, Clone)]
pub struct AwsCredentials {
    pub provider_config: String,
}

impl AwsCredentials {
    pub fn new(provider_config: &str) -> Self {
        Self {
            provider_config: provider_config.to_string(),
        }
    }

    pub fn client(self, client: Client, namespace: &str) -> AwsGatewayClient {
        CrossplaneGatewayClient::new(self, Arc::new(KubeClaimApi::new(client, namespace, ProviderTag::Aws)))
    }
}

impl ProviderProfile for AwsCredentials {
    fn provider(&self) -> ProviderTag {
        ProviderTag::Aws
    }

    fn gateway_kind(&self) -> ClaimKind {
        ClaimKind::new("AwsVpnGateway", "awsvpngateways")
    }

    fn tunnel_kind(&self) -> ClaimKind {
        ClaimKind::new("AwsVpnTunnel", "awsvpntunnels")
    }

    fn tunnel_states(&self) -> &'static [(&'static str, TunnelStatus)] {
        TUNNEL_STATES
    }

    fn terminal_failures(&self) -> &'static [(&'static str, ProviderErrorKind)] {
        TERMINAL_FAILURES
    }

    fn gateway_spec(&self, request: &GatewayRequest) -> Value {
        json!({
            "region": request.region,
            "vpcId": request.network,
            "amazonSideAsn": request.asn.unwrap_or(DEFAULT_AMAZON_ASN),
            "tags": request.cloud_tags,
            "providerConfigRef": { "name": self.provider_config },
        })
    }

    fn tunnel_spec(&self, local: &GatewayRef, peer: &GatewayRef, request: &TunnelRequest, psk: &SecretKeyRef) -> Value {
        let mut spec = json!({
            "region": local.region,
            "vpnGatewayId": local.native_id,
            "customerGatewayIp": peer.public_ip.map(|ip| ip.to_string()),
            "tunnelInsideCidr": request.inside_cidr.to_string(),
            "preSharedKeySecretRef": psk.to_json(),
            "staticRoutesOnly": request.peer_asn.is_none(),
            "tags": request.cloud_tags,
            "providerConfigRef": { "name": self.provider_config },
        });
        if let Some(asn) = request.peer_asn {
            spec["customerGatewayAsn"] = json!(asn);
        }
        spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::interconnect::providers::fake::{conn, MemoryClaimApi};
    use crate::agents::interconnect::providers::{map_tunnel_status, GatewayClient};
    use crate::agents::interconnect::retry::RetryConfig;
    use crate::agents::interconnect::types::Side;

    fn client(api: Arc<MemoryClaimApi>) -> AwsGatewayClient {
        CrossplaneGatewayClient::new(AwsCredentials::new("aws-default"), api).with_retry(RetryConfig::none())
    }

    #[tokio::test]
    async fn test_create_gateway_is_idempotent() {
        let api = Arc::new(MemoryClaimApi::new());
        let aws = client(api.clone());
        let request = GatewayRequest::for_side(&conn(ProviderTag::Aws, ProviderTag::Gcp), Side::A);

        let first = aws.create_gateway(&request).await.unwrap();
        let second = aws.create_gateway(&request).await.unwrap();

        assert_eq!(first.native_id, second.native_id);
        assert_eq!(api.count("AwsVpnGateway"), 1);
        assert!(!first.ready);

        let spec = api.spec("AwsVpnGateway", &first.native_id).unwrap();
        assert_eq!(spec["vpcId"], "net-a");
        assert_eq!(spec["amazonSideAsn"], 64512);
    }

    #[tokio::test]
    async fn test_gateway_becomes_ready_with_public_ip() {
        let api = Arc::new(MemoryClaimApi::new());
        let aws = client(api.clone());
        let request = GatewayRequest::for_side(&conn(ProviderTag::Aws, ProviderTag::Gcp), Side::A);

        let gw = aws.create_gateway(&request).await.unwrap();
        api.mark_ready("AwsVpnGateway", &gw.native_id, "198.51.100.7");

        let refreshed = aws.get_gateway(&gw).await.unwrap();
        assert!(refreshed.ready);
        assert_eq!(refreshed.public_ip, Some("198.51.100.7".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_access_denied_is_non_recoverable() {
        let api = Arc::new(MemoryClaimApi::new());
        let aws = client(api.clone());
        let request = GatewayRequest::for_side(&conn(ProviderTag::Aws, ProviderTag::Gcp), Side::A);
        let gw = aws.create_gateway(&request).await.unwrap();
        api.mark_sync_failed(
            "AwsVpnGateway",
            &gw.native_id,
            "UnauthorizedOperation: You are not authorized to perform this operation",
        );

        let err = aws.get_gateway(&gw).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn test_tunnel_status_table() {
        assert_eq!(map_tunnel_status(TUNNEL_STATES, "UP"), TunnelStatus::Up);
        assert_eq!(map_tunnel_status(TUNNEL_STATES, "DOWN"), TunnelStatus::Down);
        assert_eq!(map_tunnel_status(TUNNEL_STATES, "PENDING"), TunnelStatus::Unknown);
    }
}
