//! GCP HA VPN
//!
//! An HA VPN gateway plus Cloud Router in the project's VPC network; tunnels
//! point at an external VPN gateway built from the peer's address.

use std::sync::Arc;

use kube::Client;
use serde_json::{json, Value};

use super::crossplane::{ClaimKind, CrossplaneGatewayClient, KubeClaimApi, ProviderProfile, SecretKeyRef};
use super::{GatewayRequest, TunnelRequest};
use crate::agents::interconnect::error::ProviderErrorKind;
use crate::agents::interconnect::types::{GatewayRef, ProviderTag, TunnelStatus};

pub type GcpGatewayClient = CrossplaneGatewayClient<GcpCredentials>;

const DEFAULT_ROUTER_ASN: u32 = 64514;

const TUNNEL_STATES: &[(&str, TunnelStatus)] = &[
    ("ESTABLISHED", TunnelStatus::Up),
    ("NO_INCOMING_PACKETS", TunnelStatus::Down),
    ("NEGOTIATION_FAILURE", TunnelStatus::Down),
    ("FAILED", TunnelStatus::Down),
    ("REJECTED", TunnelStatus::Down),
    ("STOPPED", TunnelStatus::Down),
    ("PEER_IDENTITY_MISMATCH", TunnelStatus::Down),
    ("AUTHORIZATION_ERROR", TunnelStatus::Down),
    ("DEPROVISIONING", TunnelStatus::Down),
    ("FIRST_HANDSHAKE", TunnelStatus::Down),
    ("WAITING_FOR_FULL_CONFIG", TunnelStatus::Down),
    ("ALLOCATING_RESOURCES", TunnelStatus::Down),
    ("PROVISIONING", TunnelStatus::Down),
];

const TERMINAL_FAILURES: &[(&str, ProviderErrorKind)] = &[
    ("PERMISSION_DENIED", ProviderErrorKind::Permission),
    ("forbidden", ProviderErrorKind::Permission),
    ("QUOTA_EXCEEDED", ProviderErrorKind::Quota),
    ("quotaExceeded", ProviderErrorKind::Quota),
];

/// Crossplane `ProviderConfig` and project used for GCP claims
#[derive(Debug, Clone)]
pub struct GcpCredentials {
    pub provider_config: String,
    pub project: String,
}

impl GcpCredentials {
    pub fn new(provider_config: &str, project: &str) -> Self {
        Self {
            provider_config: provider_config.to_string(),
            project: project.to_string(),
        }
    }

    pub fn client(self, client: Client, namespace: &str) -> GcpGatewayClient {
        CrossplaneGatewayClient::new(self, Arc::new(KubeClaimApi::new(client, namespace, ProviderTag::Gcp)))
    }
}

impl ProviderProfile for GcpCredentials {
    fn provider(&self) -> ProviderTag {
        ProviderTag::Gcp
    }

    fn gateway_kind(&self) -> ClaimKind {
        ClaimKind::new("GcpVpnGateway", "gcpvpngateways")
    }

    fn tunnel_kind(&self) -> ClaimKind {
        ClaimKind::new("GcpVpnTunnel", "gcpvpntunnels")
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
            "project": self.project,
            "network": request.network,
            "routerAsn": request.asn.unwrap_or(DEFAULT_ROUTER_ASN),
            "labels": request.cloud_tags,
            "providerConfigRef": { "name": self.provider_config },
        })
    }

    fn tunnel_spec(&self, local: &GatewayRef, peer: &GatewayRef, request: &TunnelRequest, psk: &SecretKeyRef) -> Value {
        let mut spec = json!({
            "region": local.region,
            "project": self.project,
            "vpnGatewayName": local.native_id,
            "vpnGatewayInterface": request.index,
            "peerExternalGatewayIp": peer.public_ip.map(|ip| ip.to_string()),
            "ikeVersion": 2,
            "sharedSecretSecretRef": psk.to_json(),
            "routerInterfaceIpRange": request.inside_cidr.to_string(),
            "labels": request.cloud_tags,
            "providerConfigRef": { "name": self.provider_config },
        });
        if let Some(asn) = request.peer_asn {
            spec["peerAsn"] = json!(asn);
        }
        spec
    }
}
