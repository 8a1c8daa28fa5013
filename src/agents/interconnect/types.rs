//! Interconnect Types
//!
//! Core types for VPN connections, provider gateways and tunnels.

use std::collections::BTreeMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use ipnet::{IpNet, Ipv4Net};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use super::error::{ConnectionError, InterconnectError};

/// Cloud provider identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderTag {
    Aws,
    Azure,
    Gcp,
}

impl std::fmt::Display for ProviderTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderTag::Aws => write!(f, "aws"),
            ProviderTag::Azure => write!(f, "azure"),
            ProviderTag::Gcp => write!(f, "gcp"),
        }
    }
}

/// Ordered pair of providers terminating a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderPair {
    pub a: ProviderTag,
    pub b: ProviderTag,
}

impl std::fmt::Display for ProviderPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.a, self.b)
    }
}

/// Which end of a connection a resource belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    A,
    B,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::A => write!(f, "a"),
            Side::B => write!(f, "b"),
        }
    }
}

/// Pre-shared key for a tunnel.
///
/// Opaque to the engine: stored and forwarded to the provider, never logged.
pub struct PresharedKey(SecretString);

impl PresharedKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    /// Borrow the raw key for forwarding to a provider.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl Clone for PresharedKey {
    fn clone(&self) -> Self {
        Self::new(self.expose())
    }
}

impl std::fmt::Debug for PresharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PresharedKey([REDACTED])")
    }
}

impl Serialize for PresharedKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.expose())
    }
}

impl<'de> Deserialize<'de> for PresharedKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

/// Per-side resource selector supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideSpec {
    /// Provider hosting this side
    pub provider: ProviderTag,
    /// Region or location of the gateway
    pub region: String,
    /// Provider network the gateway attaches to (VPC id, VNet name, VPC network)
    pub network: String,
}

/// Requested tunnel parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelSpec {
    /// Link-local /30 used for the tunnel's inside addressing
    pub inside_cidr: Ipv4Net,
    pub preshared_key: PresharedKey,
}

/// A single static route advertised over the tunnels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub cidr: IpNet,
    pub next_hop: IpAddr,
}

/// BGP settings for a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BgpConfig {
    pub enabled: bool,
    pub asn_a: u32,
    pub asn_b: u32,
    /// Unique by cidr; see [`BgpConfig::insert_route`]
    #[serde(default)]
    pub route_entries: Vec<RouteEntry>,
}

impl BgpConfig {
    pub fn new(asn_a: u32, asn_b: u32) -> Self {
        Self {
            enabled: true,
            asn_a,
            asn_b,
            route_entries: Vec::new(),
        }
    }

    /// Insert a route, replacing any existing entry for the same cidr.
    pub fn insert_route(&mut self, entry: RouteEntry) {
        match self.route_entries.iter_mut().find(|r| r.cidr == entry.cidr) {
            Some(existing) => existing.next_hop = entry.next_hop,
            None => self.route_entries.push(entry),
        }
    }

    /// Builder form of [`BgpConfig::insert_route`]
    pub fn route(mut self, cidr: IpNet, next_hop: IpAddr) -> Self {
        self.insert_route(RouteEntry { cidr, next_hop });
        self
    }

    /// Collapse duplicate cidrs, keeping the last entry written for each.
    pub fn normalized(&self) -> Self {
        let mut out = Self {
            route_entries: Vec::with_capacity(self.route_entries.len()),
            ..self.clone()
        };
        for entry in &self.route_entries {
            out.insert_route(entry.clone());
        }
        out
    }

    /// ASN for a given side, when BGP is enabled
    pub fn asn(&self, side: Side) -> Option<u32> {
        if !self.enabled {
            return None;
        }
        Some(match side {
            Side::A => self.asn_a,
            Side::B => self.asn_b,
        })
    }
}

/// Caller request for a new connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpnConnectionSpec {
    pub name: String,
    pub side_a: SideSpec,
    pub side_b: SideSpec,
    pub tunnels: Vec<TunnelSpec>,
    #[serde(default)]
    pub bgp: Option<BgpConfig>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl VpnConnectionSpec {
    pub fn provider_pair(&self) -> ProviderPair {
        ProviderPair {
            a: self.side_a.provider,
            b: self.side_b.provider,
        }
    }
}

/// Handle to a provider-native gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayRef {
    pub provider: ProviderTag,
    /// Native resource identifier
    pub native_id: String,
    pub region: String,
    /// Populated once the provider has allocated an address
    pub public_ip: Option<IpAddr>,
    /// Computed from provider status, never caller-asserted
    pub ready: bool,
}

impl GatewayRef {
    /// Reference to a gateway whose status has not been observed yet
    pub fn unobserved(provider: ProviderTag, native_id: &str, region: &str) -> Self {
        Self {
            provider,
            native_id: native_id.to_string(),
            region: region.to_string(),
            public_ip: None,
            ready: false,
        }
    }
}

/// Canonical tunnel state; each provider maps its native strings onto this
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TunnelStatus {
    Up,
    Down,
    #[default]
    Unknown,
}

impl std::fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TunnelStatus::Up => write!(f, "UP"),
            TunnelStatus::Down => write!(f, "DOWN"),
            TunnelStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Handle to a provider-native tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelHandle {
    pub provider: ProviderTag,
    pub native_id: String,
}

/// A tunnel belonging to a connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    pub inside_cidr: Ipv4Net,
    pub preshared_key: PresharedKey,
    #[serde(default)]
    pub status: TunnelStatus,
    /// Present once the tunnel has been created
    #[serde(default)]
    pub handle: Option<TunnelHandle>,
}

impl From<&TunnelSpec> for TunnelConfig {
    fn from(spec: &TunnelSpec) -> Self {
        Self {
            inside_cidr: spec.inside_cidr,
            preshared_key: spec.preshared_key.clone(),
            status: TunnelStatus::Unknown,
            handle: None,
        }
    }
}

/// A native resource the engine created and is responsible for removing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResourceRef {
    Gateway {
        provider: ProviderTag,
        native_id: String,
        region: String,
    },
    Tunnel {
        provider: ProviderTag,
        native_id: String,
    },
}

impl ResourceRef {
    pub fn gateway(gateway: &GatewayRef) -> Self {
        Self::Gateway {
            provider: gateway.provider,
            native_id: gateway.native_id.clone(),
            region: gateway.region.clone(),
        }
    }

    pub fn tunnel(handle: &TunnelHandle) -> Self {
        Self::Tunnel {
            provider: handle.provider,
            native_id: handle.native_id.clone(),
        }
    }

    pub fn provider(&self) -> ProviderTag {
        match self {
            Self::Gateway { provider, .. } | Self::Tunnel { provider, .. } => *provider,
        }
    }

    pub fn native_id(&self) -> &str {
        match self {
            Self::Gateway { native_id, .. } | Self::Tunnel { native_id, .. } => native_id,
        }
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gateway {
                provider,
                native_id,
                ..
            } => write!(f, "{}:gateway/{}", provider, native_id),
            Self::Tunnel {
                provider,
                native_id,
            } => write!(f, "{}:tunnel/{}", provider, native_id),
        }
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Pending,
    ProvisioningSideA,
    ProvisioningSideB,
    ConfiguringTunnels,
    Active,
    RollingBack,
    Failed,
    Deleting,
    Deleted,
}

impl ConnectionState {
    /// Position along the create path; rollback and delete states sort after it.
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::ProvisioningSideA => 1,
            Self::ProvisioningSideB => 2,
            Self::ConfiguringTunnels => 3,
            Self::Active => 4,
            Self::RollingBack => 5,
            Self::Failed => 6,
            Self::Deleting => 7,
            Self::Deleted => 8,
        }
    }

    /// A create is underway (or crashed) in this state
    pub fn is_in_progress(self) -> bool {
        self.rank() < Self::Active.rank()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Active | Self::Failed | Self::Deleted)
    }

    /// True once the create path has reached (or passed) `other`
    pub fn has_reached(self, other: Self) -> bool {
        self.rank() >= other.rank()
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Pending, ProvisioningSideA)
            | (ProvisioningSideA, ProvisioningSideB)
            | (ProvisioningSideB, ConfiguringTunnels)
            | (ConfiguringTunnels, Active) => true,
            (from, RollingBack) => from.is_in_progress(),
            (RollingBack, Failed) => true,
            // Deleting is re-entrant: a crashed create can be torn down too.
            (Deleted | Deleting, Deleting) => false,
            (_, Deleting) => true,
            (Deleting, Deleted) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::ProvisioningSideA => "PROVISIONING_SIDE_A",
            Self::ProvisioningSideB => "PROVISIONING_SIDE_B",
            Self::ConfiguringTunnels => "CONFIGURING_TUNNELS",
            Self::Active => "ACTIVE",
            Self::RollingBack => "ROLLING_BACK",
            Self::Failed => "FAILED",
            Self::Deleting => "DELETING",
            Self::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}

/// The aggregate root persisted in the state store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpnConnection {
    /// Caller-supplied name; store and lock key
    pub name: String,
    /// `{name}-{correlation}` until both gateways exist, then `{gateway_a}+{gateway_b}`
    pub id: String,
    pub correlation_id: Uuid,
    pub provider_pair: ProviderPair,
    pub side_a: SideSpec,
    pub side_b: SideSpec,
    pub gateway_a: Option<GatewayRef>,
    pub gateway_b: Option<GatewayRef>,
    pub tunnels: Vec<TunnelConfig>,
    pub bgp: Option<BgpConfig>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub state: ConnectionState,
    /// Resources confirmed created, in creation order
    #[serde(default)]
    pub created_resources: Vec<ResourceRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<ConnectionError>,
}

impl VpnConnection {
    /// Start a fresh attempt for a validated spec
    pub fn from_spec(spec: &VpnConnectionSpec) -> Self {
        let correlation_id = Uuid::new_v4();
        let now = Utc::now();
        let short = correlation_id.simple().to_string();

        Self {
            name: spec.name.clone(),
            id: format!("{}-{}", spec.name, &short[..8]),
            correlation_id,
            provider_pair: spec.provider_pair(),
            side_a: spec.side_a.clone(),
            side_b: spec.side_b.clone(),
            gateway_a: None,
            gateway_b: None,
            tunnels: spec.tunnels.iter().map(TunnelConfig::from).collect(),
            bgp: spec.bgp.as_ref().map(BgpConfig::normalized),
            labels: spec.labels.clone(),
            state: ConnectionState::Pending,
            created_resources: Vec::new(),
            created_at: now,
            updated_at: now,
            last_error: None,
        }
    }

    pub fn side(&self, side: Side) -> &SideSpec {
        match side {
            Side::A => &self.side_a,
            Side::B => &self.side_b,
        }
    }

    pub fn gateway(&self, side: Side) -> Option<&GatewayRef> {
        match side {
            Side::A => self.gateway_a.as_ref(),
            Side::B => self.gateway_b.as_ref(),
        }
    }

    pub fn set_gateway(&mut self, side: Side, gateway: GatewayRef) {
        match side {
            Side::A => self.gateway_a = Some(gateway),
            Side::B => self.gateway_b = Some(gateway),
        }
        if let (Some(a), Some(b)) = (&self.gateway_a, &self.gateway_b) {
            self.id = format!("{}+{}", a.native_id, b.native_id);
        }
    }

    /// Move to `next`, returning the previous state
    pub fn transition(&mut self, next: ConnectionState) -> Result<ConnectionState, InterconnectError> {
        let from = self.state;
        if !from.can_transition_to(next) {
            return Err(InterconnectError::InvalidTransition { from, to: next });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(from)
    }

    /// Append a confirmed resource to the saga log
    pub fn record_created(&mut self, resource: ResourceRef) {
        if !self.created_resources.contains(&resource) {
            self.created_resources.push(resource);
        }
    }

    /// Drop a removed resource from the saga log and from the live fields
    pub fn forget(&mut self, resource: &ResourceRef) {
        self.created_resources.retain(|r| r != resource);
        match resource {
            ResourceRef::Gateway { native_id, .. } => {
                if self.gateway_a.as_ref().is_some_and(|g| &g.native_id == native_id) {
                    self.gateway_a = None;
                }
                if self.gateway_b.as_ref().is_some_and(|g| &g.native_id == native_id) {
                    self.gateway_b = None;
                }
            }
            ResourceRef::Tunnel { native_id, .. } => {
                for tunnel in &mut self.tunnels {
                    if tunnel.handle.as_ref().is_some_and(|h| &h.native_id == native_id) {
                        tunnel.handle = None;
                        tunnel.status = TunnelStatus::Unknown;
                    }
                }
            }
        }
    }

    /// Resources named by the last partial failure, if any
    pub fn dangling(&self) -> &[ResourceRef] {
        self.last_error
            .as_ref()
            .map(|e| e.dangling.as_slice())
            .unwrap_or_default()
    }

    pub fn tunnels_up(&self) -> bool {
        !self.tunnels.is_empty() && self.tunnels.iter().all(|t| t.status == TunnelStatus::Up)
    }

    /// (provider, network) pairs this connection attaches to
    pub fn networks(&self) -> [(ProviderTag, &str); 2] {
        [
            (self.side_a.provider, self.side_a.network.as_str()),
            (self.side_b.provider, self.side_b.network.as_str()),
        ]
    }
}
