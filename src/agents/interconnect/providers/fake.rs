//! In-memory test doubles for provider clients and the claim API.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::crossplane::{ClaimApi, ClaimKind, ClaimObject};
use super::{GatewayClient, GatewayRequest, TunnelRequest};
use crate::agents::interconnect::error::{InterconnectError, ProviderErrorKind};
use crate::agents::interconnect::types::{
    GatewayRef, PresharedKey, ProviderTag, SideSpec, TunnelHandle, TunnelSpec, TunnelStatus,
    VpnConnection, VpnConnectionSpec,
};

type Result<T> = std::result::Result<T, InterconnectError>;

fn region_for(provider: ProviderTag) -> &'static str {
    match provider {
        ProviderTag::Aws => "us-east-1",
        ProviderTag::Azure => "eastus",
        ProviderTag::Gcp => "us-east4",
    }
}

/// Valid two-tunnel spec between `a` and `b`
pub(crate) fn spec(name: &str, a: ProviderTag, b: ProviderTag) -> VpnConnectionSpec {
    VpnConnectionSpec {
        name: name.to_string(),
        side_a: SideSpec {
            provider: a,
            region: region_for(a).to_string(),
            network: "net-a".to_string(),
        },
        side_b: SideSpec {
            provider: b,
            region: region_for(b).to_string(),
            network: "net-b".to_string(),
        },
        tunnels: vec![
            TunnelSpec {
                inside_cidr: "169.254.10.0/30".parse().unwrap(),
                preshared_key: PresharedKey::new("Tunnel.key_0"),
            },
            TunnelSpec {
                inside_cidr: "169.254.10.4/30".parse().unwrap(),
                preshared_key: PresharedKey::new("Tunnel.key_1"),
            },
        ],
        bgp: None,
        labels: BTreeMap::new(),
    }
}

pub(crate) fn conn(a: ProviderTag, b: ProviderTag) -> VpnConnection {
    VpnConnection::from_spec(&spec("link", a, b))
}

#[derive(Default)]
struct ClaimState {
    claims: HashMap<(String, String), ClaimObject>,
    secrets: HashMap<String, BTreeMap<String, String>>,
    hide_next_get: bool,
    throttled_gets: u32,
}

/// [`ClaimApi`] over a HashMap, with hooks to play the Crossplane controller
#[derive(Default)]
pub(crate) struct MemoryClaimApi {
    state: Mutex<ClaimState>,
}

impl MemoryClaimApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ClaimState> {
        self.state.lock().unwrap()
    }

    fn with_status(&self, kind: &str, name: &str, f: impl FnOnce(&mut serde_json::Map<String, Value>)) {
        let mut state = self.state();
        let claim = state
            .claims
            .get_mut(&(kind.to_string(), name.to_string()))
            .unwrap_or_else(|| panic!("no claim {kind}/{name}"));
        if !claim.data.get("status").is_some_and(Value::is_object) {
            claim.data["status"] = json!({});
        }
        if let Some(status) = claim.data["status"].as_object_mut() {
            f(status);
        }
    }

    pub fn count(&self, kind: &str) -> usize {
        self.state().claims.keys().filter(|(k, _)| k == kind).count()
    }

    pub fn spec(&self, kind: &str, name: &str) -> Option<Value> {
        self.state()
            .claims
            .get(&(kind.to_string(), name.to_string()))
            .map(|c| c.data["spec"].clone())
    }

    pub fn secret(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.state().secrets.get(name).cloned()
    }

    pub fn mark_ready(&self, kind: &str, name: &str, public_ip: &str) {
        self.with_status(kind, name, |status| {
            status.insert("publicIp".to_string(), json!(public_ip));
            status.insert(
                "conditions".to_string(),
                json!([
                    {"type": "Synced", "status": "True"},
                    {"type": "Ready", "status": "True"}
                ]),
            );
        });
    }

    pub fn mark_sync_failed(&self, kind: &str, name: &str, message: &str) {
        self.with_status(kind, name, |status| {
            status.insert(
                "conditions".to_string(),
                json!([
                    {"type": "Synced", "status": "False", "reason": "ReconcileError", "message": message},
                    {"type": "Ready", "status": "False"}
                ]),
            );
        });
    }

    pub fn set_tunnel_state(&self, kind: &str, name: &str, native: &str) {
        self.with_status(kind, name, |status| {
            status.insert("tunnelState".to_string(), json!(native));
        });
    }

    pub fn mark_deleting(&self, kind: &str, name: &str) {
        if let Some(claim) = self
            .state()
            .claims
            .get_mut(&(kind.to_string(), name.to_string()))
        {
            claim.deleting = true;
        }
    }

    /// The next `get` reports the claim as absent
    pub fn hide_next_get(&self) {
        self.state().hide_next_get = true;
    }

    /// The next `n` calls to `get` are rate limited
    pub fn throttle_next(&self, n: u32) {
        self.state().throttled_gets = n;
    }
}

#[async_trait]
impl ClaimApi for MemoryClaimApi {
    async fn get(&self, kind: ClaimKind, name: &str) -> Result<Option<ClaimObject>> {
        let mut state = self.state();
        if state.throttled_gets > 0 {
            state.throttled_gets -= 1;
            return Err(InterconnectError::provider(
                ProviderTag::Gcp,
                ProviderErrorKind::RateLimited,
                "rateLimitExceeded",
            ));
        }
        if state.hide_next_get {
            state.hide_next_get = false;
            return Ok(None);
        }
        Ok(state
            .claims
            .get(&(kind.kind.to_string(), name.to_string()))
            .cloned())
    }

    async fn create(&self, kind: ClaimKind, claim: &ClaimObject) -> Result<ClaimObject> {
        let key = (kind.kind.to_string(), claim.name.clone());
        let mut state = self.state();
        if state.claims.contains_key(&key) {
            return Err(InterconnectError::Conflict(format!(
                "{} {} already exists",
                kind.kind, claim.name
            )));
        }
        state.claims.insert(key, claim.clone());
        Ok(claim.clone())
    }

    async fn delete(&self, kind: ClaimKind, name: &str) -> Result<()> {
        self.state()
            .claims
            .remove(&(kind.kind.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| InterconnectError::not_found(format!("{}/{}", kind.kind, name)))
    }

    async fn apply_secret(
        &self,
        name: &str,
        _labels: &BTreeMap<String, String>,
        data: BTreeMap<String, String>,
    ) -> Result<()> {
        self.state().secrets.insert(name.to_string(), data);
        Ok(())
    }

    async fn delete_secret(&self, name: &str) -> Result<()> {
        self.state()
            .secrets
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| InterconnectError::not_found(format!("Secret/{}", name)))
    }
}

/// Failure to inject into a fake call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    NonRecoverable,
    Recoverable,
}

impl Fault {
    fn error(self, provider: ProviderTag, what: &str) -> InterconnectError {
        match self {
            Fault::NonRecoverable => {
                InterconnectError::provider(provider, ProviderErrorKind::Permission, format!("{} denied", what))
            }
            Fault::Recoverable => {
                InterconnectError::provider(provider, ProviderErrorKind::RateLimited, format!("{} throttled", what))
            }
        }
    }
}

struct FakeGateway {
    gateway: GatewayRef,
    polls: u32,
}

struct FakeTunnel {
    polls: u32,
}

struct FakeState {
    gateways: BTreeMap<String, FakeGateway>,
    tunnels: BTreeMap<String, FakeTunnel>,
    gateway_ready_after: u32,
    tunnel_up_after: u32,
    create_gateway_fault: Option<Fault>,
    create_tunnel_faults: HashMap<usize, Fault>,
    /// native id -> remaining failing deletes
    delete_faults: HashMap<String, u32>,
    status_fault: Option<Fault>,
    calls: Vec<String>,
    next_ip: u8,
}

/// Provider client simulating gateway and tunnel lifecycles in memory
pub(crate) struct FakeGatewayClient {
    provider: ProviderTag,
    state: Mutex<FakeState>,
}

impl FakeGatewayClient {
    pub fn new(provider: ProviderTag) -> Self {
        Self {
            provider,
            state: Mutex::new(FakeState {
                gateways: BTreeMap::new(),
                tunnels: BTreeMap::new(),
                gateway_ready_after: 1,
                tunnel_up_after: 1,
                create_gateway_fault: None,
                create_tunnel_faults: HashMap::new(),
                delete_faults: HashMap::new(),
                status_fault: None,
                calls: Vec::new(),
                next_ip: 10,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Gateways report ready on the n-th refresh (`u32::MAX` for never)
    pub fn gateway_ready_after(&self, polls: u32) {
        self.state().gateway_ready_after = polls;
    }

    /// Tunnels report UP on the n-th status poll (`u32::MAX` for never)
    pub fn tunnel_up_after(&self, polls: u32) {
        self.state().tunnel_up_after = polls;
    }

    pub fn fail_create_gateway(&self, fault: Fault) {
        self.state().create_gateway_fault = Some(fault);
    }

    pub fn fail_create_tunnel(&self, index: usize, fault: Fault) {
        self.state().create_tunnel_faults.insert(index, fault);
    }

    /// The next `times` deletes of `native_id` fail (`u32::MAX` for always)
    pub fn fail_delete(&self, native_id: &str, times: u32) {
        self.state().delete_faults.insert(native_id.to_string(), times);
    }

    /// Every gateway and tunnel status read fails until cleared
    pub fn fail_status(&self, fault: Option<Fault>) {
        self.state().status_fault = fault;
    }

    pub fn live_gateways(&self) -> Vec<String> {
        self.state().gateways.keys().cloned().collect()
    }

    pub fn live_tunnels(&self) -> Vec<String> {
        self.state().tunnels.keys().cloned().collect()
    }

    /// Calls made so far, as `operation:name`
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    fn delete(&self, operation: &str, native_id: &str, tunnel: bool) -> Result<()> {
        let mut state = self.state();
        state.calls.push(format!("{}:{}", operation, native_id));

        if let Some(remaining) = state.delete_faults.get_mut(native_id) {
            if *remaining > 0 {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                return Err(InterconnectError::provider(
                    self.provider,
                    ProviderErrorKind::Transient,
                    format!("{} is busy", native_id),
                ));
            }
        }

        if tunnel {
            state.tunnels.remove(native_id);
        } else {
            state.gateways.remove(native_id);
        }
        Ok(())
    }
}

#[async_trait]
impl GatewayClient for FakeGatewayClient {
    fn provider(&self) -> ProviderTag {
        self.provider
    }

    async fn create_gateway(&self, request: &GatewayRequest) -> Result<GatewayRef> {
        let name = request.name()?;
        let mut state = self.state();
        state.calls.push(format!("create_gateway:{}", name));

        if let Some(fault) = state.create_gateway_fault {
            return Err(fault.error(self.provider, &name));
        }
        if let Some(existing) = state.gateways.get(&name) {
            return Ok(existing.gateway.clone());
        }

        let gateway = GatewayRef::unobserved(self.provider, &name, &request.region);
        state.gateways.insert(
            name,
            FakeGateway {
                gateway: gateway.clone(),
                polls: 0,
            },
        );
        Ok(gateway)
    }

    async fn get_gateway(&self, gateway: &GatewayRef) -> Result<GatewayRef> {
        let mut state = self.state();
        if let Some(fault) = state.status_fault {
            return Err(fault.error(self.provider, &gateway.native_id));
        }
        let ready_after = state.gateway_ready_after;
        let ip = state.next_ip;

        let fake = state
            .gateways
            .get_mut(&gateway.native_id)
            .ok_or_else(|| InterconnectError::not_found(gateway.native_id.clone()))?;
        fake.polls += 1;
        let became_ready = !fake.gateway.ready && fake.polls >= ready_after;
        if became_ready {
            fake.gateway.ready = true;
            fake.gateway.public_ip = Some(format!("192.0.2.{}", ip).parse().unwrap());
        }
        let refreshed = fake.gateway.clone();
        if became_ready {
            state.next_ip += 1;
        }
        Ok(refreshed)
    }

    async fn delete_gateway(&self, gateway: &GatewayRef) -> Result<()> {
        self.delete("delete_gateway", &gateway.native_id, false)
    }

    async fn create_tunnel(
        &self,
        local: &GatewayRef,
        peer: &GatewayRef,
        request: &TunnelRequest,
    ) -> Result<TunnelHandle> {
        let name = request.name()?;
        let mut state = self.state();
        state.calls.push(format!("create_tunnel:{}", name));

        for gateway in [local, peer] {
            if !gateway.ready {
                return Err(InterconnectError::GatewayNotReady {
                    gateway: gateway.native_id.clone(),
                });
            }
        }
        if let Some(fault) = state.create_tunnel_faults.get(&request.index) {
            return Err(fault.error(self.provider, &name));
        }

        state
            .tunnels
            .entry(name.clone())
            .or_insert(FakeTunnel { polls: 0 });
        Ok(TunnelHandle {
            provider: self.provider,
            native_id: name,
        })
    }

    async fn get_tunnel_status(&self, handle: &TunnelHandle) -> Result<TunnelStatus> {
        let mut state = self.state();
        if let Some(fault) = state.status_fault {
            return Err(fault.error(self.provider, &handle.native_id));
        }
        let up_after = state.tunnel_up_after;
        let tunnel = state
            .tunnels
            .get_mut(&handle.native_id)
            .ok_or_else(|| InterconnectError::not_found(handle.native_id.clone()))?;
        tunnel.polls += 1;
        Ok(if tunnel.polls >= up_after {
            TunnelStatus::Up
        } else {
            TunnelStatus::Down
        })
    }

    async fn delete_tunnel(&self, handle: &TunnelHandle) -> Result<()> {
        self.delete("delete_tunnel", &handle.native_id, true)
    }
}
