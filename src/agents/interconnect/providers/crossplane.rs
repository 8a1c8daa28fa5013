//! Crossplane claim backend
//!
//! Gateways and tunnels are provisioned as namespaced Crossplane claims in
//! the `net.interconnect.dev/v1alpha1` group. Each provider contributes a
//! [`ProviderProfile`] (claim kinds, spec layout, status tables); the claim
//! lifecycle, idempotency and error classification live here once.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams},
    discovery::ApiResource,
    Client, ResourceExt,
};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{map_tunnel_status, GatewayClient, GatewayRequest, TunnelRequest};
use crate::agents::interconnect::error::{InterconnectError, ProviderErrorKind};
use crate::agents::interconnect::retry::{retry_with_backoff, RetryConfig};
use crate::agents::interconnect::types::{GatewayRef, ProviderTag, TunnelHandle, TunnelStatus};

type Result<T> = std::result::Result<T, InterconnectError>;

pub const CLAIM_GROUP: &str = "net.interconnect.dev";
pub const CLAIM_VERSION: &str = "v1alpha1";
const FIELD_MANAGER: &str = "interconnect-engine";
const PSK_SECRET_KEY: &str = "presharedKey";

/// A claim kind and its plural resource name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClaimKind {
    pub kind: &'static str,
    pub plural: &'static str,
}

impl ClaimKind {
    pub const fn new(kind: &'static str, plural: &'static str) -> Self {
        Self { kind, plural }
    }

    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: CLAIM_GROUP.to_string(),
            version: CLAIM_VERSION.to_string(),
            api_version: format!("{}/{}", CLAIM_GROUP, CLAIM_VERSION),
            kind: self.kind.to_string(),
            plural: self.plural.to_string(),
        }
    }
}

/// The parts of a claim the engine reads and writes
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimObject {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    /// Deletion has been requested but the claim still exists
    pub deleting: bool,
    /// Everything outside metadata (`spec`, `status`)
    pub data: Value,
}

impl ClaimObject {
    pub fn new(name: &str, labels: &BTreeMap<String, String>, spec: Value) -> Self {
        Self {
            name: name.to_string(),
            labels: labels.clone(),
            deleting: false,
            data: json!({ "spec": spec }),
        }
    }
}

impl From<DynamicObject> for ClaimObject {
    fn from(obj: DynamicObject) -> Self {
        Self {
            name: obj.name_any(),
            labels: obj.labels().clone(),
            deleting: obj.metadata.deletion_timestamp.is_some(),
            data: obj.data,
        }
    }
}

/// Reference to the Secret holding a tunnel's pre-shared key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}

impl SecretKeyRef {
    pub fn to_json(&self) -> Value {
        json!({ "name": self.name, "key": self.key })
    }
}

/// Minimal claim CRUD, implemented against Kubernetes and in memory for tests
#[async_trait]
pub trait ClaimApi: Send + Sync {
    async fn get(&self, kind: ClaimKind, name: &str) -> Result<Option<ClaimObject>>;

    /// Fails with `Conflict` if a claim with that name already exists
    async fn create(&self, kind: ClaimKind, claim: &ClaimObject) -> Result<ClaimObject>;

    /// Fails with `NotFound` if the claim does not exist
    async fn delete(&self, kind: ClaimKind, name: &str) -> Result<()>;

    /// Create or replace a Secret
    async fn apply_secret(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
        data: BTreeMap<String, String>,
    ) -> Result<()>;

    /// Fails with `NotFound` if the Secret does not exist
    async fn delete_secret(&self, name: &str) -> Result<()>;
}

/// Map a Kubernetes API failure onto the engine's error taxonomy
pub fn classify_kube_error(provider: ProviderTag, what: &str, err: kube::Error) -> InterconnectError {
    match err {
        kube::Error::Api(resp) => match resp.code {
            404 => InterconnectError::not_found(what),
            409 => InterconnectError::Conflict(format!("{}: {}", what, resp.message)),
            429 => InterconnectError::provider(provider, ProviderErrorKind::RateLimited, resp.message),
            401 | 403 => InterconnectError::provider(provider, ProviderErrorKind::Permission, resp.message),
            code if code >= 500 => InterconnectError::provider(
                provider,
                ProviderErrorKind::Transient,
                format!("{} ({})", resp.message, code),
            ),
            _ => InterconnectError::provider(provider, ProviderErrorKind::InvalidRequest, resp.message),
        },
        kube::Error::SerdeError(e) => {
            InterconnectError::provider(provider, ProviderErrorKind::InvalidRequest, e.to_string())
        }
        other => InterconnectError::provider(provider, ProviderErrorKind::Transient, other.to_string()),
    }
}

/// [`ClaimApi`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeClaimApi {
    client: Client,
    namespace: String,
    provider: ProviderTag,
}

impl KubeClaimApi {
    pub fn new(client: Client, namespace: &str, provider: ProviderTag) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            provider,
        }
    }

    fn claims(&self, kind: ClaimKind) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), &self.namespace, &kind.api_resource())
    }

    fn secrets(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn classify(&self, what: String, err: kube::Error) -> InterconnectError {
        classify_kube_error(self.provider, &what, err)
    }
}

#[async_trait]
impl ClaimApi for KubeClaimApi {
    async fn get(&self, kind: ClaimKind, name: &str) -> Result<Option<ClaimObject>> {
        self.claims(kind)
            .get_opt(name)
            .await
            .map(|obj| obj.map(ClaimObject::from))
            .map_err(|e| self.classify(format!("{}/{}", kind.kind, name), e))
    }

    async fn create(&self, kind: ClaimKind, claim: &ClaimObject) -> Result<ClaimObject> {
        let mut manifest = json!({
            "apiVersion": format!("{}/{}", CLAIM_GROUP, CLAIM_VERSION),
            "kind": kind.kind,
            "metadata": {
                "name": claim.name,
                "namespace": self.namespace,
                "labels": claim.labels,
            },
        });
        if let (Some(target), Some(fields)) = (manifest.as_object_mut(), claim.data.as_object()) {
            for (key, value) in fields {
                target.insert(key.clone(), value.clone());
            }
        }

        let obj: DynamicObject = serde_json::from_value(manifest)?;
        let created = self
            .claims(kind)
            .create(&PostParams::default(), &obj)
            .await
            .map_err(|e| self.classify(format!("{}/{}", kind.kind, claim.name), e))?;

        info!(kind = kind.kind, name = %claim.name, namespace = %self.namespace, "Created claim");
        Ok(created.into())
    }

    async fn delete(&self, kind: ClaimKind, name: &str) -> Result<()> {
        self.claims(kind)
            .delete(name, &DeleteParams::foreground())
            .await
            .map_err(|e| self.classify(format!("{}/{}", kind.kind, name), e))?;
        info!(kind = kind.kind, name = %name, "Deleted claim");
        Ok(())
    }

    async fn apply_secret(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
        data: BTreeMap<String, String>,
    ) -> Result<()> {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            string_data: Some(data),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        };

        self.secrets()
            .patch(name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&secret))
            .await
            .map_err(|e| self.classify(format!("Secret/{}", name), e))?;
        debug!(secret_name = %name, "Applied tunnel secret");
        Ok(())
    }

    async fn delete_secret(&self, name: &str) -> Result<()> {
        self.secrets()
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| self.classify(format!("Secret/{}", name), e))?;
        debug!(secret_name = %name, "Deleted tunnel secret");
        Ok(())
    }
}

/// Condition summary of a claim
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClaimStatus {
    pub ready: bool,
    pub public_ip: Option<IpAddr>,
    /// Provider-native state string, when the composition surfaces one
    pub native_state: Option<String>,
    /// Message of a `Synced=False` condition
    pub sync_error: Option<String>,
    pub deleting: bool,
}

fn condition<'a>(status: &'a Value, kind: &str) -> Option<&'a Value> {
    status
        .get("conditions")?
        .as_array()?
        .iter()
        .find(|c| c.get("type").and_then(Value::as_str) == Some(kind))
}

fn condition_is(cond: Option<&Value>, expected: &str) -> bool {
    cond.and_then(|c| c.get("status"))
        .and_then(Value::as_str)
        == Some(expected)
}

impl ClaimStatus {
    pub fn of(claim: &ClaimObject) -> Self {
        let Some(status) = claim.data.get("status") else {
            return Self {
                deleting: claim.deleting,
                ..Self::default()
            };
        };

        let synced = condition(status, "Synced");
        let sync_error = if condition_is(synced, "False") {
            synced
                .and_then(|c| c.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| Some("Synced=False".to_string()))
        } else {
            None
        };

        Self {
            ready: condition_is(condition(status, "Ready"), "True"),
            public_ip: status
                .get("publicIp")
                .and_then(Value::as_str)
                .and_then(|ip| ip.parse().ok()),
            native_state: status
                .get("tunnelState")
                .and_then(Value::as_str)
                .map(str::to_string),
            sync_error,
            deleting: claim.deleting,
        }
    }
}

/// Provider-specific half of a Crossplane-backed client
pub trait ProviderProfile: Send + Sync + 'static {
    fn provider(&self) -> ProviderTag;

    fn gateway_kind(&self) -> ClaimKind;

    fn tunnel_kind(&self) -> ClaimKind;

    /// Native tunnel states and their canonical mapping
    fn tunnel_states(&self) -> &'static [(&'static str, TunnelStatus)];

    /// `Synced=False` message fragments that mean the claim can never succeed
    fn terminal_failures(&self) -> &'static [(&'static str, ProviderErrorKind)];

    fn gateway_spec(&self, request: &GatewayRequest) -> Value;

    fn tunnel_spec(
        &self,
        local: &GatewayRef,
        peer: &GatewayRef,
        request: &TunnelRequest,
        psk: &SecretKeyRef,
    ) -> Value;
}

/// [`GatewayClient`] implemented over Crossplane claims for one provider
pub struct CrossplaneGatewayClient<P> {
    profile: P,
    claims: Arc<dyn ClaimApi>,
    retry: RetryConfig,
}

impl<P: ProviderProfile> CrossplaneGatewayClient<P> {
    pub fn new(profile: P, claims: Arc<dyn ClaimApi>) -> Self {
        Self {
            profile,
            claims,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn profile(&self) -> &P {
        &self.profile
    }

    async fn retrying<T, F, Fut>(&self, operation: &str, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        retry_with_backoff(&self.retry, operation, InterconnectError::is_recoverable_provider, f)
            .await
            .into_result()
    }

    /// Existing claim, or a newly created one. A create that races another
    /// writer reads back the winner.
    async fn ensure_claim(&self, kind: ClaimKind, claim: &ClaimObject) -> Result<ClaimObject> {
        if let Some(existing) = self.claims.get(kind, &claim.name).await? {
            info!(kind = kind.kind, name = %claim.name, "Claim already exists, adopting");
            return Ok(existing);
        }

        match self.claims.create(kind, claim).await {
            Ok(created) => Ok(created),
            Err(InterconnectError::Conflict(_)) => {
                self.claims.get(kind, &claim.name).await?.ok_or_else(|| {
                    InterconnectError::provider(
                        self.profile.provider(),
                        ProviderErrorKind::Transient,
                        format!("{} {} vanished after create conflict", kind.kind, claim.name),
                    )
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch(&self, kind: ClaimKind, name: &str) -> Result<ClaimObject> {
        self.claims
            .get(kind, name)
            .await?
            .ok_or_else(|| InterconnectError::not_found(format!("{} {}", kind.kind, name)))
    }

    /// Delete a claim; absent claims count as deleted
    async fn remove(&self, kind: ClaimKind, name: &str) -> Result<()> {
        match self.claims.delete(kind, name).await {
            Err(e) if e.is_not_found() => {
                debug!(kind = kind.kind, name = %name, "Claim already absent");
                Ok(())
            }
            other => other,
        }
    }

    fn terminal_failure(&self, name: &str, status: &ClaimStatus) -> Option<InterconnectError> {
        let message = status.sync_error.as_deref()?;
        self.profile
            .terminal_failures()
            .iter()
            .find(|(needle, _)| message.contains(needle))
            .map(|(_, kind)| {
                InterconnectError::provider(self.profile.provider(), *kind, format!("{}: {}", name, message))
            })
    }

    fn gateway_ref(&self, name: &str, region: &str, status: &ClaimStatus) -> GatewayRef {
        GatewayRef {
            provider: self.profile.provider(),
            native_id: name.to_string(),
            region: region.to_string(),
            public_ip: status.public_ip,
            ready: status.ready && status.public_ip.is_some() && !status.deleting,
        }
    }

    fn psk_secret(&self, tunnel: &str) -> SecretKeyRef {
        SecretKeyRef {
            name: format!("{}-psk", tunnel),
            key: PSK_SECRET_KEY.to_string(),
        }
    }
}

#[async_trait]
impl<P: ProviderProfile> GatewayClient for CrossplaneGatewayClient<P> {
    fn provider(&self) -> ProviderTag {
        self.profile.provider()
    }

    async fn create_gateway(&self, request: &GatewayRequest) -> Result<GatewayRef> {
        let kind = self.profile.gateway_kind();
        let name = request.name()?;
        let claim = ClaimObject::new(&name, &request.labels, self.profile.gateway_spec(request));
        let (claim, name) = (&claim, &name);

        self.retrying("create_gateway", || async move {
            let object = self.ensure_claim(kind, claim).await?;
            let status = ClaimStatus::of(&object);

            if status.deleting {
                return Err(InterconnectError::provider(
                    self.profile.provider(),
                    ProviderErrorKind::Transient,
                    format!("gateway {} is pending deletion", name),
                ));
            }
            if let Some(err) = self.terminal_failure(name, &status) {
                return Err(err);
            }
            Ok(self.gateway_ref(name, &request.region, &status))
        })
        .await
    }

    async fn get_gateway(&self, gateway: &GatewayRef) -> Result<GatewayRef> {
        let kind = self.profile.gateway_kind();
        let object = self
            .retrying("get_gateway", || self.fetch(kind, &gateway.native_id))
            .await?;
        let status = ClaimStatus::of(&object);

        if let Some(err) = self.terminal_failure(&gateway.native_id, &status) {
            return Err(err);
        }
        Ok(self.gateway_ref(&gateway.native_id, &gateway.region, &status))
    }

    async fn delete_gateway(&self, gateway: &GatewayRef) -> Result<()> {
        let kind = self.profile.gateway_kind();
        self.retrying("delete_gateway", || self.remove(kind, &gateway.native_id))
            .await
    }

    async fn create_tunnel(
        &self,
        local: &GatewayRef,
        peer: &GatewayRef,
        request: &TunnelRequest,
    ) -> Result<TunnelHandle> {
        if local.provider != self.profile.provider() {
            return Err(InterconnectError::Validation(format!(
                "{} client cannot create tunnels from a {} gateway",
                self.profile.provider(),
                local.provider
            )));
        }
        for gateway in [local, peer] {
            if !gateway.ready || gateway.public_ip.is_none() {
                return Err(InterconnectError::GatewayNotReady {
                    gateway: gateway.native_id.clone(),
                });
            }
        }

        let kind = self.profile.tunnel_kind();
        let name = request.name()?;
        let secret = self.psk_secret(&name);
        let data = BTreeMap::from([(
            secret.key.clone(),
            request.preshared_key.expose().to_string(),
        )]);

        self.retrying("apply_tunnel_secret", || {
            self.claims.apply_secret(&secret.name, &request.labels, data.clone())
        })
        .await?;

        let claim = ClaimObject::new(
            &name,
            &request.labels,
            self.profile.tunnel_spec(local, peer, request, &secret),
        );
        let (claim, name) = (&claim, &name);

        self.retrying("create_tunnel", || async move {
            let object = self.ensure_claim(kind, claim).await?;
            let status = ClaimStatus::of(&object);
            if let Some(err) = self.terminal_failure(name, &status) {
                return Err(err);
            }
            Ok(TunnelHandle {
                provider: self.profile.provider(),
                native_id: name.clone(),
            })
        })
        .await
    }

    async fn get_tunnel_status(&self, handle: &TunnelHandle) -> Result<TunnelStatus> {
        let kind = self.profile.tunnel_kind();
        let object = self
            .retrying("get_tunnel_status", || self.fetch(kind, &handle.native_id))
            .await?;
        let status = ClaimStatus::of(&object);

        if let Some(err) = self.terminal_failure(&handle.native_id, &status) {
            return Err(err);
        }
        Ok(status
            .native_state
            .as_deref()
            .map(|s| map_tunnel_status(self.profile.tunnel_states(), s))
            .unwrap_or(TunnelStatus::Unknown))
    }

    async fn delete_tunnel(&self, handle: &TunnelHandle) -> Result<()> {
        let kind = self.profile.tunnel_kind();
        self.retrying("delete_tunnel", || self.remove(kind, &handle.native_id))
            .await?;

        let secret = &self.psk_secret(&handle.native_id);
        self.retrying("delete_tunnel_secret", || async move {
            match self.claims.delete_secret(&secret.name).await {
                Err(e) if e.is_not_found() => Ok(()),
                other => other,
            }
        })
        .await
    }
}
