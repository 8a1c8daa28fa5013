//! Connection Orchestrator
//!
//! Drives the create and delete sagas for site-to-site VPN connections
//! across two provider clients.
//!
//! ## Create saga
//!
//! ```text
//! Pending
//!   └─> ProvisioningSideA ──┬─ create gateway A ┐ (concurrent)
//!       ProvisioningSideB ──┴─ create gateway B ┘
//!         └─> wait for both gateways ready
//!   └─> ConfiguringTunnels ── create tunnel 0, tunnel 1 ── wait for UP
//!   └─> Active
//!
//! any failure ─> RollingBack ── compensate in reverse ──> Failed
//! ```
//!
//! Every confirmed resource is appended to the record's saga log and
//! persisted before the next step, so a restarted process resumes (or
//! compensates) from exactly what exists. A crash between a provider call
//! and that write leaves a resource only its native name points to; delete
//! sweeps those names for records that never settled.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use futures::future::try_join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::EngineConfig;
use super::error::{ConnectionError, InterconnectError};
use super::events::{CompensationOutcome, ConnectionEvent, EventSink, TracingEventSink};
use super::providers::{GatewayClient, GatewayRequest, ProviderRegistry, TunnelRequest};
use super::reconciler::wait_until;
use super::retry::{retry_with_backoff, RetryOutcome};
use super::store::StateStore;
use super::types::{
    ConnectionState, GatewayRef, ResourceRef, Side, TunnelHandle, TunnelStatus, VpnConnection,
    VpnConnectionSpec,
};
use super::validation::validate_spec;

type Result<T> = std::result::Result<T, InterconnectError>;

/// Saga coordinator for VPN connections
pub struct ConnectionOrchestrator {
    registry: ProviderRegistry,
    store: Arc<dyn StateStore>,
    events: Arc<dyn EventSink>,
    config: EngineConfig,
}

impl ConnectionOrchestrator {
    pub fn new(registry: ProviderRegistry, store: Arc<dyn StateStore>, config: EngineConfig) -> Self {
        Self {
            registry,
            store,
            events: Arc::new(TracingEventSink),
            config,
        }
    }

    /// Replace the default tracing event sink
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a connection, or resume / return an existing attempt with the same name.
    pub async fn create_vpn_connection(&self, spec: &VpnConnectionSpec) -> Result<VpnConnection> {
        self.create_vpn_connection_with_cancel(spec, &CancellationToken::new())
            .await
    }

    /// Same as [`Self::create_vpn_connection`], rolling back when `cancel` fires.
    ///
    /// Cancellation is observed between steps and during status waits; a
    /// provider call already in flight completes first so its resource is
    /// recorded and compensated.
    pub async fn create_vpn_connection_with_cancel(
        &self,
        spec: &VpnConnectionSpec,
        cancel: &CancellationToken,
    ) -> Result<VpnConnection> {
        let existing = self.store.list().await?;
        validate_spec(spec, &existing, &self.registry.providers())?;

        let _lock = self.store.lock(&spec.name).await?;

        let mut conn = match self.store.get(&spec.name).await? {
            None => self.start(spec).await?,
            Some(record) => match record.state {
                ConnectionState::Active => {
                    info!(connection = %record.name, id = %record.id, "Connection already active");
                    return Ok(record);
                }
                ConnectionState::Deleted => self.start(spec).await?,
                ConnectionState::Failed if record.dangling().is_empty() => {
                    info!(connection = %record.name, "Previous attempt failed cleanly, starting over");
                    self.start(spec).await?
                }
                ConnectionState::Failed | ConnectionState::Deleting => {
                    return Err(InterconnectError::Conflict(format!(
                        "connection {} is {} with resources still present, delete it first",
                        record.name, record.state
                    )));
                }
                ConnectionState::RollingBack => {
                    let mut record = record;
                    let recorded = match record.last_error.clone() {
                        Some(last) => InterconnectError::Recorded(last),
                        None => InterconnectError::Store(format!(
                            "connection {} was rolling back without a recorded error",
                            record.name
                        )),
                    };
                    info!(connection = %record.name, "Finishing interrupted rollback");
                    return Err(self.finish_rollback(&mut record, recorded).await);
                }
                _ => {
                    if record.side_a != spec.side_a || record.side_b != spec.side_b {
                        return Err(InterconnectError::Conflict(format!(
                            "connection {} has an unfinished attempt with different sides, delete it first",
                            record.name
                        )));
                    }
                    info!(
                        connection = %record.name,
                        state = %record.state,
                        correlation_id = %record.correlation_id,
                        "Resuming connection"
                    );
                    record
                }
            },
        };

        if conn.state == ConnectionState::Pending {
            self.claim_addresses(spec, &conn).await?;
        }

        match self.run_saga(&mut conn, cancel).await {
            Ok(()) => {
                info!(connection = %conn.name, id = %conn.id, pair = %conn.provider_pair, "Connection active");
                Ok(conn)
            }
            Err(e) => Err(self.roll_back(&mut conn, e).await),
        }
    }

    /// Look up a connection by name or id and refresh its live status.
    ///
    /// Transient provider failures keep the stored status. A recorded
    /// resource that has vanished is marked unknown, noted in `last_error`
    /// and returned as `NotFound`, unless the connection is being torn
    /// down. The refreshed record is only written back when no other
    /// operation holds the connection.
    pub async fn get_vpn_connection(&self, name_or_id: &str) -> Result<VpnConnection> {
        let mut conn = self
            .find(name_or_id)
            .await?
            .ok_or_else(|| InterconnectError::not_found(format!("connection {}", name_or_id)))?;
        let observed = conn.updated_at;

        let surfaced = self.refresh(&mut conn).await;

        match self.store.lock(&conn.name).await {
            Ok(_lock) => {
                let unchanged = self
                    .store
                    .get(&conn.name)
                    .await?
                    .is_some_and(|stored| stored.updated_at == observed);
                if unchanged {
                    if let Err(e) = self.persist(&mut conn).await {
                        warn!(connection = %conn.name, error = %e, "Failed to store refreshed status");
                    }
                }
            }
            Err(e) => debug!(connection = %conn.name, reason = %e, "Not storing refreshed status"),
        }

        match surfaced {
            Some(e) => Err(e),
            None => Ok(conn),
        }
    }

    /// Tear down every recorded resource and remove the record.
    ///
    /// Re-entrant from any persisted state; an unknown connection is
    /// already deleted.
    pub async fn delete_vpn_connection(&self, name_or_id: &str) -> Result<()> {
        let Some(found) = self.find(name_or_id).await? else {
            info!(connection = %name_or_id, "Connection already absent");
            return Ok(());
        };

        let _lock = self.store.lock(&found.name).await?;
        let Some(mut conn) = self.store.get(&found.name).await? else {
            return Ok(());
        };

        if conn.state == ConnectionState::Deleted {
            self.store.delete(&conn.name).await?;
            return Ok(());
        }
        // Only Active and Failed records have a complete saga log; any other
        // state may have stopped between a provider call and its record.
        let log_complete = matches!(conn.state, ConnectionState::Active | ConnectionState::Failed);
        if conn.state != ConnectionState::Deleting {
            self.advance(&mut conn, ConnectionState::Deleting).await?;
        }

        let mut dangling = Vec::new();
        if !log_complete {
            dangling.extend(self.sweep_unrecorded(&mut conn).await);
        }
        dangling.extend(self.compensate(&mut conn).await);
        if !dangling.is_empty() {
            let error = InterconnectError::PartialFailure { dangling };
            conn.last_error = Some(ConnectionError::from_error(&error, ConnectionState::Deleting));
            self.persist(&mut conn).await?;
            warn!(connection = %conn.name, error = %error, "Delete incomplete");
            return Err(error);
        }

        self.advance(&mut conn, ConnectionState::Deleted).await?;
        self.store.delete(&conn.name).await?;
        info!(connection = %conn.name, id = %conn.id, "Connection deleted");
        Ok(())
    }

    /// Re-check overlap once this attempt is visible in the store.
    ///
    /// Locks are per name, so two creates sharing a network can both pass
    /// the first check. Each re-checks after storing its own record; when
    /// they overlap, both back out before touching a provider.
    async fn claim_addresses(&self, spec: &VpnConnectionSpec, conn: &VpnConnection) -> Result<()> {
        let existing = self.store.list().await?;
        if let Err(e) = validate_spec(spec, &existing, &self.registry.providers()) {
            warn!(connection = %conn.name, error = %e, "Lost address race, backing out");
            self.store.delete(&conn.name).await?;
            return Err(e);
        }
        Ok(())
    }

    async fn start(&self, spec: &VpnConnectionSpec) -> Result<VpnConnection> {
        let mut conn = VpnConnection::from_spec(spec);
        self.persist(&mut conn).await?;
        info!(
            connection = %conn.name,
            id = %conn.id,
            correlation_id = %conn.correlation_id,
            pair = %conn.provider_pair,
            "Starting connection"
        );
        Ok(conn)
    }

    async fn run_saga(&self, conn: &mut VpnConnection, cancel: &CancellationToken) -> Result<()> {
        if conn.state == ConnectionState::Pending {
            ensure_not_cancelled(cancel)?;
            self.advance(conn, ConnectionState::ProvisioningSideA).await?;
        }

        if !conn.state.has_reached(ConnectionState::ConfiguringTunnels) {
            ensure_not_cancelled(cancel)?;
            self.provision_gateways(conn).await?;
            ensure_not_cancelled(cancel)?;
            self.wait_for_gateways(conn, cancel).await?;
            self.advance(conn, ConnectionState::ConfiguringTunnels).await?;
        }

        if conn.state == ConnectionState::ConfiguringTunnels {
            let ready = [Side::A, Side::B]
                .iter()
                .all(|side| conn.gateway(*side).is_some_and(|g| g.ready));
            if !ready {
                self.wait_for_gateways(conn, cancel).await?;
            }
            self.create_tunnels(conn, cancel).await?;
            self.wait_for_tunnels(conn, cancel).await?;
            self.advance(conn, ConnectionState::Active).await?;
        }

        Ok(())
    }

    /// Create whichever gateways the record does not hold yet, both sides at once.
    async fn provision_gateways(&self, conn: &mut VpnConnection) -> Result<()> {
        let client_a = self.registry.get(conn.side_a.provider)?;
        let client_b = self.registry.get(conn.side_b.provider)?;
        let request_a = GatewayRequest::for_side(conn, Side::A);
        let request_b = GatewayRequest::for_side(conn, Side::B);

        let (result_a, result_b) = futures::join!(
            ensure_gateway(client_a.as_ref(), conn.gateway_a.as_ref(), &request_a),
            ensure_gateway(client_b.as_ref(), conn.gateway_b.as_ref(), &request_b),
        );

        let error_a = record_gateway(conn, Side::A, result_a);
        let error_b = record_gateway(conn, Side::B, result_b);
        self.persist(conn).await?;

        if let Some(e) = error_a {
            return Err(e);
        }
        if conn.state == ConnectionState::ProvisioningSideA {
            self.advance(conn, ConnectionState::ProvisioningSideB).await?;
        }
        match error_b {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn wait_for_gateways(&self, conn: &mut VpnConnection, cancel: &CancellationToken) -> Result<()> {
        let a = required_gateway(conn, Side::A)?;
        let b = required_gateway(conn, Side::B)?;
        let client_a = self.registry.get(a.provider)?;
        let client_b = self.registry.get(b.provider)?;

        let latest = Mutex::new((a, b));
        let label = format!("gateways of {}", conn.name);
        let outcome = {
            let latest = &latest;
            let client_a = client_a.as_ref();
            let client_b = client_b.as_ref();
            wait_until(&label, &self.config.gateway_wait, cancel, move || async move {
                let (a, b) = latest.lock().unwrap_or_else(PoisonError::into_inner).clone();
                let (a, b) = futures::try_join!(client_a.get_gateway(&a), client_b.get_gateway(&b))?;
                let ready = a.ready && b.ready;
                *latest.lock().unwrap_or_else(PoisonError::into_inner) = (a, b);
                Ok::<_, InterconnectError>(ready)
            })
            .await
        };

        let (a, b) = latest.into_inner().unwrap_or_else(PoisonError::into_inner);
        conn.set_gateway(Side::A, a);
        conn.set_gateway(Side::B, b);

        let waited = outcome?;
        info!(
            connection = %conn.name,
            polls = waited.polls,
            elapsed_secs = waited.elapsed.as_secs(),
            "Gateways ready"
        );
        self.persist(conn).await
    }

    /// Tunnels are created one at a time through side A's client.
    async fn create_tunnels(&self, conn: &mut VpnConnection, cancel: &CancellationToken) -> Result<()> {
        let local = required_gateway(conn, Side::A)?;
        let peer = required_gateway(conn, Side::B)?;
        let client = self.registry.get(local.provider)?;

        for index in 0..conn.tunnels.len() {
            if conn.tunnels[index].handle.is_some() {
                continue;
            }
            ensure_not_cancelled(cancel)?;

            let Some(request) = TunnelRequest::for_tunnel(conn, index) else {
                continue;
            };
            let handle = client.create_tunnel(&local, &peer, &request).await?;
            info!(
                connection = %conn.name,
                tunnel = %handle.native_id,
                inside_cidr = %request.inside_cidr,
                "Tunnel created"
            );

            conn.record_created(ResourceRef::tunnel(&handle));
            conn.tunnels[index].handle = Some(handle);
            self.persist(conn).await?;
        }
        Ok(())
    }

    async fn wait_for_tunnels(&self, conn: &mut VpnConnection, cancel: &CancellationToken) -> Result<()> {
        let mut targets: Vec<(usize, Arc<dyn GatewayClient>, TunnelHandle)> = Vec::new();
        for (index, tunnel) in conn.tunnels.iter().enumerate() {
            if let Some(handle) = &tunnel.handle {
                targets.push((index, self.registry.get(handle.provider)?, handle.clone()));
            }
        }

        let statuses = Mutex::new(Vec::new());
        let label = format!("tunnels of {}", conn.name);
        let outcome = {
            let targets = &targets;
            let statuses = &statuses;
            wait_until(&label, &self.config.tunnel_wait, cancel, move || async move {
                let polled = try_join_all(
                    targets
                        .iter()
                        .map(|(_, client, handle)| client.get_tunnel_status(handle)),
                )
                .await?;
                let up = !polled.is_empty() && polled.iter().all(|s| *s == TunnelStatus::Up);
                *statuses.lock().unwrap_or_else(PoisonError::into_inner) = polled;
                Ok::<_, InterconnectError>(up)
            })
            .await
        };

        let polled = statuses.into_inner().unwrap_or_else(PoisonError::into_inner);
        for ((index, _, _), status) in targets.iter().zip(polled) {
            conn.tunnels[*index].status = status;
        }

        let waited = outcome?;
        info!(connection = %conn.name, polls = waited.polls, "Tunnels up");
        Ok(())
    }

    /// Record the failure, compensate, and end in `Failed`.
    ///
    /// Returns the error the caller should see.
    async fn roll_back(&self, conn: &mut VpnConnection, cause: InterconnectError) -> InterconnectError {
        warn!(
            connection = %conn.name,
            state = %conn.state,
            error = %cause,
            "Create failed, rolling back"
        );
        conn.last_error = Some(ConnectionError::from_error(&cause, conn.state));
        if let Err(e) = self.advance(conn, ConnectionState::RollingBack).await {
            error!(connection = %conn.name, error = %e, "Failed to record rollback");
        }
        self.finish_rollback(conn, cause).await
    }

    async fn finish_rollback(&self, conn: &mut VpnConnection, cause: InterconnectError) -> InterconnectError {
        let dangling = self.compensate(conn).await;

        let surfaced = if dangling.is_empty() {
            cause
        } else {
            let failed_at = conn
                .last_error
                .as_ref()
                .map(|e| e.failed_at)
                .unwrap_or(conn.state);
            let partial = InterconnectError::PartialFailure { dangling };
            conn.last_error = Some(ConnectionError::from_error(&partial, failed_at));
            partial
        };

        if let Err(e) = self.advance(conn, ConnectionState::Failed).await {
            error!(connection = %conn.name, error = %e, "Failed to record failed state");
        }
        surfaced
    }

    /// Remove saga log entries newest first; returns what could not be removed.
    ///
    /// A dangling resource does not stop the walk, every other entry is
    /// still attempted.
    async fn compensate(&self, conn: &mut VpnConnection) -> Vec<ResourceRef> {
        let log: Vec<ResourceRef> = conn.created_resources.iter().rev().cloned().collect();
        let mut dangling = Vec::new();

        for resource in log {
            let RetryOutcome { result, attempts } = self.remove_resource(&resource).await;
            let outcome = match &result {
                Ok(()) => CompensationOutcome::Removed,
                Err(e) if e.is_not_found() => CompensationOutcome::AlreadyAbsent,
                Err(e) => {
                    warn!(connection = %conn.name, resource = %resource, attempts, error = %e, "Could not remove resource");
                    CompensationOutcome::Dangling
                }
            };

            self.events.record(ConnectionEvent::Compensation {
                connection: conn.name.clone(),
                resource: resource.clone(),
                outcome,
                attempts,
            });

            if outcome == CompensationOutcome::Dangling {
                dangling.push(resource);
                continue;
            }
            conn.forget(&resource);
            if let Err(e) = self.persist(conn).await {
                warn!(connection = %conn.name, error = %e, "Failed to record compensation");
            }
        }

        dangling
    }

    /// Remove resources that carry this connection's native names but are
    /// missing from the saga log; absent ones count as removed.
    ///
    /// Failures are added to the log so the next delete retries them.
    async fn sweep_unrecorded(&self, conn: &mut VpnConnection) -> Vec<ResourceRef> {
        let mut dangling = Vec::new();

        for resource in unrecorded_resources(conn) {
            let RetryOutcome { result, attempts } = self.remove_resource(&resource).await;
            match result {
                Ok(()) => debug!(connection = %conn.name, resource = %resource, "Swept unrecorded resource"),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(connection = %conn.name, resource = %resource, attempts, error = %e, "Could not remove unrecorded resource");
                    conn.record_created(resource.clone());
                    dangling.push(resource);
                }
            }
        }

        dangling
    }

    async fn remove_resource(&self, resource: &ResourceRef) -> RetryOutcome<(), InterconnectError> {
        let client = match self.registry.get(resource.provider()) {
            Ok(client) => client,
            Err(e) => {
                return RetryOutcome {
                    result: Err(e),
                    attempts: 0,
                }
            }
        };
        let client = client.as_ref();
        let label = format!("delete {}", resource);

        retry_with_backoff(
            &self.config.compensation_retry,
            &label,
            |e: &InterconnectError| !e.is_not_found(),
            move || async move {
                match resource {
                    ResourceRef::Gateway {
                        provider,
                        native_id,
                        region,
                    } => {
                        client
                            .delete_gateway(&GatewayRef::unobserved(*provider, native_id, region))
                            .await
                    }
                    ResourceRef::Tunnel { provider, native_id } => {
                        client
                            .delete_tunnel(&TunnelHandle {
                                provider: *provider,
                                native_id: native_id.clone(),
                            })
                            .await
                    }
                }
            },
        )
        .await
    }

    /// Re-read gateway and tunnel status; returns the first error `get` surfaces.
    async fn refresh(&self, conn: &mut VpnConnection) -> Option<InterconnectError> {
        let expect_present = !matches!(
            conn.state,
            ConnectionState::RollingBack
                | ConnectionState::Failed
                | ConnectionState::Deleting
                | ConnectionState::Deleted
        );
        let mut surfaced = None;

        for side in [Side::A, Side::B] {
            let Some(gateway) = conn.gateway(side).cloned() else {
                continue;
            };
            let refreshed = match self.registry.get(gateway.provider) {
                Ok(client) => client.get_gateway(&gateway).await,
                Err(e) => Err(e),
            };
            match refreshed {
                Ok(fresh) => conn.set_gateway(side, fresh),
                Err(e) if e.is_transient() => {
                    warn!(connection = %conn.name, gateway = %gateway.native_id, error = %e, "Gateway refresh failed")
                }
                Err(e) => {
                    if e.is_not_found() {
                        conn.set_gateway(
                            side,
                            GatewayRef {
                                ready: false,
                                public_ip: None,
                                ..gateway
                            },
                        );
                        if !expect_present {
                            continue;
                        }
                        conn.last_error = Some(ConnectionError::from_error(&e, conn.state));
                    }
                    warn!(connection = %conn.name, side = %side, error = %e, "Gateway refresh failed");
                    surfaced.get_or_insert(e);
                }
            }
        }

        for index in 0..conn.tunnels.len() {
            let Some(handle) = conn.tunnels[index].handle.clone() else {
                continue;
            };
            let status = match self.registry.get(handle.provider) {
                Ok(client) => client.get_tunnel_status(&handle).await,
                Err(e) => Err(e),
            };
            match status {
                Ok(status) => conn.tunnels[index].status = status,
                Err(e) if e.is_transient() => {
                    warn!(connection = %conn.name, tunnel = %handle.native_id, error = %e, "Tunnel refresh failed")
                }
                Err(e) => {
                    if e.is_not_found() {
                        conn.tunnels[index].status = TunnelStatus::Unknown;
                        if !expect_present {
                            continue;
                        }
                        conn.last_error = Some(ConnectionError::from_error(&e, conn.state));
                    }
                    warn!(connection = %conn.name, tunnel = %handle.native_id, error = %e, "Tunnel refresh failed");
                    surfaced.get_or_insert(e);
                }
            }
        }

        surfaced
    }

    /// Store key is the name; ids are resolved by scanning.
    async fn find(&self, name_or_id: &str) -> Result<Option<VpnConnection>> {
        if let Some(record) = self.store.get(name_or_id).await? {
            return Ok(Some(record));
        }
        Ok(self
            .store
            .list()
            .await?
            .into_iter()
            .find(|record| record.id == name_or_id))
    }

    async fn advance(&self, conn: &mut VpnConnection, next: ConnectionState) -> Result<()> {
        let from = conn.transition(next)?;
        self.events.record(ConnectionEvent::StateTransition {
            connection: conn.name.clone(),
            from,
            to: next,
        });
        self.persist(conn).await
    }

    async fn persist(&self, conn: &mut VpnConnection) -> Result<()> {
        conn.updated_at = Utc::now();
        self.store.put(conn).await
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(InterconnectError::Cancelled);
    }
    Ok(())
}

async fn ensure_gateway(
    client: &dyn GatewayClient,
    existing: Option<&GatewayRef>,
    request: &GatewayRequest,
) -> Result<Option<GatewayRef>> {
    match existing {
        Some(_) => Ok(None),
        None => client.create_gateway(request).await.map(Some),
    }
}

/// Fold one side's create result into the record, handing back any error.
fn record_gateway(
    conn: &mut VpnConnection,
    side: Side,
    result: Result<Option<GatewayRef>>,
) -> Option<InterconnectError> {
    match result {
        Ok(Some(gateway)) => {
            info!(connection = %conn.name, side = %side, gateway = %gateway.native_id, "Gateway created");
            conn.record_created(ResourceRef::gateway(&gateway));
            conn.set_gateway(side, gateway);
            None
        }
        Ok(None) => None,
        Err(e) => {
            warn!(connection = %conn.name, side = %side, error = %e, "Gateway creation failed");
            Some(e)
        }
    }
}

/// Native names a create for this connection would use, minus those in
/// the saga log. Tunnels come first so gateways are not busy when reached.
fn unrecorded_resources(conn: &VpnConnection) -> Vec<ResourceRef> {
    let mut derived = Vec::new();

    for index in (0..conn.tunnels.len()).rev() {
        if let Some(native_id) = TunnelRequest::for_tunnel(conn, index).and_then(|r| r.name().ok()) {
            derived.push(ResourceRef::Tunnel {
                provider: conn.side_a.provider,
                native_id,
            });
        }
    }
    for side in [Side::B, Side::A] {
        let request = GatewayRequest::for_side(conn, side);
        if let Ok(native_id) = request.name() {
            derived.push(ResourceRef::Gateway {
                provider: conn.side(side).provider,
                native_id,
                region: request.region,
            });
        }
    }

    derived.retain(|r| !conn.created_resources.contains(r));
    derived
}

fn required_gateway(conn: &VpnConnection, side: Side) -> Result<GatewayRef> {
    conn.gateway(side).cloned().ok_or_else(|| {
        InterconnectError::Store(format!("connection {} has no side {} gateway on record", conn.name, side))
    })
}
