//! Connection lifecycle events

use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tracing::{info, warn};

use super::types::{ConnectionState, ResourceRef};

/// How a compensating action ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationOutcome {
    Removed,
    /// The provider no longer had the resource
    AlreadyAbsent,
    /// Retries exhausted; the resource is still present
    Dangling,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConnectionEvent {
    StateTransition {
        connection: String,
        from: ConnectionState,
        to: ConnectionState,
    },
    Compensation {
        connection: String,
        resource: ResourceRef,
        outcome: CompensationOutcome,
        attempts: u32,
    },
}

/// Receiver of connection events (audit log, metrics, tests)
pub trait EventSink: Send + Sync {
    fn record(&self, event: ConnectionEvent);
}

/// Emits every event as a structured tracing record
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn record(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::StateTransition { connection, from, to } => {
                info!(connection = %connection, from = %from, to = %to, "State transition");
            }
            ConnectionEvent::Compensation {
                connection,
                resource,
                outcome: CompensationOutcome::Dangling,
                attempts,
            } => {
                warn!(connection = %connection, resource = %resource, attempts, "Compensation failed, resource left behind");
            }
            ConnectionEvent::Compensation {
                connection,
                resource,
                outcome,
                attempts,
            } => {
                info!(connection = %connection, resource = %resource, outcome = ?outcome, attempts, "Compensated");
            }
        }
    }
}

/// Collects events in memory
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<ConnectionEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ConnectionEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// States entered by a connection, in order
    pub fn states_for(&self, connection: &str) -> Vec<ConnectionState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ConnectionEvent::StateTransition { connection: c, to, .. } if c == connection => Some(to),
                _ => None,
            })
            .collect()
    }

    pub fn compensations_for(&self, connection: &str) -> Vec<(ResourceRef, CompensationOutcome)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ConnectionEvent::Compensation {
                    connection: c,
                    resource,
                    outcome,
                    ..
                } if c == connection => Some((resource, outcome)),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for MemoryEventSink {
    fn record(&self, event: ConnectionEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
