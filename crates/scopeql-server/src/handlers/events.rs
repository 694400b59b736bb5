//! Lifecycle events for writes.
//!
//! Single-row writes notify the model's namespace. Bulk writes notify both
//! the `global` namespace and the model's. Events are collected while a
//! request runs and handed to the emitter only after its transaction
//! commits; an emitter failure is logged and never fails the request.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// Namespace receiving every bulk event.
pub const GLOBAL_NAMESPACE: &str = "global";

/// What happened to the instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Create,
    Update,
    Delete,
    BulkCreate,
    BulkUpdate,
    BulkDelete,
}

impl EventKind {
    pub fn is_bulk(self) -> bool {
        matches!(
            self,
            EventKind::BulkCreate | EventKind::BulkUpdate | EventKind::BulkDelete
        )
    }
}

/// Notification that rows of one model were written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleEvent {
    pub event: EventKind,
    pub model: String,
    pub namespace: String,
    /// Primary keys of the affected rows.
    pub instances: Vec<Value>,
    pub pk_field_name: String,
    pub operation_id: Option<String>,
    pub emitted_at: DateTime<Utc>,
}

/// Receives lifecycle events, e.g. to broadcast them to clients.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: &LifecycleEvent) -> Result<(), String>;
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEmitter;

impl EventEmitter for NullEmitter {
    fn emit(&self, _event: &LifecycleEvent) -> Result<(), String> {
        Ok(())
    }
}

/// Events raised by one request, pending its commit.
#[derive(Debug, Default)]
pub(crate) struct PendingEvents {
    operation_id: Option<String>,
    events: Vec<LifecycleEvent>,
}

impl PendingEvents {
    pub fn new(operation_id: Option<String>) -> Self {
        Self {
            operation_id,
            events: Vec::new(),
        }
    }

    /// Records an event for `instances`, fanned out per namespace.
    pub fn push(&mut self, event: EventKind, model: &str, pk_field_name: &str, instances: Vec<Value>) {
        if instances.is_empty() {
            return;
        }
        let emitted_at = Utc::now();
        let namespaces = if event.is_bulk() {
            vec![GLOBAL_NAMESPACE, model]
        } else {
            vec![model]
        };
        for namespace in namespaces {
            self.events.push(LifecycleEvent {
                event,
                model: model.to_string(),
                namespace: namespace.to_string(),
                instances: instances.clone(),
                pk_field_name: pk_field_name.to_string(),
                operation_id: self.operation_id.clone(),
                emitted_at,
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Hands every event to `emitter`, logging failures.
    pub fn dispatch(self, emitter: &dyn EventEmitter) {
        for event in &self.events {
            if let Err(error) = emitter.emit(event) {
                warn!(
                    model = %event.model,
                    namespace = %event.namespace,
                    event = ?event.event,
                    error = %error,
                    "failed to emit lifecycle event"
                );
            }
        }
    }

    #[cfg(test)]
    pub fn events(&self) -> &[LifecycleEvent] {
        &self.events
    }
}
