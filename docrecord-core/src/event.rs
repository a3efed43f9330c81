//! Query and connection events.
//!
//! Every executed query produces exactly one [`QueryEvent`], on success and on failure.
//! Connections produce [`ConnectionEvent`]s when they connect, disconnect or fail. Events
//! are logged through `tracing` and forwarded to every [`EventListener`] registered on the
//! [`Database`](crate::connection::Database).

use bson::Document;
use std::{fmt, sync::Arc, time::Duration};

/// The kind of store operation a [`QueryEvent`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryOperation {
    Find,
    Count,
    Insert,
    InsertMany,
    Update,
    Delete,
    Aggregate,
}

impl QueryOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryOperation::Find => "find",
            QueryOperation::Count => "count",
            QueryOperation::Insert => "insert",
            QueryOperation::InsertMany => "insertMany",
            QueryOperation::Update => "update",
            QueryOperation::Delete => "delete",
            QueryOperation::Aggregate => "aggregate",
        }
    }
}

impl fmt::Display for QueryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timing and outcome of one executed store operation.
#[derive(Debug, Clone)]
pub struct QueryEvent {
    /// Name of the connection the operation ran on.
    pub connection: String,
    /// Name of the collection the operation targeted.
    pub collection: String,
    /// The kind of operation.
    pub operation: QueryOperation,
    /// Structured description: filter, projection, sort, limit, skip, or the written payload.
    pub description: Document,
    /// Wall-clock time spent, including connection resolution.
    pub duration: Duration,
    /// The error message if the operation failed.
    pub error: Option<String>,
}

impl QueryEvent {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Lifecycle events of a named connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connect { connection: String },
    Disconnect { connection: String },
    Error { connection: String, error: String },
}

impl ConnectionEvent {
    /// The namespaced event name, e.g. `connection:connect`.
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionEvent::Connect { .. } => "connection:connect",
            ConnectionEvent::Disconnect { .. } => "connection:disconnect",
            ConnectionEvent::Error { .. } => "connection:error",
        }
    }

    pub fn connection(&self) -> &str {
        match self {
            ConnectionEvent::Connect { connection }
            | ConnectionEvent::Disconnect { connection }
            | ConnectionEvent::Error { connection, .. } => connection,
        }
    }
}

/// Receiver of query and connection events.
///
/// Both methods default to no-ops so a listener only implements what it observes.
///
/// # Example
///
/// ```ignore
/// #[derive(Debug)]
/// struct SlowQueryLog;
///
/// impl EventListener for SlowQueryLog {
///     fn on_query(&self, event: &QueryEvent) {
///         if event.duration > Duration::from_millis(100) {
///             eprintln!("slow {} on {}", event.operation, event.collection);
///         }
///     }
/// }
/// ```
pub trait EventListener: Send + Sync + fmt::Debug {
    fn on_query(&self, event: &QueryEvent) {
        let _ = event;
    }

    fn on_connection(&self, event: &ConnectionEvent) {
        let _ = event;
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Emitter {
    listeners: Arc<Vec<Arc<dyn EventListener>>>,
}

impl Emitter {
    pub(crate) fn new(listeners: Vec<Arc<dyn EventListener>>) -> Self {
        Self { listeners: Arc::new(listeners) }
    }

    pub(crate) fn query(&self, event: QueryEvent) {
        match &event.error {
            None => tracing::debug!(
                connection = %event.connection,
                collection = %event.collection,
                operation = %event.operation,
                duration_us = event.duration.as_micros() as u64,
                description = %event.description,
                "query"
            ),
            Some(error) => tracing::warn!(
                connection = %event.connection,
                collection = %event.collection,
                operation = %event.operation,
                duration_us = event.duration.as_micros() as u64,
                description = %event.description,
                error = %error,
                "query failed"
            ),
        }

        for listener in self.listeners.iter() {
            listener.on_query(&event);
        }
    }

    pub(crate) fn connection(&self, event: ConnectionEvent) {
        match &event {
            ConnectionEvent::Error { connection, error } => {
                tracing::error!(connection = %connection, error = %error, "{}", event.name())
            }
            _ => tracing::info!(connection = %event.connection(), "{}", event.name()),
        }

        for listener in self.listeners.iter() {
            listener.on_connection(&event);
        }
    }
}
