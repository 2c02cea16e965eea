//! The store gateway.
//!
//! The external key/value store is reached exclusively through the [`Store`]
//! trait. Each daemon owns a disjoint set of tables as writer; everything
//! else is reads and subscriptions. The gateway guarantees per-key write
//! ordering within a table stream and nothing across tables.

use crate::consumer::{FieldValues, KeyOpFieldsValues};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Delimiter between path components of app-store keys.
pub const APP_KEY_DELIMITER: char = ':';

/// Delimiter between path components of config-store keys.
pub const CFG_KEY_DELIMITER: char = '|';

/// Joins app-store key components (`INTF_TABLE` rows use `alias:prefix`).
pub fn app_key(parts: &[&str]) -> String {
    parts.join(&APP_KEY_DELIMITER.to_string())
}

/// Splits a config-store key into its components (`Vlan100|Ethernet3`).
pub fn cfg_key_parts(key: &str) -> Vec<&str> {
    key.split(CFG_KEY_DELIMITER).collect()
}

/// Errors surfaced by store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),

    #[error("store operation {operation} failed: {message}")]
    Operation { operation: String, message: String },

    #[error("subscription to {0} closed")]
    SubscriptionClosed(String),
}

impl StoreError {
    pub fn operation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Operation {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// A one-shot message on a notification channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub op: String,
    pub data: String,
    pub fields: FieldValues,
}

/// Stream of table mutations, in per-key arrival order.
pub struct TableSubscription {
    table: String,
    rx: mpsc::UnboundedReceiver<KeyOpFieldsValues>,
}

impl TableSubscription {
    pub fn new(table: impl Into<String>, rx: mpsc::UnboundedReceiver<KeyOpFieldsValues>) -> Self {
        Self {
            table: table.into(),
            rx,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub async fn recv(&mut self) -> Option<KeyOpFieldsValues> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<KeyOpFieldsValues> {
        self.rx.try_recv().ok()
    }

    pub fn into_inner(self) -> (String, mpsc::UnboundedReceiver<KeyOpFieldsValues>) {
        (self.table, self.rx)
    }
}

/// Stream of channel notifications.
pub struct NotificationSubscription {
    channel: String,
    rx: mpsc::UnboundedReceiver<Notification>,
}

impl NotificationSubscription {
    pub fn new(channel: impl Into<String>, rx: mpsc::UnboundedReceiver<Notification>) -> Self {
        Self {
            channel: channel.into(),
            rx,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }

    pub fn into_inner(self) -> (String, mpsc::UnboundedReceiver<Notification>) {
        (self.channel, self.rx)
    }
}

/// The only allowed way to touch the external store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Idempotent upsert of a table row.
    async fn set(&self, table: &str, key: &str, fields: FieldValues) -> Result<(), StoreError>;

    /// Idempotent delete of a table row.
    async fn del(&self, table: &str, key: &str) -> Result<(), StoreError>;

    async fn get(&self, table: &str, key: &str) -> Result<Option<FieldValues>, StoreError>;

    /// Snapshot of the table's keys.
    async fn keys(&self, table: &str) -> Result<Vec<String>, StoreError>;

    /// Subscribes to subsequent mutations of a table.
    async fn subscribe(&self, table: &str) -> Result<TableSubscription, StoreError>;

    /// Publishes a one-shot notification on a channel.
    async fn notify(
        &self,
        channel: &str,
        op: &str,
        data: &str,
        fields: FieldValues,
    ) -> Result<(), StoreError>;

    async fn consume_notifications(
        &self,
        channel: &str,
    ) -> Result<NotificationSubscription, StoreError>;
}

/// Presence check used for every "state-ok" precondition: a dependency is
/// ready once its row exists in the relevant state table.
pub async fn is_state_ok(store: &dyn Store, table: &str, key: &str) -> Result<bool, StoreError> {
    Ok(store.get(table, key).await?.is_some())
}

/// The three logical store namespaces.
///
/// Table names repeat across namespaces (`PORT_TABLE` exists in both the app
/// and state stores), so every daemon addresses them through separate
/// handles: user intent in `cfg`, data-plane programming requests in `app`,
/// daemon-published runtime state in `state`.
#[derive(Clone)]
pub struct Stores {
    pub cfg: std::sync::Arc<dyn Store>,
    pub app: std::sync::Arc<dyn Store>,
    pub state: std::sync::Arc<dyn Store>,
}

impl Stores {
    pub fn new(
        cfg: std::sync::Arc<dyn Store>,
        app: std::sync::Arc<dyn Store>,
        state: std::sync::Arc<dyn Store>,
    ) -> Self {
        Self { cfg, app, state }
    }

    /// One backend serving all three namespaces. Only usable when the
    /// caller's table names do not collide across namespaces (tests mostly).
    pub fn shared(store: std::sync::Arc<dyn Store>) -> Self {
        Self {
            cfg: store.clone(),
            app: store.clone(),
            state: store,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn key_helpers() {
        assert_eq!(app_key(&["INTF_TABLE", "Ethernet0", "10.0.0.1/31"]),
            "INTF_TABLE:Ethernet0:10.0.0.1/31");
        assert_eq!(cfg_key_parts("Vlan100|Ethernet3"), ["Vlan100", "Ethernet3"]);
        assert_eq!(cfg_key_parts("Vlan100"), ["Vlan100"]);
    }
}
