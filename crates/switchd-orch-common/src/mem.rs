//! In-memory store backend.
//!
//! The backend used by unit tests and the virtual platform. Mutations fan
//! out synchronously to table subscribers, so per-key ordering within a table
//! matches the write order exactly.

use crate::consumer::{FieldValues, KeyOpFieldsValues};
use crate::store::{
    Notification, NotificationSubscription, Store, StoreError, TableSubscription,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Default)]
struct Inner {
    /// table -> key -> fields
    tables: HashMap<String, BTreeMap<String, FieldValues>>,
    /// table -> live subscriber senders
    table_subs: HashMap<String, Vec<mpsc::UnboundedSender<KeyOpFieldsValues>>>,
    /// channel -> live subscriber senders
    channel_subs: HashMap<String, Vec<mpsc::UnboundedSender<Notification>>>,
}

impl Inner {
    fn publish(&mut self, table: &str, entry: KeyOpFieldsValues) {
        if let Some(subs) = self.table_subs.get_mut(table) {
            subs.retain(|tx| tx.send(entry.clone()).is_ok());
        }
    }
}

/// Shared in-memory store; clones refer to the same data.
#[derive(Clone, Default)]
pub struct MemStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: reads a single field of a row.
    pub fn field(&self, table: &str, key: &str, name: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .tables
            .get(table)?
            .get(key)?
            .iter()
            .find(|(f, _)| f == name)
            .map(|(_, v)| v.clone())
    }

    /// Test helper: true if the row exists.
    pub fn contains(&self, table: &str, key: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .tables
            .get(table)
            .map(|t| t.contains_key(key))
            .unwrap_or(false)
    }
}

#[async_trait]
impl Store for MemStore {
    async fn set(&self, table: &str, key: &str, fields: FieldValues) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let row = inner
            .tables
            .entry(table.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default();
        for (field, value) in &fields {
            match row.iter_mut().find(|(f, _)| f == field) {
                Some(existing) => existing.1 = value.clone(),
                None => row.push((field.clone(), value.clone())),
            }
        }
        inner.publish(table, KeyOpFieldsValues::set(key, fields));
        Ok(())
    }

    async fn del(&self, table: &str, key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(rows) = inner.tables.get_mut(table) {
            rows.remove(key);
        }
        inner.publish(table, KeyOpFieldsValues::del(key));
        Ok(())
    }

    async fn get(&self, table: &str, key: &str) -> Result<Option<FieldValues>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.tables.get(table).and_then(|t| t.get(key)).cloned())
    }

    async fn keys(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .tables
            .get(table)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn subscribe(&self, table: &str) -> Result<TableSubscription, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap();
        inner
            .table_subs
            .entry(table.to_string())
            .or_default()
            .push(tx);
        Ok(TableSubscription::new(table, rx))
    }

    async fn notify(
        &self,
        channel: &str,
        op: &str,
        data: &str,
        fields: FieldValues,
    ) -> Result<(), StoreError> {
        let note = Notification {
            op: op.to_string(),
            data: data.to_string(),
            fields,
        };
        let mut inner = self.inner.lock().unwrap();
        if let Some(subs) = inner.channel_subs.get_mut(channel) {
            subs.retain(|tx| tx.send(note.clone()).is_ok());
        }
        Ok(())
    }

    async fn consume_notifications(
        &self,
        channel: &str,
    ) -> Result<NotificationSubscription, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap();
        inner
            .channel_subs
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(NotificationSubscription::new(channel, rx))
    }
}
