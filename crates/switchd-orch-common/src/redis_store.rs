//! Redis-backed store gateway.
//!
//! Rows live in redis hashes keyed `table|key`. Table streams and
//! notification channels are lists drained with BLPOP by a forwarding task,
//! which preserves per-key ordering (single producer, single list). This
//! backend is only correct under the workspace's ownership rule: one writer
//! daemon per table.

use crate::consumer::{FieldValues, KeyOpFieldsValues, Operation};
use crate::store::{
    Notification, NotificationSubscription, Store, StoreError, TableSubscription,
};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const BLPOP_TIMEOUT_SECS: f64 = 1.0;

/// Wire form of a streamed table entry.
#[derive(Serialize, Deserialize)]
struct StreamEntry {
    key: String,
    op: String,
    fvs: FieldValues,
}

/// Connection settings for the store.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub db: u8,
}

impl RedisConfig {
    pub fn new(host: impl Into<String>, port: u16, db: u8) -> Self {
        Self {
            host: host.into(),
            port,
            db,
        }
    }

    fn uri(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

/// Store gateway over a redis database.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(config: RedisConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.uri())
            .map_err(|e| StoreError::Connection(format!("{}: {}", config.uri(), e)))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        debug!(host = %config.host, db = config.db, "connected to redis store");
        Ok(Self { conn })
    }

    fn row_key(table: &str, key: &str) -> String {
        format!("{table}|{key}")
    }

    fn stream_list(table: &str) -> String {
        format!("_{table}_STREAM")
    }

    fn channel_list(channel: &str) -> String {
        format!("_{channel}_CHANNEL")
    }

    async fn push_stream(&self, table: &str, entry: StreamEntry) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&entry)
            .map_err(|e| StoreError::operation("encode", e.to_string()))?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .rpush(Self::stream_list(table), payload)
            .await
            .map_err(|e| StoreError::operation("rpush", e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn set(&self, table: &str, key: &str, fields: FieldValues) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        if !fields.is_empty() {
            let _: () = conn
                .hset_multiple(Self::row_key(table, key), &fields)
                .await
                .map_err(|e| StoreError::operation("hset", e.to_string()))?;
        }
        self.push_stream(
            table,
            StreamEntry {
                key: key.to_string(),
                op: "SET".to_string(),
                fvs: fields,
            },
        )
        .await
    }

    async fn del(&self, table: &str, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(Self::row_key(table, key))
            .await
            .map_err(|e| StoreError::operation("del", e.to_string()))?;
        self.push_stream(
            table,
            StreamEntry {
                key: key.to_string(),
                op: "DEL".to_string(),
                fvs: Vec::new(),
            },
        )
        .await
    }

    async fn get(&self, table: &str, key: &str) -> Result<Option<FieldValues>, StoreError> {
        let mut conn = self.conn.clone();
        let row: HashMap<String, String> = conn
            .hgetall(Self::row_key(table, key))
            .await
            .map_err(|e| StoreError::operation("hgetall", e.to_string()))?;
        if row.is_empty() {
            Ok(None)
        } else {
            Ok(Some(row.into_iter().collect()))
        }
    }

    async fn keys(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn
            .keys(format!("{table}|*"))
            .await
            .map_err(|e| StoreError::operation("keys", e.to_string()))?;
        Ok(raw
            .into_iter()
            .filter_map(|k| k.splitn(2, '|').nth(1).map(str::to_string))
            .collect())
    }

    async fn subscribe(&self, table: &str) -> Result<TableSubscription, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut conn = self.conn.clone();
        let list = Self::stream_list(table);
        let table_name = table.to_string();
        tokio::spawn(async move {
            loop {
                if tx.is_closed() {
                    break;
                }
                let popped: Result<Option<(String, String)>, _> =
                    conn.blpop(&list, BLPOP_TIMEOUT_SECS).await;
                match popped {
                    Ok(Some((_, payload))) => match serde_json::from_str::<StreamEntry>(&payload) {
                        Ok(entry) => {
                            let op = if entry.op == "DEL" {
                                Operation::Del
                            } else {
                                Operation::Set
                            };
                            let kofv = KeyOpFieldsValues {
                                key: entry.key,
                                op,
                                fvs: entry.fvs,
                            };
                            if tx.send(kofv).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(table = %table_name, error = %e, "dropping undecodable stream entry")
                        }
                    },
                    Ok(None) => {}
                    Err(e) => {
                        warn!(table = %table_name, error = %e, "table stream poll failed");
                        break;
                    }
                }
            }
        });
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
        let payload = serde_json::to_string(&note)
            .map_err(|e| StoreError::operation("encode", e.to_string()))?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .rpush(Self::channel_list(channel), payload)
            .await
            .map_err(|e| StoreError::operation("rpush", e.to_string()))?;
        Ok(())
    }

    async fn consume_notifications(
        &self,
        channel: &str,
    ) -> Result<NotificationSubscription, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut conn = self.conn.clone();
        let list = Self::channel_list(channel);
        let channel_name = channel.to_string();
        tokio::spawn(async move {
            loop {
                if tx.is_closed() {
                    break;
                }
                let popped: Result<Option<(String, String)>, _> =
                    conn.blpop(&list, BLPOP_TIMEOUT_SECS).await;
                match popped {
                    Ok(Some((_, payload))) => {
                        match serde_json::from_str::<Notification>(&payload) {
                            Ok(note) => {
                                if tx.send(note).is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!(
                                channel = %channel_name,
                                error = %e,
                                "dropping undecodable notification"
                            ),
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(channel = %channel_name, error = %e, "notification poll failed");
                        break;
                    }
                }
            }
        });
        Ok(NotificationSubscription::new(channel, rx))
    }
}
