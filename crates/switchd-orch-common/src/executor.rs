//! Executors and the cooperative scheduler.
//!
//! A daemon registers one executor per event source: table subscriptions,
//! notification channels, and periodic timers. The scheduler multiplexes
//! them onto one loop: at most one wake is delivered at a time and the caller
//! runs it to completion before asking for the next. Shutdown is cooperative:
//! once the cancellation token fires, [`Scheduler::next`] returns `None` and
//! [`Scheduler::close`] tears the sources down in reverse registration order.

use crate::consumer::KeyOpFieldsValues;
use crate::store::{Notification, NotificationSubscription, TableSubscription};
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{IntervalStream, UnboundedReceiverStream};
use tokio_stream::{Stream, StreamExt, StreamMap};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What woke the loop up.
#[derive(Debug)]
pub enum WakeEvent {
    /// A table entry arrived; the owning engine should be fed and driven.
    Table {
        table: String,
        entry: KeyOpFieldsValues,
    },
    /// One message from a notification channel.
    Notification {
        channel: String,
        note: Notification,
    },
    /// A periodic timer fired.
    Timer { tag: String },
}

/// Kinds of event source an executor wraps.
pub enum Executor {
    Table(TableSubscription),
    Notification(NotificationSubscription),
    Timer { tag: String, period: Duration },
}

type WakeStream = Pin<Box<dyn Stream<Item = WakeEvent> + Send>>;

/// Single-threaded cooperative scheduler.
pub struct Scheduler {
    streams: StreamMap<usize, WakeStream>,
    names: Vec<(usize, String)>,
    next_id: usize,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            streams: StreamMap::new(),
            names: Vec::new(),
            next_id: 0,
            cancel,
        }
    }

    /// Registers an executor. Registration order is the reverse of shutdown
    /// order.
    pub fn register(&mut self, executor: Executor) {
        let id = self.next_id;
        self.next_id += 1;

        let (name, stream): (String, WakeStream) = match executor {
            Executor::Table(sub) => {
                let (table, rx) = sub.into_inner();
                let name = format!("table:{table}");
                let stream_table = table.clone();
                let stream = UnboundedReceiverStream::new(rx).map(move |entry| WakeEvent::Table {
                    table: stream_table.clone(),
                    entry,
                });
                (name, Box::pin(stream))
            }
            Executor::Notification(sub) => {
                let (channel, rx) = sub.into_inner();
                let name = format!("channel:{channel}");
                let stream_channel = channel.clone();
                let stream =
                    UnboundedReceiverStream::new(rx).map(move |note| WakeEvent::Notification {
                        channel: stream_channel.clone(),
                        note,
                    });
                (name, Box::pin(stream))
            }
            Executor::Timer { tag, period } => {
                let name = format!("timer:{tag}");
                let stream = IntervalStream::new(tokio::time::interval(period))
                    .map(move |_| WakeEvent::Timer { tag: tag.clone() });
                (name, Box::pin(stream))
            }
        };

        debug!(executor = %name, "registered executor");
        self.names.push((id, name));
        self.streams.insert(id, stream);
    }

    /// Helper for registering timers without building an [`Executor`] first.
    pub fn register_timer(&mut self, tag: impl Into<String>, period: Duration) {
        self.register(Executor::Timer {
            tag: tag.into(),
            period,
        });
    }

    pub fn executor_names(&self) -> Vec<&str> {
        self.names.iter().map(|(_, n)| n.as_str()).collect()
    }

    /// Waits for the next wake. Returns `None` on shutdown or when every
    /// source has closed.
    pub async fn next(&mut self) -> Option<WakeEvent> {
        if self.streams.is_empty() {
            return None;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            item = self.streams.next() => item.map(|(_, event)| event),
        }
    }

    /// Closes executors in reverse registration order.
    pub fn close(&mut self) {
        while let Some((id, name)) = self.names.pop() {
            self.streams.remove(&id);
            debug!(executor = %name, "closed executor");
        }
    }
}

/// Builds a channel pair usable as a synthetic table source in tests.
pub fn test_table_source(
    table: &str,
) -> (mpsc::UnboundedSender<KeyOpFieldsValues>, TableSubscription) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, TableSubscription::new(table, rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::KeyOpFieldsValues;

    #[tokio::test]
    async fn delivers_one_wake_at_a_time() {
        let cancel = CancellationToken::new();
        let mut sched = Scheduler::new(cancel);

        let (tx, sub) = test_table_source("VLAN");
        sched.register(Executor::Table(sub));

        tx.send(KeyOpFieldsValues::set("Vlan100", vec![])).unwrap();
        tx.send(KeyOpFieldsValues::set("Vlan200", vec![])).unwrap();

        match sched.next().await {
            Some(WakeEvent::Table { table, entry }) => {
                assert_eq!(table, "VLAN");
                assert_eq!(entry.key, "Vlan100");
            }
            other => panic!("unexpected wake: {other:?}"),
        }
        match sched.next().await {
            Some(WakeEvent::Table { entry, .. }) => assert_eq!(entry.key, "Vlan200"),
            other => panic!("unexpected wake: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let cancel = CancellationToken::new();
        let mut sched = Scheduler::new(cancel.clone());
        let (_tx, sub) = test_table_source("VLAN");
        sched.register(Executor::Table(sub));

        cancel.cancel();
        assert!(sched.next().await.is_none());
    }

    #[tokio::test]
    async fn close_unregisters_in_reverse_order() {
        let cancel = CancellationToken::new();
        let mut sched = Scheduler::new(cancel);
        let (_tx1, sub1) = test_table_source("A");
        let (_tx2, sub2) = test_table_source("B");
        sched.register(Executor::Table(sub1));
        sched.register(Executor::Table(sub2));
        assert_eq!(sched.executor_names(), ["table:A", "table:B"]);

        sched.close();
        assert!(sched.executor_names().is_empty());
        assert!(sched.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_periodically() {
        let cancel = CancellationToken::new();
        let mut sched = Scheduler::new(cancel);
        sched.register_timer("heartbeat", Duration::from_secs(5));

        // First tick is immediate, second after the period.
        match sched.next().await {
            Some(WakeEvent::Timer { tag }) => assert_eq!(tag, "heartbeat"),
            other => panic!("unexpected wake: {other:?}"),
        }
        match sched.next().await {
            Some(WakeEvent::Timer { tag }) => assert_eq!(tag, "heartbeat"),
            other => panic!("unexpected wake: {other:?}"),
        }
    }
}
