//! The orch engine: per-table pending work, re-driven until stable.
//!
//! The engine is a value embedded in each orchestrator, not a base class.
//! Orchestrators feed incoming table batches with [`Engine::enqueue`], then on
//! wake pull the batch with [`Engine::take_pending`], run their own apply hook
//! per entry, and report the outcome with [`Engine::complete`]:
//!
//! ```ignore
//! let batch = self.engine.take_pending(CFG_VLAN_TABLE);
//! for entry in batch {
//!     let outcome = self.apply_vlan(&entry).await;
//!     self.engine.complete(CFG_VLAN_TABLE, entry, outcome);
//! }
//! ```
//!
//! Because `take_pending` removes the whole batch and `Retry` entries only
//! return via `complete`, a stuck key is not revisited until every other
//! pending key has had its turn.

use crate::consumer::{Consumer, KeyOpFieldsValues};
use crate::task::ApplyOutcome;
use std::collections::BTreeMap;
use tracing::warn;

/// Table-driven pending-work buffers for one orchestrator.
#[derive(Default)]
pub struct Engine {
    tables: BTreeMap<String, Consumer>,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            tables: BTreeMap::new(),
        }
    }

    /// Registers a table this orchestrator consumes. Idempotent.
    pub fn register_table(&mut self, table: impl Into<String>) {
        let table = table.into();
        self.tables
            .entry(table.clone())
            .or_insert_with(|| Consumer::new(table));
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Buffers a batch of incoming entries for `table`.
    pub fn enqueue(
        &mut self,
        table: &str,
        entries: impl IntoIterator<Item = KeyOpFieldsValues>,
    ) {
        match self.tables.get_mut(table) {
            Some(consumer) => consumer.add_to_sync(entries),
            None => warn!(table, "entries for unregistered table dropped"),
        }
    }

    /// Removes and returns everything pending for `table`.
    pub fn take_pending(&mut self, table: &str) -> Vec<KeyOpFieldsValues> {
        self.tables
            .get_mut(table)
            .map(Consumer::drain)
            .unwrap_or_default()
    }

    /// Settles one applied entry according to the ternary contract.
    pub fn complete(&mut self, table: &str, entry: KeyOpFieldsValues, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Done => {}
            ApplyOutcome::Retry => {
                if let Some(consumer) = self.tables.get_mut(table) {
                    consumer.requeue(entry);
                }
            }
            ApplyOutcome::Error => {
                warn!(
                    table,
                    key = %entry.key,
                    op = entry.op.as_str(),
                    "dropping entry after unrecoverable apply error"
                );
            }
        }
    }

    pub fn has_pending(&self) -> bool {
        self.tables.values().any(Consumer::has_pending)
    }

    pub fn pending_count(&self) -> usize {
        self.tables.values().map(Consumer::pending_count).sum()
    }

    pub fn dump_pending(&self) -> Vec<String> {
        self.tables
            .values()
            .flat_map(|c| {
                let table = c.table().to_string();
                c.dump().into_iter().map(move |line| format!("{table}:{line}"))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::FieldValues;
    use pretty_assertions::assert_eq;

    fn fv(pairs: &[(&str, &str)]) -> FieldValues {
        pairs
            .iter()
            .map(|(f, v)| (f.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn done_retires_retry_requeues() {
        let mut engine = Engine::new();
        engine.register_table("VLAN");
        engine.enqueue(
            "VLAN",
            [
                KeyOpFieldsValues::set("Vlan100", fv(&[])),
                KeyOpFieldsValues::set("Vlan200", fv(&[])),
            ],
        );

        let batch = engine.take_pending("VLAN");
        assert_eq!(batch.len(), 2);
        assert!(!engine.has_pending());

        let mut it = batch.into_iter();
        engine.complete("VLAN", it.next().unwrap(), ApplyOutcome::Done);
        engine.complete("VLAN", it.next().unwrap(), ApplyOutcome::Retry);

        assert_eq!(engine.pending_count(), 1);
        assert_eq!(engine.take_pending("VLAN")[0].key, "Vlan200");
    }

    #[test]
    fn error_drops_entry() {
        let mut engine = Engine::new();
        engine.register_table("VLAN");
        engine.enqueue("VLAN", [KeyOpFieldsValues::set("Vlan100", fv(&[]))]);

        let batch = engine.take_pending("VLAN");
        engine.complete("VLAN", batch.into_iter().next().unwrap(), ApplyOutcome::Error);
        assert!(!engine.has_pending());
    }

    /// A key stuck in retry does not stop other keys from making progress:
    /// every take_pending batch contains all currently-pending keys, and
    /// the stuck key rejoins only at the end of the cycle.
    #[test]
    fn retry_does_not_starve_other_keys() {
        let mut engine = Engine::new();
        engine.register_table("T");
        engine.enqueue(
            "T",
            [
                KeyOpFieldsValues::set("stuck", fv(&[])),
                KeyOpFieldsValues::set("a", fv(&[])),
                KeyOpFieldsValues::set("b", fv(&[])),
            ],
        );

        let mut applied_between_retries = Vec::new();
        for _round in 0..3 {
            for entry in engine.take_pending("T") {
                if entry.key == "stuck" {
                    engine.complete("T", entry, ApplyOutcome::Retry);
                } else {
                    applied_between_retries.push(entry.key.clone());
                    engine.complete("T", entry, ApplyOutcome::Done);
                }
            }
        }

        // Both other keys completed while "stuck" was still retrying.
        assert_eq!(applied_between_retries, ["a", "b"]);
        assert_eq!(engine.pending_count(), 1);
    }

    #[test]
    fn superseding_set_collapses_before_retry() {
        let mut engine = Engine::new();
        engine.register_table("T");
        engine.enqueue("T", [KeyOpFieldsValues::set("k", fv(&[("f", "1")]))]);

        let batch = engine.take_pending("T");
        engine.complete("T", batch.into_iter().next().unwrap(), ApplyOutcome::Retry);

        // A newer write lands before the retry is attempted.
        engine.enqueue("T", [KeyOpFieldsValues::set("k", fv(&[("f", "2")]))]);

        let batch = engine.take_pending("T");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].field("f"), Some("2"));
    }
}
