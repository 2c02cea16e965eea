//! Per-table pending-work buffering.
//!
//! A [`Consumer`] holds the not-yet-applied mutations of one table, keyed by
//! entity key. Writes to the same key collapse: a newer SET merges its fields
//! over a pending SET, a DEL wipes pending SETs. A DEL followed by a SET is
//! kept as two entries in order, since the two operations are not equivalent
//! to either alone.

use std::collections::{BTreeMap, VecDeque};

/// Operation attached to a table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Set,
    Del,
}

impl Operation {
    pub fn is_set(&self) -> bool {
        matches!(self, Operation::Set)
    }

    pub fn is_del(&self) -> bool {
        matches!(self, Operation::Del)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Set => "SET",
            Operation::Del => "DEL",
        }
    }
}

/// A single field-value pair of a table row.
pub type FieldValue = (String, String);

/// All fields of a table row.
pub type FieldValues = Vec<FieldValue>;

/// The unit of work consumed from a table stream.
#[derive(Debug, Clone)]
pub struct KeyOpFieldsValues {
    pub key: String,
    pub op: Operation,
    /// Empty for `Del`.
    pub fvs: FieldValues,
}

impl KeyOpFieldsValues {
    pub fn set(key: impl Into<String>, fvs: FieldValues) -> Self {
        Self {
            key: key.into(),
            op: Operation::Set,
            fvs,
        }
    }

    pub fn del(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            op: Operation::Del,
            fvs: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fvs
            .iter()
            .find(|(f, _)| f == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn field_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.field(name).unwrap_or(default)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fvs.iter().any(|(f, _)| f == name)
    }
}

/// Pending mutations of one table, deduplicated per key.
pub struct Consumer {
    table: String,
    to_sync: BTreeMap<String, VecDeque<KeyOpFieldsValues>>,
    pending: usize,
}

impl Consumer {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            to_sync: BTreeMap::new(),
            pending: 0,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn has_pending(&self) -> bool {
        self.pending > 0
    }

    pub fn pending_count(&self) -> usize {
        self.pending
    }

    /// Buffers entries, collapsing same-key writes.
    pub fn add_to_sync(&mut self, entries: impl IntoIterator<Item = KeyOpFieldsValues>) {
        for entry in entries {
            self.add_one(entry);
        }
    }

    fn add_one(&mut self, entry: KeyOpFieldsValues) {
        let queue = self.to_sync.entry(entry.key.clone()).or_default();
        match entry.op {
            Operation::Del => {
                // A delete supersedes everything buffered for the key.
                self.pending -= queue.len();
                queue.clear();
                queue.push_back(entry);
                self.pending += 1;
            }
            Operation::Set => {
                if let Some(last) = queue.back_mut() {
                    if last.op == Operation::Set {
                        for (field, value) in entry.fvs {
                            match last.fvs.iter_mut().find(|(f, _)| *f == field) {
                                Some(existing) => existing.1 = value,
                                None => last.fvs.push((field, value)),
                            }
                        }
                        return;
                    }
                }
                queue.push_back(entry);
                self.pending += 1;
            }
        }
    }

    /// Removes and returns every pending entry, in key order.
    pub fn drain(&mut self) -> Vec<KeyOpFieldsValues> {
        let mut out = Vec::with_capacity(self.pending);
        for (_, queue) in std::mem::take(&mut self.to_sync) {
            out.extend(queue);
        }
        self.pending = 0;
        out
    }

    /// Puts an entry back at the head of its key queue for a later retry.
    pub fn requeue(&mut self, entry: KeyOpFieldsValues) {
        self.to_sync
            .entry(entry.key.clone())
            .or_default()
            .push_front(entry);
        self.pending += 1;
    }

    pub fn clear(&mut self) {
        self.to_sync.clear();
        self.pending = 0;
    }

    pub fn dump(&self) -> Vec<String> {
        self.to_sync
            .iter()
            .flat_map(|(key, queue)| {
                queue
                    .iter()
                    .map(move |e| format!("{}|{} {}", key, e.op.as_str(), e.fvs.len()))
            })
            .collect()
    }
}
