//! Operation log: how each broker call ended.
//!
//! Every call appends one record. A call answered with `Accepted` runs on in
//! the background, and that work appends a second record (with the same
//! kind) once it commits or fails.

use crate::model::OperationKind;
use rsb_core::{BindingId, InstanceId, OriginatingIdentity, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};
use uuid::Uuid;

/// Default number of records retained.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Records how every broker operation ended.
///
/// The log is bounded; once full, the oldest record is dropped for each new
/// one.
#[derive(Debug)]
pub struct OperationLog {
    capacity: usize,
    entries: Mutex<VecDeque<OperationRecord>>,
}

impl OperationLog {
    /// Create a log retaining [`DEFAULT_CAPACITY`] records.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a log retaining at most `capacity` records.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Append the outcome of one operation.
    pub fn record(
        &self,
        kind: OperationKind,
        instance_id: &InstanceId,
        binding_id: Option<&BindingId>,
        outcome: RecordedOutcome,
        originator: Option<&OriginatingIdentity>,
    ) -> OperationRecord {
        let record = OperationRecord {
            id: Uuid::new_v4(),
            timestamp: Timestamp::now(),
            kind,
            instance_id: instance_id.clone(),
            binding_id: binding_id.cloned(),
            outcome,
            originator: originator.map(|identity| identity.platform.clone()),
        };

        if record.outcome.is_rejected() {
            debug!(kind = %kind, instance_id = %instance_id, outcome = %record.outcome, "operation rejected");
        } else {
            info!(kind = %kind, instance_id = %instance_id, outcome = %record.outcome, "operation completed");
        }

        let mut entries = self.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(record.clone());
        record
    }

    /// All retained records, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<OperationRecord> {
        self.lock().iter().cloned().collect()
    }

    /// Records that touched one instance, oldest first.
    #[must_use]
    pub fn entries_for_instance(&self, instance_id: &InstanceId) -> Vec<OperationRecord> {
        self.lock()
            .iter()
            .filter(|record| &record.instance_id == instance_id)
            .cloned()
            .collect()
    }

    /// The last `count` records, oldest first.
    #[must_use]
    pub fn recent(&self, count: usize) -> Vec<OperationRecord> {
        let entries = self.lock();
        let start = entries.len().saturating_sub(count);
        entries.iter().skip(start).cloned().collect()
    }

    /// Number of retained records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<OperationRecord>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for OperationLog {
    fn default() -> Self {
        Self::new()
    }
}

/// A single operation log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// Unique identifier for this entry
    pub id: Uuid,
    /// When the outcome was decided
    pub timestamp: Timestamp,
    /// Operation performed
    pub kind: OperationKind,
    /// Instance the operation targeted
    pub instance_id: InstanceId,
    /// Binding the operation targeted, for bind and unbind
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binding_id: Option<BindingId>,
    /// How it ended
    pub outcome: RecordedOutcome,
    /// Platform of the originating identity, if one was sent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub originator: Option<String>,
}

/// Terminal outcome of a broker operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordedOutcome {
    /// A record was created
    Created,
    /// An identical record already existed
    AlreadyExists,
    /// Accepted for asynchronous completion
    Accepted,
    /// A record was changed
    Updated,
    /// The request matched the current record
    Unchanged,
    /// A record was deleted
    Deleted,
    /// Nothing to act on (informational)
    NotFound,
    /// The operation failed
    Rejected {
        /// Error message returned to the caller
        error: String,
    },
}

impl RecordedOutcome {
    /// Whether the operation failed.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

impl fmt::Display for RecordedOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::AlreadyExists => f.write_str("already exists"),
            Self::Accepted => f.write_str("accepted"),
            Self::Updated => f.write_str("updated"),
            Self::Unchanged => f.write_str("unchanged"),
            Self::Deleted => f.write_str("deleted"),
            Self::NotFound => f.write_str("not found"),
            Self::Rejected { error } => write!(f, "rejected: {error}"),
        }
    }
}
