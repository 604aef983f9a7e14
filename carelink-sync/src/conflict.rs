//! Conflict detection and last-write-wins resolution.
//!
//! Detection compares the timestamp a device last saw for an entity against
//! the entity's current server-monotonic version. Resolution compares client
//! timestamps of the two competing writes and breaks exact ties on the
//! `(device_id, operation_id)` pair so every replica converges to the same
//! winner regardless of arrival order.

use crate::types::{EntityRecord, OperationKind, ValidatedOperation};
use std::cmp::Ordering;

/// Result of checking an incoming operation against the stored version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// The device acted on the current version; apply without ceremony.
    Clean,
    /// The device acted on a stale (or unknown) version; resolution decides.
    Conflict,
}

/// Which side of a detected conflict keeps the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Incoming,
    Current,
}

/// Classify an operation as clean or conflicting.
///
/// A create against an absent entity is always clean. A create against an
/// existing entity is always a conflict: two devices invented the same id
/// independently, and only resolution can pick one. For updates and deletes
/// the operation's `based_on` must equal the entity's `last_modified_at`
/// exactly; anything older, newer, or missing is a conflict.
pub fn detect(op: &ValidatedOperation, current: Option<&EntityRecord>) -> Detection {
    let Some(record) = current else {
        return Detection::Clean;
    };

    if op.kind == OperationKind::Create {
        return Detection::Conflict;
    }

    match op.based_on_micros {
        Some(known) if known == record.last_modified_at => Detection::Clean,
        _ => Detection::Conflict,
    }
}

/// Resolve a conflict with last-write-wins over client timestamps.
///
/// The stored side competes with the client timestamp of the operation that
/// produced it (`client_modified_at`), not the server-monotonic version, so
/// a chain of equal-timestamp writes keeps tie-breaking against the same
/// basis. Exact ties go to the greater `(device_id, operation_id)` pair.
pub fn resolve_lww(op: &ValidatedOperation, current: &EntityRecord) -> Winner {
    match op.client_timestamp_micros.cmp(&current.client_modified_at) {
        Ordering::Greater => Winner::Incoming,
        Ordering::Less => Winner::Current,
        Ordering::Equal => {
            let incoming = (op.device_id, op.operation_id);
            let stored = (current.last_modified_by_device, current.last_modified_op);
            if incoming > stored {
                Winner::Incoming
            } else {
                Winner::Current
            }
        }
    }
}
