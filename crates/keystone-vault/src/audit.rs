//! Vault audit trail

use keystone_core::ContentDigest;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Records kept before the oldest entry is dropped
pub const AUDIT_CAPACITY: usize = 256;

/// Security-relevant vault event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEvent {
    /// Boot measurement recorded
    MeasurementRecorded {
        /// Measured image length
        image_size: u64,
        /// Measured image digest
        image_hash: ContentDigest,
    },
    /// A manifest signer was added to the trust anchors
    SignerApproved {
        /// Hex-encoded public key
        signer: String,
    },
    /// The one-shot signing grant was handed out
    SigningGrantIssued,
    /// A context key was derived
    KeyDerived {
        /// Context label (HKDF info string)
        context: String,
    },
    /// Secrets were wiped after a fatal halt
    SecretsWiped,
}

/// Sequenced audit entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Position in the vault's event sequence
    pub sequence: u64,
    /// What happened
    pub event: AuditEvent,
}

#[derive(Debug, Default)]
pub(crate) struct AuditLog {
    records: VecDeque<AuditRecord>,
    next_sequence: u64,
}

impl AuditLog {
    pub(crate) fn push(&mut self, event: AuditEvent) {
        if self.records.len() == AUDIT_CAPACITY {
            self.records.pop_front();
        }
        self.records.push_back(AuditRecord {
            sequence: self.next_sequence,
            event,
        });
        self.next_sequence += 1;
    }

    pub(crate) fn snapshot(&self) -> Vec<AuditRecord> {
        self.records.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_is_bounded_and_sequenced() {
        let mut log = AuditLog::default();
        for _ in 0..AUDIT_CAPACITY + 10 {
            log.push(AuditEvent::SigningGrantIssued);
        }
        let records = log.snapshot();
        assert_eq!(records.len(), AUDIT_CAPACITY);
        assert_eq!(records[0].sequence, 10);
        assert!(records.windows(2).all(|w| w[1].sequence == w[0].sequence + 1));
    }
}
