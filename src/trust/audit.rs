//! Separately hash-chained audit log (spec §4.9 "AuditManager").

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EventType {
    RegistrationFailed,
    AppendSuccess,
    AppendRejected,
    IntegrityViolation,
}

impl EventType {
    fn tag(self) -> u32 {
        match self {
            EventType::RegistrationFailed => 0,
            EventType::AppendSuccess => 1,
            EventType::AppendRejected => 2,
            EventType::IntegrityViolation => 3,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AuditEvent {
    pub event_id: u64,
    pub timestamp_ms: i64,
    pub event_type: EventType,
    pub agent_id: String,
    pub details: String,
    pub prev_hash: [u8; 32],
    pub hash: [u8; 32],
}

fn compute_hash(event_id: u64, timestamp_ms: i64, event_type: EventType, agent_id: &str, details: &str, prev_hash: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(event_id.to_be_bytes());
    hasher.update(timestamp_ms.to_be_bytes());
    hasher.update(event_type.tag().to_be_bytes());
    hasher.update(agent_id.as_bytes());
    hasher.update(details.as_bytes());
    hasher.update(prev_hash);
    hasher.finalize().into()
}

/// On startup a manager primes `last_hash`/`last_event_id` from the latest
/// persisted row; here that priming is `AuditManager::with_existing`.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct AuditManager {
    events: Vec<AuditEvent>,
}

impl AuditManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_existing(events: Vec<AuditEvent>) -> Self {
        Self { events }
    }

    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }

    fn last_hash(&self) -> [u8; 32] {
        self.events.last().map(|e| e.hash).unwrap_or([0u8; 32])
    }

    fn last_event_id(&self) -> u64 {
        self.events.last().map(|e| e.event_id).unwrap_or(0)
    }

    pub fn record(&mut self, event_type: EventType, agent_id: &str, details: &str, timestamp_ms: i64) -> &AuditEvent {
        let event_id = self.last_event_id() + 1;
        let prev_hash = self.last_hash();
        let hash = compute_hash(event_id, timestamp_ms, event_type, agent_id, details, &prev_hash);
        self.events.push(AuditEvent {
            event_id,
            timestamp_ms,
            event_type,
            agent_id: agent_id.to_string(),
            details: details.to_string(),
            prev_hash,
            hash,
        });
        self.events.last().unwrap()
    }

    /// Re-derives the chain from scratch; returns the first mismatch found.
    pub fn verify_integrity(&self) -> Result<()> {
        let mut expected_prev = [0u8; 32];
        for event in &self.events {
            if event.prev_hash != expected_prev {
                return Err(Error::AuditHashMismatch(event.event_id));
            }
            let recomputed = compute_hash(event.event_id, event.timestamp_ms, event.event_type, &event.agent_id, &event.details, &event.prev_hash);
            if recomputed != event.hash {
                return Err(Error::AuditHashMismatch(event.event_id));
            }
            expected_prev = event.hash;
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.verify_integrity().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_of_events_verifies() {
        let mut mgr = AuditManager::new();
        mgr.record(EventType::AppendSuccess, "A", "p1", 1000);
        mgr.record(EventType::AppendSuccess, "A", "p2", 2000);
        mgr.record(EventType::RegistrationFailed, "B", "bad sig", 3000);
        assert!(mgr.is_valid());
    }

    #[test]
    fn tampered_details_breaks_verification() {
        let mut mgr = AuditManager::new();
        mgr.record(EventType::AppendSuccess, "A", "p1", 1000);
        mgr.record(EventType::AppendSuccess, "A", "p2", 2000);
        mgr.events[0].details = "tampered".to_string();
        assert!(!mgr.is_valid());
    }

    #[test]
    fn priming_from_existing_events_continues_the_chain() {
        let mut mgr = AuditManager::new();
        mgr.record(EventType::AppendSuccess, "A", "p1", 1000);
        let primed = AuditManager::with_existing(mgr.events().to_vec());
        let mut primed = primed;
        primed.record(EventType::AppendSuccess, "A", "p2", 2000);
        assert!(primed.is_valid());
        assert_eq!(primed.events().len(), 2);
    }
}
