//! Hash-chained append-only ledger (spec §4.9 "Ledger append", "Verify",
//! "Export/Import deltas").

use sha2::{Digest, Sha256};

use super::agent;
use crate::error::{Error, Result};
use crate::trust::agent::{AgentKeyPair, AgentRegistry};
use crate::trust::audit::{AuditManager, EventType};

#[derive(Debug, Clone)]
pub struct Cosignature {
    pub signer_agent_id: String,
    pub signature: Vec<u8>,
    pub timestamp_us: i64,
}

#[derive(Debug, Clone)]
pub enum PayloadContent {
    Text(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct TrustPayload {
    pub payload_type: String,
    pub content: PayloadContent,
    pub economic_value: Option<u64>,
    pub cosignatures: Vec<Cosignature>,
}

impl TrustPayload {
    pub fn text(payload_type: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            payload_type: payload_type.into(),
            content: PayloadContent::Text(text.into()),
            economic_value: None,
            cosignatures: Vec::new(),
        }
    }

    /// Deterministic serialization, with or without the cosignatures list
    /// (the latter is what co-signers actually sign over).
    fn serialize(&self, include_cosignatures: bool) -> Vec<u8> {
        let mut buf = Vec::new();
        push_len_prefixed(&mut buf, self.payload_type.as_bytes());
        match &self.content {
            PayloadContent::Text(t) => {
                buf.push(0);
                push_len_prefixed(&mut buf, t.as_bytes());
            }
            PayloadContent::Bytes(b) => {
                buf.push(1);
                push_len_prefixed(&mut buf, b);
            }
        }
        match self.economic_value {
            Some(v) => {
                buf.push(1);
                buf.extend_from_slice(&v.to_be_bytes());
            }
            None => buf.push(0),
        }
        if include_cosignatures {
            buf.extend_from_slice(&(self.cosignatures.len() as u32).to_be_bytes());
            for cosig in &self.cosignatures {
                push_len_prefixed(&mut buf, cosig.signer_agent_id.as_bytes());
                push_len_prefixed(&mut buf, &cosig.signature);
                buf.extend_from_slice(&cosig.timestamp_us.to_be_bytes());
            }
        }
        buf
    }
}

fn push_len_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LedgerEntry {
    pub sequence: u64,
    pub timestamp_us: i64,
    pub agent_id: String,
    pub payload_bytes: Vec<u8>,
    pub payload_hash: [u8; 32],
    pub prev_hash: [u8; 32],
    pub signature: Vec<u8>,
}

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Ledger {
    entries: Vec<LedgerEntry>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    fn last(&self) -> Option<&LedgerEntry> {
        self.entries.last()
    }

    pub fn append(
        &mut self,
        registry: &AgentRegistry,
        keypair: &AgentKeyPair,
        agent_id: &str,
        payload: TrustPayload,
        timestamp_us: i64,
        audit: &mut AuditManager,
    ) -> Result<&LedgerEntry> {
        macro_rules! reject {
            ($err:expr) => {{
                let err = $err;
                audit.record(EventType::AppendRejected, agent_id, &err.to_string(), timestamp_us / 1_000);
                return Err(err);
            }};
        }

        let Some(agent) = registry.get(agent_id) else { reject!(Error::UnknownAgent(agent_id.to_string())) };
        if !agent.is_active(timestamp_us / 1_000_000) {
            reject!(Error::AgentExpired(agent_id.to_string()));
        }
        if let Some(value) = payload.economic_value {
            if value > agent.authority_ceiling {
                reject!(Error::AuthorityExceeded { value, ceiling: agent.authority_ceiling });
            }
        }
        if agent.cosign_required {
            if payload.cosignatures.is_empty() {
                reject!(Error::CosignMissing);
            }
            let without_cosigs = payload.serialize(false);
            for cosig in &payload.cosignatures {
                if cosig.signer_agent_id == agent_id {
                    reject!(Error::SelfCosign(agent_id.to_string()));
                }
                let Some(cosigner) = registry.get(&cosig.signer_agent_id) else {
                    reject!(Error::UnknownCosigner(cosig.signer_agent_id.clone()))
                };
                let mut message = without_cosigs.clone();
                message.extend_from_slice(&cosig.timestamp_us.to_be_bytes());
                if !agent::verify(cosigner.algorithm, &cosigner.agent_id, &cosigner.public_key, &message, &cosig.signature) {
                    reject!(Error::InvalidCosignature(cosig.signer_agent_id.clone()));
                }
            }
        }

        let payload_bytes = payload.serialize(true);
        let payload_hash: [u8; 32] = Sha256::digest(&payload_bytes).into();
        let prev_hash = self.last().map(|e| e.payload_hash).unwrap_or([0u8; 32]);
        let sequence = self.last().map(|e| e.sequence + 1).unwrap_or(1);

        let mut data_to_sign = Vec::with_capacity(72);
        data_to_sign.extend_from_slice(&prev_hash);
        data_to_sign.extend_from_slice(&payload_hash);
        data_to_sign.extend_from_slice(&(sequence as i64).to_be_bytes());
        let signature = keypair.sign(&data_to_sign);

        self.entries.push(LedgerEntry {
            sequence,
            timestamp_us,
            agent_id: agent_id.to_string(),
            payload_bytes,
            payload_hash,
            prev_hash,
            signature,
        });
        tracing::debug!(sequence, agent_id, "ledger entry appended");
        audit.record(EventType::AppendSuccess, agent_id, &format!("sequence {sequence}"), timestamp_us / 1_000);
        Ok(self.entries.last().unwrap())
    }

    /// Walks the ledger validating hash chain, sequence, and signatures
    /// against `registry`. Returns the first violation encountered, emitting
    /// a `SecurityAudit` (`IntegrityViolation`) event before raising it.
    pub fn verify_integrity(&self, registry: &AgentRegistry, audit: &mut AuditManager) -> Result<()> {
        macro_rules! violation {
            ($agent_id:expr, $timestamp_us:expr, $err:expr) => {{
                let err = $err;
                audit.record(EventType::IntegrityViolation, $agent_id, &err.to_string(), $timestamp_us / 1_000);
                return Err(err);
            }};
        }

        let mut expected_prev = [0u8; 32];
        for (i, entry) in self.entries.iter().enumerate() {
            let expected_seq = (i + 1) as u64;
            if entry.sequence != expected_seq {
                violation!(
                    &entry.agent_id,
                    entry.timestamp_us,
                    Error::LedgerSequenceGap { expected: expected_seq, found: entry.sequence }
                );
            }
            let payload_hash: [u8; 32] = Sha256::digest(&entry.payload_bytes).into();
            if payload_hash != entry.payload_hash {
                violation!(&entry.agent_id, entry.timestamp_us, Error::PayloadHashMismatch(entry.sequence));
            }
            if entry.prev_hash != expected_prev {
                violation!(&entry.agent_id, entry.timestamp_us, Error::LedgerHashMismatch(entry.sequence));
            }

            let mut data_to_sign = Vec::with_capacity(72);
            data_to_sign.extend_from_slice(&entry.prev_hash);
            data_to_sign.extend_from_slice(&entry.payload_hash);
            data_to_sign.extend_from_slice(&(entry.sequence as i64).to_be_bytes());

            let Some(agent) = registry.get(&entry.agent_id) else {
                violation!(&entry.agent_id, entry.timestamp_us, Error::UnknownAgent(entry.agent_id.clone()))
            };
            if !agent::verify(agent.algorithm, &agent.agent_id, &agent.public_key, &data_to_sign, &entry.signature) {
                violation!(&entry.agent_id, entry.timestamp_us, Error::InvalidSignature);
            }
            if !agent.is_active(entry.timestamp_us / 1_000_000) {
                violation!(&entry.agent_id, entry.timestamp_us, Error::AgentExpired(entry.agent_id.clone()));
            }

            expected_prev = entry.payload_hash;
        }
        Ok(())
    }

    pub fn is_valid(&self, registry: &AgentRegistry, audit: &mut AuditManager) -> bool {
        self.verify_integrity(registry, audit).is_ok()
    }

    /// Exports every entry with `sequence >= from_seq` as opaque blobs.
    pub fn export_since(&self, from_seq: u64) -> Vec<LedgerEntry> {
        self.entries.iter().filter(|e| e.sequence >= from_seq).cloned().collect()
    }

    /// Imports a delta, validating sequence contiguity, payload hash,
    /// signature, and agent validity for each entry.
    pub fn import_delta(&mut self, registry: &AgentRegistry, delta: Vec<LedgerEntry>) -> Result<()> {
        let mut expected_seq = self.last().map(|e| e.sequence + 1).unwrap_or(1);
        if self.entries.is_empty() && delta.first().map(|e| e.sequence) != Some(1) {
            return Err(Error::LedgerSequenceGap { expected: 1, found: delta.first().map(|e| e.sequence).unwrap_or(0) });
        }
        for entry in &delta {
            if entry.sequence != expected_seq {
                return Err(Error::LedgerSequenceGap { expected: expected_seq, found: entry.sequence });
            }
            let payload_hash: [u8; 32] = Sha256::digest(&entry.payload_bytes).into();
            if payload_hash != entry.payload_hash {
                return Err(Error::PayloadHashMismatch(entry.sequence));
            }
            let agent = registry.get(&entry.agent_id).ok_or_else(|| Error::UnknownAgent(entry.agent_id.clone()))?;
            let mut data_to_sign = Vec::with_capacity(72);
            data_to_sign.extend_from_slice(&entry.prev_hash);
            data_to_sign.extend_from_slice(&entry.payload_hash);
            data_to_sign.extend_from_slice(&(entry.sequence as i64).to_be_bytes());
            if !agent::verify(agent.algorithm, &agent.agent_id, &agent.public_key, &data_to_sign, &entry.signature) {
                return Err(Error::InvalidSignature);
            }
            if !agent.is_active(entry.timestamp_us / 1_000_000) {
                return Err(Error::AgentExpired(entry.agent_id.clone()));
            }
            expected_seq += 1;
        }
        self.entries.extend(delta);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::agent::{Agent, AgentKeyPair, Algorithm};

    fn registered_agent(agent_id: &str) -> (AgentRegistry, AgentKeyPair) {
        let keypair = AgentKeyPair::new_hmac(agent_id);
        let agent = Agent {
            agent_id: agent_id.to_string(),
            algorithm: Algorithm::HmacSha256,
            public_key: keypair.public_key_bytes(),
            authority_ceiling: 1_000,
            write_scope: "*".into(),
            read_scope: "*".into(),
            validity_start: 0,
            validity_end: 0,
            parent_agent: None,
            cosign_required: false,
        };
        let mut registry = AgentRegistry::new();
        let attestation_sig = keypair.sign(&attestation_bytes_for_test(&agent));
        registry.register_agent(agent, &attestation_sig, &mut AuditManager::new(), 0).unwrap();
        (registry, keypair)
    }

    // Mirrors Agent::attestation_bytes (private) for test setup only.
    fn attestation_bytes_for_test(agent: &Agent) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(agent.agent_id.as_bytes());
        buf.push(0);
        buf.extend_from_slice(&agent.public_key);
        buf.extend_from_slice(&agent.authority_ceiling.to_be_bytes());
        buf.extend_from_slice(agent.write_scope.as_bytes());
        buf.extend_from_slice(agent.read_scope.as_bytes());
        buf.extend_from_slice(&agent.validity_start.to_be_bytes());
        buf.extend_from_slice(&agent.validity_end.to_be_bytes());
        buf.extend_from_slice(agent.parent_agent.as_deref().unwrap_or("").as_bytes());
        buf.push(u8::from(agent.cosign_required));
        buf
    }

    #[test]
    fn three_appends_form_a_valid_chain() {
        let (registry, keypair) = registered_agent("A");
        let mut ledger = Ledger::new();
        let mut audit = AuditManager::new();
        for text in ["p1", "p2", "p3"] {
            ledger.append(&registry, &keypair, "A", TrustPayload::text("note", text), 1_000_000, &mut audit).unwrap();
        }
        assert!(ledger.is_valid(&registry, &mut audit));
        assert_eq!(ledger.entries().len(), 3);
        assert_eq!(audit.events().len(), 3);
        assert!(audit.events().iter().all(|e| e.event_type == EventType::AppendSuccess));
    }

    #[test]
    fn tampering_with_payload_hash_breaks_verification() {
        let (registry, keypair) = registered_agent("A");
        let mut ledger = Ledger::new();
        let mut audit = AuditManager::new();
        for text in ["p1", "p2", "p3"] {
            ledger.append(&registry, &keypair, "A", TrustPayload::text("note", text), 1_000_000, &mut audit).unwrap();
        }
        ledger.entries[1].payload_hash[0] ^= 0xff;
        let err = ledger.verify_integrity(&registry, &mut audit).unwrap_err();
        assert!(matches!(err, Error::PayloadHashMismatch(2)));
        assert_eq!(audit.events().last().unwrap().event_type, EventType::IntegrityViolation);
    }

    #[test]
    fn export_import_round_trip() {
        let (registry, keypair) = registered_agent("A");
        let mut ledger = Ledger::new();
        let mut audit = AuditManager::new();
        for text in ["p1", "p2"] {
            ledger.append(&registry, &keypair, "A", TrustPayload::text("note", text), 1_000_000, &mut audit).unwrap();
        }
        let delta = ledger.export_since(1);
        let mut imported = Ledger::new();
        imported.import_delta(&registry, delta).unwrap();
        assert!(imported.is_valid(&registry, &mut audit));
    }
}
