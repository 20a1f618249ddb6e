//! Agent registry and signature dispatch (spec §4.9 "Agent registry",
//! "Signature algorithms").

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use p256::ecdsa::signature::{Signer as _, Verifier as _};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::trust::audit::{AuditManager, EventType};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Algorithm {
    HmacSha256,
    EcdsaP256,
}

impl Algorithm {
    fn tag(self) -> u8 {
        match self {
            Algorithm::HmacSha256 => 0,
            Algorithm::EcdsaP256 => 1,
        }
    }
}

/// Private signing material for an agent; kept separate from `Agent` (the
/// registry entry), which only carries public/verification data.
pub enum AgentKeyPair {
    Hmac { agent_id: String },
    Ecdsa { signing_key: SigningKey },
}

impl AgentKeyPair {
    pub fn new_hmac(agent_id: impl Into<String>) -> Self {
        AgentKeyPair::Hmac { agent_id: agent_id.into() }
    }

    pub fn generate_ecdsa() -> Self {
        AgentKeyPair::Ecdsa { signing_key: SigningKey::random(&mut rand::thread_rng()) }
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            AgentKeyPair::Hmac { .. } => Algorithm::HmacSha256,
            AgentKeyPair::Ecdsa { .. } => Algorithm::EcdsaP256,
        }
    }

    /// Public key bytes to embed in the `Agent` registry entry. HMAC has no
    /// real public key; the deterministic demo key is derived from the
    /// agent id at verification time instead (spec §4.9).
    pub fn public_key_bytes(&self) -> Vec<u8> {
        match self {
            AgentKeyPair::Hmac { .. } => Vec::new(),
            AgentKeyPair::Ecdsa { signing_key } => {
                VerifyingKey::from(signing_key).to_encoded_point(false).as_bytes().to_vec()
            }
        }
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        match self {
            AgentKeyPair::Hmac { agent_id } => {
                let key = Sha256::digest(agent_id.as_bytes());
                let mut mac = HmacSha256::new_from_slice(&key).expect("HMAC accepts any key length");
                mac.update(message);
                mac.finalize().into_bytes().to_vec()
            }
            AgentKeyPair::Ecdsa { signing_key } => {
                let signature: Signature = signing_key.sign(message);
                signature.to_bytes().to_vec()
            }
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Agent {
    pub agent_id: String,
    pub algorithm: Algorithm,
    pub public_key: Vec<u8>,
    pub authority_ceiling: u64,
    pub write_scope: String,
    pub read_scope: String,
    /// Unix seconds; 0 means "no limit" on that bound.
    pub validity_start: i64,
    pub validity_end: i64,
    pub parent_agent: Option<String>,
    pub cosign_required: bool,
}

impl Agent {
    fn attestation_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.agent_id.as_bytes());
        buf.push(self.algorithm.tag());
        buf.extend_from_slice(&self.public_key);
        buf.extend_from_slice(&self.authority_ceiling.to_be_bytes());
        buf.extend_from_slice(self.write_scope.as_bytes());
        buf.extend_from_slice(self.read_scope.as_bytes());
        buf.extend_from_slice(&self.validity_start.to_be_bytes());
        buf.extend_from_slice(&self.validity_end.to_be_bytes());
        buf.extend_from_slice(self.parent_agent.as_deref().unwrap_or("").as_bytes());
        buf.push(u8::from(self.cosign_required));
        buf
    }

    pub fn is_active(&self, at_unix_seconds: i64) -> bool {
        (self.validity_start == 0 || at_unix_seconds >= self.validity_start)
            && (self.validity_end == 0 || at_unix_seconds <= self.validity_end)
    }
}

/// Verifies `signature` over `message` for the given algorithm/public key.
pub fn verify(algorithm: Algorithm, agent_id: &str, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    match algorithm {
        Algorithm::HmacSha256 => {
            let key = Sha256::digest(agent_id.as_bytes());
            let Ok(mut mac) = HmacSha256::new_from_slice(&key) else { return false };
            mac.update(message);
            mac.verify_slice(signature).is_ok()
        }
        Algorithm::EcdsaP256 => {
            let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(public_key) else { return false };
            let Ok(sig) = Signature::from_slice(signature) else { return false };
            verifying_key.verify(message, &sig).is_ok()
        }
    }
}

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct AgentRegistry {
    agents: HashMap<String, Agent>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verifies the agent's self-attestation before inserting it. Records a
    /// `RegistrationFailed` audit event on mismatch (spec §4.9).
    pub fn register_agent(&mut self, agent: Agent, self_signature: &[u8], audit: &mut AuditManager, timestamp_ms: i64) -> Result<()> {
        let attestation = agent.attestation_bytes();
        if !verify(agent.algorithm, &agent.agent_id, &agent.public_key, &attestation, self_signature) {
            audit.record(EventType::RegistrationFailed, &agent.agent_id, "self-attestation signature mismatch", timestamp_ms);
            return Err(Error::InvalidSignature);
        }
        self.agents.insert(agent.agent_id.clone(), agent);
        Ok(())
    }

    pub fn get(&self, agent_id: &str) -> Option<&Agent> {
        self.agents.get(agent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hmac_agent(agent_id: &str) -> (Agent, AgentKeyPair) {
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
        (agent, keypair)
    }

    #[test]
    fn hmac_self_attested_agent_registers() {
        let (agent, keypair) = hmac_agent("A");
        let signature = keypair.sign(&agent.attestation_bytes());
        let mut registry = AgentRegistry::new();
        let mut audit = AuditManager::new();
        registry.register_agent(agent, &signature, &mut audit, 1000).unwrap();
        assert!(registry.get("A").is_some());
        assert!(audit.events().is_empty());
    }

    #[test]
    fn tampered_self_attestation_is_rejected() {
        let (agent, keypair) = hmac_agent("A");
        let mut signature = keypair.sign(&agent.attestation_bytes());
        signature[0] ^= 0xff;
        let mut registry = AgentRegistry::new();
        let mut audit = AuditManager::new();
        assert!(registry.register_agent(agent, &signature, &mut audit, 1000).is_err());
        assert_eq!(audit.events().len(), 1);
        assert_eq!(audit.events()[0].event_type, EventType::RegistrationFailed);
    }

    #[test]
    fn ecdsa_self_attested_agent_registers() {
        let keypair = AgentKeyPair::generate_ecdsa();
        let agent = Agent {
            agent_id: "B".into(),
            algorithm: Algorithm::EcdsaP256,
            public_key: keypair.public_key_bytes(),
            authority_ceiling: 1_000,
            write_scope: "*".into(),
            read_scope: "*".into(),
            validity_start: 0,
            validity_end: 0,
            parent_agent: None,
            cosign_required: false,
        };
        let signature = keypair.sign(&agent.attestation_bytes());
        let mut registry = AgentRegistry::new();
        let mut audit = AuditManager::new();
        registry.register_agent(agent, &signature, &mut audit, 1000).unwrap();
        assert!(registry.get("B").is_some());
    }
}
