//! Cryptographic provenance layer: agent registry, hash-chained ledger,
//! scope-based entitlements, reputation scoring, and a separately
//! hash-chained audit log (spec §4.9).

pub mod agent;
pub mod audit;
pub mod ledger;
pub mod reputation;
pub mod scope;

pub use agent::{Agent, AgentKeyPair, AgentRegistry, Algorithm};
pub use audit::{AuditEvent, AuditManager, EventType};
pub use ledger::{Cosignature, Ledger, LedgerEntry, PayloadContent, TrustPayload};
pub use reputation::{ReputationManager, ReputationState};
pub use scope::{EntitlementEnforcer, EntitlementRowEvaluator, RowAccessEvaluator, Scope};
