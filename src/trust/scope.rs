//! Scope grammar and entitlement enforcement (spec §4.9 "Scope",
//! "EntitlementEnforcer", "Row-level access").

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::trust::agent::Agent;

#[derive(Debug, Clone)]
enum Entry {
    Unrestricted,
    SchemaAdmin,
    AllColumns(String),
    WildPrefix(String),
    Column(String, String),
}

/// Parsed form of a scope string: comma-separated entries, `*` unrestricted,
/// `.schema` schema-admin, bare `table` == `table.*`, `prefix*.*` wild
/// prefix, `table.col` column-scoped.
#[derive(Debug, Clone)]
pub struct Scope {
    entries: Vec<Entry>,
}

impl Scope {
    pub fn parse(raw: &str) -> Self {
        let mut entries = Vec::new();
        for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if part == "*" {
                entries.push(Entry::Unrestricted);
            } else if part == ".schema" {
                entries.push(Entry::SchemaAdmin);
            } else if let Some(prefix) = part.strip_suffix("*.*") {
                entries.push(Entry::WildPrefix(prefix.to_string()));
            } else if let Some((table, col)) = part.split_once('.') {
                if col == "*" {
                    entries.push(Entry::AllColumns(table.to_string()));
                } else {
                    entries.push(Entry::Column(table.to_string(), col.to_string()));
                }
            } else {
                entries.push(Entry::AllColumns(part.to_string()));
            }
        }
        Self { entries }
    }

    pub fn is_schema_admin(&self) -> bool {
        self.entries.iter().any(|e| matches!(e, Entry::Unrestricted | Entry::SchemaAdmin))
    }

    pub fn can_read_all_columns(&self, table: &str) -> bool {
        self.entries.iter().any(|e| match e {
            Entry::Unrestricted => true,
            Entry::AllColumns(t) => t == table,
            Entry::WildPrefix(p) => table.starts_with(p.as_str()),
            _ => false,
        })
    }

    pub fn can_read_table(&self, table: &str) -> bool {
        self.can_read_all_columns(table)
            || self.entries.iter().any(|e| matches!(e, Entry::Column(t, _) if t == table))
    }

    pub fn can_read_column(&self, table: &str, column: &str) -> bool {
        if self.can_read_all_columns(table) {
            return true;
        }
        self.entries.iter().any(|e| matches!(e, Entry::Column(t, c) if t == table && c == column))
    }
}

pub struct EntitlementEnforcer {
    pub identity_validator: Option<Box<dyn Fn(&Agent) -> bool + Send + Sync>>,
}

impl Default for EntitlementEnforcer {
    fn default() -> Self {
        Self { identity_validator: None }
    }
}

impl EntitlementEnforcer {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_identity(&self, agent: &Agent) -> Result<()> {
        if let Some(validator) = &self.identity_validator {
            if !validator(agent) {
                return Err(Error::UnauthorizedRead { table: String::new(), column: String::new() });
            }
        }
        Ok(())
    }

    fn check_active(&self, agent: &Agent, at_unix_seconds: i64) -> Result<()> {
        if !agent.is_active(at_unix_seconds) {
            return Err(Error::AgentExpired(agent.agent_id.clone()));
        }
        Ok(())
    }

    /// `columns = None` means "wildcard SELECT *", which is denied unless
    /// the agent's scope grants every column in the table.
    pub fn enforce(&self, agent: &Agent, table: &str, columns: Option<&[&str]>, at_unix_seconds: i64) -> Result<()> {
        self.check_identity(agent)?;
        self.check_active(agent, at_unix_seconds)?;
        let scope = Scope::parse(&agent.read_scope);
        match columns {
            None => {
                if !scope.can_read_all_columns(table) {
                    return Err(Error::UnauthorizedRead { table: table.to_string(), column: "*".to_string() });
                }
            }
            Some(cols) => {
                for col in cols {
                    if !scope.can_read_column(table, col) {
                        return Err(Error::UnauthorizedRead { table: table.to_string(), column: col.to_string() });
                    }
                }
            }
        }
        Ok(())
    }

    pub fn enforce_write(&self, agent: &Agent, table: &str, columns: Option<&[&str]>, at_unix_seconds: i64) -> Result<()> {
        self.check_identity(agent)?;
        self.check_active(agent, at_unix_seconds)?;
        let scope = Scope::parse(&agent.write_scope);
        match columns {
            None => {
                if !scope.can_read_all_columns(table) {
                    return Err(Error::UnauthorizedWrite { table: table.to_string(), column: "*".to_string() });
                }
            }
            Some(cols) => {
                for col in cols {
                    if !scope.can_read_column(table, col) {
                        return Err(Error::UnauthorizedWrite { table: table.to_string(), column: col.to_string() });
                    }
                }
            }
        }
        Ok(())
    }

    pub fn enforce_schema_admin(&self, agent: &Agent, at_unix_seconds: i64) -> Result<()> {
        self.check_identity(agent)?;
        self.check_active(agent, at_unix_seconds)?;
        let scope = Scope::parse(&agent.read_scope);
        if !scope.is_schema_admin() {
            return Err(Error::UnauthorizedSchema);
        }
        Ok(())
    }

    /// Validates a compound query atomically: any single failing
    /// `(table, columns)` pair fails the whole batch.
    pub fn enforce_all(&self, agent: &Agent, requests: &[(&str, Option<&[&str]>)], at_unix_seconds: i64) -> Result<()> {
        for (table, columns) in requests {
            self.enforce(agent, table, *columns, at_unix_seconds)?;
        }
        Ok(())
    }
}

/// Invoked on a row's raw payload bytes, with its rowid, before the row is
/// handed to a cursor's caller. Only rows returning `true` are emitted.
pub trait RowAccessEvaluator {
    fn allows(&self, row_id: i64, raw_payload: &[u8]) -> bool;
}

/// Decodes a designated tag column in place (via `decode_string_at`,
/// operating on the raw record without full materialization) and matches
/// it against a set of allowed tags.
pub struct EntitlementRowEvaluator {
    pub tag_column_index: usize,
    pub allowed_tags: HashSet<String>,
}

impl RowAccessEvaluator for EntitlementRowEvaluator {
    fn allows(&self, _row_id: i64, raw_payload: &[u8]) -> bool {
        use crate::record::{compute_column_offsets, read_serial_types};

        let mut types = Vec::new();
        let Ok((count, body_offset)) = read_serial_types(raw_payload, &mut types) else {
            return false;
        };
        if self.tag_column_index >= count {
            return false;
        }
        let mut offsets = Vec::new();
        compute_column_offsets(&types, count, body_offset, &mut offsets);
        let (start, _len) = offsets[self.tag_column_index];
        match crate::record::decode_string_at(raw_payload, types[self.tag_column_index], start) {
            Ok(tag) => self.allowed_tags.contains(tag),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_scope_grants_schema_admin_and_any_column() {
        let scope = Scope::parse("*");
        assert!(scope.is_schema_admin());
        assert!(scope.can_read_all_columns("anything"));
        assert!(scope.can_read_column("anything", "col"));
    }

    #[test]
    fn bare_table_name_is_table_wildcard() {
        let scope = Scope::parse("notes");
        assert!(scope.can_read_all_columns("notes"));
        assert!(!scope.can_read_all_columns("other"));
    }

    #[test]
    fn column_scoped_entry_denies_wildcard_select() {
        let scope = Scope::parse("notes.title");
        assert!(scope.can_read_column("notes", "title"));
        assert!(!scope.can_read_column("notes", "body"));
        assert!(!scope.can_read_all_columns("notes"));
    }

    #[test]
    fn wild_prefix_matches_table_prefix() {
        let scope = Scope::parse("_sharc_hnsw_*.*");
        assert!(scope.can_read_all_columns("_sharc_hnsw_notes_embedding"));
        assert!(!scope.can_read_all_columns("notes"));
    }

    #[test]
    fn enforcer_denies_expired_agent() {
        let agent = Agent {
            agent_id: "A".into(),
            algorithm: crate::trust::agent::Algorithm::HmacSha256,
            public_key: Vec::new(),
            authority_ceiling: 0,
            write_scope: "*".into(),
            read_scope: "*".into(),
            validity_start: 0,
            validity_end: 100,
            parent_agent: None,
            cosign_required: false,
        };
        let enforcer = EntitlementEnforcer::new();
        assert!(enforcer.enforce(&agent, "notes", None, 200).is_err());
        assert!(enforcer.enforce(&agent, "notes", None, 50).is_ok());
    }
}
