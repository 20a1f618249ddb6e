//! `sqlite_schema` catalog reader, grounded on the teacher's `schema::Schema`
//! row shape but read directly off a `TableCursor` instead of through a
//! derive macro (spec §4.2 "Schema catalog" — deliberately not a full SQL
//! parser, per the spec's §1 non-goal).

use crate::btree::cursor::TableCursor;
use crate::error::{Error, Result};
use crate::page::PageSource;
use crate::record::{decode_record, ColumnValue};

pub const SQLITE_SCHEMA_ROOT_PAGE: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaType {
    Table,
    Index,
    View,
    Trigger,
}

impl SchemaType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "table" => Some(SchemaType::Table),
            "index" => Some(SchemaType::Index),
            "view" => Some(SchemaType::View),
            "trigger" => Some(SchemaType::Trigger),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchemaRow {
    pub row_id: i64,
    pub schema_type: SchemaType,
    pub name: String,
    pub tbl_name: String,
    pub root_page: u32,
    pub sql: Option<String>,
}

fn column_text(columns: &[ColumnValue], index: usize) -> Result<String> {
    match columns.get(index) {
        Some(ColumnValue::Text(bytes)) => {
            String::from_utf8(bytes.clone()).map_err(|e| Error::Other(e.to_string()))
        }
        _ => Err(Error::ColumnOutOfRange { index, count: columns.len() }),
    }
}

fn row_from_record(row_id: i64, payload: &[u8]) -> Result<SchemaRow> {
    let columns = decode_record(payload)?;
    let type_str = column_text(&columns, 0)?;
    let schema_type = SchemaType::parse(&type_str)
        .ok_or_else(|| Error::Other(format!("unknown schema object type: {type_str}")))?;
    let name = column_text(&columns, 1)?;
    let tbl_name = column_text(&columns, 2)?;
    let root_page = columns
        .get(3)
        .and_then(ColumnValue::as_int)
        .ok_or(Error::ColumnOutOfRange { index: 3, count: columns.len() })? as u32;
    let sql = match columns.get(4) {
        Some(ColumnValue::Text(bytes)) => Some(String::from_utf8(bytes.clone()).map_err(|e| Error::Other(e.to_string()))?),
        _ => None,
    };
    Ok(SchemaRow { row_id, schema_type, name, tbl_name, root_page, sql })
}

/// Reads every row of `sqlite_schema` (page 1's own table, rootpage 1).
pub fn read_all(source: &dyn PageSource) -> Result<Vec<SchemaRow>> {
    let cursor = TableCursor::new(source, SQLITE_SCHEMA_ROOT_PAGE)?;
    cursor
        .map(|entry| entry.and_then(|(row_id, payload)| row_from_record(row_id, &payload)))
        .collect()
}

pub fn find_table<'a>(rows: &'a [SchemaRow], name: &str) -> Option<&'a SchemaRow> {
    rows.iter().find(|r| r.schema_type == SchemaType::Table && r.tbl_name == name)
}

pub fn is_reserved_table_name(name: &str) -> bool {
    name.starts_with("_sharc_")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub type_name: String,
    pub is_primary_key: bool,
}

/// Minimal column-list tokenizer for `CREATE TABLE name (col type, ...)` —
/// not a general SQL parser (spec §1 non-goal). Splits the parenthesized
/// column list on top-level commas, then reads each entry's leading
/// identifier as the column name and the rest, up to a constraint keyword,
/// as the type name.
pub fn parse_create_table_columns(sql: &str) -> Result<Vec<ColumnDef>> {
    let open = sql.find('(').ok_or_else(|| Error::Other("CREATE TABLE missing column list".into()))?;
    let close = sql.rfind(')').ok_or_else(|| Error::Other("CREATE TABLE missing closing paren".into()))?;
    if close <= open {
        return Err(Error::Other("malformed CREATE TABLE column list".into()));
    }
    let body = &sql[open + 1..close];

    let mut columns = Vec::new();
    for entry in split_top_level(body) {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let upper = entry.to_ascii_uppercase();
        if upper.starts_with("PRIMARY KEY")
            || upper.starts_with("UNIQUE")
            || upper.starts_with("CHECK")
            || upper.starts_with("FOREIGN KEY")
            || upper.starts_with("CONSTRAINT")
        {
            continue;
        }
        let mut tokens = entry.split_whitespace();
        let name = tokens.next().unwrap_or_default().trim_matches(|c| c == '"' || c == '`' || c == '[' || c == ']').to_string();
        if name.is_empty() {
            continue;
        }
        let rest: Vec<&str> = tokens.collect();
        let rest_upper = rest.iter().map(|s| s.to_ascii_uppercase()).collect::<Vec<_>>();
        let is_primary_key = rest_upper.windows(2).any(|w| w == ["PRIMARY", "KEY"]);
        let type_name = rest
            .iter()
            .take_while(|t| !matches!(t.to_ascii_uppercase().as_str(), "PRIMARY" | "NOT" | "UNIQUE" | "DEFAULT" | "CHECK" | "REFERENCES"))
            .copied()
            .collect::<Vec<_>>()
            .join(" ");
        columns.push(ColumnDef { name, type_name, is_primary_key });
    }
    Ok(columns)
}

fn split_top_level(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, c) in body.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&body[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_column_list() {
        let cols = parse_create_table_columns(
            "CREATE TABLE notes (id INTEGER PRIMARY KEY, title TEXT NOT NULL, embedding BLOB)",
        )
        .unwrap();
        assert_eq!(cols.len(), 3);
        assert_eq!(cols[0].name, "id");
        assert!(cols[0].is_primary_key);
        assert_eq!(cols[1].name, "title");
        assert_eq!(cols[1].type_name, "TEXT");
        assert_eq!(cols[2].name, "embedding");
        assert_eq!(cols[2].type_name, "BLOB");
    }

    #[test]
    fn ignores_table_level_constraints() {
        let cols = parse_create_table_columns(
            "CREATE TABLE edges (a INTEGER, b INTEGER, FOREIGN KEY (a) REFERENCES notes(id))",
        )
        .unwrap();
        assert_eq!(cols.len(), 2);
    }

    #[test]
    fn reserved_table_names_are_flagged() {
        assert!(is_reserved_table_name("_sharc_agents"));
        assert!(!is_reserved_table_name("notes"));
    }
}
