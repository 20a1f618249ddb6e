//! Lazy single-field CBOR decode (spec §4.8 "Lazy CBOR decode"): pulls one
//! field out of a `raw_cbor_data` map without materializing the whole
//! record into a concept struct.

use ciborium::value::Value as CborValue;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

fn parse_map(raw: &[u8]) -> Result<Vec<(CborValue, CborValue)>> {
    let value: CborValue = ciborium::de::from_reader(raw).map_err(|e| Error::Other(e.to_string()))?;
    match value {
        CborValue::Map(entries) => Ok(entries),
        _ => Err(Error::Other("raw_cbor_data is not a CBOR map".into())),
    }
}

fn find<'a>(entries: &'a [(CborValue, CborValue)], name: &str) -> Option<&'a CborValue> {
    entries.iter().find_map(|(k, v)| match k {
        CborValue::Text(t) if t == name => Some(v),
        _ => None,
    })
}

/// Returns the raw CBOR value of `name`, or `None` if absent.
pub fn read_field(raw: &[u8], name: &str) -> Result<Option<CborValue>> {
    let entries = parse_map(raw)?;
    Ok(find(&entries, name).cloned())
}

/// Returns `name` decoded as `T`, or `None` if the field is absent.
pub fn read_field_as<T: DeserializeOwned>(raw: &[u8], name: &str) -> Result<Option<T>> {
    let Some(value) = read_field(raw, name)? else {
        return Ok(None);
    };
    value
        .deserialized()
        .map(Some)
        .map_err(|e| Error::Other(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ciborium::cbor;

    #[test]
    fn reads_single_field_without_full_decode() {
        let value = cbor!({ "name" => "alice", "age" => 30 }).unwrap();
        let mut raw = Vec::new();
        ciborium::ser::into_writer(&value, &mut raw).unwrap();

        let name: Option<String> = read_field_as(&raw, "name").unwrap();
        assert_eq!(name.as_deref(), Some("alice"));
        let age: Option<i64> = read_field_as(&raw, "age").unwrap();
        assert_eq!(age, Some(30));
        let missing: Option<String> = read_field_as(&raw, "missing").unwrap();
        assert_eq!(missing, None);
    }
}
