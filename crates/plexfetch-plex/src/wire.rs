//! Normalization of loosely-typed upstream values.
//!
//! The upstream schema encodes flags as `true`, `1`, `"1"` or omits them,
//! depending on server version and payload format. These helpers turn all
//! of that into a plain `bool` at parse time, so nothing downstream has to
//! look at raw wire values again. Anything unrecognised is `false`.

use serde::{Deserialize, Deserializer};

/// Interpret a textual flag (XML attribute or JSON string).
pub fn parse_flag(raw: &str) -> bool {
    let raw = raw.trim();
    raw == "1" || raw.eq_ignore_ascii_case("true")
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFlag {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// `deserialize_with` adapter for JSON flags. Use together with `#[serde(default)]`.
pub fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawFlag>::deserialize(deserializer)?;
    Ok(match raw {
        Some(RawFlag::Bool(b)) => b,
        Some(RawFlag::Int(n)) => n == 1,
        Some(RawFlag::Float(n)) => n == 1.0,
        Some(RawFlag::Text(s)) => parse_flag(&s),
        None => false,
    })
}

/// Empty attribute values count as absent.
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
