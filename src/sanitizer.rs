use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

use crate::error::ExtractError;
use crate::schema::{
    dedupe_by_identity, is_valid_source, sort_by_last_name, Athlete, RosterRecord, DEFAULT_NOTES,
    UNKNOWN_ATHLETE, UNKNOWN_POSITION, UNKNOWN_SPORT,
};

/// Convert raw provider output into a canonical roster record.
///
/// Only total unparseability is fatal; every other anomaly (missing fields,
/// wrong shapes, bad URLs) is repaired in place. `query` is the original team
/// query, used as the team-name fallback.
pub fn sanitize(raw: &str, query: &str) -> Result<RosterRecord, ExtractError> {
    let value = parse_lenient(raw)?;
    Ok(coerce_record(value, query))
}

/// Parse a name -> search-alias map out of raw provider output. Values that
/// are not arrays are dropped; non-string tags within an array are dropped.
pub fn sanitize_tag_map(raw: &str) -> Result<BTreeMap<String, Vec<String>>, ExtractError> {
    let value = parse_lenient(raw)?;
    let obj = match value {
        Value::Object(map) => map,
        _ => {
            return Err(ExtractError::Parse(
                "expected an object mapping athlete names to tag arrays".into(),
            ))
        }
    };

    let mut tags = BTreeMap::new();
    for (name, v) in obj {
        if let Some(arr) = v.as_array() {
            let list: Vec<String> = arr
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
            tags.insert(name, list);
        }
    }
    Ok(tags)
}

/// Strip a markdown code fence if the provider wrapped its JSON in one.
fn strip_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
    {
        text = rest.strip_suffix("```").unwrap_or(rest).trim();
    }
    text
}

/// Strict parse first; on failure, retry on the substring between the first
/// `{` and the last `}` to shed chatty preambles. The only fatal path.
fn parse_lenient(raw: &str) -> Result<Value, ExtractError> {
    let text = strip_fences(raw);
    if let Ok(v) = serde_json::from_str(text) {
        return Ok(v);
    }

    warn!("Direct JSON parse failed, attempting substring extraction");
    let (start, end) = match (text.find('{'), text.rfind('}')) {
        (Some(s), Some(e)) if s < e => (s, e),
        _ => {
            return Err(ExtractError::Parse(
                "no JSON object found in provider output".into(),
            ))
        }
    };
    serde_json::from_str(&text[start..=end])
        .map_err(|e| ExtractError::Parse(format!("unrecoverable provider output: {e}")))
}

/// Total coercion of a parsed value into a valid record. Never fails.
fn coerce_record(value: Value, query: &str) -> RosterRecord {
    let obj = match value {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };

    let team_name =
        non_empty_str(obj.get("teamName")).unwrap_or_else(|| query.trim().to_string());
    let sport = non_empty_str(obj.get("sport")).unwrap_or_else(|| UNKNOWN_SPORT.to_string());

    let mut players: Vec<Athlete> = obj
        .get("players")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(coerce_athlete).collect())
        .unwrap_or_default();
    dedupe_by_identity(&mut players);
    sort_by_last_name(&mut players);

    let verified_sources: Vec<String> = obj
        .get("verifiedSources")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .filter(|s| is_valid_source(s))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let verification_notes =
        non_empty_str(obj.get("verificationNotes")).unwrap_or_else(|| DEFAULT_NOTES.to_string());

    RosterRecord {
        team_name,
        sport,
        players,
        verified_sources,
        verification_notes,
        meta: None,
    }
}

/// Map one raw player entry. Strings become name-only athletes, objects get
/// per-field fallbacks, everything else (null, numbers, arrays) is dropped.
fn coerce_athlete(value: &Value) -> Option<Athlete> {
    match value {
        Value::String(name) => Some(Athlete {
            name: name.clone(),
            position: UNKNOWN_POSITION.to_string(),
        }),
        Value::Object(p) => Some(Athlete {
            name: non_empty_str(p.get("name")).unwrap_or_else(|| UNKNOWN_ATHLETE.to_string()),
            position: non_empty_str(p.get("position"))
                .unwrap_or_else(|| UNKNOWN_POSITION.to_string()),
        }),
        _ => None,
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ── Tests ──
