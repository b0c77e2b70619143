use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const UNKNOWN_SPORT: &str = "Unknown Sport";
pub const UNKNOWN_POSITION: &str = "Unknown";
pub const UNKNOWN_ATHLETE: &str = "Unknown Athlete";
pub const DEFAULT_NOTES: &str = "Extraction completed successfully.";

/// One roster entry. Display name carries no jersey number or injury marker;
/// position is a free-form short code ("QB", "Goalkeeper", ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Athlete {
    pub name: String,
    pub position: String,
}

impl Athlete {
    /// Identity key for all set operations: trimmed, lower-cased name.
    /// Two different real people sharing a rendered name are
    /// indistinguishable to this key.
    pub fn identity_key(&self) -> String {
        identity_key(&self.name)
    }
}

pub fn identity_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Provider diagnostics attached to an extraction. Never required for
/// correctness.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionMeta {
    pub provider: String,
    pub latency_ms: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// The validated, canonical representation of one team roster.
///
/// Invariants: `team_name` and `sport` are never empty, `players` is sorted by
/// last name and holds no two entries with the same identity key, and every
/// element of `verified_sources` is a syntactically valid URL. Only the
/// sanitizer and the reconciler construct these; callers treat a record as
/// immutable and produce edited copies via [`RosterRecord::with_players`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterRecord {
    pub team_name: String,
    pub sport: String,
    pub players: Vec<Athlete>,
    pub verified_sources: Vec<String>,
    pub verification_notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<ExtractionMeta>,
}

impl RosterRecord {
    /// Copy with a replacement player list, re-applying the dedupe and sort
    /// invariants.
    pub fn with_players(&self, mut players: Vec<Athlete>) -> RosterRecord {
        dedupe_by_identity(&mut players);
        sort_by_last_name(&mut players);
        RosterRecord {
            players,
            ..self.clone()
        }
    }
}

/// Sort key: final whitespace-delimited token of the display name,
/// lower-cased.
pub fn last_name_key(name: &str) -> String {
    name.split_whitespace()
        .last()
        .unwrap_or("")
        .to_lowercase()
}

/// Sort athletes ascending by last name, case-insensitive. Downstream
/// consumers rely on this ordering for stable diffs and option-list
/// rendering, so it holds for every record the engine produces.
pub fn sort_by_last_name(players: &mut [Athlete]) {
    players.sort_by_key(|a| last_name_key(&a.name));
}

/// Collapse entries sharing an identity key. The last occurrence wins,
/// consistent with the reconciler's overlay semantics.
pub fn dedupe_by_identity(players: &mut Vec<Athlete>) {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<Athlete> = Vec::with_capacity(players.len());
    for athlete in players.drain(..) {
        match index.get(&athlete.identity_key()) {
            Some(&i) => kept[i] = athlete,
            None => {
                index.insert(athlete.identity_key(), kept.len());
                kept.push(athlete);
            }
        }
    }
    *players = kept;
}

/// A source entry must parse as an absolute URL to survive sanitization.
pub fn is_valid_source(source: &str) -> bool {
    url::Url::parse(source).is_ok()
}

// ── Tests ──
