use std::collections::HashSet;

use chrono::Local;

use crate::schema::{dedupe_by_identity, sort_by_last_name, Athlete, RosterRecord};

/// Merge a fresh extraction into an existing record for the same team
/// (conflict-on-save). Incoming athletes win on identity collisions; sources
/// are unioned; the notes become an audit line referencing the prior text.
/// Both inputs are left untouched.
pub fn merge_records(base: &RosterRecord, incoming: &RosterRecord) -> RosterRecord {
    RosterRecord {
        team_name: base.team_name.clone(),
        sport: base.sport.clone(),
        players: overlay_players(&base.players, &incoming.players),
        verified_sources: union_sources(&base.verified_sources, &incoming.verified_sources),
        verification_notes: format!(
            "Merged new extraction from {}. Original notes: {}",
            Local::now().format("%Y-%m-%d"),
            base.verification_notes
        ),
        meta: base.meta.clone(),
    }
}

/// Merge a historical season's athletes into an existing record. Same overlay
/// semantics as [`merge_records`]; the audit note names the season label and
/// how many identities arrived with it.
pub fn merge_season(
    base: &RosterRecord,
    incoming: &[Athlete],
    sources: &[String],
    season: &str,
) -> RosterRecord {
    RosterRecord {
        team_name: base.team_name.clone(),
        sport: base.sport.clone(),
        players: overlay_players(&base.players, incoming),
        verified_sources: union_sources(&base.verified_sources, sources),
        verification_notes: format!(
            "Merged {} historical identities from the {} season on {}. {}",
            incoming.len(),
            season,
            Local::now().format("%Y-%m-%d"),
            base.verification_notes
        ),
        meta: base.meta.clone(),
    }
}

/// Overlay `incoming` onto `base` keyed by athlete identity: collisions take
/// the incoming version, everything else is kept, result re-sorted by last
/// name.
fn overlay_players(base: &[Athlete], incoming: &[Athlete]) -> Vec<Athlete> {
    let mut merged: Vec<Athlete> = base.iter().chain(incoming).cloned().collect();
    dedupe_by_identity(&mut merged);
    sort_by_last_name(&mut merged);
    merged
}

/// Set union preserving first-seen order.
fn union_sources(base: &[String], extra: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    base.iter()
        .chain(extra.iter())
        .filter(|url| seen.insert(url.as_str()))
        .cloned()
        .collect()
}

// ── Tests ──
