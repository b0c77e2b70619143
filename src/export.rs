use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;

use crate::schema::RosterRecord;

/// Render a roster as `Name,Position` CSV, fields quoted for spreadsheet
/// import.
pub fn roster_to_csv(record: &RosterRecord) -> String {
    let mut out = String::from("Name,Position\n");
    for athlete in &record.players {
        out.push_str(&format!(
            "\"{}\",\"{}\"\n",
            escape(&athlete.name),
            escape(&athlete.position)
        ));
    }
    out
}

fn escape(field: &str) -> String {
    field.replace('"', "\"\"")
}

/// Default export name: whitespace collapsed to underscores, e.g.
/// `Springfield_Atoms_roster.csv`.
pub fn default_filename(team_name: &str) -> String {
    let whitespace = Regex::new(r"\s+").unwrap();
    format!("{}_roster.csv", whitespace.replace_all(team_name.trim(), "_"))
}

pub fn write_csv(record: &RosterRecord, path: &Path) -> Result<()> {
    std::fs::write(path, roster_to_csv(record))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

// ── Tests ──
