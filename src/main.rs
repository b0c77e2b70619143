mod db;
mod error;
mod export;
mod orchestrator;
mod provider;
mod reconciler;
mod sanitizer;
mod schema;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use tracing::info;

use crate::db::SavedRoster;
use crate::provider::GeminiProvider;
use crate::schema::{Athlete, RosterRecord};

#[derive(Parser)]
#[command(name = "roster_sync", about = "Extract and reconcile sports team rosters via Gemini")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract a roster for a free-text team query
    Extract {
        /// Team query, e.g. "Springfield Atoms" or "Texas Longhorns Women's Basketball"
        query: String,
        /// Save the result to the local library
        #[arg(long)]
        save: bool,
        /// On a team-name conflict, merge into the existing roster instead of failing
        #[arg(long)]
        merge: bool,
    },
    /// List saved rosters
    List,
    /// Show one saved roster in full
    Show { team: String },
    /// Extract a historical season and merge its athletes into a saved roster
    MergeSeason {
        team: String,
        /// Season label, e.g. "2019"
        season: String,
    },
    /// Add one athlete to a saved roster
    Add {
        team: String,
        name: String,
        #[arg(default_value = "Unknown")]
        position: String,
    },
    /// Remove one athlete from a saved roster (matched case-insensitively)
    Remove { team: String, name: String },
    /// Rename a saved roster
    Rename { team: String, new_name: String },
    /// Delete a saved roster
    Delete { team: String },
    /// Export a saved roster as CSV
    Export {
        team: String,
        /// Output path (default: <Team_Name>_roster.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Generate search aliases for a saved roster's athletes
    Tags { team: String },
    /// Show recent activity
    Log {
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Library statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Extract { query, save, merge } => cmd_extract(&query, save, merge).await,
        Commands::List => cmd_list(),
        Commands::Show { team } => {
            let conn = open_db()?;
            let saved = require_roster(&conn, &team)?;
            print_record(&saved.record);
            println!("\nCreated: {} | Updated: {}", saved.created_at, saved.updated_at);
            Ok(())
        }
        Commands::MergeSeason { team, season } => cmd_merge_season(&team, &season).await,
        Commands::Add {
            team,
            name,
            position,
        } => cmd_add(&team, &name, &position),
        Commands::Remove { team, name } => cmd_remove(&team, &name),
        Commands::Rename { team, new_name } => {
            let conn = open_db()?;
            let saved = require_roster(&conn, &team)?;
            db::rename_roster(&conn, saved.id, &new_name)?;
            db::log_activity(
                &conn,
                "Modification",
                &format!("Renamed \"{}\" to \"{}\"", saved.team_name, new_name),
                "OK",
            )?;
            println!("Renamed \"{}\" to \"{}\"", saved.team_name, new_name);
            Ok(())
        }
        Commands::Delete { team } => {
            let conn = open_db()?;
            let saved = require_roster(&conn, &team)?;
            db::delete_roster(&conn, saved.id)?;
            db::log_activity(
                &conn,
                "Deletion",
                &format!("Deleted: {}", saved.team_name),
                "OK",
            )?;
            println!("Deleted \"{}\"", saved.team_name);
            Ok(())
        }
        Commands::Export { team, output } => cmd_export(&team, output),
        Commands::Tags { team } => cmd_tags(&team).await,
        Commands::Log { limit } => {
            let conn = open_db()?;
            let rows = db::fetch_activity(&conn, limit)?;
            if rows.is_empty() {
                println!("No activity yet.");
                return Ok(());
            }
            for r in rows {
                println!("{} | {:<12} | {:<4} | {}", r.created_at, r.action, r.status, r.details);
            }
            Ok(())
        }
        Commands::Stats => {
            let conn = open_db()?;
            let s = db::get_stats(&conn)?;
            println!("Rosters:    {}", s.rosters);
            println!("Athletes:   {}", s.athletes);
            println!("Activities: {}", s.activities);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {:.1}s", elapsed.as_secs_f64());
    }

    result
}

fn open_db() -> anyhow::Result<Connection> {
    let conn = db::connect()?;
    db::init_schema(&conn)?;
    Ok(conn)
}

fn api_key() -> anyhow::Result<String> {
    let key = std::env::var("GEMINI_API_KEY")
        .context("GEMINI_API_KEY environment variable must be set")?;
    if key.trim().is_empty() {
        return Err(anyhow!("GEMINI_API_KEY is set but empty"));
    }
    Ok(key)
}

fn require_roster(conn: &Connection, team: &str) -> anyhow::Result<SavedRoster> {
    db::find_by_team(conn, team)?
        .ok_or_else(|| anyhow!("No saved roster for \"{}\". Run 'list' to see the library.", team))
}

async fn cmd_extract(query: &str, save: bool, merge: bool) -> anyhow::Result<()> {
    let providers = GeminiProvider::default_registry(&api_key()?);
    let record = orchestrator::extract_roster(&providers, query).await?;
    print_record(&record);

    if !save {
        return Ok(());
    }

    let conn = open_db()?;
    match db::find_by_team(&conn, &record.team_name)? {
        None => {
            db::insert_roster(&conn, &record)?;
            db::log_activity(
                &conn,
                "Extraction",
                &format!("Saved: {} - {} players", record.team_name, record.players.len()),
                "OK",
            )?;
            println!("\nSaved \"{}\" to the library.", record.team_name);
        }
        Some(existing) if merge => {
            let merged = reconciler::merge_records(&existing.record, &record);
            db::update_roster(&conn, existing.id, &merged)?;
            db::log_activity(
                &conn,
                "Modification",
                &format!("Merged new extraction into \"{}\"", existing.team_name),
                "OK",
            )?;
            println!(
                "\nMerged into existing \"{}\" ({} players).",
                existing.team_name,
                merged.players.len()
            );
        }
        Some(existing) => {
            return Err(anyhow!(
                "A roster named \"{}\" already exists. Re-run with --merge to combine them.",
                existing.team_name
            ));
        }
    }
    Ok(())
}

async fn cmd_merge_season(team: &str, season: &str) -> anyhow::Result<()> {
    let conn = open_db()?;
    let saved = require_roster(&conn, team)?;

    let providers = GeminiProvider::default_registry(&api_key()?);
    let query = format!("{} {}", saved.team_name, season);
    info!("Extracting historical season: {}", query);
    let extracted = orchestrator::extract_roster(&providers, &query).await?;

    let merged = reconciler::merge_season(
        &saved.record,
        &extracted.players,
        &extracted.verified_sources,
        season,
    );
    db::update_roster(&conn, saved.id, &merged)?;
    db::log_activity(
        &conn,
        "Modification",
        &format!(
            "Merged {} identities from the {} season into \"{}\"",
            extracted.players.len(),
            season,
            saved.team_name
        ),
        "OK",
    )?;

    print_record(&merged);
    println!(
        "\nMerged {} identities from the {} season into \"{}\".",
        extracted.players.len(),
        season,
        saved.team_name
    );
    Ok(())
}

fn cmd_add(team: &str, name: &str, position: &str) -> anyhow::Result<()> {
    let conn = open_db()?;
    let saved = require_roster(&conn, team)?;

    let mut players = saved.record.players.clone();
    players.push(Athlete {
        name: name.trim().to_string(),
        position: position.trim().to_string(),
    });
    let updated = saved.record.with_players(players);
    db::update_roster(&conn, saved.id, &updated)?;
    db::log_activity(
        &conn,
        "Modification",
        &format!("Added {} to \"{}\"", name, saved.team_name),
        "OK",
    )?;
    println!("Added \"{}\" ({} players now).", name, updated.players.len());
    Ok(())
}

fn cmd_remove(team: &str, name: &str) -> anyhow::Result<()> {
    let conn = open_db()?;
    let saved = require_roster(&conn, team)?;

    let key = schema::identity_key(name);
    let players: Vec<Athlete> = saved
        .record
        .players
        .iter()
        .filter(|p| p.identity_key() != key)
        .cloned()
        .collect();
    if players.len() == saved.record.players.len() {
        return Err(anyhow!("No athlete named \"{}\" on \"{}\".", name, saved.team_name));
    }

    let updated = saved.record.with_players(players);
    db::update_roster(&conn, saved.id, &updated)?;
    db::log_activity(
        &conn,
        "Modification",
        &format!("Removed {} from \"{}\"", name, saved.team_name),
        "OK",
    )?;
    println!("Removed \"{}\" ({} players now).", name, updated.players.len());
    Ok(())
}

fn cmd_list() -> anyhow::Result<()> {
    let conn = open_db()?;
    let rosters = db::list_rosters(&conn)?;
    if rosters.is_empty() {
        println!("No saved rosters. Run 'extract <query> --save' first.");
        return Ok(());
    }

    println!("{:<28} | {:<16} | {:>7} | {:<19}", "Team", "Sport", "Players", "Updated");
    println!("{}", "-".repeat(80));
    for r in rosters {
        println!(
            "{:<28} | {:<16} | {:>7} | {:<19}",
            truncate(&r.team_name, 28),
            truncate(&r.sport, 16),
            r.player_count,
            r.updated_at
        );
    }
    Ok(())
}

fn cmd_export(team: &str, output: Option<PathBuf>) -> anyhow::Result<()> {
    let conn = open_db()?;
    let saved = require_roster(&conn, team)?;

    let path = output.unwrap_or_else(|| PathBuf::from(export::default_filename(&saved.team_name)));
    export::write_csv(&saved.record, &path)?;
    db::log_activity(
        &conn,
        "Export",
        &format!("Exported \"{}\" to {}", saved.team_name, path.display()),
        "OK",
    )?;
    println!(
        "Exported {} players to {}",
        saved.record.players.len(),
        path.display()
    );
    Ok(())
}

async fn cmd_tags(team: &str) -> anyhow::Result<()> {
    let conn = open_db()?;
    let saved = require_roster(&conn, team)?;
    if saved.record.players.is_empty() {
        println!("\"{}\" has no athletes to tag.", saved.team_name);
        return Ok(());
    }

    let providers = GeminiProvider::default_registry(&api_key()?);
    let names: Vec<String> = saved.record.players.iter().map(|p| p.name.clone()).collect();
    let tags = orchestrator::generate_player_tags(
        &providers,
        &names,
        Some(&saved.team_name),
        Some(&saved.sport),
    )
    .await?;

    if tags.is_empty() {
        println!("Provider returned no usable tags.");
        return Ok(());
    }
    for (name, aliases) in &tags {
        println!("{}: {}", name, aliases.join(", "));
    }
    db::log_activity(
        &conn,
        "Tags",
        &format!("Generated tags for {} athletes of \"{}\"", tags.len(), saved.team_name),
        "OK",
    )?;
    Ok(())
}

fn print_record(record: &RosterRecord) {
    println!("{} — {}", record.team_name, record.sport);
    println!("{}", "-".repeat(60));
    if record.players.is_empty() {
        println!("(no athletes extracted)");
    } else {
        println!("{:>3} | {:<30} | {:<16}", "#", "Name", "Position");
        for (i, p) in record.players.iter().enumerate() {
            println!(
                "{:>3} | {:<30} | {:<16}",
                i + 1,
                truncate(&p.name, 30),
                truncate(&p.position, 16)
            );
        }
    }

    if !record.verified_sources.is_empty() {
        println!("\nSources:");
        for url in &record.verified_sources {
            println!("  {}", url);
        }
    }
    println!("\nNotes: {}", record.verification_notes);

    if let Some(meta) = &record.meta {
        println!(
            "Provider: {} ({}ms, {} tokens)",
            meta.provider, meta.latency_ms, meta.total_tokens
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}
