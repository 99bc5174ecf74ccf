//! CLI argument definitions and command handlers.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;

use clinicdesk_core::audit::{AuditAction, AuditFilter, AuditType, ExportFormat};
use clinicdesk_core::utils::{age_display, truncate_string};
use clinicdesk_core::{AppContext, Config};

/// Width of the details column in `audit list`
const DETAILS_WIDTH: usize = 60;

#[derive(Parser)]
#[command(name = "clinicdesk")]
#[command(author, version, about = "Clinic admin tools that keep working offline")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Also write logs to a daily-rolling file in the data directory
    #[arg(long, global = true)]
    pub log_file: bool,

    /// Data directory (default: the user cache directory)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Backend state, preferences and cache summary
    Status,

    /// Fetch inventory and appointments and refresh the local cache
    Sync,

    /// Local cache management
    #[command(subcommand)]
    Cache(CacheCommands),

    /// Audit journal
    #[command(subcommand)]
    Audit(AuditCommands),

    /// User preferences
    #[command(subcommand)]
    Prefs(PrefsCommands),

    /// Inventory records
    #[command(subcommand)]
    Inventory(InventoryCommands),

    /// Start a time entry for an employee
    ClockIn {
        employee_id: String,
    },

    /// Close the newest open time entry
    ClockOut {
        /// Only consider entries for this employee
        employee_id: Option<String>,
    },

    /// Ask the backend to test a database connection
    TestConnection {
        /// Connection type, e.g. mongodb or sqlite
        kind: String,
    },

    /// Act as this user from now on (saved to the config file)
    Login {
        email: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        role: Option<String>,
    },

    /// Forget the saved user
    Logout,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Item counts and sync age per collection
    Status,
    /// Remove all cached data
    Clear,
}

#[derive(Subcommand, Debug)]
pub enum AuditCommands {
    /// Show journal entries, newest first
    List(AuditListArgs),
    /// Write matching entries to a file
    Export(AuditExportArgs),
    /// Remove entries older than the retention period
    Prune {
        /// Retention in days (default: from config)
        #[arg(long, value_parser = clap::value_parser!(i64).range(0..))]
        days: Option<i64>,
    },
}

#[derive(clap::Args, Debug, Default)]
pub struct AuditFilterArgs {
    /// Entry type (patient, employee, inventory, user, system)
    #[arg(long = "type", short = 't')]
    pub entry_type: Option<AuditType>,

    /// Action (create, update, delete, login, logout, access, export, import)
    #[arg(long, short = 'a')]
    pub action: Option<AuditAction>,

    /// User id
    #[arg(long, short = 'u')]
    pub user: Option<String>,

    /// First day to include (YYYY-MM-DD)
    #[arg(long)]
    pub since: Option<NaiveDate>,

    /// Last day to include (YYYY-MM-DD)
    #[arg(long)]
    pub until: Option<NaiveDate>,
}

impl AuditFilterArgs {
    fn to_filter(&self) -> AuditFilter {
        let mut filter = AuditFilter::new();
        if let Some(t) = self.entry_type {
            filter = filter.entry_type(t);
        }
        if let Some(a) = self.action {
            filter = filter.action(a);
        }
        if let Some(ref user) = self.user {
            filter = filter.user_id(user.clone());
        }
        let start = self
            .since
            .map(|d| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN)));
        let end = self
            .until
            .and_then(|d| d.and_hms_milli_opt(23, 59, 59, 999))
            .map(|dt| Utc.from_utc_datetime(&dt));
        filter.between(start, end)
    }
}

#[derive(clap::Args, Debug)]
pub struct AuditListArgs {
    #[command(flatten)]
    pub filter: AuditFilterArgs,

    /// Maximum number of entries to show
    #[arg(long, short = 'n', default_value_t = 50)]
    pub limit: usize,
}

#[derive(clap::Args, Debug)]
pub struct AuditExportArgs {
    #[command(flatten)]
    pub filter: AuditFilterArgs,

    /// json or csv
    #[arg(long, short = 'f', default_value = "json")]
    pub format: ExportFormat,

    /// Directory to write the export into
    #[arg(long, short = 'o', default_value = ".")]
    pub out: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum PrefsCommands {
    /// Print current preferences
    Show,
    /// Set one preference; VALUE is parsed as JSON when possible
    Set { key: String, value: String },
    /// Restore defaults
    Reset,
}

#[derive(Subcommand, Debug)]
pub enum InventoryCommands {
    /// Create an inventory item
    Add {
        name: String,
        #[arg(long, short = 'c')]
        category: Option<String>,
        #[arg(long, short = 'q', default_value_t = 0)]
        quantity: i64,
    },
}

/// Preference values arrive as text; `true`, `25` or `"x"` become JSON.
pub fn parse_pref_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Write the user to the config file. The file is reloaded so that
/// environment overrides are not persisted.
fn save_user(email: Option<&str>, name: Option<&str>, role: Option<&str>) -> Result<()> {
    let path = Config::config_path()?;
    let mut stored = Config::load_from(&path)?;
    stored.set_user(email, name, role);
    stored.save().context("Failed to save config")
}

pub async fn run(ctx: &mut AppContext, command: Commands, json: bool) -> Result<()> {
    match command {
        Commands::Status => status(ctx, json).await,
        Commands::Sync => {
            let report = ctx.sync_all().await?;
            if json {
                return print_json(&report);
            }
            println!(
                "Synced {} inventory items and {} appointments ({} backend)",
                report.inventory_count, report.appointment_count, report.backend
            );
            print_attention(&report.reorder_needed, report.cancelled_appointments);
            Ok(())
        }
        Commands::Cache(cmd) => cache(ctx, cmd, json).await,
        Commands::Audit(cmd) => audit(ctx, cmd, json),
        Commands::Prefs(cmd) => prefs(ctx, cmd, json),
        Commands::Inventory(InventoryCommands::Add {
            name,
            category,
            quantity,
        }) => {
            let item = ctx
                .add_inventory_item(&name, category.as_deref(), quantity)
                .await?;
            if json {
                return print_json(&item);
            }
            println!("Added {} (id {}, quantity {})", item.name, item.id, item.quantity);
            Ok(())
        }
        Commands::ClockIn { employee_id } => {
            let entry = ctx.clock_in(&employee_id).await?;
            if json {
                return print_json(&entry);
            }
            println!(
                "Clocked in {} at {}",
                entry.employee_id,
                entry.clock_in.format("%Y-%m-%d %H:%M")
            );
            Ok(())
        }
        Commands::ClockOut { employee_id } => {
            let entry = ctx.clock_out(employee_id.as_deref()).await?;
            if json {
                return print_json(&entry);
            }
            println!(
                "Clocked out {} after {:.2} hours",
                entry.employee_id,
                entry.worked_hours(Utc::now())
            );
            Ok(())
        }
        Commands::TestConnection { kind } => {
            let result = ctx
                .api
                .test_connection(&kind)
                .await
                .with_context(|| format!("Connection test for {} failed", kind))?;
            if json {
                return print_json(&result);
            }
            let mark = if result.success { "ok" } else { "FAILED" };
            println!("{}: {}", mark, result.message);
            Ok(())
        }
        Commands::Login { email, name, role } => {
            save_user(Some(&email), name.as_deref(), role.as_deref())?;
            let actor = ctx.sign_in(&email, name.as_deref(), role.as_deref());
            if json {
                return print_json(&actor);
            }
            println!("Signed in as {} ({})", actor.name, actor.role);
            Ok(())
        }
        Commands::Logout => {
            save_user(None, None, None)?;
            match ctx.sign_out() {
                Some(actor) => println!("Signed out {}", actor.name),
                None => println!("Nobody was signed in"),
            }
            Ok(())
        }
    }
}

async fn status(ctx: &AppContext, json: bool) -> Result<()> {
    let report = ctx.status().await;
    if json {
        return print_json(&report);
    }
    println!("Backend:     {}", report.backend);
    println!("Database:    {}", report.database_status);
    println!("Preferences: {}", report.preferences_key);
    println!("Audit:       {} entries", report.audit.total);
    print_cache_status(&report.cache);
    print_attention(&report.reorder_needed, report.cancelled_appointments);
    Ok(())
}

fn print_attention(reorder_needed: &[String], cancelled: usize) {
    if !reorder_needed.is_empty() {
        println!(
            "Reorder:     {}",
            truncate_string(&reorder_needed.join(", "), DETAILS_WIDTH)
        );
    }
    if cancelled > 0 {
        println!("Cancelled:   {} appointments", cancelled);
    }
}

fn print_cache_status(statuses: &[clinicdesk_core::cache::CollectionStatus]) {
    let now = Utc::now();
    for status in statuses {
        let synced = status
            .last_synced
            .map(|t| age_display(t, now))
            .unwrap_or_else(|| "never".to_string());
        let stale = if status.stale { " (stale)" } else { "" };
        println!(
            "  {:<14} {:>5} items, synced {}{}",
            status.collection.to_string(),
            status.item_count,
            synced,
            stale
        );
    }
}

async fn cache(ctx: &AppContext, cmd: CacheCommands, json: bool) -> Result<()> {
    match cmd {
        CacheCommands::Status => {
            let statuses = ctx.cache.status(ctx.config().cache_stale_minutes).await;
            if json {
                return print_json(&statuses);
            }
            print_cache_status(&statuses);
        }
        CacheCommands::Clear => {
            if !ctx.cache.clear_all().await {
                anyhow::bail!("Failed to clear the cache");
            }
            println!("Cache cleared");
        }
    }
    Ok(())
}

fn audit(ctx: &AppContext, cmd: AuditCommands, json: bool) -> Result<()> {
    match cmd {
        AuditCommands::List(args) => {
            let mut entries = ctx.audit.query(&args.filter.to_filter());
            entries.truncate(args.limit);
            if json {
                return print_json(&entries);
            }
            if entries.is_empty() {
                println!("No audit entries");
            }
            for entry in entries {
                let entity = entry
                    .entity_name
                    .or(entry.entity_id)
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}  {:<9} {:<7} {:<16} {:<20} {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.entry_type.to_string(),
                    entry.action.to_string(),
                    truncate_string(&entry.user_name, 16),
                    truncate_string(&entity, 20),
                    truncate_string(&entry.details.to_string(), DETAILS_WIDTH),
                );
            }
        }
        AuditCommands::Export(args) => {
            let export = ctx
                .audit
                .export(&args.filter.to_filter(), args.format)
                .context("Failed to export audit log")?;
            std::fs::create_dir_all(&args.out)
                .with_context(|| format!("Failed to create {}", args.out.display()))?;
            let path = args.out.join(&export.file_name);
            std::fs::write(&path, &export.content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Exported {} entries to {}", export.record_count, path.display());
        }
        AuditCommands::Prune { days } => {
            let days = days.unwrap_or(ctx.config().audit_retention_days);
            let removed = ctx.prune_audit(days)?;
            println!("Removed {} entries older than {} days", removed, days);
        }
    }
    Ok(())
}

fn prefs(ctx: &AppContext, cmd: PrefsCommands, json: bool) -> Result<()> {
    match cmd {
        PrefsCommands::Show => {
            let values = ctx.preferences.values();
            if json {
                return print_json(&values);
            }
            for (key, value) in &values {
                println!("{:<18} {}", key, value);
            }
            println!("{:<18} {}", "(database)", ctx.preferences.database_status());
        }
        PrefsCommands::Set { key, value } => {
            ctx.preferences
                .update(&key, parse_pref_value(&value))
                .with_context(|| format!("Failed to save preference {}", key))?;
            println!("{} = {}", key, ctx.preferences.get(&key).unwrap_or(Value::Null));
        }
        PrefsCommands::Reset => {
            ctx.preferences
                .reset()
                .context("Failed to reset preferences")?;
            println!("Preferences reset to defaults");
        }
    }
    Ok(())
}
