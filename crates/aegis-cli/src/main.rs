//! Aegis CLI
//!
//! Offline filter list compilation, plus a file-backed engine for driving
//! the rule lifecycle from a shell.

mod compile;
mod state;

use std::path::{Path, PathBuf};

use clap::{ArgAction, Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use aegis_engine::{Configuration, FilterManager, NewFilterList, RebuildReport};

use crate::compile::{compile_lists, write_json};
use crate::state::{load_settings, open_manager};

#[derive(Parser)]
#[command(name = "aegis-cli")]
#[command(about = "Aegis filter list compiler and rule lifecycle tools")]
struct Cli {
    /// Engine settings JSON file
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StateArgs {
    /// Directory holding persisted state and installed rules
    #[arg(long, default_value = ".aegis")]
    state_dir: PathBuf,

    /// Directory built-in list sources are resolved against
    #[arg(long)]
    bundle_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile filter lists into declarative rules
    Compile {
        /// Input filter list files
        #[arg(short, long, required = true)]
        input: Vec<String>,

        /// Output rules file
        #[arg(short, long, default_value = "rules.json")]
        output: PathBuf,

        /// Also write the merged cosmetic selectors here
        #[arg(long)]
        cosmetics: Option<PathBuf>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Run a full rebuild against the state directory
    Rebuild {
        #[command(flatten)]
        state: StateArgs,

        /// Refetch every list, ignoring cached text
        #[arg(long)]
        force: bool,
    },

    /// Print the current options state
    Status {
        #[command(flatten)]
        state: StateArgs,
    },

    /// Subscribe to a remote filter list
    AddList {
        #[command(flatten)]
        state: StateArgs,

        url: String,

        #[arg(long)]
        title: Option<String>,
    },

    /// Remove a remote filter list
    RemoveList {
        #[command(flatten)]
        state: StateArgs,

        id: String,
    },

    /// Enable or disable a filter list
    ToggleList {
        #[command(flatten)]
        state: StateArgs,

        id: String,

        #[arg(action = ArgAction::Set)]
        enabled: bool,
    },

    /// Add a site to the allowlist, or remove it if already present
    ToggleSite {
        #[command(flatten)]
        state: StateArgs,

        host: String,
    },

    /// Turn blocking on or off
    SetEnabled {
        #[command(flatten)]
        state: StateArgs,

        #[arg(action = ArgAction::Set)]
        enabled: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("aegis_engine=info,aegis_cli=info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let settings = cli.settings.as_deref();

    let result = match cli.command {
        Commands::Compile {
            input,
            output,
            cosmetics,
            verbose,
        } => cmd_compile(&input, &output, cosmetics.as_deref(), verbose),
        Commands::Rebuild { state, force } => cmd_rebuild(settings, state, force).await,
        Commands::Status { state } => cmd_status(settings, state).await,
        Commands::AddList { state, url, title } => cmd_add_list(settings, state, url, title).await,
        Commands::RemoveList { state, id } => cmd_remove_list(settings, state, &id).await,
        Commands::ToggleList { state, id, enabled } => cmd_toggle_list(settings, state, &id, enabled).await,
        Commands::ToggleSite { state, host } => cmd_toggle_site(settings, state, &host).await,
        Commands::SetEnabled { state, enabled } => cmd_set_enabled(settings, state, enabled).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn cmd_compile(inputs: &[String], output: &Path, cosmetics: Option<&Path>, verbose: bool) -> Result<(), String> {
    let compiled = compile_lists(inputs, verbose)?;
    write_json(output, &compiled.output.rules)?;
    if let Some(path) = cosmetics {
        write_json(path, &compiled.cosmetics)?;
    }

    let stats = &compiled.stats;
    println!("Compiled {} filter lists to '{}'", inputs.len(), output.display());
    println!("  Lines:     {} ({} skipped)", stats.lines, stats.skipped_lines);
    println!("  Rules:     {} from {} network entries", stats.rules, stats.network_entries);
    println!("  Dropped:   {} over budget, {} bad regex", stats.truncated, stats.regex_rejected);
    println!("  Cosmetic:  {} selectors", stats.cosmetic_selectors);
    println!("  Time:      {:.1}ms", stats.total_ms);

    Ok(())
}

async fn open(settings: Option<&Path>, state: StateArgs) -> Result<FilterManager, String> {
    let settings = load_settings(settings)?;
    let (manager, _) = open_manager(settings, &state.state_dir, state.bundle_dir).await?;
    Ok(manager)
}

fn print_report(report: &RebuildReport) {
    println!("Rebuild ({}) finished", report.scope);
    println!("  Network rules:   {}", report.compiled_rule_count);
    println!("  Allowlist rules: {}", report.allowlist_rule_count);
    println!("  Dropped:         {} over budget, {} bad regex", report.truncated, report.regex_rejected);
    println!("  Disabled:        {}", report.sentinel_installed);
    for outcome in &report.lists {
        match &outcome.result {
            Ok(stats) => println!(
                "  [{}] {} - {} network, {} cosmetic, {} skipped{}",
                outcome.list_id,
                outcome.title,
                stats.network_entries,
                stats.cosmetic_selectors,
                stats.skipped_lines,
                if stats.from_cache { " (cached)" } else { "" },
            ),
            Err(message) => println!("  [{}] {} - failed: {}", outcome.list_id, outcome.title, message),
        }
    }
}

fn print_lists(config: &Configuration) {
    for list in &config.filter_lists {
        println!(
            "  [{}] {} {}",
            list.id,
            if list.enabled { "on " } else { "off" },
            list.source
        );
    }
}

async fn cmd_rebuild(settings: Option<&Path>, state: StateArgs, force: bool) -> Result<(), String> {
    let manager = open(settings, state).await?;
    let report = manager.refresh_filters(force).await.map_err(|e| e.to_string())?;
    print_report(&report);
    Ok(())
}

async fn cmd_status(settings: Option<&Path>, state: StateArgs) -> Result<(), String> {
    let manager = open(settings, state).await?;
    let options = manager.options_state().await;
    let json = serde_json::to_string_pretty(&options).map_err(|e| e.to_string())?;
    println!("{json}");
    Ok(())
}

async fn cmd_add_list(settings: Option<&Path>, state: StateArgs, url: String, title: Option<String>) -> Result<(), String> {
    let manager = open(settings, state).await?;
    let config = manager
        .add_filter_list(NewFilterList { url, title })
        .await
        .map_err(|e| e.to_string())?;
    print_lists(&config);
    Ok(())
}

async fn cmd_remove_list(settings: Option<&Path>, state: StateArgs, id: &str) -> Result<(), String> {
    let manager = open(settings, state).await?;
    let config = manager.remove_filter_list(id).await.map_err(|e| e.to_string())?;
    print_lists(&config);
    Ok(())
}

async fn cmd_toggle_list(settings: Option<&Path>, state: StateArgs, id: &str, enabled: bool) -> Result<(), String> {
    let manager = open(settings, state).await?;
    let config = manager.toggle_filter_list(id, enabled).await.map_err(|e| e.to_string())?;
    print_lists(&config);
    Ok(())
}

async fn cmd_toggle_site(settings: Option<&Path>, state: StateArgs, host: &str) -> Result<(), String> {
    let manager = open(settings, state).await?;
    let config = manager.toggle_site(host).await.map_err(|e| e.to_string())?;
    match aegis_core::normalize_host(host) {
        Some(host) if config.allowlist.contains(&host) => println!("'{host}' is now allowlisted"),
        Some(host) => println!("'{host}' is no longer allowlisted"),
        None => return Err(format!("No hostname in '{host}'")),
    }
    Ok(())
}

async fn cmd_set_enabled(settings: Option<&Path>, state: StateArgs, enabled: bool) -> Result<(), String> {
    let manager = open(settings, state).await?;
    manager.set_enabled(enabled).await.map_err(|e| e.to_string())?;
    log::info!("blocking {}", if enabled { "enabled" } else { "disabled" });
    Ok(())
}
