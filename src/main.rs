//! haproxy-keeper - HAProxy configuration keeper
//!
//! Renders, validates and applies HAProxy configurations with automatic
//! backup and rollback, and drives HAProxy's admin socket.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use haproxy_keeper::apply::{ApplyOrchestrator, ApplyResult};
use haproxy_keeper::backup::BackupRegistry;
use haproxy_keeper::codec;
use haproxy_keeper::config::KeeperConfig;
use haproxy_keeper::error::{Error, Result};
use haproxy_keeper::topology::Topology;

/// haproxy-keeper - HAProxy configuration keeper
#[derive(Parser)]
#[command(name = "haproxy-keeper")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (built-in defaults when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "haproxy-keeper.toml")]
        output: PathBuf,
    },

    /// Validate the keeper configuration
    CheckConfig,

    /// Show the live HAProxy configuration as a topology
    Show {
        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Render a topology document (JSON or TOML) as HAProxy config text
    Render {
        /// Topology document
        topology: PathBuf,
    },

    /// Apply a topology document to the live config and restart HAProxy
    Apply {
        /// Topology document
        topology: PathBuf,

        /// Actor recorded on the backup
        #[arg(long, default_value = "cli")]
        actor: String,
    },

    /// List config backups, most recent first
    Backups,

    /// Check a backup against its recorded hash
    Verify {
        /// Backup id
        id: i64,
    },

    /// Restore a backup to the live config and restart HAProxy
    Restore {
        /// Backup id
        id: i64,

        /// Actor recorded on the safety backup
        #[arg(long, default_value = "cli")]
        actor: String,
    },

    /// Gracefully reload HAProxy
    Reload,

    /// Show runtime statistics from the admin socket
    Stats {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Enable a server (BACKEND/SERVER)
    Enable {
        target: String,
    },

    /// Disable a server (BACKEND/SERVER)
    Disable {
        target: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref());

    // Initialize logging
    let (level, format) = match &config {
        Ok(c) => (c.logging.level.clone(), c.logging.format.clone()),
        Err(_) => ("info".to_string(), "pretty".to_string()),
    };
    init_logging(cli.log_level.as_deref().unwrap_or(&level), &format);

    let result = match cli.command {
        Commands::Init { output } => run_init(output),
        Commands::CheckConfig => run_check_config(config),
        Commands::Show { json } => run_show(&config?, json),
        Commands::Render { topology } => run_render(&topology),
        Commands::Apply { topology, actor } => run_apply(&config?, &topology, &actor).await,
        Commands::Backups => run_backups(&config?).await,
        Commands::Verify { id } => run_verify(&config?, id).await,
        Commands::Restore { id, actor } => run_restore(&config?, id, &actor).await,
        Commands::Reload => run_reload(&config?).await,
        Commands::Stats { json } => run_stats(&config?, json).await,
        Commands::Enable { target } => run_toggle(&config?, &target, true).await,
        Commands::Disable { target } => run_toggle(&config?, &target, false).await,
    };

    if let Err(e) = &result {
        if e.is_socket_error() {
            eprintln!(
                "hint: HAProxy must be running with `stats socket <path> level admin` \
                 matching [admin] socket_path, and this user must be able to open it"
            );
        }
    }
    result
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "compact" {
        registry
            .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Load the config file (or defaults) and apply environment overrides
fn load_config(path: Option<&Path>) -> Result<KeeperConfig> {
    let mut config = match path {
        Some(path) => KeeperConfig::from_file(path)?,
        None => KeeperConfig::default(),
    };
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

fn load_topology(path: &Path) -> Result<Topology> {
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Topology::from_toml(&content),
        _ => Topology::from_json(&content),
    }
}

fn open_orchestrator(config: &KeeperConfig) -> Result<ApplyOrchestrator> {
    let registry = BackupRegistry::open(
        &config.backups.registry_path,
        config.haproxy.config_path.clone(),
    )?;

    Ok(ApplyOrchestrator::new(
        config.orchestrator_config(),
        Arc::new(registry),
        Arc::new(config.validator()),
        Arc::new(config.controller()),
    ))
}

/// Print an apply/restore result and fail the process if it failed
fn report(result: &ApplyResult) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(result)?);
    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

/// Write a starter configuration file
fn run_init(output: PathBuf) -> Result<()> {
    if output.exists() {
        return Err(Error::Config(format!(
            "{} already exists, refusing to overwrite",
            output.display()
        )));
    }

    let config_content = r#"# haproxy-keeper Configuration
# Generated configuration file

[haproxy]
config_path = "/etc/haproxy/haproxy.cfg"
binary = "haproxy"
service_name = "haproxy"
use_sudo = true
systemctl = "systemctl"

[admin]
socket_path = "/run/haproxy/admin.sock"
timeout_secs = 10

[apply]
restart_timeout_secs = 10
validate_timeout_secs = 30

[backups]
registry_path = "/var/lib/haproxy-keeper/backups.db"

[logging]
level = "info"
format = "pretty"
"#;

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("Then check it with: haproxy-keeper --config {} check-config", output.display());

    Ok(())
}

/// Validate configuration
fn run_check_config(config: Result<KeeperConfig>) -> Result<()> {
    match config {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  HAProxy config:  {}", config.haproxy.config_path.display());
            println!("  Admin socket:    {}", config.admin.socket_path.display());
            println!("  Backup registry: {}", config.backups.registry_path.display());
            println!("  Service:         {} (sudo: {})", config.haproxy.service_name, config.haproxy.use_sudo);
            println!("  Restart timeout: {}s", config.apply.restart_timeout_secs);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show the live config
fn run_show(config: &KeeperConfig, json: bool) -> Result<()> {
    let topology = codec::parse_file(&config.haproxy.config_path)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&topology)?);
        return Ok(());
    }

    println!("HAProxy Configuration ({})", config.haproxy.config_path.display());
    println!("=====================");
    println!();
    println!("Frontends:");
    for frontend in topology.frontends() {
        println!(
            "  {:<20} bind {:<24} -> {}{}",
            frontend.name,
            frontend.bind.as_ref().map(|b| b.to_string()).unwrap_or_else(|| "-".into()),
            frontend.default_backend.as_deref().unwrap_or("-"),
            if frontend.enabled { "" } else { "  (disabled)" }
        );
    }
    println!();
    println!("Backends:");
    for backend in topology.backends() {
        println!(
            "  {:<20} balance {}{}",
            backend.name,
            backend.balance,
            if backend.enabled { "" } else { "  (disabled)" }
        );
        for server in &backend.servers {
            println!("    {}", codec::server_line(server));
        }
    }
    if !topology.sections().is_empty() {
        println!();
        println!("Other sections:");
        for section in topology.sections() {
            println!("  {}", section.header);
        }
    }

    Ok(())
}

/// Render a topology document
fn run_render(path: &Path) -> Result<()> {
    let topology = load_topology(path)?;
    print!("{}", codec::serialize(&topology));
    Ok(())
}

/// Apply a topology document
async fn run_apply(config: &KeeperConfig, path: &Path, actor: &str) -> Result<()> {
    let topology = load_topology(path)?;
    let orchestrator = open_orchestrator(config)?;
    let result = orchestrator.apply(&topology, actor).await;
    report(&result)
}

/// List backups
async fn run_backups(config: &KeeperConfig) -> Result<()> {
    let orchestrator = open_orchestrator(config)?;
    let backups = orchestrator.list_backups().await?;

    if backups.is_empty() {
        println!("No backups");
        return Ok(());
    }

    println!("{:>5}  {:<26}  {:<12}  {:<16}  {}", "ID", "CREATED", "BY", "HASH", "DESCRIPTION");
    for backup in backups {
        println!(
            "{:>5}  {:<26}  {:<12}  {:<16}  {}",
            backup.id,
            backup.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            backup.created_by,
            &backup.hash[..backup.hash.len().min(16)],
            backup.description
        );
    }
    Ok(())
}

/// Verify a backup
async fn run_verify(config: &KeeperConfig, id: i64) -> Result<()> {
    let orchestrator = open_orchestrator(config)?;
    if orchestrator.verify_backup(id).await? {
        println!("✓ Backup {} is intact", id);
        Ok(())
    } else {
        eprintln!("✗ Backup {} is missing or does not match its recorded hash", id);
        std::process::exit(1);
    }
}

/// Restore a backup
async fn run_restore(config: &KeeperConfig, id: i64, actor: &str) -> Result<()> {
    let orchestrator = open_orchestrator(config)?;
    let result = orchestrator.restore_backup(id, actor).await;
    report(&result)
}

/// Reload HAProxy
async fn run_reload(config: &KeeperConfig) -> Result<()> {
    let orchestrator = open_orchestrator(config)?;
    orchestrator.reload().await?;
    println!("✓ HAProxy reloaded");
    Ok(())
}

/// Show runtime statistics
async fn run_stats(config: &KeeperConfig, json: bool) -> Result<()> {
    let stats = config.admin_client().fetch_stats().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("{:<20} {:<8} {:>8} {:>10} {:>14} {:>14}", "FRONTEND", "STATUS", "CUR", "TOTAL", "BYTES IN", "BYTES OUT");
    for f in &stats.frontends {
        println!(
            "{:<20} {:<8} {:>8} {:>10} {:>14} {:>14}",
            f.name, f.status, f.sessions_current, f.sessions_total, f.bytes_in, f.bytes_out
        );
    }
    println!();
    println!("{:<20} {:<8} {:>8} {:>10} {:>8} {:>8}", "BACKEND", "STATUS", "CUR", "TOTAL", "QUEUE", "ACTIVE");
    for b in &stats.backends {
        println!(
            "{:<20} {:<8} {:>8} {:>10} {:>8} {:>8}",
            b.name, b.status, b.sessions_current, b.sessions_total, b.queue_current, b.active_servers
        );
    }
    println!();
    println!("{:<32} {:<8} {:>6} {:>8} {:>10} {:<10}", "SERVER", "STATUS", "WEIGHT", "CUR", "TOTAL", "CHECK");
    for b in &stats.backends {
        for s in stats.servers_of(&b.name) {
            println!(
                "{:<32} {:<8} {:>6} {:>8} {:>10} {:<10}",
                format!("{}/{}", s.backend, s.name),
                s.status,
                s.weight,
                s.sessions_current,
                s.sessions_total,
                s.check_status
            );
        }
    }
    println!();
    println!(
        "Servers total: {} sessions ({} current), {} bytes in, {} bytes out",
        stats.summary.total_sessions,
        stats.summary.current_sessions,
        stats.summary.bytes_in,
        stats.summary.bytes_out
    );

    Ok(())
}

/// Enable or disable a server at runtime
async fn run_toggle(config: &KeeperConfig, target: &str, enable: bool) -> Result<()> {
    let (backend, server) = target
        .split_once('/')
        .ok_or_else(|| Error::InvalidArgument(format!("expected BACKEND/SERVER, got '{}'", target)))?;

    let result = config
        .admin_client()
        .toggle_server(backend, server, enable)
        .await?;

    if result.accepted {
        println!("✓ {}", result.command);
        Ok(())
    } else {
        eprintln!("✗ {}: {}", result.command, result.response);
        std::process::exit(1);
    }
}
