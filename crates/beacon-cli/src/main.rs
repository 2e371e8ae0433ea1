use std::path::PathBuf;

use anyhow::Result;
use beacon_schemas::SubjectId;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "beacon")]
#[command(about = "Beacon presence engine operator CLI", long_about = None)]
struct Cli {
    /// Layered config paths in merge order. Default: BEACON_CONFIG, else built-in defaults.
    #[arg(long = "config", global = true)]
    config_paths: Vec<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> site -> local...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Validate config: typed view, secret literals, unused keys
    ConfigCheck {
        /// Fail on unused keys instead of warning
        #[arg(long, default_value_t = false)]
        strict: bool,
    },

    /// Daily offline sweep
    Sweep {
        #[command(subcommand)]
        cmd: SweepCmd,
    },

    /// Inspect the scan window without a store
    Gate {
        #[command(subcommand)]
        cmd: GateCmd,
    },

    /// Subject status (Postgres)
    Status {
        #[command(subcommand)]
        cmd: StatusCmd,
    },

    /// Audit trail utilities (Postgres)
    Audit {
        #[command(subcommand)]
        cmd: AuditCmd,
    },

    /// Unregistered-scan snapshot file
    Buffer {
        #[command(subcommand)]
        cmd: BufferCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply SQL migrations
    Migrate,
}

#[derive(Subcommand)]
enum SweepCmd {
    /// Print the next scheduled sweep instant
    Next {
        /// Evaluate relative to this RFC 3339 instant instead of now
        #[arg(long)]
        now: Option<String>,
    },

    /// Run the sweep immediately
    Run {
        /// Acknowledge that every non-Offline subject goes Offline
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum GateCmd {
    /// Would a presence-asserting change be allowed?
    Check {
        /// RFC 3339 time of the last registered scan; omit for "never scanned"
        #[arg(long)]
        last_scan: Option<String>,

        /// Evaluate at this RFC 3339 instant instead of now
        #[arg(long)]
        now: Option<String>,
    },
}

#[derive(Subcommand)]
enum StatusCmd {
    /// Print current status + scan validity
    Show {
        #[arg(long)]
        subject_id: SubjectId,
    },

    /// Ungated operator write
    Set {
        #[arg(long)]
        subject_id: SubjectId,

        /// Available | Busy | Offline
        #[arg(long)]
        status: String,
    },
}

#[derive(Subcommand)]
enum AuditCmd {
    /// Most recent entries, newest first
    Tail {
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Subcommand)]
enum BufferCmd {
    /// Print the snapshot
    Show {
        /// Snapshot file; default from config
        #[arg(long)]
        path: Option<PathBuf>,

        /// Print raw JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Empty the snapshot
    Clear {
        #[arg(long)]
        path: Option<PathBuf>,

        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");

    // Logs go to stderr; stdout carries key=value output only.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = beacon_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = beacon_db::status(&pool).await?;
                    println!("db_ok={} has_subjects_table={}", s.ok, s.has_subjects_table);
                }
                DbCmd::Migrate => {
                    beacon_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let loaded = commands::load_config(&paths)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::ConfigCheck { strict } => {
            let loaded = commands::load_config(&cli.config_paths)?;
            let unused = commands::check_unused(&loaded, strict)?;
            let cfg = loaded.typed()?;
            println!("config_ok=true");
            println!("config_hash={}", loaded.config_hash);
            println!("unused_keys={}", unused);
            println!("window_secs={}", cfg.gate.window_secs);
            println!(
                "sweep={:02}:{:02} {}",
                cfg.sweep.hour, cfg.sweep.minute, cfg.sweep.timezone
            );
        }

        Commands::Sweep { cmd } => {
            let cfg = commands::load_typed(&cli.config_paths)?;
            match cmd {
                SweepCmd::Next { now } => commands::ops::sweep_next(&cfg, now.as_deref())?,
                SweepCmd::Run { yes } => commands::ops::sweep_run(&cfg, yes).await?,
            }
        }

        Commands::Gate { cmd } => {
            let cfg = commands::load_typed(&cli.config_paths)?;
            match cmd {
                GateCmd::Check { last_scan, now } => {
                    commands::ops::gate_check(&cfg, last_scan.as_deref(), now.as_deref())?
                }
            }
        }

        Commands::Status { cmd } => {
            let cfg = commands::load_typed(&cli.config_paths)?;
            match cmd {
                StatusCmd::Show { subject_id } => {
                    commands::ops::status_show(&cfg, subject_id).await?
                }
                StatusCmd::Set { subject_id, status } => {
                    commands::ops::status_set(&cfg, subject_id, &status).await?
                }
            }
        }

        Commands::Audit { cmd } => {
            let cfg = commands::load_typed(&cli.config_paths)?;
            match cmd {
                AuditCmd::Tail { limit } => commands::ops::audit_tail(&cfg, limit).await?,
            }
        }

        Commands::Buffer { cmd } => {
            let cfg = commands::load_typed(&cli.config_paths)?;
            match cmd {
                BufferCmd::Show { path, json } => {
                    commands::buffer::buffer_show(&cfg, path, json).await?
                }
                BufferCmd::Clear { path, yes } => {
                    commands::buffer::buffer_clear(&cfg, path, yes).await?
                }
            }
        }
    }

    Ok(())
}
