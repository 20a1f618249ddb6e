//! Thin CLI surface (spec §6 "CLI surface"), explicitly illustrative and
//! out-of-core: the graph-DSL/SQL-planner layer this would front for a real
//! client is out of scope, so this binary just exercises the library's
//! open/create/verify-ledger entry points and maps their outcomes onto the
//! spec's exit codes.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use sharc::config::OpenOptions;
use sharc::pager::Database;
use sharc::trust::{AgentRegistry, AuditManager, Ledger};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

#[derive(Parser)]
#[command(name = "sharc", about = "Embedded vector/graph database (illustrative CLI)")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open an existing database file and report its header.
    Open { file: PathBuf },
    /// Create a new database file at the given path.
    Create { file: PathBuf },
    /// Verify the hash chain of a ledger exported alongside a database file.
    ///
    /// Looks for `<file>.ledger.json` and `<file>.agents.json` next to
    /// `file`, containing a `Ledger` and `AgentRegistry` serialized as JSON.
    VerifyLedger { file: PathBuf },
}

/// Exit codes per spec §6: 0 = OK, 1 = integrity failure, 2 = I/O error,
/// 3 = usage error.
const EXIT_OK: u8 = 0;
const EXIT_INTEGRITY_FAILURE: u8 = 1;
const EXIT_IO_ERROR: u8 = 2;
const EXIT_USAGE_ERROR: u8 = 3;

fn main() -> ExitCode {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .compact()
        .with_env_filter(
            EnvFilter::builder().with_default_directive(LevelFilter::INFO.into()).from_env_lossy(),
        )
        .without_time()
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let cli = Cli::parse();
    let code = match cli.command {
        Command::Open { file } => run_open(&file),
        Command::Create { file } => run_create(&file),
        Command::VerifyLedger { file } => run_verify_ledger(&file),
    };
    ExitCode::from(code)
}

fn run_open(file: &Path) -> u8 {
    match Database::open(file, &OpenOptions::read_write()) {
        Ok(db) => {
            tracing::info!(page_size = db.page_size(), schema_cookie = db.schema_cookie(), "opened database");
            EXIT_OK
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to open database");
            EXIT_IO_ERROR
        }
    }
}

fn run_create(file: &Path) -> u8 {
    if file.exists() {
        eprintln!("refusing to overwrite existing file: {}", file.display());
        return EXIT_USAGE_ERROR;
    }
    match Database::open(file, &OpenOptions::create_new()) {
        Ok(db) => {
            tracing::info!(page_size = db.page_size(), "created database");
            EXIT_OK
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to create database");
            EXIT_IO_ERROR
        }
    }
}

fn run_verify_ledger(file: &Path) -> u8 {
    let ledger_path = sidecar_path(file, "ledger.json");
    let agents_path = sidecar_path(file, "agents.json");

    let ledger_json = match std::fs::read_to_string(&ledger_path) {
        Ok(s) => s,
        Err(err) => {
            eprintln!("cannot read {}: {err}", ledger_path.display());
            return EXIT_IO_ERROR;
        }
    };
    let agents_json = match std::fs::read_to_string(&agents_path) {
        Ok(s) => s,
        Err(err) => {
            eprintln!("cannot read {}: {err}", agents_path.display());
            return EXIT_IO_ERROR;
        }
    };

    let ledger: Ledger = match serde_json::from_str(&ledger_json) {
        Ok(l) => l,
        Err(err) => {
            eprintln!("malformed ledger file {}: {err}", ledger_path.display());
            return EXIT_USAGE_ERROR;
        }
    };
    let registry: AgentRegistry = match serde_json::from_str(&agents_json) {
        Ok(r) => r,
        Err(err) => {
            eprintln!("malformed agent registry file {}: {err}", agents_path.display());
            return EXIT_USAGE_ERROR;
        }
    };

    let audit_path = sidecar_path(file, "audit.json");
    let mut audit = match std::fs::read_to_string(&audit_path) {
        Ok(s) => match serde_json::from_str(&s) {
            Ok(a) => a,
            Err(err) => {
                eprintln!("malformed audit log {}: {err}", audit_path.display());
                return EXIT_USAGE_ERROR;
            }
        },
        Err(_) => AuditManager::new(),
    };

    let code = match ledger.verify_integrity(&registry, &mut audit) {
        Ok(()) => {
            tracing::info!(entries = ledger.entries().len(), "ledger chain verified");
            EXIT_OK
        }
        Err(err) => {
            eprintln!("ledger integrity check failed: {err}");
            EXIT_INTEGRITY_FAILURE
        }
    };

    if let Ok(json) = serde_json::to_string_pretty(&audit) {
        let _ = std::fs::write(&audit_path, json);
    }
    code
}

fn sidecar_path(file: &Path, suffix: &str) -> PathBuf {
    let mut name = file.file_name().and_then(|n| n.to_str()).unwrap_or("db").to_string();
    name.push('.');
    name.push_str(suffix);
    file.with_file_name(name)
}
