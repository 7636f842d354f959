//! CLI argument definitions for the Helpline binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

/// Helpline: a customer-support assistant with FAQ retrieval and human escalation.
#[derive(Parser, Debug)]
#[command(name = "helpline", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory holding the SQLite database.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Chat with the assistant on stdin/stdout.
    Chat(ChatArgs),
    /// Manage the FAQ knowledge base.
    #[command(subcommand)]
    Faq(FaqCommand),
    /// Work the escalation queue.
    #[command(subcommand)]
    Escalations(EscalationCommand),
    /// Inspect and manage sessions.
    #[command(subcommand)]
    Sessions(SessionCommand),
    /// Write a default configuration file if none exists.
    Init,
}

#[derive(Args, Debug)]
pub struct ChatArgs {
    /// Continue an existing session.
    #[arg(long)]
    pub session: Option<Uuid>,
    /// User identifier recorded on a new session.
    #[arg(long)]
    pub user: Option<String>,
}

#[derive(Args, Debug)]
pub struct Page {
    #[arg(long, default_value_t = 0)]
    pub offset: u64,
    #[arg(long, default_value_t = 50)]
    pub limit: u64,
}

#[derive(Subcommand, Debug)]
pub enum FaqCommand {
    /// Import FAQs from a JSON array of {question, answer, category?}.
    Import {
        file: PathBuf,
        /// Delete existing FAQs first.
        #[arg(long)]
        replace: bool,
    },
    List {
        #[arg(long)]
        category: Option<String>,
        #[command(flatten)]
        page: Page,
    },
    Add {
        #[arg(long)]
        question: String,
        #[arg(long)]
        answer: String,
        #[arg(long)]
        category: Option<String>,
    },
    Update {
        id: i64,
        #[arg(long)]
        question: Option<String>,
        #[arg(long)]
        answer: Option<String>,
        #[arg(long)]
        category: Option<String>,
    },
    Delete { id: i64 },
    /// Embed any FAQs missing a vector from the current model.
    Sync {
        /// Drop every stored vector and embed all FAQs again.
        #[arg(long)]
        rebuild: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum EscalationCommand {
    List {
        /// pending, resolved or cancelled.
        #[arg(long)]
        status: Option<String>,
        #[command(flatten)]
        page: Page,
    },
    Resolve { id: Uuid },
    Cancel { id: Uuid },
}

#[derive(Subcommand, Debug)]
pub enum SessionCommand {
    List {
        /// active, escalated or closed.
        #[arg(long)]
        status: Option<String>,
        #[command(flatten)]
        page: Page,
    },
    History { id: Uuid },
    Close { id: Uuid },
    Summarize { id: Uuid },
    /// Delete a session with its turns and escalations.
    Delete { id: Uuid },
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > HELPLINE_CONFIG env var > ~/.helpline/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("HELPLINE_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the data directory path.
    ///
    /// Returns `None` if not overridden (use config value).
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    /// Resolve the log filter directive.
    ///
    /// Priority: RUST_LOG > --log-level flag > config file value.
    pub fn resolve_log_filter(&self, config_level: &str) -> String {
        if let Ok(filter) = std::env::var("RUST_LOG") {
            if !filter.is_empty() {
                return filter;
            }
        }
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".helpline").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".helpline").join("config.toml");
    }
    PathBuf::from("config.toml")
}
