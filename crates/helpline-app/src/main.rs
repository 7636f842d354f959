//! Helpline application entry point.
//!
//! Opens the database, wires the FAQ index, generator and orchestrator
//! together, and dispatches the CLI subcommand.

mod cli;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use helpline_chat::{ChatError, ChatRequest, OpenAiCompatGenerator, SupportOrchestrator};
use helpline_core::config::{expand_home, HelplineConfig, RetrievalConfig};
use helpline_core::error::HelplineError;
use helpline_core::repository::SupportRepository;
use helpline_core::types::{EscalationStatus, FaqUpdate, NewFaq, Session, SessionStatus};
use helpline_storage::{Database, SqliteRepository};
use helpline_vector::{
    DynEmbeddingService, EmbeddingIndex, EmbeddingService, FaqKnowledgeBase, MockEmbedding,
    OnnxEmbeddingService,
};

use cli::{ChatArgs, CliArgs, Command, EscalationCommand, FaqCommand, SessionCommand};

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> AppResult<()> {
    let args = CliArgs::parse();

    // Config is read before the subscriber exists so its log level can apply.
    let config_path = args.resolve_config_path();
    let (mut config, config_error) = match HelplineConfig::load(&config_path) {
        Ok(config) => (config, None),
        Err(e) => (HelplineConfig::default(), Some(e)),
    };

    let filter = args.resolve_log_filter(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Helpline v{} starting", env!("CARGO_PKG_VERSION"));

    if let Some(e) = config_error {
        if !matches!(args.command, Command::Init) {
            warn!(
                "Failed to load config from {}: {}. Using defaults.",
                config_path.display(),
                e
            );
        }
    }

    if let Some(data_dir) = args.resolve_data_dir() {
        config.general.data_dir = data_dir;
    }

    if let Command::Init = args.command {
        return init_config(&config_path, &config);
    }

    let db_path = config.data_dir().join("helpline.db");
    let db = Arc::new(Database::new(&db_path)?);
    let repo = SqliteRepository::new(db);

    match args.command {
        Command::Chat(chat) => {
            let assistant = Assistant::build(&config, &repo)?;
            run_chat(&assistant, chat).await
        }
        Command::Faq(cmd) => run_faq(&config, &repo, cmd).await,
        Command::Escalations(cmd) => run_escalations(&repo, cmd),
        Command::Sessions(cmd) => run_sessions(&config, &repo, cmd).await,
        Command::Init => Ok(()),
    }
}

// =============================================================================
// Wiring
// =============================================================================

/// The pieces needed to answer messages and keep the FAQ index current.
struct Assistant {
    knowledge: FaqKnowledgeBase,
    orchestrator: SupportOrchestrator,
}

impl Assistant {
    fn build(config: &HelplineConfig, repo: &SqliteRepository) -> AppResult<Self> {
        let shared: Arc<dyn SupportRepository> = Arc::new(repo.clone());
        let index = Arc::new(EmbeddingIndex::new_dyn(build_embedder(&config.retrieval)));

        let generator = OpenAiCompatGenerator::from_config(&config.generation)?;
        if !generator.has_api_key() {
            warn!(
                "{} is not set; answers will fall back until it is",
                config.generation.api_key_env
            );
        }

        let orchestrator = SupportOrchestrator::new(
            Arc::clone(&shared),
            Arc::clone(&index),
            Arc::new(generator),
            config,
        );
        Ok(Self {
            knowledge: FaqKnowledgeBase::new(shared, index),
            orchestrator,
        })
    }

    /// Re-sync the index, logging instead of failing.
    async fn sync_quietly(&self) {
        match self.knowledge.sync().await {
            Ok(report) => info!(
                faq_count = report.total,
                embedded = report.embedded.len(),
                "FAQ index ready"
            ),
            Err(e) => warn!("FAQ sync failed, retrieval will be degraded: {}", e),
        }
    }
}

/// ONNX embedder when a model directory is configured, otherwise the mock.
fn build_embedder(retrieval: &RetrievalConfig) -> Arc<dyn DynEmbeddingService> {
    match retrieval.model_dir.as_deref() {
        Some(dir) => match OnnxEmbeddingService::from_directory(&expand_home(dir)) {
            Ok(service) => {
                let dimensions = EmbeddingService::dimensions(&service);
                if dimensions != retrieval.dimensions {
                    warn!(
                        model = dimensions,
                        configured = retrieval.dimensions,
                        "Embedding model dimensions differ from retrieval.dimensions"
                    );
                }
                return Arc::new(service);
            }
            Err(e) => warn!("Failed to load embedding model from {}: {}", dir, e),
        },
        None => warn!("retrieval.model_dir is not set"),
    }
    warn!("Using mock embeddings; FAQ retrieval will not be semantic");
    Arc::new(MockEmbedding::with_dimensions(retrieval.dimensions))
}

fn init_config(path: &Path, config: &HelplineConfig) -> AppResult<()> {
    if path.exists() {
        println!("Config already exists at {}", path.display());
        return Ok(());
    }
    config.save(path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

// =============================================================================
// Chat
// =============================================================================

async fn run_chat(assistant: &Assistant, args: ChatArgs) -> AppResult<()> {
    assistant.sync_quietly().await;

    let mut session_id = args.session;
    if let Some(id) = session_id {
        let turns = assistant.orchestrator.context().history(id)?;
        println!("Resuming session {} ({} turns)", id, turns.len());
    }

    println!("Type a message. /summary summarizes the conversation, /quit exits.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" => break,
            "/summary" => {
                match session_id {
                    Some(id) => {
                        println!("{}", assistant.orchestrator.summarize_session(id).await?)
                    }
                    None => println!("Nothing to summarize yet."),
                }
                continue;
            }
            _ => {}
        }

        let request = ChatRequest {
            session_id,
            user_id: args.user.clone(),
            message: line.to_string(),
        };
        match assistant.orchestrator.handle_message(request).await {
            Ok(reply) => {
                session_id = Some(reply.session_id);
                println!("{}", reply.message);
                if let Some(reason) = reply.escalation_reason {
                    println!("(escalated: {})", reason);
                }
            }
            Err(e @ (ChatError::EmptyMessage | ChatError::MessageTooLong(_))) => {
                println!("{}", e);
            }
            Err(e @ ChatError::SessionClosed(_)) => {
                println!("{}", e);
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

// =============================================================================
// FAQs
// =============================================================================

async fn run_faq(
    config: &HelplineConfig,
    repo: &SqliteRepository,
    cmd: FaqCommand,
) -> AppResult<()> {
    match cmd {
        FaqCommand::List { category, page } => {
            for faq in repo.list_faqs(category.as_deref(), page.offset, page.limit)? {
                println!(
                    "{:>5}  [{}]  {}",
                    faq.id,
                    faq.category.as_deref().unwrap_or("-"),
                    faq.question
                );
            }
            return Ok(());
        }
        FaqCommand::Import { file, replace } => {
            let content = std::fs::read_to_string(&file)?;
            let faqs: Vec<NewFaq> = serde_json::from_str(&content).map_err(HelplineError::from)?;
            let imported = repo.import_faqs(&faqs, replace)?;
            info!(count = imported.len(), replace, "FAQs imported");
            println!("Imported {} FAQs from {}", imported.len(), file.display());
        }
        FaqCommand::Add {
            question,
            answer,
            category,
        } => {
            let faq = repo.insert_faq(&NewFaq {
                question,
                answer,
                category,
            })?;
            println!("Added FAQ {}", faq.id);
        }
        FaqCommand::Update {
            id,
            question,
            answer,
            category,
        } => {
            let faq = repo.update_faq(
                id,
                &FaqUpdate {
                    question,
                    answer,
                    category,
                },
            )?;
            println!("Updated FAQ {}", faq.id);
        }
        FaqCommand::Delete { id } => {
            repo.delete_faq(id)?;
            println!("Deleted FAQ {}", id);
        }
        FaqCommand::Sync { rebuild } => {
            if rebuild {
                let cleared = repo.clear_faq_embeddings()?;
                info!(cleared, "Stored FAQ embeddings cleared for rebuild");
            }
        }
    }

    // Every mutation leaves stale or missing vectors behind.
    let assistant = Assistant::build(config, repo)?;
    let report = assistant.knowledge.sync().await?;
    println!(
        "FAQ index: {} entries, {} embedded, {} reused",
        report.total,
        report.embedded.len(),
        report.reused
    );
    Ok(())
}

// =============================================================================
// Escalations
// =============================================================================

fn run_escalations(repo: &SqliteRepository, cmd: EscalationCommand) -> AppResult<()> {
    match cmd {
        EscalationCommand::List { status, page } => {
            let status = status
                .as_deref()
                .map(str::parse::<EscalationStatus>)
                .transpose()?;
            for record in repo.list_escalations(status, page.offset, page.limit)? {
                println!(
                    "{}  {:<9}  {}  session {}  {}",
                    record.id,
                    record.status.as_str(),
                    record.created_at.format("%Y-%m-%d %H:%M"),
                    record.session_id,
                    record.reason
                );
            }
        }
        EscalationCommand::Resolve { id } => {
            let record = repo.resolve_escalation(id)?;
            println!("Escalation {} is now {}", record.id, record.status);
        }
        EscalationCommand::Cancel { id } => {
            let record = repo.cancel_escalation(id)?;
            println!("Escalation {} is now {}", record.id, record.status);
        }
    }
    Ok(())
}

// =============================================================================
// Sessions
// =============================================================================

async fn run_sessions(
    config: &HelplineConfig,
    repo: &SqliteRepository,
    cmd: SessionCommand,
) -> AppResult<()> {
    match cmd {
        SessionCommand::List { status, page } => {
            let status = status
                .as_deref()
                .map(str::parse::<SessionStatus>)
                .transpose()?;
            for session in repo.list_sessions(status, page.offset, page.limit)? {
                println!(
                    "{}  {:<9}  {}  {}",
                    session.id,
                    session.status.as_str(),
                    session.created_at.format("%Y-%m-%d %H:%M"),
                    session.user_id.as_deref().unwrap_or("-")
                );
            }
        }
        SessionCommand::History { id } => {
            let session = require_session(repo, id)?;
            if let Some(summary) = &session.summary {
                println!("Summary: {}\n", summary);
            }
            for turn in repo.all_turns(id)? {
                let confidence = turn
                    .confidence
                    .map(|c| format!(" ({:.2})", c))
                    .unwrap_or_default();
                println!(
                    "[{}] {}{}: {}",
                    turn.timestamp.format("%H:%M:%S"),
                    turn.role,
                    confidence,
                    turn.content
                );
            }
        }
        SessionCommand::Close { id } => {
            let session = repo.set_session_status(id, SessionStatus::Closed)?;
            println!("Session {} is now {}", session.id, session.status);
        }
        SessionCommand::Summarize { id } => {
            require_session(repo, id)?;
            let assistant = Assistant::build(config, repo)?;
            println!("{}", assistant.orchestrator.summarize_session(id).await?);
        }
        SessionCommand::Delete { id } => {
            repo.delete_session(id)?;
            println!("Deleted session {}", id);
        }
    }
    Ok(())
}

fn require_session(repo: &SqliteRepository, id: Uuid) -> Result<Session, HelplineError> {
    repo.get_session(id)?
        .ok_or(HelplineError::SessionNotFound(id))
}
