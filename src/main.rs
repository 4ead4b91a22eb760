//! dialograph — console entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Init logger once at the configured level (`RUST_LOG` wins when set)
//!   4. Open the entity catalog and conversation graph, seed the catalog
//!   5. Build the answering engine
//!   6. Run the console loop: each line is a turn, `:commands` inspect state

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use dialograph::config;
use dialograph::engine::providers;
use dialograph::error::AppError;
use dialograph::graph::{ConversationGraph, EntityCatalog};
use dialograph::logger;
use dialograph::service::ConversationService;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present — ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    let cfg = config::load()?;
    logger::parse_level(&cfg.log_level)?;
    logger::init(&cfg.log_level)?;

    info!(
        data_dir = %cfg.data_dir.display(),
        log_level = %cfg.log_level,
        provider = %cfg.engine.provider,
        "config loaded"
    );

    let catalog = EntityCatalog::open(&cfg.data_dir)?;
    if let Some(entities_file) = &cfg.entities_file {
        catalog.seed_from_file(entities_file)?;
    }
    let graph = ConversationGraph::open(&cfg.data_dir)?;

    let engine = providers::build(&cfg.engine, catalog.clone(), cfg.engine_api_key.clone())
        .map_err(|e| AppError::Engine(e.to_string()))?;
    let service = ConversationService::new(graph, engine, cfg.engine.context_turns);

    let session = service.start_session()?;
    info!(session_id = %session.id, "session started");

    let mut out = tokio::io::stdout();
    out.write_all(
        format!(
            "dialograph — session {}\n\
             ask a question, or use :history :sessions :companies :risks :new :quit\n> ",
            session.id
        )
        .as_bytes(),
    )
    .await?;
    out.flush().await?;

    let mut session_id = session.id;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        match input {
            "" => {}
            ":quit" | ":q" => break,
            ":new" => {
                let session = service.start_session()?;
                session_id = session.id;
                out.write_all(format!("new session {session_id}\n").as_bytes()).await?;
            }
            ":history" => {
                for m in service.get_history(&session_id)? {
                    out.write_all(
                        format!("[{}] Q: {}\n    A: {}\n", m.seq, m.question, m.answer).as_bytes(),
                    )
                    .await?;
                }
            }
            ":sessions" => {
                for row in service.message_count_per_session()? {
                    out.write_all(
                        format!("{:>5}  {}\n", row.messages, row.session_id).as_bytes(),
                    )
                    .await?;
                }
            }
            ":companies" => {
                for row in service.top_mentioned_companies(10)? {
                    out.write_all(format!("{:>5}  {}\n", row.mentions, row.name).as_bytes())
                        .await?;
                }
            }
            ":risks" => {
                for row in service.top_mentioned_risk_factors(10)? {
                    out.write_all(format!("{:>5}  {}\n", row.mentions, row.name).as_bytes())
                        .await?;
                }
            }
            question => match service.submit_turn(&session_id, question).await {
                Ok(m) => out.write_all(format!("{}\n", m.answer).as_bytes()).await?,
                Err(AppError::InvalidArgument(msg)) => {
                    out.write_all(format!("rejected: {msg}\n").as_bytes()).await?
                }
                Err(e) => return Err(e),
            },
        }
        out.write_all(b"> ").await?;
        out.flush().await?;
    }

    Ok(())
}
