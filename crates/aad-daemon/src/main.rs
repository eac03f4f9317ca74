// SPDX-License-Identifier: MIT OR Apache-2.0
//! `aad-daemon` — the AutoAppDev control-plane binary. Reads configuration
//! from the environment, constructs every component, spawns the three
//! background loops (reaper, log tailer, outbox ingester), and serves the
//! HTTP API until signaled to stop.

use aad_actions::PromptDefaults;
use aad_controller::Controller;
use aad_daemon::state::{agent_config, AppState};
use aad_llm_parse::LlmParser;
use aad_logs::LogHub;
use aad_queues::{InboxEmitter, OutboxIngester};
use aad_store::StateStore;
use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

/// Missing required environment.
const EXIT_MISSING_ENV: u8 = 2;
/// Startup schema/connectivity check failed.
const EXIT_SCHEMA_FAILURE: u8 = 3;
/// A startup step timed out.
const EXIT_TIMEOUT: u8 = 4;
/// Any other startup failure.
const EXIT_OTHER_FAILURE: u8 = 5;

const STARTUP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "aad-daemon", about = "AutoAppDev pipeline orchestration control plane")]
struct Args {
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[arg(long, env = "AUTOAPPDEV_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(long, env = "AUTOAPPDEV_PORT", alias = "port", default_value_t = 8788)]
    port: u16,

    #[arg(long, env = "AUTOAPPDEV_RUNTIME_DIR")]
    runtime_dir: Option<PathBuf>,

    #[arg(long, env = "AUTOAPPDEV_ENABLE_LLM_PARSE", default_value_t = false)]
    enable_llm_parse: bool,

    #[arg(long, env = "AUTOAPPDEV_CODEX_MODEL", default_value = "gpt-5.3-codex")]
    codex_model: String,

    #[arg(long, env = "AUTOAPPDEV_CODEX_REASONING", default_value = "medium")]
    codex_reasoning: String,

    #[arg(long, env = "AUTOAPPDEV_CODEX_SKIP_GIT_CHECK", default_value_t = false)]
    codex_skip_git_check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "aad-daemon failed to start");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(e) = err.downcast_ref::<tokio::time::error::Elapsed>() {
        let _ = e;
        return EXIT_TIMEOUT;
    }
    EXIT_OTHER_FAILURE
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let repo_root = std::env::current_dir().context("resolve current directory as repo root")?;
    let runtime_dir = args.runtime_dir.unwrap_or_else(|| repo_root.join(".autoappdev-runtime"));
    tokio::fs::create_dir_all(&runtime_dir)
        .await
        .with_context(|| format!("create runtime directory {}", runtime_dir.display()))?;
    tokio::fs::create_dir_all(runtime_dir.join("logs"))
        .await
        .context("create logs directory")?;

    let store: Arc<dyn StateStore> = match &args.database_url {
        Some(url) => match tokio::time::timeout(STARTUP_TIMEOUT, aad_store::sql::SqlStore::connect(url)).await {
            Err(_) => {
                error!("database connect timed out after {:?}", STARTUP_TIMEOUT);
                std::process::exit(i32::from(EXIT_TIMEOUT));
            }
            Ok(Err(e)) => {
                error!(%e, "database connect or schema apply failed");
                std::process::exit(i32::from(EXIT_SCHEMA_FAILURE));
            }
            Ok(Ok(store)) => Arc::new(store),
        },
        None => {
            if std::env::var("AUTOAPPDEV_REQUIRE_DATABASE_URL").as_deref() == Ok("1") {
                error!("DATABASE_URL is required but unset");
                std::process::exit(i32::from(EXIT_MISSING_ENV));
            }
            info!("DATABASE_URL unset, using JSON-file state store");
            Arc::new(aad_store::file::FileStore::new(runtime_dir.join("state.json")))
        }
    };

    let controller = Arc::new(Controller::new(store.clone(), repo_root.clone(), runtime_dir.clone()));
    let log_hub = Arc::new(LogHub::new(
        runtime_dir.join("logs").join("pipeline.log"),
        runtime_dir.join("logs").join("backend.log"),
        aad_logs::DEFAULT_CAPACITY,
    ));
    let inbox = Arc::new(InboxEmitter::new(runtime_dir.clone()));
    let outbox = Arc::new(OutboxIngester::new(store.clone(), runtime_dir.clone()));

    let llm_parser = args.enable_llm_parse.then(|| {
        let config = agent_config(&args.codex_model, &args.codex_reasoning, args.codex_skip_git_check);
        Arc::new(LlmParser::new(config, runtime_dir.clone()))
    });

    controller.clone().spawn_reaper();
    log_hub.clone().spawn();
    outbox.clone().spawn();

    let state = Arc::new(AppState {
        store,
        controller,
        log_hub,
        inbox,
        outbox,
        llm_parser,
        repo_root,
        runtime_dir,
        prompt_defaults: PromptDefaults {
            agent: "codex".to_string(),
            model: args.codex_model,
            reasoning: args.codex_reasoning,
        },
        started_at: Utc::now(),
    });

    let app = aad_daemon::build_app(state);
    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(%addr, "aad-daemon listening");
    axum::serve(listener, app).await.context("serve HTTP API")?;
    Ok(())
}
