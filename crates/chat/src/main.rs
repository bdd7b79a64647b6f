//! murmur – terminal chat client.
//!
//! Startup order:
//! 1. Parse the command line and load layered settings.
//! 2. Initialise tracing on stderr.
//! 3. Open the message store and build the assistant responder.
//! 4. Resolve the signed-in user and open that user's conversation.
//! 5. Run the line loop until `/quit` or end of input.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use murmur::chat::{ConversationController, HistoryStatus};
use murmur::responder::{LlmResponder, Responder, TimeoutResponder};
use murmur::session::{AuthContext, ChatSession};
use murmur::settings::{Settings, SettingsError, SettingsStore, StorageBackend};
use murmur::terminal::{Command, TerminalRenderer, parse_command};
use murmur_llm::{ProviderError, create_provider};
use murmur_storage::{MemoryStorage, MessageStore, SqliteStorage, StorageError, UserId};
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "murmur", version, about = "Chat with an AI assistant from the terminal")]
struct Cli {
    /// Settings file. Defaults to `<config dir>/murmur/settings.json`.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Sign in with a fixed user id.
    #[arg(long, conflicts_with = "anonymous")]
    user: Option<String>,
    /// Sign in under a new anonymous identity and remember it for later runs.
    #[arg(long)]
    anonymous: bool,
    /// SQLite database path, overriding the settings.
    #[arg(long, conflicts_with = "memory")]
    database: Option<String>,
    /// Keep messages in memory for this run only.
    #[arg(long)]
    memory: bool,
}

#[derive(Debug, Snafu)]
enum AppError {
    #[snafu(display("failed to open message store on `{stage}`: {source}"))]
    OpenStore {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("invalid user id on `{stage}`: {source}"))]
    InvalidUser {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("failed to set up the assistant on `{stage}`: {source}"))]
    Provider {
        stage: &'static str,
        source: ProviderError,
    },
    #[snafu(display("failed to save settings on `{stage}`: {source}"))]
    SaveSettings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("failed to read input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "murmur exited with an error");
            eprintln!("murmur: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let settings_store = match &cli.config {
        Some(path) => SettingsStore::new(path.clone()),
        None => SettingsStore::load(),
    };
    let settings = settings_store.settings();
    init_tracing(&settings.log_filter);
    tracing::info!(
        config_path = ?settings_store.config_path(),
        version = env!("CARGO_PKG_VERSION"),
        "starting murmur"
    );

    let store = open_store(&cli, &settings, &settings_store).await?;
    let responder = build_responder(&settings)?;
    let auth = resolve_auth(&cli, &settings_store)?;

    let Some(controller) = ChatSession::open(&auth, store, responder) else {
        println!("No user is signed in. Run with --user <ID> or --anonymous.");
        return Ok(());
    };

    chat_loop(controller).await
}

fn init_tracing(log_filter: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| log_filter.parse::<EnvFilter>())
        .unwrap_or_else(|error| {
            eprintln!(
                "WARN: log filter '{log_filter}' is invalid ({error}); falling back to 'info'"
            );
            EnvFilter::new("info")
        });

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn open_store(
    cli: &Cli,
    settings: &Settings,
    settings_store: &SettingsStore,
) -> Result<Arc<dyn MessageStore>, AppError> {
    if cli.memory || (cli.database.is_none() && settings.storage.backend == StorageBackend::Memory)
    {
        tracing::info!("using in-memory message store");
        return Ok(Arc::new(MemoryStorage::new()));
    }

    let location = cli
        .database
        .clone()
        .filter(|path| !path.trim().is_empty())
        .or_else(|| Some(settings.storage.database_path.clone()).filter(|path| !path.is_empty()))
        .unwrap_or_else(|| {
            settings_store
                .default_database_path()
                .to_string_lossy()
                .into_owned()
        });

    let store = SqliteStorage::open(&location)
        .await
        .context(OpenStoreSnafu {
            stage: "open-sqlite-store",
        })?;
    Ok(Arc::new(store))
}

fn build_responder(settings: &Settings) -> Result<Arc<dyn Responder>, AppError> {
    let provider = create_provider(settings.provider.to_provider_config()).context(ProviderSnafu {
        stage: "create-provider",
    })?;
    let llm = LlmResponder::new(provider)
        .with_model(settings.provider.model.clone())
        .with_temperature(settings.provider.temperature)
        .with_max_tokens(settings.provider.max_tokens);
    tracing::info!(model_id = %llm.model_id(), "assistant ready");

    let responder: Arc<dyn Responder> = Arc::new(llm);
    Ok(match settings.responder_timeout() {
        Some(timeout) => Arc::new(TimeoutResponder::new(responder, timeout)),
        None => responder,
    })
}

fn resolve_auth(cli: &Cli, settings_store: &SettingsStore) -> Result<AuthContext, AppError> {
    if let Some(raw) = &cli.user {
        let user_id = UserId::parse(raw.as_str()).context(InvalidUserSnafu {
            stage: "parse-cli-user",
        })?;
        return Ok(AuthContext::signed_in(user_id));
    }

    if cli.anonymous {
        let auth = AuthContext::anonymous().context(InvalidUserSnafu {
            stage: "anonymous-sign-in",
        })?;
        if let Some(user_id) = auth.user_id() {
            settings_store
                .remember_user(user_id.as_str())
                .context(SaveSettingsSnafu {
                    stage: "remember-anonymous-user",
                })?;
        }
        return Ok(auth);
    }

    match settings_store.settings().identity.user_id.as_deref() {
        Some(raw) => {
            let user_id = UserId::parse(raw).context(InvalidUserSnafu {
                stage: "parse-remembered-user",
            })?;
            Ok(AuthContext::signed_in(user_id))
        }
        None => Ok(AuthContext::SignedOut),
    }
}

async fn chat_loop(controller: Arc<ConversationController>) -> Result<(), AppError> {
    let mut view = controller.view();
    let mut renderer = TerminalRenderer::new();

    println!("Signed in as {}. Type /history to reload, /quit to leave.", controller.user_id());
    if let Err(error) = view.reload().await {
        println!("! {error}");
    }
    print_lines(renderer.render(&view.current()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context(ReadInputSnafu {
        stage: "read-stdin-line",
    })? {
        match parse_command(&line) {
            Command::Quit => break,
            Command::Empty => continue,
            Command::History => match view.reload().await {
                Ok(HistoryStatus::Loaded) => renderer.reprint(),
                Ok(_) => {}
                Err(error) => println!("! {error}"),
            },
            Command::Send(text) => {
                let turn = controller.send(&text);
                tokio::pin!(turn);
                loop {
                    tokio::select! {
                        result = &mut turn => {
                            if let Err(error) = result {
                                println!("! {error}");
                            }
                            break;
                        }
                        alive = view.changed() => {
                            if !alive {
                                break;
                            }
                            print_lines(renderer.render(&view.current()));
                        }
                    }
                }
            }
        }
        print_lines(renderer.render(&view.current()));
    }

    tracing::info!(user_id = %controller.user_id(), "leaving chat");
    Ok(())
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{line}");
    }
}
