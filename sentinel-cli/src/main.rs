//! Sentinel CLI - command-line console for the facility-security backend
//!
//! Logs in, keeps the session on disk between runs and exposes the backend
//! collections as subcommands. Every result is printed as pretty JSON.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use sentinel_client::{Collection, SentinelClient};
use sentinel_core::{init_logging, ApiError, ErrorKind, SentinelConfig};
use serde_json::Value;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "sentinel")]
#[command(about = "Console for the facility-security backend")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend base URL, overriding the configuration
    #[arg(long)]
    api_url: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the session
    Login {
        username: String,

        /// Password; read from stdin when omitted
        #[arg(short, long)]
        password: Option<String>,
    },

    /// End the session
    Logout,

    /// Show the logged-in user
    Whoami,

    /// Show session and connection details without contacting the backend
    Status,

    /// Show dashboard statistics
    Dashboard,

    /// Check that the backend is up
    Health,

    /// Manage inventory resources
    Resources {
        #[command(subcommand)]
        action: RecordAction,
    },

    /// Manage restricted areas and who may enter them
    Areas {
        #[command(subcommand)]
        action: AreaAction,
    },

    /// Manage console users
    Users {
        #[command(subcommand)]
        action: RecordAction,
    },

    /// Inspect and record access logs
    Logs {
        #[command(subcommand)]
        action: LogAction,
    },

    /// Manage configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,

        /// Write a default configuration file
        #[arg(long)]
        init: bool,

        /// Validate current configuration
        #[arg(long)]
        validate: bool,
    },
}

#[derive(Subcommand)]
enum RecordAction {
    /// List records
    List {
        #[arg(long)]
        skip: Option<u32>,

        #[arg(long)]
        limit: Option<u32>,
    },

    /// Show one record
    Get { id: i64 },

    /// Create a record from a JSON object
    Create {
        #[arg(long)]
        json: String,
    },

    /// Update a record from a JSON object
    Update {
        id: i64,

        #[arg(long)]
        json: String,
    },

    /// Delete a record
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum AreaAction {
    #[command(flatten)]
    Record(RecordAction),

    /// Allow a user into an area
    Grant { area_id: i64, user_id: i64 },

    /// Withdraw a user's access to an area
    Revoke { area_id: i64, user_id: i64 },
}

#[derive(Subcommand)]
enum LogAction {
    #[command(flatten)]
    Record(RecordAction),

    /// Access history of one user
    User { user_id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = SentinelConfig::load(cli.config.as_deref())?;
    if let Some(url) = &cli.api_url {
        config.api.base_url = url.clone();
        config.validate()?;
    }

    let logging = if cli.verbose {
        config.logging.clone().verbose()
    } else {
        config.logging.clone()
    };
    init_logging(&logging).context("Failed to initialize logging")?;

    info!("Starting Sentinel CLI v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Config {
            show,
            init,
            validate,
        } => handle_config(cli.config, &config, show, init, validate),
        command => {
            let client = SentinelClient::from_config(&config).inspect_err(|e| e.log())?;
            run(command, &client, &config).await
        }
    }
}

async fn run(command: Commands, client: &SentinelClient, config: &SentinelConfig) -> Result<()> {
    match command {
        Commands::Login { username, password } => {
            let password = match password {
                Some(password) => password,
                None => read_password()?,
            };
            let user = client
                .session()
                .login(&username, &password)
                .await
                .map_err(describe)?;
            info!(username = %user.username, "Session stored");
            print_json(&user)
        }
        Commands::Logout => {
            client.session().logout().await;
            println!("Logged out");
            Ok(())
        }
        Commands::Whoami => {
            require_session(client).await?;
            print_json(&client.session().current_user().await.map_err(describe)?)
        }
        Commands::Status => handle_status(client, config),
        Commands::Dashboard => {
            require_session(client).await?;
            print_json(&client.resources().dashboard_stats().await.map_err(describe)?)
        }
        Commands::Health => print_json(&client.resources().health().await.map_err(describe)?),
        Commands::Resources { action } => {
            require_session(client).await?;
            handle_records(client.resources().resources(), action).await
        }
        Commands::Users { action } => {
            require_session(client).await?;
            handle_records(client.resources().users(), action).await
        }
        Commands::Areas { action } => {
            require_session(client).await?;
            handle_areas(client, action).await
        }
        Commands::Logs { action } => {
            require_session(client).await?;
            handle_logs(client, action).await
        }
        // Dispatched in main before a client exists
        Commands::Config { .. } => Ok(()),
    }
}

/// Make sure a usable session exists, refreshing it when needed
async fn require_session(client: &SentinelClient) -> Result<()> {
    client
        .session()
        .ensure_session()
        .await
        .map_err(|e| match e.kind {
            ErrorKind::AuthenticationMissing | ErrorKind::AuthenticationExpired => {
                anyhow!("{} (run `sentinel login` first)", e)
            }
            _ => describe(e),
        })
}

fn describe(error: ApiError) -> anyhow::Error {
    match error.kind {
        ErrorKind::NetworkUnreachable => anyhow!("Backend unreachable: {}", error),
        _ if error.status > 0 => anyhow!("HTTP {}: {}", error.status, error),
        _ => error.into(),
    }
}

async fn handle_records(collection: &Collection, action: RecordAction) -> Result<()> {
    debug!(collection = collection.path(), "Running record command");

    let output: Value = match action {
        RecordAction::List { skip, limit } => {
            let records: Vec<Value> = match (skip, limit) {
                (None, None) => collection.list::<Value>().await,
                (skip, limit) => {
                    collection
                        .list_page::<Value>(skip.unwrap_or(0), limit.unwrap_or(100))
                        .await
                }
            }
            .map_err(describe)?;
            Value::Array(records)
        }
        RecordAction::Get { id } => collection.get(id).await.map_err(describe)?,
        RecordAction::Create { json } => {
            let payload = parse_payload(&json)?;
            collection.create(&payload).await.map_err(describe)?
        }
        RecordAction::Update { id, json } => {
            let payload = parse_payload(&json)?;
            collection.update(id, &payload).await.map_err(describe)?
        }
        RecordAction::Delete { id } => collection.remove(id).await.map_err(describe)?,
    };

    print_json(&output)
}

async fn handle_areas(client: &SentinelClient, action: AreaAction) -> Result<()> {
    let resources = client.resources();
    let output = match action {
        AreaAction::Record(action) => {
            return handle_records(resources.restricted_areas(), action).await
        }
        AreaAction::Grant { area_id, user_id } => resources
            .grant_area_access(area_id, user_id)
            .await
            .map_err(describe)?,
        AreaAction::Revoke { area_id, user_id } => resources
            .revoke_area_access(area_id, user_id)
            .await
            .map_err(describe)?,
    };
    print_json(&output)
}

async fn handle_logs(client: &SentinelClient, action: LogAction) -> Result<()> {
    let resources = client.resources();
    match action {
        LogAction::Record(action) => handle_records(resources.access_logs(), action).await,
        LogAction::User { user_id } => {
            let logs: Vec<Value> = resources
                .user_access_logs(user_id)
                .await
                .map_err(describe)?;
            print_json(&logs)
        }
    }
}

fn handle_status(client: &SentinelClient, config: &SentinelConfig) -> Result<()> {
    let session_file = config.storage.session_path()?;
    let status = serde_json::json!({
        "base_url": config.api.base_url,
        "session_file": session_file.display().to_string(),
        "state": format!("{:?}", client.session().state()),
        "authenticated": client.session().is_authenticated(),
    });
    print_json(&status)
}

fn handle_config(
    path: Option<PathBuf>,
    config: &SentinelConfig,
    show: bool,
    init: bool,
    validate: bool,
) -> Result<()> {
    if init {
        let path = path
            .or_else(SentinelConfig::default_path)
            .context("Unable to determine a configuration directory")?;
        if path.exists() {
            bail!("Configuration already exists at {}", path.display());
        }
        SentinelConfig::default().save_to_file(&path)?;
        println!("Configuration initialized at: {}", path.display());
    }

    if show {
        let rendered =
            toml::to_string_pretty(config).context("Failed to render configuration")?;
        println!("{}", rendered);
    }

    if validate {
        config.validate()?;
        println!("Configuration is valid");
    }

    Ok(())
}

fn parse_payload(raw: &str) -> Result<Value> {
    let payload: Value = serde_json::from_str(raw).context("--json is not valid JSON")?;
    if !payload.is_object() {
        bail!("--json must be a JSON object");
    }
    Ok(payload)
}

fn read_password() -> Result<String> {
    print!("Password: ");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
