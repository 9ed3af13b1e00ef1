use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use bluelift_core::{
    APP_NAME, HttpTransport, HttpTransportConfig, Outcome, ProgressSink, SessionManager,
    SubmitOptions, UploadConfig, UploadProgress, init_logging,
};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Parser)]
#[command(name = "bluelift")]
#[command(about = "Bluelift CLI (chunked blueprint upload client)", long_about = None)]
struct Cli {
    #[arg(long)]
    json: bool,

    #[arg(long)]
    events: bool,

    #[arg(long)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload blueprint text and wait for the conversion result.
    Submit {
        /// Read the blueprint from this file instead of stdin.
        #[arg(long)]
        file: Option<PathBuf>,
        /// Auth token; falls back to the BLUELIFT_TOKEN environment variable.
        #[arg(long)]
        token: Option<String>,
        /// Server base URL; overrides the configured one.
        #[arg(long)]
        base_url: Option<String>,
    },
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },
}

#[derive(Subcommand)]
enum ConfigCmd {
    Get,
    Set,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Settings {
    server: Server,
    #[serde(default)]
    upload: UploadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Server {
    base_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: Server {
                base_url: "http://127.0.0.1:5000".to_string(),
            },
            upload: UploadConfig::default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CliError {
    code: &'static str,
    message: String,
    details: serde_json::Value,
    retryable: bool,
}

impl CliError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: serde_json::json!({}),
            retryable: false,
        }
    }

    fn retryable(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: serde_json::json!({}),
            retryable: true,
        }
    }
}

struct NdjsonProgressSink {
    task_id: String,
}

impl ProgressSink for NdjsonProgressSink {
    fn on_progress(&self, p: UploadProgress) {
        let line = serde_json::json!({
            "type": "task.progress",
            "taskId": self.task_id,
            "phase": p.phase,
            "chunksTotal": p.chunks_total,
            "chunksDone": p.chunks_done,
            "bytesTotal": p.bytes_total,
            "bytesUploaded": p.bytes_uploaded,
            "polls": p.polls,
        });
        println!("{line}");
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.json);
    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            emit_error(&e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config_dir = cli
        .config_dir
        .or_else(|| std::env::var("BLUELIFT_CONFIG_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(default_config_dir);

    match cli.cmd {
        Command::Submit {
            file,
            token,
            base_url,
        } => {
            submit_run(
                &config_dir,
                file,
                token,
                base_url,
                cli.json,
                cli.events,
            )
            .await
        }
        Command::Config { cmd } => match cmd {
            ConfigCmd::Get => config_get(&config_dir, cli.json).await,
            ConfigCmd::Set => config_set(&config_dir, cli.json).await,
        },
    }
}

async fn config_get(config_dir: &Path, json: bool) -> Result<(), CliError> {
    let settings = load_settings(config_dir)?;

    if json {
        println!("{}", serde_json::json!({ "settings": settings }));
    } else {
        let text = toml::to_string(&settings)
            .map_err(|e| CliError::new("config.invalid", e.to_string()))?;
        print!("{text}");
        if !text.ends_with('\n') {
            println!();
        }
    }
    Ok(())
}

async fn config_set(config_dir: &Path, json: bool) -> Result<(), CliError> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .map_err(|e| CliError::new("config.read_failed", e.to_string()))?;
    let settings: Settings =
        toml::from_str(&input).map_err(|e| CliError::new("config.invalid", e.to_string()))?;
    validate_settings(&settings)?;
    save_settings(config_dir, &settings)?;

    if json {
        println!("{}", serde_json::json!({ "settings": settings }));
    }
    Ok(())
}

async fn submit_run(
    config_dir: &Path,
    file: Option<PathBuf>,
    token: Option<String>,
    base_url: Option<String>,
    json: bool,
    events: bool,
) -> Result<(), CliError> {
    let settings = load_settings(config_dir)?;
    validate_settings(&settings)?;

    let base_url = base_url.unwrap_or(settings.server.base_url);
    let token = resolve_token(token)?;
    let text = read_text(file.as_deref())?;
    debug!(
        event = "submit.config",
        base_url = %base_url,
        text_bytes = text.len(),
        "submit.config"
    );

    let transport = HttpTransport::new(HttpTransportConfig {
        base_url: base_url.clone(),
    });
    let manager = SessionManager::new(transport, settings.upload).map_err(map_core_err)?;

    let task_id = format!("sub_{}", uuid::Uuid::new_v4());
    if events {
        println!(
            "{}",
            serde_json::json!({
                "type": "task.state",
                "taskId": task_id,
                "kind": "submit",
                "state": "running",
                "bytesTotal": text.len(),
            })
        );
    }

    let sink = NdjsonProgressSink {
        task_id: task_id.clone(),
    };
    let opts = SubmitOptions {
        cancel: None,
        progress: if events { Some(&sink) } else { None },
    };
    let outcome = manager
        .submit_with(&text, &token, opts)
        .await
        .map_err(map_core_err)?;

    if events {
        let (state, result) = match &outcome {
            Outcome::Success { result } => ("succeeded", Some(result)),
            Outcome::Partial { result } => ("partial", Some(result)),
            Outcome::Superseded => ("superseded", None),
        };
        println!(
            "{}",
            serde_json::json!({
                "type": "task.state",
                "taskId": task_id,
                "kind": "submit",
                "state": state,
                "result": result,
            })
        );
        return Ok(());
    }

    match outcome {
        Outcome::Success { result } => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "outcome": "success", "result": result })
                );
            } else {
                println!("status=SUCCESS");
                if let Some(stats) = &result.stats_summary {
                    println!("statsSummary={stats}");
                }
                if let Some(output) = &result.output {
                    println!();
                    println!("{output}");
                }
            }
        }
        Outcome::Partial { result } => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "outcome": "partial", "result": result })
                );
            } else {
                println!("status=PARTIAL_FAILURE");
                if let Some(error) = &result.error {
                    println!("error={error}");
                }
                if let Some(stats) = &result.stats_summary {
                    println!("statsSummary={stats}");
                }
                if let Some(output) = &result.output {
                    println!();
                    println!("{output}");
                }
            }
        }
        Outcome::Superseded => {
            if json {
                println!("{}", serde_json::json!({ "outcome": "superseded" }));
            } else {
                println!("superseded");
            }
        }
    }
    Ok(())
}

fn default_config_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".config").join(APP_NAME)
}

fn config_path(config_dir: &Path) -> PathBuf {
    config_dir.join("config.toml")
}

fn load_settings(config_dir: &Path) -> Result<Settings, CliError> {
    let path = config_path(config_dir);
    if !path.exists() {
        return Ok(Settings::default());
    }
    let text = std::fs::read_to_string(&path)
        .map_err(|e| CliError::new("config.read_failed", e.to_string()))?;
    let s: Settings =
        toml::from_str(&text).map_err(|e| CliError::new("config.invalid", e.to_string()))?;
    Ok(s)
}

fn save_settings(config_dir: &Path, settings: &Settings) -> Result<(), CliError> {
    validate_settings(settings)?;
    let path = config_path(config_dir);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| CliError::new("config.write_failed", e.to_string()))?;
    }
    let text =
        toml::to_string(settings).map_err(|e| CliError::new("config.invalid", e.to_string()))?;
    atomic_write(&path, text.as_bytes())
        .map_err(|e| CliError::new("config.write_failed", e.to_string()))?;
    Ok(())
}

fn validate_settings(settings: &Settings) -> Result<(), CliError> {
    let base_url = settings.server.base_url.trim();
    if base_url.is_empty() {
        return Err(CliError::new(
            "config.invalid",
            "server.base_url must not be empty",
        ));
    }
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(CliError::new(
            "config.invalid",
            "server.base_url must start with http:// or https://",
        ));
    }
    settings.upload.validate().map_err(map_core_err)?;
    Ok(())
}

fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(tmp, path)?;
    Ok(())
}

fn resolve_token(flag: Option<String>) -> Result<String, CliError> {
    if let Some(token) = flag {
        if !token.trim().is_empty() {
            return Ok(token);
        }
    }
    match std::env::var("BLUELIFT_TOKEN") {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(CliError::new(
            "auth.missing",
            "auth token required: pass --token or set BLUELIFT_TOKEN",
        )),
    }
}

fn read_text(file: Option<&Path>) -> Result<String, CliError> {
    match file {
        Some(path) => std::fs::read_to_string(path).map_err(|e| {
            CliError::new("input.read_failed", format!("{}: {e}", path.display()))
        }),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| CliError::new("input.read_failed", e.to_string()))?;
            Ok(buf)
        }
    }
}

fn map_core_err(e: bluelift_core::Error) -> CliError {
    match e {
        bluelift_core::Error::InvalidConfig { message } => CliError::new("config.invalid", message),
        bluelift_core::Error::Validation { message } => CliError::new("input.invalid", message),
        bluelift_core::Error::Transport { message } => {
            CliError::retryable("server.unavailable", message)
        }
        bluelift_core::Error::Initiation { message } => {
            CliError::new("upload.initiate_failed", message)
        }
        bluelift_core::Error::ChunkUpload { index, message } => CliError::new(
            "upload.chunk_failed",
            format!("chunk {index} failed: {message}"),
        ),
        bluelift_core::Error::PollingTransport { message } => {
            CliError::retryable("poll.transport_failed", message)
        }
        bluelift_core::Error::TaskFailure { message } => CliError::new("task.failed", message),
    }
}

fn emit_error(e: &CliError) {
    let json = serde_json::to_string(e).unwrap_or_else(|_| "{\"code\":\"unknown\",\"message\":\"json encode failed\",\"details\":{},\"retryable\":false}".to_string());
    let _ = writeln!(std::io::stderr(), "{json}");
}
