//! FaceAuth MCP server entry point.

use std::sync::Arc;
use tokio::sync::Mutex;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use face_auth_mcp::config::{load_engine_config, resolve_config_path};
use face_auth_mcp::protocol::ProtocolHandler;
use face_auth_mcp::session::AuthSessionManager;
use face_auth_mcp::tools::ToolRegistry;
use face_auth_mcp::transport::StdioTransport;

#[derive(Parser)]
#[command(
    name = "face-auth-mcp",
    about = "MCP server for FaceAuth: facial-expression second factor for password logins",
    version
)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Directory holding the face detector, embedder and expression ONNX models.
    #[arg(long, global = true)]
    model_dir: Option<String>,

    /// Directory for templates and reference images.
    #[arg(long, global = true)]
    data_dir: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MCP server over stdio (default).
    Serve,

    /// Start the MCP server over HTTP.
    #[cfg(feature = "sse")]
    ServeHttp {
        /// Listen address (host:port).
        #[arg(long, default_value = "127.0.0.1:3100")]
        addr: String,

        /// Bearer token for authentication. Also read from FACE_AUTH_TOKEN.
        #[arg(long)]
        token: Option<String>,
    },

    /// Check the configuration, model availability and stored templates.
    Validate,

    /// Print server capabilities as JSON.
    Info,

    /// Generate shell completion scripts.
    ///
    /// Example:
    ///   face-auth-mcp completions bash > ~/.local/share/bash-completion/completions/face-auth-mcp
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

impl Cli {
    fn open_manager(&self) -> anyhow::Result<AuthSessionManager> {
        let config_path = resolve_config_path(self.config.as_deref());
        let config = load_engine_config(
            config_path.as_deref(),
            self.model_dir.as_deref(),
            self.data_dir.as_deref(),
        )?;
        Ok(AuthSessionManager::open(&config)?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command.as_ref().unwrap_or(&Commands::Serve) {
        Commands::Serve => {
            let session = Arc::new(Mutex::new(cli.open_manager()?));
            let transport = StdioTransport::new(ProtocolHandler::new(session));
            transport.run().await?;
        }

        #[cfg(feature = "sse")]
        Commands::ServeHttp { addr, token } => {
            use face_auth_mcp::config::ENV_AUTH_TOKEN;
            use face_auth_mcp::transport::SseTransport;

            let token = token
                .clone()
                .or_else(|| std::env::var(ENV_AUTH_TOKEN).ok())
                .filter(|t| !t.is_empty());
            if token.is_some() {
                tracing::info!("Auth: bearer token required");
            }

            let session = Arc::new(Mutex::new(cli.open_manager()?));
            let transport = SseTransport::new(ProtocolHandler::new(session), token);
            transport.run(addr).await?;
        }

        Commands::Validate => match cli.open_manager() {
            Ok(manager) => {
                let capability = manager.capability();
                let auth = manager.authenticator();
                let templates = auth.templates().list()?;
                println!("Configuration OK");
                println!("  Extractor: {}", capability.kind);
                if let Some(reason) = &capability.reason {
                    println!("  Degraded: {reason}");
                }
                println!("  Decision mode: {}", auth.engine().policy().mode);
                println!("  Detection fallback: {}", auth.detection_fallback());
                println!("  Enrolled users: {}", templates.len());
                let stale = templates
                    .iter()
                    .filter(|r| r.observation.extractor != capability.kind)
                    .count();
                if stale > 0 {
                    println!("  Templates from another extractor (re-enroll): {stale}");
                }
            }
            Err(e) => {
                eprintln!("Invalid configuration: {e}");
                std::process::exit(1);
            }
        },

        Commands::Info => {
            let capabilities = face_auth_mcp::types::InitializeResult::default_result();
            let tools = ToolRegistry::list_tools();
            let info = serde_json::json!({
                "server": capabilities.server_info,
                "protocol_version": capabilities.protocol_version,
                "capabilities": capabilities.capabilities,
                "tools": tools.iter().map(|t| &t.name).collect::<Vec<_>>(),
                "tool_count": tools.len(),
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "face-auth-mcp", &mut std::io::stdout());
        }
    }

    Ok(())
}
