//! devbridge command-line client.
//!
//! Usage:
//!   # Report task progress to the bridge (one connection, no retries)
//!   devbridge task-update --task-number 3 --step-type start --summary "parsing"
//!   devbridge task-update --json '{"task_number":3,"step_type":"end","summary":"done"}'
//!
//!   # Stay connected as an editor; commands for it are printed to stdout
//!   devbridge connect --editor "Visual Studio Code" --extension saoudrizwan.claude-dev
//!
//!   # Show where the bridge is expected
//!   devbridge config

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use devbridge_client::{
    AgentTarget, BridgeClient, Capability, ChannelConfig, ChannelEvent, ClientOptions, Dispatcher,
    OneShotSender, send_task_update,
};
use devbridge_core::{
    BridgeConfig, ClientId, EditorPresence, Message, PresenceState, StepType, detect_companions,
    detect_editor,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(name = "devbridge")]
#[command(about = "Client for the devbridge editor bridge")]
struct Args {
    /// Bridge port; defaults to the configuration file, then 3434
    #[arg(long, global = true, env = "DEVBRIDGE_PORT")]
    port: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one task progress update
    TaskUpdate {
        /// Raw parameters as a JSON object
        #[arg(long, conflicts_with_all = ["task_number", "step_type", "summary"])]
        json: Option<String>,

        #[arg(long, required_unless_present = "json")]
        task_number: Option<u64>,

        /// start, update or end
        #[arg(long, required_unless_present = "json")]
        step_type: Option<StepType>,

        #[arg(long, required_unless_present = "json")]
        summary: Option<String>,
    },

    /// Connect as an editor and print the commands it receives
    Connect {
        /// Workspace title
        #[arg(long)]
        title: Option<String>,

        /// Workspace folder; repeatable, defaults to the current directory
        #[arg(long = "folder")]
        folders: Vec<String>,

        /// Host application name
        #[arg(long, default_value = "Visual Studio Code")]
        editor: String,

        /// Installed extension id; repeatable
        #[arg(long = "extension")]
        extensions: Vec<String>,

        /// Fixed client id instead of a random one
        #[arg(long)]
        client_id: Option<String>,

        /// Seconds between reconnect attempts
        #[arg(long, default_value_t = 5)]
        reconnect_secs: u64,

        /// Give up after this many reconnect attempts
        #[arg(long)]
        max_reconnects: Option<u32>,

        /// Send a keepalive ping every N seconds
        #[arg(long)]
        ping_secs: Option<u64>,
    },

    /// Print the resolved bridge location
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries command output
    fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("devbridge=info".parse()?)
                .add_directive("devbridge_client=info".parse()?)
                .add_directive("devbridge_core=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let port = args.port.unwrap_or_else(|| BridgeConfig::load().port);

    match args.command {
        Command::TaskUpdate {
            json,
            task_number,
            step_type,
            summary,
        } => {
            let params = match json {
                Some(raw) => serde_json::from_str(&raw).context("--json is not valid JSON")?,
                None => json!({
                    "task_number": task_number,
                    "step_type": step_type.map(|s| s.as_str()),
                    "summary": summary,
                }),
            };
            let update = send_task_update(&OneShotSender::new(port), &params).await?;
            println!(
                "Task {} {}: {}",
                update.task_number, update.step_type, update.summary
            );
        }
        Command::Connect {
            title,
            folders,
            editor,
            extensions,
            client_id,
            reconnect_secs,
            max_reconnects,
            ping_secs,
        } => {
            let folders = if folders.is_empty() {
                vec![std::env::current_dir()?.display().to_string()]
            } else {
                folders
            };
            let editor = detect_editor(&editor);
            let presence = EditorPresence {
                title,
                folders,
                editor: editor.clone(),
                extensions: detect_companions(|id| extensions.iter().any(|e| e == id)),
            };

            let mut channel = ChannelConfig::for_port(port)
                .reconnect_interval(Duration::from_secs(reconnect_secs));
            if let Some(max) = max_reconnects {
                channel = channel.max_reconnect_attempts(max);
            }
            if let Some(secs) = ping_secs {
                channel = channel.ping_interval(Duration::from_secs(secs));
            }

            let mut options = ClientOptions::new(PresenceState::from(presence)).channel(channel);
            if let Some(id) = client_id {
                options = options.client_id(ClientId::new(id)?);
            }

            let installed = Arc::new(extensions);
            let dispatcher = Dispatcher::builder()
                .builtins(
                    Arc::new(PrintCapability::new("cline", installed.clone())),
                    Arc::new(PrintCapability::new("roocode", installed)),
                )
                .target(editor.clone(), Arc::new(PrintTarget { editor }))
                .build();

            run_editor(options, dispatcher).await?;
        }
        Command::Config => {
            match BridgeConfig::default_path() {
                Some(path) => println!("config: {}", path.display()),
                None => println!("config: (no config directory)"),
            }
            println!("port:   {port}");
            println!("url:    {}", devbridge_core::bridge_url(port));
        }
    }

    Ok(())
}

async fn run_editor(options: ClientOptions, dispatcher: Dispatcher) -> Result<()> {
    let (client, mut events) = BridgeClient::new(options, dispatcher);
    tracing::info!(client_id = %client.client_id(), "starting editor client");

    if let Err(err) = client.connect().await {
        tracing::warn!(error = %err, "bridge not reachable yet, will keep retrying");
    }

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            event = events.recv() => match event {
                Some(ChannelEvent::ReconnectExhausted { attempts }) => {
                    break Err(anyhow::anyhow!("gave up after {attempts} reconnect attempts"));
                }
                Some(event) => report(&event),
                None => break Ok(()),
            },
        }
    };

    tracing::info!("shutting down");
    client.disconnect();
    outcome
}

fn report(event: &ChannelEvent) {
    match event {
        ChannelEvent::Message(Message::PeerJoined(notice)) => {
            tracing::info!(peer = notice.peer().unwrap_or("?"), "peer joined");
        }
        ChannelEvent::Message(Message::PeerLeft(notice)) => {
            tracing::info!(peer = notice.peer().unwrap_or("?"), "peer left");
        }
        ChannelEvent::Reconnecting { attempt, delay } => {
            tracing::info!(attempt, ?delay, "reconnecting");
        }
        other => tracing::debug!(?other, "channel event"),
    }
}

/// Stands in for an installed companion tool by printing what it is asked to do.
struct PrintCapability {
    capability: &'static str,
    installed: Arc<Vec<String>>,
}

impl PrintCapability {
    fn new(capability: &'static str, installed: Arc<Vec<String>>) -> Self {
        Self {
            capability,
            installed,
        }
    }

    fn companion_id(&self) -> &'static str {
        match self.capability {
            "cline" => devbridge_client::CLINE_COMPANION,
            _ => devbridge_client::ROOCODE_COMPANION,
        }
    }
}

#[async_trait]
impl Capability for PrintCapability {
    fn is_available(&self) -> bool {
        self.installed.iter().any(|id| id == self.companion_id())
    }

    fn is_active(&self) -> bool {
        true
    }

    async fn start_task(&self, message: &str, images: &[String]) -> anyhow::Result<()> {
        let line = json!({"capability": self.capability, "start_task": message, "images": images});
        println!("{line}");
        Ok(())
    }

    async fn send_message(&self, message: &str) -> anyhow::Result<()> {
        let line = json!({"capability": self.capability, "send_message": message});
        println!("{line}");
        Ok(())
    }
}

struct PrintTarget {
    editor: String,
}

#[async_trait]
impl AgentTarget for PrintTarget {
    async fn submit(&self, instruction: &str) -> anyhow::Result<()> {
        println!("{}", json!({"target": self.editor, "instruction": instruction}));
        Ok(())
    }
}
