//! Entry point: loads configuration, wires the transport, model, and action
//! engine together, and runs until shutdown or a terminal logout.

mod cli_args;
mod instructions;
mod secrets;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use kaya_agent::actions::{build_action_registry, ActionSetConfig};
use kaya_agent::{ActionPolicy, HostControl, Orchestrator, OrchestratorConfig};
use kaya_ai::{ModelClient, OpenAiChatClient, OpenAiChatConfig};
use kaya_runtime::{
    AgentRuntime, PresenceConfig, PresenceRegistry, ReplyQueue, RuntimeConfig, TransportSink,
};
use kaya_transport::{
    normalize_jid, run_connection, ConnectionConfig, ConnectionState, CredentialStore, Transport,
    WsTransport,
};
use tokio::sync::{mpsc, watch};

use cli_args::Cli;
use secrets::Secrets;

/// Exit code a supervisor treats as "start me again".
const RESTART_EXIT_CODE: i32 = 65;

/// Lifecycle control for shutdown/restart actions: both stop the process,
/// restart additionally asks the supervisor for a relaunch via the exit code.
struct ProcessHost {
    shutdown_tx: Arc<watch::Sender<bool>>,
    restart_requested: Arc<AtomicBool>,
}

#[async_trait]
impl HostControl for ProcessHost {
    async fn shutdown(&self, reason: &str) {
        println!("shutdown requested: {reason}");
        let _ = self.shutdown_tx.send(true);
    }

    async fn restart(&self, reason: &str) {
        println!("restart requested: {reason}");
        self.restart_requested.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let secrets = Secrets::load(&cli.secrets)?;

    let instructions = secrets.instructions.clone().unwrap_or_else(|| {
        instructions::render_default_instructions(&secrets.agent_name, &secrets.owner_name)
    });
    let model: Arc<dyn ModelClient> = Arc::new(OpenAiChatClient::new(OpenAiChatConfig {
        api_base: cli.api_base.clone(),
        api_key: cli.api_key.clone().unwrap_or_default(),
        model: cli.model.clone(),
        instructions,
        request_timeout_ms: cli.request_timeout_ms,
        max_retries: cli.max_retries,
    })?);

    let (ws_handle, outbound_rx) = WsTransport::channel();
    let transport: Arc<dyn Transport> = Arc::new(ws_handle);
    let store = Arc::new(CredentialStore::new(&cli.auth_dir));
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let queue = ReplyQueue::new();
    let presence = PresenceRegistry::new(transport.clone(), PresenceConfig::default());
    let sink = Arc::new(TransportSink::new(transport.clone()));
    let restart_requested = Arc::new(AtomicBool::new(false));
    let host = Arc::new(ProcessHost {
        shutdown_tx: shutdown_tx.clone(),
        restart_requested: restart_requested.clone(),
    });

    let registry = build_action_registry(
        ActionSetConfig {
            contacts: secrets.contacts.clone(),
            execute_timeout: Duration::from_millis(cli.execute_timeout_ms),
            download_timeout: Duration::from_millis(cli.download_timeout_ms),
            ..ActionSetConfig::default()
        },
        sink.clone(),
        host,
    )?;
    let policy = ActionPolicy::new(
        secrets.resolve_safe_actions()?,
        secrets.normalized_authorized_users(),
        secrets.owner_name.as_str(),
    );
    let orchestrator = Arc::new(Orchestrator::new(
        registry,
        policy,
        model.clone(),
        sink,
        OrchestratorConfig {
            max_feedback_hops: cli.max_feedback_hops,
        },
    ));

    let runtime = AgentRuntime::new(
        RuntimeConfig {
            agent_jid: normalize_jid(&secrets.agent_jid),
            agent_name: secrets.agent_name.clone(),
        },
        transport,
        queue,
        presence,
        model,
        orchestrator,
    );
    tokio::spawn(runtime.run(inbound_rx));
    tokio::spawn(log_connection_states(state_rx));

    println!(
        "kaya starting as {} ({}), model {}, bridge {}",
        secrets.agent_name, secrets.agent_jid, cli.model, cli.gateway_url
    );

    let connection_config = ConnectionConfig {
        url: cli.gateway_url.clone(),
        handshake_timeout: Duration::from_millis(cli.handshake_timeout_ms),
        reconnect_delay: Duration::from_millis(cli.reconnect_delay_ms),
        on_pairing: Some(Arc::new(|challenge| {
            println!("pairing challenge: {challenge}");
        })),
    };
    let mut connection = tokio::spawn(run_connection(
        connection_config,
        store,
        inbound_tx,
        outbound_rx,
        state_tx,
        shutdown_rx,
    ));

    tokio::select! {
        result = &mut connection => {
            result.context("connection task panicked")??;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            println!("shutdown signal received");
            let _ = shutdown_tx.send(true);
            connection.await.context("connection task panicked")??;
        }
    }

    if restart_requested.load(Ordering::SeqCst) {
        println!("exiting for restart");
        std::process::exit(RESTART_EXIT_CODE);
    }
    println!("kaya stopped");
    Ok(())
}

async fn log_connection_states(mut state_rx: watch::Receiver<ConnectionState>) {
    while state_rx.changed().await.is_ok() {
        let state = *state_rx.borrow();
        match state {
            ConnectionState::Connecting => println!("connecting to the messaging bridge"),
            ConnectionState::Open => println!("session open"),
            ConnectionState::ClosedRetryable => println!("session closed; will reconnect"),
            ConnectionState::ClosedTerminal => {
                println!("logged out by the remote end; credentials purged, pair again on next start");
            }
        }
    }
}
