use chrono::Local;
use clap::Parser;
use log::{error, info, warn};
use std::sync::Arc;
use supervision_signal::calls::{CallManagerConfig, CallOrchestrator};
use supervision_signal::config::ClientConfig;
use supervision_signal::connection::{ConnectionManager, ConnectionState};
use supervision_signal::credentials::StaticCredentials;
use supervision_signal::rest::{ApiClient, Role};
use supervision_signal::transport::TokioWebSocketTransportFactory;
use supervision_signal::types::call::Participant;
use supervision_signal::types::events::{Event, StreamFilter};
use supervision_signal_ureq_http_client::UreqHttpClient;

// Demo client: connects, logs every inbound event and call phase change, and
// optionally places one call.
//
// Usage:
//   cargo run -- --token <jwt> --user-id <id>
//   cargo run -- --token <jwt> --user-id <id> --call u42 --name Alice --supervision sup-7

#[derive(Parser)]
#[command(name = "supervision-signal")]
#[command(about = "Supervision call-signaling client")]
struct Cli {
    /// JSON config file; flags below override its values
    #[arg(short, long)]
    config: Option<String>,

    /// Signaling server origin, e.g. ws://127.0.0.1:3001
    #[arg(short, long)]
    server: Option<String>,

    /// REST API base URL
    #[arg(long)]
    api: Option<String>,

    #[arg(short, long, default_value = "")]
    token: String,

    #[arg(short, long, default_value = "")]
    user_id: String,

    /// Counterpart user id to call once connected
    #[arg(long)]
    call: Option<String>,

    /// Display name of the counterpart
    #[arg(long, default_value = "")]
    name: String,

    #[arg(long, requires = "call")]
    supervision: Option<String>,

    /// Load supervision windows from the API as a supervisor
    #[arg(long)]
    supervisor: bool,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ClientConfig::from_json_file(path)?,
        None => ClientConfig::default(),
    };
    if let Some(server) = cli.server.clone() {
        config.server_url = server;
    }
    if let Some(api) = cli.api.clone() {
        config.api_base_url = api;
    }
    config.validate()?;

    let connection = ConnectionManager::new(
        config.clone(),
        Arc::new(StaticCredentials::new(cli.token.clone(), cli.user_id.clone())),
        Arc::new(TokioWebSocketTransportFactory::new()),
    );
    let orchestrator =
        CallOrchestrator::new(connection.clone(), CallManagerConfig::from(&config));

    connection.subscribe(
        "log",
        StreamFilter::All,
        Arc::new(|event: &Event| match event {
            Event::Message(message) => info!("<- {:?}", message.payload),
            Event::Unknown(unknown) => info!("<- unknown '{}': {}", unknown.message_type, unknown.raw),
        }),
    );

    if !cli.token.is_empty() {
        let api = ApiClient::new(
            Arc::new(UreqHttpClient::new()),
            config.api_base_url.clone(),
            cli.token.clone(),
        );
        let role = if cli.supervisor { Role::Supervisor } else { Role::Student };
        match api.fetch_supervision_windows(role).await {
            Ok(windows) => {
                info!("Loaded {} supervision windows", windows.len());
                orchestrator.set_supervision_windows(windows);
            }
            Err(e) => warn!("Could not load supervision windows: {e:#}"),
        }
    }

    let mut errors = connection.errors();
    tokio::spawn(async move {
        while let Ok(err) = errors.recv().await {
            warn!("Connection error: {err}");
        }
    });

    let mut snapshots = orchestrator.subscribe();
    tokio::spawn(async move {
        let mut last_phase = "";
        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow_and_update().clone();
            match snapshot {
                Some(s) if s.phase.name() != last_phase => {
                    last_phase = s.phase.name();
                    info!("Call {} is {} ({})", s.call_id, last_phase, s.elapsed_display());
                }
                Some(_) => {}
                None => last_phase = "",
            }
        }
    });

    connection.connect();

    if let Some(counterpart) = cli.call.as_deref() {
        let mut state = connection.subscribe_state();
        state.wait_for(|s| *s == ConnectionState::Open).await?;
        let supervision = cli.supervision.as_deref().unwrap_or("adhoc");
        let student = Participant::new(counterpart, &cli.name);
        match orchestrator.initiate_call(student, supervision) {
            Ok(call_id) => info!("Placed call {call_id}"),
            Err(e) => error!("Could not place call: {e}"),
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    if let Some(current) = orchestrator.current().filter(|s| s.phase.is_live()) {
        if let Err(e) = orchestrator.hang_up(&current.call_id) {
            warn!("Hang-up on shutdown failed: {e}");
        }
        // Give the writer a moment to flush the last frame.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
    connection.close();
    Ok(())
}
