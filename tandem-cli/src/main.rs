use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tandem_client::{
    CallApi, CallContext, CallSession, CallState, ClientConfig, SampleTrackSource, SessionDeps,
    SignalingHub, TurnConfigCache, WebRtcConnector,
};
use tandem_core::{CallId, PeerId};
use tandem_server::ServerConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tandem")]
#[command(about = "Signaling server and client for two-party calls")]
struct Cli {
    /// Signaling server used by the client commands.
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080")]
    server: String,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the signaling server. Flags override `TANDEM_*` environment variables.
    Serve {
        #[arg(long)]
        bind: Option<SocketAddr>,

        #[arg(long)]
        grace_secs: Option<u64>,

        #[arg(long)]
        heartbeat_secs: Option<u64>,

        #[arg(long)]
        turn_secret: Option<String>,

        #[arg(long = "turn-url")]
        turn_urls: Vec<String>,
    },
    /// Create a call and print its id.
    Create,
    /// Show the server's view of a call.
    Status { call_id: String },
    /// Join a call and stay in it until Ctrl-C.
    Join {
        call_id: String,

        /// Resume as this participant, e.g. `host-1` for the creator.
        #[arg(long)]
        peer_id: Option<String>,

        #[arg(long)]
        video: bool,
    },
    /// End a call on behalf of a participant.
    Leave {
        call_id: String,

        #[arg(long)]
        peer_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let client_config = ClientConfig::new(cli.server.clone());

    match cli.command {
        Commands::Serve {
            bind,
            grace_secs,
            heartbeat_secs,
            turn_secret,
            turn_urls,
        } => {
            let mut config = ServerConfig::from_env();
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            if let Some(secs) = grace_secs {
                config.grace_window = Duration::from_secs(secs);
            }
            if let Some(secs) = heartbeat_secs {
                config.heartbeat_interval = Duration::from_secs(secs);
                config.heartbeat_timeout = Duration::from_secs(secs * 3);
            }
            if turn_secret.is_some() {
                config.turn_secret = turn_secret;
            }
            if !turn_urls.is_empty() {
                config.turn_urls = turn_urls;
            }

            println!(
                "{} {}",
                "🚀 Tandem signaling on".green().bold(),
                config.bind_addr
            );
            info!(
                "Grace window {:?}, heartbeat every {:?}, TURN {}",
                config.grace_window,
                config.heartbeat_interval,
                if config.turn_secret.is_some() { "on" } else { "off" }
            );
            tandem_server::serve(config).await?;
        }

        Commands::Create => {
            let api = CallApi::new(&client_config)?;
            let created = api.create_call().await.context("create call")?;
            println!("{} {}", "✨ Call created:".green().bold(), created.call_id);
            println!("   Host peer id: {}", created.host_peer_id);
            println!(
                "   Join as host:  tandem join {} --peer-id {}",
                created.call_id, created.host_peer_id
            );
            println!("   Join as guest: tandem join {}", created.call_id);
        }

        Commands::Status { call_id } => {
            let api = CallApi::new(&client_config)?;
            let snapshot = api
                .snapshot(&CallId::from(call_id))
                .await
                .context("fetch call")?;
            println!("{} {}", "📞 Call".cyan().bold(), snapshot.call_id);
            println!("   Status:       {:?}", snapshot.status);
            println!("   Participants: {}", snapshot.participants.count);
            println!(
                "   Host: {}  Guest: {}",
                presence(snapshot.host_present),
                presence(snapshot.guest_present)
            );
            println!("   Expires in:   {}s", snapshot.expires_in_secs);
        }

        Commands::Join {
            call_id,
            peer_id,
            video,
        } => join(client_config, CallId::from(call_id), peer_id, video).await?,

        Commands::Leave { call_id, peer_id } => {
            let api = CallApi::new(&client_config)?;
            api.leave(&CallId::from(call_id), &PeerId::from(peer_id))
                .await
                .context("leave call")?;
            println!("{}", "👋 Call ended".green().bold());
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn presence(present: bool) -> ColoredString {
    if present {
        "online".green()
    } else {
        "offline".red()
    }
}

async fn join(
    config: ClientConfig,
    call_id: CallId,
    peer_id: Option<String>,
    video: bool,
) -> Result<()> {
    let api = CallApi::new(&config)?;
    let joined = api
        .join_call(&call_id, peer_id.map(PeerId::from))
        .await
        .context("join call")?;
    println!(
        "{} {} as {} ({})",
        "📞 Joining".cyan().bold(),
        call_id,
        joined.peer_id,
        joined.role
    );

    let session = CallSession::start(
        &config,
        CallContext::joined(&call_id, &joined),
        SessionDeps {
            media: Arc::new(SampleTrackSource { video }),
            connector: Arc::new(WebRtcConnector),
            hub: SignalingHub::new(config.clone()),
            turn: Some(Arc::new(TurnConfigCache::from_config(&config)?)),
        },
    )
    .await?;

    let mut states = session.watch_state();
    print_state(*states.borrow_and_update());
    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                print_state(state);
                if state.is_terminal() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                session.hangup().await;
                print_state(session.state());
                break;
            }
        }
    }

    Ok(())
}

fn print_state(state: CallState) {
    let line = match state {
        CallState::Connecting => "… connecting".yellow(),
        CallState::WaitingForPeer => "… waiting for the other participant".yellow(),
        CallState::Connected => "✅ connected".green().bold(),
        CallState::Reconnecting => "🔄 reconnecting".yellow(),
        CallState::PeerDisconnected => "⏳ other participant dropped, waiting".yellow(),
        CallState::Ended(reason) => format!("👋 call ended: {reason}").green(),
        CallState::Failed(reason) => format!("❌ call failed: {reason}").red().bold(),
    };
    println!("{line}");
}
