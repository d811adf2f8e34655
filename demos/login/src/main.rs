//! Login demo.
//!
//! Runs a tiny peer and drives the client against it:
//!
//!   cargo run -p tether-demo-login -- serve --port 8001
//!   cargo run -p tether-demo-login -- login --account alice --say "hello"
//!
//! Run `login` twice with `--linger 30` to watch chat pushes arrive and the
//! heartbeat keep the link alive.

mod protocol;
mod server;

use clap::{Parser, Subcommand};
use protocol::{ChatPush, LoginResp};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tether_client::{Client, ClientConfig, ClientEvent};
use tether_core::{EnvelopeCodec, ProtoConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tether-login", version, about = "Tether login demo")]
struct Cli {
    /// Protocol descriptor (JSON).
    #[arg(long, env = "TETHER_PROTO", default_value = concat!(env!("CARGO_MANIFEST_DIR"), "/proto.json"))]
    proto: PathBuf,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Accept clients and answer their requests.
    Serve {
        #[arg(long, default_value_t = 8001)]
        port: u16,
    },
    /// Connect, log in and optionally say something.
    Login {
        #[arg(long, env = "TETHER_ADDR", default_value = "ws://127.0.0.1:8001")]
        address: String,
        #[arg(long)]
        account: String,
        /// Client configuration (TOML).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Chat line to send after logging in.
        #[arg(long)]
        say: Option<String>,
        /// Seconds to stay connected before closing.
        #[arg(long, default_value_t = 0)]
        linger: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("tether_demo_login=info".parse()?)
                .add_directive("tether_client=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let proto = ProtoConfig::load(&cli.proto)?;
    let codec = EnvelopeCodec::from_config(&proto)?;
    tracing::info!("Loaded {} routes from {}", codec.routes().len(), cli.proto.display());

    match cli.mode {
        Mode::Serve { port } => {
            let addr: SocketAddr = ([127, 0, 0, 1], port).into();
            server::run(addr, codec).await
        }
        Mode::Login {
            address,
            account,
            config,
            say,
            linger,
        } => {
            let config = match config {
                Some(path) => ClientConfig::load(path)?,
                None => ClientConfig::default(),
            };
            login(codec, config, address, account, say, Duration::from_secs(linger)).await
        }
    }
}

async fn login(
    codec: EnvelopeCodec,
    config: ClientConfig,
    address: String,
    account: String,
    say: Option<String>,
    linger: Duration,
) -> anyhow::Result<()> {
    tracing::info!("tether-client {}", tether_client::VERSION);
    let client = Client::new(config)?;
    client.set_proto_config(codec);

    let mut events = client.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ClientEvent::Disconnected {
                    reason, will_retry, ..
                } => tracing::warn!("Disconnected: {} (will retry: {})", reason, will_retry),
                ClientEvent::ProtocolTimeout { msg_name, .. } => {
                    tracing::warn!("{} is taking a while", msg_name)
                }
                other => tracing::debug!("{:?}", other),
            }
        }
    });

    client.on_notification("ChatPush", 0, |_, response| match response.data_as::<ChatPush>() {
        Ok(push) => tracing::info!("<{}> {}", push.from, push.text),
        Err(e) => tracing::warn!("Unreadable chat push: {}", e),
    });

    client.connect(address).await?;
    let response = client
        .send("LoginReq", serde_json::json!({ "accountId": account }))
        .await?;
    if !response.is_success() {
        anyhow::bail!(
            "login rejected ({}): {}",
            response.code,
            response.diagnostic.unwrap_or_default()
        );
    }
    let login: LoginResp = response.data_as()?;
    tracing::info!("Logged in as user {}", login.user_id);

    if let Some(text) = say {
        client
            .send("ChatReq", serde_json::json!({ "text": text }))
            .await?;
    }

    tokio::time::sleep(linger).await;
    tracing::info!("Server clock skew: {} ms", client.ping());
    client.close();
    Ok(())
}
