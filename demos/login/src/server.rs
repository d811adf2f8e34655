//! Demo peer: answers heartbeats, logins and chat lines.

use crate::protocol::{ChatPush, ChatReq, LoginReq, LoginResp, PingReq, PingResp};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tether_core::{Envelope, EnvelopeCodec, HEARTBEAT_REQUEST};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, broadcast};
use tokio_tungstenite::tungstenite::Message;

/// Shared server state.
struct ServerState {
    users: HashMap<String, i64>, // account -> user id
    next_user_id: i64,
}

impl ServerState {
    fn new() -> Self {
        Self {
            users: HashMap::new(),
            next_user_id: 1000,
        }
    }

    fn user_id(&mut self, account: &str) -> i64 {
        if let Some(id) = self.users.get(account) {
            return *id;
        }
        let id = self.next_user_id;
        self.next_user_id += 1;
        self.users.insert(account.to_string(), id);
        id
    }
}

type SharedState = Arc<RwLock<ServerState>>;

/// A frame for every connection except `origin`.
type Push = (SocketAddr, Vec<u8>);

/// What one connection knows about its peer.
#[derive(Default)]
struct Session {
    account: Option<String>,
}

/// Reply to one request.
struct Answer {
    status: i32,
    diagnostic: String,
    body: serde_json::Value,
}

impl Answer {
    fn ok(body: impl Serialize) -> anyhow::Result<Self> {
        Ok(Self {
            status: 0,
            diagnostic: String::new(),
            body: serde_json::to_value(body)?,
        })
    }

    fn rejected(status: i32, diagnostic: &str) -> Self {
        Self {
            status,
            diagnostic: diagnostic.to_string(),
            body: serde_json::json!({}),
        }
    }
}

pub async fn run(addr: SocketAddr, codec: EnvelopeCodec) -> anyhow::Result<()> {
    let state = Arc::new(RwLock::new(ServerState::new()));
    let codec = Arc::new(codec);
    let (broadcast_tx, _) = broadcast::channel::<Push>(100);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on ws://{}", addr);

    loop {
        let (stream, client_addr) = listener.accept().await?;
        let state = state.clone();
        let codec = codec.clone();
        let broadcast_tx = broadcast_tx.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, client_addr, state, codec, broadcast_tx).await {
                tracing::warn!("Connection error from {}: {}", client_addr, e);
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: SharedState,
    codec: Arc<EnvelopeCodec>,
    broadcast_tx: broadcast::Sender<Push>,
) -> anyhow::Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut stream) = ws.split();
    let mut broadcast_rx = broadcast_tx.subscribe();
    let mut session = Session::default();

    tracing::debug!("New connection from {}", addr);

    loop {
        tokio::select! {
            // Incoming frame from the client
            msg = stream.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        tracing::debug!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                };
                let Message::Binary(bytes) = msg else {
                    continue;
                };
                let envelope = match Envelope::from_bytes(&bytes) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        tracing::warn!("Invalid frame from {}: {}", addr, e);
                        continue;
                    }
                };

                match respond(&codec, &state, &mut session, &envelope, addr, &broadcast_tx).await {
                    Ok(Some(reply)) => sink.send(Message::Binary(reply.into())).await?,
                    Ok(None) => {}
                    Err(e) => tracing::warn!("Bad request from {}: {}", addr, e),
                }
            }

            // Push from another connection
            push = broadcast_rx.recv() => {
                if let Ok((origin, frame)) = push
                    && origin != addr
                {
                    sink.send(Message::Binary(frame.into())).await?;
                }
            }
        }
    }

    if let Some(account) = session.account {
        tracing::info!("{} logged out", account);
    }
    tracing::debug!("Connection closed: {}", addr);
    Ok(())
}

async fn respond(
    codec: &EnvelopeCodec,
    state: &SharedState,
    session: &mut Session,
    envelope: &Envelope,
    addr: SocketAddr,
    broadcast_tx: &broadcast::Sender<Push>,
) -> anyhow::Result<Option<Vec<u8>>> {
    let route = codec.resolve_route(envelope)?;
    let request = codec.decode_payload(route.request_type, &envelope.payload)?;

    let answer = match route.request_type {
        HEARTBEAT_REQUEST => {
            let ping: PingReq = serde_json::from_value(request)?;
            Answer::ok(PingResp {
                client_time: ping.client_time,
                server_time: now_millis(),
            })?
        }
        "LoginReq" => {
            let login: LoginReq = serde_json::from_value(request)?;
            if login.account_id.is_empty() {
                Answer::rejected(1, "account id required")
            } else {
                let user_id = state.write().await.user_id(&login.account_id);
                tracing::info!("{} logged in as {}", login.account_id, user_id);
                session.account = Some(login.account_id);
                Answer::ok(LoginResp { user_id })?
            }
        }
        "ChatReq" => {
            let chat: ChatReq = serde_json::from_value(request)?;
            match &session.account {
                None => Answer::rejected(2, "login first"),
                Some(account) => {
                    let push = ChatPush {
                        from: account.clone(),
                        text: chat.text,
                        sent_at: now_millis(),
                    };
                    let answer = Answer::ok(&push)?;
                    // Everyone else gets it as an unsolicited push.
                    let frame = encode(codec, envelope, route.response_type, 0, &answer)?;
                    let _ = broadcast_tx.send((addr, frame));
                    answer
                }
            }
        }
        other => {
            tracing::warn!("No handler for {}", other);
            return Ok(None);
        }
    };

    let reply = encode(codec, envelope, route.response_type, envelope.sequence_id, &answer)?;
    Ok(Some(reply))
}

fn encode(
    codec: &EnvelopeCodec,
    request: &Envelope,
    response_type: &str,
    sequence_id: u32,
    answer: &Answer,
) -> anyhow::Result<Vec<u8>> {
    let payload = codec.payloads().encode(response_type, &answer.body)?;
    let envelope = Envelope {
        command_kind: request.command_kind,
        route_id: request.route_id,
        status: answer.status,
        diagnostic: answer.diagnostic.clone(),
        payload,
        sequence_id,
        ..Default::default()
    };
    Ok(envelope.to_bytes())
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
