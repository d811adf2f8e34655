//! In-memory dialer for driving the client against a scripted peer.

use crate::error::TransportError;
use crate::transport::{Dialer, Link};
use futures_util::future::{self, BoxFuture};
use futures_util::{sink, stream};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tether_core::{CommandKind, Envelope, EnvelopeCodec, PayloadCodec};
use tokio::sync::mpsc;

/// Outcome of one dial.
pub(crate) enum Plan {
    Accept,
    Fail(String),
    /// Never completes.
    Hang,
}

/// Hands the server half of every accepted link to the test.
pub(crate) struct MockDialer {
    plans: Mutex<VecDeque<Plan>>,
    addresses: Mutex<Vec<String>>,
    dials: AtomicUsize,
    peers: mpsc::UnboundedSender<MockPeer>,
}

impl MockDialer {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let dialer = Self {
            plans: Mutex::new(VecDeque::new()),
            addresses: Mutex::new(Vec::new()),
            dials: AtomicUsize::new(0),
            peers,
        };
        (Arc::new(dialer), rx)
    }

    /// Script the next dials. Unscripted dials are accepted.
    pub fn plan(&self, plans: impl IntoIterator<Item = Plan>) {
        self.plans.lock().unwrap().extend(plans);
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn addresses(&self) -> Vec<String> {
        self.addresses.lock().unwrap().clone()
    }
}

impl Dialer for MockDialer {
    fn dial(&self, address: &str) -> BoxFuture<'static, Result<Link, TransportError>> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        self.addresses.lock().unwrap().push(address.to_string());
        let plan = self.plans.lock().unwrap().pop_front().unwrap_or(Plan::Accept);
        match plan {
            Plan::Fail(reason) => Box::pin(future::ready(Err(TransportError::WebSocket(reason)))),
            Plan::Hang => Box::pin(future::pending()),
            Plan::Accept => {
                let (to_peer, inbox) = mpsc::unbounded_channel::<Vec<u8>>();
                let (outbox, from_peer) = mpsc::unbounded_channel();
                let _ = self.peers.send(MockPeer {
                    inbox,
                    outbox: Some(outbox),
                });

                let sink = sink::unfold(to_peer, |to_peer, frame: Vec<u8>| async move {
                    to_peer.send(frame).map_err(|_| TransportError::Closed)?;
                    Ok::<_, TransportError>(to_peer)
                });
                let stream = stream::unfold(from_peer, |mut from_peer| async move {
                    from_peer.recv().await.map(|item| (item, from_peer))
                });
                Box::pin(future::ready(Ok(Link {
                    sink: Box::pin(sink),
                    stream: Box::pin(stream),
                })))
            }
        }
    }
}

/// Server half of an accepted link. Dropping it closes the link.
pub(crate) struct MockPeer {
    inbox: mpsc::UnboundedReceiver<Vec<u8>>,
    outbox: Option<mpsc::UnboundedSender<Result<Vec<u8>, TransportError>>>,
}

impl MockPeer {
    /// Next frame from the client, `None` once the client closed the link.
    pub async fn recv_raw(&mut self) -> Option<Vec<u8>> {
        self.inbox.recv().await
    }

    pub async fn recv(&mut self) -> Option<Envelope> {
        let bytes = self.recv_raw().await?;
        Some(Envelope::from_bytes(&bytes).unwrap())
    }

    /// Next application frame, skipping heartbeats.
    pub async fn recv_request(&mut self) -> Envelope {
        loop {
            let envelope = self.recv().await.expect("link closed");
            if !envelope.is_heartbeat() {
                return envelope;
            }
        }
    }

    /// Next heartbeat frame, skipping application frames.
    pub async fn recv_heartbeat(&mut self) -> Envelope {
        loop {
            let envelope = self.recv().await.expect("link closed");
            if envelope.is_heartbeat() {
                return envelope;
            }
        }
    }

    pub fn push_raw(&self, bytes: Vec<u8>) {
        if let Some(outbox) = &self.outbox {
            let _ = outbox.send(Ok(bytes));
        }
    }

    pub fn push(&self, envelope: Envelope) {
        self.push_raw(envelope.to_bytes());
    }

    /// Send an application frame with an encoded payload.
    pub fn push_message(
        &self,
        codec: &EnvelopeCodec,
        route_id: i32,
        seq: u32,
        msg_name: &str,
        payload: serde_json::Value,
    ) {
        let body = codec.payloads().encode(msg_name, &payload).unwrap();
        self.push(Envelope::request(CommandKind::Application, route_id, seq, body));
    }

    pub fn fail(&self, reason: &str) {
        if let Some(outbox) = &self.outbox {
            let _ = outbox.send(Err(TransportError::WebSocket(reason.to_string())));
        }
    }

    /// Close the peer's side; the client sees the stream end.
    pub fn close(&mut self) {
        self.outbox = None;
    }
}

/// Wraps a payload codec and counts decode calls.
pub(crate) struct CountingCodec {
    pub inner: Arc<dyn PayloadCodec>,
    pub decodes: AtomicUsize,
}

impl PayloadCodec for CountingCodec {
    fn encode(
        &self,
        type_name: &str,
        payload: &serde_json::Value,
    ) -> Result<Vec<u8>, tether_core::CodecError> {
        self.inner.encode(type_name, payload)
    }

    fn decode(
        &self,
        type_name: &str,
        bytes: &[u8],
    ) -> Result<serde_json::Value, tether_core::CodecError> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        self.inner.decode(type_name, bytes)
    }

    fn splits_wide_integers(&self) -> bool {
        self.inner.splits_wide_integers()
    }
}
