//! One physical link at a time, with silent dial retries.
//!
//! Every dial gets a fresh link id. The link task tags everything it reports
//! with that id, so events from a superseded or closed link are dropped in
//! [`Transport::handle`] instead of reaching the client.

use crate::error::TransportError;
use futures_util::future::{self, BoxFuture};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::Connector;
use tokio_tungstenite::tungstenite::{self, Message};

/// Outbound half of a link.
pub type FrameSink = Pin<Box<dyn Sink<Vec<u8>, Error = TransportError> + Send>>;
/// Inbound half of a link. The stream ending means the peer closed.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, TransportError>> + Send>>;

/// An open binary duplex connection.
pub struct Link {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens links to an address.
pub trait Dialer: Send + Sync {
    fn dial(&self, address: &str) -> BoxFuture<'static, Result<Link, TransportError>>;
}

/// WebSocket dialer. `wss://` addresses use the platform trust store unless
/// a CA file is given.
pub struct WsDialer {
    connector: Option<Connector>,
}

impl WsDialer {
    pub fn new(ca_cert: Option<&Path>) -> Result<Self, TransportError> {
        let connector = match ca_cert {
            Some(path) => Some(Connector::Rustls(Arc::new(trust_config(path)?))),
            None => None,
        };
        Ok(Self { connector })
    }
}

fn trust_config(path: &Path) -> Result<rustls::ClientConfig, TransportError> {
    let certificate = |e: &dyn std::fmt::Display| {
        TransportError::Certificate(format!("{}: {e}", path.display()))
    };
    let pem = std::fs::read(path).map_err(|e| certificate(&e))?;
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
        let cert = cert.map_err(|e| certificate(&e))?;
        roots.add(cert).map_err(|e| certificate(&e))?;
    }
    if roots.is_empty() {
        return Err(certificate(&"no certificates found"));
    }
    Ok(rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth())
}

fn ws_error(e: tungstenite::Error) -> TransportError {
    TransportError::WebSocket(e.to_string())
}

impl Dialer for WsDialer {
    fn dial(&self, address: &str) -> BoxFuture<'static, Result<Link, TransportError>> {
        let address = address.to_string();
        let connector = self.connector.clone();
        Box::pin(async move {
            let (ws, _response) =
                tokio_tungstenite::connect_async_tls_with_config(address, None, true, connector)
                    .await
                    .map_err(ws_error)?;
            let (sink, stream) = ws.split();

            let sink = sink
                .with(|frame: Vec<u8>| {
                    future::ready(Ok::<_, tungstenite::Error>(Message::Binary(frame.into())))
                })
                .sink_map_err(ws_error);
            // Binary mode only; text and control frames are not payloads.
            let stream = stream.filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Binary(bytes)) => Some(Ok(bytes.to_vec())),
                    Ok(other) => {
                        tracing::trace!("ignoring non-binary frame: {:?}", other);
                        None
                    }
                    Err(e) => Some(Err(ws_error(e))),
                })
            });

            Ok(Link {
                sink: Box::pin(sink),
                stream: Box::pin(stream),
            })
        })
    }
}

/// Raw report from a link task or the retry timer.
#[derive(Debug)]
pub(crate) struct RawEvent {
    link_id: u64,
    kind: RawKind,
}

#[derive(Debug)]
enum RawKind {
    Open,
    Message(Vec<u8>),
    Closed,
    Failed(TransportError),
    RetryDue,
}

/// What the transport surfaces to its owner.
#[derive(Debug, PartialEq)]
pub(crate) enum TransportEvent {
    Open,
    Message(Vec<u8>),
    /// The peer closed the link and no dial retries are left.
    Close,
    /// The link failed and no dial retries are left.
    Error(TransportError),
}

pub(crate) struct Transport {
    dialer: Arc<dyn Dialer>,
    events: mpsc::UnboundedSender<RawEvent>,
    address: Option<String>,
    link_id: u64,
    /// Whether events tagged with `link_id` are still wanted.
    live: bool,
    open: bool,
    outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
    retries_left: u32,
    retry_interval: Duration,
    retry_timer: Option<JoinHandle<()>>,
}

impl Transport {
    pub fn new(dialer: Arc<dyn Dialer>) -> (Self, mpsc::UnboundedReceiver<RawEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            dialer,
            events,
            address: None,
            link_id: 0,
            live: false,
            open: false,
            outbound: None,
            retries_left: 0,
            retry_interval: Duration::ZERO,
            retry_timer: None,
        };
        (transport, rx)
    }

    /// Close any current link silently and dial `address`.
    pub fn connect(&mut self, address: &str, retries: u32, retry_interval: Duration) {
        self.close();
        self.address = Some(address.to_string());
        self.retries_left = retries;
        self.retry_interval = retry_interval;
        self.dial();
    }

    fn dial(&mut self) {
        let Some(address) = self.address.clone() else {
            return;
        };
        self.link_id += 1;
        self.live = true;
        self.open = false;

        let (outbound, rx) = mpsc::unbounded_channel();
        self.outbound = Some(outbound);
        tracing::debug!("link {}: dialing {}", self.link_id, address);
        tokio::spawn(run_link(
            self.link_id,
            self.dialer.dial(&address),
            rx,
            self.events.clone(),
        ));
    }

    /// Filter a raw event, applying the dial retry policy.
    pub fn handle(&mut self, event: RawEvent) -> Option<TransportEvent> {
        if !self.live || event.link_id != self.link_id {
            tracing::trace!("dropping event from stale link {}", event.link_id);
            return None;
        }
        match event.kind {
            RawKind::Open => {
                self.open = true;
                // Once a link is up, losing it is the owner's problem.
                self.retries_left = 0;
                Some(TransportEvent::Open)
            }
            RawKind::Message(bytes) => Some(TransportEvent::Message(bytes)),
            RawKind::Closed => self.lost(TransportEvent::Close),
            RawKind::Failed(e) => self.lost(TransportEvent::Error(e)),
            RawKind::RetryDue => {
                self.retry_timer = None;
                self.dial();
                None
            }
        }
    }

    fn lost(&mut self, event: TransportEvent) -> Option<TransportEvent> {
        self.open = false;
        self.outbound = None;
        if self.retries_left == 0 {
            self.live = false;
            return Some(event);
        }
        self.retries_left -= 1;
        tracing::debug!(
            "link {} lost ({:?}), retrying in {:?} ({} retries left)",
            self.link_id,
            event,
            self.retry_interval,
            self.retries_left
        );
        let events = self.events.clone();
        let link_id = self.link_id;
        let delay = self.retry_interval;
        self.retry_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(RawEvent {
                link_id,
                kind: RawKind::RetryDue,
            });
        }));
        None
    }

    /// Queue a frame on the open link.
    pub fn send(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        if bytes.is_empty() {
            return Err(TransportError::EmptyFrame);
        }
        match &self.outbound {
            Some(outbound) if self.open => outbound.send(bytes).map_err(|_| TransportError::Closed),
            _ => Err(TransportError::Closed),
        }
    }

    /// Cancel pending retries and close the link. Nothing from it is
    /// surfaced afterwards.
    pub fn close(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
        self.outbound = None;
        self.live = false;
        self.open = false;
    }
}

async fn run_link(
    link_id: u64,
    mut dial: BoxFuture<'static, Result<Link, TransportError>>,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    events: mpsc::UnboundedSender<RawEvent>,
) {
    let emit = |kind| {
        let _ = events.send(RawEvent { link_id, kind });
    };

    // Dropping the outbound sender cancels a dial still in progress.
    let dialed = loop {
        tokio::select! {
            dialed = &mut dial => break dialed,
            frame = outbound.recv() => match frame {
                Some(_) => tracing::warn!("link {}: dropping frame queued before open", link_id),
                None => return,
            },
        }
    };
    let Link {
        mut sink,
        mut stream,
    } = match dialed {
        Ok(link) => link,
        Err(e) => {
            emit(RawKind::Failed(e));
            return;
        }
    };
    emit(RawKind::Open);

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(bytes) => {
                    if let Err(e) = sink.send(bytes).await {
                        emit(RawKind::Failed(e));
                        return;
                    }
                }
                None => {
                    let _ = sink.close().await;
                    tracing::debug!("link {} closed locally", link_id);
                    return;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(bytes)) => emit(RawKind::Message(bytes)),
                Some(Err(e)) => {
                    emit(RawKind::Failed(e));
                    return;
                }
                None => {
                    emit(RawKind::Closed);
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockDialer, Plan};

    async fn next(transport: &mut Transport, rx: &mut mpsc::UnboundedReceiver<RawEvent>) -> TransportEvent {
        loop {
            let raw = rx.recv().await.unwrap();
            if let Some(event) = transport.handle(raw) {
                return event;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_dial_failures_then_opens() {
        let (dialer, mut peers) = MockDialer::new();
        dialer.plan([Plan::Fail("refused".into()), Plan::Fail("refused".into())]);
        let (mut transport, mut rx) = Transport::new(dialer.clone());

        transport.connect("ws://test", 2, Duration::from_millis(100));
        assert_eq!(next(&mut transport, &mut rx).await, TransportEvent::Open);
        assert_eq!(dialer.dials(), 3);

        let mut peer = peers.recv().await.unwrap();
        transport.send(vec![1, 2, 3]).unwrap();
        assert_eq!(peer.recv_raw().await, Some(vec![1, 2, 3]));
    }

    #[tokio::test(start_paused = true)]
    async fn surfaces_error_when_budget_is_spent() {
        let (dialer, _peers) = MockDialer::new();
        dialer.plan([Plan::Fail("refused".into()), Plan::Fail("refused".into())]);
        let (mut transport, mut rx) = Transport::new(dialer.clone());

        transport.connect("ws://test", 1, Duration::from_millis(100));
        assert!(matches!(
            next(&mut transport, &mut rx).await,
            TransportEvent::Error(TransportError::WebSocket(_))
        ));
        assert_eq!(dialer.dials(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn open_link_resets_retry_budget() {
        let (dialer, mut peers) = MockDialer::new();
        let (mut transport, mut rx) = Transport::new(dialer.clone());

        transport.connect("ws://test", 3, Duration::from_millis(100));
        assert_eq!(next(&mut transport, &mut rx).await, TransportEvent::Open);

        let mut peer = peers.recv().await.unwrap();
        peer.close();
        assert_eq!(next(&mut transport, &mut rx).await, TransportEvent::Close);
        assert_eq!(dialer.dials(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_link_reports_nothing() {
        let (dialer, mut peers) = MockDialer::new();
        let (mut transport, mut rx) = Transport::new(dialer.clone());

        transport.connect("ws://test", 0, Duration::ZERO);
        assert_eq!(next(&mut transport, &mut rx).await, TransportEvent::Open);
        let mut peer = peers.recv().await.unwrap();

        transport.close();
        assert_eq!(transport.send(vec![1]), Err(TransportError::Closed));
        peer.push_raw(vec![9]);
        // The peer sees the local close.
        assert_eq!(peer.recv_raw().await, None);
        while let Ok(raw) = rx.try_recv() {
            assert_eq!(transport.handle(raw), None);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn empty_frames_are_refused() {
        let (dialer, _peers) = MockDialer::new();
        let (mut transport, mut rx) = Transport::new(dialer);
        transport.connect("ws://test", 0, Duration::ZERO);
        assert_eq!(next(&mut transport, &mut rx).await, TransportEvent::Open);
        assert_eq!(transport.send(Vec::new()), Err(TransportError::EmptyFrame));
    }

    #[test]
    fn missing_ca_file_is_a_certificate_error() {
        let err = WsDialer::new(Some(Path::new("/nonexistent/ca.pem"))).err();
        assert!(matches!(err, Some(TransportError::Certificate(_))));
    }
}
