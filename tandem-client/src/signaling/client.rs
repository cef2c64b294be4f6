use crate::config::ClientConfig;
use crate::error::SignalingError;
use crate::signaling::{Backoff, SignalingEvents, SignalingOutput, dispatch};
use futures::{SinkExt, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tandem_core::{CallId, Envelope, JoinPayload, MessageType, PeerId, StatePayload};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use url::Url;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Subscribers plus the last `join`/`state` seen, so late subscribers start
/// from the current picture. Every delivery happens under this lock, which
/// keeps replay and live events in one order. Handlers must not subscribe
/// from inside a callback.
#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: HashMap<u64, Arc<dyn SignalingEvents>>,
    last_join: Option<JoinPayload>,
    last_state: Option<StatePayload>,
}

struct Shared {
    registry: Mutex<Registry>,
    open: AtomicBool,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn each(&self, f: impl Fn(&dyn SignalingEvents)) {
        let registry = self.registry();
        for handler in registry.subscribers.values() {
            f(handler.as_ref());
        }
    }

    fn set_open(&self, reconnected: bool) {
        let registry = self.registry();
        self.open.store(true, Ordering::SeqCst);
        for handler in registry.subscribers.values() {
            if reconnected {
                handler.on_reconnected();
            } else {
                handler.on_open();
            }
        }
    }

    fn deliver(&self, envelope: &Envelope) {
        let mut registry = self.registry();
        match MessageType::parse(&envelope.kind) {
            Some(MessageType::Join) => registry.last_join = envelope.decode().ok(),
            Some(MessageType::State) => registry.last_state = envelope.decode().ok(),
            _ => {}
        }
        for handler in registry.subscribers.values() {
            dispatch(handler.as_ref(), envelope);
        }
    }
}

/// One WebSocket per `(call, peer)`. Dropping the last handle stops the socket.
pub(crate) struct Connection {
    call_id: CallId,
    peer_id: PeerId,
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<Envelope>,
    shutdown: watch::Sender<bool>,
}

impl Connection {
    pub(crate) fn spawn(
        config: &ClientConfig,
        call_id: &CallId,
        peer_id: &PeerId,
    ) -> Result<Arc<Self>, SignalingError> {
        let url = config.ws_url(call_id, peer_id)?;
        let shared = Arc::new(Shared {
            registry: Mutex::new(Registry::default()),
            open: AtomicBool::new(false),
        });
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let task = ConnectionTask {
            url,
            shared: shared.clone(),
            backoff: Backoff::new(config.backoff_base, config.backoff_cap),
            idle_timeout: config.socket_idle_timeout,
            outbound_rx,
            shutdown: shutdown_rx,
            carry: VecDeque::new(),
        };
        tokio::spawn(task.run());

        Ok(Arc::new(Self {
            call_id: call_id.clone(),
            peer_id: peer_id.clone(),
            shared,
            outbound,
            shutdown,
        }))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Handle to a shared signaling socket.
#[derive(Clone)]
pub struct SignalingClient {
    connection: Arc<Connection>,
}

impl SignalingClient {
    pub(crate) fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }

    pub fn shares_socket_with(&self, other: &SignalingClient) -> bool {
        Arc::ptr_eq(&self.connection, &other.connection)
    }

    pub fn call_id(&self) -> &CallId {
        &self.connection.call_id
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.connection.peer_id
    }

    pub fn is_open(&self) -> bool {
        self.connection.shared.open.load(Ordering::SeqCst)
    }

    /// Registers `handler`. If the socket is already open the handler first
    /// receives `on_open` and the last `join`/`state`.
    pub fn subscribe(&self, handler: Arc<dyn SignalingEvents>) -> Subscription {
        let mut registry = self.connection.shared.registry();
        registry.next_id += 1;
        let id = registry.next_id;

        if self.is_open() {
            handler.on_open();
        }
        if let Some(join) = &registry.last_join {
            handler.on_join(join);
        }
        if let Some(state) = &registry.last_state {
            handler.on_state(state);
        }
        registry.subscribers.insert(id, handler);

        Subscription {
            connection: self.connection.clone(),
            id,
        }
    }

    /// Stops the socket after flushing whatever is already queued.
    pub fn close(&self) {
        let _ = self.connection.shutdown.send(true);
    }
}

impl SignalingOutput for SignalingClient {
    fn is_ready(&self) -> bool {
        self.is_open()
    }

    /// Offers, answers, candidates and renegotiation requests are dropped while
    /// the socket is down; anything else waits for the next socket.
    fn send(&self, envelope: Envelope) -> Result<(), SignalingError> {
        let time_sensitive = envelope
            .message_type()
            .is_ok_and(MessageType::is_time_sensitive);
        if time_sensitive && !self.is_open() {
            warn!("Dropping {} while signaling is down", envelope.kind);
            return Err(SignalingError::NotOpen);
        }

        self.connection
            .outbound
            .send(envelope)
            .map_err(|_| SignalingError::Closed)
    }
}

/// Keeps a handler registered. Dropping it unsubscribes.
pub struct Subscription {
    connection: Arc<Connection>,
    id: u64,
}

impl Subscription {
    pub fn client(&self) -> SignalingClient {
        SignalingClient::new(self.connection.clone())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.connection.shared.registry().subscribers.remove(&self.id);
    }
}

enum PumpEnd {
    Shutdown,
    /// Server closed normally: the call is over or this socket was superseded.
    ServerClosed,
    Lost(String),
}

struct ConnectionTask {
    url: Url,
    shared: Arc<Shared>,
    backoff: Backoff,
    idle_timeout: Duration,
    outbound_rx: mpsc::UnboundedReceiver<Envelope>,
    shutdown: watch::Receiver<bool>,
    /// Non time-sensitive envelopes that still need a socket.
    carry: VecDeque<Envelope>,
}

impl ConnectionTask {
    async fn run(mut self) {
        let mut attempt: u32 = 0;
        let mut opened_before = false;

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            match connect_async(self.url.as_str()).await {
                Ok((socket, _)) => {
                    attempt = 0;
                    if opened_before {
                        info!("Signaling reconnected to {}", self.url);
                    } else {
                        info!("Signaling connected to {}", self.url);
                    }
                    self.shared.set_open(opened_before);
                    opened_before = true;

                    let end = self.pump(socket).await;
                    self.shared.open.store(false, Ordering::SeqCst);

                    match end {
                        PumpEnd::Shutdown => break,
                        PumpEnd::ServerClosed => {
                            info!("Signaling closed by server");
                            break;
                        }
                        PumpEnd::Lost(reason) => {
                            warn!("Signaling connection lost: {}", reason);
                        }
                    }
                }
                Err(WsError::Http(response)) if response.status().is_client_error() => {
                    let error = SignalingError::Rejected(response.status().as_u16());
                    warn!("{}", error);
                    self.shared.each(|h| h.on_error(&error));
                    break;
                }
                Err(e) => debug!("Signaling connect to {} failed: {}", self.url, e),
            }

            self.drop_stale_outbound();

            attempt += 1;
            let delay = self.backoff.delay(attempt);
            info!("Signaling reconnect #{} in {:?}", attempt, delay);
            self.shared.each(|h| h.on_reconnecting(attempt, delay));

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => break,
            }
        }

        self.shared.open.store(false, Ordering::SeqCst);
        self.shared.each(|h| h.on_close());
        debug!("Signaling task for {} finished", self.url);
    }

    async fn pump(&mut self, socket: Socket) -> PumpEnd {
        let (mut sink, mut source) = socket.split();

        while let Some(envelope) = self.carry.pop_front() {
            if let Err(reason) = send_envelope(&mut sink, &envelope).await {
                self.carry.push_front(envelope);
                return PumpEnd::Lost(reason);
            }
        }

        loop {
            tokio::select! {
                biased;

                out = self.outbound_rx.recv() => {
                    let Some(envelope) = out else {
                        let _ = sink.send(Message::Close(None)).await;
                        return PumpEnd::Shutdown;
                    };
                    if let Err(reason) = send_envelope(&mut sink, &envelope).await {
                        self.carry.push_back(envelope);
                        return PumpEnd::Lost(reason);
                    }
                }

                _ = self.shutdown.changed() => {
                    while let Ok(envelope) = self.outbound_rx.try_recv() {
                        if send_envelope(&mut sink, &envelope).await.is_err() {
                            break;
                        }
                    }
                    let _ = sink.send(Message::Close(None)).await;
                    return PumpEnd::Shutdown;
                }

                frame = tokio::time::timeout(self.idle_timeout, source.next()) => {
                    let frame = match frame {
                        Ok(frame) => frame,
                        Err(_) => return PumpEnd::Lost("idle timeout".to_owned()),
                    };
                    match frame {
                        Some(Ok(Message::Text(text))) => match Envelope::from_json(text.as_str()) {
                            Ok(envelope) => self.shared.deliver(&envelope),
                            Err(e) => warn!("Ignoring malformed signaling frame: {}", e),
                        },
                        Some(Ok(Message::Close(frame))) => {
                            let terminal = frame.as_ref().is_some_and(|f| {
                                matches!(f.code, CloseCode::Normal | CloseCode::Policy)
                            });
                            return if terminal {
                                PumpEnd::ServerClosed
                            } else {
                                PumpEnd::Lost(format!("close frame {frame:?}"))
                            };
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return PumpEnd::Lost(e.to_string()),
                        None => return PumpEnd::Lost("stream ended".to_owned()),
                    }
                }
            }
        }
    }

    /// After a lost socket, queued negotiation messages are stale; the rest is
    /// kept for the next socket.
    fn drop_stale_outbound(&mut self) {
        while let Ok(envelope) = self.outbound_rx.try_recv() {
            self.carry.push_back(envelope);
        }
        self.carry.retain(|envelope| {
            let stale = envelope
                .message_type()
                .is_ok_and(MessageType::is_time_sensitive);
            if stale {
                debug!("Discarding queued {} after disconnect", envelope.kind);
            }
            !stale
        });
    }
}

async fn send_envelope<S>(sink: &mut S, envelope: &Envelope) -> Result<(), String>
where
    S: SinkExt<Message, Error = WsError> + Unpin,
{
    let text = envelope.to_json().map_err(|e| e.to_string())?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|e| e.to_string())
}
