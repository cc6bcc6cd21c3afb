//! Server network layer: WebSocket transport, run loop, and broadcast tick
//!
//! Transport intake is distributed across tasks (one acceptor, one reader
//! and one writer per connection) but all lifecycle events funnel into a
//! single channel consumed by the run loop, so the session registry is
//! only ever touched from one place. Outbound frames go through per-peer
//! queues; a slow or dead peer never blocks the tick.

use crate::lifecycle::LifecycleHandler;
use crate::registry::{SessionId, SessionRegistry};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::encode_roster;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;

/// Cap on lifecycle events processed per tick. Anything beyond it stays
/// queued for the next tick so a connection storm cannot stall the
/// broadcast cadence.
const MAX_EVENTS_PER_TICK: usize = 1024;

/// Messages sent from connection tasks to the run loop
#[derive(Debug)]
pub enum SessionEvent {
    Connected {
        session_id: SessionId,
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<Message>,
    },
    PayloadReceived {
        session_id: SessionId,
        payload: Vec<u8>,
    },
    Disconnected {
        session_id: SessionId,
    },
    Shutdown,
}

/// Cloneable handle for asking the run loop to close up shop.
#[derive(Clone)]
pub struct ShutdownHandle {
    event_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ShutdownHandle {
    pub fn request(&self) {
        let _ = self.event_tx.send(SessionEvent::Shutdown);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerPhase {
    Starting,
    Open,
    Closing,
}

/// The server process: owns the listener, registry, lifecycle state and
/// per-peer send queues, and drives the broadcast scheduler.
pub struct Server {
    /// Taken by `run` when the acceptor task starts.
    listener: Option<TcpListener>,
    registry: SessionRegistry,
    lifecycle: LifecycleHandler,
    peers: HashMap<SessionId, mpsc::UnboundedSender<Message>>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    event_rx: mpsc::UnboundedReceiver<SessionEvent>,
    tick_interval: Duration,
    max_events_per_tick: usize,
    tick: u64,
    phase: ServerPhase,
}

impl Server {
    /// Binds the listening endpoint. A bind failure here is fatal; the
    /// binary exits non-zero on it.
    pub async fn new(addr: &str, tick_interval: Duration) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener: Some(listener),
            registry: SessionRegistry::new(),
            lifecycle: LifecycleHandler::new(),
            peers: HashMap::new(),
            event_tx,
            event_rx,
            tick_interval,
            max_events_per_tick: MAX_EVENTS_PER_TICK,
            tick: 0,
            phase: ServerPhase::Starting,
        })
    }

    /// The actually bound address, useful when binding to port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        match &self.listener {
            Some(listener) => listener.local_addr(),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "listener already handed to the acceptor",
            )),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            event_tx: self.event_tx.clone(),
        }
    }

    /// Runs the broadcast scheduler until shutdown is requested. Each tick
    /// drains pending session events, snapshots the registry once, and
    /// fans the resulting roster frame out to every connected peer.
    pub async fn run(mut self) {
        let listener = match self.listener.take() {
            Some(listener) => listener,
            None => return,
        };
        let acceptor = spawn_acceptor(listener, self.event_tx.clone());
        self.phase = ServerPhase::Open;
        info!("Server open for connections");

        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if self.drain_events() {
                break;
            }

            self.broadcast_roster();

            self.tick = self.tick.wrapping_add(1);
            if self.tick % 500 == 0 {
                debug!(
                    "Tick {} ({:?}): {} sessions connected",
                    self.tick,
                    self.phase,
                    self.registry.len()
                );
            }
        }

        self.close(acceptor);
    }

    /// Drains session events queued since the previous tick, up to the
    /// per-tick cap; anything past the cap carries over to the next tick.
    /// Returns true when a shutdown request was seen.
    fn drain_events(&mut self) -> bool {
        let mut drained = 0;
        while drained < self.max_events_per_tick {
            match self.event_rx.try_recv() {
                Ok(SessionEvent::Shutdown) => return true,
                Ok(event) => {
                    self.handle_event(event);
                    drained += 1;
                }
                Err(_) => break,
            }
        }
        if drained == self.max_events_per_tick {
            debug!("Event drain hit per-tick cap, carrying the rest over");
        }
        false
    }

    #[cfg(test)]
    fn set_max_events_per_tick(&mut self, cap: usize) {
        self.max_events_per_tick = cap;
    }

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Connected {
                session_id,
                addr,
                sender,
            } => {
                self.peers.insert(session_id, sender);
                self.lifecycle.on_connect(&mut self.registry, session_id, addr);
            }
            SessionEvent::PayloadReceived {
                session_id,
                payload,
            } => {
                self.lifecycle
                    .on_payload(&mut self.registry, session_id, &payload);
            }
            SessionEvent::Disconnected { session_id } => {
                self.peers.remove(&session_id);
                self.lifecycle.on_disconnect(&mut self.registry, session_id);
            }
            // Handled by the run loop before dispatch
            SessionEvent::Shutdown => {}
        }
    }

    /// Encodes the current roster once and queues it to every peer. Every
    /// peer gets the full roster, its own entry included.
    fn broadcast_roster(&mut self) {
        if self.peers.is_empty() {
            return;
        }

        let frame = encode_roster(&self.registry.snapshot());
        send_frame_to_all(&self.peers, frame);
    }

    /// Closing phase: stop accepting, release the endpoint, and tell every
    /// peer goodbye best-effort.
    fn close(mut self, acceptor: JoinHandle<()>) {
        self.phase = ServerPhase::Closing;
        info!(
            "Server closing ({:?}), disconnecting {} peers",
            self.phase,
            self.peers.len()
        );

        acceptor.abort();

        for (session_id, sender) in self.peers.drain() {
            if sender.send(Message::Close(None)).is_err() {
                debug!("Peer for session {} already gone at shutdown", session_id);
            }
        }
    }
}

/// Sends one identical frame to every connected peer. A failed send is
/// abandoned and logged; the remaining peers still get theirs.
fn send_frame_to_all(peers: &HashMap<SessionId, mpsc::UnboundedSender<Message>>, frame: Vec<u8>) {
    for (session_id, sender) in peers {
        if sender.send(Message::Binary(frame.clone())).is_err() {
            warn!(
                "Dropping broadcast to session {}: peer channel closed",
                session_id
            );
        }
    }
}

/// Spawns the task that accepts connections and hands each one a fresh
/// session id off a monotonic counter.
fn spawn_acceptor(
    listener: TcpListener,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut next_session_id: u32 = 1;

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let session_id = SessionId(next_session_id);
                    next_session_id = next_session_id.wrapping_add(1);
                    spawn_connection(session_id, stream, addr, event_tx.clone());
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    })
}

/// Per-connection tasks: a writer draining this peer's outbound queue and
/// a reader forwarding its payloads as lifecycle events.
fn spawn_connection(
    session_id: SessionId,
    stream: TcpStream,
    addr: SocketAddr,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
) {
    tokio::spawn(async move {
        let ws_stream = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!("WebSocket handshake with {} failed: {}", addr, e);
                return;
            }
        };

        let (mut ws_sink, mut ws_source) = ws_stream.split();
        let (sender, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        if event_tx
            .send(SessionEvent::Connected {
                session_id,
                addr,
                sender,
            })
            .is_err()
        {
            // Run loop already gone; nothing to sync with
            return;
        }

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if ws_sink.send(message).await.is_err() {
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = ws_sink.close().await;
        });

        while let Some(result) = ws_source.next().await {
            match result {
                Ok(Message::Binary(payload)) => {
                    if event_tx
                        .send(SessionEvent::PayloadReceived {
                            session_id,
                            payload,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(_) => {
                    warn!("Ignoring non-binary message from session {}", session_id);
                }
                Err(e) => {
                    warn!("Read error on session {}: {}", session_id, e);
                    break;
                }
            }
        }

        let _ = event_tx.send(SessionEvent::Disconnected { session_id });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{decode_roster, PlayerColor, Vec2, ROSTER_ENTRY_LEN};

    #[test]
    fn test_broadcast_fan_out_identical_frames() {
        let mut registry = SessionRegistry::new();
        registry.create(SessionId(1));
        registry.create(SessionId(2));
        registry.set_color(SessionId(1), PlayerColor::opaque(10, 20, 30));
        registry.set_color(SessionId(2), PlayerColor::opaque(40, 50, 60));

        let mut peers = HashMap::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        peers.insert(SessionId(1), tx_a);
        peers.insert(SessionId(2), tx_b);

        send_frame_to_all(&peers, encode_roster(&registry.snapshot()));

        let frame_a = match rx_a.try_recv().unwrap() {
            Message::Binary(data) => data,
            other => panic!("Expected binary frame, got {:?}", other),
        };
        let frame_b = match rx_b.try_recv().unwrap() {
            Message::Binary(data) => data,
            other => panic!("Expected binary frame, got {:?}", other),
        };

        // Both peers get the same bytes, both entries included
        assert_eq!(frame_a, frame_b);
        assert_eq!(frame_a.len(), 2 * ROSTER_ENTRY_LEN);

        let entries = decode_roster(&frame_a).unwrap();
        assert!(entries
            .iter()
            .any(|e| e.color == PlayerColor::opaque(10, 20, 30)));
        assert!(entries
            .iter()
            .any(|e| e.color == PlayerColor::opaque(40, 50, 60)));

        // Exactly one frame per peer per tick
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_failed_peer_does_not_block_others() {
        let mut peers = HashMap::new();
        let (tx_dead, rx_dead) = mpsc::unbounded_channel();
        let (tx_live, mut rx_live) = mpsc::unbounded_channel();
        drop(rx_dead);
        peers.insert(SessionId(1), tx_dead);
        peers.insert(SessionId(2), tx_live);

        send_frame_to_all(&peers, vec![0u8; ROSTER_ENTRY_LEN]);

        // The live peer still received its frame
        assert!(matches!(rx_live.try_recv(), Ok(Message::Binary(_))));
    }

    #[test]
    fn test_empty_registry_empty_frame() {
        let registry = SessionRegistry::new();
        let frame = encode_roster(&registry.snapshot());
        assert!(frame.is_empty());
    }

    #[test]
    fn test_moved_session_reflected_in_frame() {
        let mut registry = SessionRegistry::new();
        registry.create(SessionId(1));
        registry.set_color(SessionId(1), PlayerColor::opaque(1, 2, 3));
        registry.apply_delta(SessionId(1), Vec2::new(5.0, -3.0));

        let entries = decode_roster(&encode_roster(&registry.snapshot())).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].position.x, 965.0);
        assert_eq!(entries[0].position.y, 537.0);
        assert_eq!(entries[0].color, PlayerColor::opaque(1, 2, 3));
    }

    #[tokio::test]
    async fn test_event_drain_cap_carries_overflow_to_next_tick() {
        let mut server = Server::new("127.0.0.1:0", Duration::from_millis(1))
            .await
            .unwrap();
        server.set_max_events_per_tick(8);

        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let event_tx = server.event_tx.clone();
        for i in 1..=11u32 {
            let (sender, _rx) = mpsc::unbounded_channel();
            event_tx
                .send(SessionEvent::Connected {
                    session_id: SessionId(i),
                    addr,
                    sender,
                })
                .unwrap();
        }

        // First drain stops at the cap, leaving three events queued
        assert!(!server.drain_events());
        assert_eq!(server.registry.len(), 8);

        // The leftovers come through on the following tick
        assert!(!server.drain_events());
        assert_eq!(server.registry.len(), 11);
    }

    #[tokio::test]
    async fn test_shutdown_event_reaches_run_loop() {
        let server = Server::new("127.0.0.1:0", Duration::from_millis(1))
            .await
            .unwrap();
        let shutdown = server.shutdown_handle();
        let handle = tokio::spawn(server.run());

        shutdown.request();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("run loop did not stop after shutdown request")
            .unwrap();
    }
}
