//! In-process duplex transport connecting the two sides.
//!
//! The provider and mirror never share memory; everything they exchange is a
//! byte envelope over a pair of cross-wired channels. A real deployment
//! would substitute a network transport here; the endpoint surface
//! (`send_event` / `call`) is the only seam either side touches.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::oneshot;
use tracing::{error, warn};

use crate::protocol::wire::{Envelope, WireError, decode_envelope, encode_envelope};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// One side of the duplex pair.
pub struct Transport {
    tx: UnboundedSender<Vec<u8>>,
    rx: UnboundedReceiver<Vec<u8>>,
}

pub struct TransportPair {
    pub provider: Transport,
    pub mirror: Transport,
}

pub fn pair() -> TransportPair {
    let (provider_tx, mirror_rx) = unbounded_channel();
    let (mirror_tx, provider_rx) = unbounded_channel();
    TransportPair {
        provider: Transport {
            tx: provider_tx,
            rx: provider_rx,
        },
        mirror: Transport {
            tx: mirror_tx,
            rx: mirror_rx,
        },
    }
}

/// Inbound frame sink for one side. Events have no reply; requests return
/// the encoded reply body.
#[async_trait]
pub trait FrameHandler: Send + Sync + 'static {
    async fn on_event(&self, body: Vec<u8>);
    async fn on_request(&self, body: Vec<u8>) -> Vec<u8>;
}

/// Outbound handle for one side. Cloneable; the pump task it spawns lives
/// until the peer hangs up.
#[derive(Clone)]
pub struct Endpoint {
    tx: UnboundedSender<Vec<u8>>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Vec<u8>>>>>,
    next_request: Arc<AtomicU64>,
}

impl Endpoint {
    pub fn start(transport: Transport, handler: Arc<dyn FrameHandler>) -> Self {
        let endpoint = Self {
            tx: transport.tx,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_request: Arc::new(AtomicU64::new(0)),
        };
        tokio::spawn(pump(
            transport.rx,
            endpoint.tx.clone(),
            endpoint.pending.clone(),
            handler,
        ));
        endpoint
    }

    pub fn send_event(&self, body: Vec<u8>) -> Result<(), TransportError> {
        self.send(&Envelope::Event { body })
    }

    /// Issue a request and await the peer's reply. There is no timeout; a
    /// non-responding peer stalls only this call.
    pub async fn call(&self, body: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        let id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending requests lock")
            .insert(id, reply_tx);
        if let Err(err) = self.send(&Envelope::Request { id, body }) {
            self.pending
                .lock()
                .expect("pending requests lock")
                .remove(&id);
            return Err(err);
        }
        reply_rx.await.map_err(|_| TransportError::Closed)
    }

    fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let bytes = encode_envelope(envelope)?;
        self.tx.send(bytes).map_err(|_| TransportError::Closed)
    }
}

async fn pump(
    mut rx: UnboundedReceiver<Vec<u8>>,
    tx: UnboundedSender<Vec<u8>>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Vec<u8>>>>>,
    handler: Arc<dyn FrameHandler>,
) {
    while let Some(bytes) = rx.recv().await {
        let envelope = match decode_envelope(&bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                error!(%err, "dropping undecodable envelope");
                continue;
            }
        };
        match envelope {
            Envelope::Event { body } => handler.on_event(body).await,
            Envelope::Request { id, body } => {
                let body = handler.on_request(body).await;
                let response = Envelope::Response { id, body };
                match encode_envelope(&response) {
                    Ok(bytes) => {
                        // Peer gone; nothing left to respond to.
                        let _ = tx.send(bytes);
                    }
                    Err(err) => error!(%err, "failed to encode response envelope"),
                }
            }
            Envelope::Response { id, body } => {
                let sender = pending.lock().expect("pending requests lock").remove(&id);
                match sender {
                    Some(sender) => {
                        let _ = sender.send(body);
                    }
                    None => warn!(id, "response for unknown request"),
                }
            }
        }
    }
}
