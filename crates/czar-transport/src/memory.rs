//! In-process connection pair.
//!
//! [`MemoryConnection`] is the server side and implements [`Connection`];
//! [`MemoryPeer`] plays the client. Frames are carried over unbounded tokio
//! channels.

use std::io::ErrorKind;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, Notify, mpsc};

use crate::{Connection, ConnectionId, TransportError, next_connection_id};

#[derive(Default)]
struct Shared {
    closed: AtomicBool,
    fail_sends: AtomicBool,
    stalled: AtomicBool,
    closed_notify: Notify,
    released: Notify,
}

impl Shared {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.closed_notify.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Server side of an in-memory connection.
pub struct MemoryConnection {
    id: ConnectionId,
    inbound: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    shared: Arc<Shared>,
}

/// Client side of an in-memory connection.
pub struct MemoryPeer {
    inbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
    outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    shared: Arc<Shared>,
}

impl MemoryConnection {
    /// Creates a connected pair.
    pub fn pair() -> (MemoryConnection, MemoryPeer) {
        let (to_server, from_peer) = mpsc::unbounded_channel();
        let (to_peer, from_server) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        let conn = MemoryConnection {
            id: next_connection_id(),
            inbound: Mutex::new(from_peer),
            outbound: to_peer,
            shared: Arc::clone(&shared),
        };
        let peer = MemoryPeer {
            inbound: Some(to_server),
            outbound: from_server,
            shared,
        };
        (conn, peer)
    }
}

impl Connection for MemoryConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        loop {
            let released = self.shared.released.notified();
            if !self.shared.stalled.load(Ordering::SeqCst) {
                break;
            }
            released.await;
        }
        if self.shared.is_closed() {
            return Err(TransportError::ConnectionClosed("closed locally".into()));
        }
        if self.shared.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed(std::io::Error::new(
                ErrorKind::BrokenPipe,
                "peer refused frame",
            )));
        }
        self.outbound
            .send(data.to_vec())
            .map_err(|_| TransportError::ConnectionClosed("peer dropped".into()))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let closed = self.shared.closed_notify.notified();
        if self.shared.is_closed() {
            return Err(TransportError::ConnectionClosed("closed locally".into()));
        }
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            _ = closed => Err(TransportError::ConnectionClosed("closed locally".into())),
            frame = inbound.recv() => Ok(frame),
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.shared.close();
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

impl MemoryPeer {
    /// Sends a frame to the server side.
    pub fn send(&self, data: impl Into<Vec<u8>>) -> Result<(), TransportError> {
        match &self.inbound {
            Some(tx) => tx
                .send(data.into())
                .map_err(|_| TransportError::ConnectionClosed("server dropped".into())),
            None => Err(TransportError::ConnectionClosed("peer hung up".into())),
        }
    }

    /// Waits for the next frame sent by the server side.
    ///
    /// Returns `None` once the server side is dropped and drained.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.outbound.recv().await
    }

    /// Returns a frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.outbound.try_recv().ok()
    }

    /// Drains every queued frame.
    pub fn drain(&mut self) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        while let Some(frame) = self.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Makes every subsequent server-side send fail.
    pub fn fail_sends(&self, fail: bool) {
        self.shared.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// While set, server-side sends wait instead of completing, like a
    /// client that stopped reading. Clearing it lets them through.
    pub fn stall_sends(&self, stall: bool) {
        self.shared.stalled.store(stall, Ordering::SeqCst);
        if !stall {
            self.shared.released.notify_waiters();
        }
    }

    /// Ends the inbound stream; the server side reads `Ok(None)`.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    /// Whether the server side closed the connection.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}
