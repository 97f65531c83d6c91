//! services/podcast/src/generator/dispatch.rs
//!
//! Bridges the transport's inbound frame stream into a sequential
//! "await the next message" primitive for the orchestration script.
//!
//! A pump task drains the stream and hands each decoded frame either to the
//! oldest pending waiter or to a FIFO buffer. Closing the queue fails every
//! pending waiter and drops whatever was buffered.

use crate::error::GenerationError;
use futures::StreamExt;
use podcast_core::{
    codec,
    frame::{Event, Message, MsgType},
    ports::{FrameStream, InboundFrame},
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, warn};

/// How long `receive` waits for a frame before failing.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(30);

type Delivery = Result<Message, GenerationError>;

struct Waiter {
    id: u64,
    tx: oneshot::Sender<Delivery>,
}

#[derive(Default)]
struct Inner {
    buffer: VecDeque<Delivery>,
    waiters: VecDeque<Waiter>,
    next_waiter_id: u64,
    closed: bool,
}

/// Per-connection message queue. Cloning shares the same queue.
#[derive(Clone)]
pub struct DispatchQueue {
    inner: Arc<Mutex<Inner>>,
    receive_timeout: Duration,
}

impl DispatchQueue {
    pub fn new(receive_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            receive_timeout,
        }
    }

    /// Creates a queue fed by `frames` through a spawned pump task.
    pub fn spawn(frames: FrameStream, receive_timeout: Duration) -> (Self, JoinHandle<()>) {
        let queue = Self::new(receive_timeout);
        let pump = tokio::spawn(pump(frames, queue.clone()));
        (queue, pump)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hands one decoded frame (or decode failure) to the oldest live waiter,
    /// or buffers it when nobody is waiting.
    pub(crate) fn deliver(&self, item: Delivery) {
        let mut inner = self.lock();
        if inner.closed {
            debug!("Dropping frame delivered after close");
            return;
        }

        let mut item = item;
        while let Some(waiter) = inner.waiters.pop_front() {
            match waiter.tx.send(item) {
                Ok(()) => return,
                // The waiter gave up; offer the frame to the next one.
                Err(returned) => item = returned,
            }
        }
        inner.buffer.push_back(item);
    }

    /// Returns the oldest buffered message, or waits for the next one.
    pub async fn receive(&self) -> Result<Message, GenerationError> {
        let (id, mut rx) = {
            let mut inner = self.lock();
            if let Some(item) = inner.buffer.pop_front() {
                return item;
            }
            if inner.closed {
                return Err(connection_closed());
            }
            let (tx, rx) = oneshot::channel();
            let id = inner.next_waiter_id;
            inner.next_waiter_id += 1;
            inner.waiters.push_back(Waiter { id, tx });
            (id, rx)
        };

        match tokio::time::timeout(self.receive_timeout, &mut rx).await {
            Ok(Ok(item)) => item,
            Ok(Err(_)) => Err(connection_closed()),
            Err(_) => {
                let mut inner = self.lock();
                let before = inner.waiters.len();
                inner.waiters.retain(|waiter| waiter.id != id);
                if inner.waiters.len() < before {
                    return Err(GenerationError::Timeout(self.receive_timeout));
                }
                // Already popped by `deliver` at the deadline.
                drop(inner);
                rx.try_recv()
                    .unwrap_or_else(|_| Err(GenerationError::Timeout(self.receive_timeout)))
            }
        }
    }

    /// Receives one message and requires it to be exactly `(msg_type, event)`.
    pub async fn wait_for_event(
        &self,
        msg_type: MsgType,
        event: Event,
    ) -> Result<Message, GenerationError> {
        let msg = self.receive().await?;
        if !msg.is(msg_type, event) {
            return Err(GenerationError::ProtocolMismatch {
                expected: format!("{} / {}", msg_type, event),
                received: msg.to_string(),
            });
        }
        Ok(msg)
    }

    /// Fails all pending waiters and clears the buffer. Idempotent.
    pub fn close(&self) {
        let waiters = {
            let mut inner = self.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.buffer.clear();
            std::mem::take(&mut inner.waiters)
        };
        for waiter in waiters {
            let _ = waiter.tx.send(Err(connection_closed()));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of receivers currently suspended.
    pub fn waiting(&self) -> usize {
        self.lock().waiters.len()
    }

    pub fn buffered(&self) -> usize {
        self.lock().buffer.len()
    }
}

fn connection_closed() -> GenerationError {
    GenerationError::Connection("connection closed".to_string())
}

fn decode_frame(data: &[u8]) -> Delivery {
    match codec::decode(data) {
        Ok(msg) => {
            debug!("Received: {}", msg);
            Ok(msg)
        }
        Err(e) => {
            warn!("Failed to decode inbound frame: {}", e);
            Err(e.into())
        }
    }
}

/// Drains the transport stream into the queue until the connection ends.
async fn pump(mut frames: FrameStream, queue: DispatchQueue) {
    while let Some(item) = frames.next().await {
        match item {
            Ok(InboundFrame::Binary(data)) => queue.deliver(decode_frame(&data)),
            Ok(InboundFrame::Text(text)) => queue.deliver(decode_frame(text.as_bytes())),
            Ok(InboundFrame::Control) => {}
            Ok(InboundFrame::Close) => {
                debug!("Server closed the connection");
                break;
            }
            Err(e) => {
                warn!("Transport error: {}", e);
                break;
            }
        }
    }
    queue.close();
}
