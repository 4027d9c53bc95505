//! Request/response correlation.
//!
//! A request registers a continuation under a fresh correlation id before it
//! is sent. When a `Response` frame with that id arrives, the continuation
//! decodes the payload and wakes the waiter. Waiters that time out or are
//! dropped remove their entry, so an id is live at most once.

use crate::codec::decode_payload;
use crate::custom_event::DecodeContext;
use crate::error::{DecodeError, NetError};
use crate::packets::{Packet, PacketType};
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// Callback run with the inner type and payload of a matching response.
pub type Continuation = Box<dyn FnOnce(PacketType, &[u8]) + Send>;

type PendingMap = HashMap<i32, Continuation>;
type IdSource = Box<dyn Fn() -> i32 + Send + Sync>;

/// Table of requests awaiting a response.
pub struct Correlator {
    pending: Arc<Mutex<PendingMap>>,
    ids: IdSource,
}

impl Correlator {
    /// Correlator drawing ids from OS entropy.
    pub fn new() -> Self {
        Self::with_id_source(|| OsRng.next_u32() as i32)
    }

    /// Correlator drawing candidate ids from `source`.
    ///
    /// Zero and ids already pending are skipped, so `source` only needs to
    /// produce a usable id eventually.
    pub fn with_id_source<F>(source: F) -> Self
    where
        F: Fn() -> i32 + Send + Sync + 'static,
    {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            ids: Box::new(source),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PendingMap> {
        lock_pending(&self.pending)
    }

    /// Register a continuation and return its correlation id.
    pub fn register(&self, continuation: Continuation) -> i32 {
        let mut pending = self.lock();
        let id = loop {
            let candidate = (self.ids)();
            if candidate != 0 && !pending.contains_key(&candidate) {
                break candidate;
            }
        };
        pending.insert(id, continuation);
        trace!(id, pending = pending.len(), "Registered pending request");
        id
    }

    /// Register a waiter for a response of type `T`.
    pub fn expect<T: Packet>(&self, ctx: DecodeContext) -> PendingResponse<T> {
        let (tx, rx) = oneshot::channel();
        let id = self.register(Box::new(move |ty, payload| {
            let decoded = if ty == T::TYPE {
                decode_payload::<T>(payload, &ctx)
            } else {
                Err(DecodeError::WrongPacketType {
                    expected: T::TYPE,
                    found: ty,
                })
            };
            // The waiter may have given up already.
            let _ = tx.send(decoded);
        }));
        PendingResponse {
            id,
            rx,
            pending: Arc::clone(&self.pending),
            _marker: PhantomData,
        }
    }

    /// Hand a response to the continuation registered under `id`.
    ///
    /// Returns `false` when no request with that id is pending.
    pub fn resolve(&self, id: i32, ty: PacketType, payload: &[u8]) -> bool {
        let continuation = self.lock().remove(&id);
        match continuation {
            Some(continuation) => {
                continuation(ty, payload);
                true
            }
            None => {
                debug!(id, ?ty, "Response for unknown request id");
                false
            }
        }
    }

    /// Drop the continuation registered under `id`.
    pub fn cancel(&self, id: i32) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Whether a request with `id` is pending.
    pub fn is_pending(&self, id: i32) -> bool {
        self.lock().contains_key(&id)
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no request is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_pending(pending: &Mutex<PendingMap>) -> MutexGuard<'_, PendingMap> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Waiter for the response to one request.
///
/// Dropping it before the response arrives removes the pending entry.
pub struct PendingResponse<T> {
    id: i32,
    rx: oneshot::Receiver<Result<T, DecodeError>>,
    pending: Arc<Mutex<PendingMap>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> PendingResponse<T> {
    /// Correlation id to put in the request frame.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Wait up to `timeout` for the response.
    ///
    /// A timeout removes the pending entry and yields [`NetError::Timeout`];
    /// a response that fails to decode yields [`NetError::Decode`].
    pub async fn wait(mut self, timeout: Duration) -> Result<T, NetError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(Ok(response))) => Ok(response),
            Ok(Ok(Err(err))) => Err(NetError::Decode(err)),
            Ok(Err(_)) => Err(NetError::Cancelled),
            Err(_) => {
                debug!(id = self.id, ?timeout, "Request timed out");
                Err(NetError::Timeout(timeout))
            }
        }
    }
}

impl<T> Drop for PendingResponse<T> {
    fn drop(&mut self) {
        // Already removed when the response arrived; removing again is a no-op.
        lock_pending(&self.pending).remove(&self.id);
    }
}
