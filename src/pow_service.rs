//! Asynchronous proof-of-work service: a single-worker FIFO queue with
//! cancellation, grounded in the teacher's `PowMiner`/`PowValidator` split
//! (`consensus/pow.rs`) — generalized from block mining to the
//! double-SHA-512 Bitmessage target (spec §4.6), and moved off the I/O
//! path via `tokio::task::spawn_blocking` the way the teacher keeps
//! mining off its networking tasks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::crypto::{pow, Cryptography};
use crate::error::BmError;

/// A queued PoW request: the 32-byte initial hash, the target it must
/// satisfy, and a channel to deliver the solved nonce (or cancellation).
pub struct PowRequest {
    pub id: u64,
    pub initial_hash: [u8; 32],
    pub target: u64,
    reply: oneshot::Sender<Option<u64>>,
}

#[derive(Clone)]
struct CancelFlags {
    flags: Arc<parking_lot::Mutex<HashMap<u64, Arc<AtomicBool>>>>,
}

impl CancelFlags {
    fn new() -> Self {
        Self {
            flags: Arc::new(parking_lot::Mutex::new(HashMap::new())),
        }
    }

    /// Returns the flag for `id`, reusing one already set by a
    /// cancellation that arrived before the job was dequeued.
    fn register(&self, id: u64) -> Arc<AtomicBool> {
        self.flags
            .lock()
            .entry(id)
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }

    fn cancel(&self, id: u64) {
        self.flags
            .lock()
            .entry(id)
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .store(true, Ordering::SeqCst);
    }

    fn forget(&self, id: u64) {
        self.flags.lock().remove(&id);
    }
}

/// Handle used by the message pipeline to submit and cancel jobs. Cloning
/// is cheap; all clones share the same worker queue.
#[derive(Clone)]
pub struct PowServiceHandle {
    submit: mpsc::UnboundedSender<PowRequest>,
    cancel_flags: CancelFlags,
}

impl PowServiceHandle {
    /// Enqueues a solve request and awaits its result. Returns `None` if
    /// the job was cancelled before completion.
    pub async fn solve(&self, id: u64, initial_hash: [u8; 32], target: u64) -> Option<u64> {
        let (reply, rx) = oneshot::channel();
        let request = PowRequest {
            id,
            initial_hash,
            target,
            reply,
        };
        if self.submit.send(request).is_err() {
            return None;
        }
        rx.await.unwrap_or(None)
    }

    /// Cancels an in-flight or queued job by id. A no-op if the job has
    /// already completed.
    pub fn cancel(&self, id: u64) {
        self.cancel_flags.cancel(id);
    }
}

/// Spawns the worker task and returns a handle to it. One job runs at a
/// time, FIFO, on a blocking thread so the tokio reactor stays responsive.
pub fn spawn(crypto: Arc<dyn Cryptography>) -> PowServiceHandle {
    let (submit, mut queue) = mpsc::unbounded_channel::<PowRequest>();
    let cancel_flags = CancelFlags::new();
    let worker_flags = cancel_flags.clone();

    tokio::spawn(async move {
        while let Some(request) = queue.recv().await {
            let flag = worker_flags.register(request.id);
            let crypto = crypto.clone();
            let result = tokio::task::spawn_blocking(move || {
                pow::do_pow(&*crypto, &request.initial_hash, request.target, || {
                    flag.load(Ordering::SeqCst)
                })
            })
            .await
            .unwrap_or(None);
            worker_flags.forget(request.id);
            let _ = request.reply.send(result);
        }
    });

    PowServiceHandle {
        submit,
        cancel_flags,
    }
}

/// Verifies a solved nonce against an object's own initial hash and
/// target — the non-queued counterpart used on the inbound/validation
/// path (spec §4.6 `verifyNonce`).
pub fn verify_nonce(
    crypto: &dyn Cryptography,
    nonce: u64,
    initial_hash: &[u8; 32],
    target: u64,
) -> Result<bool, BmError> {
    Ok(pow::check_pow(crypto, nonce, initial_hash, target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::native::NativeCryptography;

    #[tokio::test]
    async fn solves_and_verifies() {
        let crypto: Arc<dyn Cryptography> = Arc::new(NativeCryptography::new());
        let handle = spawn(crypto.clone());

        let initial_hash = crypto.sha512(b"pow service test")[..32]
            .try_into()
            .unwrap();
        let target = u64::MAX / 1000;

        let nonce = handle.solve(1, initial_hash, target).await.unwrap();
        assert!(verify_nonce(&*crypto, nonce, &initial_hash, target).unwrap());
    }

    #[tokio::test]
    async fn cancel_aborts_before_completion() {
        let crypto: Arc<dyn Cryptography> = Arc::new(NativeCryptography::new());
        let handle = spawn(crypto.clone());

        let initial_hash = crypto.sha512(b"never solved")[..32].try_into().unwrap();
        handle.cancel(2);
        // An unreachable target (0) guarantees the worker only exits via
        // the cancellation flag already set above.
        let result = handle.solve(2, initial_hash, 0).await;
        assert!(result.is_none());
    }
}
