//! Password rendezvous between the handshake task and the application.
//!
//! When the security handshake needs a VNC password that wasn't supplied via
//! configuration, it enqueues an [`ActionItem::GetPassword`](crate::actions::ActionItem::GetPassword)
//! and then blocks on a [`PasswordBarrier`] until the application answers.
//! This keeps the handshake task from needing any direct knowledge of how the
//! application prompts for credentials (a GUI dialog, a CLI prompt, ...).

use tokio::sync::{oneshot, Mutex};

/// A one-shot rendezvous point for a single password prompt.
///
/// `wait_for_answer` parks the handshake task on a fresh oneshot channel;
/// `answer` (called from the application side once the user responds) fills
/// it in. If the application drops its side of the channel without
/// answering, the wait resolves to `None`, which the handshake treats as a
/// cancelled authentication attempt.
pub struct PasswordBarrier {
    sender: Mutex<Option<oneshot::Sender<Option<Vec<u8>>>>>,
}

impl Default for PasswordBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordBarrier {
    /// Create a new, unarmed barrier.
    pub fn new() -> Self {
        Self {
            sender: Mutex::new(None),
        }
    }

    /// Arm the barrier and wait for the application to answer.
    ///
    /// Only one prompt can be in flight at a time; a second call replaces any
    /// sender left over from a prompt nobody answered.
    pub async fn wait_for_answer(&self) -> Option<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        *self.sender.lock().await = Some(tx);
        rx.await.unwrap_or(None)
    }

    /// Answer the currently pending prompt, if any.
    ///
    /// Returns `false` if no prompt was pending (the sender had already been
    /// consumed or none was ever armed).
    pub async fn answer(&self, password: Option<Vec<u8>>) -> bool {
        if let Some(tx) = self.sender.lock().await.take() {
            tx.send(password).is_ok()
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_answer_before_wait_is_lost() {
        let barrier = PasswordBarrier::new();
        // No one is waiting yet, so answering does nothing.
        assert!(!barrier.answer(Some(b"secret".to_vec())).await);
    }

    #[tokio::test]
    async fn test_wait_then_answer_round_trips() {
        let barrier = Arc::new(PasswordBarrier::new());
        let waiter = {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.wait_for_answer().await })
        };

        // Give the waiter a chance to arm the barrier.
        tokio::task::yield_now().await;
        assert!(barrier.answer(Some(b"hunter2".to_vec())).await);

        let answer = waiter.await.unwrap();
        assert_eq!(answer, Some(b"hunter2".to_vec()));
    }

    #[tokio::test]
    async fn test_dropped_barrier_resolves_to_none() {
        let barrier = Arc::new(PasswordBarrier::new());
        let waiter = {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.wait_for_answer().await })
        };

        tokio::task::yield_now().await;
        // Drop the only remaining sender without answering.
        *barrier.sender.lock().await = None;

        let answer = waiter.await.unwrap();
        assert_eq!(answer, None);
    }
}
