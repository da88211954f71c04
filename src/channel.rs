use std::{
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::{sync::Notify, time};

use crate::error::ChannelError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "text", rename_all = "snake_case")]
pub enum Interrupt {
    Utterance(String),
    Listen,
    Silence,
}

impl Interrupt {
    pub fn utterance(text: impl Into<String>) -> Self {
        Interrupt::Utterance(text.into())
    }
}

#[derive(Debug)]
struct Slot<T> {
    pending: Option<T>,
    closed: bool,
}

/// FIFO of depth one. An unclaimed value is overwritten by the next push, and
/// stays in the slot until a `try_take`/`take_blocking` claims it.
#[derive(Debug)]
pub struct InterruptChannel<T = Interrupt> {
    slot: Mutex<Slot<T>>,
    notify: Notify,
}

impl<T> Default for InterruptChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> InterruptChannel<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                pending: None,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        // The slot holds plain data, so a poisoned guard is still consistent.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores `value`, replacing any unclaimed one, and wakes a waiting taker.
    /// Returns `true` when an unclaimed value was overwritten.
    pub fn push(&self, value: T) -> Result<bool, ChannelError> {
        let replaced = {
            let mut slot = self.lock();
            if slot.closed {
                return Err(ChannelError::Closed);
            }
            slot.pending.replace(value).is_some()
        };
        self.notify.notify_one();
        Ok(replaced)
    }

    pub fn try_take(&self) -> Option<T> {
        self.lock().pending.take()
    }

    /// Waits up to `timeout` for a value. A value pushed before closing is
    /// still delivered; afterwards the channel reports `Closed`.
    pub async fn take_blocking(&self, timeout: Duration) -> Result<T, ChannelError> {
        let deadline = time::Instant::now() + timeout;
        loop {
            {
                let mut slot = self.lock();
                if let Some(value) = slot.pending.take() {
                    return Ok(value);
                }
                if slot.closed {
                    return Err(ChannelError::Closed);
                }
            }

            // A push between the check above and this await leaves a permit
            // behind, so the wakeup is not lost.
            if time::timeout_at(deadline, self.notify.notified()).await.is_err() {
                return self.try_take().ok_or(ChannelError::Timeout);
            }
        }
    }

    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn has_pending(&self) -> bool {
        self.lock().pending.is_some()
    }
}
