//! Mailboxes between the trigger context and the foreground coordinator
//!
//! The hook and listener threads never touch lock state directly. They see a
//! published copy of it and, depending on that copy, either queue an
//! activation or raise the sticky release flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::time::Instant;

use log::debug;

/// Where a lock request came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationSource {
    Hotkey,
    Tray,
}

/// A queued "lock requested" message
#[derive(Debug, Clone, Copy)]
pub struct Activation {
    pub source: ActivationSource,
    pub at: Instant,
}

/// Sticky flag asking the overlay to close and the keyboard to unlock
#[derive(Debug, Clone, Default)]
pub struct ReleaseSignal {
    flag: Arc<AtomicBool>,
}

impl ReleaseSignal {
    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Writer side, cloned into the trigger callbacks and the tray
#[derive(Debug, Clone)]
pub struct SignalRouter {
    activation_tx: Sender<Activation>,
    release: ReleaseSignal,
    locked: Arc<AtomicBool>,
}

/// Reader side of the activation queue, owned by the coordinator
#[derive(Debug)]
pub struct ActivationReceiver {
    rx: Receiver<Activation>,
}

impl SignalRouter {
    pub fn new() -> (Self, ActivationReceiver) {
        let (activation_tx, rx) = mpsc::channel();
        let router = Self {
            activation_tx,
            release: ReleaseSignal::default(),
            locked: Arc::new(AtomicBool::new(false)),
        };
        (router, ActivationReceiver { rx })
    }

    /// Called when a trigger is pressed
    pub fn fire(&self) {
        if self.locked.load(Ordering::SeqCst) {
            debug!("Trigger while locked, raising release");
            self.release.set();
        } else {
            self.request_activation(ActivationSource::Hotkey);
        }
    }

    pub fn request_activation(&self, source: ActivationSource) {
        debug!("Activation requested by {source:?}");
        let activation = Activation {
            source,
            at: Instant::now(),
        };
        // The receiver only goes away once the coordinator has shut down.
        let _ = self.activation_tx.send(activation);
    }

    pub fn release(&self) -> &ReleaseSignal {
        &self.release
    }

    /// Publish the coordinator's lock state to the trigger context
    pub fn publish_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }
}

impl ActivationReceiver {
    pub fn try_next(&self) -> Option<Activation> {
        match self.rx.try_recv() {
            Ok(activation) => Some(activation),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}
