//! Blocks every key except the ones needed to unlock again
//!
//! Engaging resolves the hotkey and emergency hotkey (with every physical
//! variant of their modifiers) into a reachable set, then blocks the whole
//! code space around it. Whatever was actually blocked is recorded so that
//! disengaging undoes exactly that.

use std::collections::BTreeSet;
use std::sync::Arc;

use log::{debug, info, trace, warn};

use crate::backend::{Code, KeyboardBackend, VENDOR_CODES};
use crate::notify::Notifier;
use crate::trigger::TriggerSpec;

/// Regular key codes
pub const BASE_CODES: std::ops::Range<Code> = 0..256;


/// Keys blocked by name as well, for keyboards that deliver them outside
/// the regular code path
pub const HIGH_RISK_KEYS: &[&str] = &[
    "windows",
    "left windows",
    "right windows",
    "volume up",
    "volume down",
    "volume mute",
    "play/pause media",
    "next track",
    "previous track",
    "brightness up",
    "brightness down",
];

/// Every code an engage attempts to block
pub fn code_space() -> impl Iterator<Item = Code> {
    BASE_CODES.chain(VENDOR_CODES)
}

pub struct InputBlockEngine<B, N> {
    backend: Arc<B>,
    notifier: N,
    notifications_enabled: bool,
    blocked: BTreeSet<Code>,
    blocked_by_name: BTreeSet<Code>,
}

impl<B: KeyboardBackend, N: Notifier> InputBlockEngine<B, N> {
    pub fn new(backend: Arc<B>, notifier: N) -> Self {
        Self {
            backend,
            notifier,
            notifications_enabled: true,
            blocked: BTreeSet::new(),
            blocked_by_name: BTreeSet::new(),
        }
    }

    pub fn set_notifications_enabled(&mut self, enabled: bool) {
        self.notifications_enabled = enabled;
    }

    /// Codes currently blocked through the code-space sweep
    #[cfg(test)]
    pub fn blocked_codes(&self) -> &BTreeSet<Code> {
        &self.blocked
    }

    pub fn is_engaged(&self) -> bool {
        !self.blocked.is_empty() || !self.blocked_by_name.is_empty()
    }

    /// Codes that must stay unblocked so either trigger can still fire
    pub fn reachable_codes(&self, trigger: &TriggerSpec, emergency: &TriggerSpec) -> BTreeSet<Code> {
        trigger
            .reachable_names()
            .into_iter()
            .chain(emergency.reachable_names())
            .flat_map(|name| self.backend.resolve_codes(name))
            .collect()
    }

    /// Block everything except the reachable set; returns the number of codes blocked
    pub fn engage(&mut self, trigger: &TriggerSpec, emergency: &TriggerSpec) -> usize {
        // Rebuild from scratch: the hotkey may differ from the last engage.
        if self.is_engaged() {
            debug!("Engage while engaged, clearing previous blocks");
            self.disengage();
        }

        let reachable = self.reachable_codes(trigger, emergency);
        debug!("Keeping {} codes reachable for {} / {}", reachable.len(), trigger, emergency);

        let mut attempted = 0usize;
        for code in code_space().filter(|code| !reachable.contains(code)) {
            attempted += 1;
            match self.backend.block_code(code) {
                Ok(()) => {
                    self.blocked.insert(code);
                }
                Err(e) => trace!("Skipping code {}: {}", code, e),
            }
        }

        for name in HIGH_RISK_KEYS {
            match self.backend.block_name(name) {
                Ok(codes) => self.blocked_by_name.extend(codes),
                Err(e) => trace!("Skipping key {:?}: {}", name, e),
            }
        }

        // Second pass: nothing reachable may stay blocked, whichever path blocked it.
        for code in &reachable {
            if let Err(e) = self.backend.unblock_code(*code) {
                trace!("Unblocking reachable code {} failed: {}", code, e);
            }
        }
        self.blocked.retain(|code| !reachable.contains(code));
        self.blocked_by_name.retain(|code| !reachable.contains(code));

        // TODO: surface a distinct degraded state once the tray can show it
        if self.blocked.len() * 2 < attempted {
            warn!(
                "Only {} of {} key codes could be blocked; lock is degraded",
                self.blocked.len(),
                attempted
            );
        }

        info!(
            "Keyboard locked: {} codes blocked, {} named keys blocked",
            self.blocked.len(),
            self.blocked_by_name.len()
        );

        self.notifier.notify_locked(self.notifications_enabled);
        self.blocked.len()
    }

    /// Undo every recorded block; safe to call at any time
    pub fn disengage(&mut self) {
        if !self.is_engaged() {
            return;
        }

        let codes: BTreeSet<Code> = self.blocked.union(&self.blocked_by_name).copied().collect();
        for code in &codes {
            if let Err(e) = self.backend.unblock_code(*code) {
                trace!("Unblocking code {} failed: {}", code, e);
            }
        }
        self.blocked.clear();
        self.blocked_by_name.clear();

        info!("Keyboard unlocked: {} codes released", codes.len());
    }
}
