//! The seam between the locking core and the OS keyboard hook
//!
//! Codes are hardware-independent key identifiers. Code 0..256 is the base
//! key space; [`VENDOR_CODES`] address vendor keys (brightness, backlight)
//! that the OS delivers without a regular key code.

use std::io;
use std::ops::Range;
use std::sync::Arc;

use thiserror::Error;

use crate::trigger::TriggerSpec;

pub type Code = u32;

/// Vendor keys: `0x100 + scan code` for keys delivered without a regular code
pub const VENDOR_CODES: Range<Code> = 0x100..0x200;

/// Invoked from the hook context when a registered hotkey is pressed
pub type TriggerCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("no key code is known for {0:?}")]
    UnknownKey(String),
    #[error("key code {0} cannot be blocked on this keyboard")]
    UnsupportedCode(Code),
    #[error("failed to install the keyboard hook")]
    HookInstall(#[source] io::Error),
    #[error("the keyboard hook thread terminated unexpectedly")]
    HookThreadCrashed,
}

pub trait KeyboardBackend: Send + Sync + 'static {
    /// Map a key name to its codes; empty when the name is unknown here
    fn resolve_codes(&self, name: &str) -> Vec<Code>;

    fn block_code(&self, code: Code) -> Result<(), BackendError>;

    fn unblock_code(&self, code: Code) -> Result<(), BackendError>;

    /// Block every code a key name resolves to, returning the codes blocked
    fn block_name(&self, name: &str) -> Result<Vec<Code>, BackendError> {
        let codes = self.resolve_codes(name);
        if codes.is_empty() {
            return Err(BackendError::UnknownKey(name.to_string()));
        }
        let blocked: Vec<Code> = codes
            .into_iter()
            .filter(|code| self.block_code(*code).is_ok())
            .collect();
        if blocked.is_empty() {
            return Err(BackendError::UnknownKey(name.to_string()));
        }
        Ok(blocked)
    }

    fn add_hotkey(&self, trigger: &TriggerSpec, callback: TriggerCallback)
        -> Result<(), BackendError>;

    fn remove_all_hotkeys(&self);

    /// Forget every key the hook believes is held down
    fn stash_state(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{codes, FakeBackend};

    #[test]
    fn test_block_name_blocks_every_resolved_code() {
        let backend = FakeBackend::new();

        let blocked = backend.block_name("volume up").unwrap();

        assert_eq!(blocked, vec![codes::VOLUME_UP]);
        assert!(backend.is_blocked(codes::VOLUME_UP));
    }

    #[test]
    fn test_block_name_skips_codes_that_fail() {
        let backend = FakeBackend::new().with_unsupported([codes::RIGHT_WINDOWS]);

        assert_eq!(backend.block_name("windows").unwrap(), vec![codes::LEFT_WINDOWS]);
        assert!(!backend.is_blocked(codes::RIGHT_WINDOWS));
    }

    #[test]
    fn test_block_name_fails_when_no_code_blocks() {
        let backend = FakeBackend::new().with_unsupported([codes::Q]);

        assert!(matches!(
            backend.block_name("q"),
            Err(BackendError::UnknownKey(name)) if name == "q"
        ));
        assert!(!backend.is_blocked(codes::Q));
    }

    #[test]
    fn test_block_name_rejects_unresolvable_name() {
        let backend = FakeBackend::new();

        assert!(matches!(
            backend.block_name("no such key"),
            Err(BackendError::UnknownKey(name)) if name == "no such key"
        ));
        assert_eq!(backend.blocked_count(), 0);
    }
}
