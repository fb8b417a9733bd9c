//! Error types shared across CatLock

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::backend::BackendError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to write instance marker {}", path.display())]
    MarkerWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to register hotkey {hotkey:?}")]
    TriggerRegistration {
        hotkey: String,
        #[source]
        source: BackendError,
    },

    #[error("the trigger listener thread terminated unexpectedly")]
    ListenerCrashed,

    #[error("the trigger listener cannot restart itself from its own thread")]
    ListenerSelfRestart,

    #[error("failed to spawn the {0} thread")]
    Spawn(&'static str, #[source] io::Error),

    #[error("invalid hotkey {hotkey:?}: {reason}")]
    InvalidHotkey { hotkey: String, reason: &'static str },

    #[error("failed to access config file {}", path.display())]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode config")]
    ConfigEncode(#[from] serde_json::Error),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("failed to install the termination signal handler")]
    SignalHandler(#[from] ctrlc::Error),

    #[error("keyboard locking is not supported on this platform")]
    UnsupportedPlatform,

    #[cfg(windows)]
    #[error("failed to create tray icon")]
    TrayIcon(#[from] tray_icon::Error),

    #[cfg(windows)]
    #[error("failed to build tray icon image")]
    TrayImage(#[from] tray_icon::BadIcon),

    #[cfg(windows)]
    #[error("failed to build tray menu")]
    Menu(#[from] muda::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
