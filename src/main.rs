//! CatLock - keyboard locking utility
//!
//! Blocks every key except a configurable hotkey, which toggles the lock.
//! A fixed emergency hotkey (ctrl+alt+shift+u) always unlocks as well.

#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]
#![cfg_attr(not(windows), allow(dead_code))]

mod backend;
mod config;
mod coordinator;
mod engine;
mod error;
mod hook;
mod instance;
#[cfg(windows)]
mod keyboard;
mod listener;
mod notify;
mod overlay;
mod signal;
mod tray;
mod trigger;

#[cfg(test)]
mod testing;

use log::{error, info};

use crate::error::Result;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("CatLock {} starting...", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run() {
        let message = describe(&e);
        error!("{}", message);
        #[cfg(windows)]
        show_error_message(&message);
        std::process::exit(1);
    }

    info!("CatLock exiting...");
}

#[cfg(windows)]
fn run() -> Result<()> {
    use std::sync::Arc;

    use log::warn;

    use crate::config::Config;
    use crate::coordinator::Coordinator;
    use crate::instance::InstanceGuard;
    use crate::keyboard::Win32Keyboard;
    use crate::notify::BalloonNotifier;
    use crate::overlay::Win32Overlay;
    use crate::tray::Win32Tray;

    let config_path = Config::default_path();
    let config = Config::load(&config_path, config::reset_requested())?;
    info!(
        "Loaded config: hotkey={}, opacity={}, notifications={}",
        config.hotkey, config.opacity, config.notifications_enabled
    );

    let guard = InstanceGuard::new(InstanceGuard::default_path());
    guard.acquire()?;

    let collaborators = (|| -> Result<_> {
        let backend = Arc::new(Win32Keyboard::install()?);
        let tray = Win32Tray::new(&config)?;
        Ok((backend, tray))
    })();
    let (backend, tray) = match collaborators {
        Ok(collaborators) => collaborators,
        Err(e) => {
            if let Err(release_err) = guard.release() {
                warn!("{}", release_err);
            }
            return Err(e);
        }
    };

    let overlay = Win32Overlay::new(config.parse_overlay_color(), &config.trigger().to_string());
    let mut coordinator = Coordinator::new(
        backend,
        BalloonNotifier,
        overlay,
        tray,
        guard,
        config,
        config_path,
    );

    let quit = coordinator.quit_handle();
    if let Err(e) = ctrlc::set_handler(move || quit.request()) {
        warn!("{}, only the tray can quit", describe(&e.into()));
    }

    coordinator.run()
}

#[cfg(not(windows))]
fn run() -> Result<()> {
    Err(error::Error::UnsupportedPlatform)
}

/// Error message with its whole source chain
fn describe(e: &error::Error) -> String {
    use std::error::Error as _;

    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Show a Windows error message box
#[cfg(windows)]
fn show_error_message(msg: &str) {
    use windows::core::PCWSTR;
    use windows::Win32::UI::WindowsAndMessaging::{MessageBoxW, MB_ICONERROR, MB_OK};

    let wide_msg: Vec<u16> = msg.encode_utf16().chain(std::iter::once(0)).collect();
    let wide_title: Vec<u16> = "CatLock Error".encode_utf16().chain(std::iter::once(0)).collect();

    unsafe {
        MessageBoxW(
            None,
            PCWSTR(wide_msg.as_ptr()),
            PCWSTR(wide_title.as_ptr()),
            MB_OK | MB_ICONERROR,
        );
    }
}
