//! Lock state machine on the foreground thread
//!
//! The coordinator owns `LockState`, the engine and the overlay. Background
//! threads reach it only through the signal router: activations while
//! unlocked, the release flag while locked.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::backend::KeyboardBackend;
use crate::config::Config;
use crate::engine::InputBlockEngine;
use crate::error::Result;
use crate::instance::InstanceGuard;
use crate::listener::TriggerListener;
use crate::notify::Notifier;
use crate::overlay::{Overlay, OverlayEvent};
use crate::signal::{Activation, ActivationReceiver, ActivationSource, SignalRouter};
use crate::tray::{Tray, TrayCommand};

/// How often the foreground loop wakes up
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Locked,
}

/// Cloneable request to stop the foreground loop
#[derive(Debug, Clone, Default)]
pub struct QuitHandle(Arc<AtomicBool>);

impl QuitHandle {
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Coordinator<B, O: Overlay, T, N> {
    backend: Arc<B>,
    engine: InputBlockEngine<B, N>,
    listener: TriggerListener<B>,
    router: SignalRouter,
    activations: ActivationReceiver,
    overlay: O,
    overlay_handle: Option<O::Handle>,
    tray: T,
    guard: InstanceGuard,
    config: Config,
    config_path: PathBuf,
    state: LockState,
    quit: QuitHandle,
    poll_interval: Duration,
}

impl<B, O, T, N> Coordinator<B, O, T, N>
where
    B: KeyboardBackend,
    O: Overlay,
    T: Tray,
    N: Notifier,
{
    pub fn new(
        backend: Arc<B>,
        notifier: N,
        overlay: O,
        tray: T,
        guard: InstanceGuard,
        config: Config,
        config_path: PathBuf,
    ) -> Self {
        let (router, activations) = SignalRouter::new();
        let listener = TriggerListener::new(Arc::clone(&backend), router.clone(), config.trigger());
        let mut engine = InputBlockEngine::new(Arc::clone(&backend), notifier);
        engine.set_notifications_enabled(config.notifications_enabled);

        Self {
            backend,
            engine,
            listener,
            router,
            activations,
            overlay,
            overlay_handle: None,
            tray,
            guard,
            config,
            config_path,
            state: LockState::Unlocked,
            quit: QuitHandle::default(),
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Poll interval for both the foreground loop and the listener thread
    #[cfg(test)]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self.listener = self.listener.with_idle_poll(interval);
        self
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn quit_handle(&self) -> QuitHandle {
        self.quit.clone()
    }

    pub fn request_quit(&self) {
        info!("Quit requested");
        self.quit.request();
    }

    /// Register the hotkeys; failure is fatal
    pub fn start(&mut self) -> Result<()> {
        self.listener.start()
    }

    /// Run until quit is requested, then release everything
    pub fn run(&mut self) -> Result<()> {
        if let Err(e) = self.start() {
            self.shutdown();
            return Err(e);
        }

        info!("CatLock running, press {} to lock", self.listener.trigger());
        while !self.quit.is_requested() {
            self.tick();
            if self.quit.is_requested() {
                break;
            }
            thread::sleep(self.poll_interval);
        }

        self.shutdown();
        Ok(())
    }

    /// One pass of the foreground loop
    pub fn tick(&mut self) {
        while let Some(command) = self.tray.poll() {
            self.handle_command(command);
        }

        while let Some(activation) = self.activations.try_next() {
            match self.state {
                LockState::Unlocked => self.lock(activation),
                LockState::Locked => {
                    debug!("Ignoring activation from {:?} while locked", activation.source)
                }
            }
        }

        if self.state == LockState::Locked && self.release_requested() {
            self.unlock();
        }
    }

    fn release_requested(&mut self) -> bool {
        let release = self.router.release();
        match &self.overlay_handle {
            Some(handle) => self.overlay.poll(handle, release) == OverlayEvent::ReleaseRequested,
            None => release.is_set(),
        }
    }

    fn lock(&mut self, activation: Activation) {
        info!(
            "Locking keyboard ({:?}, requested {:?} ago)",
            activation.source,
            activation.at.elapsed()
        );
        self.router.release().clear();
        self.backend.stash_state();

        self.overlay_handle = self.overlay.show(self.config.opacity);
        if self.overlay_handle.is_none() {
            warn!("Overlay could not be shown, locking without it");
        }

        let trigger = self.listener.trigger();
        self.engine.engage(&trigger, self.listener.emergency());

        self.state = LockState::Locked;
        self.router.publish_locked(true);
        self.tray.set_locked(true);
    }

    fn unlock(&mut self) {
        info!("Unlocking keyboard");
        self.engine.disengage();
        if let Some(handle) = self.overlay_handle.take() {
            self.overlay.hide(handle);
        }

        self.state = LockState::Unlocked;
        self.router.publish_locked(false);
        self.router.release().clear();
        self.backend.stash_state();
        self.tray.set_locked(false);
    }

    fn handle_command(&mut self, command: TrayCommand) {
        debug!("Tray command {:?}", command);
        match command {
            TrayCommand::LockNow => self.router.request_activation(ActivationSource::Tray),
            TrayCommand::ToggleNotifications => {
                self.config.notifications_enabled = !self.config.notifications_enabled;
                self.engine
                    .set_notifications_enabled(self.config.notifications_enabled);
                self.tray.set_notifications(self.config.notifications_enabled);
                self.save_config();
            }
            TrayCommand::SetOpacity(opacity) => {
                self.config.opacity = opacity.clamp(0.0, 1.0);
                self.tray.set_opacity(self.config.opacity);
                self.save_config();
            }
            TrayCommand::ReloadSettings => {
                if let Err(e) = self.reload_settings() {
                    error!("Reloading settings failed: {}", e);
                }
            }
            TrayCommand::Quit => self.request_quit(),
        }
    }

    fn save_config(&self) {
        if let Err(e) = self.config.save(&self.config_path) {
            warn!("Settings not saved: {}", e);
        }
    }

    /// Re-read the config file; returns false when refused because locked
    pub fn reload_settings(&mut self) -> Result<bool> {
        if self.state == LockState::Locked {
            warn!("Not reloading settings while the keyboard is locked");
            return Ok(false);
        }

        let config = Config::load(&self.config_path, false)?;
        let trigger = config.trigger();
        let previous = self.listener.trigger();

        if trigger != previous {
            if let Err(e) = self.listener.restart(trigger.clone()) {
                warn!("Hotkey {} unusable, restoring {}", trigger, previous);
                self.listener.restart(previous)?;
                return Err(e);
            }
            self.overlay.set_unlock_hint(&trigger.to_string());
        }

        self.engine.set_notifications_enabled(config.notifications_enabled);
        self.tray.set_notifications(config.notifications_enabled);
        self.tray.set_opacity(config.opacity);
        self.config = config;

        info!("Settings reloaded (hotkey {})", trigger);
        Ok(true)
    }

    fn shutdown(&mut self) {
        info!("Shutting down");
        self.listener.stop();
        if let Err(e) = self.guard.release() {
            warn!("{}", e);
        }

        self.engine.disengage();
        if let Some(handle) = self.overlay_handle.take() {
            self.overlay.hide(handle);
        }
        self.state = LockState::Unlocked;
        self.router.publish_locked(false);
        self.router.release().clear();
        self.tray.set_locked(false);

        self.listener.shutdown();
    }
}
