//! Background thread that keeps the lock/unlock hotkeys registered
//!
//! Lifecycle: Stopped -> Starting -> Running -> Stopping -> Stopped.
//! `start` and `stop` are serialized by one control mutex, and a restart
//! joins the previous thread before registering again so two threads never
//! own the hook registrations at once.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use log::{debug, info, warn};

use crate::backend::KeyboardBackend;
use crate::error::{Error, Result};
use crate::signal::SignalRouter;
use crate::trigger::TriggerSpec;

/// How often the idle listener checks whether it should stop
pub const IDLE_POLL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Stopped,
    Starting,
    Running,
    Stopping,
}

struct Control {
    trigger: TriggerSpec,
    thread: Option<JoinHandle<()>>,
}

pub struct TriggerListener<B> {
    backend: Arc<B>,
    router: SignalRouter,
    emergency: TriggerSpec,
    idle_poll: Duration,
    control: Mutex<Control>,
    lifecycle: Arc<Mutex<Lifecycle>>,
    /// Thread currently running the listener body
    owner: Arc<Mutex<Option<ThreadId>>>,
}

impl<B: KeyboardBackend> TriggerListener<B> {
    pub fn new(backend: Arc<B>, router: SignalRouter, trigger: TriggerSpec) -> Self {
        Self {
            backend,
            router,
            emergency: TriggerSpec::emergency(),
            idle_poll: IDLE_POLL,
            control: Mutex::new(Control {
                trigger,
                thread: None,
            }),
            lifecycle: Arc::new(Mutex::new(Lifecycle::Stopped)),
            owner: Arc::new(Mutex::new(None)),
        }
    }

    #[cfg(test)]
    pub fn with_idle_poll(mut self, idle_poll: Duration) -> Self {
        self.idle_poll = idle_poll;
        self
    }

    #[cfg(test)]
    pub fn lifecycle(&self) -> Lifecycle {
        *lock(&self.lifecycle)
    }

    pub fn trigger(&self) -> TriggerSpec {
        lock(&self.control).trigger.clone()
    }

    pub fn emergency(&self) -> &TriggerSpec {
        &self.emergency
    }

    /// Register the hotkeys on a fresh background thread
    ///
    /// Any previous listener thread is stopped and joined first. Returns once
    /// registration has succeeded or failed.
    pub fn start(&self) -> Result<()> {
        let mut control = self.control()?;
        self.start_locked(&mut control)
    }

    /// Replace the hotkey and restart the listener with it
    pub fn restart(&self, trigger: TriggerSpec) -> Result<()> {
        let mut control = self.control()?;
        info!("Restarting trigger listener with hotkey {}", trigger);
        control.trigger = trigger;
        self.start_locked(&mut control)
    }

    /// Ask the listener thread to unregister and exit; does not wait
    pub fn stop(&self) {
        let _control = lock(&self.control);
        let mut lifecycle = lock(&self.lifecycle);
        if matches!(*lifecycle, Lifecycle::Starting | Lifecycle::Running) {
            debug!("Stopping trigger listener");
            *lifecycle = Lifecycle::Stopping;
        }
    }

    /// Stop and wait for the listener thread to finish
    pub fn shutdown(&self) {
        let mut control = lock(&self.control);
        if let Err(e) = self.join_previous(&mut control) {
            warn!("Trigger listener not joined: {}", e);
        }
    }

    /// Control lock for a (re)start; the listener thread itself may not take it
    fn control(&self) -> Result<MutexGuard<'_, Control>> {
        if *lock(&self.owner) == Some(thread::current().id()) {
            warn!("Trigger listener asked to restart from its own thread");
            return Err(Error::ListenerSelfRestart);
        }
        Ok(lock(&self.control))
    }

    fn start_locked(&self, control: &mut Control) -> Result<()> {
        self.join_previous(control)?;

        self.backend.stash_state();
        self.set_lifecycle(Lifecycle::Starting);

        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        let backend = Arc::clone(&self.backend);
        let router = self.router.clone();
        let lifecycle = Arc::clone(&self.lifecycle);
        let owner = Arc::clone(&self.owner);
        let trigger = control.trigger.clone();
        let emergency = self.emergency.clone();
        let idle_poll = self.idle_poll;

        let spawned = thread::Builder::new()
            .name("trigger-listener".to_string())
            .spawn(move || {
                *lock(&owner) = Some(thread::current().id());

                let registered = register(backend.as_ref(), &router, &trigger, &emergency);
                let ok = registered.is_ok();
                let _ = ready_tx.send(registered);

                if ok {
                    while matches!(
                        *lock(&lifecycle),
                        Lifecycle::Starting | Lifecycle::Running
                    ) {
                        thread::sleep(idle_poll);
                    }
                }

                backend.remove_all_hotkeys();
                backend.stash_state();
                *lock(&owner) = None;
                debug!("Trigger listener thread exiting");
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.set_lifecycle(Lifecycle::Stopped);
                return Err(Error::Spawn("trigger listener", e));
            }
        };

        let outcome = match ready_rx.recv() {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::ListenerCrashed),
        };

        match outcome {
            Ok(()) => {
                control.thread = Some(handle);
                self.set_lifecycle(Lifecycle::Running);
                info!(
                    "Trigger listener running (hotkey {}, emergency {})",
                    control.trigger, self.emergency
                );
                Ok(())
            }
            Err(e) => {
                let _ = handle.join();
                self.set_lifecycle(Lifecycle::Stopped);
                Err(e)
            }
        }
    }

    fn join_previous(&self, control: &mut Control) -> Result<()> {
        let Some(previous) = control.thread.take() else {
            return Ok(());
        };

        if previous.thread().id() == thread::current().id() {
            control.thread = Some(previous);
            return Err(Error::ListenerSelfRestart);
        }

        {
            let mut lifecycle = lock(&self.lifecycle);
            if *lifecycle != Lifecycle::Stopped {
                *lifecycle = Lifecycle::Stopping;
            }
        }

        if previous.join().is_err() {
            warn!("Previous trigger listener thread panicked");
            // Its registrations may have survived the panic.
            self.backend.remove_all_hotkeys();
        }
        self.set_lifecycle(Lifecycle::Stopped);
        debug!("Previous trigger listener joined");
        Ok(())
    }

    fn set_lifecycle(&self, next: Lifecycle) {
        *lock(&self.lifecycle) = next;
    }
}

fn register<B: KeyboardBackend + ?Sized>(
    backend: &B,
    router: &SignalRouter,
    trigger: &TriggerSpec,
    emergency: &TriggerSpec,
) -> Result<()> {
    let mut triggers = vec![trigger];
    if emergency != trigger {
        triggers.push(emergency);
    }

    for spec in triggers {
        let router = router.clone();
        if let Err(source) = backend.add_hotkey(spec, Arc::new(move || router.fire())) {
            backend.remove_all_hotkeys();
            return Err(Error::TriggerRegistration {
                hotkey: spec.to_string(),
                source,
            });
        }
        debug!("Registered hotkey {}", spec);
    }
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;

    const FAST: Duration = Duration::from_millis(5);

    fn listener(hotkey: &str) -> (Arc<FakeBackend>, TriggerListener<FakeBackend>, crate::signal::ActivationReceiver) {
        let backend = Arc::new(FakeBackend::new());
        let (router, activations) = SignalRouter::new();
        let listener = TriggerListener::new(
            Arc::clone(&backend),
            router,
            TriggerSpec::parse(hotkey).unwrap(),
        )
        .with_idle_poll(FAST);
        (backend, listener, activations)
    }

    #[test]
    fn test_start_registers_trigger_and_emergency() {
        let (backend, listener, activations) = listener("ctrl+b");

        listener.start().unwrap();

        assert_eq!(listener.lifecycle(), Lifecycle::Running);
        assert_eq!(backend.hotkey_count(), 2);
        assert_eq!(backend.press("ctrl+b"), 1);
        assert_eq!(backend.press("ctrl+alt+shift+u"), 1);
        assert!(activations.try_next().is_some());
        assert!(activations.try_next().is_some());

        listener.shutdown();
    }

    #[test]
    fn test_emergency_not_registered_twice() {
        let (backend, listener, _activations) = listener("ctrl+alt+shift+u");

        listener.start().unwrap();

        assert_eq!(backend.hotkey_count(), 1);
        listener.shutdown();
    }

    #[test]
    fn test_stop_unregisters_after_join() {
        let (backend, listener, _activations) = listener("ctrl+b");
        listener.start().unwrap();

        listener.stop();
        assert_eq!(listener.lifecycle(), Lifecycle::Stopping);

        listener.shutdown();
        assert_eq!(listener.lifecycle(), Lifecycle::Stopped);
        assert_eq!(backend.hotkey_count(), 0);
    }

    #[test]
    fn test_restart_never_duplicates_hooks() {
        let (backend, listener, _activations) = listener("ctrl+b");

        for _ in 0..5 {
            listener.start().unwrap();
            assert_eq!(backend.hotkey_count(), 2);
        }
        assert_eq!(backend.registrations(), 10);

        listener.shutdown();
        assert_eq!(backend.hotkey_count(), 0);
    }

    #[test]
    fn test_restart_with_new_trigger() {
        let (backend, listener, activations) = listener("ctrl+b");
        listener.start().unwrap();

        listener.restart(TriggerSpec::parse("ctrl+q").unwrap()).unwrap();

        assert_eq!(listener.trigger().to_string(), "ctrl+q");
        assert_eq!(backend.press("ctrl+b"), 0);
        assert_eq!(backend.press("ctrl+q"), 1);
        assert!(activations.try_next().is_some());
        listener.shutdown();
    }

    #[test]
    fn test_concurrent_starts_leave_one_registration() {
        let (backend, listener, _activations) = listener("ctrl+b");
        let listener = Arc::new(listener);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let listener = Arc::clone(&listener);
                thread::spawn(move || listener.start().unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(backend.hotkey_count(), 2);
        listener.shutdown();
    }

    #[test]
    fn test_registration_failure_is_fatal() {
        let (backend, listener, _activations) = listener("ctrl+b");
        backend.fail_hotkey_registration(true);

        let result = listener.start();

        assert!(matches!(result, Err(Error::TriggerRegistration { .. })));
        assert_eq!(listener.lifecycle(), Lifecycle::Stopped);
        assert_eq!(backend.hotkey_count(), 0);
    }

    #[test]
    fn test_unresolvable_hotkey_fails_registration() {
        let (_backend, listener, _activations) = listener("ctrl+nosuchkey");

        assert!(matches!(
            listener.start(),
            Err(Error::TriggerRegistration { .. })
        ));
    }

    #[test]
    fn test_start_and_stop_flush_stale_key_state() {
        let (backend, listener, _activations) = listener("ctrl+b");

        listener.start().unwrap();
        assert_eq!(backend.stash_count(), 1);

        // The restart flushes once as the old thread exits and once on start.
        listener.start().unwrap();
        assert_eq!(backend.stash_count(), 3);

        listener.shutdown();
        assert_eq!(backend.stash_count(), 4);
    }

    #[test]
    fn test_start_from_listener_thread_is_refused() {
        let (backend, listener, _activations) = listener("ctrl+b");
        let listener = Arc::new(listener);
        let outcomes = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&listener);
        let seen = Arc::clone(&outcomes);
        backend.on_add_hotkey(move || {
            if let Some(listener) = weak.upgrade() {
                let refused = matches!(listener.start(), Err(Error::ListenerSelfRestart));
                seen.lock().unwrap().push(refused);
            }
        });

        listener.start().unwrap();

        let outcomes = outcomes.lock().unwrap().clone();
        assert_eq!(outcomes, vec![true, true]);
        assert_eq!(listener.lifecycle(), Lifecycle::Running);
        assert_eq!(backend.hotkey_count(), 2);
        listener.shutdown();
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let (_backend, listener, _activations) = listener("ctrl+b");

        listener.stop();
        listener.shutdown();

        assert_eq!(listener.lifecycle(), Lifecycle::Stopped);
    }
}
