//! "Keyboard locked" notification
//!
//! Fire-and-forget: the caller waits at most [`NOTIFY_WAIT`] for the
//! notification to be posted and never for it to be dismissed.

use std::time::Duration;

/// Upper bound on how long locking waits for the notification
pub const NOTIFY_WAIT: Duration = Duration::from_millis(250);

pub trait Notifier {
    fn notify_locked(&self, enabled: bool);
}

#[cfg(windows)]
pub use balloon::BalloonNotifier;

#[cfg(windows)]
mod balloon {
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use log::{debug, warn};
    use windows::core::w;
    use windows::Win32::Foundation::HWND;
    use windows::Win32::UI::Shell::{
        Shell_NotifyIconW, NIF_ICON, NIF_INFO, NIF_TIP, NIIF_INFO, NIM_ADD, NIM_DELETE,
        NOTIFYICONDATAW,
    };
    use windows::Win32::UI::WindowsAndMessaging::{
        CreateWindowExW, DestroyWindow, LoadIconW, HWND_MESSAGE, IDI_INFORMATION,
        WINDOW_EX_STYLE, WINDOW_STYLE,
    };

    use super::{Notifier, NOTIFY_WAIT};

    /// How long the balloon icon stays registered
    const BALLOON_LIFETIME: Duration = Duration::from_secs(3);
    const BALLOON_ID: u32 = 0xCA7;

    /// Shell balloon shown from a short-lived helper thread
    #[derive(Debug, Default)]
    pub struct BalloonNotifier;

    impl Notifier for BalloonNotifier {
        fn notify_locked(&self, enabled: bool) {
            if !enabled {
                return;
            }

            let (posted_tx, posted_rx) = mpsc::channel();
            let spawned = thread::Builder::new()
                .name("lock-notification".to_string())
                .spawn(move || {
                    let shown = unsafe { show_balloon() };
                    let _ = posted_tx.send(shown.is_some());
                    if let Some(hwnd) = shown {
                        thread::sleep(BALLOON_LIFETIME);
                        unsafe { remove_balloon(hwnd) };
                    }
                });

            if let Err(e) = spawned {
                warn!("Failed to spawn notification thread: {}", e);
                return;
            }

            match posted_rx.recv_timeout(NOTIFY_WAIT) {
                Ok(true) => debug!("Lock notification shown"),
                Ok(false) => warn!("Lock notification could not be shown"),
                Err(_) => debug!("Lock notification still pending, not waiting"),
            }
        }
    }

    fn icon_data(hwnd: HWND) -> NOTIFYICONDATAW {
        NOTIFYICONDATAW {
            cbSize: std::mem::size_of::<NOTIFYICONDATAW>() as u32,
            hWnd: hwnd,
            uID: BALLOON_ID,
            ..Default::default()
        }
    }

    fn copy_wide(dst: &mut [u16], text: &str) {
        for (slot, unit) in dst.iter_mut().zip(text.encode_utf16()) {
            *slot = unit;
        }
        if let Some(last) = dst.last_mut() {
            *last = 0;
        }
    }

    unsafe fn show_balloon() -> Option<HWND> {
        let hwnd = CreateWindowExW(
            WINDOW_EX_STYLE(0),
            w!("STATIC"),
            w!("CatLock Notification"),
            WINDOW_STYLE(0),
            0,
            0,
            0,
            0,
            HWND_MESSAGE,
            None,
            None,
            None,
        )
        .ok()?;

        let mut data = icon_data(hwnd);
        data.uFlags = NIF_ICON | NIF_TIP | NIF_INFO;
        data.hIcon = LoadIconW(None, IDI_INFORMATION).unwrap_or_default();
        data.dwInfoFlags = NIIF_INFO;
        copy_wide(&mut data.szTip, "CatLock");
        copy_wide(&mut data.szInfoTitle, "Keyboard Locked");
        copy_wide(&mut data.szInfo, "Press the hotkey again to unlock");

        if Shell_NotifyIconW(NIM_ADD, &data).as_bool() {
            Some(hwnd)
        } else {
            let _ = DestroyWindow(hwnd);
            None
        }
    }

    unsafe fn remove_balloon(hwnd: HWND) {
        let data = icon_data(hwnd);
        let _ = Shell_NotifyIconW(NIM_DELETE, &data);
        let _ = DestroyWindow(hwnd);
    }
}
