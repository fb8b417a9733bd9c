//! Full-screen overlay shown while the keyboard is locked
//!
//! The overlay lives on the foreground thread only. Other threads never call
//! into it; they raise the [`ReleaseSignal`], which the overlay notices on
//! its next poll and reports back to the coordinator.

use crate::signal::ReleaseSignal;

/// Result of one overlay poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayEvent {
    Idle,
    ReleaseRequested,
}

pub trait Overlay {
    type Handle;

    /// Create and show the overlay; `None` if the surface could not be created
    fn show(&mut self, opacity: f32) -> Option<Self::Handle>;

    fn hide(&mut self, handle: Self::Handle);

    /// Pump the surface's events and report whether release was requested
    fn poll(&mut self, handle: &Self::Handle, release: &ReleaseSignal) -> OverlayEvent;

    /// Update the unlock hotkey named on the overlay
    fn set_unlock_hint(&mut self, _hotkey: &str) {}
}

#[cfg(windows)]
pub use win32::Win32Overlay;

#[cfg(windows)]
mod win32 {
    use std::cell::RefCell;

    use log::{debug, warn};
    use windows::core::{w, PCWSTR};
    use windows::Win32::Foundation::*;
    use windows::Win32::Graphics::Gdi::*;
    use windows::Win32::System::LibraryLoader::GetModuleHandleW;
    use windows::Win32::UI::WindowsAndMessaging::*;

    use super::{Overlay, OverlayEvent};
    use crate::signal::ReleaseSignal;

    const OVERLAY_CLASS_NAME: PCWSTR = w!("CatLockOverlay");

    thread_local! {
        static PAINT_STATE: RefCell<Option<PaintState>> = const { RefCell::new(None) };
        static CLASS_REGISTERED: RefCell<bool> = const { RefCell::new(false) };
    }

    struct PaintState {
        color: (u8, u8, u8),
        text: Vec<u16>,
    }

    /// Layered topmost window spanning every monitor
    pub struct Win32Overlay {
        color: (u8, u8, u8),
        hotkey: String,
    }

    impl Win32Overlay {
        pub fn new(color: (u8, u8, u8), hotkey: &str) -> Self {
            Self {
                color,
                hotkey: hotkey.to_string(),
            }
        }

        fn message(&self) -> Vec<u16> {
            format!("Keyboard Locked - Press {} to unlock", self.hotkey)
                .encode_utf16()
                .collect()
        }
    }

    impl Overlay for Win32Overlay {
        type Handle = HWND;

        fn show(&mut self, opacity: f32) -> Option<HWND> {
            PAINT_STATE.with(|ps| {
                *ps.borrow_mut() = Some(PaintState {
                    color: self.color,
                    text: self.message(),
                });
            });

            let alpha = (opacity.clamp(0.0, 1.0) * 255.0) as u8;

            unsafe {
                let hinstance = GetModuleHandleW(None).ok()?;
                register_class(hinstance.into());

                // Virtual screen covers all monitors
                let x = GetSystemMetrics(SM_XVIRTUALSCREEN);
                let y = GetSystemMetrics(SM_YVIRTUALSCREEN);
                let width = GetSystemMetrics(SM_CXVIRTUALSCREEN);
                let height = GetSystemMetrics(SM_CYVIRTUALSCREEN);

                let hwnd = match CreateWindowExW(
                    WS_EX_LAYERED | WS_EX_TOPMOST | WS_EX_TOOLWINDOW,
                    OVERLAY_CLASS_NAME,
                    w!("CatLock Overlay"),
                    WS_POPUP | WS_VISIBLE,
                    x,
                    y,
                    width,
                    height,
                    None,
                    None,
                    hinstance,
                    None,
                ) {
                    Ok(hwnd) => hwnd,
                    Err(e) => {
                        warn!("Failed to create overlay window: {}", e);
                        return None;
                    }
                };

                if let Err(e) = SetLayeredWindowAttributes(hwnd, COLORREF(0), alpha, LWA_ALPHA) {
                    warn!("Failed to set overlay opacity: {}", e);
                }

                let _ = SetWindowPos(
                    hwnd,
                    HWND_TOPMOST,
                    0,
                    0,
                    0,
                    0,
                    SWP_NOMOVE | SWP_NOSIZE | SWP_SHOWWINDOW,
                );
                let _ = InvalidateRect(hwnd, None, true);
                let _ = UpdateWindow(hwnd);

                debug!("Overlay shown ({}x{} at {},{})", width, height, x, y);
                Some(hwnd)
            }
        }

        fn hide(&mut self, hwnd: HWND) {
            unsafe {
                let _ = DestroyWindow(hwnd);
            }
            debug!("Overlay destroyed");
        }

        fn poll(&mut self, hwnd: &HWND, release: &ReleaseSignal) -> OverlayEvent {
            unsafe {
                let mut msg = MSG::default();
                while PeekMessageW(&mut msg, *hwnd, 0, 0, PM_REMOVE).as_bool() {
                    let _ = TranslateMessage(&msg);
                    DispatchMessageW(&msg);
                }
            }

            if release.is_set() {
                OverlayEvent::ReleaseRequested
            } else {
                OverlayEvent::Idle
            }
        }

        fn set_unlock_hint(&mut self, hotkey: &str) {
            self.hotkey = hotkey.to_string();
        }
    }

    unsafe fn register_class(hinstance: HINSTANCE) {
        let registered = CLASS_REGISTERED.with(|r| *r.borrow());
        if registered {
            return;
        }

        let wc = WNDCLASSEXW {
            cbSize: std::mem::size_of::<WNDCLASSEXW>() as u32,
            style: CS_HREDRAW | CS_VREDRAW,
            lpfnWndProc: Some(overlay_wnd_proc),
            hInstance: hinstance,
            hCursor: LoadCursorW(None, IDC_ARROW).unwrap_or_default(),
            hbrBackground: HBRUSH::default(),
            lpszClassName: OVERLAY_CLASS_NAME,
            ..Default::default()
        };

        if RegisterClassExW(&wc) != 0 {
            CLASS_REGISTERED.with(|r| *r.borrow_mut() = true);
        }
    }

    unsafe extern "system" fn overlay_wnd_proc(
        hwnd: HWND,
        msg: u32,
        wparam: WPARAM,
        lparam: LPARAM,
    ) -> LRESULT {
        match msg {
            WM_PAINT => {
                PAINT_STATE.with(|ps| {
                    if let Some(state) = ps.borrow().as_ref() {
                        paint(hwnd, state);
                    }
                });
                LRESULT(0)
            }

            // Painted in WM_PAINT
            WM_ERASEBKGND => LRESULT(1),

            // Only the unlock hotkey may close the overlay
            WM_CLOSE => LRESULT(0),

            _ => DefWindowProcW(hwnd, msg, wparam, lparam),
        }
    }

    unsafe fn paint(hwnd: HWND, state: &PaintState) {
        let mut ps = PAINTSTRUCT::default();
        let hdc = BeginPaint(hwnd, &mut ps);

        let mut rect = RECT::default();
        let _ = GetClientRect(hwnd, &mut rect);

        let (r, g, b) = state.color;
        let brush = CreateSolidBrush(COLORREF(
            (r as u32) | ((g as u32) << 8) | ((b as u32) << 16),
        ));
        FillRect(hdc, &rect, brush);
        let _ = DeleteObject(brush);

        let font = CreateFontW(
            48,
            0,
            0,
            0,
            FW_BOLD.0 as i32,
            0,
            0,
            0,
            DEFAULT_CHARSET.0 as u32,
            OUT_DEFAULT_PRECIS.0 as u32,
            CLIP_DEFAULT_PRECIS.0 as u32,
            CLEARTYPE_QUALITY.0 as u32,
            DEFAULT_PITCH.0 as u32 | (FF_DONTCARE.0 as u32),
            w!("Segoe UI"),
        );

        let old_font = SelectObject(hdc, font);
        SetTextColor(hdc, COLORREF(0xFFFFFF));
        SetBkMode(hdc, TRANSPARENT);

        let mut text = state.text.clone();
        DrawTextW(
            hdc,
            &mut text,
            &mut rect,
            DT_CENTER | DT_VCENTER | DT_SINGLELINE,
        );

        SelectObject(hdc, old_font);
        let _ = DeleteObject(font);
        let _ = EndPaint(hwnd, &ps);
    }
}
