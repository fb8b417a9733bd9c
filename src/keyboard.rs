//! Low-level keyboard hook backend for Windows
//!
//! Uses SetWindowsHookEx with WH_KEYBOARD_LL on a dedicated message-loop
//! thread. Codes are virtual-key codes; keys Windows delivers without one
//! (VK 0xFF, e.g. laptop brightness keys) land in `VENDOR_CODES`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};
use windows::Win32::Foundation::{LPARAM, LRESULT, WPARAM};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::Input::KeyboardAndMouse::*;
use windows::Win32::UI::WindowsAndMessaging::*;

use crate::backend::{BackendError, Code, KeyboardBackend, TriggerCallback, VENDOR_CODES};
use crate::hook::{resolve_groups, spawn_scavenger, HookState, Verdict, SCAVENGE_INTERVAL};
use crate::trigger::TriggerSpec;

/// Virtual key reported for keys that have none
const VK_NONE: u32 = 0xFF;

/// Hook procedures cannot capture state, so the hook thread reads it from here
static HOOK: OnceLock<Arc<HookState>> = OnceLock::new();

/// Media and browser keys have no scan code mapping but are still real keys
const MEDIA_KEYS: &[u16] = &[
    0xA6, 0xA7, 0xA8, 0xA9, 0xAA, 0xAB, 0xAC, // browser
    0xAD, 0xAE, 0xAF, // volume
    0xB0, 0xB1, 0xB2, 0xB3, // media transport
    0xB4, 0xB5, 0xB6, 0xB7, // launch
];

pub struct Win32Keyboard {
    hook: Arc<HookState>,
    hook_thread: Option<JoinHandle<()>>,
    hook_thread_id: u32,
    scavenger: Option<JoinHandle<()>>,
    stop_scavenger: Arc<AtomicBool>,
}

impl Win32Keyboard {
    /// Install the low-level keyboard hook on its own thread
    pub fn install() -> Result<Self, BackendError> {
        let hook = Arc::clone(HOOK.get_or_init(|| Arc::new(HookState::new())));

        let (ready_tx, ready_rx) = oneshot::channel::<Result<u32, BackendError>>();

        let hook_thread = thread::Builder::new()
            .name("keyboard-hook".to_string())
            .spawn(move || {
                let installed =
                    unsafe { SetWindowsHookExW(WH_KEYBOARD_LL, Some(keyboard_hook_proc), None, 0) };

                let hhook = match installed {
                    Ok(hhook) => hhook,
                    Err(e) => {
                        let _ = ready_tx.send(Err(BackendError::HookInstall(e.into())));
                        return;
                    }
                };

                let _ = ready_tx.send(Ok(unsafe { GetCurrentThreadId() }));
                info!("Keyboard hook installed");

                // Low-level hooks only run while this thread pumps messages
                unsafe {
                    let mut msg = MSG::default();
                    while GetMessageW(&mut msg, None, 0, 0).as_bool() {
                        let _ = TranslateMessage(&msg);
                        DispatchMessageW(&msg);
                    }
                    let _ = UnhookWindowsHookEx(hhook);
                }

                info!("Keyboard hook removed");
            })
            .map_err(BackendError::HookInstall)?;

        let hook_thread_id = match ready_rx.recv() {
            Ok(Ok(id)) => id,
            Ok(Err(e)) => {
                let _ = hook_thread.join();
                return Err(e);
            }
            Err(_) => return Err(BackendError::HookThreadCrashed),
        };

        let stop_scavenger = Arc::new(AtomicBool::new(false));
        let scavenger = match spawn_scavenger(
            Arc::clone(&hook),
            Arc::clone(&stop_scavenger),
            SCAVENGE_INTERVAL,
        ) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Stale key scavenger not started: {}", e);
                None
            }
        };

        Ok(Self {
            hook,
            hook_thread: Some(hook_thread),
            hook_thread_id,
            scavenger,
            stop_scavenger,
        })
    }
}

impl KeyboardBackend for Win32Keyboard {
    fn resolve_codes(&self, name: &str) -> Vec<Code> {
        key_codes(name)
    }

    fn block_code(&self, code: Code) -> Result<(), BackendError> {
        if !is_blockable(code) {
            return Err(BackendError::UnsupportedCode(code));
        }
        self.hook.block(code);
        Ok(())
    }

    fn unblock_code(&self, code: Code) -> Result<(), BackendError> {
        self.hook.unblock(code);
        Ok(())
    }

    fn add_hotkey(
        &self,
        trigger: &TriggerSpec,
        callback: TriggerCallback,
    ) -> Result<(), BackendError> {
        let groups = resolve_groups(trigger, key_codes)?;
        debug!("Hotkey {} resolved to {:?}", trigger, groups);
        self.hook.add_hotkey(groups, callback);
        Ok(())
    }

    fn remove_all_hotkeys(&self) {
        self.hook.clear_hotkeys();
    }

    fn stash_state(&self) {
        self.hook.stash();
    }
}

impl Drop for Win32Keyboard {
    fn drop(&mut self) {
        self.stop_scavenger.store(true, Ordering::SeqCst);

        unsafe {
            let _ = PostThreadMessageW(self.hook_thread_id, WM_QUIT, WPARAM(0), LPARAM(0));
        }
        if let Some(handle) = self.hook_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.scavenger.take() {
            let _ = handle.join();
        }
    }
}

/// Whether Windows can deliver this code at all
fn is_blockable(code: Code) -> bool {
    match code {
        0 => false,
        1..=0xFE => {
            MEDIA_KEYS.contains(&(code as u16))
                || unsafe { MapVirtualKeyW(code, MAPVK_VK_TO_VSC_EX) } != 0
        }
        _ => VENDOR_CODES.contains(&code),
    }
}

/// Map a hook event to its code
fn event_code(kb: &KBDLLHOOKSTRUCT) -> Code {
    if kb.vkCode == VK_NONE {
        VENDOR_CODES.start + (kb.scanCode & 0xFF)
    } else {
        kb.vkCode
    }
}

/// Low-level keyboard hook procedure
unsafe extern "system" fn keyboard_hook_proc(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    if code == HC_ACTION as i32 {
        let kb = &*(lparam.0 as *const KBDLLHOOKSTRUCT);
        let message = wparam.0 as u32;
        let key_down = message == WM_KEYDOWN || message == WM_SYSKEYDOWN;

        if let Some(hook) = HOOK.get() {
            if hook.handle_event(event_code(kb), key_down) == Verdict::Suppress {
                return LRESULT(1);
            }
        }
    }

    CallNextHookEx(None, code, wparam, lparam)
}

fn vk(key: VIRTUAL_KEY) -> Vec<Code> {
    vec![key.0 as Code]
}

/// Virtual-key codes for a key name; empty when Windows has none
pub fn key_codes(name: &str) -> Vec<Code> {
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_ascii_alphanumeric() {
            return vec![c.to_ascii_uppercase() as Code];
        }
        return match c {
            ';' => vk(VK_OEM_1),
            '=' => vk(VK_OEM_PLUS),
            ',' => vk(VK_OEM_COMMA),
            '-' => vk(VK_OEM_MINUS),
            '.' => vk(VK_OEM_PERIOD),
            '/' => vk(VK_OEM_2),
            '`' => vk(VK_OEM_3),
            '[' => vk(VK_OEM_4),
            '\\' => vk(VK_OEM_5),
            ']' => vk(VK_OEM_6),
            '\'' => vk(VK_OEM_7),
            _ => Vec::new(),
        };
    }

    // Function keys
    if let Some(num) = name.strip_prefix('f').and_then(|n| n.parse::<Code>().ok()) {
        if (1..=24).contains(&num) {
            return vec![VK_F1.0 as Code + num - 1];
        }
        return Vec::new();
    }

    match name {
        "ctrl" => vk(VK_CONTROL),
        "left ctrl" => vk(VK_LCONTROL),
        "right ctrl" => vk(VK_RCONTROL),
        "shift" => vk(VK_SHIFT),
        "left shift" => vk(VK_LSHIFT),
        "right shift" => vk(VK_RSHIFT),
        "alt" => vk(VK_MENU),
        "left alt" => vk(VK_LMENU),
        "right alt" => vk(VK_RMENU),
        // There is no generic Windows key code
        "windows" => vec![VK_LWIN.0 as Code, VK_RWIN.0 as Code],
        "left windows" => vk(VK_LWIN),
        "right windows" => vk(VK_RWIN),
        "space" => vk(VK_SPACE),
        "enter" => vk(VK_RETURN),
        "escape" => vk(VK_ESCAPE),
        "tab" => vk(VK_TAB),
        "backspace" => vk(VK_BACK),
        "delete" => vk(VK_DELETE),
        "insert" => vk(VK_INSERT),
        "home" => vk(VK_HOME),
        "end" => vk(VK_END),
        "page up" | "pageup" => vk(VK_PRIOR),
        "page down" | "pagedown" => vk(VK_NEXT),
        "up" => vk(VK_UP),
        "down" => vk(VK_DOWN),
        "left" => vk(VK_LEFT),
        "right" => vk(VK_RIGHT),
        "caps lock" | "capslock" => vk(VK_CAPITAL),
        "num lock" | "numlock" => vk(VK_NUMLOCK),
        "scroll lock" | "scrolllock" => vk(VK_SCROLL),
        "pause" => vk(VK_PAUSE),
        "print screen" | "printscreen" => vk(VK_SNAPSHOT),
        "menu" | "apps" => vk(VK_APPS),
        "volume up" => vk(VK_VOLUME_UP),
        "volume down" => vk(VK_VOLUME_DOWN),
        "volume mute" => vk(VK_VOLUME_MUTE),
        "play/pause media" => vk(VK_MEDIA_PLAY_PAUSE),
        "next track" => vk(VK_MEDIA_NEXT_TRACK),
        "previous track" => vk(VK_MEDIA_PREV_TRACK),
        "stop media" => vk(VK_MEDIA_STOP),
        // Brightness keys never reach the keyboard hook as virtual keys
        _ => Vec::new(),
    }
}
