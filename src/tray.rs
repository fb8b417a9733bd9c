//! System tray icon and menu
//!
//! The tray only produces commands; the coordinator decides what they mean.

/// Opacity presets offered in the tray menu
pub const OPACITY_PRESETS: &[f32] = &[0.05, 0.1, 0.3, 0.5, 0.7, 0.9];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrayCommand {
    LockNow,
    ToggleNotifications,
    SetOpacity(f32),
    ReloadSettings,
    Quit,
}

pub trait Tray {
    /// Next pending menu command, if any
    fn poll(&mut self) -> Option<TrayCommand>;

    fn set_locked(&mut self, locked: bool);

    fn set_notifications(&mut self, enabled: bool);

    fn set_opacity(&mut self, opacity: f32);
}

/// Index of the preset matching `opacity`, if any
pub fn opacity_preset(opacity: f32) -> Option<usize> {
    OPACITY_PRESETS
        .iter()
        .position(|preset| (preset - opacity).abs() < 0.001)
}

#[cfg(windows)]
pub use win32::Win32Tray;

#[cfg(windows)]
mod win32 {
    use log::info;
    use muda::{CheckMenuItem, Menu, MenuEvent, MenuItem, PredefinedMenuItem, Submenu};
    use tray_icon::{Icon, TrayIcon, TrayIconBuilder};
    use windows::Win32::UI::WindowsAndMessaging::*;

    use super::{opacity_preset, Tray, TrayCommand, OPACITY_PRESETS};
    use crate::config::Config;
    use crate::error::Result;

    const MENU_LOCK: &str = "lock";
    const MENU_NOTIFICATIONS: &str = "notifications";
    const MENU_OPACITY_PREFIX: &str = "opacity:";
    const MENU_RELOAD: &str = "reload";
    const MENU_EXIT: &str = "exit";

    const ICON_SIZE: u32 = 64;

    pub struct Win32Tray {
        _icon: TrayIcon,
        lock_item: MenuItem,
        notifications_item: CheckMenuItem,
        opacity_items: Vec<CheckMenuItem>,
    }

    impl Win32Tray {
        pub fn new(config: &Config) -> Result<Self> {
            let menu = Menu::new();

            let lock_item = MenuItem::with_id(MENU_LOCK, "Lock Keyboard", true, None);
            let notifications_item = CheckMenuItem::with_id(
                MENU_NOTIFICATIONS,
                "Notifications",
                true,
                config.notifications_enabled,
                None,
            );

            let opacity_menu = Submenu::new("Overlay Opacity", true);
            let current = opacity_preset(config.opacity);
            let mut opacity_items = Vec::with_capacity(OPACITY_PRESETS.len());
            for (idx, preset) in OPACITY_PRESETS.iter().enumerate() {
                let item = CheckMenuItem::with_id(
                    format!("{MENU_OPACITY_PREFIX}{idx}"),
                    format!("{}%", (preset * 100.0).round() as u32),
                    true,
                    current == Some(idx),
                    None,
                );
                opacity_menu.append(&item)?;
                opacity_items.push(item);
            }

            let reload_item = MenuItem::with_id(MENU_RELOAD, "Reload Settings", true, None);
            let exit_item = MenuItem::with_id(MENU_EXIT, "Exit", true, None);

            menu.append(&lock_item)?;
            menu.append(&PredefinedMenuItem::separator())?;
            menu.append(&notifications_item)?;
            menu.append(&opacity_menu)?;
            menu.append(&reload_item)?;
            menu.append(&PredefinedMenuItem::separator())?;
            menu.append(&exit_item)?;

            let icon = TrayIconBuilder::new()
                .with_menu(Box::new(menu))
                .with_tooltip(format!("CatLock - {} to lock", config.hotkey))
                .with_icon(create_tray_icon()?)
                .build()?;

            info!("Tray icon created");

            Ok(Self {
                _icon: icon,
                lock_item,
                notifications_item,
                opacity_items,
            })
        }
    }

    impl Tray for Win32Tray {
        fn poll(&mut self) -> Option<TrayCommand> {
            pump_thread_messages();

            let event = MenuEvent::receiver().try_recv().ok()?;
            let id = event.id.0.as_str();
            match id {
                MENU_LOCK => Some(TrayCommand::LockNow),
                MENU_NOTIFICATIONS => Some(TrayCommand::ToggleNotifications),
                MENU_RELOAD => Some(TrayCommand::ReloadSettings),
                MENU_EXIT => Some(TrayCommand::Quit),
                _ => id
                    .strip_prefix(MENU_OPACITY_PREFIX)
                    .and_then(|idx| idx.parse::<usize>().ok())
                    .and_then(|idx| OPACITY_PRESETS.get(idx))
                    .map(|opacity| TrayCommand::SetOpacity(*opacity)),
            }
        }

        fn set_locked(&mut self, locked: bool) {
            self.lock_item.set_enabled(!locked);
            self.lock_item.set_text(if locked {
                "Keyboard Locked"
            } else {
                "Lock Keyboard"
            });
        }

        fn set_notifications(&mut self, enabled: bool) {
            self.notifications_item.set_checked(enabled);
        }

        fn set_opacity(&mut self, opacity: f32) {
            let current = opacity_preset(opacity);
            for (idx, item) in self.opacity_items.iter().enumerate() {
                item.set_checked(current == Some(idx));
            }
        }
    }

    /// Windows messages for the tray and overlay windows arrive on this thread
    fn pump_thread_messages() {
        unsafe {
            let mut msg = MSG::default();
            while PeekMessageW(&mut msg, None, 0, 0, PM_REMOVE).as_bool() {
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }
    }

    /// Padlock drawn in high-contrast blue and orange
    fn create_tray_icon() -> Result<Icon> {
        let size = ICON_SIZE as f32;
        let image = image::RgbaImage::from_fn(ICON_SIZE, ICON_SIZE, |x, y| {
            let (fx, fy) = (x as f32 + 0.5, y as f32 + 0.5);
            let center = size / 2.0;

            // Shackle: ring in the upper half
            let ring = ((fx - center).powi(2) + (fy - 24.0).powi(2)).sqrt();
            let on_shackle = fy < 30.0 && (11.0..17.0).contains(&ring);

            // Body: rounded rectangle in the lower half
            let on_body = (12.0..52.0).contains(&fx) && (28.0..58.0).contains(&fy);
            let keyhole = ((fx - center).powi(2) + (fy - 40.0).powi(2)).sqrt() < 4.5
                || ((center - 2.0)..(center + 2.0)).contains(&fx) && (40.0..50.0).contains(&fy);

            if on_body && keyhole {
                image::Rgba([0xFF, 0x6D, 0x00, 0xFF])
            } else if on_body || on_shackle {
                image::Rgba([0x15, 0x65, 0xC0, 0xFF])
            } else {
                image::Rgba([0, 0, 0, 0])
            }
        });

        Ok(Icon::from_rgba(image.into_raw(), ICON_SIZE, ICON_SIZE)?)
    }
}
