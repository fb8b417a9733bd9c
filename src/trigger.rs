//! Hotkey combinations that lock and unlock the keyboard
//!
//! A trigger is an ordered list of logical key names ("ctrl", "shift", "l").
//! Generic modifiers stand for every physical variant of that modifier, so
//! "ctrl" covers both the left and the right control key.

use std::fmt;

use crate::error::{Error, Result};

/// Always-active unlock combination, independent of the user's hotkey
pub const EMERGENCY_HOTKEY: &str = "ctrl+alt+shift+u";

/// Generic modifier names and the physical keys they stand for
const MODIFIER_VARIANTS: &[(&str, &[&str])] = &[
    ("ctrl", &["ctrl", "left ctrl", "right ctrl"]),
    ("shift", &["shift", "left shift", "right shift"]),
    ("alt", &["alt", "left alt", "right alt"]),
    ("windows", &["windows", "left windows", "right windows"]),
];

/// A parsed hotkey combination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSpec {
    keys: Vec<String>,
}

impl TriggerSpec {
    /// Parse a hotkey string such as "ctrl+b" or "Ctrl + Shift + L"
    pub fn parse(hotkey: &str) -> Result<Self> {
        let invalid = |reason| Error::InvalidHotkey {
            hotkey: hotkey.to_string(),
            reason,
        };

        if hotkey.trim().is_empty() {
            return Err(invalid("hotkey is empty"));
        }

        let mut keys: Vec<String> = Vec::new();
        for part in hotkey.split('+') {
            let part = part.trim().to_lowercase();
            if part.is_empty() {
                return Err(invalid("hotkey has an empty key"));
            }
            let name = normalize(&part).to_string();
            if !keys.contains(&name) {
                keys.push(name);
            }
        }

        Ok(Self { keys })
    }

    /// The fixed emergency unlock trigger
    pub fn emergency() -> Self {
        Self::parse(EMERGENCY_HOTKEY).unwrap_or_else(|_| Self {
            keys: vec!["ctrl".into(), "alt".into(), "shift".into(), "u".into()],
        })
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// One list of acceptable physical key names per key of the combination
    pub fn groups(&self) -> Vec<Vec<&str>> {
        self.keys.iter().map(|key| expand_key(key)).collect()
    }

    /// Every key name that must stay usable for this trigger to fire
    pub fn reachable_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for name in self.groups().into_iter().flatten() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}

impl fmt::Display for TriggerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.keys.join("+"))
    }
}

/// Expand a key name into all of its physical variants
pub fn expand_key(name: &str) -> Vec<&str> {
    MODIFIER_VARIANTS
        .iter()
        .find(|(generic, _)| *generic == name)
        .map(|(_, variants)| variants.to_vec())
        .unwrap_or_else(|| vec![name])
}

fn normalize(name: &str) -> &str {
    match name {
        "control" => "ctrl",
        "win" | "super" | "meta" | "cmd" => "windows",
        "option" => "alt",
        "esc" => "escape",
        "return" => "enter",
        "del" => "delete",
        "ins" => "insert",
        "pgup" => "page up",
        "pgdn" => "page down",
        "prtsc" => "print screen",
        other => other,
    }
}
