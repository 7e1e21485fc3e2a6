use std::fmt;
use std::str::FromStr;

use log::trace;
use serde::{Deserialize, Serialize};

/// Physical key reported by the presentation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum KeyCode {
    Up,
    Down,
    Left,
    Right,
    Enter,
    Escape,
    Space,
    Tab,
    Backspace,
    Backslash,
    ShiftLeft,
    ShiftRight,
    /// Letter or digit key, always stored upper-case.
    Char(char),
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyCode::Up => f.write_str("Up"),
            KeyCode::Down => f.write_str("Down"),
            KeyCode::Left => f.write_str("Left"),
            KeyCode::Right => f.write_str("Right"),
            KeyCode::Enter => f.write_str("Enter"),
            KeyCode::Escape => f.write_str("Escape"),
            KeyCode::Space => f.write_str("Space"),
            KeyCode::Tab => f.write_str("Tab"),
            KeyCode::Backspace => f.write_str("Backspace"),
            KeyCode::Backslash => f.write_str("Backslash"),
            KeyCode::ShiftLeft => f.write_str("ShiftLeft"),
            KeyCode::ShiftRight => f.write_str("ShiftRight"),
            KeyCode::Char(c) => write!(f, "{c}"),
        }
    }
}

impl FromStr for KeyCode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let s = raw.trim();
        let key = match s {
            "ArrowUp" | "Up" => KeyCode::Up,
            "ArrowDown" | "Down" => KeyCode::Down,
            "ArrowLeft" | "Left" => KeyCode::Left,
            "ArrowRight" | "Right" => KeyCode::Right,
            "Enter" | "Return" => KeyCode::Enter,
            "Escape" => KeyCode::Escape,
            "Space" => KeyCode::Space,
            "Tab" => KeyCode::Tab,
            "Backspace" => KeyCode::Backspace,
            "Backslash" | "\\" => KeyCode::Backslash,
            "ShiftLeft" => KeyCode::ShiftLeft,
            "ShiftRight" => KeyCode::ShiftRight,
            _ => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if c.is_ascii_alphanumeric() => {
                        KeyCode::Char(c.to_ascii_uppercase())
                    }
                    _ => return Err(format!("unknown key '{s}'")),
                }
            }
        };
        Ok(key)
    }
}

impl TryFrom<String> for KeyCode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<KeyCode> for String {
    fn from(key: KeyCode) -> Self {
        key.to_string()
    }
}

/// Logical Game Boy button, plus the `None`/`All` sentinels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameBoyKey {
    None,
    Right,
    Left,
    Up,
    Down,
    A,
    B,
    Start,
    Select,
    All,
}

impl GameBoyKey {
    /// Slot order of the key state table.
    pub const SLOTS: [GameBoyKey; 10] = [
        GameBoyKey::None,
        GameBoyKey::Right,
        GameBoyKey::Left,
        GameBoyKey::Up,
        GameBoyKey::Down,
        GameBoyKey::A,
        GameBoyKey::B,
        GameBoyKey::Start,
        GameBoyKey::Select,
        GameBoyKey::All,
    ];

    /// Joypad bit(s) this button drives in the engine's key mask.
    pub const fn mask(self) -> u8 {
        match self {
            GameBoyKey::None => 0x00,
            GameBoyKey::Right => 0x01,
            GameBoyKey::Left => 0x02,
            GameBoyKey::Up => 0x04,
            GameBoyKey::Down => 0x08,
            GameBoyKey::A => 0x10,
            GameBoyKey::B => 0x20,
            GameBoyKey::Select => 0x40,
            GameBoyKey::Start => 0x80,
            GameBoyKey::All => 0xFF,
        }
    }

    pub fn slot(self) -> usize {
        Self::SLOTS
            .iter()
            .position(|&k| k == self)
            .unwrap_or_default()
    }
}

/// One configured mapping from a physical key to a Game Boy button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBinding {
    pub button: GameBoyKey,
    pub key: KeyCode,
}

impl KeyBinding {
    pub const fn new(button: GameBoyKey, key: KeyCode) -> Self {
        Self { button, key }
    }

    pub fn defaults() -> Vec<KeyBinding> {
        vec![
            KeyBinding::new(GameBoyKey::A, KeyCode::Char('A')),
            KeyBinding::new(GameBoyKey::B, KeyCode::Char('B')),
            KeyBinding::new(GameBoyKey::Up, KeyCode::Up),
            KeyBinding::new(GameBoyKey::Down, KeyCode::Down),
            KeyBinding::new(GameBoyKey::Left, KeyCode::Left),
            KeyBinding::new(GameBoyKey::Right, KeyCode::Right),
            KeyBinding::new(GameBoyKey::Start, KeyCode::Enter),
            KeyBinding::new(GameBoyKey::Select, KeyCode::Backslash),
        ]
    }
}

#[derive(Debug, Clone, Copy)]
struct KeySlot {
    button: GameBoyKey,
    key: Option<KeyCode>,
    pressed: bool,
}

/// Pressed/released state of every Game Boy button, indexed by the
/// physical key bound to it.
#[derive(Debug, Clone)]
pub struct KeyStateTable {
    slots: [KeySlot; 10],
}

impl Default for KeyStateTable {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyStateTable {
    pub fn new() -> Self {
        Self {
            slots: GameBoyKey::SLOTS.map(|button| KeySlot {
                button,
                key: None,
                pressed: false,
            }),
        }
    }

    /// Rebuild the key column from `bindings`. Buttons without a binding are
    /// left unbound and every button is released.
    pub fn load_settings(&mut self, bindings: &[KeyBinding]) {
        for slot in &mut self.slots {
            slot.key = bindings
                .iter()
                .rev()
                .find(|b| b.button == slot.button)
                .map(|b| b.key);
            slot.pressed = false;
        }
    }

    /// Record a key transition. Keys that aren't bound are ignored.
    pub fn set_state(&mut self, key: KeyCode, pressed: bool) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.key == Some(key)) {
            trace!("{:?} {}", slot.button, if pressed { "down" } else { "up" });
            slot.pressed = pressed;
        }
    }

    pub fn state_of_code(&self, key: KeyCode) -> bool {
        self.slots
            .iter()
            .find(|s| s.key == Some(key))
            .is_some_and(|s| s.pressed)
    }

    pub fn state_of(&self, button: GameBoyKey) -> bool {
        if button == GameBoyKey::None {
            return false;
        }
        self.slots[button.slot()].pressed
    }

    pub fn key_for(&self, button: GameBoyKey) -> Option<KeyCode> {
        self.slots[button.slot()].key
    }

    /// Union of the masks of every pressed button.
    pub fn down_keys(&self) -> u8 {
        self.slots
            .iter()
            .filter(|s| s.pressed && s.button != GameBoyKey::None)
            .fold(0, |keys, s| keys | s.button.mask())
    }

    pub fn release_all(&mut self) {
        for slot in &mut self.slots {
            slot.pressed = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> KeyStateTable {
        let mut table = KeyStateTable::new();
        table.load_settings(&KeyBinding::defaults());
        table
    }

    #[test]
    fn bound_key_presses_only_its_button() {
        let mut table = KeyStateTable::new();
        table.load_settings(&[KeyBinding::new(GameBoyKey::A, KeyCode::Char('X'))]);
        table.set_state(KeyCode::Char('X'), true);

        assert!(table.state_of(GameBoyKey::A));
        assert!(table.state_of_code(KeyCode::Char('X')));
        for other in GameBoyKey::SLOTS
            .into_iter()
            .filter(|&k| k != GameBoyKey::A)
        {
            assert!(!table.state_of(other), "{other:?} reported pressed");
        }
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let mut table = table();
        table.set_state(KeyCode::Char('Q'), true);
        assert_eq!(table.down_keys(), 0);
        assert!(!table.state_of_code(KeyCode::Char('Q')));
    }

    #[test]
    fn down_keys_unions_pressed_buttons() {
        let mut table = table();
        table.set_state(KeyCode::Right, true);
        table.set_state(KeyCode::Enter, true);
        table.set_state(KeyCode::Char('A'), true);
        assert_eq!(table.down_keys(), 0x01 | 0x80 | 0x10);

        table.set_state(KeyCode::Enter, false);
        assert_eq!(table.down_keys(), 0x01 | 0x10);
    }

    #[test]
    fn none_sentinel_never_reports_pressed() {
        let mut table = KeyStateTable::new();
        table.load_settings(&[KeyBinding::new(GameBoyKey::None, KeyCode::Space)]);
        table.set_state(KeyCode::Space, true);
        assert!(!table.state_of(GameBoyKey::None));
        assert_eq!(table.down_keys(), 0);
    }

    #[test]
    fn all_sentinel_presses_every_button() {
        let mut table = table();
        table.load_settings(&[KeyBinding::new(GameBoyKey::All, KeyCode::Tab)]);
        table.set_state(KeyCode::Tab, true);
        assert_eq!(table.down_keys(), 0xFF);
    }

    #[test]
    fn reload_rebinds_and_releases() {
        let mut table = table();
        table.set_state(KeyCode::Up, true);
        table.load_settings(&[KeyBinding::new(GameBoyKey::Up, KeyCode::Char('W'))]);

        assert!(!table.state_of(GameBoyKey::Up));
        assert_eq!(table.key_for(GameBoyKey::Up), Some(KeyCode::Char('W')));
        assert_eq!(table.key_for(GameBoyKey::Down), None);

        table.set_state(KeyCode::Up, true);
        assert!(!table.state_of(GameBoyKey::Up));
    }

    #[test]
    fn key_names_parse_and_print() {
        for name in ["Up", "Enter", "Backslash", "A", "7", "ShiftLeft"] {
            let key: KeyCode = name.parse().unwrap();
            assert_eq!(key.to_string(), name);
        }
        assert_eq!("ArrowLeft".parse::<KeyCode>(), Ok(KeyCode::Left));
        assert_eq!("z".parse::<KeyCode>(), Ok(KeyCode::Char('Z')));
        assert!("F13".parse::<KeyCode>().is_err());
    }
}
