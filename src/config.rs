use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::engine::HardwareType;
use crate::error::{Error, Result};
use crate::input::KeyBinding;

/// When the Super Game Boy border is drawn around the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BorderVisibility {
    /// Only when the game supplies a custom border.
    #[default]
    Auto,
    Show,
    Hide,
}

impl BorderVisibility {
    pub fn shows_border(self, has_custom_border: bool) -> bool {
        match self {
            Self::Auto => has_custom_border,
            Self::Show => true,
            Self::Hide => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub window_width: u32,
    pub window_height: u32,
    pub limit_speed: bool,
    pub hardware_type: HardwareType,
    pub use_bootstrap_rom: bool,
    pub border_visibility: BorderVisibility,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roms_search_path: Option<PathBuf>,
    pub key_binds: Vec<KeyBinding>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            window_width: 768,
            window_height: 672,
            limit_speed: true,
            hardware_type: HardwareType::default(),
            use_bootstrap_rom: true,
            border_visibility: BorderVisibility::default(),
            roms_search_path: None,
            key_binds: KeyBinding::defaults(),
        }
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("gbrun").join("settings.toml");
        }
    }

    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("gbrun").join("settings.toml");
    }

    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join("gbrun")
            .join("settings.toml");
    }

    PathBuf::from("settings.toml")
}

/// Read and parse `path`, reporting why it couldn't be used.
pub fn try_load(path: &Path) -> Result<Settings> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::io(e, format!("reading settings {}", path.display())))?;
    toml::from_str::<Settings>(&text).map_err(|e| Error::Settings {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Load settings from `path`, falling back to defaults when the file is
/// missing or malformed.
pub fn load_from_file(path: &Path) -> Settings {
    if !path.exists() {
        info!("No settings at {}; using defaults", path.display());
        return Settings::default();
    }
    match try_load(path) {
        Ok(settings) => settings,
        Err(e) => {
            warn!("{e}; using defaults");
            Settings::default()
        }
    }
}

pub fn save_to_file(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::io(e, format!("creating {}", parent.display())))?;
    }

    let text = toml::to_string_pretty(settings).map_err(|e| Error::Settings {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    std::fs::write(path, text)
        .map_err(|e| Error::io(e, format!("writing settings {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{GameBoyKey, KeyCode};

    #[test]
    fn settings_survive_a_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");
        let settings = Settings {
            limit_speed: false,
            hardware_type: HardwareType::SuperGameBoy,
            border_visibility: BorderVisibility::Show,
            roms_search_path: Some(PathBuf::from("/games")),
            key_binds: vec![KeyBinding::new(GameBoyKey::A, KeyCode::Char('Z'))],
            ..Settings::default()
        };

        save_to_file(&path, &settings).unwrap();
        assert_eq!(load_from_file(&path), settings);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            "limit_speed = false\n\n[[key_binds]]\nbutton = \"start\"\nkey = \"Space\"\n",
        )
        .unwrap();

        let settings = load_from_file(&path);
        assert!(!settings.limit_speed);
        assert_eq!(settings.window_width, 768);
        assert_eq!(
            settings.key_binds,
            vec![KeyBinding::new(GameBoyKey::Start, KeyCode::Space)]
        );
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "limit_speed = \"sometimes\"").unwrap();

        assert!(matches!(try_load(&path), Err(Error::Settings { .. })));
        assert_eq!(load_from_file(&path), Settings::default());
    }

    #[test]
    fn auto_border_follows_the_cartridge() {
        assert!(BorderVisibility::Auto.shows_border(true));
        assert!(!BorderVisibility::Auto.shows_border(false));
        assert!(BorderVisibility::Show.shows_border(false));
        assert!(!BorderVisibility::Hide.shows_border(true));
    }
}
