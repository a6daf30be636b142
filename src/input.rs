use crate::error::ScriptError;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

pub type KeyCode = u32;

/// Symbolic key names understood by `keyboard.getKey`, mapped to driver key codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTable {
    codes: HashMap<String, KeyCode>,
}

impl KeyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a JSON key table and layers it over the defaults. Falls back to the
    /// defaults (with a warning) when the file is missing or malformed.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<KeyTableFile>(&contents) {
                Ok(config) => Self::from_config(config, &path.display().to_string()),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "key_table_parse_failed");
                    Self::default()
                }
            },
            Err(err) => {
                warn!(path = %path.display(), error = %err, "key_table_read_failed");
                Self::default()
            }
        }
    }

    fn from_config(config: KeyTableFile, origin: &str) -> Self {
        let mut table = Self::default();
        for (name, code) in config.keys {
            let normalized = normalize(&name);
            if normalized.is_empty() {
                warn!(origin, "key_table_empty_name_ignored");
                continue;
            }
            table.codes.insert(normalized, code);
        }
        table
    }

    pub fn insert(&mut self, name: &str, code: KeyCode) {
        self.codes.insert(normalize(name), code);
    }

    /// Looks up a key code; names are matched case-insensitively.
    pub fn code(&self, name: &str) -> Result<KeyCode, ScriptError> {
        self.codes.get(&normalize(name)).copied().ok_or_else(|| ScriptError::UnknownKey(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

impl Default for KeyTable {
    fn default() -> Self {
        let mut codes = HashMap::new();
        for (name, code) in DEFAULT_KEYS {
            codes.insert((*name).to_string(), *code);
        }
        Self { codes }
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}

// DirectInput scan-code numbering.
const DEFAULT_KEYS: &[(&str, KeyCode)] = &[
    ("ESCAPE", 1),
    ("1", 2),
    ("2", 3),
    ("3", 4),
    ("4", 5),
    ("5", 6),
    ("6", 7),
    ("7", 8),
    ("8", 9),
    ("9", 10),
    ("0", 11),
    ("BACK", 14),
    ("TAB", 15),
    ("Q", 16),
    ("W", 17),
    ("E", 18),
    ("R", 19),
    ("T", 20),
    ("Y", 21),
    ("U", 22),
    ("I", 23),
    ("O", 24),
    ("P", 25),
    ("RETURN", 28),
    ("LCONTROL", 29),
    ("A", 30),
    ("S", 31),
    ("D", 32),
    ("F", 33),
    ("G", 34),
    ("H", 35),
    ("J", 36),
    ("K", 37),
    ("L", 38),
    ("LSHIFT", 42),
    ("Z", 44),
    ("X", 45),
    ("C", 46),
    ("V", 47),
    ("B", 48),
    ("N", 49),
    ("M", 50),
    ("RSHIFT", 54),
    ("SPACE", 57),
    ("RCONTROL", 157),
    ("UP", 200),
    ("LEFT", 203),
    ("RIGHT", 205),
    ("DOWN", 208),
];

#[derive(Debug, Deserialize)]
struct KeyTableFile {
    #[serde(default)]
    keys: HashMap<String, KeyCode>,
}

pub enum InputEvent {
    Key { code: KeyCode, pressed: bool },
    CursorPos { x: f32, y: f32 },
    Other,
}

/// Mutable collector fed by the platform driver; frozen into an [`InputSnapshot`] once per frame.
pub struct InputState {
    keys: Arc<KeyTable>,
    pressed: BTreeSet<KeyCode>,
    cursor: (f32, f32),
}

impl InputState {
    pub fn new() -> Self {
        Self::with_keys(KeyTable::default())
    }

    pub fn with_keys(keys: KeyTable) -> Self {
        Self { keys: Arc::new(keys), pressed: BTreeSet::new(), cursor: (0.0, 0.0) }
    }

    pub fn keys(&self) -> &KeyTable {
        &self.keys
    }

    pub fn push(&mut self, ev: InputEvent) {
        match ev {
            InputEvent::Key { code, pressed: true } => {
                self.pressed.insert(code);
            }
            InputEvent::Key { code, pressed: false } => {
                self.pressed.remove(&code);
            }
            InputEvent::CursorPos { x, y } => self.cursor = (x, y),
            InputEvent::Other => {}
        }
    }

    /// Convenience for drivers and fixtures that speak in key names.
    pub fn set_key(&mut self, name: &str, pressed: bool) -> Result<(), ScriptError> {
        let code = self.keys.code(name)?;
        self.push(InputEvent::Key { code, pressed });
        Ok(())
    }

    pub fn release_all(&mut self) {
        self.pressed.clear();
    }

    pub fn snapshot(&self) -> InputSnapshot {
        InputSnapshot { keys: Arc::clone(&self.keys), pressed: self.pressed.clone(), mouse: self.cursor }
    }
}

impl Default for InputState {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-frame, read-only view of the keyboard and mouse.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSnapshot {
    keys: Arc<KeyTable>,
    pressed: BTreeSet<KeyCode>,
    mouse: (f32, f32),
}

impl InputSnapshot {
    pub fn key(&self, name: &str) -> Result<KeyCode, ScriptError> {
        self.keys.code(name)
    }

    pub fn is_pressed(&self, code: KeyCode) -> bool {
        self.pressed.contains(&code)
    }

    pub fn is_named_pressed(&self, name: &str) -> Result<bool, ScriptError> {
        Ok(self.is_pressed(self.key(name)?))
    }

    pub fn mouse_x(&self) -> f32 {
        self.mouse.0
    }

    pub fn mouse_y(&self) -> f32 {
        self.mouse.1
    }
}

impl Default for InputSnapshot {
    fn default() -> Self {
        InputState::default().snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn snapshot_is_frozen_at_publish_time() {
        let mut state = InputState::new();
        state.set_key("up", true).unwrap();
        state.push(InputEvent::CursorPos { x: 12.5, y: -3.0 });
        let frame = state.snapshot();
        state.set_key("UP", false).unwrap();

        let up = frame.key("UP").unwrap();
        assert!(frame.is_pressed(up));
        assert!(!state.snapshot().is_pressed(up));
        assert_eq!(frame.mouse_x(), 12.5);
        assert_eq!(frame.mouse_y(), -3.0);
    }

    #[test]
    fn unknown_key_names_are_rejected() {
        let snapshot = InputSnapshot::default();
        let err = snapshot.key("HYPER").unwrap_err();
        assert_eq!(err, ScriptError::UnknownKey("HYPER".to_string()));
    }

    #[test]
    fn key_table_file_extends_defaults() {
        let mut file = NamedTempFile::new().expect("temp key table");
        write!(file, r#"{{ "keys": {{ "jump": 57, "fire": 300 }} }}"#).expect("write key table");
        let table = KeyTable::load_or_default(file.path());
        assert_eq!(table.code("JUMP"), Ok(57));
        assert_eq!(table.code("fire"), Ok(300));
        assert_eq!(table.code("A"), Ok(30));
    }

    #[test]
    fn malformed_key_table_falls_back_to_defaults() {
        let mut file = NamedTempFile::new().expect("temp key table");
        write!(file, "not json").expect("write key table");
        assert_eq!(KeyTable::load_or_default(file.path()), KeyTable::default());
    }
}
