use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    Ctrl,
    Alt,
    Shift,
    Cmd,
}

impl Modifier {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "ctrl" | "control" => Some(Modifier::Ctrl),
            "alt" | "option" => Some(Modifier::Alt),
            "shift" => Some(Modifier::Shift),
            "cmd" | "command" | "super" | "win" => Some(Modifier::Cmd),
            _ => None,
        }
    }

    fn token(self) -> &'static str {
        match self {
            Modifier::Ctrl => "ctrl",
            Modifier::Alt => "alt",
            Modifier::Shift => "shift",
            Modifier::Cmd => "cmd",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// Lowercase ASCII letter or digit.
    Char(char),
    /// F1 through F12.
    Function(u8),
    Escape,
    Tab,
    Enter,
    Space,
}

impl Key {
    fn parse(token: &str) -> Option<Self> {
        if let [c] = token.as_bytes() {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                return Some(Key::Char(char::from(*c)));
            }
        }

        match token {
            "esc" | "escape" => return Some(Key::Escape),
            "tab" => return Some(Key::Tab),
            "enter" | "return" => return Some(Key::Enter),
            "space" => return Some(Key::Space),
            _ => {}
        }

        token
            .strip_prefix('f')
            .and_then(|n| n.parse::<u8>().ok())
            .filter(|n| (1..=12).contains(n))
            .map(Key::Function)
    }

    fn token(self) -> String {
        match self {
            Key::Char(c) => c.to_string(),
            Key::Function(n) => format!("f{n}"),
            Key::Escape => "esc".to_string(),
            Key::Tab => "tab".to_string(),
            Key::Enter => "enter".to_string(),
            Key::Space => "space".to_string(),
        }
    }
}

/// Ordered key chord: one or more modifiers followed by exactly one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct KeyChord {
    modifiers: Vec<Modifier>,
    key: Key,
}

impl KeyChord {
    pub fn from_tokens<I, S>(tokens: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tokens: Vec<String> = tokens
            .into_iter()
            .map(|t| t.as_ref().trim().to_ascii_lowercase())
            .collect();
        let invalid = |reason: &str| ConfigError::InvalidKeyChord {
            chord: tokens.join("+"),
            reason: reason.to_string(),
        };

        let (last, leading) = tokens.split_last().ok_or_else(|| invalid("chord is empty"))?;
        if tokens.iter().any(String::is_empty) {
            return Err(invalid("chord contains an empty key"));
        }

        let mut modifiers = Vec::with_capacity(leading.len());
        for token in leading {
            let modifier = Modifier::parse(token).ok_or_else(|| {
                invalid(&format!("'{token}' is not a modifier (ctrl, alt, shift, cmd)"))
            })?;
            if modifiers.contains(&modifier) {
                return Err(invalid(&format!("modifier '{token}' is repeated")));
            }
            modifiers.push(modifier);
        }
        if modifiers.is_empty() {
            return Err(invalid("at least one modifier (ctrl, alt, shift, cmd) is required"));
        }

        let key = Key::parse(last).ok_or_else(|| {
            invalid(&format!(
                "'{last}' is not a supported key (a-z, 0-9, f1-f12, esc, tab, enter, space)"
            ))
        })?;

        Ok(Self { modifiers, key })
    }

    pub fn modifiers(&self) -> &[Modifier] {
        &self.modifiers
    }

    pub fn key(&self) -> Key {
        self.key
    }

    pub fn tokens(&self) -> Vec<String> {
        self.modifiers
            .iter()
            .map(|m| m.token().to_string())
            .chain(std::iter::once(self.key.token()))
            .collect()
    }
}

impl Default for KeyChord {
    fn default() -> Self {
        Self {
            modifiers: vec![Modifier::Ctrl],
            key: Key::Char('w'),
        }
    }
}

impl FromStr for KeyChord {
    type Err = ConfigError;

    /// Parses `"Ctrl+Shift+Q"` style chords.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tokens(s.split('+'))
    }
}

impl TryFrom<Vec<String>> for KeyChord {
    type Error = ConfigError;

    fn try_from(tokens: Vec<String>) -> Result<Self, Self::Error> {
        Self::from_tokens(tokens)
    }
}

impl From<KeyChord> for Vec<String> {
    fn from(chord: KeyChord) -> Self {
        chord.tokens()
    }
}

impl fmt::Display for KeyChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tokens().join("+"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_ctrl_w() {
        let chord = KeyChord::default();
        assert_eq!(chord.tokens(), vec!["ctrl", "w"]);
        assert_eq!(chord.to_string(), "ctrl+w");
    }

    #[test]
    fn parses_mixed_case_string() {
        let chord: KeyChord = "Ctrl+Shift+Q".parse().expect("valid chord");
        assert_eq!(chord.modifiers(), &[Modifier::Ctrl, Modifier::Shift]);
        assert_eq!(chord.key(), Key::Char('q'));
    }

    #[test]
    fn parses_function_and_named_keys() {
        let chord: KeyChord = "alt+F4".parse().expect("valid chord");
        assert_eq!(chord.key(), Key::Function(4));

        let chord: KeyChord = "cmd + esc".parse().expect("valid chord");
        assert_eq!(chord.modifiers(), &[Modifier::Cmd]);
        assert_eq!(chord.key(), Key::Escape);
    }

    #[test]
    fn rejects_chord_without_modifier() {
        let err = "w".parse::<KeyChord>().unwrap_err();
        assert!(err.to_string().contains("modifier"));
    }

    #[test]
    fn rejects_chord_without_key() {
        assert!("ctrl+shift".parse::<KeyChord>().is_err());
        assert!("ctrl+".parse::<KeyChord>().is_err());
        assert!("".parse::<KeyChord>().is_err());
    }

    #[test]
    fn rejects_unknown_tokens() {
        assert!("ctrl+f13".parse::<KeyChord>().is_err());
        assert!("hyper+w".parse::<KeyChord>().is_err());
        assert!("ctrl+ctrl+w".parse::<KeyChord>().is_err());
    }

    #[test]
    fn serializes_as_token_list() {
        let chord: KeyChord = "ctrl+alt+x".parse().unwrap();
        let json = serde_json::to_string(&chord).unwrap();
        assert_eq!(json, r#"["ctrl","alt","x"]"#);

        let back: KeyChord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, chord);

        assert!(serde_json::from_str::<KeyChord>(r#"["w"]"#).is_err());
    }
}
