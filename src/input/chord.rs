use global_hotkey::hotkey::{Code, Modifiers};
use std::fmt;

use super::InputError;

/// A modifier set plus one primary key, matched as a single logical control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChordSpec {
    modifiers: Modifiers,
    key: Code,
}

impl ChordSpec {
    /// Build a chord from already-parsed parts
    ///
    /// # Errors
    /// Returns `InvalidChord` if no modifier is given
    pub fn new(modifiers: Modifiers, key: Code) -> Result<Self, InputError> {
        if modifiers.is_empty() {
            return Err(InputError::InvalidChord(format!(
                "chord on {key:?} needs at least one modifier"
            )));
        }
        Ok(Self { modifiers, key })
    }

    /// Parse a chord from config strings, e.g. `["Command"]` + `"Space"`
    ///
    /// # Errors
    /// Returns `InvalidChord` for unknown names or an empty modifier list
    pub fn parse(modifiers: &[String], key: &str) -> Result<Self, InputError> {
        let modifiers = parse_modifiers(modifiers)?;
        let key = parse_key(key)?;
        Self::new(modifiers, key)
    }

    /// Required modifier set
    #[must_use]
    pub const fn modifiers(&self) -> Modifiers {
        self.modifiers
    }

    /// Primary key
    #[must_use]
    pub const fn key(&self) -> Code {
        self.key
    }

    /// True when every required modifier is present in `held`
    #[must_use]
    pub fn modifiers_held(&self, held: Modifiers) -> bool {
        held.contains(self.modifiers)
    }
}

impl fmt::Display for ChordSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Modifiers, &str); 4] = [
            (Modifiers::CONTROL, "Control"),
            (Modifiers::ALT, "Option"),
            (Modifiers::SUPER, "Command"),
            (Modifiers::SHIFT, "Shift"),
        ];
        for (flag, name) in NAMES {
            if self.modifiers.contains(flag) {
                write!(f, "{name}+")?;
            }
        }
        let key = format!("{:?}", self.key);
        let key = key
            .strip_prefix("Key")
            .or_else(|| key.strip_prefix("Digit"))
            .unwrap_or(&key);
        f.write_str(key)
    }
}

fn parse_modifiers(modifiers: &[String]) -> Result<Modifiers, InputError> {
    let mut result = Modifiers::empty();
    for modifier in modifiers {
        match modifier.as_str() {
            "Control" | "Ctrl" => result |= Modifiers::CONTROL,
            "Option" | "Alt" => result |= Modifiers::ALT,
            "Command" | "Cmd" | "Super" => result |= Modifiers::SUPER,
            "Shift" => result |= Modifiers::SHIFT,
            _ => {
                return Err(InputError::InvalidChord(format!(
                    "unknown modifier: {modifier}"
                )))
            }
        }
    }
    Ok(result)
}

fn parse_key(key: &str) -> Result<Code, InputError> {
    let code = match key {
        "A" => Code::KeyA,
        "B" => Code::KeyB,
        "C" => Code::KeyC,
        "D" => Code::KeyD,
        "E" => Code::KeyE,
        "F" => Code::KeyF,
        "G" => Code::KeyG,
        "H" => Code::KeyH,
        "I" => Code::KeyI,
        "J" => Code::KeyJ,
        "K" => Code::KeyK,
        "L" => Code::KeyL,
        "M" => Code::KeyM,
        "N" => Code::KeyN,
        "O" => Code::KeyO,
        "P" => Code::KeyP,
        "Q" => Code::KeyQ,
        "R" => Code::KeyR,
        "S" => Code::KeyS,
        "T" => Code::KeyT,
        "U" => Code::KeyU,
        "V" => Code::KeyV,
        "W" => Code::KeyW,
        "X" => Code::KeyX,
        "Y" => Code::KeyY,
        "Z" => Code::KeyZ,
        "0" => Code::Digit0,
        "1" => Code::Digit1,
        "2" => Code::Digit2,
        "3" => Code::Digit3,
        "4" => Code::Digit4,
        "5" => Code::Digit5,
        "6" => Code::Digit6,
        "7" => Code::Digit7,
        "8" => Code::Digit8,
        "9" => Code::Digit9,
        "Space" => Code::Space,
        "Escape" => Code::Escape,
        "Tab" => Code::Tab,
        "Enter" | "Return" => Code::Enter,
        "F1" => Code::F1,
        "F2" => Code::F2,
        "F3" => Code::F3,
        "F4" => Code::F4,
        "F5" => Code::F5,
        "F6" => Code::F6,
        "F7" => Code::F7,
        "F8" => Code::F8,
        "F9" => Code::F9,
        "F10" => Code::F10,
        "F11" => Code::F11,
        "F12" => Code::F12,
        _ => return Err(InputError::InvalidChord(format!("unsupported key: {key}"))),
    };
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|&s| s.to_owned()).collect()
    }

    #[test]
    fn test_parse_default_chord() {
        let chord = ChordSpec::parse(&strings(&["Command"]), "Space").unwrap();
        assert_eq!(chord.modifiers(), Modifiers::SUPER);
        assert_eq!(chord.key(), Code::Space);
    }

    #[test]
    fn test_parse_modifier_aliases() {
        let a = ChordSpec::parse(&strings(&["Ctrl", "Alt"]), "Z").unwrap();
        let b = ChordSpec::parse(&strings(&["Control", "Option"]), "Z").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.modifiers(), Modifiers::CONTROL | Modifiers::ALT);
    }

    #[test]
    fn test_parse_rejects_unknown_modifier() {
        let result = ChordSpec::parse(&strings(&["Hyper"]), "Space");
        assert!(matches!(result, Err(InputError::InvalidChord(_))));
    }

    #[test]
    fn test_parse_rejects_unknown_key() {
        let result = ChordSpec::parse(&strings(&["Shift"]), "PageDown");
        assert!(matches!(result, Err(InputError::InvalidChord(_))));
    }

    #[test]
    fn test_chord_requires_modifier() {
        let result = ChordSpec::parse(&[], "Space");
        assert!(matches!(result, Err(InputError::InvalidChord(_))));
    }

    #[test]
    fn test_modifiers_held_allows_extra_modifiers() {
        let chord = ChordSpec::new(Modifiers::SUPER, Code::Space).unwrap();
        assert!(chord.modifiers_held(Modifiers::SUPER | Modifiers::SHIFT));
        assert!(!chord.modifiers_held(Modifiers::SHIFT));
        assert!(!chord.modifiers_held(Modifiers::empty()));
    }

    #[test]
    fn test_display() {
        let chord = ChordSpec::parse(&strings(&["Shift", "Control"]), "K").unwrap();
        assert_eq!(chord.to_string(), "Control+Shift+K");

        let chord = ChordSpec::parse(&strings(&["Command"]), "Space").unwrap();
        assert_eq!(chord.to_string(), "Command+Space");

        let chord = ChordSpec::parse(&strings(&["Option"]), "7").unwrap();
        assert_eq!(chord.to_string(), "Option+7");
    }
}
