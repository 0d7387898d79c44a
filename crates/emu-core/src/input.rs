//! Host key codes and emulated pad buttons.

/// Buttons on the emulated pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Button {
    A,
    B,
    Select,
    Start,
    Right,
    Left,
    Up,
    Down,
    R,
    L,
}

impl Button {
    /// Every button, in bit order.
    pub const ALL: [Button; 10] = [
        Button::A,
        Button::B,
        Button::Select,
        Button::Start,
        Button::Right,
        Button::Left,
        Button::Up,
        Button::Down,
        Button::R,
        Button::L,
    ];

    /// Bit mask of this button inside a [`ButtonSet`].
    #[must_use]
    pub const fn mask(self) -> u16 {
        1 << self as u16
    }
}

/// A set of pressed buttons, one bit per [`Button`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ButtonSet(u16);

impl ButtonSet {
    pub const EMPTY: Self = Self(0);

    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits & Self::VALID)
    }

    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, button: Button) -> bool {
        self.0 & button.mask() != 0
    }

    #[must_use]
    pub const fn with(self, button: Button) -> Self {
        Self(self.0 | button.mask())
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate over the pressed buttons in bit order.
    pub fn iter(self) -> impl Iterator<Item = Button> {
        Button::ALL.into_iter().filter(move |b| self.contains(*b))
    }

    const VALID: u16 = (1 << Button::ALL.len()) - 1;
}

/// Key codes understood by input bindings.
///
/// This is a subset of winit's `KeyCode` so the core crate does not depend on
/// a windowing library. The host frontend converts platform key codes into
/// these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum KeyCode {
    // Letters
    KeyA,
    KeyB,
    KeyC,
    KeyD,
    KeyE,
    KeyF,
    KeyG,
    KeyH,
    KeyI,
    KeyJ,
    KeyK,
    KeyL,
    KeyM,
    KeyN,
    KeyO,
    KeyP,
    KeyQ,
    KeyR,
    KeyS,
    KeyT,
    KeyU,
    KeyV,
    KeyW,
    KeyX,
    KeyY,
    KeyZ,

    // Numbers
    Digit0,
    Digit1,
    Digit2,
    Digit3,
    Digit4,
    Digit5,
    Digit6,
    Digit7,
    Digit8,
    Digit9,

    // Modifiers
    ShiftLeft,
    ShiftRight,
    ControlLeft,
    ControlRight,
    AltLeft,
    AltRight,

    // Special
    Enter,
    Space,
    Backspace,
    Tab,
    Escape,

    // Arrow keys
    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,

    // Function keys
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
    F11,
    F12,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_are_distinct() {
        let mut seen = 0u16;
        for button in Button::ALL {
            assert_eq!(seen & button.mask(), 0, "{button:?} overlaps");
            seen |= button.mask();
        }
        assert_eq!(seen, 0x3FF);
    }

    #[test]
    fn from_bits_drops_unknown_bits() {
        let set = ButtonSet::from_bits(0xFC01);
        assert_eq!(set.bits(), 0x0001);
        assert!(set.contains(Button::A));
    }

    #[test]
    fn iter_yields_pressed_buttons_in_order() {
        let set = ButtonSet::EMPTY.with(Button::L).with(Button::Start);
        let pressed: Vec<Button> = set.iter().collect();
        assert_eq!(pressed, vec![Button::Start, Button::L]);
    }
}
