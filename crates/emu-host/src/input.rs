//! Input bindings and the shared button table.
//!
//! The host thread resolves platform events through an [`InputBindingTable`]
//! and records the result in an [`InputState`]. The worker reads the table
//! once per frame. Relaxed atomics are enough: a press only has to become
//! visible within a frame or so, and each button is an independent bit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};

use emu_core::{Button, ButtonSet, KeyCode};
use serde::Deserialize;

/// Gamepad buttons, named after their position on the pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum GamepadButton {
    South,
    East,
    North,
    West,
    LeftTrigger,
    RightTrigger,
    LeftTrigger2,
    RightTrigger2,
    Select,
    Start,
    DPadUp,
    DPadDown,
    DPadLeft,
    DPadRight,
}

/// A physical input the host can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostInput {
    Key(KeyCode),
    Gamepad(GamepadButton),
}

/// Fully resolved mapping from host inputs to emulated buttons.
///
/// Several host inputs may drive the same button.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputBindingTable {
    map: HashMap<HostInput, Button>,
}

impl InputBindingTable {
    /// A table with no bindings.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Standard layout: Z/X for B/A, A/S for the shoulders, arrows for the
    /// D-pad, and the usual face-button layout on gamepads.
    #[must_use]
    pub fn defaults() -> Self {
        let mut table = Self::empty();

        table.bind(HostInput::Key(KeyCode::KeyX), Button::A);
        table.bind(HostInput::Key(KeyCode::KeyZ), Button::B);
        table.bind(HostInput::Key(KeyCode::KeyA), Button::L);
        table.bind(HostInput::Key(KeyCode::KeyS), Button::R);
        table.bind(HostInput::Key(KeyCode::Enter), Button::Start);
        table.bind(HostInput::Key(KeyCode::Backspace), Button::Select);
        table.bind(HostInput::Key(KeyCode::ArrowUp), Button::Up);
        table.bind(HostInput::Key(KeyCode::ArrowDown), Button::Down);
        table.bind(HostInput::Key(KeyCode::ArrowLeft), Button::Left);
        table.bind(HostInput::Key(KeyCode::ArrowRight), Button::Right);

        table.bind(HostInput::Gamepad(GamepadButton::South), Button::A);
        table.bind(HostInput::Gamepad(GamepadButton::East), Button::B);
        table.bind(HostInput::Gamepad(GamepadButton::LeftTrigger), Button::L);
        table.bind(HostInput::Gamepad(GamepadButton::RightTrigger), Button::R);
        table.bind(HostInput::Gamepad(GamepadButton::Start), Button::Start);
        table.bind(HostInput::Gamepad(GamepadButton::Select), Button::Select);
        table.bind(HostInput::Gamepad(GamepadButton::DPadUp), Button::Up);
        table.bind(HostInput::Gamepad(GamepadButton::DPadDown), Button::Down);
        table.bind(HostInput::Gamepad(GamepadButton::DPadLeft), Button::Left);
        table.bind(HostInput::Gamepad(GamepadButton::DPadRight), Button::Right);

        table
    }

    /// Bind `input` to `button`, replacing any previous binding of `input`.
    pub fn bind(&mut self, input: HostInput, button: Button) {
        self.map.insert(input, button);
    }

    #[must_use]
    pub fn lookup(&self, input: HostInput) -> Option<Button> {
        self.map.get(&input).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Lock-free table of currently pressed buttons.
///
/// Written by the host, read by the worker.
#[derive(Debug, Default)]
pub struct InputState {
    bits: AtomicU16,
}

impl InputState {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bits: AtomicU16::new(0),
        }
    }

    pub fn set(&self, button: Button, pressed: bool) {
        if pressed {
            self.bits.fetch_or(button.mask(), Ordering::Relaxed);
        } else {
            self.bits.fetch_and(!button.mask(), Ordering::Relaxed);
        }
    }

    /// Apply a host input through `bindings`. Returns the button it mapped
    /// to, if any.
    pub fn apply(
        &self,
        bindings: &InputBindingTable,
        input: HostInput,
        pressed: bool,
    ) -> Option<Button> {
        let button = bindings.lookup(input)?;
        self.set(button, pressed);
        Some(button)
    }

    pub fn release_all(&self) {
        self.bits.store(0, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> ButtonSet {
        ButtonSet::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_button_from_the_keyboard() {
        let table = InputBindingTable::defaults();
        for button in Button::ALL {
            let bound = [
                KeyCode::KeyX,
                KeyCode::KeyZ,
                KeyCode::KeyA,
                KeyCode::KeyS,
                KeyCode::Enter,
                KeyCode::Backspace,
                KeyCode::ArrowUp,
                KeyCode::ArrowDown,
                KeyCode::ArrowLeft,
                KeyCode::ArrowRight,
            ]
            .into_iter()
            .any(|key| table.lookup(HostInput::Key(key)) == Some(button));
            assert!(bound, "{button:?} has no keyboard binding");
        }
    }

    #[test]
    fn unbound_input_is_ignored() {
        let state = InputState::new();
        let table = InputBindingTable::defaults();
        assert_eq!(state.apply(&table, HostInput::Key(KeyCode::F5), true), None);
        assert!(state.snapshot().is_empty());
    }

    #[test]
    fn press_and_release_round_trip() {
        let state = InputState::new();
        let table = InputBindingTable::defaults();

        state.apply(&table, HostInput::Key(KeyCode::KeyX), true);
        state.apply(&table, HostInput::Gamepad(GamepadButton::Start), true);
        let held = state.snapshot();
        assert!(held.contains(Button::A));
        assert!(held.contains(Button::Start));

        state.apply(&table, HostInput::Key(KeyCode::KeyX), false);
        assert!(!state.snapshot().contains(Button::A));
        assert!(state.snapshot().contains(Button::Start));

        state.release_all();
        assert!(state.snapshot().is_empty());
    }

    #[test]
    fn rebinding_replaces_previous_target() {
        let mut table = InputBindingTable::defaults();
        let before = table.len();
        table.bind(HostInput::Key(KeyCode::KeyX), Button::B);
        assert_eq!(table.lookup(HostInput::Key(KeyCode::KeyX)), Some(Button::B));
        assert_eq!(table.len(), before);
    }
}
