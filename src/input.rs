//! Joypad state types and the bit layout used by the controller shift registers.

use bincode::{Decode, Encode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Player {
    One,
    Two,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    A,
    B,
    Select,
    Start,
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct JoypadState {
    pub a: bool,
    pub b: bool,
    pub select: bool,
    pub start: bool,
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl JoypadState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_button(&mut self, button: Button, pressed: bool) {
        let field = match button {
            Button::A => &mut self.a,
            Button::B => &mut self.b,
            Button::Select => &mut self.select,
            Button::Start => &mut self.start,
            Button::Up => &mut self.up,
            Button::Down => &mut self.down,
            Button::Left => &mut self.left,
            Button::Right => &mut self.right,
        };
        *field = pressed;
    }

    /// Pack into the shift register layout: A=0x01, B=0x02, Select=0x04,
    /// Start=0x08, Up=0x10, Down=0x20, Left=0x40, Right=0x80. Reads shift this
    /// out LSB-first, so A is reported first.
    #[must_use]
    pub(crate) fn to_register_byte(self) -> u8 {
        u8::from(self.a)
            | (u8::from(self.b) << 1)
            | (u8::from(self.select) << 2)
            | (u8::from(self.start) << 3)
            | (u8::from(self.up) << 4)
            | (u8::from(self.down) << 5)
            | (u8::from(self.left) << 6)
            | (u8::from(self.right) << 7)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_byte_layout() {
        let mut joypad = JoypadState::new();
        joypad.set_button(Button::A, true);
        joypad.set_button(Button::Start, true);
        joypad.set_button(Button::Right, true);

        assert_eq!(joypad.to_register_byte(), 0x01 | 0x08 | 0x80);
    }

    #[test]
    fn press_and_release_is_identity() {
        let mut joypad = JoypadState::new();
        joypad.set_button(Button::Left, true);
        joypad.set_button(Button::Left, false);

        assert_eq!(joypad, JoypadState::new());
    }
}
