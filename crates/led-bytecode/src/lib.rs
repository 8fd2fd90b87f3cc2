//! Bit-exact opcode schema, typed instruction records, and the pure decoder
//! that turns a raw byte stream into them.
//!
//! The byte-level schema (§4.1) is defined once, in [`raw`], and used by both
//! [`decode`] and `led-compiler`'s emitter so the two can never drift apart.
//! Decoded instructions are a sum type ([`Instruction`]); the integer
//! [`Opcode`] tag is only ever seen at the byte boundary.

use led_color::Color;
use thiserror::Error;

/// Big-endian opcode tags, exactly as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Set = 0x01,
    Fill = 0x02,
    Sleep = 0x03,
    Show = 0x04,
    ShowAndSleep = 0x05,
    Section = 0x06,
    Repeat = 0x07,
    MoveUp = 0x08,
    MoveDown = 0x09,
    SetSpeed = 0x0a,
    ResetSpeed = 0x0b,
    SetMultiple = 0x0c,
    SetBrightness = 0x0d,
    /// Runtime-only: synthesized by the decoder as the closing bracket of a
    /// `Repeat` body. The encoder never writes this tag.
    EndSection = 0xff,
}

impl Opcode {
    fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0x01 => Self::Set,
            0x02 => Self::Fill,
            0x03 => Self::Sleep,
            0x04 => Self::Show,
            0x05 => Self::ShowAndSleep,
            0x06 => Self::Section,
            0x07 => Self::Repeat,
            0x08 => Self::MoveUp,
            0x09 => Self::MoveDown,
            0x0a => Self::SetSpeed,
            0x0b => Self::ResetSpeed,
            0x0c => Self::SetMultiple,
            0x0d => Self::SetBrightness,
            0xff => Self::EndSection,
            _ => return None,
        })
    }
}

/// Packs the three move-operation booleans into the `flags` byte:
/// `bit2=trail, bit1=rotate, bit0=show`.
pub const fn move_flags(trail: bool, rotate: bool, show: bool) -> u8 {
    ((trail as u8) << 2) | ((rotate as u8) << 1) | (show as u8)
}

pub const fn unpack_move_flags(flags: u8) -> (bool, bool, bool) {
    (flags & 0b100 != 0, flags & 0b010 != 0, flags & 0b001 != 0)
}

/// Low-level byte writers, one per opcode, implementing the §4.1 payload
/// layout exactly. `led-compiler` calls these; nothing here validates
/// arguments — that is the encoder's job.
pub mod raw {
    use super::{Opcode, move_flags};
    use led_color::Color;

    pub fn set(buf: &mut Vec<u8>, index: u8, color: Color) {
        buf.push(Opcode::Set as u8);
        buf.push(index);
        buf.extend_from_slice(&color.to_word().to_be_bytes());
    }

    pub fn fill(buf: &mut Vec<u8>, color: Color) {
        buf.push(Opcode::Fill as u8);
        buf.extend_from_slice(&color.to_word().to_be_bytes());
    }

    pub fn sleep(buf: &mut Vec<u8>, ms: u16) {
        buf.push(Opcode::Sleep as u8);
        buf.extend_from_slice(&ms.to_be_bytes());
    }

    pub fn show(buf: &mut Vec<u8>) {
        buf.push(Opcode::Show as u8);
    }

    pub fn show_and_sleep(buf: &mut Vec<u8>, ms: u16) {
        buf.push(Opcode::ShowAndSleep as u8);
        buf.extend_from_slice(&ms.to_be_bytes());
    }

    pub fn section(buf: &mut Vec<u8>) {
        buf.push(Opcode::Section as u8);
    }

    pub fn repeat(buf: &mut Vec<u8>, count: u16) {
        buf.push(Opcode::Repeat as u8);
        buf.extend_from_slice(&count.to_be_bytes());
    }

    #[allow(clippy::too_many_arguments)]
    fn move_op(buf: &mut Vec<u8>, tag: Opcode, lo: u8, hi: u8, spaces: u8, trail: bool, rotate: bool, show: bool) {
        buf.push(tag as u8);
        buf.push(lo);
        buf.push(hi);
        buf.push(spaces);
        buf.push(move_flags(trail, rotate, show));
    }

    pub fn move_up(buf: &mut Vec<u8>, lo: u8, hi: u8, spaces: u8, trail: bool, rotate: bool, show: bool) {
        move_op(buf, Opcode::MoveUp, lo, hi, spaces, trail, rotate, show);
    }

    pub fn move_down(buf: &mut Vec<u8>, lo: u8, hi: u8, spaces: u8, trail: bool, rotate: bool, show: bool) {
        move_op(buf, Opcode::MoveDown, lo, hi, spaces, trail, rotate, show);
    }

    pub fn set_speed(buf: &mut Vec<u8>, mult_milli: u16) {
        buf.push(Opcode::SetSpeed as u8);
        buf.extend_from_slice(&mult_milli.to_be_bytes());
    }

    pub fn reset_speed(buf: &mut Vec<u8>) {
        buf.push(Opcode::ResetSpeed as u8);
    }

    /// `k` is taken from `entries.len()`; callers must have already
    /// validated `entries.len() <= 255`.
    pub fn set_multiple(buf: &mut Vec<u8>, entries: &[(u8, Color)]) {
        buf.push(Opcode::SetMultiple as u8);
        buf.push(entries.len() as u8);
        for &(index, color) in entries {
            buf.push(index);
            buf.extend_from_slice(&color.to_word().to_be_bytes());
        }
    }

    pub fn set_brightness(buf: &mut Vec<u8>, index: u8, l: u8) {
        buf.push(Opcode::SetBrightness as u8);
        buf.push(index);
        buf.push(l);
    }
}

/// A counter that remembers its reload value, used for `Sleep` and `Repeat`
/// so nested loops can reset inner state when re-entering the outer body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reloadable {
    pub remaining: u16,
    pub reload: u16,
}

impl Reloadable {
    pub fn new(value: u16) -> Self {
        Self {
            remaining: value,
            reload: value,
        }
    }
}

/// A decoded, typed instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Set { index: u8, color: Color },
    Fill { color: Color },
    Sleep(Reloadable),
    Show,
    Section,
    /// Synthesized by the decoder as the closing bracket of a `Repeat` body.
    EndSection,
    Repeat(Reloadable),
    MoveUp {
        lo: u8,
        hi: u8,
        spaces: u8,
        trail: bool,
        rotate: bool,
        show: bool,
    },
    MoveDown {
        lo: u8,
        hi: u8,
        spaces: u8,
        trail: bool,
        rotate: bool,
        show: bool,
    },
    SetSpeed { multiplier_milli: u16 },
    ResetSpeed,
    SetMultiple(Vec<(u8, Color)>),
    SetBrightness { index: u8, l: u8 },
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown opcode tag {tag:#04x} at byte offset {offset}")]
    UnknownOpcode { tag: u8, offset: usize },
    #[error("truncated payload at byte offset {offset}: needed {needed} more bytes, had {available}")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let start = self.pos;
        if start + n > self.data.len() {
            return Err(DecodeError::Truncated {
                offset: start,
                needed: n,
                available: self.data.len() - start,
            });
        }
        self.pos += n;
        Ok(&self.data[start..start + n])
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn color(&mut self) -> Result<Color, DecodeError> {
        let b = self.take(4)?;
        Ok(Color::from_word(u32::from_be_bytes([b[0], b[1], b[2], b[3]])))
    }
}

/// Decodes a raw opcode byte stream into typed instructions.
///
/// Two transforms happen relative to the raw bytes (§4.3):
/// - `Repeat` expands to `Repeat{remaining, reload}` followed immediately by
///   a synthetic `EndSection`.
/// - `ShowAndSleep` lowers to `Show` followed by `Sleep{remaining: ms, reload:
///   ms}` — this resolves the two source revisions' disagreement over
///   whether the show actually happens by making it unconditional.
pub fn decode(bytes: &[u8]) -> Result<Vec<Instruction>, DecodeError> {
    let mut cursor = Cursor::new(bytes);
    let mut out = Vec::new();

    while cursor.pos < cursor.data.len() {
        let tag_offset = cursor.pos;
        let tag = cursor.u8()?;
        let opcode = Opcode::from_tag(tag).ok_or(DecodeError::UnknownOpcode {
            tag,
            offset: tag_offset,
        })?;

        match opcode {
            Opcode::Set => {
                let index = cursor.u8()?;
                let color = cursor.color()?;
                out.push(Instruction::Set { index, color });
            }
            Opcode::Fill => {
                let color = cursor.color()?;
                out.push(Instruction::Fill { color });
            }
            Opcode::Sleep => {
                let ms = cursor.u16()?;
                out.push(Instruction::Sleep(Reloadable::new(ms)));
            }
            Opcode::Show => out.push(Instruction::Show),
            Opcode::ShowAndSleep => {
                let ms = cursor.u16()?;
                out.push(Instruction::Show);
                out.push(Instruction::Sleep(Reloadable::new(ms)));
            }
            Opcode::Section => out.push(Instruction::Section),
            Opcode::Repeat => {
                let count = cursor.u16()?;
                out.push(Instruction::Repeat(Reloadable::new(count)));
                out.push(Instruction::EndSection);
            }
            Opcode::MoveUp | Opcode::MoveDown => {
                let lo = cursor.u8()?;
                let hi = cursor.u8()?;
                let spaces = cursor.u8()?;
                let flags = cursor.u8()?;
                let (trail, rotate, show) = unpack_move_flags(flags);
                let instr = if matches!(opcode, Opcode::MoveUp) {
                    Instruction::MoveUp {
                        lo,
                        hi,
                        spaces,
                        trail,
                        rotate,
                        show,
                    }
                } else {
                    Instruction::MoveDown {
                        lo,
                        hi,
                        spaces,
                        trail,
                        rotate,
                        show,
                    }
                };
                out.push(instr);
            }
            Opcode::SetSpeed => {
                let multiplier_milli = cursor.u16()?;
                out.push(Instruction::SetSpeed { multiplier_milli });
            }
            Opcode::ResetSpeed => out.push(Instruction::ResetSpeed),
            Opcode::SetMultiple => {
                let k = cursor.u8()? as usize;
                let mut entries = Vec::with_capacity(k);
                for _ in 0..k {
                    let index = cursor.u8()?;
                    let color = cursor.color()?;
                    entries.push((index, color));
                }
                out.push(Instruction::SetMultiple(entries));
            }
            Opcode::SetBrightness => {
                let index = cursor.u8()?;
                let l = cursor.u8()?;
                out.push(Instruction::SetBrightness { index, l });
            }
            Opcode::EndSection => {
                // Never written by the encoder, but decoding a stream that
                // happens to contain it is not itself an error.
                out.push(Instruction::EndSection);
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_show_round_trip() {
        let mut buf = Vec::new();
        raw::set(&mut buf, 0, Color::rgb(255, 0, 0));
        raw::show(&mut buf);
        assert_eq!(buf, vec![0x01, 0x00, 0xFF, 0x00, 0x00, 0x64, 0x04]);

        let decoded = decode(&buf).unwrap();
        assert_eq!(
            decoded,
            vec![
                Instruction::Set {
                    index: 0,
                    color: Color::rgb(255, 0, 0)
                },
                Instruction::Show,
            ]
        );
    }

    #[test]
    fn fill_and_sleep_round_trip() {
        let mut buf = Vec::new();
        raw::fill(&mut buf, Color::BLACK);
        raw::sleep(&mut buf, 500);
        assert_eq!(
            buf,
            vec![0x02, 0x00, 0x00, 0x00, 0x00, 0x03, 0x01, 0xF4]
        );
        let decoded = decode(&buf).unwrap();
        assert_eq!(
            decoded,
            vec![
                Instruction::Fill { color: Color::BLACK },
                Instruction::Sleep(Reloadable::new(500)),
            ]
        );
    }

    #[test]
    fn repeat_expands_to_reloadable_plus_end_section() {
        let mut buf = Vec::new();
        raw::repeat(&mut buf, 3);
        let decoded = decode(&buf).unwrap();
        assert_eq!(
            decoded,
            vec![
                Instruction::Repeat(Reloadable {
                    remaining: 3,
                    reload: 3
                }),
                Instruction::EndSection,
            ]
        );
    }

    #[test]
    fn show_and_sleep_lowers_to_show_then_sleep() {
        let mut buf = Vec::new();
        raw::show_and_sleep(&mut buf, 250);
        let decoded = decode(&buf).unwrap();
        assert_eq!(
            decoded,
            vec![Instruction::Show, Instruction::Sleep(Reloadable::new(250))]
        );
    }

    #[test]
    fn move_flags_pack_and_unpack() {
        assert_eq!(move_flags(true, false, true), 0b101);
        assert_eq!(unpack_move_flags(0b101), (true, false, true));
    }

    #[test]
    fn move_up_round_trips_flags() {
        let mut buf = Vec::new();
        raw::move_up(&mut buf, 0, 4, 2, true, false, false);
        let decoded = decode(&buf).unwrap();
        assert_eq!(
            decoded,
            vec![Instruction::MoveUp {
                lo: 0,
                hi: 4,
                spaces: 2,
                trail: true,
                rotate: false,
                show: false
            }]
        );
    }

    #[test]
    fn set_multiple_round_trips() {
        let mut buf = Vec::new();
        let entries = vec![(0u8, Color::rgb(255, 0, 0)), (4u8, Color::rgb(0, 0, 255))];
        raw::set_multiple(&mut buf, &entries);
        let decoded = decode(&buf).unwrap();
        assert_eq!(decoded, vec![Instruction::SetMultiple(entries)]);
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let err = decode(&[0xAB]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::UnknownOpcode {
                tag: 0xAB,
                offset: 0
            }
        );
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let err = decode(&[0x01, 0x00]).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { offset: 1, .. }));
    }
}
