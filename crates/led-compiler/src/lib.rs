//! The compiler: a public façade that validates pixel operations, writes
//! opcodes into an append-only buffer, tracks nested sections' expected
//! sleep totals, accumulates warnings, and finalizes a compressed artifact.
//!
//! The encoder keeps its own [`led_mirror::PixelMirror`], mutated directly
//! by every call — matching the source's direct `self.pixels` bookkeeping —
//! so `dim`/`brighten` and gradient writes have a well-defined "current
//! value" without replaying the instruction stream through an interpreter.

mod gradient;

use std::collections::BTreeSet;
use std::path::Path;

use thiserror::Error;

use led_bytecode::raw;
use led_color::{Color, ColorError, promote_checked};
use led_codec::{Codec, CodecError, DeflateCodec, save_artifact};
use led_mirror::{InMemoryMirror, PixelMirror};

pub use gradient::{GradientError, gradient};

const MAX_SLEEP_SECS: f64 = 60.0;
const REPEAT_MAX: u32 = 0xFFFF;
const RUNTIME_CAP_SECS: u64 = 180;
const DEFAULT_SPEED_STEP: f64 = 0.005;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("index {index} out of range [0,{num_px})")]
    IndexOutOfRange { index: u8, num_px: usize },
    #[error("sleep duration {0}s out of range [0,60]")]
    SleepOutOfRange(f64),
    #[error("multiplier {0} out of range (0,100)")]
    MultiplierOutOfRange(f64),
    #[error("accelerating by this amount would make the multiplier non-positive")]
    AccelerateTooFar,
    #[error("decelerating by this amount would exceed the multiplier ceiling")]
    DecelerateTooFar,
    #[error("trail and rotate cannot both be set on a move")]
    MoveConflict,
    #[error("move bounds [{lo},{hi}] with spaces={spaces} invalid for a strip of {num_px} pixels")]
    MoveBoundsInvalid { lo: u8, hi: u8, spaces: u8, num_px: usize },
    #[error("repeat count {0} out of range [1,{REPEAT_MAX}]")]
    RepeatCountOutOfRange(u32),
    #[error("brightness delta {0} must be a positive integer")]
    BrightnessDeltaNotPositive(i32),
    #[error("resulting brightness {0} out of range [0,100]")]
    BrightnessResultOutOfRange(i32),
    #[error(transparent)]
    Color(#[from] ColorError),
    #[error(transparent)]
    Gradient(#[from] GradientError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Warning {
    ImplicitIntConversion,
    SectionsStartedButNotFinished,
    ProgramTimeIsZero,
    AnimationExceedsCap,
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Warning::ImplicitIntConversion => "Implicit int conversion",
            Warning::SectionsStartedButNotFinished => "Sections started but not finished",
            Warning::ProgramTimeIsZero => "Program time is zero!",
            Warning::AnimationExceedsCap => "Animations are capped at 3 mins, while yours exceeds that threshold",
        };
        f.write_str(msg)
    }
}

#[derive(Debug, Clone)]
pub struct SaveReport {
    pub compressed_bytes: usize,
    pub raw_bytes: usize,
    pub expected_seconds: f64,
    pub warnings: BTreeSet<Warning>,
}

pub struct Encoder {
    num_px: usize,
    data: Vec<u8>,
    stack_sleep: Vec<u64>,
    sleep_multipliers: Vec<f64>,
    mirror: InMemoryMirror,
    warnings: BTreeSet<Warning>,
}

impl Encoder {
    pub fn new(num_px: usize) -> Self {
        Self {
            num_px,
            data: Vec::new(),
            stack_sleep: vec![0],
            sleep_multipliers: vec![1.0],
            mirror: InMemoryMirror::new(num_px),
            warnings: BTreeSet::new(),
        }
    }

    /// The raw opcode stream written so far, before compression.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel(&self, index: u8) -> Result<Color, CompileError> {
        self.check_index(index)?;
        Ok(self.mirror.color(index as usize))
    }

    fn check_index(&self, index: u8) -> Result<(), CompileError> {
        if (index as usize) >= self.num_px {
            return Err(CompileError::IndexOutOfRange { index, num_px: self.num_px });
        }
        Ok(())
    }

    fn current_multiplier(&self) -> f64 {
        *self.sleep_multipliers.last().unwrap_or(&1.0)
    }

    fn promote(&mut self, components: &[f64]) -> Result<Color, CompileError> {
        let (color, truncated) = promote_checked(components)?;
        if truncated {
            self.warnings.insert(Warning::ImplicitIntConversion);
        }
        Ok(color)
    }

    pub fn set(&mut self, index: u8, components: &[f64]) -> Result<(), CompileError> {
        self.check_index(index)?;
        let color = self.promote(components)?;
        raw::set(&mut self.data, index, color);
        self.mirror.set(index as usize, color);
        Ok(())
    }

    pub fn fill(&mut self, components: &[f64]) -> Result<(), CompileError> {
        let color = self.promote(components)?;
        raw::fill(&mut self.data, color);
        self.mirror.fill(color);
        Ok(())
    }

    fn sleep_ms(&mut self, seconds: f64) -> Result<u16, CompileError> {
        if !(0.0..=MAX_SLEEP_SECS).contains(&seconds) {
            return Err(CompileError::SleepOutOfRange(seconds));
        }
        let ms = (seconds * 1000.0 * self.current_multiplier()).ceil() as u64;
        *self.stack_sleep.last_mut().unwrap() += ms;
        Ok((ms & 0xFFFF) as u16)
    }

    pub fn sleep(&mut self, seconds: f64) -> Result<(), CompileError> {
        let ms = self.sleep_ms(seconds)?;
        raw::sleep(&mut self.data, ms);
        Ok(())
    }

    pub fn show(&mut self, sleep_seconds: Option<f64>) -> Result<(), CompileError> {
        match sleep_seconds {
            None => raw::show(&mut self.data),
            Some(seconds) => {
                let ms = self.sleep_ms(seconds)?;
                raw::show_and_sleep(&mut self.data, ms);
            }
        }
        Ok(())
    }

    pub fn section(&mut self) {
        self.stack_sleep.push(0);
        self.sleep_multipliers.push(self.current_multiplier());
        raw::section(&mut self.data);
    }

    /// A `repeat(times)` re-enters its body `times` extra times on top of the
    /// one pass already recorded, so the accumulated sleep total is scaled by
    /// `times + 1`. When the body was opened with [`Self::section`], that
    /// per-section counter is popped and folded into the parent frame;
    /// otherwise the top-level total itself is scaled in place.
    fn merge_sleep_time(&mut self, times: u16) {
        let factor = u64::from(times) + 1;
        if self.stack_sleep.len() > 1 {
            let top = self.stack_sleep.pop().unwrap();
            *self.stack_sleep.last_mut().unwrap() += top * factor;
            self.sleep_multipliers.pop();
        } else {
            self.stack_sleep[0] *= factor;
        }
    }

    pub fn repeat(&mut self, times: u32) -> Result<(), CompileError> {
        if times < 1 || times > REPEAT_MAX {
            return Err(CompileError::RepeatCountOutOfRange(times));
        }
        let times = times as u16;
        raw::repeat(&mut self.data, times);
        self.merge_sleep_time(times);
        Ok(())
    }

    fn set_speed_raw(&mut self, multiplier: f64) {
        let milli = (multiplier * 1000.0).ceil() as u16;
        raw::set_speed(&mut self.data, milli);
    }

    pub fn accelerate(&mut self, delta: Option<f64>) -> Result<(), CompileError> {
        let delta = delta.unwrap_or(DEFAULT_SPEED_STEP);
        let top = self.sleep_multipliers.last_mut().unwrap();
        if *top - delta <= 0.0 {
            return Err(CompileError::AccelerateTooFar);
        }
        *top -= delta;
        let new_top = *top;
        self.set_speed_raw(new_top);
        Ok(())
    }

    pub fn decelerate(&mut self, delta: Option<f64>) -> Result<(), CompileError> {
        let delta = delta.unwrap_or(DEFAULT_SPEED_STEP);
        let top = self.sleep_multipliers.last_mut().unwrap();
        if *top + delta >= 100.0 {
            return Err(CompileError::DecelerateTooFar);
        }
        *top += delta;
        let new_top = *top;
        self.set_speed_raw(new_top);
        Ok(())
    }

    pub fn set_multiplier(&mut self, multiplier: f64) -> Result<(), CompileError> {
        if !(multiplier > 0.0 && multiplier < 100.0) {
            return Err(CompileError::MultiplierOutOfRange(multiplier));
        }
        *self.sleep_multipliers.last_mut().unwrap() = multiplier;
        self.set_speed_raw(multiplier);
        Ok(())
    }

    pub fn reset_speed(&mut self) {
        let depth = self.sleep_multipliers.len();
        let restored = if depth <= 1 {
            1.0
        } else {
            self.sleep_multipliers[depth - 2]
        };
        *self.sleep_multipliers.last_mut().unwrap() = restored;
        raw::reset_speed(&mut self.data);
    }

    fn check_move_bounds(&self, lo: u8, hi: u8, spaces: u8, trail: bool, rotate: bool) -> Result<(), CompileError> {
        if trail && rotate {
            return Err(CompileError::MoveConflict);
        }
        let valid = (lo as usize) < self.num_px
            && (hi as usize) < self.num_px
            && lo <= hi
            && spaces >= 1
            && (spaces as usize) < self.num_px;
        if !valid {
            return Err(CompileError::MoveBoundsInvalid { lo, hi, spaces, num_px: self.num_px });
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn move_up(&mut self, spaces: u8, lo: u8, hi: u8, trail: bool, rotate: bool, show: bool) -> Result<(), CompileError> {
        self.check_move_bounds(lo, hi, spaces, trail, rotate)?;
        raw::move_up(&mut self.data, lo, hi, spaces, trail, rotate, show);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn move_down(&mut self, spaces: u8, lo: u8, hi: u8, trail: bool, rotate: bool, show: bool) -> Result<(), CompileError> {
        self.check_move_bounds(lo, hi, spaces, trail, rotate)?;
        raw::move_down(&mut self.data, lo, hi, spaces, trail, rotate, show);
        Ok(())
    }

    pub fn set_gradient(&mut self, colors: &[Color], lo: u8, hi: u8) -> Result<(), CompileError> {
        self.check_index(lo)?;
        self.check_index(hi)?;
        let span = (hi as usize) + 1 - (lo as usize);
        let computed = gradient(colors, span)?;

        let entries: Vec<(u8, Color)> = computed
            .iter()
            .enumerate()
            .map(|(offset, &c)| (lo + offset as u8, c))
            .collect();
        raw::set_multiple(&mut self.data, &entries);
        for &(index, color) in &entries {
            self.mirror.set(index as usize, color);
        }
        Ok(())
    }

    fn set_brightness_internal(&mut self, index: u8, l: u8) -> Result<(), CompileError> {
        self.check_index(index)?;
        self.mirror.set_brightness(index as usize, l);
        raw::set_brightness(&mut self.data, index, l);
        Ok(())
    }

    pub fn dim(&mut self, index: u8, delta: u8) -> Result<(), CompileError> {
        if delta == 0 {
            return Err(CompileError::BrightnessDeltaNotPositive(0));
        }
        let current = i32::from(self.pixel(index)?.l);
        let result = current - i32::from(delta);
        if result < 0 {
            return Err(CompileError::BrightnessResultOutOfRange(result));
        }
        self.set_brightness_internal(index, result as u8)
    }

    pub fn brighten(&mut self, index: u8, delta: u8) -> Result<(), CompileError> {
        if delta == 0 {
            return Err(CompileError::BrightnessDeltaNotPositive(0));
        }
        let current = i32::from(self.pixel(index)?.l);
        let result = current + i32::from(delta);
        if result > 100 {
            return Err(CompileError::BrightnessResultOutOfRange(result));
        }
        self.set_brightness_internal(index, result as u8)
    }

    pub fn set_brightness(&mut self, index: u8, l: u8) -> Result<(), CompileError> {
        if l > 100 {
            return Err(CompileError::BrightnessResultOutOfRange(i32::from(l)));
        }
        self.set_brightness_internal(index, l)
    }

    /// Finalizes the program: accumulates warnings, compresses the buffer,
    /// and writes it to `path`.
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<SaveReport, CompileError> {
        if self.stack_sleep.len() > 1 {
            self.warnings.insert(Warning::SectionsStartedButNotFinished);
        }
        let total_sleep_ms: u64 = self.stack_sleep.iter().sum();
        if total_sleep_ms == 0 {
            self.warnings.insert(Warning::ProgramTimeIsZero);
        }
        if total_sleep_ms / 1000 > RUNTIME_CAP_SECS {
            self.warnings.insert(Warning::AnimationExceedsCap);
        }

        let codec = DeflateCodec::default();
        let compressed_bytes = save_artifact(path, &self.data, &codec)?;

        for warning in &self.warnings {
            tracing::warn!(target: "compiler", %warning, "compile_warning");
        }

        Ok(SaveReport {
            compressed_bytes,
            raw_bytes: self.data.len(),
            expected_seconds: total_sleep_ms as f64 / 1000.0,
            warnings: self.warnings.clone(),
        })
    }
}
