//! The interpreter: a state machine that walks a decoded instruction list,
//! maintaining nested section scopes, per-section speed multipliers, and an
//! authoritative pixel mirror, while enforcing a wall-clock budget and
//! responding to cooperative cancellation.
//!
//! The whole program runs inside an implicit top-level section, mirroring
//! the source's `cmd = [[SECTION]]` priming: `section_frames` is never
//! empty, so `SET_SPEED`/`RESET_SPEED` always have a frame to act on.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded};
use thiserror::Error;

use led_bytecode::Instruction;
use led_color::Color;
use led_driver::PixelStrip;
use led_mirror::PixelMirror;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExecError {
    #[error("end_section with no matching open section")]
    UnbalancedEndSection,
    #[error("move span length {span} is smaller than spaces {spaces}")]
    InvalidMoveSpan { span: usize, spaces: usize },
}

/// A monotonic clock plus the ability to block for a duration, abstracted so
/// tests can run a program without waiting in real time.
pub trait Clock: Send {
    fn now(&self) -> Instant;
    fn sleep(&self, dur: Duration);
}

/// Real wall-clock time, used for live playback.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, dur: Duration) {
        std::thread::sleep(dur);
    }
}

/// A clock whose `sleep` never actually blocks. `now()` still advances with
/// real time, so the runtime cap is still enforced; used for validation runs
/// that need to exercise control flow and timing bookkeeping without
/// spending wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstantClock;

impl Clock for InstantClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, _dur: Duration) {}
}

/// The cooperative-cancellation primitive: an atomic flag plus a one-shot
/// channel used to wake a sleeping executor promptly rather than waiting out
/// the full 1-second slice.
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    wake: Sender<()>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
        let _ = self.wake.try_send(());
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

pub struct Stopper {
    flag: Arc<AtomicBool>,
    wake: Receiver<()>,
}

impl Stopper {
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Blocks for up to `dur`, waking early if `StopHandle::stop` fires.
    fn wait_slice(&self, dur: Duration) {
        let _ = self.wake.recv_timeout(dur);
    }
}

/// Builds a connected `(StopHandle, Stopper)` pair: the handle is given to
/// whoever may want to cancel a run; the stopper is consumed by the
/// `Interpreter`.
pub fn stop_pair() -> (StopHandle, Stopper) {
    let flag = Arc::new(AtomicBool::new(false));
    let (tx, rx) = bounded(1);
    (
        StopHandle {
            flag: flag.clone(),
            wake: tx,
        },
        Stopper { flag, wake: rx },
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Stopped,
    TimedOut,
}

#[derive(Debug, Clone, Copy)]
pub struct RunReport {
    pub outcome: Outcome,
    pub instructions_executed: usize,
    pub elapsed: Duration,
}

/// Three pieces of section state that must push/pop in lockstep: the
/// resume point, the inherited speed multiplier, and a snapshot of the
/// mirror taken at section-open, restored on every loop rewind.
struct SectionFrame {
    return_pc: usize,
    speed: f64,
    color_snapshot: Vec<Color>,
}

pub struct Interpreter<'a> {
    mirror: &'a mut dyn PixelMirror,
    strip: Option<&'a mut dyn PixelStrip>,
    stopper: Option<Stopper>,
    clock: Box<dyn Clock>,
    runtime_cap: Duration,
    test_time_cap: Duration,
    test_mode: bool,
    verbose: bool,
}

impl<'a> Interpreter<'a> {
    pub fn new(mirror: &'a mut dyn PixelMirror, runtime_cap: Duration, test_time_cap: Duration) -> Self {
        Self {
            mirror,
            strip: None,
            stopper: None,
            clock: Box::new(SystemClock),
            runtime_cap,
            test_time_cap,
            test_mode: false,
            verbose: false,
        }
    }

    pub fn with_strip(mut self, strip: &'a mut dyn PixelStrip) -> Self {
        self.strip = Some(strip);
        self
    }

    pub fn with_stopper(mut self, stopper: Stopper) -> Self {
        self.stopper = Some(stopper);
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn current_cap(&self) -> Duration {
        if self.test_mode {
            self.test_time_cap
        } else {
            self.runtime_cap
        }
    }

    fn blank_strip(&mut self) {
        if let Some(strip) = &mut self.strip {
            strip.fill((0, 0, 0));
        }
    }

    /// Runs `program` to completion, cancellation, or timeout. The program
    /// is taken by value because `Sleep`/`Repeat` reload counters are
    /// mutated in place during execution.
    pub fn run(&mut self, mut program: Vec<Instruction>) -> Result<RunReport, ExecError> {
        let start = self.clock.now();
        let mut pc = 0usize;
        let mut executed = 0usize;
        let mut section_frames = vec![SectionFrame {
            return_pc: 0,
            speed: 1.0,
            color_snapshot: self.mirror.snapshot(),
        }];
        let mut outcome = Outcome::Completed;

        while pc < program.len() {
            match &program[pc] {
                Instruction::Section => {
                    section_frames.push(SectionFrame {
                        return_pc: pc + 1,
                        speed: section_frames.last().map(|f| f.speed).unwrap_or(1.0),
                        color_snapshot: self.mirror.snapshot(),
                    });
                    pc += 1;
                    continue;
                }
                Instruction::EndSection => {
                    if section_frames.len() <= 1 {
                        return Err(ExecError::UnbalancedEndSection);
                    }
                    section_frames.pop();
                    pc += 1;
                    continue;
                }
                _ => {}
            }

            if let Some(stopper) = &self.stopper {
                if stopper.is_stopped() {
                    outcome = Outcome::Stopped;
                    break;
                }
            }
            if self.clock.now().duration_since(start) > self.current_cap() {
                outcome = Outcome::TimedOut;
                break;
            }

            let depth = section_frames.len();
            let speed = section_frames[depth - 1].speed;

            match &mut program[pc] {
                Instruction::Set { index, color } => {
                    let (index, color) = (*index as usize, *color);
                    self.mirror.set(index, color);
                    if let Some(strip) = &mut self.strip {
                        strip.set(index, color.to_physical());
                    }
                    if self.verbose {
                        tracing::trace!(target: "executor", depth, index, ?color, "set");
                    }
                    pc += 1;
                }
                Instruction::Fill { color } => {
                    let color = *color;
                    self.mirror.fill(color);
                    if let Some(strip) = &mut self.strip {
                        strip.fill(color.to_physical());
                    }
                    if self.verbose {
                        tracing::trace!(target: "executor", depth, ?color, "fill");
                    }
                    pc += 1;
                }
                Instruction::Sleep(reloadable) => {
                    let rem_secs = f64::from(reloadable.remaining) / 1000.0;
                    let v = rem_secs * speed;
                    if v >= 1.0 {
                        if self.verbose {
                            tracing::trace!(target: "executor", depth, "sleep_slice");
                        }
                        if let Some(stopper) = &self.stopper {
                            stopper.wait_slice(Duration::from_secs(1));
                        } else {
                            self.clock.sleep(Duration::from_secs(1));
                        }
                        let decremented = (rem_secs - speed).max(0.0);
                        reloadable.remaining = (decremented * 1000.0).round() as u16;
                        // Re-enter the same instruction without advancing pc.
                    } else if v > 0.0 {
                        if self.verbose {
                            tracing::trace!(target: "executor", depth, seconds = rem_secs, "sleep_tail");
                        }
                        let tail = Duration::from_secs_f64(rem_secs);
                        if let Some(stopper) = &self.stopper {
                            stopper.wait_slice(tail);
                        } else {
                            self.clock.sleep(tail);
                        }
                        reloadable.remaining = reloadable.reload;
                        pc += 1;
                    } else {
                        reloadable.remaining = reloadable.reload;
                        pc += 1;
                    }
                }
                Instruction::Show => {
                    if let Some(strip) = &mut self.strip {
                        strip.show();
                    }
                    if self.verbose {
                        tracing::trace!(target: "executor", depth, "show");
                    }
                    pc += 1;
                }
                Instruction::Repeat(reloadable) => {
                    if reloadable.remaining.saturating_sub(1) > 0 {
                        reloadable.remaining -= 1;
                        let frame_index = section_frames.len() - 1;
                        pc = section_frames[frame_index].return_pc;
                        let snapshot = section_frames[frame_index].color_snapshot.clone();
                        self.mirror.restore(&snapshot);
                        if let Some(strip) = &mut self.strip {
                            for (i, c) in snapshot.iter().enumerate() {
                                strip.set(i, c.to_physical());
                            }
                        }
                        let new_speed = if frame_index == 0 {
                            1.0
                        } else {
                            section_frames[frame_index - 1].speed
                        };
                        section_frames[frame_index].speed = new_speed;
                        if self.verbose {
                            tracing::trace!(target: "executor", depth, "repeat_rewind");
                        }
                        // pc already reassigned; do not advance.
                    } else {
                        reloadable.remaining = reloadable.reload;
                        pc += 1;
                    }
                }
                Instruction::MoveUp {
                    lo,
                    hi,
                    spaces,
                    trail,
                    rotate,
                    show,
                } => {
                    let (lo, hi, spaces, trail, rotate, show) =
                        (*lo as usize, *hi as usize, *spaces as usize, *trail, *rotate, *show);
                    let v = self.mirror.span(lo, hi);
                    if spaces > v.len() {
                        return Err(ExecError::InvalidMoveSpan { span: v.len(), spaces });
                    }
                    let prefix = if rotate {
                        v[v.len() - spaces..].to_vec()
                    } else if trail {
                        vec![v[0]; spaces]
                    } else {
                        vec![Color::BLACK; spaces]
                    };
                    let mut new_v = prefix;
                    new_v.extend_from_slice(&v[..v.len() - spaces]);
                    self.mirror.write_span(lo, &new_v);
                    if let Some(strip) = &mut self.strip {
                        for (offset, c) in new_v.iter().enumerate() {
                            strip.set(lo + offset, c.to_physical());
                        }
                        if show {
                            strip.show();
                        }
                    }
                    if self.verbose {
                        tracing::trace!(target: "executor", depth, lo, hi, spaces, trail, rotate, show, "move_up");
                    }
                    pc += 1;
                }
                Instruction::MoveDown {
                    lo,
                    hi,
                    spaces,
                    trail,
                    rotate,
                    show,
                } => {
                    let (lo, hi, spaces, trail, rotate, show) =
                        (*lo as usize, *hi as usize, *spaces as usize, *trail, *rotate, *show);
                    let v = self.mirror.span(lo, hi);
                    if spaces > v.len() {
                        return Err(ExecError::InvalidMoveSpan { span: v.len(), spaces });
                    }
                    // True rotation (deviates from the source's apparent
                    // tail-duplication bug): the vacated tail wraps the head.
                    let suffix = if rotate {
                        v[..spaces].to_vec()
                    } else if trail {
                        vec![v[v.len() - 1]; spaces]
                    } else {
                        vec![Color::BLACK; spaces]
                    };
                    let mut new_v = v[spaces..].to_vec();
                    new_v.extend_from_slice(&suffix);
                    self.mirror.write_span(lo, &new_v);
                    if let Some(strip) = &mut self.strip {
                        for (offset, c) in new_v.iter().enumerate() {
                            strip.set(lo + offset, c.to_physical());
                        }
                        if show {
                            strip.show();
                        }
                    }
                    if self.verbose {
                        tracing::trace!(target: "executor", depth, lo, hi, spaces, trail, rotate, show, "move_down");
                    }
                    pc += 1;
                }
                Instruction::SetMultiple(entries) => {
                    let entries = entries.clone();
                    for (index, color) in &entries {
                        self.mirror.set(*index as usize, *color);
                        if let Some(strip) = &mut self.strip {
                            strip.set(*index as usize, color.to_physical());
                        }
                    }
                    if self.verbose {
                        tracing::trace!(target: "executor", depth, count = entries.len(), "set_multiple");
                    }
                    pc += 1;
                }
                Instruction::SetSpeed { multiplier_milli } => {
                    section_frames[depth - 1].speed = f64::from(*multiplier_milli) / 1000.0;
                    if self.verbose {
                        tracing::trace!(target: "executor", depth, multiplier_milli, "set_speed");
                    }
                    pc += 1;
                }
                Instruction::ResetSpeed => {
                    section_frames[depth - 1].speed = 1.0;
                    if self.verbose {
                        tracing::trace!(target: "executor", depth, "reset_speed");
                    }
                    pc += 1;
                }
                Instruction::SetBrightness { index, l } => {
                    self.mirror.set_brightness(*index as usize, *l);
                    if let Some(strip) = &mut self.strip {
                        let color = self.mirror.color(*index as usize);
                        strip.set(*index as usize, color.to_physical());
                    }
                    if self.verbose {
                        tracing::trace!(target: "executor", depth, index, l, "set_brightness");
                    }
                    pc += 1;
                }
                Instruction::Section | Instruction::EndSection => unreachable!("handled above"),
            }

            executed += 1;
        }

        self.blank_strip();

        Ok(RunReport {
            outcome,
            instructions_executed: executed,
            elapsed: self.clock.now().duration_since(start),
        })
    }
}
