//! Button input classification.
//!
//! Raw edges arrive from the GPIO interrupt thread already glitch
//! filtered. The classifier keeps one record per line and turns edges into
//! intents for the control loop:
//!
//! - POWER held longer than the hold threshold raises a shutdown request
//! - MENU pressed raises a capture request
//! - DOWN pressed ejects the removable volume directly
//! - UP, LEFT and RIGHT are wired but have no behaviour yet
//!
//! Lines are active-low (pulled up, pressing shorts to ground).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace};

/// Default hold time for power off.
pub const POWER_HOLD: Duration = Duration::from_millis(2000);

/// Default minimum pulse width accepted by the GPIO glitch filter.
pub const GLITCH_FILTER: Duration = Duration::from_millis(100);

/// One physical button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ButtonLine {
    /// Up.
    Up,
    /// Down, ejects the volume.
    Down,
    /// Left.
    Left,
    /// Right.
    Right,
    /// Menu, takes a picture.
    Menu,
    /// Power, hold to shut down.
    Power,
}

impl ButtonLine {
    /// Every line, in record order.
    pub const ALL: [Self; 6] = [
        Self::Up,
        Self::Down,
        Self::Left,
        Self::Right,
        Self::Menu,
        Self::Power,
    ];

    /// BCM pin number the button is wired to.
    pub const fn bcm_pin(self) -> u8 {
        match self {
            Self::Up => 15,
            Self::Down => 4,
            Self::Left => 17,
            Self::Right => 2,
            Self::Menu => 14,
            Self::Power => 18,
        }
    }

    const fn index(self) -> usize {
        match self {
            Self::Up => 0,
            Self::Down => 1,
            Self::Left => 2,
            Self::Right => 3,
            Self::Menu => 4,
            Self::Power => 5,
        }
    }
}

/// Logical level of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Pulled to ground: button pressed.
    Low,
    /// Pulled up: button released.
    High,
}

impl Level {
    const fn is_asserted(self) -> bool {
        matches!(self, Self::Low)
    }
}

/// Pending requests raised by buttons and consumed by the control loop.
///
/// Each flag is clear-on-read. Raising a flag that is already set does
/// nothing, so any number of presses before a read count as one.
#[derive(Debug, Default)]
pub struct Intents {
    capture: AtomicBool,
    shutdown: AtomicBool,
}

impl Intents {
    /// Request a still capture.
    pub fn raise_capture(&self) {
        self.capture.store(true, Ordering::Release);
    }

    /// Request a power off.
    pub fn raise_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Consume a pending capture request.
    pub fn take_capture(&self) -> bool {
        self.capture.swap(false, Ordering::AcqRel)
    }

    /// Consume a pending shutdown request.
    pub fn take_shutdown(&self) -> bool {
        self.shutdown.swap(false, Ordering::AcqRel)
    }
}

/// Receives edges for a registered line.
pub trait EdgeHandler: Send {
    /// `line` changed to `level` at monotonic `timestamp`.
    fn on_edge(&mut self, line: ButtonLine, level: Level, timestamp: Duration);
}

#[derive(Debug, Clone, Copy)]
struct LineState {
    level: Level,
    asserted_at: Option<Duration>,
}

impl Default for LineState {
    fn default() -> Self {
        Self {
            level: Level::High,
            asserted_at: None,
        }
    }
}

/// Turns button edges into intents.
pub struct ButtonClassifier {
    lines: [LineState; 6],
    intents: Arc<Intents>,
    eject: Box<dyn Fn() + Send>,
    power_hold: Duration,
}

impl ButtonClassifier {
    /// Classifier raising into `intents`; `eject` runs on DOWN presses.
    pub fn new<F>(intents: Arc<Intents>, power_hold: Duration, eject: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        Self {
            lines: [LineState::default(); 6],
            intents,
            eject: Box::new(eject),
            power_hold,
        }
    }

    /// Last level seen on `line`.
    pub fn level(&self, line: ButtonLine) -> Level {
        self.lines
            .get(line.index())
            .map_or(Level::High, |state| state.level)
    }

    fn power_edge(&mut self, level: Level, timestamp: Duration) {
        let Some(state) = self.lines.get_mut(ButtonLine::Power.index()) else {
            return;
        };

        if level.is_asserted() {
            state.asserted_at = Some(timestamp);
            return;
        }

        let Some(pressed) = state.asserted_at.take() else {
            return;
        };
        let held = timestamp.saturating_sub(pressed);
        if held > self.power_hold {
            info!(held_ms = held.as_millis(), "power button held, requesting shutdown");
            self.intents.raise_shutdown();
        } else {
            debug!(held_ms = held.as_millis(), "short power press ignored");
        }
    }
}

impl EdgeHandler for ButtonClassifier {
    fn on_edge(&mut self, line: ButtonLine, level: Level, timestamp: Duration) {
        let Some(state) = self.lines.get_mut(line.index()) else {
            return;
        };
        if state.level == level {
            // A lost edge in between; act on it anyway.
            trace!(?line, ?level, "repeated level");
        }
        state.level = level;

        match line {
            ButtonLine::Power => self.power_edge(level, timestamp),
            ButtonLine::Menu if level.is_asserted() => {
                info!("menu pressed, requesting capture");
                self.intents.raise_capture();
            }
            ButtonLine::Down if level.is_asserted() => {
                info!("down pressed, ejecting drive");
                (self.eject)();
            }
            _ => trace!(?line, ?level, "no action"),
        }
    }
}
