//! Button lines on the Raspberry Pi GPIO header.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rppal::gpio::{Event, Gpio, InputPin, Trigger};
use tracing::debug;

use crate::buttons::{ButtonLine, EdgeHandler, Level};
use crate::traits::{CameraError, Result};

/// The configured button inputs. Dropping this releases the interrupts.
pub struct ButtonInputs {
    pins: Vec<InputPin>,
}

impl ButtonInputs {
    /// Configure every [`ButtonLine`] as a pulled-up input and forward its
    /// edges to `handler`.
    ///
    /// Pulses shorter than `glitch_filter` are dropped before `handler`
    /// sees them.
    pub fn register<H>(handler: H, glitch_filter: Duration) -> Result<Self>
    where
        H: EdgeHandler + 'static,
    {
        let gpio = Gpio::new().map_err(|err| CameraError::Gpio(err.to_string()))?;
        let handler: Arc<Mutex<dyn EdgeHandler>> = Arc::new(Mutex::new(handler));

        let mut pins = Vec::with_capacity(ButtonLine::ALL.len());
        for line in ButtonLine::ALL {
            let mut pin = gpio
                .get(line.bcm_pin())
                .map_err(|err| CameraError::Gpio(format!("{line:?} (BCM {}): {err}", line.bcm_pin())))?
                .into_input_pullup();

            let handler = Arc::clone(&handler);
            pin.set_async_interrupt(Trigger::Both, Some(glitch_filter), move |event: Event| {
                let level = edge_level(event.trigger);
                // Each pin interrupts on its own thread; the lock
                // serialises them into the classifier.
                handler
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .on_edge(line, level, event.timestamp);
            })
            .map_err(|err| CameraError::Gpio(format!("{line:?} interrupt: {err}")))?;

            debug!(?line, pin = line.bcm_pin(), "button line ready");
            pins.push(pin);
        }

        Ok(Self { pins })
    }

    /// Number of lines being watched.
    pub fn len(&self) -> usize {
        self.pins.len()
    }

    /// Whether no lines are being watched.
    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }
}

const fn edge_level(trigger: Trigger) -> Level {
    match trigger {
        Trigger::FallingEdge => Level::Low,
        _ => Level::High,
    }
}
