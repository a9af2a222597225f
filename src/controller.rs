//! Viewfinder / still capture state machine.
//!
//! A capture is "stop viewfinder → configure still → run one frame →
//! encode → configure viewfinder". Only one stream is ever configured, so
//! at most one capture is in flight and buffers are never shared between
//! modes.

use std::ops::ControlFlow;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::buttons::Intents;
use crate::storage::Storage;
use crate::traits::{
    CameraError, DeviceMode, Frame, Pipeline, PipelineEvent, PowerController, PreviewSink,
    Result, StillEncoder,
};

/// Why the control loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// The pipeline asked to quit.
    Quit,
    /// A long power press powered the device off.
    Shutdown,
}

/// The collaborators the controller drives besides the pipeline.
pub struct Collaborators {
    /// Writes stills to disk.
    pub encoder: Box<dyn StillEncoder>,
    /// Shows viewfinder frames.
    pub preview: Box<dyn PreviewSink>,
    /// Powers the device off.
    pub power: Box<dyn PowerController>,
}

/// Owns the device mode and reacts to pipeline events and button intents.
pub struct CaptureController<P: Pipeline> {
    pipeline: P,
    collaborators: Collaborators,
    storage: Arc<Storage>,
    intents: Arc<Intents>,
    mode: DeviceMode,
    restarts: u64,
    captures: u64,
}

impl<P: Pipeline> CaptureController<P> {
    /// Controller over `pipeline`. Call [`Self::start`] before feeding events.
    pub fn new(
        pipeline: P,
        collaborators: Collaborators,
        storage: Arc<Storage>,
        intents: Arc<Intents>,
    ) -> Self {
        Self {
            pipeline,
            collaborators,
            storage,
            intents,
            mode: DeviceMode::Viewfinder,
            restarts: 0,
            captures: 0,
        }
    }

    /// Open the sensor and start the viewfinder.
    pub fn start(&mut self) -> Result<()> {
        self.pipeline.open()?;
        self.pipeline.configure(DeviceMode::Viewfinder)?;
        self.pipeline.start()?;
        self.mode = DeviceMode::Viewfinder;
        info!("viewfinder running");
        Ok(())
    }

    /// Current mode.
    pub const fn mode(&self) -> DeviceMode {
        self.mode
    }

    /// Timeout recoveries so far.
    pub const fn restarts(&self) -> u64 {
        self.restarts
    }

    /// Stills handed to the encoder so far, successful or not.
    pub const fn captures(&self) -> u64 {
        self.captures
    }

    /// The driven pipeline.
    pub const fn pipeline(&self) -> &P {
        &self.pipeline
    }

    /// Block for the next pipeline event.
    pub fn next_event(&mut self) -> Result<PipelineEvent> {
        self.pipeline.wait()
    }

    /// Stop and release the sensor.
    pub fn close(&mut self) {
        self.pipeline.close();
    }

    /// React to one pipeline event. A transition finishes completely before
    /// this returns.
    pub fn handle_event(&mut self, event: PipelineEvent) -> Result<ControlFlow<Exit>> {
        match event {
            PipelineEvent::Timeout => {
                self.restarts += 1;
                error!(
                    restarts = self.restarts,
                    mode = %self.mode,
                    "device timeout detected, attempting a restart"
                );
                self.pipeline.stop();
                self.pipeline.start()?;
                Ok(ControlFlow::Continue(()))
            }
            PipelineEvent::Quit => Ok(ControlFlow::Break(Exit::Quit)),
            PipelineEvent::Unrecognised(what) => Err(CameraError::UnexpectedEvent(what)),
            PipelineEvent::FrameCompleted(frame) => match self.mode {
                DeviceMode::Viewfinder => self.viewfinder_frame(&frame),
                DeviceMode::Still => {
                    self.still_frame(&frame)?;
                    Ok(ControlFlow::Continue(()))
                }
            },
        }
    }

    fn viewfinder_frame(&mut self, frame: &Frame) -> Result<ControlFlow<Exit>> {
        if self.intents.take_capture() {
            self.switch_to(DeviceMode::Still)?;
            return Ok(ControlFlow::Continue(()));
        }

        if self.intents.take_shutdown() {
            self.pipeline.stop();
            self.pipeline.teardown();
            info!("shutting down");
            self.storage.flush();
            if let Err(err) = self.collaborators.power.power_off() {
                error!(%err, "power off request failed");
            }
            return Ok(ControlFlow::Break(Exit::Shutdown));
        }

        if let Some(info) = self.pipeline.stream_info() {
            self.collaborators.preview.show(frame, info);
        }
        Ok(ControlFlow::Continue(()))
    }

    fn still_frame(&mut self, frame: &Frame) -> Result<()> {
        self.pipeline.stop();
        info!(sequence = frame.metadata.sequence, "still capture image received");

        match self.pipeline.stream_info().cloned() {
            Some(info) => {
                self.captures += 1;
                let label = self.pipeline.device_label();
                let encoder = &self.collaborators.encoder;
                if let Some(path) = self
                    .storage
                    .save_capture(|dest| encoder.encode(frame, &info, dest, label))
                {
                    debug!(path = %path.display(), "still saved");
                }
            }
            None => warn!("still frame without stream info, discarding"),
        }

        // Back to preview whether or not the still was saved.
        self.switch_to(DeviceMode::Viewfinder)
    }

    fn switch_to(&mut self, mode: DeviceMode) -> Result<()> {
        self.pipeline.stop();
        self.pipeline.teardown();
        self.pipeline.configure(mode)?;
        self.pipeline.start()?;
        debug!(from = %self.mode, to = %mode, "mode switched");
        self.mode = mode;
        Ok(())
    }
}
