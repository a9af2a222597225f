//! Micropiscope: control logic for a button-driven Raspberry Pi still camera.
//!
//! A V4L2 pipeline alternates between a low-resolution viewfinder stream and
//! a single high-resolution still. GPIO buttons raise intents that the event
//! loop consumes between frames; stills land as timestamped JPEGs on the
//! removable drive mounted under `/media/`.
//!
//! Hardware sits behind traits ([`Pipeline`], [`StillEncoder`],
//! [`PreviewSink`], [`PowerController`], [`storage::VolumeOps`]) so the
//! state machine runs against mocks in unit tests.

pub mod buttons;
pub mod config;
pub mod controller;
pub mod device;
pub mod encoder;
pub mod event_loop;
pub mod filename;
pub mod gpio;
pub mod logging;
pub mod power;
pub mod preview;
pub mod storage;
pub mod traits;

#[cfg(test)]
pub mod mock;

pub use buttons::{ButtonClassifier, ButtonLine, Intents, Level};
pub use controller::{CaptureController, Collaborators, Exit};
pub use device::{PipelineConfig, V4L2Pipeline};
pub use storage::{Storage, StorageConfig, UnmountOutcome};
pub use traits::{
    CameraError, DeviceMode, Format, FourCC, Frame, FrameMetadata, Pipeline, PipelineEvent,
    PowerController, PreviewSink, StillEncoder,
};
