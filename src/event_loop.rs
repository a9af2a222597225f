//! The single control loop of the device.

use std::ops::ControlFlow;

use tracing::{info, trace};

use crate::controller::{CaptureController, Exit};
use crate::traits::{Pipeline, Result};

/// Start the viewfinder and dispatch pipeline events until the device quits
/// or shuts down.
///
/// Not re-entrant: exactly one loop drives a controller. Protocol errors
/// end the loop with `Err`; the pipeline is released either way.
pub fn run<P: Pipeline>(controller: &mut CaptureController<P>) -> Result<Exit> {
    let result = dispatch(controller);
    controller.close();
    if let Ok(exit) = &result {
        info!(?exit, captures = controller.captures(), "event loop finished");
    }
    result
}

fn dispatch<P: Pipeline>(controller: &mut CaptureController<P>) -> Result<Exit> {
    controller.start()?;

    loop {
        let event = controller.next_event()?;
        trace!(mode = %controller.mode(), "pipeline event");
        if let ControlFlow::Break(exit) = controller.handle_event(event)? {
            return Ok(exit);
        }
    }
}
