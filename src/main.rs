//! Micropiscope appliance entry point.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, error, info, warn};

use micropiscope::config::{Cli, Config};
use micropiscope::controller::{CaptureController, Collaborators, Exit};
use micropiscope::encoder::JpegEncoder;
use micropiscope::event_loop;
use micropiscope::gpio::ButtonInputs;
use micropiscope::logging::init_logging;
use micropiscope::power::{LogOnlyPower, SystemPower};
use micropiscope::preview::{FramebufferPreview, NullPreview};
use micropiscope::traits::{PowerController, PreviewSink, Result};
use micropiscope::{ButtonClassifier, Intents, Storage, V4L2Pipeline};

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let config = Config::from(&cli);
    debug!(?config, "effective configuration");

    match run(config) {
        Ok(exit) => info!(?exit, "micropiscope stopped"),
        Err(err) => {
            error!(%err, "micropiscope failed");
            std::process::exit(1);
        }
    }
}

fn run(config: Config) -> Result<Exit> {
    let quit = Arc::new(AtomicBool::new(false));
    let quit_flag = Arc::clone(&quit);
    ctrlc::set_handler(move || {
        quit_flag.store(true, Ordering::SeqCst);
    })
    .map_err(io::Error::other)?;

    let intents = Arc::new(Intents::default());
    let storage = Arc::new(Storage::system(&config.storage));

    let eject_storage = Arc::clone(&storage);
    let classifier = ButtonClassifier::new(
        Arc::clone(&intents),
        config.buttons.power_hold,
        move || {
            let outcome = eject_storage.unmount();
            debug!(?outcome, "eject finished");
        },
    );
    let buttons = ButtonInputs::register(classifier, config.buttons.glitch_filter)?;
    if buttons.is_empty() {
        warn!("no button lines registered");
    } else {
        info!(lines = buttons.len(), glitch_filter = ?config.buttons.glitch_filter, "buttons registered");
    }

    let preview: Box<dyn PreviewSink> = match &config.preview {
        Some(path) => match FramebufferPreview::open(path) {
            Ok(preview) => Box::new(preview),
            Err(err) => {
                warn!(%err, path = %path.display(), "no framebuffer, running without preview");
                Box::new(NullPreview)
            }
        },
        None => Box::new(NullPreview),
    };
    let power: Box<dyn PowerController> = if config.power_off {
        Box::new(SystemPower)
    } else {
        Box::new(LogOnlyPower)
    };

    let pipeline = V4L2Pipeline::new(config.pipeline, quit);
    let mut controller = CaptureController::new(
        pipeline,
        Collaborators {
            encoder: Box::new(JpegEncoder::new(config.quality)),
            preview,
            power,
        },
        storage,
        intents,
    );

    let exit = event_loop::run(&mut controller);
    drop(buttons);
    exit
}
