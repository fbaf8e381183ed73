//! k2vcam: bridge a Kinect v2's color, infrared, and depth streams onto
//! three V4L2 loopback devices.
//!
//! Configuration is environment-only (`K2VCAM_*`); ctrl-c or SIGINT drains
//! the pipeline and exits. Exit codes: 0 on normal shutdown, 2 when no
//! capture device is available, 1 for any other fatal error.

use std::process::ExitCode;

use tracing::{error, info};

use k2vcam::pipeline::SinkSet;
use k2vcam::{CaptureLoop, Config, PipelineError, ShutdownToken, SourceError};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("k2vcam=info".parse().expect("static directive parses")),
        )
        .init();

    let config = Config::from_env();
    let shutdown = ShutdownToken::new();
    {
        let token = shutdown.clone();
        if let Err(e) = ctrlc::set_handler(move || token.cancel()) {
            error!("failed to install interrupt handler: {e}");
            return ExitCode::from(1);
        }
    }

    match run(&config, shutdown) {
        Ok(()) => {
            info!("shut down cleanly");
            ExitCode::SUCCESS
        }
        Err(PipelineError::Source(SourceError::DeviceUnavailable(reason))) => {
            error!("no capture device: {reason}");
            ExitCode::from(2)
        }
        Err(e) => {
            error!("fatal: {e}");
            ExitCode::from(1)
        }
    }
}

fn run(config: &Config, shutdown: ShutdownToken) -> Result<(), PipelineError> {
    // Open the capture device first: if it is missing we exit before any
    // sink negotiation is attempted.
    let source = k2vcam::source::open_source(config)?;
    let sinks = open_sinks(config)?;

    let report = CaptureLoop::new(source, sinks, config.mirror, shutdown).run()?;
    info!(
        "emitted {} synchronized triples at {:.1} fps",
        report.cycles, report.fps
    );
    Ok(())
}

#[cfg(target_os = "linux")]
fn open_sinks(config: &Config) -> Result<SinkSet, PipelineError> {
    use k2vcam::StreamKind;

    Ok(SinkSet::new(
        open_sink(config, StreamKind::Color)?,
        open_sink(config, StreamKind::Infrared)?,
        open_sink(config, StreamKind::Depth)?,
    ))
}

#[cfg(target_os = "linux")]
fn open_sink(
    config: &Config,
    kind: k2vcam::StreamKind,
) -> Result<Box<dyn k2vcam::FrameSink>, PipelineError> {
    use k2vcam::sink::v4l2::V4l2Sink;

    let path = config.device_for(kind);
    let sink = V4l2Sink::open(path, config.write_retries)
        .map_err(|source| PipelineError::Sink { kind, source })?;
    info!("{kind} -> {}", path.display());
    Ok(Box::new(sink))
}

#[cfg(not(target_os = "linux"))]
fn open_sinks(_config: &Config) -> Result<SinkSet, PipelineError> {
    use k2vcam::{SinkError, StreamKind};
    Err(PipelineError::Sink {
        kind: StreamKind::Color,
        source: SinkError::Negotiation(
            "V4L2 loopback output requires Linux".to_string(),
        ),
    })
}
