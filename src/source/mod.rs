//! Capture source boundary.
//!
//! The pipeline depends only on the [`FrameSource`] contract; concrete
//! hardware integrations (libfreenect2-style listeners) plug in behind it.
//! The crate ships a simulated source for development and tests.

pub mod dummy;
pub mod frame;

use thiserror::Error;

use crate::config::Config;
use crate::source::frame::{FrameTriple, StreamKind};

/// Capture source errors.
#[derive(Debug, Error)]
pub enum SourceError {
    /// No compatible capture hardware was found. Fatal at startup.
    #[error("no capture device available: {0}")]
    DeviceUnavailable(String),

    /// Acquire was called after the source was stopped. Normal loop-exit
    /// signal, not a failure.
    #[error("capture source is closed")]
    Closed,

    /// The device delivered a buffer that does not match its declared
    /// geometry.
    #[error("malformed frame: {0}")]
    BadFrame(String),

    /// The capture stream failed mid-run.
    #[error("capture stream error: {0}")]
    Stream(String),
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, SourceError>;

/// A device producing synchronized frame triples on demand.
///
/// Opening the device is the implementation's constructor, which fails with
/// [`SourceError::DeviceUnavailable`] when no hardware is present.
///
/// Buffer ownership follows a scoped-acquisition pattern: `acquire` returns
/// a [`FrameTriple`] borrowing the source mutably, so the triple must be
/// dropped — releasing the buffers — before the next `acquire` or `stop`
/// call. Implementations recycle the underlying buffers once the borrow
/// ends.
pub trait FrameSource {
    /// Begin continuous capture for the requested streams.
    fn start(&mut self, streams: &[StreamKind]) -> Result<()>;

    /// Block until a fully synchronized triple is available.
    ///
    /// Never yields a partial triple; any per-stream hiccup is retried
    /// internally. Returns [`SourceError::Closed`] once `stop` has been
    /// called.
    fn acquire(&mut self) -> Result<FrameTriple<'_>>;

    /// Stop capture and close the device. Any previously acquired triple
    /// has already been released by the time this can be called (the borrow
    /// rules see to it). Idempotent.
    fn stop(&mut self) -> Result<()>;
}

/// Open the capture source selected by the configuration.
///
/// With `K2VCAM_DUMMY=1` a simulated source is returned; otherwise a
/// hardware backend is required, and none is compiled into this build, so
/// the open fails with [`SourceError::DeviceUnavailable`].
pub fn open_source(config: &Config) -> Result<Box<dyn FrameSource>> {
    if config.dummy {
        tracing::info!("using simulated capture source");
        return Ok(Box::new(dummy::DummySource::open(config.dummy_source.clone())?));
    }
    Err(SourceError::DeviceUnavailable(
        "no hardware capture backend in this build (set K2VCAM_DUMMY=1 for the simulated source)"
            .to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_source_without_hardware_reports_unavailable() {
        let config = Config {
            dummy: false,
            ..Config::default()
        };
        let result = open_source(&config);
        assert!(matches!(result, Err(SourceError::DeviceUnavailable(_))));
    }

    #[test]
    fn open_source_returns_dummy_when_enabled() {
        let config = Config {
            dummy: true,
            ..Config::default()
        };
        assert!(open_source(&config).is_ok());
    }

    #[test]
    fn closed_is_not_reported_as_device_trouble() {
        let message = SourceError::Closed.to_string();
        assert_eq!(message, "capture source is closed");
    }
}
