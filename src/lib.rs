//! Kinect v2 to V4L2 loopback bridge.
//!
//! Acquires synchronized color/infrared/depth triples from a capture source,
//! transcodes each stream into the byte layout its loopback output device
//! expects, and writes them at capture rate until cancelled.

pub mod config;
pub mod diagnostics;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod transcode;

pub use config::Config;
pub use pipeline::{CaptureLoop, PipelineError, ShutdownToken};
pub use sink::{EncodedBuffer, FrameSink, SinkError, SinkFormat};
pub use source::frame::{Frame, FrameTriple, SampleFormat, StreamKind};
pub use source::{FrameSource, SourceError};
pub use transcode::MirrorPolicy;
