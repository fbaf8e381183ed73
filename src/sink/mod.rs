//! Output sink boundary.
//!
//! A sink is a per-stream output channel that takes a one-time format
//! negotiation and then a sequence of fixed-size writes. The pipeline talks
//! to [`FrameSink`]; the Linux loopback implementation lives in [`v4l2`],
//! and [`WriterSink`] adapts any `io::Write` channel (files in tests, raw
//! capture dumps).

#[cfg(target_os = "linux")]
pub mod v4l2;

use std::io;

use thiserror::Error;

use crate::source::frame::{Frame, StreamKind};

/// Output sink errors.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The channel could not be opened or configured. Fatal at startup.
    #[error("sink negotiation failed: {0}")]
    Negotiation(String),

    /// The channel cannot represent the requested pixel layout.
    #[error("unsupported sink format: {0}")]
    UnsupportedFormat(String),

    /// A buffer's length does not equal the negotiated image size. This is
    /// an internal bug (dimensions changed mid-run) and is fatal.
    #[error("buffer is {actual} bytes, negotiated image size is {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    /// A write stalled short of the full image and the retry budget ran out.
    #[error("short write persisted after {retries} retries ({written}/{expected} bytes)")]
    WriteFailure {
        written: usize,
        expected: usize,
        retries: u32,
    },

    /// A write was attempted before `negotiate`.
    #[error("sink used before format negotiation")]
    NotNegotiated,

    #[error("sink I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, SinkError>;

/// Wire-ready output for one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBuffer {
    kind: StreamKind,
    bytes: Vec<u8>,
}

impl EncodedBuffer {
    pub fn new(kind: StreamKind, bytes: Vec<u8>) -> Self {
        Self { kind, bytes }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Negotiated byte layout for one stream's output channel.
///
/// Fixed once at startup from the first observed frame dimensions and never
/// renegotiated mid-run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkFormat {
    pub kind: StreamKind,
    pub width: u32,
    pub height: u32,
    /// Pixel format tag, V4L2 fourcc convention.
    pub fourcc: [u8; 4],
    /// Total bytes per image; every write must carry exactly this many.
    pub size_image: u32,
    pub bytes_per_line: u32,
}

impl SinkFormat {
    /// Derive the output layout for one stream from its first captured
    /// frame.
    ///
    /// Color and depth ride a generic 3-channel 8-bit image (`BGR3`); the
    /// depth channel packing inside that shape is the codec in
    /// [`crate::transcode::depth`]. Infrared is 16-bit grey (`Y16 `).
    pub fn for_frame(frame: &Frame<'_>) -> Self {
        let (width, height) = (frame.width(), frame.height());
        let (fourcc, bpp) = match frame.kind() {
            StreamKind::Color | StreamKind::Depth => (*b"BGR3", 3),
            StreamKind::Infrared => (*b"Y16 ", 2),
        };
        Self {
            kind: frame.kind(),
            width,
            height,
            fourcc,
            size_image: width * height * bpp,
            bytes_per_line: width * bpp,
        }
    }
}

/// An output channel accepting exact-size byte buffers in a pre-negotiated
/// format.
pub trait FrameSink {
    /// Configure the channel for the given layout. Must be called exactly
    /// once before any write.
    fn negotiate(&mut self, format: &SinkFormat) -> Result<()>;

    /// Write one image. The buffer must be exactly `size_image` bytes; a
    /// mismatch fails without a partial write. May block under backpressure.
    fn write_frame(&mut self, buffer: &EncodedBuffer) -> Result<()>;
}

/// Write a full buffer, retrying the remainder on short writes.
///
/// `Interrupted` writes are retried for free; any other write that makes no
/// progress or stops short consumes one unit of the retry budget. When the
/// budget is exhausted with bytes still unwritten, the result is
/// [`SinkError::WriteFailure`].
pub(crate) fn write_retrying<W: io::Write>(
    writer: &mut W,
    bytes: &[u8],
    retries: u32,
) -> Result<()> {
    let mut written = 0;
    let mut attempts_left = retries;
    while written < bytes.len() {
        match writer.write(&bytes[written..]) {
            Ok(n) => {
                written += n;
                if written >= bytes.len() {
                    break;
                }
                if attempts_left == 0 {
                    return Err(SinkError::WriteFailure {
                        written,
                        expected: bytes.len(),
                        retries,
                    });
                }
                attempts_left -= 1;
                tracing::warn!(
                    "short write ({written}/{} bytes), retrying ({attempts_left} left)",
                    bytes.len()
                );
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(SinkError::Io(e)),
        }
    }
    Ok(())
}

/// Sink over any `io::Write` channel.
///
/// Used for raw capture dumps and as the test double for channel behaviour;
/// enforces the same negotiate-then-exact-size discipline as the device
/// sinks.
pub struct WriterSink<W: io::Write> {
    writer: W,
    format: Option<SinkFormat>,
    retries: u32,
}

impl<W: io::Write> WriterSink<W> {
    pub fn new(writer: W, retries: u32) -> Self {
        Self {
            writer,
            format: None,
            retries,
        }
    }

    /// The negotiated format, if negotiation has happened.
    pub fn format(&self) -> Option<&SinkFormat> {
        self.format.as_ref()
    }

    /// Consume the sink and return the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: io::Write> FrameSink for WriterSink<W> {
    fn negotiate(&mut self, format: &SinkFormat) -> Result<()> {
        if self.format.is_some() {
            return Err(SinkError::Negotiation(format!(
                "{} sink negotiated twice",
                format.kind
            )));
        }
        self.format = Some(format.clone());
        Ok(())
    }

    fn write_frame(&mut self, buffer: &EncodedBuffer) -> Result<()> {
        let format = self.format.as_ref().ok_or(SinkError::NotNegotiated)?;
        if buffer.len() != format.size_image as usize {
            return Err(SinkError::SizeMismatch {
                expected: format.size_image as usize,
                actual: buffer.len(),
            });
        }
        write_retrying(&mut self.writer, buffer.bytes(), self.retries)?;
        self.writer.flush()?;
        Ok(())
    }
}
