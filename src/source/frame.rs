use serde::Serialize;
use std::fmt;

use crate::source::SourceError;

/// The three streams a synchronized capture cycle produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Color,
    Infrared,
    Depth,
}

impl StreamKind {
    /// All stream kinds, in pipeline order.
    pub const ALL: [StreamKind; 3] = [StreamKind::Color, StreamKind::Infrared, StreamKind::Depth];

    /// Short lowercase label for log messages and thread names.
    pub fn label(self) -> &'static str {
        match self {
            StreamKind::Color => "color",
            StreamKind::Infrared => "infrared",
            StreamKind::Depth => "depth",
        }
    }

    /// The sample format a capture device delivers for this stream.
    pub fn native_format(self) -> SampleFormat {
        match self {
            StreamKind::Color => SampleFormat::UInt8x3,
            StreamKind::Infrared | StreamKind::Depth => SampleFormat::Float32x1,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Pixel layout of a captured sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Three 8-bit channels per pixel (BGR order on the wire).
    UInt8x3,
    /// One 32-bit little-endian float per pixel.
    Float32x1,
}

impl SampleFormat {
    /// Bytes occupied by one pixel in this format.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            SampleFormat::UInt8x3 => 3,
            SampleFormat::Float32x1 => 4,
        }
    }
}

/// A borrowed view over a single stream's captured sample.
///
/// The underlying buffer is owned by the [`FrameSource`](crate::FrameSource)
/// that produced it; the view is only valid while the source's acquisition
/// borrow is alive. Dropping the containing [`FrameTriple`] releases the
/// buffers back to the source.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    kind: StreamKind,
    width: u32,
    height: u32,
    format: SampleFormat,
    data: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Wrap a captured buffer, validating that its length matches the
    /// declared geometry.
    pub fn new(
        kind: StreamKind,
        width: u32,
        height: u32,
        format: SampleFormat,
        data: &'a [u8],
    ) -> Result<Self, SourceError> {
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if data.len() != expected {
            return Err(SourceError::BadFrame(format!(
                "{kind} frame is {} bytes, expected {expected} for {width}x{height}",
                data.len()
            )));
        }
        Ok(Self {
            kind,
            width,
            height,
            format,
            data,
        })
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Raw sample bytes, row-major.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }
}

/// One color, one infrared, and one depth frame from the same capture
/// instant.
///
/// Fully populated by construction — a partial triple is unrepresentable.
/// The triple borrows the source that produced it, so it must be dropped
/// (releasing the buffers) before the source can be acquired from or
/// stopped again.
#[derive(Debug)]
pub struct FrameTriple<'a> {
    color: Frame<'a>,
    infrared: Frame<'a>,
    depth: Frame<'a>,
}

impl<'a> FrameTriple<'a> {
    /// Assemble a triple, validating that each frame carries its slot's kind.
    pub fn new(
        color: Frame<'a>,
        infrared: Frame<'a>,
        depth: Frame<'a>,
    ) -> Result<Self, SourceError> {
        for (frame, expected) in [
            (&color, StreamKind::Color),
            (&infrared, StreamKind::Infrared),
            (&depth, StreamKind::Depth),
        ] {
            if frame.kind() != expected {
                return Err(SourceError::BadFrame(format!(
                    "{} frame in the {expected} slot",
                    frame.kind()
                )));
            }
        }
        Ok(Self {
            color,
            infrared,
            depth,
        })
    }

    /// The frame for a given stream.
    pub fn get(&self, kind: StreamKind) -> &Frame<'a> {
        match kind {
            StreamKind::Color => &self.color,
            StreamKind::Infrared => &self.infrared,
            StreamKind::Depth => &self.depth,
        }
    }

    /// All three frames, in [`StreamKind::ALL`] order.
    pub fn frames(&self) -> [&Frame<'a>; 3] {
        [&self.color, &self.infrared, &self.depth]
    }
}
