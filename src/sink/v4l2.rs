//! V4L2 loopback output sink.
//!
//! Each stream gets its own loopback device (`/dev/videoN`). Negotiation is
//! a one-time output-format set; frames are then plain sequential writes of
//! exactly `size_image` bytes, which the loopback driver hands to whatever
//! V4L2 consumer has the device open.

use std::path::{Path, PathBuf};

use v4l::format::{Colorspace, FieldOrder};
use v4l::video::Output;
use v4l::{Device, Format, FourCC};

use crate::sink::{write_retrying, EncodedBuffer, FrameSink, Result, SinkError, SinkFormat};

/// Sink writing one stream to a V4L2 loopback device.
pub struct V4l2Sink {
    device: Device,
    path: PathBuf,
    format: Option<SinkFormat>,
    retries: u32,
}

impl V4l2Sink {
    /// Open the loopback device. Fails with a negotiation error if the node
    /// cannot be opened.
    pub fn open(path: impl AsRef<Path>, retries: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let device = Device::with_path(&path)
            .map_err(|e| SinkError::Negotiation(format!("cannot open {}: {e}", path.display())))?;
        Ok(Self {
            device,
            path,
            format: None,
            retries,
        })
    }
}

/// Map a negotiated stream layout onto a V4L2 output format.
fn to_device_format(format: &SinkFormat) -> Format {
    let mut fmt = Format::new(format.width, format.height, FourCC::new(&format.fourcc));
    fmt.size = format.size_image;
    fmt.stride = format.bytes_per_line;
    fmt.field_order = FieldOrder::Progressive;
    fmt.colorspace = Colorspace::SRGB;
    fmt
}

impl FrameSink for V4l2Sink {
    fn negotiate(&mut self, format: &SinkFormat) -> Result<()> {
        if self.format.is_some() {
            return Err(SinkError::Negotiation(format!(
                "{} sink negotiated twice",
                format.kind
            )));
        }

        let requested = to_device_format(format);
        let accepted = self.device.set_format(&requested).map_err(|e| {
            SinkError::Negotiation(format!(
                "cannot set {} output format on {}: {e}",
                format.kind,
                self.path.display()
            ))
        })?;

        if accepted.width != format.width
            || accepted.height != format.height
            || accepted.fourcc != requested.fourcc
        {
            return Err(SinkError::UnsupportedFormat(format!(
                "{} requested {}x{} {}, device accepted {}x{} {}",
                self.path.display(),
                format.width,
                format.height,
                requested.fourcc,
                accepted.width,
                accepted.height,
                accepted.fourcc
            )));
        }
        if accepted.size < format.size_image {
            return Err(SinkError::UnsupportedFormat(format!(
                "{} accepted image size {} below required {}",
                self.path.display(),
                accepted.size,
                format.size_image
            )));
        }

        tracing::info!(
            "negotiated {} {}x{} ({} bytes/frame) on {}",
            format.kind,
            format.width,
            format.height,
            format.size_image,
            self.path.display()
        );
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
        write_retrying(&mut self.device, buffer.bytes(), self.retries)
    }
}
