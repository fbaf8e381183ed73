//! Per-stream pixel transcoding.
//!
//! Stateless, pure per call: each captured frame is re-encoded into the byte
//! layout its loopback sink was negotiated for. Color stays 3x8-bit and is
//! mirrored; infrared goes float to 16-bit grey; depth goes through the
//! split-byte codec in [`depth`].

pub mod depth;

use thiserror::Error;

use crate::sink::EncodedBuffer;
use crate::source::frame::{Frame, SampleFormat, StreamKind};

/// Transcoding errors. These indicate an internal bug (a frame routed to
/// the wrong rule), never a recoverable condition.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("{kind} frame has sample format {actual:?}, expected {expected:?}")]
    FormatMismatch {
        kind: StreamKind,
        expected: SampleFormat,
        actual: SampleFormat,
    },
}

/// Per-stream horizontal mirror flags.
///
/// The reference behaviour mirrors the color and depth planes but not the
/// infrared luminance plane. Whether that asymmetry is intentional is
/// unknown, so it is configuration rather than a hardcoded rule; the
/// defaults preserve it.
#[derive(Debug, Clone, Copy)]
pub struct MirrorPolicy {
    pub color: bool,
    pub infrared: bool,
    pub depth: bool,
}

impl Default for MirrorPolicy {
    fn default() -> Self {
        Self {
            color: true,
            infrared: false,
            depth: true,
        }
    }
}

impl MirrorPolicy {
    /// Whether the given stream's output is mirrored.
    pub fn mirrors(&self, kind: StreamKind) -> bool {
        match kind {
            StreamKind::Color => self.color,
            StreamKind::Infrared => self.infrared,
            StreamKind::Depth => self.depth,
        }
    }
}

/// Convert one captured frame into its wire-ready buffer.
pub fn transcode(frame: &Frame<'_>, policy: &MirrorPolicy) -> Result<EncodedBuffer, TranscodeError> {
    let kind = frame.kind();
    let expected = kind.native_format();
    if frame.format() != expected {
        return Err(TranscodeError::FormatMismatch {
            kind,
            expected,
            actual: frame.format(),
        });
    }

    let mirror = policy.mirrors(kind);
    let bytes = match kind {
        StreamKind::Color => encode_color(frame, mirror),
        StreamKind::Infrared => encode_infrared(frame, mirror),
        StreamKind::Depth => depth::encode(frame, mirror),
    };
    Ok(EncodedBuffer::new(kind, bytes))
}

/// Color rule: identical samples and byte count, rows optionally mirrored.
fn encode_color(frame: &Frame<'_>, mirror: bool) -> Vec<u8> {
    let mut out = frame.data().to_vec();
    if mirror {
        mirror_rows(&mut out, frame.width() as usize, 3);
    }
    out
}

/// Infrared rule: each f32 intensity truncated (not rounded) and clamped
/// into [0, 65535], emitted as little-endian u16.
fn encode_infrared(frame: &Frame<'_>, mirror: bool) -> Vec<u8> {
    let width = frame.width() as usize;
    let mut out = Vec::with_capacity(width * frame.height() as usize * 2);
    for row in frame.data().chunks_exact(width * 4) {
        // Saturating cast: truncates toward zero, clamps out-of-range, NaN
        // becomes 0.
        let mut samples: Vec<u16> = row
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as u16)
            .collect();
        if mirror {
            samples.reverse();
        }
        for sample in samples {
            out.extend_from_slice(&sample.to_le_bytes());
        }
    }
    out
}

/// Reverse the pixel order within each row of a packed row-major buffer.
pub(crate) fn mirror_rows(data: &mut [u8], width: usize, bytes_per_pixel: usize) {
    for row in data.chunks_exact_mut(width * bytes_per_pixel) {
        for i in 0..width / 2 {
            let left = i * bytes_per_pixel;
            let right = (width - 1 - i) * bytes_per_pixel;
            for b in 0..bytes_per_pixel {
                row.swap(left + b, right + b);
            }
        }
    }
}
