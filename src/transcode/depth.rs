//! Depth codec: 16-bit depth carried through a 3-channel 8-bit image.
//!
//! The consumer of the depth loopback device expects this exact layout, so
//! the scale factor and channel order are a frozen wire contract — changing
//! them breaks whatever reads the device.
//!
//! Encoding, per pixel:
//! 1. Multiply the native-unit float by [`DEPTH_SCALE`] (keeps one decimal
//!    digit), truncate to u16, clamping into [0, 65535].
//! 2. Split into a low byte and a high byte.
//! 3. Mirror both planes horizontally (subject to [`MirrorPolicy`]).
//! 4. Pack as (low, high, [`FILLER`]) — the third channel only pads the
//!    image out to the generic 3-channel sink shape.
//!
//! Decoding: `depth ≈ (low + high * 256) / 10`, see [`decode_pixel`]. Valid
//! for encoded depth in [0.0, [`MAX_ENCODABLE`]] native units; values
//! outside that range clamp. That precision bound is accepted, not hidden.
//!
//! [`MirrorPolicy`]: crate::transcode::MirrorPolicy

use crate::source::frame::Frame;
use crate::transcode::mirror_rows;

/// Fixed scale applied before truncation; preserves 0.1-unit precision.
pub const DEPTH_SCALE: f32 = 10.0;

/// Constant third channel padding the output to three channels.
pub const FILLER: u8 = 0xFF;

/// Largest depth value (native units) the codec represents without clamping.
pub const MAX_ENCODABLE: f32 = 6553.5;

/// Encode a float depth frame into the packed 3-channel layout.
///
/// The caller has already validated the frame's sample format; output length
/// is width * height * 3.
pub(crate) fn encode(frame: &Frame<'_>, mirror: bool) -> Vec<u8> {
    let width = frame.width() as usize;
    let mut out = Vec::with_capacity(width * frame.height() as usize * 3);
    for row in frame.data().chunks_exact(width * 4) {
        let start = out.len();
        for chunk in row.chunks_exact(4) {
            let value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            // Saturating cast: truncates toward zero, clamps, maps NaN to 0.
            let scaled = (value * DEPTH_SCALE) as u16;
            out.push((scaled & 0xFF) as u8);
            out.push((scaled >> 8) as u8);
            out.push(FILLER);
        }
        if mirror {
            mirror_rows(&mut out[start..], width, 3);
        }
    }
    out
}

/// Recover the depth value (native units) carried by one encoded pixel.
pub fn decode_pixel(low: u8, high: u8) -> f32 {
    (low as f32 + high as f32 * 256.0) / DEPTH_SCALE
}
