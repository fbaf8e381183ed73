//! Simulated capture source.
//!
//! Produces deterministic synthetic triples at Kinect v2 native geometry so
//! the whole pipeline can run without hardware. Enabled via `K2VCAM_DUMMY=1`.

use std::time::Duration;

use crate::source::frame::{Frame, FrameTriple, SampleFormat, StreamKind};
use crate::source::{FrameSource, Result, SourceError};

/// Geometry and pacing for the simulated source.
#[derive(Debug, Clone)]
pub struct DummySourceConfig {
    pub color_width: u32,
    pub color_height: u32,
    /// Infrared and depth share the sensor geometry.
    pub depth_width: u32,
    pub depth_height: u32,
    /// Capture rate. Zero disables pacing entirely (used by tests).
    pub fps: f32,
}

impl Default for DummySourceConfig {
    fn default() -> Self {
        Self {
            color_width: 1920,
            color_height: 1080,
            depth_width: 512,
            depth_height: 424,
            fps: 30.0,
        }
    }
}

/// Capture source yielding synthetic frames.
///
/// Owns the three capture buffers; `acquire` refills them and hands out
/// borrowed views, so buffer reuse starts only once the caller's triple is
/// dropped.
pub struct DummySource {
    config: DummySourceConfig,
    color_buf: Vec<u8>,
    infrared_buf: Vec<u8>,
    depth_buf: Vec<u8>,
    cycle: u64,
    running: bool,
    closed: bool,
}

impl DummySource {
    /// Open the simulated device. Infallible in practice; the Result mirrors
    /// the hardware open contract.
    pub fn open(config: DummySourceConfig) -> Result<Self> {
        let color_len = config.color_width as usize * config.color_height as usize * 3;
        let depth_len = config.depth_width as usize * config.depth_height as usize * 4;
        Ok(Self {
            color_buf: vec![0u8; color_len],
            infrared_buf: vec![0u8; depth_len],
            depth_buf: vec![0u8; depth_len],
            config,
            cycle: 0,
            running: false,
            closed: false,
        })
    }

    /// Number of triples produced so far.
    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    fn fill_buffers(&mut self) {
        let seed = self.cycle as u8;

        // Color: per-row gradient shifted by the cycle counter.
        for (y, row) in self
            .color_buf
            .chunks_exact_mut(self.config.color_width as usize * 3)
            .enumerate()
        {
            for (x, pixel) in row.chunks_exact_mut(3).enumerate() {
                pixel[0] = (x as u8).wrapping_add(seed);
                pixel[1] = (y as u8).wrapping_add(seed);
                pixel[2] = seed;
            }
        }

        // Infrared: intensity ramp across each row.
        let width = self.config.depth_width as usize;
        for (i, chunk) in self.infrared_buf.chunks_exact_mut(4).enumerate() {
            let x = (i % width) as f32;
            chunk.copy_from_slice(&(x * 16.0).to_le_bytes());
        }

        // Depth: a flat plane sweeping between 0.5 m and ~4.5 m over cycles.
        let distance_mm = 500.0 + (self.cycle % 4000) as f32;
        for chunk in self.depth_buf.chunks_exact_mut(4) {
            chunk.copy_from_slice(&distance_mm.to_le_bytes());
        }
    }
}

impl FrameSource for DummySource {
    fn start(&mut self, streams: &[StreamKind]) -> Result<()> {
        if self.closed {
            return Err(SourceError::Closed);
        }
        for kind in StreamKind::ALL {
            if !streams.contains(&kind) {
                return Err(SourceError::Stream(format!(
                    "simulated source always captures all streams, {kind} not requested"
                )));
            }
        }
        self.running = true;
        Ok(())
    }

    fn acquire(&mut self) -> Result<FrameTriple<'_>> {
        if self.closed {
            return Err(SourceError::Closed);
        }
        if !self.running {
            return Err(SourceError::Stream("acquire before start".to_string()));
        }

        if self.config.fps > 0.0 {
            std::thread::sleep(Duration::from_secs_f32(1.0 / self.config.fps));
        }

        self.fill_buffers();
        self.cycle += 1;

        let config = &self.config;
        FrameTriple::new(
            Frame::new(
                StreamKind::Color,
                config.color_width,
                config.color_height,
                SampleFormat::UInt8x3,
                &self.color_buf,
            )?,
            Frame::new(
                StreamKind::Infrared,
                config.depth_width,
                config.depth_height,
                SampleFormat::Float32x1,
                &self.infrared_buf,
            )?,
            Frame::new(
                StreamKind::Depth,
                config.depth_width,
                config.depth_height,
                SampleFormat::Float32x1,
                &self.depth_buf,
            )?,
        )
    }

    fn stop(&mut self) -> Result<()> {
        self.running = false;
        self.closed = true;
        Ok(())
    }
}
