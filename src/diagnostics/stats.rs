use serde::Serialize;
use std::time::Instant;

use crate::source::frame::StreamKind;

/// Collects throughput statistics for a capture run.
pub struct PipelineStats {
    cycles: u64,
    stream_bytes: [u64; 3],
    start_time: Instant,
}

/// Snapshot of pipeline stats for logging and serialisation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub fps: f64,
    pub cycles: u64,
    pub color_bytes: u64,
    pub infrared_bytes: u64,
    pub depth_bytes: u64,
    pub bandwidth_bps: u64,
}

impl PipelineStats {
    /// Create new stats with zeroed counters.
    pub fn new() -> Self {
        Self {
            cycles: 0,
            stream_bytes: [0; 3],
            start_time: Instant::now(),
        }
    }

    /// Record one successfully written buffer for a stream.
    pub fn record_write(&mut self, kind: StreamKind, bytes: usize) {
        let idx = match kind {
            StreamKind::Color => 0,
            StreamKind::Infrared => 1,
            StreamKind::Depth => 2,
        };
        self.stream_bytes[idx] += bytes as u64;
    }

    /// Record the completion of one full acquire-transcode-write cycle.
    pub fn record_cycle(&mut self) {
        self.cycles += 1;
    }

    /// Completed cycles so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Cycles per second since the run started.
    pub fn fps(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed < 0.001 {
            return 0.0;
        }
        self.cycles as f64 / elapsed
    }

    /// Total output bandwidth in bytes per second.
    pub fn bandwidth_bps(&self) -> u64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed < 0.001 {
            return 0;
        }
        let total: u64 = self.stream_bytes.iter().sum();
        (total as f64 / elapsed) as u64
    }

    /// Take a serialisable snapshot.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            fps: self.fps(),
            cycles: self.cycles,
            color_bytes: self.stream_bytes[0],
            infrared_bytes: self.stream_bytes[1],
            depth_bytes: self.stream_bytes[2],
            bandwidth_bps: self.bandwidth_bps(),
        }
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}
