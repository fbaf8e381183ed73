//! Capture loop orchestration.
//!
//! Drives FrameSource → transcode → FrameSink once per capture cycle on a
//! single thread, owning the negotiation, cancellation, and teardown
//! protocol. The only auxiliary thread is a stats reporter; it shares no
//! frame state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::diagnostics::stats::{PipelineStats, StatsSnapshot};
use crate::sink::{FrameSink, SinkError, SinkFormat};
use crate::source::frame::StreamKind;
use crate::source::{FrameSource, SourceError};
use crate::transcode::{transcode, MirrorPolicy, TranscodeError};

/// Interval between periodic throughput reports.
const REPORT_INTERVAL: Duration = Duration::from_secs(5);
/// Poll interval for the reporter thread's shutdown check.
const REPORT_POLL: Duration = Duration::from_millis(200);

/// Fatal pipeline errors. [`SourceError::Closed`] never surfaces here; it is
/// consumed by the loop as its normal exit signal.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    #[error("{kind} sink: {source}")]
    Sink {
        kind: StreamKind,
        #[source]
        source: SinkError,
    },
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Cancellation token shared between the capture loop and the interrupt
/// handler.
///
/// A single atomic flag: initialized false, set true at most once, never
/// reset. The loop observes it at one checkpoint per cycle, so cancellation
/// latency is bounded by one full acquire-transcode-write cycle.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken(Arc<AtomicBool>);

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Safe to call from a signal handler context; the
    /// store is the only side effect.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The three per-stream output channels.
pub struct SinkSet {
    color: Box<dyn FrameSink>,
    infrared: Box<dyn FrameSink>,
    depth: Box<dyn FrameSink>,
}

impl SinkSet {
    pub fn new(
        color: Box<dyn FrameSink>,
        infrared: Box<dyn FrameSink>,
        depth: Box<dyn FrameSink>,
    ) -> Self {
        Self {
            color,
            infrared,
            depth,
        }
    }

    fn get_mut(&mut self, kind: StreamKind) -> &mut dyn FrameSink {
        match kind {
            StreamKind::Color => self.color.as_mut(),
            StreamKind::Infrared => self.infrared.as_mut(),
            StreamKind::Depth => self.depth.as_mut(),
        }
    }
}

/// Loop lifecycle states, logged at each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Init,
    Negotiating,
    Streaming,
    Draining,
    Closed,
}

/// Orchestrates one capture run: negotiate sink formats from the first
/// triple, stream until cancelled or the source closes, then drain.
pub struct CaptureLoop {
    source: Box<dyn FrameSource>,
    sinks: SinkSet,
    mirror: MirrorPolicy,
    shutdown: ShutdownToken,
    stats: Arc<Mutex<PipelineStats>>,
    state: LoopState,
}

impl CaptureLoop {
    pub fn new(
        source: Box<dyn FrameSource>,
        sinks: SinkSet,
        mirror: MirrorPolicy,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            source,
            sinks,
            mirror,
            shutdown,
            stats: Arc::new(Mutex::new(PipelineStats::new())),
            state: LoopState::Init,
        }
    }

    /// Run the pipeline to completion.
    ///
    /// Teardown is shared by every exit path: any in-flight triple has been
    /// released (its borrow is scoped to the cycle that acquired it), then
    /// the source is stopped, then the sinks close when the loop is dropped.
    pub fn run(mut self) -> Result<StatsSnapshot> {
        self.source.start(&StreamKind::ALL)?;

        let reporter_stop = Arc::new(AtomicBool::new(false));
        let reporter = spawn_reporter(Arc::clone(&self.stats), Arc::clone(&reporter_stop));

        let outcome = self.drive();

        self.set_state(LoopState::Draining);
        if let Err(e) = self.source.stop() {
            warn!("source stop failed during drain: {e}");
        }
        reporter_stop.store(true, Ordering::Relaxed);
        if let Some(handle) = reporter {
            let _ = handle.join();
        }
        self.set_state(LoopState::Closed);

        let snapshot = self.stats.lock().snapshot();
        match outcome {
            Ok(()) => {
                match serde_json::to_string(&snapshot) {
                    Ok(json) => info!("run complete: {json}"),
                    Err(_) => info!("run complete: {} cycles", snapshot.cycles),
                }
                Ok(snapshot)
            }
            Err(e) => Err(e),
        }
    }

    fn drive(&mut self) -> Result<()> {
        self.negotiate()?;
        self.stream()
    }

    /// Acquire exactly one triple to learn each stream's geometry, derive
    /// and negotiate the per-stream sink formats, release the triple.
    fn negotiate(&mut self) -> Result<()> {
        self.set_state(LoopState::Negotiating);

        let formats = {
            let triple = self.source.acquire()?;
            StreamKind::ALL.map(|kind| SinkFormat::for_frame(triple.get(kind)))
        };

        for format in &formats {
            info!(
                "{}: {}x{}, {} bytes per frame",
                format.kind, format.width, format.height, format.size_image
            );
            self.sinks
                .get_mut(format.kind)
                .negotiate(format)
                .map_err(|source| PipelineError::Sink {
                    kind: format.kind,
                    source,
                })?;
        }
        Ok(())
    }

    fn stream(&mut self) -> Result<()> {
        self.set_state(LoopState::Streaming);

        loop {
            if self.shutdown.is_cancelled() {
                info!("shutdown requested, draining");
                return Ok(());
            }

            let triple = match self.source.acquire() {
                Ok(triple) => triple,
                Err(SourceError::Closed) => {
                    info!("source closed, draining");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            for kind in StreamKind::ALL {
                let buffer = transcode(triple.get(kind), &self.mirror)?;
                self.sinks
                    .get_mut(kind)
                    .write_frame(&buffer)
                    .map_err(|source| PipelineError::Sink { kind, source })?;
                self.stats.lock().record_write(kind, buffer.len());
            }

            drop(triple);
            self.stats.lock().record_cycle();
            debug!("cycle complete");
        }
    }

    fn set_state(&mut self, next: LoopState) {
        debug!("pipeline state {:?} -> {next:?}", self.state);
        self.state = next;
    }
}

/// Spawn the periodic throughput reporter.
fn spawn_reporter(
    stats: Arc<Mutex<PipelineStats>>,
    stop: Arc<AtomicBool>,
) -> Option<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("k2vcam-stats".to_string())
        .spawn(move || {
            let mut last_report = Instant::now();
            while !stop.load(Ordering::Relaxed) {
                if last_report.elapsed() >= REPORT_INTERVAL {
                    let snap = stats.lock().snapshot();
                    info!(
                        "{} cycles, {:.1} fps, {} B/s",
                        snap.cycles, snap.fps, snap.bandwidth_bps
                    );
                    last_report = Instant::now();
                }
                std::thread::sleep(REPORT_POLL);
            }
        });
    match handle {
        Ok(handle) => Some(handle),
        // The pipeline runs fine without periodic reports.
        Err(e) => {
            warn!("failed to spawn stats reporter: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::EncodedBuffer;
    use crate::source::frame::{Frame, FrameTriple, SampleFormat};
    use crate::source::Result as SourceResult;

    /// Source producing a fixed number of triples, then `Closed`.
    struct ScriptedSource {
        width: u32,
        height: u32,
        color: Vec<u8>,
        floats: Vec<u8>,
        remaining: u32,
        /// Change geometry after this many acquires (simulates a mid-run
        /// dimension change, which must surface as a fatal size mismatch).
        grow_after: Option<u32>,
        acquired: u32,
        stopped: Arc<AtomicBool>,
    }

    impl ScriptedSource {
        fn new(width: u32, height: u32, triples: u32) -> Self {
            Self {
                width,
                height,
                color: vec![1u8; (width * height * 3) as usize],
                floats: vec![0u8; (width * height * 4) as usize],
                remaining: triples,
                grow_after: None,
                acquired: 0,
                stopped: Arc::new(AtomicBool::new(false)),
            }
        }

        fn stopped_flag(&self) -> Arc<AtomicBool> {
            Arc::clone(&self.stopped)
        }
    }

    impl FrameSource for ScriptedSource {
        fn start(&mut self, _streams: &[StreamKind]) -> SourceResult<()> {
            Ok(())
        }

        fn acquire(&mut self) -> SourceResult<FrameTriple<'_>> {
            if self.stopped.load(Ordering::Relaxed) || self.remaining == 0 {
                return Err(SourceError::Closed);
            }
            self.remaining -= 1;
            self.acquired += 1;

            if let Some(after) = self.grow_after {
                if self.acquired > after {
                    self.width += 2;
                    self.color = vec![1u8; (self.width * self.height * 3) as usize];
                    self.floats = vec![0u8; (self.width * self.height * 4) as usize];
                }
            }

            FrameTriple::new(
                Frame::new(
                    StreamKind::Color,
                    self.width,
                    self.height,
                    SampleFormat::UInt8x3,
                    &self.color,
                )?,
                Frame::new(
                    StreamKind::Infrared,
                    self.width,
                    self.height,
                    SampleFormat::Float32x1,
                    &self.floats,
                )?,
                Frame::new(
                    StreamKind::Depth,
                    self.width,
                    self.height,
                    SampleFormat::Float32x1,
                    &self.floats,
                )?,
            )
        }

        fn stop(&mut self) -> SourceResult<()> {
            self.stopped.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    /// Shared observation point for a recording sink, surviving the loop's
    /// consumption of the sink boxes.
    #[derive(Default)]
    struct SinkLog {
        format: Mutex<Option<SinkFormat>>,
        write_lengths: Mutex<Vec<usize>>,
    }

    struct RecordingSink {
        log: Arc<SinkLog>,
    }

    impl FrameSink for RecordingSink {
        fn negotiate(&mut self, format: &SinkFormat) -> std::result::Result<(), SinkError> {
            let mut slot = self.log.format.lock();
            if slot.is_some() {
                return Err(SinkError::Negotiation("negotiated twice".to_string()));
            }
            *slot = Some(format.clone());
            Ok(())
        }

        fn write_frame(&mut self, buffer: &EncodedBuffer) -> std::result::Result<(), SinkError> {
            let guard = self.log.format.lock();
            let format = guard.as_ref().ok_or(SinkError::NotNegotiated)?;
            if buffer.len() != format.size_image as usize {
                return Err(SinkError::SizeMismatch {
                    expected: format.size_image as usize,
                    actual: buffer.len(),
                });
            }
            drop(guard);
            self.log.write_lengths.lock().push(buffer.len());
            Ok(())
        }
    }

    fn recording_sinks() -> (SinkSet, [Arc<SinkLog>; 3]) {
        let logs = [
            Arc::new(SinkLog::default()),
            Arc::new(SinkLog::default()),
            Arc::new(SinkLog::default()),
        ];
        let sinks = SinkSet::new(
            Box::new(RecordingSink {
                log: Arc::clone(&logs[0]),
            }),
            Box::new(RecordingSink {
                log: Arc::clone(&logs[1]),
            }),
            Box::new(RecordingSink {
                log: Arc::clone(&logs[2]),
            }),
        );
        (sinks, logs)
    }

    #[test]
    fn negotiates_from_first_triple_then_streams_until_closed() {
        let source = ScriptedSource::new(4, 2, 3);
        let (sinks, logs) = recording_sinks();
        let pipeline = CaptureLoop::new(
            Box::new(source),
            sinks,
            MirrorPolicy::default(),
            ShutdownToken::new(),
        );

        let report = pipeline.run().unwrap();

        // First triple feeds negotiation, the remaining two are streamed.
        assert_eq!(report.cycles, 2);

        let color_format = logs[0].format.lock().clone().unwrap();
        assert_eq!(color_format.size_image, 4 * 2 * 3);
        let infrared_format = logs[1].format.lock().clone().unwrap();
        assert_eq!(infrared_format.size_image, 4 * 2 * 2);
        let depth_format = logs[2].format.lock().clone().unwrap();
        assert_eq!(depth_format.size_image, 4 * 2 * 3);

        // Every streamed cycle wrote one exact-size buffer per stream.
        assert_eq!(*logs[0].write_lengths.lock(), vec![24, 24]);
        assert_eq!(*logs[1].write_lengths.lock(), vec![16, 16]);
        assert_eq!(*logs[2].write_lengths.lock(), vec![24, 24]);
    }

    #[test]
    fn cancelled_token_stops_streaming_immediately_after_negotiation() {
        let source = ScriptedSource::new(4, 2, 100);
        let stopped = source.stopped_flag();
        let (sinks, logs) = recording_sinks();
        let shutdown = ShutdownToken::new();
        shutdown.cancel();

        let pipeline = CaptureLoop::new(
            Box::new(source),
            sinks,
            MirrorPolicy::default(),
            shutdown,
        );
        let report = pipeline.run().unwrap();

        assert_eq!(report.cycles, 0);
        assert!(logs[0].write_lengths.lock().is_empty());
        // Draining still stopped the source.
        assert!(stopped.load(Ordering::Relaxed));
    }

    /// Sink that requests shutdown partway through a streamed cycle.
    struct CancellingSink {
        inner: RecordingSink,
        token: ShutdownToken,
        cancel_on_write: u32,
        writes: u32,
    }

    impl FrameSink for CancellingSink {
        fn negotiate(&mut self, format: &SinkFormat) -> std::result::Result<(), SinkError> {
            self.inner.negotiate(format)
        }

        fn write_frame(&mut self, buffer: &EncodedBuffer) -> std::result::Result<(), SinkError> {
            self.writes += 1;
            if self.writes == self.cancel_on_write {
                self.token.cancel();
            }
            self.inner.write_frame(buffer)
        }
    }

    #[test]
    fn cancel_during_streaming_finishes_the_cycle_then_drains() {
        // Effectively endless source: only cancellation can end the run.
        let source = ScriptedSource::new(4, 2, u32::MAX);
        let stopped = source.stopped_flag();
        let shutdown = ShutdownToken::new();

        let (_, logs) = recording_sinks();
        // The color sink cancels in the middle of the second streamed cycle.
        let sinks = SinkSet::new(
            Box::new(CancellingSink {
                inner: RecordingSink {
                    log: Arc::clone(&logs[0]),
                },
                token: shutdown.clone(),
                cancel_on_write: 2,
                writes: 0,
            }),
            Box::new(RecordingSink {
                log: Arc::clone(&logs[1]),
            }),
            Box::new(RecordingSink {
                log: Arc::clone(&logs[2]),
            }),
        );

        let pipeline = CaptureLoop::new(
            Box::new(source),
            sinks,
            MirrorPolicy::default(),
            shutdown,
        );
        let report = pipeline.run().unwrap();

        // The cycle that observed the cancellation still completes in full,
        // and no further cycle starts.
        assert_eq!(report.cycles, 2);
        assert_eq!(logs[0].write_lengths.lock().len(), 2);
        assert_eq!(logs[1].write_lengths.lock().len(), 2);
        assert_eq!(logs[2].write_lengths.lock().len(), 2);
        assert!(stopped.load(Ordering::Relaxed));
    }

    #[test]
    fn source_closing_is_a_normal_exit() {
        let source = ScriptedSource::new(2, 2, 1);
        let (sinks, _logs) = recording_sinks();
        let pipeline = CaptureLoop::new(
            Box::new(source),
            sinks,
            MirrorPolicy::default(),
            ShutdownToken::new(),
        );
        // Only the negotiation triple exists; the loop must still end Ok.
        let report = pipeline.run().unwrap();
        assert_eq!(report.cycles, 0);
    }

    #[test]
    fn sink_negotiation_failure_is_fatal_and_still_drains() {
        struct RefusingSink;
        impl FrameSink for RefusingSink {
            fn negotiate(&mut self, format: &SinkFormat) -> std::result::Result<(), SinkError> {
                Err(SinkError::UnsupportedFormat(format!(
                    "{} layout refused",
                    format.kind
                )))
            }
            fn write_frame(
                &mut self,
                _buffer: &EncodedBuffer,
            ) -> std::result::Result<(), SinkError> {
                panic!("write after failed negotiation");
            }
        }

        let source = ScriptedSource::new(4, 2, 10);
        let stopped = source.stopped_flag();
        let (_, logs) = recording_sinks();
        let sinks = SinkSet::new(
            Box::new(RefusingSink),
            Box::new(RecordingSink {
                log: Arc::clone(&logs[1]),
            }),
            Box::new(RecordingSink {
                log: Arc::clone(&logs[2]),
            }),
        );

        let pipeline = CaptureLoop::new(
            Box::new(source),
            sinks,
            MirrorPolicy::default(),
            ShutdownToken::new(),
        );
        let result = pipeline.run();

        assert!(matches!(
            result,
            Err(PipelineError::Sink {
                kind: StreamKind::Color,
                source: SinkError::UnsupportedFormat(_)
            })
        ));
        assert!(logs[1].write_lengths.lock().is_empty());
        assert!(stopped.load(Ordering::Relaxed));
    }

    #[test]
    fn mid_run_dimension_change_surfaces_as_size_mismatch() {
        let mut source = ScriptedSource::new(4, 2, 10);
        // Negotiation plus one good cycle, then the geometry shifts.
        source.grow_after = Some(2);
        let (sinks, _logs) = recording_sinks();

        let pipeline = CaptureLoop::new(
            Box::new(source),
            sinks,
            MirrorPolicy::default(),
            ShutdownToken::new(),
        );
        let result = pipeline.run();

        assert!(matches!(
            result,
            Err(PipelineError::Sink {
                source: SinkError::SizeMismatch { .. },
                ..
            })
        ));
    }

    #[test]
    fn shutdown_token_is_clonable_and_shared() {
        let token = ShutdownToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn shutdown_token_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ShutdownToken>();
    }
}
