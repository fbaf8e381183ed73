//! Environment-driven configuration.
//!
//! There are no command-line flags; every knob has a default matching the
//! classic three-device loopback layout and can be overridden through
//! `K2VCAM_*` variables.

use std::path::PathBuf;

use crate::source::dummy::DummySourceConfig;
use crate::source::frame::StreamKind;
use crate::transcode::MirrorPolicy;

/// Default bounded retry budget for short sink writes.
pub const DEFAULT_WRITE_RETRIES: u32 = 3;

/// Runtime configuration for the bridge.
#[derive(Debug, Clone)]
pub struct Config {
    /// Loopback output device for the color stream.
    pub color_device: PathBuf,
    /// Loopback output device for the infrared stream.
    pub infrared_device: PathBuf,
    /// Loopback output device for the depth stream.
    pub depth_device: PathBuf,
    /// Per-stream horizontal mirror flags.
    pub mirror: MirrorPolicy,
    /// Retry budget for short sink writes before escalating to a failure.
    pub write_retries: u32,
    /// Use the simulated capture source instead of hardware.
    pub dummy: bool,
    /// Geometry and pacing for the simulated source.
    pub dummy_source: DummySourceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            color_device: PathBuf::from("/dev/video0"),
            infrared_device: PathBuf::from("/dev/video1"),
            depth_device: PathBuf::from("/dev/video2"),
            mirror: MirrorPolicy::default(),
            write_retries: DEFAULT_WRITE_RETRIES,
            dummy: false,
            dummy_source: DummySourceConfig::default(),
        }
    }
}

impl Config {
    /// Build a configuration from the environment, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            color_device: env_path("K2VCAM_COLOR_DEVICE", defaults.color_device),
            infrared_device: env_path("K2VCAM_IR_DEVICE", defaults.infrared_device),
            depth_device: env_path("K2VCAM_DEPTH_DEVICE", defaults.depth_device),
            mirror: MirrorPolicy {
                color: env_bool("K2VCAM_MIRROR_COLOR", defaults.mirror.color),
                infrared: env_bool("K2VCAM_MIRROR_IR", defaults.mirror.infrared),
                depth: env_bool("K2VCAM_MIRROR_DEPTH", defaults.mirror.depth),
            },
            write_retries: env_parse("K2VCAM_WRITE_RETRIES", defaults.write_retries),
            dummy: env_bool("K2VCAM_DUMMY", false),
            dummy_source: DummySourceConfig {
                fps: env_parse("K2VCAM_DUMMY_FPS", defaults.dummy_source.fps),
                ..defaults.dummy_source
            },
        }
    }

    /// The output device path for a given stream.
    pub fn device_for(&self, kind: StreamKind) -> &PathBuf {
        match kind {
            StreamKind::Color => &self.color_device,
            StreamKind::Infrared => &self.infrared_device,
            StreamKind::Depth => &self.depth_device,
        }
    }
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => v == "1" || v.eq_ignore_ascii_case("true"),
        Err(_) => default,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
