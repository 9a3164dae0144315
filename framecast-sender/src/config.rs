//! Configuration for the sender service.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use framecast_core::{FrameError, PipelineConfig, UdpSenderConfig};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Where frames go.
    pub network: NetworkConfig,
    /// Synthetic source settings.
    pub source: SourceConfig,
    /// Pipeline behaviour.
    pub pipeline: PipelineConfig,
    /// Software device tuning.
    pub device: DeviceConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Receiver address.
    pub remote: SocketAddr,
    /// Local bind address.
    pub bind: SocketAddr,
    /// Largest datagram emitted.
    pub mtu: usize,
    /// Compress payloads with zstd.
    pub compress: bool,
    /// zstd level used when `compress` is set.
    pub compression_level: i32,
}

/// Synthetic source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Source width in pixels.
    pub width: u32,
    /// Source height in pixels.
    pub height: u32,
    /// Ticks per second.
    pub fps: u32,
}

/// Software device tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Simulated readback latency in milliseconds.
    pub latency_ms: u64,
    /// Fail every n-th readback (0 = never).
    pub fault_interval: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        let udp = UdpSenderConfig::default();
        Self {
            remote: udp.remote,
            bind: udp.bind,
            mtu: udp.mtu,
            compress: false,
            compression_level: 3,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 60,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            latency_ms: 8,
            fault_interval: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl SenderConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Reject values the service cannot run with.
    pub fn validate(&self) -> Result<(), FrameError> {
        if self.source.width < 2 || self.source.height == 0 {
            return Err(FrameError::InvalidConfig("source must be at least 2x1"));
        }
        if self.source.fps == 0 {
            return Err(FrameError::InvalidConfig("source fps must be > 0"));
        }
        self.pipeline.validate()?;
        self.to_sender_config().validate()
    }

    /// UDP sender settings. The advertised rate follows the source fps.
    pub fn to_sender_config(&self) -> UdpSenderConfig {
        UdpSenderConfig {
            remote: self.network.remote,
            bind: self.network.bind,
            mtu: self.network.mtu,
            frame_rate_n: self.source.fps.clamp(1, 240),
            frame_rate_d: 1,
            compression_level: self
                .network
                .compress
                .then_some(self.network.compression_level),
        }
    }

    /// Time between ticks.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.source.fps.clamp(1, 240)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use framecast_core::{ExecutionMode, PixelFormat};

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&SenderConfig::default()).unwrap();
        assert!(text.contains("[network]"));
        assert!(text.contains("[pipeline]"));
        assert!(text.contains("max_queue_depth"));
    }

    #[test]
    fn roundtrip_config() {
        let text = toml::to_string_pretty(&SenderConfig::default()).unwrap();
        let parsed: SenderConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.source.fps, 60);
        assert_eq!(parsed.pipeline.format, PixelFormat::Uyva);
        assert_eq!(parsed.network.mtu, 1400);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg: SenderConfig = toml::from_str(
            r#"
            [network]
            remote = "192.168.1.20:5960"
            compress = true

            [pipeline]
            name = "Booth"
            mode = "discrete"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.pipeline.name, "Booth");
        assert_eq!(cfg.pipeline.mode, ExecutionMode::Discrete);
        assert_eq!(cfg.pipeline.max_queue_depth, 4);
        assert_eq!(cfg.source.width, 1280);

        let udp = cfg.to_sender_config();
        assert_eq!(udp.remote.port(), 5960);
        assert_eq!(udp.compression_level, Some(3));
        assert_eq!((udp.frame_rate_n, udp.frame_rate_d), (60, 1));
    }

    #[test]
    fn validate_rejects_bad_source() {
        let mut cfg = SenderConfig::default();
        cfg.source.fps = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = SenderConfig::default();
        cfg.source.width = 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn tick_interval_follows_fps() {
        let mut cfg = SenderConfig::default();
        cfg.source.fps = 50;
        assert_eq!(cfg.tick_interval(), Duration::from_millis(20));
    }

    #[test]
    fn written_default_loads_back() {
        let path = std::env::temp_dir().join(format!(
            "framecast-sender-{}.toml",
            std::process::id()
        ));
        SenderConfig::write_default(&path).unwrap();
        let cfg = SenderConfig::load(&path);
        std::fs::remove_file(&path).ok();
        assert_eq!(cfg.source.fps, 60);
        assert_eq!(cfg.network.mtu, 1400);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = SenderConfig::load(Path::new("/nonexistent/framecast-sender.toml"));
        assert_eq!(cfg.pipeline.name, "framecast");
    }
}
