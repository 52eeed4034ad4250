//! ember.toml configuration parser.
//!
//! All knobs have working defaults; a config file only needs to name the
//! options it overrides. Durations are written as strings ("500ms", "10s",
//! "5m").

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

/// Runtime configuration for the scaler and daemon.
#[derive(Debug, Clone)]
pub struct ScalerConfig {
    /// Platform endpoint for slot creation/destruction.
    pub client_addr: String,
    /// How often the GC loop wakes up.
    pub gc_interval: Duration,
    /// Per-instance idle TTL before eviction.
    pub idle_duration_before_gc: Duration,
    /// EWMA smoothing factor for request cost time, in (0, 1).
    /// Higher values weight history more heavily.
    pub rct_rate: f64,
    /// How long an Assign call waits for an instance before giving up.
    pub assign_timeout: Duration,
    /// Address the daemon's API listens on.
    pub listen_addr: String,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            client_addr: "http://127.0.0.1:50051".to_string(),
            gc_interval: Duration::from_secs(10),
            idle_duration_before_gc: Duration::from_secs(5 * 60),
            rct_rate: 0.9,
            assign_timeout: Duration::from_secs(30),
            listen_addr: "0.0.0.0:9000".to_string(),
        }
    }
}

/// On-disk shape: every field optional, durations as strings.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    client_addr: Option<String>,
    gc_interval: Option<String>,
    idle_duration_before_gc: Option<String>,
    rct_rate: Option<f64>,
    assign_timeout: Option<String>,
    listen_addr: Option<String>,
}

impl ScalerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let raw: RawConfig = toml::from_str(content)?;
        let mut config = ScalerConfig::default();

        if let Some(addr) = raw.client_addr {
            config.client_addr = addr;
        }
        if let Some(s) = raw.gc_interval {
            config.gc_interval = parse_duration(&s)?;
        }
        if let Some(s) = raw.idle_duration_before_gc {
            config.idle_duration_before_gc = parse_duration(&s)?;
        }
        if let Some(rate) = raw.rct_rate {
            if !(0.0..1.0).contains(&rate) || rate == 0.0 {
                bail!("rct_rate must be in (0, 1), got {rate}");
            }
            config.rct_rate = rate;
        }
        if let Some(s) = raw.assign_timeout {
            config.assign_timeout = parse_duration(&s)?;
        }
        if let Some(addr) = raw.listen_addr {
            config.listen_addr = addr;
        }

        Ok(config)
    }
}

/// Parse a duration string like "500ms", "30s", "5m".
fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    let parsed = if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim().parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        None
    };
    match parsed {
        Some(d) => Ok(d),
        None => bail!("invalid duration {s:?} (expected e.g. \"500ms\", \"30s\", \"5m\")"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ScalerConfig::default();
        assert_eq!(config.gc_interval, Duration::from_secs(10));
        assert_eq!(config.idle_duration_before_gc, Duration::from_secs(300));
        assert!(config.rct_rate > 0.0 && config.rct_rate < 1.0);
    }

    #[test]
    fn parse_minimal_file() {
        let config = ScalerConfig::from_toml_str("").unwrap();
        assert_eq!(config.client_addr, "http://127.0.0.1:50051");
    }

    #[test]
    fn parse_overrides() {
        let toml_str = r#"
client_addr = "http://10.0.0.5:50051"
gc_interval = "50ms"
idle_duration_before_gc = "2m"
rct_rate = 0.8
"#;
        let config = ScalerConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.client_addr, "http://10.0.0.5:50051");
        assert_eq!(config.gc_interval, Duration::from_millis(50));
        assert_eq!(config.idle_duration_before_gc, Duration::from_secs(120));
        assert_eq!(config.rct_rate, 0.8);
        // Untouched options keep their defaults.
        assert_eq!(config.assign_timeout, Duration::from_secs(30));
    }

    #[test]
    fn rejects_out_of_range_rct_rate() {
        assert!(ScalerConfig::from_toml_str("rct_rate = 1.0").is_err());
        assert!(ScalerConfig::from_toml_str("rct_rate = 0.0").is_err());
        assert!(ScalerConfig::from_toml_str("rct_rate = -0.5").is_err());
    }

    #[test]
    fn rejects_malformed_duration() {
        assert!(ScalerConfig::from_toml_str(r#"gc_interval = "soon""#).is_err());
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert!(parse_duration("5h").is_err());
    }
}
