//! Caster configuration: every key recognized by the core (spec §6),
//! loaded through a layered `config`-crate source stack — TOML file, then
//! `NTRIP_CASTER__`-prefixed environment variables, then CLI flags — the
//! way the teacher's `NtripConfig`/`NtripCredentials` already layer
//! `clap(env = ...)` fallbacks onto explicit flags, generalized here to the
//! full caster surface (SPEC_FULL.md §10.2).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::sourcetable::CasterDefaults;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::Parser))]
pub struct Cli {
    /// Path to a TOML configuration file.
    #[cfg_attr(
        feature = "clap",
        clap(long = "config", env = "NTRIP_CASTER_CONFIG", default_value = "ntrip-caster.toml")
    )]
    pub config: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NtripSection {
    pub port: u16,
    pub max_connections_per_user: u32,
    pub connection_timeout: u64,
}

impl Default for NtripSection {
    fn default() -> Self {
        NtripSection { port: 2101, max_connections_per_user: 3, connection_timeout: 1800 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkSection {
    pub host: String,
    pub max_connections: u32,
    pub buffer_size: usize,
    pub max_buffer_size: usize,
}

impl Default for NetworkSection {
    fn default() -> Self {
        NetworkSection {
            host: "0.0.0.0".to_string(),
            max_connections: 5000,
            buffer_size: 81_920,
            max_buffer_size: 655_360,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TcpSection {
    pub keepalive_enabled: bool,
    pub keepalive_idle: u64,
    pub keepalive_interval: u64,
    pub keepalive_count: u32,
    pub socket_timeout: u64,
}

impl Default for TcpSection {
    fn default() -> Self {
        TcpSection {
            keepalive_enabled: true,
            keepalive_idle: 60,
            keepalive_interval: 10,
            keepalive_count: 3,
            socket_timeout: 120,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataForwardingSection {
    pub ring_buffer_size: usize,
    pub broadcast_interval: f64,
    pub data_send_timeout: u64,
}

impl Default for DataForwardingSection {
    fn default() -> Self {
        DataForwardingSection {
            ring_buffer_size: 60,
            broadcast_interval: 0.01,
            data_send_timeout: 5,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RtcmSection {
    pub parse_duration: u64,
    pub parse_interval: u64,
}

impl Default for RtcmSection {
    fn default() -> Self {
        RtcmSection { parse_duration: 30, parse_interval: 5 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CasterSection {
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Default for CasterSection {
    fn default() -> Self {
        CasterSection { country: "CHN".to_string(), latitude: 0.0, longitude: 0.0 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppSection {
    pub name: String,
    pub author: String,
    pub website: String,
    pub contact: String,
}

impl Default for AppSection {
    fn default() -> Self {
        AppSection {
            name: "ntrip-caster".to_string(),
            author: "2RTK".to_string(),
            website: "https://example.com".to_string(),
            contact: "ops@example.com".to_string(),
        }
    }
}

/// The caster's full configuration surface (spec §6 "Configuration keys").
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub ntrip: NtripSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub tcp: TcpSection,
    #[serde(default)]
    pub data_forwarding: DataForwardingSection,
    #[serde(default)]
    pub rtcm: RtcmSection,
    #[serde(default)]
    pub caster: CasterSection,
    #[serde(default)]
    pub app: AppSection,
}

impl AppConfig {
    /// Load layered config: defaults, then an optional TOML file, then
    /// `NTRIP_CASTER__SECTION__KEY`-style environment overrides.
    pub fn load(path: &std::path::Path) -> Result<AppConfig, config::ConfigError> {
        let defaults = AppConfig::default();
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&defaults)?)
            .add_source(config::File::from(path).required(false))
            .add_source(config::Environment::with_prefix("NTRIP_CASTER").separator("__"));
        builder.build()?.try_deserialize()
    }

    /// Project the subset of config relevant to source-table generation
    /// (spec §4.6).
    pub fn caster_defaults(&self, host: &str) -> CasterDefaults {
        CasterDefaults {
            operator: self.app.author.clone(),
            network: self.app.author.clone(),
            generator: format!("{}_NtripCaster", self.app.author),
            country: self.caster.country.clone(),
            latitude: self.caster.latitude,
            longitude: self.caster.longitude,
            host: host.to_string(),
            port: self.ntrip.port,
            website: self.app.website.clone(),
            contact: self.app.contact.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_keys() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.ntrip.port, 2101);
        assert_eq!(cfg.network.host, "0.0.0.0");
        assert_eq!(cfg.network.max_connections, 5000);
        assert_eq!(cfg.ntrip.max_connections_per_user, 3);
        assert_eq!(cfg.tcp.keepalive_idle, 60);
        assert_eq!(cfg.data_forwarding.ring_buffer_size, 60);
        assert_eq!(cfg.rtcm.parse_duration, 30);
    }
}
