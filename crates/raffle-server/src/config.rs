use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use raffle_chain::VerifierConfig;
use raffle_guard::GuardConfig;
use raffle_ledger::DrawPolicy;
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

/// Complete service configuration, one TOML table per concern.
///
/// Every table has defaults, so an empty file is valid.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub verifier: VerifierConfig,
    pub limits: GuardConfig,
    pub draw: DrawPolicy,
    pub sweep: SweepConfig,
    pub store: StoreConfig,
}

impl AppConfig {
    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> ServerResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> ServerResult<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml(&self) -> ServerResult<String> {
        toml::to_string_pretty(self).map_err(|e| ServerError::Config(e.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Take the client IP from `X-Forwarded-For`. Enable only behind a
    /// proxy that sets it.
    pub trust_forwarded_for: bool,
    /// Bearer token for admin endpoints. Admin endpoints refuse everyone
    /// when unset.
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            trust_forwarded_for: false,
            admin_token: None,
        }
    }
}

/// Where raffles and entries are kept.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Process memory; everything is lost on restart.
    #[default]
    Memory,
    /// A Postgres database, migrated on connect.
    Postgres {
        url: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

fn default_max_connections() -> u32 {
    10
}

/// Background re-verification of pending claims.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Entries examined per pass.
    pub batch_size: usize,
    /// Reject claims still pending this long after the proof was
    /// attached. Never shorter than the verifier's transaction age limit.
    /// Never abandons when unset.
    pub abandon_after_secs: Option<u64>,
}

impl SweepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn abandon_after(&self) -> Option<chrono::Duration> {
        self.abandon_after_secs
            .and_then(|s| i64::try_from(s).ok())
            .and_then(chrono::Duration::try_seconds)
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            batch_size: 50,
            abandon_after_secs: Some(2 * 60 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raffle_guard::GuardBackend;
    use std::io::Write;

    #[test]
    fn default_config() {
        let c = AppConfig::default();
        assert_eq!(c.server.bind_addr, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert!(!c.server.trust_forwarded_for);
        assert!(c.server.admin_token.is_none());
        assert_eq!(c.verifier.max_retries, 2);
        assert_eq!(c.limits.backend, GuardBackend::Memory);
        assert_eq!(c.draw.waiting_period_secs, 24 * 60 * 60);
        assert!(c.sweep.enabled);
        assert_eq!(c.store, StoreConfig::Memory);
    }

    #[test]
    fn postgres_store_selected_by_kind() {
        let c = AppConfig::from_toml(
            r#"
            [store]
            kind = "postgres"
            url = "postgres://raffle@localhost/raffle"
            "#,
        )
        .unwrap();
        assert_eq!(
            c.store,
            StoreConfig::Postgres {
                url: "postgres://raffle@localhost/raffle".into(),
                max_connections: 10,
            }
        );
    }

    #[test]
    fn empty_file_is_valid() {
        assert_eq!(AppConfig::from_toml("").unwrap(), AppConfig::default());
    }

    #[test]
    fn partial_tables_keep_defaults() {
        let c = AppConfig::from_toml(
            r#"
            [server]
            admin_token = "s3cret"

            [verifier]
            rpc_url = "https://api.devnet.solana.com"
            treasury_wallet = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM"

            [limits.backend]
            kind = "redis"
            url = "redis://127.0.0.1/"

            [draw]
            max_extensions = 3
            "#,
        )
        .unwrap();
        assert_eq!(c.server.admin_token.as_deref(), Some("s3cret"));
        assert_eq!(c.server.bind_addr, ServerConfig::default().bind_addr);
        assert_eq!(c.verifier.max_retries, 2);
        assert!(matches!(c.limits.backend, GuardBackend::Redis { .. }));
        assert_eq!(c.draw.max_extensions, Some(3));
        assert_eq!(c.sweep, SweepConfig::default());
    }

    #[test]
    fn defaults_round_trip_through_toml() {
        let text = AppConfig::default().to_toml().unwrap();
        assert_eq!(AppConfig::from_toml(&text).unwrap(), AppConfig::default());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sweep]\nenabled = false\ninterval_secs = 5").unwrap();
        let c = AppConfig::load(file.path()).unwrap();
        assert!(!c.sweep.enabled);
        assert_eq!(c.sweep.interval(), Duration::from_secs(5));
    }

    #[test]
    fn unknown_file_is_io_error() {
        let err = AppConfig::load(Path::new("/nonexistent/raffle.toml")).unwrap_err();
        assert!(matches!(err, ServerError::Io(_)));
    }
}
