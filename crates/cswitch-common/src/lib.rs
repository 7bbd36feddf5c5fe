use serde::{Deserialize, Serialize};

pub mod clock;
pub mod kind;

pub use clock::{Clock, ManualClock, SystemClock};
pub use kind::{ClientKind, UnknownClientKind};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 18100;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum GlobalConfigError {
    #[error("missing required global config field: {0}")]
    MissingField(&'static str),
    #[error("invalid global config field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Final, merged configuration used by the running process.
///
/// Merge order: CLI > ENV (clap resolves both) > built-in defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    /// Directory holding the provider files.
    pub data_dir: String,
    /// Database DSN used for this process.
    pub dsn: String,
    /// Optional outbound proxy (for upstream egress).
    pub proxy: Option<String>,
    /// Admin surface is disabled when unset.
    pub admin_key: Option<String>,
    pub sweep_interval_secs: u64,
}

impl GlobalConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Optional layer used for merging global config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub data_dir: Option<String>,
    pub dsn: Option<String>,
    pub proxy: Option<String>,
    pub admin_key: Option<String>,
    pub sweep_interval_secs: Option<u64>,
}

impl GlobalConfigPatch {
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.data_dir.is_some() {
            self.data_dir = other.data_dir;
        }
        if other.dsn.is_some() {
            self.dsn = other.dsn;
        }
        if other.proxy.is_some() {
            self.proxy = other.proxy;
        }
        if other.admin_key.is_some() {
            self.admin_key = other.admin_key;
        }
        if other.sweep_interval_secs.is_some() {
            self.sweep_interval_secs = other.sweep_interval_secs;
        }
    }

    pub fn into_config(self) -> Result<GlobalConfig, GlobalConfigError> {
        let sweep_interval_secs = self
            .sweep_interval_secs
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);
        if sweep_interval_secs == 0 {
            return Err(GlobalConfigError::InvalidField {
                field: "sweep_interval_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(GlobalConfig {
            host: self.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: self.port.unwrap_or(DEFAULT_PORT),
            data_dir: self
                .data_dir
                .filter(|dir| !dir.trim().is_empty())
                .ok_or(GlobalConfigError::MissingField("data_dir"))?,
            dsn: self
                .dsn
                .filter(|dsn| !dsn.trim().is_empty())
                .ok_or(GlobalConfigError::MissingField("dsn"))?,
            proxy: self.proxy.filter(|proxy| !proxy.trim().is_empty()),
            admin_key: self.admin_key.filter(|key| !key.trim().is_empty()),
            sweep_interval_secs,
        })
    }
}

impl From<GlobalConfig> for GlobalConfigPatch {
    fn from(value: GlobalConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            data_dir: Some(value.data_dir),
            dsn: Some(value.dsn),
            proxy: value.proxy,
            admin_key: value.admin_key,
            sweep_interval_secs: Some(value.sweep_interval_secs),
        }
    }
}
