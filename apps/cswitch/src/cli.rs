use clap::Parser;

use cswitch_common::{DEFAULT_HOST, DEFAULT_PORT, DEFAULT_SWEEP_INTERVAL_SECS, GlobalConfigPatch};

#[derive(Parser)]
#[command(name = "cswitch", about = "Local relay for AI coding CLIs with provider failover")]
pub(crate) struct Cli {
    #[arg(long, env = "CSWITCH_HOST", default_value = DEFAULT_HOST)]
    pub(crate) host: String,
    #[arg(long, env = "CSWITCH_PORT", default_value_t = DEFAULT_PORT)]
    pub(crate) port: u16,
    /// Directory holding the provider files. Defaults to ~/.code-switch.
    #[arg(long, env = "CSWITCH_DATA_DIR")]
    pub(crate) data_dir: Option<String>,
    /// Database DSN. Defaults to a SQLite file inside the data dir.
    #[arg(long, env = "CSWITCH_DSN")]
    pub(crate) dsn: Option<String>,
    /// Outbound proxy for upstream requests.
    #[arg(long, env = "CSWITCH_PROXY")]
    pub(crate) proxy: Option<String>,
    /// Enables the /admin surface.
    #[arg(long, env = "CSWITCH_ADMIN_KEY")]
    pub(crate) admin_key: Option<String>,
    #[arg(long, env = "CSWITCH_SWEEP_INTERVAL_SECS", default_value_t = DEFAULT_SWEEP_INTERVAL_SECS)]
    pub(crate) sweep_interval_secs: u64,
}

impl Cli {
    pub(crate) fn into_patch(self, data_dir: String, dsn: String) -> GlobalConfigPatch {
        GlobalConfigPatch {
            host: Some(self.host),
            port: Some(self.port),
            data_dir: Some(data_dir),
            dsn: Some(dsn),
            proxy: self.proxy,
            admin_key: self.admin_key,
            sweep_interval_secs: Some(self.sweep_interval_secs),
        }
    }
}
