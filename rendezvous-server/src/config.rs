use clap::{Parser, ValueEnum};
use rendezvous_config::shared::{AbandonPolicy, ServerConfig};
use rendezvous_config::{ConfigOverrides, load_config};

use crate::error::{ServerError, ServerResult};

/// Command line of the rendezvous server.
///
/// Every flag can also be given as an `APP_` prefixed environment variable
/// (in milliseconds for the timeouts, e.g. `APP_WAIT_TIMEOUT_MS`); flags win.
#[derive(Debug, Parser)]
#[command(name = "rendezvous-server", version, about)]
pub struct ServerArgs {
    /// Address to bind (default: 0.0.0.0)
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on, 0 for an ephemeral port (default: 50000)
    #[arg(long, short = 'p')]
    port: Option<u16>,
    /// Number of parties every barrier waits for
    #[arg(long)]
    nprocs: Option<usize>,
    /// Timeout applied to waits that do not carry their own (default: none)
    #[arg(long)]
    wait_timeout_secs: Option<u64>,
    /// What happens when a waiting worker disconnects (default: break)
    #[arg(long, value_enum)]
    abandon_policy: Option<AbandonPolicyArg>,
    /// Time a new connection has to authenticate (default: 10)
    #[arg(long)]
    handshake_timeout_secs: Option<u64>,
    /// Port for the Prometheus metrics endpoint (default: disabled)
    #[arg(long)]
    metrics_port: Option<u16>,
}

/// Command line values of [`AbandonPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum AbandonPolicyArg {
    /// Break the barrier for the remaining workers
    Break,
    /// Withdraw the worker's arrival
    Withdraw,
}

impl From<AbandonPolicyArg> for AbandonPolicy {
    fn from(value: AbandonPolicyArg) -> Self {
        match value {
            AbandonPolicyArg::Break => AbandonPolicy::Break,
            AbandonPolicyArg::Withdraw => AbandonPolicy::Withdraw,
        }
    }
}

impl ServerArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides::new()
            .set_option("host", self.host.clone())
            .set_option("port", self.port.map(u64::from))
            .set_option("nprocs", self.nprocs.map(|nprocs| nprocs as u64))
            .set_option(
                "wait_timeout_ms",
                self.wait_timeout_secs.map(|secs| secs.saturating_mul(1000)),
            )
            .set_option(
                "abandon_policy",
                self.abandon_policy
                    .map(|policy| AbandonPolicy::from(policy).as_str()),
            )
            .set_option(
                "handshake_timeout_ms",
                self.handshake_timeout_secs
                    .map(|secs| secs.saturating_mul(1000)),
            )
            .set_option("metrics_port", self.metrics_port.map(u64::from))
    }
}

/// Loads and validates the server configuration.
///
/// Environment variables are read through [`rendezvous_config::load_config`]
/// and the command line flags in `args` are applied on top of them.
pub fn load_server_config(args: &ServerArgs) -> ServerResult<ServerConfig> {
    let config = load_config::<ServerConfig>(args.overrides()).map_err(ServerError::config)?;
    config.validate().map_err(ServerError::config)?;

    Ok(config)
}
