use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tracing::info;

/// Installs the global metrics recorder and serves it on `[::]:<port>/metrics`.
///
/// When `port` is `None` no recorder is installed and every metric emitted by
/// the service is a no-op.
pub fn init_metrics(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else {
        info!("metrics exporter disabled");
        return Ok(());
    };

    let address = SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port);
    PrometheusBuilder::new()
        .with_http_listener(address)
        .install()?;

    info!(%address, "metrics exporter listening");

    Ok(())
}
