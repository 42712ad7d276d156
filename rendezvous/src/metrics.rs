//! Metric names emitted by the rendezvous service.

use metrics::{Unit, describe_counter, describe_gauge};

/// Label for the error kind in metrics.
pub const ERROR_KIND_LABEL: &str = "error_kind";

// Connection metrics

/// Counter for accepted TCP connections.
pub const RENDEZVOUS_CONNECTIONS_ACCEPTED_TOTAL: &str = "rendezvous_connections_accepted_total";

/// Counter for connections rejected during the handshake.
pub const RENDEZVOUS_AUTHENTICATION_FAILURES_TOTAL: &str =
    "rendezvous_authentication_failures_total";

/// Counter for connections that ended with an error, labeled by error kind.
pub const RENDEZVOUS_CONNECTION_ERRORS_TOTAL: &str = "rendezvous_connection_errors_total";

// Barrier metrics

/// Counter for barriers created by the registry.
pub const RENDEZVOUS_BARRIERS_CREATED_TOTAL: &str = "rendezvous_barriers_created_total";

/// Counter for released barrier generations.
pub const RENDEZVOUS_BARRIER_RELEASES_TOTAL: &str = "rendezvous_barrier_releases_total";

/// Counter for broken barrier generations.
pub const RENDEZVOUS_BARRIER_BREAKS_TOTAL: &str = "rendezvous_barrier_breaks_total";

/// Gauge for parties currently blocked across all barriers.
pub const RENDEZVOUS_PARTIES_WAITING: &str = "rendezvous_parties_waiting";

/// Registers descriptions for every metric the service emits.
pub fn register_metrics() {
    describe_counter!(
        RENDEZVOUS_CONNECTIONS_ACCEPTED_TOTAL,
        Unit::Count,
        "Total number of accepted client connections"
    );
    describe_counter!(
        RENDEZVOUS_AUTHENTICATION_FAILURES_TOTAL,
        Unit::Count,
        "Total number of connections rejected because of a bad or missing shared secret"
    );
    describe_counter!(
        RENDEZVOUS_CONNECTION_ERRORS_TOTAL,
        Unit::Count,
        "Total number of connections that ended with an error, labeled by error_kind"
    );
    describe_counter!(
        RENDEZVOUS_BARRIERS_CREATED_TOTAL,
        Unit::Count,
        "Total number of barriers created"
    );
    describe_counter!(
        RENDEZVOUS_BARRIER_RELEASES_TOTAL,
        Unit::Count,
        "Total number of barrier generations released"
    );
    describe_counter!(
        RENDEZVOUS_BARRIER_BREAKS_TOTAL,
        Unit::Count,
        "Total number of barrier generations broken by timeout, abort, reset or abandonment"
    );
    describe_gauge!(
        RENDEZVOUS_PARTIES_WAITING,
        Unit::Count,
        "Number of parties currently blocked in a barrier wait"
    );
}
