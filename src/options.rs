//! Command line and environment options.
//!
//! Every flag also reads an environment variable so the Deployment manifest
//! can configure the operator without overriding its arguments.

use std::time::Duration;

use clap::Parser;
use jiff::SignedDuration;

use crate::manager::Settings;
use crate::manager::config::{
    DEFAULT_METRICS_HOST, DEFAULT_METRICS_PORT, DEFAULT_OPERATOR_METRICS_PORT,
};

/// Controller manager for the GitOpsCluster resource
#[derive(Parser, Debug, Clone)]
#[command(name = "gitopscluster-operator", version, about, long_about = None)]
pub struct Options {
    /// Host serving metrics and probes
    #[arg(long, env = "METRICS_HOST", default_value = DEFAULT_METRICS_HOST)]
    pub metrics_host: String,

    /// Port serving /metrics
    #[arg(long, env = "METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Port serving /healthz and /readyz
    #[arg(long, env = "OPERATOR_METRICS_PORT", default_value_t = DEFAULT_OPERATOR_METRICS_PORT)]
    pub operator_metrics_port: u16,

    /// How long non-leaders wait before trying to take an unrenewed lease
    #[arg(
        long,
        env = "LEADER_ELECTION_LEASE_DURATION",
        default_value = "137s",
        value_parser = parse_duration
    )]
    pub leader_election_lease_duration: Duration,

    /// How long the leader keeps retrying a renewal before giving up
    #[arg(
        long,
        env = "LEADER_ELECTION_RENEW_DEADLINE",
        default_value = "107s",
        value_parser = parse_duration
    )]
    pub leader_election_renew_deadline: Duration,

    /// Interval between leader election attempts
    #[arg(
        long,
        env = "LEADER_ELECTION_RETRY_PERIOD",
        default_value = "26s",
        value_parser = parse_duration
    )]
    pub leader_election_retry_period: Duration,
}

impl Options {
    pub fn into_settings(self) -> Settings {
        Settings {
            metrics_host: self.metrics_host,
            metrics_port: self.metrics_port,
            operator_metrics_port: self.operator_metrics_port,
            lease_duration: self.leader_election_lease_duration,
            renew_deadline: self.leader_election_renew_deadline,
            retry_period: self.leader_election_retry_period,
        }
    }
}

/// Parse `137s`, `2m 17s` or an ISO 8601 duration such as `PT137S`.
fn parse_duration(value: &str) -> Result<Duration, String> {
    let signed: SignedDuration = value
        .parse()
        .map_err(|e| format!("invalid duration {value:?}: {e}"))?;
    Duration::try_from(signed).map_err(|_| format!("duration {value:?} must not be negative"))
}
