use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct PostgresArgs {
    #[arg(long, env = "POSTGRES_HOST", default_value = "localhost")]
    pub postgres_host: String,

    #[arg(long, env = "POSTGRES_PORT", default_value_t = 5432)]
    pub postgres_port: u16,

    #[arg(long, env = "POSTGRES_DATABASE", default_value = "stark")]
    pub postgres_database: String,

    #[arg(long, env = "POSTGRES_USERNAME", default_value = "postgres")]
    pub postgres_username: String,

    #[arg(long, env = "POSTGRES_PASSWORD")]
    pub postgres_password: Option<String>,

    /// Path to a PEM bundle of extra CA certificates for TLS to the store.
    #[arg(long, env = "POSTGRES_CA_CERT_PATH")]
    pub postgres_ca_cert_path: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct AuthArgs {
    /// Auth collaborator endpoint used to verify bearer tokens.
    #[arg(long, env = "AUTH_ENDPOINT", required = true)]
    pub auth_endpoint: String,

    /// Seconds a verified principal stays cached before re-verification.
    #[arg(long, env = "AUTH_CACHE_SECS", default_value_t = 60)]
    pub auth_cache_secs: u64,
}

/// Heartbeat and convergence tuning. Defaults follow the control-plane
/// policy: unhealthy after 2x interval + 5s, offline after 4x interval + 10s.
#[derive(Parser, Debug, Clone)]
pub struct TimingArgs {
    #[arg(long, env = "HEARTBEAT_INTERVAL_SECS", default_value_t = 15)]
    pub heartbeat_interval_secs: u64,

    #[arg(long, env = "CONTROLLER_TICK_SECS", default_value_t = 10)]
    pub controller_tick_secs: u64,

    #[arg(long, env = "SCHEDULING_RETRY_SECS", default_value_t = 10)]
    pub scheduling_retry_secs: u64,

    #[arg(long, env = "CONNECTION_IDLE_SECS", default_value_t = 60)]
    pub connection_idle_secs: u64,

    /// How long a rolling update waits for the surge pod to report running.
    #[arg(long, env = "ROLLING_READY_WAIT_SECS", default_value_t = 120)]
    pub rolling_ready_wait_secs: u64,

    #[arg(long, env = "CRASH_LOOP_WINDOW_SECS", default_value_t = 120)]
    pub crash_loop_window_secs: u64,

    #[arg(long, env = "BACKOFF_MAX_SECS", default_value_t = 3600)]
    pub backoff_max_secs: u64,

    #[arg(long, env = "INGRESS_TIMEOUT_SECS", default_value_t = 30)]
    pub ingress_timeout_secs: u64,

    #[arg(long, env = "ROUTE_TIMEOUT_SECS", default_value_t = 10)]
    pub route_timeout_secs: u64,

    /// Per-connection ceiling on outstanding correlated requests.
    #[arg(long, env = "PENDING_REQUEST_CEILING", default_value_t = 64)]
    pub pending_request_ceiling: usize,

    /// Seconds of stable running after which a crash-loop counter clears.
    #[arg(long, env = "STABLE_RUNNING_SECS", default_value_t = 300)]
    pub stable_running_secs: u64,
}

impl TimingArgs {
    pub fn unhealthy_after_secs(&self) -> u64 {
        2 * self.heartbeat_interval_secs + 5
    }

    pub fn offline_after_secs(&self) -> u64 {
        4 * self.heartbeat_interval_secs + 10
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_thresholds_track_interval() {
        let t = TimingArgs::parse_from(["test"]);
        assert_eq!(t.heartbeat_interval_secs, 15);
        assert_eq!(t.unhealthy_after_secs(), 35);
        assert_eq!(t.offline_after_secs(), 70);
        let fast = TimingArgs::parse_from(["test", "--heartbeat-interval-secs", "5"]);
        assert_eq!(fast.unhealthy_after_secs(), 15);
        assert_eq!(fast.offline_after_secs(), 30);
    }
}
