use clap::{Parser, Subcommand};
use stark_common::args::{AuthArgs, PostgresArgs, TimingArgs};

#[derive(Parser, Debug)]
#[command(name = "stark-orchestrator")]
#[command(about = "Control plane for the Stark pod orchestrator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the control plane server
    Server(ServerArgs),

    /// Check control API health
    Health(HealthArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct ServerArgs {
    /// Port for the control API and the agent channel
    #[arg(long, env = "PORT", default_value_t = 4780)]
    pub port: u16,

    /// Interface to bind listeners on
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0")]
    pub bind_addr: String,

    #[clap(flatten)]
    pub postgres: PostgresArgs,

    #[clap(flatten)]
    pub auth: AuthArgs,

    #[clap(flatten)]
    pub timing: TimingArgs,

    /// Event bus channel capacity
    #[arg(long, env = "EVENT_BUS_CAPACITY", default_value_t = 4096)]
    pub event_bus_capacity: usize,

    /// Priority above which a pod may preempt lower-priority pods
    #[arg(long, env = "PREEMPT_THRESHOLD", default_value_t = 500)]
    pub preempt_threshold: i32,

    /// Seconds the shutdown drain waits before forcing cancellation
    #[arg(long, env = "SHUTDOWN_DRAIN_SECS", default_value_t = 20)]
    pub shutdown_drain_secs: u64,
}

#[derive(Parser, Debug, Clone)]
pub struct HealthArgs {
    /// Control API endpoint
    #[arg(long, env = "STARK_ENDPOINT", default_value = "http://127.0.0.1:4780")]
    pub endpoint: String,
}
