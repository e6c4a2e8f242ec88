use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

pub const DEFAULT_MAP_PATH: &str = "/sys/fs/bpf/container_deps";

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Subcommand, Debug)]
pub enum Commands {
    /// Run the agent
    Agent(AgentArgs),

    /// Print every record of the pinned container policy map
    Dump(DumpArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct AgentArgs {
    /// Pin path of the container policy map
    #[arg(long, env = "BPF_MAP_PATH", default_value = DEFAULT_MAP_PATH)]
    pub bpf_map_path: PathBuf,

    /// Agent socket path
    #[arg(
        long,
        env = "AGENT_SOCKET_PATH",
        default_value = netguard_api::DEFAULT_SOCKET_PATH
    )]
    pub socket_path: PathBuf,

    /// Metrics listener for agent
    #[arg(long, default_value = "0.0.0.0:9090")]
    pub metrics_address: SocketAddr,

    /// Name of the node the agent is running on. Pods are only watched on
    /// this node when set.
    #[arg(long, env = "NODE_NAME")]
    pub node_name: Option<String>,

    /// Seconds between full reconciliations
    #[arg(long, default_value_t = 60)]
    pub reconcile_interval_secs: u64,

    /// First delay before a watch reconnect
    #[arg(long, default_value_t = 1000)]
    pub backoff_initial_ms: u64,

    /// Upper bound for the watch reconnect delay
    #[arg(long, default_value_t = 30_000)]
    pub backoff_max_ms: u64,

    /// Attempts to open the pinned map at startup
    #[arg(long, default_value_t = 5)]
    pub map_wait_attempts: u32,

    /// Pod label key selecting restricted containers
    #[arg(long, default_value = "network.policy")]
    pub policy_label_key: String,

    /// Pod label value selecting restricted containers
    #[arg(long, default_value = "restricted")]
    pub policy_label_value: String,
}

impl AgentArgs {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

#[derive(Parser, Debug, Clone)]
pub struct DumpArgs {
    /// Pin path of the container policy map
    #[arg(long, env = "BPF_MAP_PATH", default_value = DEFAULT_MAP_PATH)]
    pub bpf_map_path: PathBuf,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_agent_defaults() {
        let cli = Cli::try_parse_from(["netguard-agent", "agent"]).expect("defaults parse");
        let Commands::Agent(args) = cli.command else {
            panic!("expected agent subcommand");
        };
        assert_eq!(args.bpf_map_path, PathBuf::from(DEFAULT_MAP_PATH));
        assert_eq!(args.socket_path, PathBuf::from("/var/run/cni/daemon.sock"));
        assert_eq!(args.reconcile_interval(), Duration::from_secs(60));
        assert_eq!(args.backoff_initial(), Duration::from_secs(1));
        assert_eq!(args.backoff_max(), Duration::from_secs(30));
        assert_eq!(args.policy_label_key, "network.policy");
        assert_eq!(args.policy_label_value, "restricted");
    }

    #[test]
    fn test_dump_path() {
        let cli = Cli::try_parse_from(["netguard-agent", "dump", "--bpf-map-path", "/tmp/m"])
            .expect("dump parses");
        let Commands::Dump(args) = cli.command else {
            panic!("expected dump subcommand");
        };
        assert_eq!(args.bpf_map_path, PathBuf::from("/tmp/m"));
    }
}
