// ABOUTME: Command-line configuration surface, parsed with argh
// ABOUTME: Flags are the only configuration layer; there is no config file or environment-variable fallback

use std::time::Duration;

use argh::FromArgs;

/// A cluster-aware RESP proxy that routes requests by key slot.
#[derive(FromArgs)]
struct CliArgs {
    /// address to listen on for clients (default: 127.0.0.1:7011)
    #[argh(option)]
    listen: Option<String>,

    /// address of one node in the cluster to bootstrap discovery from
    #[argh(option)]
    bootstrap: String,

    /// number of idle connections to keep per backend address (default: 4)
    #[argh(option)]
    pool_size: Option<usize>,

    /// seconds between backend keep-alive sweeps (default: 5)
    #[argh(option)]
    refresh_interval: Option<u64>,

    /// per-read deadline on any framer, in milliseconds (default: 10)
    #[argh(option)]
    read_timeout_ms: Option<u64>,

    /// per-write deadline on any framer, in milliseconds (default: 10)
    #[argh(option)]
    write_timeout_ms: Option<u64>,

    /// enable debug-level logging
    #[argh(switch, short = 'd')]
    debug: bool,
}

pub struct Config {
    pub listen: String,
    pub bootstrap: String,
    pub pool_size: usize,
    pub refresh_interval: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub debug: bool,
}

impl Config {
    const DEFAULT_LISTEN: &'static str = "127.0.0.1:7011";
    const DEFAULT_POOL_SIZE: usize = 4;
    const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 5;
    const DEFAULT_TIMEOUT_MS: u64 = 10;

    /// Parses the process's command-line arguments.
    pub fn load() -> Self {
        let args: CliArgs = argh::from_env();
        Self::from_args(args)
    }

    fn from_args(args: CliArgs) -> Self {
        Self {
            listen: args.listen.unwrap_or_else(|| Self::DEFAULT_LISTEN.to_string()),
            bootstrap: args.bootstrap,
            pool_size: args.pool_size.unwrap_or(Self::DEFAULT_POOL_SIZE),
            refresh_interval: Duration::from_secs(
                args.refresh_interval.unwrap_or(Self::DEFAULT_REFRESH_INTERVAL_SECS),
            ),
            read_timeout: Duration::from_millis(
                args.read_timeout_ms.unwrap_or(Self::DEFAULT_TIMEOUT_MS),
            ),
            write_timeout: Duration::from_millis(
                args.write_timeout_ms.unwrap_or(Self::DEFAULT_TIMEOUT_MS),
            ),
            debug: args.debug,
        }
    }
}
