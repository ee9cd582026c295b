use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use kvpool::PoolConfig;

/// Runtime configuration for the `kvpool-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file is loaded first), with defaults suitable for a single host.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "kvpool-server",
    version,
    about = "A TCP echo service backed by a round-robin worker pool"
)]
pub struct CliArgs {
    /// TCP address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("127.0.0.1:1978"))]
    pub server_addr: String,

    /// Number of worker threads in the pool.
    ///
    /// Each worker runs its own event loop on a dedicated OS thread. Defaults
    /// to the number of logical CPUs.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = num_cpus::get())]
    pub num_workers: usize,

    /// Upper bound, in milliseconds, on how long a worker that is busy when
    /// shutdown starts may keep draining the request queue.
    ///
    /// Environment variable: `DRAIN_TIMEOUT_MS`
    #[arg(long, env = "DRAIN_TIMEOUT_MS", default_value_t = 3_000)]
    pub drain_timeout_ms: u64,

    /// Period, in milliseconds, at which idle workers re-check the request
    /// queue on their own. `0` disables the sweep.
    ///
    /// Environment variable: `SWEEP_INTERVAL_MS`
    #[arg(long, env = "SWEEP_INTERVAL_MS", default_value_t = 100)]
    pub sweep_interval_ms: u64,

    /// Bytes reserved for each read from a connection. Every read becomes one
    /// request.
    ///
    /// Environment variable: `READ_BUFFER_SIZE`
    #[arg(long, env = "READ_BUFFER_SIZE", default_value_t = 4096)]
    pub read_buffer_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub server_addr: String,
    pub num_workers: usize,
    pub drain_timeout: Duration,
    pub sweep_interval: Option<Duration>,
    pub read_buffer_size: usize,
}

impl ServerConfig {
    /// Pool settings derived from this configuration.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new(self.num_workers)
            .with_drain_timeout(self.drain_timeout)
            .with_sweep_interval(self.sweep_interval)
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.num_workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }

        if args.drain_timeout_ms == 0 {
            bail!("DRAIN_TIMEOUT_MS must be greater than 0");
        }

        if args.read_buffer_size == 0 {
            bail!("READ_BUFFER_SIZE must be greater than 0");
        }

        let sweep_interval =
            (args.sweep_interval_ms > 0).then(|| Duration::from_millis(args.sweep_interval_ms));

        Ok(Self {
            server_addr: args.server_addr,
            num_workers: args.num_workers,
            drain_timeout: Duration::from_millis(args.drain_timeout_ms),
            sweep_interval,
            read_buffer_size: args.read_buffer_size,
        })
    }
}
