use anyhow::bail;
use clap::{Parser, ValueEnum};
use shopfloor::{DEFAULT_INBOX_CAPACITY, JoinPolicy, PoolConfig};

/// Upper bound on the demo input length, to keep a typo from allocating the
/// machine away.
pub const MAX_LENGTH: usize = 100_000_000;

/// Which execution unit hosts each worker.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// A tokio task on the shared runtime.
    Task,
    /// A dedicated OS thread per worker.
    Thread,
}

/// The per-element transformation the workers apply.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Double,
    Square,
}

impl Transform {
    pub const fn method(self) -> &'static str {
        match self {
            Self::Double => "double",
            Self::Square => "square",
        }
    }
}

/// Runtime configuration for the `shopfloor` binary.
///
/// The binary shards `1..=LENGTH` across a worker pool, transforms every
/// element, reassembles the array in order and sums it in a second round.
/// All values are parsed from CLI arguments or environment variables.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "shopfloor",
    version,
    about = "Run a sharded transform-and-sum pipeline on a worker pool"
)]
pub struct CliArgs {
    /// Number of workers in the pool. Defaults to the number of logical CPUs.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = num_cpus::get())]
    pub num_workers: usize,

    /// Length of the generated input array.
    ///
    /// Environment variable: `LENGTH`
    #[arg(long, env = "LENGTH", default_value_t = 1_000)]
    pub length: usize,

    /// Number of parts to split the input into. Defaults to the pool size.
    ///
    /// More parts than workers only makes sense together with `--recycle`,
    /// which keeps sweeping the pool until every part has been sent.
    ///
    /// Environment variable: `CHUNKS`
    #[arg(long, env = "CHUNKS")]
    pub chunks: Option<usize>,

    /// Transformation applied to every element.
    ///
    /// Environment variable: `TRANSFORM`
    #[arg(long, env = "TRANSFORM", value_enum, default_value_t = Transform::Double)]
    pub transform: Transform,

    /// Keep dispatching parts in further cycles while any remain.
    #[arg(long, default_value_t = false)]
    pub recycle: bool,

    /// Abort a round on its first failed request instead of collecting all.
    #[arg(long, default_value_t = false)]
    pub fail_fast: bool,

    /// Execution unit for each worker.
    ///
    /// Environment variable: `TRANSPORT`
    #[arg(long, env = "TRANSPORT", value_enum, default_value_t = TransportKind::Task)]
    pub transport: TransportKind,

    /// Capacity of each worker's inbox.
    ///
    /// Environment variable: `INBOX_CAPACITY`
    #[arg(long, env = "INBOX_CAPACITY", default_value_t = DEFAULT_INBOX_CAPACITY)]
    pub inbox_capacity: usize,

    /// Emit logs as JSON lines instead of pretty text.
    ///
    /// Environment variable: `LOG_JSON`
    #[arg(long, env = "LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

#[derive(Debug, Clone)]
pub struct DemoConfig {
    pub pool: PoolConfig,
    pub length: usize,
    pub chunks: usize,
    pub transform: Transform,
    pub recycle: bool,
    pub transport: TransportKind,
    pub log_json: bool,
}

impl TryFrom<CliArgs> for DemoConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.num_workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }

        if args.inbox_capacity == 0 {
            bail!("INBOX_CAPACITY must be greater than 0");
        }

        if args.length == 0 {
            bail!("LENGTH must be greater than 0");
        }

        if args.length > MAX_LENGTH {
            bail!("LENGTH ({}) exceeds the maximum of {}", args.length, MAX_LENGTH);
        }

        let chunks = args.chunks.unwrap_or(args.num_workers);
        if chunks == 0 {
            bail!("CHUNKS must be greater than 0");
        }

        if chunks > args.num_workers && !args.recycle {
            let workers = args.num_workers;
            bail!(
                "CHUNKS ({chunks}) exceeds NUM_WORKERS ({workers}); pass --recycle to send the rest"
            );
        }

        let join_policy = if args.fail_fast {
            JoinPolicy::FailFast
        } else {
            JoinPolicy::CollectAll
        };

        Ok(Self {
            pool: PoolConfig::new(args.num_workers)
                .with_inbox_capacity(args.inbox_capacity)
                .with_join_policy(join_policy),
            length: args.length,
            chunks,
            transform: args.transform,
            recycle: args.recycle,
            transport: args.transport,
            log_json: args.log_json,
        })
    }
}
