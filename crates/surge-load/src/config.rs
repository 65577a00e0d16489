use anyhow::bail;
use clap::Parser;
use core::{num::NonZeroUsize, time::Duration};

/// Runtime configuration for the `surge-load` binary.
///
/// Every option can be given as a flag or through its environment variable
/// (a `.env` file in the working directory is honored). The defaults describe
/// a short run that is enough to watch the pool grow and shrink.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "surge-load",
    version,
    about = "Drives a surge scaler with synthetic load and reports throughput"
)]
pub struct CliArgs {
    /// Number of items pushed through the scaler.
    ///
    /// Environment variable: `SURGE_ITEMS`
    #[arg(long, env = "SURGE_ITEMS", default_value_t = 10_000)]
    pub items: usize,

    /// Milliseconds an item may wait for a free worker before the scaler
    /// spawns another one.
    ///
    /// Zero means "scale up as soon as no worker is ready".
    ///
    /// Environment variable: `SURGE_WAIT_MS`
    #[arg(long, env = "SURGE_WAIT_MS", default_value_t = 1)]
    pub wait_ms: u64,

    /// Milliseconds a worker stays alive without receiving an item.
    ///
    /// Environment variable: `SURGE_LIFE_MS`
    #[arg(long, env = "SURGE_LIFE_MS", default_value_t = 250)]
    pub life_ms: u64,

    /// Simulated work per item, in milliseconds.
    ///
    /// Environment variable: `SURGE_WORK_MS`
    #[arg(long, env = "SURGE_WORK_MS", default_value_t = 5)]
    pub work_ms: u64,

    /// Upper bound on live workers. Zero leaves the pool unbounded.
    ///
    /// Environment variable: `SURGE_MAX_WORKERS`
    #[arg(long, env = "SURGE_MAX_WORKERS", default_value_t = 0)]
    pub max_workers: usize,

    /// Capacity of both the input channel and the scaler's output channel.
    ///
    /// Environment variable: `SURGE_BUFFER`
    #[arg(long, env = "SURGE_BUFFER", default_value_t = 64)]
    pub buffer: usize,

    /// Seed for the item generator. Runs with the same seed push the same
    /// values.
    ///
    /// Environment variable: `SURGE_SEED`
    #[arg(long, env = "SURGE_SEED", default_value_t = 0x5EED)]
    pub seed: u64,

    /// Drop odd values in the transform instead of emitting them.
    ///
    /// Environment variable: `SURGE_DROP_ODD`
    #[arg(long, env = "SURGE_DROP_ODD", default_value_t = false)]
    pub drop_odd: bool,
}

#[derive(Debug, Clone)]
pub struct LoadConfig {
    pub items: usize,
    pub wait: Duration,
    pub life: Duration,
    pub work: Duration,
    pub max_workers: Option<NonZeroUsize>,
    pub buffer: usize,
    pub seed: u64,
    pub drop_odd: bool,
}

impl TryFrom<CliArgs> for LoadConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.items == 0 {
            bail!("SURGE_ITEMS must be greater than 0");
        }

        if args.buffer == 0 {
            bail!("SURGE_BUFFER must be greater than 0");
        }

        if args.life_ms < args.wait_ms {
            bail!(
                "SURGE_LIFE_MS ({}) is shorter than SURGE_WAIT_MS ({}); workers would idle out before a scale-up could help",
                args.life_ms,
                args.wait_ms
            );
        }

        Ok(Self {
            items: args.items,
            wait: Duration::from_millis(args.wait_ms),
            life: Duration::from_millis(args.life_ms),
            work: Duration::from_millis(args.work_ms),
            max_workers: NonZeroUsize::new(args.max_workers),
            buffer: args.buffer,
            seed: args.seed,
            drop_odd: args.drop_odd,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(flags: &[&str]) -> anyhow::Result<LoadConfig> {
        let args = CliArgs::try_parse_from(core::iter::once("surge-load").chain(flags.iter().copied()))?;
        LoadConfig::try_from(args)
    }

    #[test]
    fn flags_map_onto_config() {
        let config = parse(&[
            "--items",
            "32",
            "--wait-ms",
            "3",
            "--life-ms",
            "40",
            "--work-ms",
            "7",
            "--max-workers",
            "4",
            "--buffer",
            "8",
            "--seed",
            "99",
            "--drop-odd",
        ])
        .unwrap();

        assert_eq!(config.items, 32);
        assert_eq!(config.wait, Duration::from_millis(3));
        assert_eq!(config.life, Duration::from_millis(40));
        assert_eq!(config.work, Duration::from_millis(7));
        assert_eq!(config.max_workers, NonZeroUsize::new(4));
        assert_eq!(config.buffer, 8);
        assert_eq!(config.seed, 99);
        assert!(config.drop_odd);
    }

    #[test]
    fn zero_max_workers_means_unbounded() {
        let config = parse(&["--items", "1", "--max-workers", "0"]).unwrap();
        assert_eq!(config.max_workers, None);
    }

    #[test]
    fn rejects_empty_runs() {
        let err = parse(&["--items", "0"]).unwrap_err();
        assert!(err.to_string().contains("SURGE_ITEMS"));
    }

    #[test]
    fn rejects_zero_buffer() {
        let err = parse(&["--items", "1", "--buffer", "0"]).unwrap_err();
        assert!(err.to_string().contains("SURGE_BUFFER"));
    }

    #[test]
    fn rejects_life_shorter_than_wait() {
        let err = parse(&["--items", "1", "--wait-ms", "10", "--life-ms", "5"]).unwrap_err();
        assert!(err.to_string().contains("SURGE_LIFE_MS"));
    }
}
