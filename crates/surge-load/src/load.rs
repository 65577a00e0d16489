use crate::config::LoadConfig;
use core::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::sync::Arc;
use surge::{CancellationToken, Scaler};
use tokio::{sync::mpsc, time::Instant};

/// Outcome of one load run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// Items pushed into the scaler.
    pub sent: usize,
    /// Items the transform would emit if nothing were lost.
    pub expected: usize,
    /// Items actually read from the output.
    pub emitted: usize,
    /// Highest number of transforms observed running at once.
    pub peak: usize,
    pub elapsed: Duration,
    pub cancelled: bool,
}

impl Report {
    /// Expected items that never reached the output.
    pub fn shortfall(&self) -> usize {
        self.expected.saturating_sub(self.emitted)
    }

    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.emitted as f64 / secs
    }
}

/// Counts transforms in flight and remembers the highest count.
#[derive(Debug, Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(self: &Arc<Self>) -> InFlight {
        let now = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);
        InFlight(Arc::clone(self))
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }
}

struct InFlight(Arc<Gauge>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::AcqRel);
    }
}

fn generate(seed: u64, items: usize) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..items).map(|_| rng.random()).collect()
}

fn scaler(config: &LoadConfig, gauge: &Arc<Gauge>) -> Scaler<u64, u64> {
    let gauge = Arc::clone(gauge);
    let work = config.work;
    let drop_odd = config.drop_odd;

    let scaler = Scaler::new()
        .with_wait(config.wait)
        .with_life(config.life)
        .with_buffer(config.buffer)
        .with_intercept(move |_token, value: u64| {
            let gauge = Arc::clone(&gauge);
            async move {
                let _in_flight = gauge.enter();
                if !work.is_zero() {
                    tokio::time::sleep(work).await;
                }
                (!drop_odd || value % 2 == 0).then_some(value)
            }
        });

    match config.max_workers {
        Some(cap) => scaler.with_max_workers(cap),
        None => scaler,
    }
}

/// Pushes `config.items` seeded values through a scaler and reads the output
/// until it closes.
///
/// Cancelling `token` ends the run early; the report then carries whatever
/// was emitted up to that point.
pub async fn run(config: &LoadConfig, token: CancellationToken) -> anyhow::Result<Report> {
    let values = generate(config.seed, config.items);
    let expected = values
        .iter()
        .filter(|value| !config.drop_odd || *value % 2 == 0)
        .count();

    let gauge = Arc::new(Gauge::default());
    let (tx, rx) = mpsc::channel(config.buffer);
    let mut output = scaler(config, &gauge).exec(token.clone(), rx)?;

    let started = Instant::now();
    let producer = tokio::spawn(async move {
        let mut sent = 0;
        for value in values {
            if tx.send(value).await.is_err() {
                break;
            }
            sent += 1;
        }
        sent
    });

    let mut emitted = 0;
    while output.recv().await.is_some() {
        emitted += 1;
    }
    let elapsed = started.elapsed();

    let sent = producer.await?;

    Ok(Report {
        sent,
        expected,
        emitted,
        peak: gauge.peak(),
        elapsed,
        cancelled: token.is_cancelled(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::num::NonZeroUsize;

    fn config(items: usize) -> LoadConfig {
        LoadConfig {
            items,
            wait: Duration::from_millis(1),
            life: Duration::from_millis(50),
            work: Duration::from_millis(2),
            max_workers: None,
            buffer: 16,
            seed: 7,
            drop_odd: false,
        }
    }

    #[test]
    fn shortfall_counts_missing_items() {
        let report = Report {
            sent: 10,
            expected: 8,
            emitted: 5,
            peak: 2,
            elapsed: Duration::from_millis(10),
            cancelled: false,
        };
        assert_eq!(report.shortfall(), 3);

        let complete = Report {
            emitted: 8,
            ..report
        };
        assert_eq!(complete.shortfall(), 0);
    }

    #[test]
    fn generation_is_seeded() {
        assert_eq!(generate(42, 64), generate(42, 64));
        assert_ne!(generate(42, 64), generate(43, 64));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn emits_every_item() {
        let report = run(&config(200), CancellationToken::new()).await.unwrap();

        assert_eq!(report.sent, 200);
        assert_eq!(report.expected, 200);
        assert_eq!(report.emitted, 200);
        assert_eq!(report.shortfall(), 0);
        assert!(report.peak >= 1);
        assert!(!report.cancelled);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn drop_odd_emits_only_even_values() {
        let config = LoadConfig {
            drop_odd: true,
            ..config(300)
        };
        let evens = generate(config.seed, config.items)
            .into_iter()
            .filter(|value| value % 2 == 0)
            .count();

        let report = run(&config, CancellationToken::new()).await.unwrap();

        assert_eq!(report.expected, evens);
        assert_eq!(report.emitted, evens);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn peak_respects_the_cap() {
        let config = LoadConfig {
            max_workers: NonZeroUsize::new(3),
            ..config(120)
        };

        let report = run(&config, CancellationToken::new()).await.unwrap();

        assert_eq!(report.emitted, 120);
        assert!(report.peak <= 3, "peak {} exceeds cap", report.peak);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn cancellation_ends_the_run_early() {
        let config = LoadConfig {
            work: Duration::from_millis(50),
            max_workers: NonZeroUsize::new(1),
            ..config(1_000)
        };
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let report = tokio::time::timeout(Duration::from_secs(10), run(&config, token))
            .await
            .expect("run did not stop after cancellation")
            .unwrap();

        assert!(report.cancelled);
        assert!(report.emitted < 1_000);
    }
}
