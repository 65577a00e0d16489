//! Test-data helpers.
//!
//! Randomness is always drawn from a caller-owned, seeded generator so that a
//! failing case can be replayed from its seed.

use rand::{
    Rng, SeedableRng,
    distr::{Distribution, StandardUniform},
    rngs::StdRng,
};
use tokio::sync::mpsc;

pub(crate) fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// `size` random values, integers or floats.
pub(crate) fn values<T>(rng: &mut impl Rng, size: usize) -> Vec<T>
where
    StandardUniform: Distribution<T>,
{
    (0..size).map(|_| rng.random()).collect()
}

/// `tests` independent batches of `size` random values each.
pub(crate) fn batches<T>(rng: &mut impl Rng, tests: usize, size: usize) -> Vec<Vec<T>>
where
    StandardUniform: Distribution<T>,
{
    (0..tests).map(|_| values(rng, size)).collect()
}

/// Spawns a producer that sends `items` in order and then closes the channel.
pub(crate) fn feed<T>(items: Vec<T>) -> mpsc::Receiver<T>
where
    T: Send + 'static,
{
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        for item in items {
            if tx.send(item).await.is_err() {
                return;
            }
        }
    });
    rx
}

/// Reads `rx` until it closes.
pub(crate) async fn drain<T>(mut rx: mpsc::Receiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Some(item) = rx.recv().await {
        out.push(item);
    }
    out
}
