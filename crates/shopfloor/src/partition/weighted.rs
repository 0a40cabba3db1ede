use std::collections::VecDeque;

use serde_json::Value;

use crate::{Error, Partition, Partitioner, Result};

/// Spreads items over buckets so that bucket weights come out roughly even.
///
/// Items are weighed, sorted heaviest first, then dealt out by sweeping the
/// bucket index back and forth (`0..n`, `n..0`, ...). Whenever the sweep
/// stands on a bucket whose total is still below the average, that bucket
/// takes the next item. This is a greedy heuristic, not an optimal
/// partition: any two buckets differ by at most the heaviest single item.
///
/// The original item order is not preserved; tag items yourself if you need
/// to map results back. Each partition's offset is its bucket index.
#[derive(Debug, Clone)]
pub struct Weighted {
    buckets: VecDeque<Vec<Value>>,
    next_bucket: usize,
}

impl Weighted {
    /// Buckets `items` into at most `chunks` parts using `weight`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidShard`] if `chunks` is zero or any weight is
    /// negative or not finite.
    pub fn new<F>(items: Vec<Value>, chunks: usize, weight: F) -> Result<Self>
    where
        F: Fn(&Value) -> f64,
    {
        if chunks == 0 {
            return Err(Error::invalid_shard("chunk count must be greater than 0"));
        }

        let chunks = chunks.min(items.len());
        let mut total = 0.0;
        let mut weighed = Vec::with_capacity(items.len());
        for item in items {
            let w = weight(&item);
            if !w.is_finite() || w < 0.0 {
                return Err(Error::invalid_shard(format!(
                    "item weight must be finite and non-negative, got {w}"
                )));
            }
            total += w;
            weighed.push((item, w));
        }

        weighed.sort_by(|a, b| b.1.total_cmp(&a.1));

        Ok(Self {
            buckets: sweep(weighed.into(), chunks, total).into(),
            next_bucket: 0,
        })
    }
}

fn sweep(mut items: VecDeque<(Value, f64)>, chunks: usize, total: f64) -> Vec<Vec<Value>> {
    let mut parts = vec![Vec::new(); chunks];
    if chunks == 0 {
        return parts;
    }

    let mut sums = vec![0.0_f64; chunks];
    let target = total / chunks as f64;
    let mut p = 0_usize;
    let mut forward = true;
    let mut idle_steps = 0_usize;

    while let Some((item, w)) = items.pop_front() {
        if sums[p] < target {
            parts[p].push(item);
            sums[p] += w;
            idle_steps = 0;
        } else if idle_steps >= 2 * chunks {
            // A full back-and-forth pass placed nothing; only weightless
            // leftovers remain once every bucket reached the target.
            let lightest = (0..chunks)
                .min_by(|&a, &b| {
                    sums[a]
                        .total_cmp(&sums[b])
                        .then(parts[a].len().cmp(&parts[b].len()))
                })
                .unwrap_or(0);
            parts[lightest].push(item);
            sums[lightest] += w;
            idle_steps = 0;
        } else {
            items.push_front((item, w));
            idle_steps += 1;
        }

        // Turn around at either end, visiting the end bucket twice.
        if (p == 0 && !forward) || (p == chunks - 1 && forward) {
            forward = !forward;
        } else if forward {
            p += 1;
        } else {
            p -= 1;
        }
    }

    parts
}

impl Partitioner for Weighted {
    fn next(&mut self) -> Option<Partition> {
        let part = self.buckets.pop_front()?;
        let offset = self.next_bucket;
        self.next_bucket += 1;
        Some(Partition::new(Value::Array(part), Some(offset)))
    }
}
