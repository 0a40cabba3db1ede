//! The transform-and-sum pipeline the binary runs.
//!
//! 1. shard `1..=length` into `chunks` parts and transform each part;
//! 2. reassemble the parts by offset;
//! 3. shard the reassembled array over the pool again and sum each part;
//! 4. add up the partial sums.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Instant,
};

use anyhow::Context;
use serde_json::{Value, json};
use shopfloor::{
    ArgYield, Args, EqualSplit, Error, ErrorObject, Input, MethodRegistry, Pool, Result,
    RoundOutput, ShardOptions, TaskTransport, Then, ThreadTransport,
};

use crate::config::{DemoConfig, TransportKind};

/// Splits worker params of the form `[part, offset]`.
fn numbers(params: &Value) -> anyhow::Result<(Vec<i64>, &Value)> {
    let Some(part) = params.get(0).and_then(Value::as_array) else {
        return Err(ErrorObject::invalid_params("expected [part, offset]").into());
    };
    let values = part
        .iter()
        .map(|v| {
            v.as_i64()
                .ok_or_else(|| ErrorObject::invalid_params(format!("not an integer: {v}")))
        })
        .collect::<core::result::Result<Vec<_>, _>>()?;
    Ok((values, params.get(1).unwrap_or(&Value::Null)))
}

/// The worker program: element-wise transforms and a partial sum.
pub fn methods() -> MethodRegistry {
    MethodRegistry::new()
        .with("double", |params: &Value| {
            let (values, offset) = numbers(params)?;
            let out: Vec<i64> = values.iter().map(|v| v * 2).collect();
            Ok(json!([out, offset]))
        })
        .with("square", |params: &Value| {
            let (values, offset) = numbers(params)?;
            let out = values
                .iter()
                .map(|v| v.checked_mul(*v).context("square overflowed"))
                .collect::<anyhow::Result<Vec<_>>>()?;
            Ok(json!([out, offset]))
        })
        .with("sum", |params: &Value| {
            let (values, _) = numbers(params)?;
            let sum = values
                .iter()
                .try_fold(0i64, |acc, v| acc.checked_add(*v))
                .context("sum overflowed")?;
            Ok(json!(sum))
        })
}

pub fn build_pool(config: &DemoConfig) -> Result<Pool> {
    let methods = methods();
    match config.transport {
        TransportKind::Task => Pool::new(config.pool.clone(), TaskTransport::new(methods)),
        TransportKind::Thread => Pool::new(config.pool.clone(), ThreadTransport::new(methods)),
    }
}

/// Puts `[part, offset]` results back together in offset order.
fn reassemble(round: &RoundOutput) -> Result<Value> {
    let mut pieces = Vec::with_capacity(round.len());
    for (index, result) in round.results.iter().enumerate() {
        let (Some(part), Some(offset)) = (result[0].as_array(), result[1].as_u64()) else {
            let reason = match &round.raw[index] {
                Ok(resp) => resp
                    .error()
                    .map_or_else(|| format!("malformed result {result}"), ToString::to_string),
                Err(e) => e.to_string(),
            };
            return Err(Error::step(format!("part {index} failed: {reason}")));
        };
        pieces.push((offset, part));
    }
    pieces.sort_by_key(|(offset, _)| *offset);
    Ok(Value::Array(
        pieces
            .into_iter()
            .flat_map(|(_, part)| part.iter().cloned())
            .collect(),
    ))
}

fn total(round: &RoundOutput) -> Result<Value> {
    let failed = round.failures();
    if failed > 0 {
        return Err(Error::step(format!(
            "{failed} of {} partial sums failed",
            round.len()
        )));
    }
    Ok(json!(round.results.iter().filter_map(Value::as_i64).sum::<i64>()))
}

/// Runs the pipeline once and returns a summary of it.
///
/// # Errors
///
/// Returns the first failure of the pipeline: a bad shard configuration, a
/// failed part, or a failed round under fail-fast.
pub async fn run(pool: &Pool, config: &DemoConfig) -> Result<Value> {
    let length = i64::try_from(config.length)
        .map_err(|_| Error::step(format!("length {} does not fit an i64", config.length)))?;
    let data: Vec<Value> = (1..=length).map(Value::from).collect();
    let shard = pool.shard(data, ShardOptions::default().chunks(config.chunks))?;

    // The sum round splits whatever the transform round produced.
    let workers = pool.size();
    let resplit = Args::func(move |ctx| {
        if ctx.slot != 0 || ctx.cycle != 0 {
            return ArgYield::Skip;
        }
        let values = ctx.prior.as_array().cloned().unwrap_or_default();
        match EqualSplit::new(values, workers) {
            Ok(split) => ArgYield::Shard(Box::new(split)),
            Err(_) => ArgYield::Skip,
        }
    });

    let sequence = pool.sequence(
        |pool| tracing::debug!("Respawning {} workers", pool.size()),
        |pool| tracing::debug!("Run settled on generation {}", pool.generation()),
    );
    let method = config.transform.method();
    let sequence = if config.recycle {
        sequence.call_recycling(method, shard)
    } else {
        sequence.call(method, shard)
    };

    let requests = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&requests);
    let started = Instant::now();

    let sum = sequence
        .then_with(
            Then::new(|input: Input| match input.round() {
                Some(round) => reassemble(round),
                None => Err(Error::step("expected a round")),
            })
            .on_progress(move |settlement| {
                counter.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = settlement {
                    tracing::warn!("Request failed: {e}");
                }
            }),
        )
        .call("sum", resplit)
        .then(|input: Input| match input.round() {
            Some(round) => total(round),
            None => Err(Error::step("expected a round")),
        })
        .run(Value::Null)
        .await?;

    Ok(json!({
        "length": config.length,
        "workers": workers,
        "chunks": config.chunks,
        "transform": method,
        "requests": requests.load(Ordering::Relaxed),
        "total": sum,
        "elapsed_ms": started.elapsed().as_secs_f64() * 1000.0,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Transform;
    use shopfloor::{JoinPolicy, PoolConfig, codes};

    fn config(workers: usize, length: usize, chunks: usize, recycle: bool) -> DemoConfig {
        DemoConfig {
            pool: PoolConfig::new(workers),
            length,
            chunks,
            transform: Transform::Double,
            recycle,
            transport: TransportKind::Task,
            log_json: false,
        }
    }

    #[tokio::test]
    async fn doubles_and_sums() {
        let config = config(3, 10, 3, false);
        let pool = build_pool(&config).unwrap();
        let summary = run(&pool, &config).await.unwrap();
        assert_eq!(summary["total"], json!(110));
        assert_eq!(summary["requests"], json!(3));
    }

    #[tokio::test]
    async fn recycling_sends_every_part() {
        let mut config = config(2, 100, 7, true);
        config.transform = Transform::Square;
        let pool = build_pool(&config).unwrap();
        let summary = run(&pool, &config).await.unwrap();
        assert_eq!(summary["total"], json!(338_350));
        assert_eq!(summary["requests"], json!(7));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn thread_transport_matches_task_transport() {
        let mut config = config(4, 1_000, 4, false);
        config.transport = TransportKind::Thread;
        config.pool = config.pool.with_join_policy(JoinPolicy::FailFast);
        let pool = build_pool(&config).unwrap();
        let summary = run(&pool, &config).await.unwrap();
        assert_eq!(summary["total"], json!(1_001_000));
    }

    #[test]
    fn methods_reject_malformed_params() {
        let methods = methods();
        let double = methods.get("double").unwrap();
        let err = double(&json!({"not": "a part"})).unwrap_err();
        let error = err.downcast::<ErrorObject>().unwrap();
        assert_eq!(error.code, codes::INVALID_PARAMS);

        let sum = methods.get("sum").unwrap();
        assert_eq!(sum(&json!([[1, 2, 3], 0])).unwrap().result, json!(6));
        assert!(sum(&json!([[i64::MAX, 1], 0])).is_err());
    }
}
