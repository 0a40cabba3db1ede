use crate::{
    ArgYield, Args, Call, EqualSplit, Error, Input, InstanceStatus, JoinPolicy, MethodRegistry,
    Pool, ShardOptions, TaskTransport, Then, ThreadTransport, codes,
};
use serde_json::{Value, json};
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

fn methods() -> MethodRegistry {
    MethodRegistry::new()
        .with("echo", |params: &Value| Ok(params.clone()))
        .with("double", |params: &Value| {
            let part = params[0].as_array().cloned().unwrap_or_default();
            let doubled: Vec<Value> = part
                .iter()
                .map(|v| json!(v.as_i64().unwrap_or(0) * 2))
                .collect();
            Ok(json!([doubled, params[1]]))
        })
        .with("odd_fails", |params: &Value| {
            let slot = params.as_u64().unwrap_or(0);
            if slot % 2 == 1 {
                anyhow::bail!("slot {slot} refused");
            }
            Ok(json!(slot))
        })
        .with("explode_on_one", |params: &Value| {
            if params.as_u64() == Some(1) {
                panic!("slot 1 exploded");
            }
            Ok(params.clone())
        })
        .with("nap", |params: &Value| {
            let ms = params.as_u64().unwrap_or(0);
            std::thread::sleep(Duration::from_millis(ms));
            Ok(json!(ms))
        })
}

fn pool(size: usize) -> Pool {
    Pool::with_size(size, TaskTransport::new(methods())).unwrap()
}

fn numbers(range: core::ops::RangeInclusive<i64>) -> Vec<Value> {
    range.map(Value::from).collect()
}

/// Puts `[part, offset]` results back together in offset order.
fn reassemble(input: Input) -> crate::Result<Value> {
    let round = input.round().ok_or_else(|| Error::step("expected a round"))?;
    let mut pieces: Vec<(u64, Vec<Value>)> = round
        .results
        .iter()
        .map(|r| (r[1].as_u64().unwrap(), r[0].as_array().unwrap().clone()))
        .collect();
    pieces.sort_by_key(|(offset, _)| *offset);
    Ok(Value::Array(pieces.into_iter().flat_map(|(_, p)| p).collect()))
}

#[tokio::test]
async fn sharded_round_reconstructs_doubled_input() {
    let pool = pool(3);
    let shard = pool.shard(numbers(1..=10), ShardOptions::default()).unwrap();

    let shapes = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let seen = Arc::clone(&shapes);
    let out = pool
        .sequence(|_| {}, |_| {})
        .call("double", shard)
        .then(move |input: Input| {
            let round = input.round().unwrap();
            for r in &round.results {
                seen.lock()
                    .push((r[0].as_array().unwrap().len(), r[1].as_u64().unwrap()));
            }
            reassemble(input)
        })
        .run(json!(null))
        .await
        .unwrap();

    let expected: Vec<Value> = (1..=10).map(|i| json!(i * 2)).collect();
    assert_eq!(out, Value::Array(expected));
    assert_eq!(*shapes.lock(), vec![(3, 0), (3, 3), (4, 6)]);
}

#[tokio::test]
async fn recycling_sweeps_until_an_idle_cycle() {
    let two_cycles = Args::func(|ctx| {
        if ctx.cycle < 2 {
            ArgYield::Params(json!([ctx.slot, ctx.cycle]))
        } else {
            ArgYield::Skip
        }
    });

    let pool = pool(3);
    let count = |input: Input| Ok(json!(input.round().map_or(0, |r| r.len())));

    let recycled = pool
        .sequence(|_| {}, |_| {})
        .call_recycling("echo", two_cycles.clone())
        .then(count)
        .run(json!(null))
        .await
        .unwrap();
    assert_eq!(recycled, json!(6));

    let single = pool
        .sequence(|_| {}, |_| {})
        .call("echo", two_cycles)
        .then(count)
        .run(json!(null))
        .await
        .unwrap();
    assert_eq!(single, json!(3));
}

#[tokio::test]
async fn scratch_is_shared_within_a_call() {
    let five = Args::func(|ctx| {
        let n = ctx.scratch.get("n").and_then(Value::as_u64).unwrap_or(0);
        if n == 5 {
            return ArgYield::Skip;
        }
        ctx.scratch.insert("n".to_string(), json!(n + 1));
        ArgYield::Params(json!(n))
    });

    let out = pool(3)
        .sequence(|_| {}, |_| {})
        .call_recycling("echo", five)
        .run(json!(null))
        .await
        .unwrap();
    assert_eq!(out, json!([0, 1, 2, 3, 4]));
}

#[tokio::test]
async fn partial_failures_stay_in_place() {
    let by_slot = Args::func(|ctx| ArgYield::Params(json!(ctx.slot)));

    let out = pool(4)
        .sequence(|_| {}, |_| {})
        .call("odd_fails", by_slot)
        .then(|input: Input| {
            let round = input.round().unwrap();
            assert_eq!(round.len(), 4);
            assert_eq!(round.failures(), 2);
            let got: Vec<_> = round
                .responses
                .iter()
                .map(|r| r.as_ref().and_then(|r| r.error()).map(|e| e.code))
                .collect();
            assert_eq!(
                got,
                vec![None, Some(codes::INTERNAL_ERROR), None, Some(codes::INTERNAL_ERROR)]
            );
            Ok(Value::Array(round.results.clone()))
        })
        .run(json!(null))
        .await
        .unwrap();

    assert_eq!(out, json!([0, null, 2, null]));
}

#[tokio::test]
async fn crashed_slot_fails_in_place_under_collect_all() {
    let by_slot = Args::func(|ctx| ArgYield::Params(json!(ctx.slot)));

    let out = pool(3)
        .sequence(|_| {}, |_| {})
        .call("explode_on_one", by_slot)
        .then(|input: Input| {
            let round = input.round().unwrap();
            assert_eq!(round.len(), 3);
            assert_eq!(round.failures(), 1);
            assert!(round.raw[0].is_ok());
            assert!(matches!(
                round.raw[1],
                Err(Error::Transport { id, ref reason })
                    if id.slot == 1 && reason.contains("slot 1 exploded")
            ));
            assert!(round.raw[2].is_ok());
            Ok(Value::Array(round.results.clone()))
        })
        .run(json!(null))
        .await
        .unwrap();

    assert_eq!(out, json!([0, null, 2]));
}

#[tokio::test]
async fn fail_fast_surfaces_the_first_error() {
    let by_slot = Args::func(|ctx| ArgYield::Params(json!(ctx.slot)));

    let err = pool(2)
        .sequence(|_| {}, |_| {})
        .join_policy(JoinPolicy::FailFast)
        .call("odd_fails", by_slot)
        .then(|_| Ok(json!("unreachable")))
        .run(json!(null))
        .await
        .unwrap_err();

    match err {
        Error::RoundFailed { id, code, message } => {
            assert_eq!(id.slot, 1);
            assert_eq!(code, codes::INTERNAL_ERROR);
            assert_eq!(message, "slot 1 refused");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn results_follow_issue_order() {
    let pool = Pool::with_size(3, ThreadTransport::new(methods())).unwrap();
    // Slot 0 answers last, slot 2 first.
    let naps = Args::func(|ctx| ArgYield::Params(json!(60 - 25 * ctx.slot as u64)));

    let arrivals = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let log = Arc::clone(&arrivals);
    let out = pool
        .sequence(|_| {}, |_| {})
        .call("nap", naps)
        .then_with(
            Then::new(|input: Input| Ok(input.into_value())).on_progress(move |settlement| {
                if let Ok(resp) = settlement {
                    log.lock().push(resp.id().slot);
                }
            }),
        )
        .run(json!(null))
        .await
        .unwrap();

    assert_eq!(out, json!([60, 35, 10]));
    assert_eq!(*arrivals.lock(), vec![2, 1, 0]);
}

#[tokio::test]
async fn empty_round_joins_immediately() {
    let nothing = Args::func(|_| ArgYield::Skip);

    let out = pool(3)
        .sequence(|_| {}, |_| {})
        .call("echo", nothing)
        .then(|input: Input| {
            let round = input.round().unwrap();
            assert!(round.is_empty());
            assert!(round.extras.is_none());
            Ok(json!("done"))
        })
        .run(json!(null))
        .await
        .unwrap();
    assert_eq!(out, json!("done"));
}

#[tokio::test]
async fn extras_carry_processing_time() {
    let out = pool(2)
        .sequence(|_| {}, |_| {})
        .call("echo", json!([1]))
        .then(|input: Input| {
            let extras = input.round().and_then(|r| r.extras.clone()).unwrap();
            assert_eq!(extras.len(), 2);
            assert!(extras.iter().all(|e| e["time"].as_f64().unwrap() >= 0.0));
            Ok(json!(extras.len()))
        })
        .run(json!(null))
        .await
        .unwrap();
    assert_eq!(out, json!(2));
}

#[tokio::test]
async fn then_steps_pass_values_along() {
    let out = pool(1)
        .sequence(|_| {}, |_| {})
        .then(|input: Input| {
            assert!(input.value().is_some());
            Ok(json!(input.into_value().as_i64().unwrap() + 1))
        })
        .then(|input: Input| Ok(json!(input.into_value().as_i64().unwrap() * 10)))
        .run(json!(4))
        .await
        .unwrap();
    assert_eq!(out, json!(50));
}

#[tokio::test]
async fn prior_output_feeds_the_next_round() {
    let out = pool(2)
        .sequence(|_| {}, |_| {})
        .then(|_| Ok(json!({ "seed": 9 })))
        .call("echo", Value::Null)
        .call("echo", Args::prior())
        .run(json!(null))
        .await
        .unwrap();

    // The second round echoes the first round's results array to each slot.
    let first = json!([{ "seed": 9 }, { "seed": 9 }]);
    assert_eq!(out, json!([first.clone(), first]));
}

#[tokio::test]
async fn non_array_literals_use_the_prior_output() {
    let pool = pool(2);

    let out = pool
        .sequence(|_| {}, |_| {})
        .then(|_| Ok(json!("prior")))
        .call("echo", json!({ "k": 1 }))
        .run(json!(null))
        .await
        .unwrap();
    assert_eq!(out, json!(["prior", "prior"]));

    let broadcast = pool
        .sequence(|_| {}, |_| {})
        .then(|_| Ok(json!("prior")))
        .call("echo", Args::list(json!({ "k": 1 })))
        .run(json!(null))
        .await
        .unwrap();
    assert_eq!(broadcast, json!([{ "k": 1 }, { "k": 1 }]));
}

#[tokio::test]
async fn argument_function_can_switch_to_a_partitioner() {
    let from_prior = Args::func(|ctx| {
        if ctx.slot == 0 && ctx.cycle == 0 {
            let data = ctx.prior.as_array().cloned().unwrap_or_default();
            match EqualSplit::new(data, 3) {
                Ok(split) => ArgYield::Shard(Box::new(split)),
                Err(_) => ArgYield::Skip,
            }
        } else {
            ArgYield::Params(json!("not used"))
        }
    });

    let out = pool(3)
        .sequence(|_| {}, |_| {})
        .call("double", from_prior)
        .then(reassemble)
        .run(json!([1, 2, 3, 4, 5, 6]))
        .await
        .unwrap();
    assert_eq!(out, json!([2, 4, 6, 8, 10, 12]));
}

#[tokio::test]
async fn failures_skip_calls_until_recovered() {
    let fail = |_: Input| -> crate::Result<Value> { Err(Error::step("bad input")) };

    let err = pool(1)
        .sequence(|_| {}, |_| {})
        .then(fail)
        .call("echo", json!([]))
        .then(|_| Ok(json!("unreachable")))
        .run(json!(null))
        .await
        .unwrap_err();
    assert_eq!(err, Error::step("bad input"));

    let recovered = pool(1)
        .sequence(|_| {}, |_| {})
        .then(fail)
        .call("echo", json!([]))
        .then_with(Then::new(|_| Ok(json!("unreachable"))).on_fail(|e| {
            assert!(matches!(e, Error::Step { .. }));
            Ok(json!("recovered"))
        }))
        .then(|input: Input| Ok(json!([input.into_value(), "after"])))
        .run(json!(null))
        .await
        .unwrap();
    assert_eq!(recovered, json!(["recovered", "after"]));
}

#[tokio::test]
async fn anyhow_errors_become_step_failures() {
    let err = pool(1)
        .sequence(|_| {}, |_| {})
        .then(|input: Input| {
            let n = input
                .into_value()
                .as_i64()
                .ok_or_else(|| anyhow::anyhow!("expected a number"))?;
            Ok(json!(n))
        })
        .run(json!("seven"))
        .await
        .unwrap_err();
    assert_eq!(err, Error::step("expected a number"));
}

#[tokio::test]
async fn hooks_run_once_per_instance() {
    let setups = Arc::new(AtomicUsize::new(0));
    let teardowns = Arc::new(AtomicUsize::new(0));
    let (s, t) = (Arc::clone(&setups), Arc::clone(&teardowns));

    let pool = pool(2);
    let seq = pool
        .sequence(
            move |_| {
                s.fetch_add(1, Ordering::SeqCst);
            },
            move |p: &Pool| {
                assert!(p.is_live());
                t.fetch_add(1, Ordering::SeqCst);
            },
        )
        .call("echo", json!([1]))
        .then(|_| Err(Error::step("always")));

    assert!(seq.run(json!(null)).await.is_err());
    assert!(seq.run(json!(null)).await.is_err());

    assert_eq!(setups.load(Ordering::SeqCst), 2);
    assert_eq!(teardowns.load(Ordering::SeqCst), 2);
    assert_eq!(seq.fired(), 2);
}

#[tokio::test]
async fn teardown_runs_after_a_panicking_step() {
    let teardowns = Arc::new(AtomicUsize::new(0));
    let t = Arc::clone(&teardowns);

    let pool = pool(2);
    let err = pool
        .sequence(|_| {}, move |_| {
            t.fetch_add(1, Ordering::SeqCst);
        })
        .call("echo", json!([1]))
        .then(|_| panic!("step exploded"))
        .run(json!(null))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Instance { ref reason } if reason.contains("step exploded")));
    assert_eq!(teardowns.load(Ordering::SeqCst), 1);

    // The lease was released with the panicked instance.
    let next = pool
        .sequence(|_| {}, |_| {})
        .call("echo", json!([2]))
        .run(json!(null))
        .await
        .unwrap();
    assert_eq!(next, json!([[2], [2]]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_instances_on_one_pool_both_complete() {
    let pool = pool(2);
    let seq = pool
        .sequence(|_| {}, |_| {})
        .call("echo", Value::Null)
        .then(|input: Input| Ok(input.into_value()));

    let first = seq.proc(json!("a"));
    let second = seq.proc(json!("b"));
    assert_eq!((first.instance(), second.instance()), (1, 2));

    let (a, b) = tokio::join!(first, second);
    assert_eq!(a.unwrap(), json!(["a", "a"]));
    assert_eq!(b.unwrap(), json!(["b", "b"]));
    assert_eq!(pool.generation(), 2);
}

#[tokio::test]
async fn running_reports_its_status() {
    let pool = pool(1);
    let ok = pool.sequence(|_| {}, |_| {}).call("echo", json!([1]));
    let failing = pool
        .sequence(|_| {}, |_| {})
        .then(|_| Err(Error::step("no")));

    let running = ok.proc(json!(null));
    assert_eq!(running.status(), InstanceStatus::Fired);
    let done = failing.proc(json!(null));

    assert!(running.await.is_ok());
    assert!(done.await.is_err());

    let again = failing.proc(json!(null));
    tokio::time::timeout(Duration::from_secs(1), async {
        while !again.status().is_settled() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert_eq!(again.status(), InstanceStatus::Failed);
}

#[tokio::test]
async fn progress_sees_every_settlement() {
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);

    let pool = pool(3);
    let shard = pool.shard(numbers(1..=9), ShardOptions::default()).unwrap();
    pool.sequence(|_| {}, |_| {})
        .call_many(
            [Call::new("double", shard), Call::new("echo", json!(["x"]))],
            false,
        )
        .then_with(
            Then::new(|input: Input| Ok(json!(input.round().unwrap().len()))).on_progress(
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
            ),
        )
        .run(json!(null))
        .await
        .unwrap();

    assert_eq!(seen.load(Ordering::SeqCst), 6);
}
