//! spec.md §4.7: dispatching a worker system with `threads = T` runs it
//! once per worker slot in `[0, T)`, each seeing `(threadIndex, threadCount)
//! = (slot, T)`, and a `T` above `maxWorkers` is rejected.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sparseworld::{Context, Error, World, WorldOptions, WorkerSystem};

fn world_with_workers(max_workers: usize) -> World {
    let options = WorldOptions {
        max_workers,
        worker_timeout: Duration::from_secs(5),
        ..WorldOptions::default()
    };
    World::new(Vec::new(), options).unwrap()
}

#[test]
fn worker_system_fans_out_across_threads_with_correct_indices() {
    let mut world = world_with_workers(4);

    let seen: Arc<Mutex<Vec<(usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_inner = Arc::clone(&seen);

    let system = WorkerSystem {
        id: "partitioned".into(),
        priority: 0,
        func: Arc::new(move |ctx: &Context| {
            seen_inner
                .lock()
                .unwrap()
                .push((ctx.thread_index, ctx.thread_count));
        }),
        partitioned: true,
        threads: 3,
    };

    world.execute(&[], &[], &[system]).unwrap();

    let mut seen = seen.lock().unwrap();
    seen.sort_unstable();
    assert_eq!(seen.len(), 3, "one invocation per worker slot");
    assert_eq!(*seen, vec![(0, 3), (1, 3), (2, 3)]);

    let indices: HashSet<usize> = seen.iter().map(|(index, _)| *index).collect();
    assert_eq!(indices, HashSet::from([0, 1, 2]), "every slot in [0, T) ran exactly once");
}

#[test]
fn requesting_more_threads_than_max_workers_is_rejected() {
    let mut world = world_with_workers(2);

    let system = WorkerSystem {
        id: "overcommitted".into(),
        priority: 0,
        func: Arc::new(|_ctx: &Context| {}),
        partitioned: true,
        threads: 3,
    };

    let err = world.execute(&[], &[], &[system]).unwrap_err();
    assert!(matches!(
        err,
        Error::ThreadCountExceeded { requested: 3, max_workers: 2 }
    ));
}

#[test]
fn worker_system_runs_inline_without_a_worker_plane_when_single_threaded() {
    let mut world = world_with_workers(0);

    let ran = Arc::new(Mutex::new(false));
    let ran_inner = Arc::clone(&ran);
    let system = WorkerSystem {
        id: "inline".into(),
        priority: 0,
        func: Arc::new(move |ctx: &Context| {
            assert_eq!(ctx.thread_index, 0);
            assert_eq!(ctx.thread_count, 1);
            *ran_inner.lock().unwrap() = true;
        }),
        partitioned: false,
        threads: 1,
    };

    world.execute(&[], &[], &[system]).unwrap();
    assert!(*ran.lock().unwrap(), "single-threaded worker system runs inline with no worker plane");
}

#[test]
fn multi_threaded_worker_system_without_a_worker_plane_is_rejected() {
    let mut world = world_with_workers(0);

    let system = WorkerSystem {
        id: "needs_plane".into(),
        priority: 0,
        func: Arc::new(|_ctx: &Context| {}),
        partitioned: true,
        threads: 2,
    };

    let err = world.execute(&[], &[], &[system]).unwrap_err();
    assert!(matches!(
        err,
        Error::ThreadCountExceeded { requested: 2, max_workers: 0 }
    ));
}
