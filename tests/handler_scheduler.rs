//! Integration tests for the handler pool.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use handoffdb::btree::PageReference;
use handoffdb::common::config::SchedulerConfig;
use handoffdb::common::{Error, HandlerId};
use handoffdb::handler::{
    OperationStatus, PageOperationHandler, PageOperationScheduler, WriteOperation,
};

use common::{init_tracing, numbered_leaf};

fn scheduler(handlers: usize) -> PageOperationScheduler {
    init_tracing();
    PageOperationScheduler::new(SchedulerConfig::default().with_handler_count(handlers)).unwrap()
}

#[test]
fn test_concurrent_submitters() {
    const THREADS: u32 = 4;
    const PER_THREAD: u32 = 50;

    let scheduler = Arc::new(scheduler(3));
    let root = Arc::new(PageReference::from_page(numbered_leaf(0..0)));

    let submitters: Vec<_> = (0..THREADS)
        .map(|t| {
            let scheduler = Arc::clone(&scheduler);
            let root = Arc::clone(&root);
            thread::spawn(move || {
                let handles: Vec<_> = (0..PER_THREAD)
                    .map(|i| {
                        let key = (t * PER_THREAD + i).to_be_bytes().to_vec();
                        scheduler
                            .execute_write(vec![root.clone()], move |_, refs| {
                                let page = refs[0].memory_page().unwrap();
                                let mut keys = page.keys().to_vec();
                                let at = keys.binary_search(&key).unwrap_err();
                                keys.insert(at, key.clone());
                                refs[0].replace_page(handoffdb::Page::new_leaf(keys.clone(), keys));
                                Ok(())
                            })
                            .unwrap()
                    })
                    .collect();
                for handle in handles {
                    handle.wait().unwrap();
                }
            })
        })
        .collect();

    for submitter in submitters {
        submitter.join().unwrap();
    }

    let page = root.memory_page().unwrap();
    assert_eq!(page.key_count(), (THREADS * PER_THREAD) as usize);
    assert!(page.keys().windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_same_handler_runs_in_submission_order() {
    let scheduler = scheduler(2);
    let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

    for i in 0..20 {
        let log = Arc::clone(&log);
        scheduler
            .submit_to(HandlerId::new(1), move |_: &PageOperationHandler| {
                log.lock().push(i);
                OperationStatus::Completed
            })
            .unwrap();
    }

    // A write on the same handler completes after everything before it.
    let marker = Arc::new(PageReference::new());
    let (op, handle) = WriteOperation::new(vec![marker], |_, _| Ok(()));
    scheduler.submit_to(HandlerId::new(1), op).unwrap();
    handle.wait().unwrap();

    assert_eq!(*log.lock(), (0..20).collect::<Vec<_>>());
}

#[test]
fn test_yielding_operation_lets_others_run() {
    let scheduler = scheduler(1);
    let turns = Arc::new(AtomicUsize::new(0));

    let t = Arc::clone(&turns);
    scheduler
        .submit(move |_: &PageOperationHandler| {
            if t.fetch_add(1, Ordering::SeqCst) < 3 {
                OperationStatus::Yield
            } else {
                OperationStatus::Completed
            }
        })
        .unwrap();

    let reference = Arc::new(PageReference::new());
    scheduler
        .execute_write(vec![reference], |_, _| Ok(()))
        .unwrap()
        .wait()
        .unwrap();

    scheduler.shutdown();
    assert!(turns.load(Ordering::SeqCst) >= 1);
}

#[test]
fn test_shutdown_rejects_new_work() {
    let scheduler = scheduler(2);
    scheduler.shutdown();

    let reference = Arc::new(PageReference::new());
    let result = scheduler.execute_write(vec![reference], |_, _| Ok(()));
    assert!(matches!(result, Err(Error::SchedulerShutdown)));
}

#[test]
fn test_drop_drops_parked_work() {
    let reference = Arc::new(PageReference::new());
    let handle = {
        let scheduler = scheduler(2);
        let holder = scheduler.handler(HandlerId::new(0)).unwrap();
        assert!(reference.try_lock(&holder));

        let (op, handle) = WriteOperation::new(vec![reference.clone()], |_, _| Ok(()));
        scheduler.submit_to(HandlerId::new(1), op).unwrap();
        handle
    };
    assert!(matches!(handle.wait(), Err(Error::OperationDropped)));
}

#[test]
fn test_stats_snapshot_per_handler() {
    let scheduler = scheduler(3);
    for _ in 0..6 {
        scheduler
            .execute_write(vec![Arc::new(PageReference::new())], |_, _| Ok(()))
            .unwrap()
            .wait()
            .unwrap();
    }

    // Counters are bumped after the reply; stop the workers first.
    scheduler.shutdown();
    let per_handler = scheduler.stats_snapshot();
    assert_eq!(per_handler.len(), 3);
    assert!(per_handler.iter().all(|s| s.operations_completed == 2));
    assert_eq!(scheduler.total_stats().operations_completed, 6);
    assert!(format!("{}", scheduler.total_stats()).contains("completed: 6"));
}

#[test]
fn test_config_handler_count() {
    let scheduler = scheduler(5);
    assert_eq!(scheduler.handler_count(), 5);
    assert_eq!(scheduler.config().handler_count, 5);
    assert!(scheduler.handler(HandlerId::new(4)).is_some());
    assert!(scheduler.handler(HandlerId::new(5)).is_none());
    assert_eq!(
        scheduler.handler(HandlerId::new(2)).unwrap().name(),
        "page-handler-2"
    );
}
