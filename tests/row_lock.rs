//! Integration tests for row locks.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use handoffdb::common::{SessionId, TransactionId};
use handoffdb::lock::{LockOwner, RowLock, RowLockStatus, Session, Transaction};

use common::init_tracing;

fn txn(id: u64) -> Transaction {
    Transaction::new(TransactionId(id), Session::new(SessionId(id)))
}

/// Wait for the row to be handed over, then take it.
fn acquire_after_resume(row: &RowLock, t: &Transaction) -> RowLockStatus {
    loop {
        assert!(
            t.session().wait_resumed(Duration::from_secs(5)),
            "session {} never resumed",
            t.session().id().0
        );
        match row.try_lock(t.session(), t, None) {
            RowLockStatus::Waiting => continue,
            status => return status,
        }
    }
}

/// S1 holds the row with S2 then S3 queued; S1 releases and S2 goes first.
#[test]
fn test_scenario_c_fifo_release() {
    init_tracing();
    let row = Arc::new(RowLock::new());
    let (t1, t2, t3) = (txn(1), txn(2), txn(3));

    assert_eq!(row.try_lock(t1.session(), &t1, None), RowLockStatus::Acquired);
    assert_eq!(row.try_lock(t2.session(), &t2, None), RowLockStatus::Waiting);
    assert_eq!(row.try_lock(t3.session(), &t3, None), RowLockStatus::Waiting);
    assert_eq!(row.waiting_sessions(), vec![SessionId(2), SessionId(3)]);

    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let waiters: Vec<_> = [t2, t3]
        .into_iter()
        .map(|t| {
            let row = Arc::clone(&row);
            let order = Arc::clone(&order);
            thread::spawn(move || {
                assert_eq!(acquire_after_resume(&row, &t), RowLockStatus::Acquired);
                order.lock().push(t.id());
                row.unlock(&t).unwrap();
            })
        })
        .collect();

    row.unlock(&t1).unwrap();
    for waiter in waiters {
        waiter.join().unwrap();
    }

    assert_eq!(*order.lock(), vec![TransactionId(2), TransactionId(3)]);
    assert!(row.owner_transaction().is_none());
}

#[test]
fn test_many_sessions_acquire_in_registration_order() {
    const SESSIONS: u64 = 16;
    let row = Arc::new(RowLock::new());
    let first = txn(0);
    row.try_lock(first.session(), &first, None);

    let txns: Vec<Transaction> = (1..=SESSIONS).map(txn).collect();
    for t in &txns {
        assert_eq!(row.try_lock(t.session(), t, None), RowLockStatus::Waiting);
    }

    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let waiters: Vec<_> = txns
        .into_iter()
        .map(|t| {
            let row = Arc::clone(&row);
            let order = Arc::clone(&order);
            thread::spawn(move || {
                acquire_after_resume(&row, &t);
                order.lock().push(t.id().0);
                row.unlock(&t).unwrap();
            })
        })
        .collect();

    row.unlock(&first).unwrap();
    for waiter in waiters {
        waiter.join().unwrap();
    }
    assert_eq!(*order.lock(), (1..=SESSIONS).collect::<Vec<_>>());
}

#[test]
fn test_old_value_visible_to_other_readers() {
    let row = RowLock::new();
    let (writer, reader) = (txn(1), txn(2));

    row.try_lock(writer.session(), &writer, Some(b"balance=10".to_vec()));
    let owner = row.owner();
    assert_eq!(owner.transaction().map(Transaction::id), Some(TransactionId(1)));
    assert_eq!(owner.old_value(), Some(&b"balance=10"[..]));

    let current = Some(&b"balance=5"[..]);
    assert_eq!(row.visible_value(&reader, current).as_deref(), Some(&b"balance=10"[..]));
    assert_eq!(row.visible_value(&writer, current).as_deref(), Some(&b"balance=5"[..]));

    row.unlock(&writer).unwrap();
    assert_eq!(row.visible_value(&reader, current).as_deref(), Some(&b"balance=5"[..]));
    assert!(row.owner().transaction().is_none());
}

#[test]
fn test_waiter_gives_up() {
    let row = RowLock::new();
    let (t1, t2, t3) = (txn(1), txn(2), txn(3));

    row.try_lock(t1.session(), &t1, None);
    row.try_lock(t2.session(), &t2, None);
    row.try_lock(t3.session(), &t3, None);

    // t2 times out while queued.
    assert!(!t2.session().wait_resumed(Duration::from_millis(10)));
    row.abandon(t2.session());

    row.unlock(&t1).unwrap();
    assert!(t3.session().wait_resumed(Duration::from_secs(1)));
    assert_eq!(row.try_lock(t3.session(), &t3, None), RowLockStatus::Acquired);
    assert!(!t2.session().take_resumed());
}
