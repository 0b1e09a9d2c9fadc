use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempdb::common::AsyncResult;
use tempdb::errors::{ErrorKind, TempDbError};
use tempdb::migration::{Location, MigrationDescriptor};
use tempdb_int_test::test_util::{cleanup, create_test_context, run_test, table_count};

#[ctor::ctor]
fn init() {
    colog::init();
}

#[test]
fn test_single_write_many_readers() {
    let result: AsyncResult<usize> = AsyncResult::new();
    let readers = 4;
    let barrier = Arc::new(Barrier::new(readers + 1));

    let early: Vec<_> = (0..readers)
        .map(|_| {
            let result = result.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                result.wait().map_err(|e| e.kind().clone())
            })
        })
        .collect();

    barrier.wait();
    result.complete(7).unwrap();

    let second = result.complete(8).unwrap_err();
    assert_eq!(second.kind(), &ErrorKind::ResultAlreadyCompleted);
    let third = result
        .complete_exceptionally(TempDbError::new("late", ErrorKind::MigrationFailure))
        .unwrap_err();
    assert_eq!(third.kind(), &ErrorKind::ResultAlreadyCompleted);

    for reader in early {
        assert_eq!(reader.join().unwrap(), Ok(7));
    }
    assert_eq!(result.wait().unwrap(), 7);
    assert_eq!(result.clone().try_get().map(|r| r.ok()), Some(Some(7)));
}

#[test]
fn test_failure_is_observed_by_all_readers() {
    let result: AsyncResult<usize> = AsyncResult::new();
    let late_reader = result.clone();

    result
        .complete_exceptionally(TempDbError::new("V2 failed", ErrorKind::MigrationFailure))
        .unwrap();
    assert!(result.is_failed());
    assert!(result.complete(1).is_err());

    let err = thread::spawn(move || late_reader.wait())
        .join()
        .unwrap()
        .unwrap_err();
    assert_eq!(err.message(), "V2 failed");
    assert_eq!(result.wait().unwrap_err().message(), "V2 failed");
}

#[test]
fn test_wait_timeout_on_pending_result() {
    let result: AsyncResult<usize> = AsyncResult::new();
    assert!(result.wait_timeout(Duration::from_millis(20)).is_none());
    assert!(!result.is_done());
}

#[test]
fn test_provide_database_async() {
    run_test(
        create_test_context,
        |ctx| {
            let descriptor = MigrationDescriptor::new(
                "main",
                vec![Location::inline(
                    "orders",
                    &[("V1__orders.sql", "CREATE TABLE orders (id INTEGER PRIMARY KEY);")],
                )],
            );
            let migrate = descriptor.migrate();
            let applied = migrate.result();

            let pending = ctx.provider()?.provide_database_async(vec![migrate.into()]);
            let done = Arc::new(AtomicBool::new(false));
            let watcher = {
                let pending = pending.clone();
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    let ok = pending.wait().is_ok();
                    done.store(ok, Ordering::SeqCst);
                })
            };

            awaitility::at_most(Duration::from_secs(10)).until(|| done.load(Ordering::SeqCst));
            let _ = watcher.join();

            let database = pending.wait()?;
            assert_eq!(applied.wait()?, 1);
            assert_eq!(table_count(&database, "orders")?, 1);
            database.release()
        },
        cleanup,
    );
}
