use std::sync::{Arc, Mutex};
use tempdb::lifecycle::{LifecycleEvent, LifecycleEventListener, TestScope};
use tempdb_int_test::test_util::{cleanup, create_test_context, run_test};

#[ctor::ctor]
fn init() {
    colog::init();
}

#[test]
fn test_scope_releases_tracked_databases() {
    run_test(
        create_test_context,
        |ctx| {
            let provider = ctx.provider()?;
            let scope = TestScope::begin("orders::checkout", ctx.event_bus())?;

            let first = provider.provide_database(&[])?;
            let second = provider.provide_database(&[])?;
            ctx.reaper().track(scope.test_id(), &first);
            ctx.reaper().track(scope.test_id(), &second);
            assert_eq!(ctx.reaper().tracked("orders::checkout"), 2);

            scope.finish()?;
            assert!(first.is_released());
            assert!(second.is_released());
            assert_eq!(ctx.reaper().tracked("orders::checkout"), 0);
            Ok(())
        },
        cleanup,
    );
}

#[test]
fn test_dropped_scope_finishes_the_test() {
    run_test(
        create_test_context,
        |ctx| {
            let database = ctx.provider()?.provide_database(&[])?;
            {
                let scope = TestScope::begin("orders::refund", ctx.event_bus())?;
                ctx.reaper().track(scope.test_id(), &database);
            }
            assert!(database.is_released());
            Ok(())
        },
        cleanup,
    );
}

#[test]
fn test_events_arrive_in_order() {
    run_test(
        create_test_context,
        |ctx| {
            let events = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&events);
            ctx.event_bus().register(LifecycleEventListener::new(move |event| {
                if let Ok(mut events) = sink.lock() {
                    events.push(event);
                }
                Ok(())
            }))?;

            let scope = TestScope::begin("orders::list", ctx.event_bus())?;
            let database = ctx.provider()?.provide_database(&[])?;
            ctx.reaper().track(scope.test_id(), &database);
            scope.finish()?;

            let events = events.lock().map(|events| events.clone()).unwrap_or_default();
            assert_eq!(events.len(), 4);
            assert_eq!(events[0], LifecycleEvent::test_started("orders::list"));
            assert!(matches!(
                &events[1],
                LifecycleEvent::DatabaseProvisioned { database_name, .. } if database_name == database.name()
            ));
            // the reaper releases while the finish event is being delivered
            let released = events
                .iter()
                .position(|e| matches!(e, LifecycleEvent::DatabaseReleased { .. }));
            let finished = events
                .iter()
                .position(|e| e == &LifecycleEvent::test_finished("orders::list"));
            assert!(released.is_some());
            assert!(finished.is_some());
            Ok(())
        },
        cleanup,
    );
}

#[test]
fn test_cleanup_releases_leftovers() {
    let ctx = create_test_context().unwrap();
    let database = ctx.provider().unwrap().provide_database(&[]).unwrap();
    ctx.reaper().track("forgotten", &database);

    cleanup(ctx).unwrap();
    assert!(database.is_released());
}
