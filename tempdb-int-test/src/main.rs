use std::thread;
use tempdb::errors::{ErrorKind, TempDbError, TempDbResult};
use tempdb::migration::{Location, MigrationDescriptor};
use tempdb::preparer::SqlScriptPreparer;
use tempdb_int_test::test_util::{cleanup, create_test_context, query_count};

fn main() -> TempDbResult<()> {
    colog::init();
    println!("Starting provisioning stress test...");
    let ctx = create_test_context()?;
    let provider = ctx.provider()?;

    let descriptor = MigrationDescriptor::new(
        "main",
        vec![Location::inline(
            "stress",
            &[
                ("V1__accounts.sql", "CREATE TABLE accounts (id INTEGER PRIMARY KEY, owner TEXT);"),
                ("V2__ledger.sql", "CREATE TABLE ledger (id INTEGER PRIMARY KEY, account INTEGER, amount INTEGER);"),
            ],
        )],
    );
    let seed = SqlScriptPreparer::from_sql(
        "seed",
        "INSERT INTO accounts (owner) VALUES ('a'), ('b'); INSERT INTO ledger (account, amount) VALUES (1, 10);",
    );

    let threads = 8;
    let per_thread = 250;

    let start = std::time::Instant::now();
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let provider = provider.clone();
            let preparers = vec![descriptor.migrate().into(), seed.clone().into()];
            thread::spawn(move || -> TempDbResult<usize> {
                let mut rows = 0;
                for _ in 0..per_thread {
                    let database = provider.provide_database(&preparers)?;
                    rows += query_count(&database, "SELECT count(*) FROM accounts")? as usize;
                    database.release()?;
                }
                Ok(rows)
            })
        })
        .collect();

    let mut rows = 0;
    for handle in handles {
        rows += handle.join().map_err(|_| {
            TempDbError::new("Provisioning thread panicked", ErrorKind::InternalError)
        })??;
    }
    println!(
        "Provisioned and released {} databases ({} seeded rows) in {:?}",
        threads * per_thread,
        rows,
        start.elapsed()
    );

    cleanup(ctx)
}
