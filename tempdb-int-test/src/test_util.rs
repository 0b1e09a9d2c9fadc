use std::backtrace::Backtrace;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempdb::common::SQLITE_MEMORY_ENGINE;
use tempdb::database::EmbeddedDatabase;
use tempdb::engine::SqliteTarget;
use tempdb::errors::{TempDbError, TempDbResult};
use tempdb::lifecycle::{DatabaseReaper, LifecycleEventBus};
use tempdb::provider::{InMemoryProvider, Provider, ProviderRegistry};
use tempfile::TempDir;

/// Database name under which the default in-memory provider is registered.
pub const TEST_DATABASE: &str = "orders";
/// Provider type of the default in-memory provider.
pub const TEST_PROVIDER_TYPE: &str = "memory";

/// Runs a test with retry logic and error handling.
/// Tests run on the current thread to avoid thread exhaustion when running many tests in parallel.
pub fn run_test<T, B, A>(before: B, test: T, after: A)
where
    T: Fn(TestContext) -> TempDbResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    B: Fn() -> TempDbResult<TestContext> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    A: Fn(TestContext) -> TempDbResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
{
    const MAX_RETRIES: u32 = 3;
    let mut last_error: Option<String> = None;
    let mut last_backtrace: Option<String> = None;

    for attempt in 1..=MAX_RETRIES {
        let start_time = Instant::now();

        let result = std::panic::catch_unwind(|| {
            let backtrace = Backtrace::capture();
            match before() {
                Ok(ctx) => match test(ctx.clone()) {
                    Ok(_) => after(ctx)
                        .map_err(|e| (format!("After run failed: {:?}", e), backtrace.to_string())),
                    Err(e) => {
                        let _ = after(ctx);
                        Err((format!("Test failed: {:?}", e), backtrace.to_string()))
                    }
                },
                Err(e) => Err((format!("Before run failed: {:?}", e), backtrace.to_string())),
            }
        });

        let elapsed = start_time.elapsed();
        let failure = match result {
            Ok(Ok(_)) => return,
            Ok(Err((e, bt))) => {
                last_backtrace = Some(bt);
                format!("Error: {}", e)
            }
            Err(panic_err) => {
                let err_msg = if let Some(s) = panic_err.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_err.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                last_backtrace = Some(Backtrace::capture().to_string());
                format!("Panic: {}", err_msg)
            }
        };

        if attempt < MAX_RETRIES {
            eprintln!(
                "\n========== Test Attempt {}/{} Failed (took {:?}) ==========",
                attempt, MAX_RETRIES, elapsed
            );
            eprintln!("{}", failure);
            eprintln!("Retrying in {}ms...\n", 100 * attempt);
            thread::sleep(Duration::from_millis(100 * attempt as u64));
        }
        last_error = Some(failure);
    }

    eprintln!("\n==================== TEST FAILED ====================");
    eprintln!("Failed after {} attempts", MAX_RETRIES);
    eprintln!("Last error: {}", last_error.as_deref().unwrap_or("Unknown"));
    if let Some(bt) = &last_backtrace {
        if !bt.is_empty() && !bt.contains("disabled") {
            eprintln!("\nBacktrace:\n{}", bt);
        }
    }
    eprintln!("=====================================================\n");

    panic!(
        "Test failed after {} attempts. Last error: {}",
        MAX_RETRIES,
        last_error.unwrap_or_default()
    );
}

/// Everything one test needs: a registry with an in-memory provider, an
/// event bus with a reaper attached and a scratch directory for scripts.
#[derive(Clone)]
pub struct TestContext {
    registry: ProviderRegistry,
    event_bus: LifecycleEventBus,
    reaper: DatabaseReaper,
    scratch: Arc<TempDir>,
}

impl TestContext {
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn provider(&self) -> TempDbResult<Provider> {
        self.registry.resolve(TEST_DATABASE, TEST_PROVIDER_TYPE)
    }

    pub fn event_bus(&self) -> &LifecycleEventBus {
        &self.event_bus
    }

    pub fn reaper(&self) -> &DatabaseReaper {
        &self.reaper
    }

    /// Directory removed together with the last clone of the context.
    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    /// Creates `name` under the scratch directory and fills it with scripts.
    pub fn script_dir(&self, name: &str, scripts: &[(&str, &str)]) -> TempDbResult<PathBuf> {
        let dir = self.scratch.path().join(name);
        write_scripts(&dir, scripts)?;
        Ok(dir)
    }
}

pub fn create_test_context() -> TempDbResult<TestContext> {
    let event_bus = LifecycleEventBus::new();
    let reaper = DatabaseReaper::new();
    reaper.attach(&event_bus)?;

    let provider = InMemoryProvider::with_config()
        .name_prefix("it")
        .event_bus(event_bus.clone())
        .build();
    let registry = ProviderRegistry::builder()
        .register(TEST_DATABASE, TEST_PROVIDER_TYPE, provider.into())
        .build()?;
    let scratch = tempfile::Builder::new()
        .prefix("tempdb-it")
        .tempdir()?;

    Ok(TestContext {
        registry,
        event_bus,
        reaper,
        scratch: Arc::new(scratch),
    })
}

/// Releases what the test left behind and closes the providers.
pub fn cleanup(ctx: TestContext) -> TempDbResult<()> {
    let released = ctx.reaper.release_all()?;
    if released > 0 {
        log::debug!("Released {} leftover database(s)", released);
    }
    ctx.registry.close()
}

pub fn write_scripts(dir: &Path, scripts: &[(&str, &str)]) -> TempDbResult<()> {
    fs::create_dir_all(dir)?;
    for (file_name, sql) in scripts {
        fs::write(dir.join(file_name), sql)?;
    }
    Ok(())
}

/// Runs a single-value query against an in-memory SQLite database.
pub fn query_count(database: &EmbeddedDatabase, sql: &str) -> TempDbResult<i64> {
    let connection = SqliteTarget::new(database.url(), SQLITE_MEMORY_ENGINE).open()?;
    connection
        .query_row(sql, [], |row| row.get(0))
        .map_err(TempDbError::from)
}

pub fn table_count(database: &EmbeddedDatabase, table: &str) -> TempDbResult<i64> {
    query_count(
        database,
        &format!(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = '{}'",
            table
        ),
    )
}
