use parking_lot::RwLock;
use std::sync::Arc;

pub type Atomic<T> = Arc<RwLock<T>>;

#[inline]
pub fn atomic<T>(t: T) -> Atomic<T> {
    Arc::new(RwLock::new(t))
}

/// Spawn a task on a new thread.
/// Provisioning blocks on engine startup, so it never shares a pool with callers.
pub fn async_task<OP>(op: OP)
where
    OP: FnOnce() + Send + 'static,
{
    std::thread::spawn(op);
}

/// Generates a unique database name of the form `<prefix>_<uuid>`.
///
/// The name only contains `[a-z0-9_]`, so it is a valid unquoted identifier on
/// every supported engine.
pub fn database_name(prefix: &str) -> String {
    let prefix: String = prefix
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

/// Quotes an SQL identifier with double quotes, doubling embedded quotes.
#[inline]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
