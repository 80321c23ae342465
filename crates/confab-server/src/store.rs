use std::sync::Arc;

use tokio::sync::Mutex;

use confab_store::Database;

/// Shared handle to the durable store. One guard covers a whole
/// read-check-write sequence, so holders see no interleaved writers.
pub type Store = Arc<Mutex<Database>>;

pub fn shared(db: Database) -> Store {
    Arc::new(Mutex::new(db))
}

#[cfg(test)]
pub fn in_memory() -> confab_store::Result<Store> {
    Ok(shared(Database::open_in_memory()?))
}
