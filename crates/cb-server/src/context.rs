//! Application context shared by the dispatcher, job tasks and route
//! handlers.

use std::sync::Arc;

use cb_core::bus::MessageBus;
use cb_core::config::Config;
use cb_db::pool::DbPool;
use cb_providers::videos::{VideoFetcher, YtDlpFetcher};
use cb_providers::{RefreshLocks, ServiceContext};

/// Immutable infrastructure handed to every job and request.
///
/// Jobs share nothing else in memory: each one builds its own adapter from
/// the stored credential.
#[derive(Clone)]
pub struct AppContext {
    pub db: DbPool,
    pub config: Arc<Config>,
    pub bus: Arc<dyn MessageBus>,
    pub refresh_locks: RefreshLocks,
    pub fetcher: Arc<dyn VideoFetcher>,
}

impl AppContext {
    pub fn new(db: DbPool, config: Config, bus: Arc<dyn MessageBus>) -> Self {
        let fetcher = Arc::new(YtDlpFetcher::new(&config.videos));
        Self {
            db,
            config: Arc::new(config),
            bus,
            refresh_locks: RefreshLocks::new(),
            fetcher,
        }
    }

    /// Replace the video downloader.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn VideoFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// The subset of the context provider adapters are built from.
    pub fn services(&self) -> ServiceContext {
        ServiceContext::new(self.db.clone(), self.config.clone(), self.refresh_locks.clone())
    }
}
