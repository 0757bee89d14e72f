use std::sync::Arc;

use crate::config::Config;
use crate::jobs::JobService;
use crate::ledger::LedgerStore;
use crate::observability::Metrics;
use crate::queue::TaskBroker;
use crate::storage::StorageClient;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub jobs: JobService,
    pub ledger: Arc<LedgerStore>,
    pub storage: StorageClient,
    pub broker: Arc<TaskBroker>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        config: Config,
        jobs: JobService,
        ledger: Arc<LedgerStore>,
        storage: StorageClient,
        broker: Arc<TaskBroker>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            jobs,
            ledger,
            storage,
            broker,
            metrics,
        }
    }
}
