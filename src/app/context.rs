use std::sync::Arc;
use std::time::Duration;

use crate::app::error::{FreshetError, Result};
use crate::config::Config;
use crate::fetcher::http_fetcher::HttpFetcher;
use crate::fetcher::Fetcher;
use crate::repository::DataRepository;
use crate::store::{DataServiceFactory, InMemoryService};
use crate::update::UpdateService;

pub struct AppContext {
    pub factory: Arc<DataServiceFactory>,
    pub repository: Arc<DataRepository>,
}

impl AppContext {
    /// Wires the full stack from configuration: backend selection,
    /// HTTP fetcher, refresh orchestration.
    pub fn new(config: &Config) -> Result<Self> {
        let relational_path = config
            .relational_path()
            .map_err(|e| FreshetError::Config(e.to_string()))?;
        let document_path = config
            .document_path()
            .map_err(|e| FreshetError::Config(e.to_string()))?;

        let factory = Arc::new(DataServiceFactory::new(relational_path, document_path, None));
        let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::with_timeout(Duration::from_secs(
            config.fetch.timeout_secs,
        )));
        let update_service = Arc::new(UpdateService::new(factory.clone(), fetcher));
        let repository = Arc::new(DataRepository::with_workers(
            factory.clone(),
            update_service,
            config.fetch.workers,
        ));

        Ok(Self {
            factory,
            repository,
        })
    }

    /// A context over a throwaway in-memory store.
    pub fn in_memory() -> Self {
        let factory = Arc::new(DataServiceFactory::with_service(Arc::new(
            InMemoryService::new(),
        )));
        let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new());
        let update_service = Arc::new(UpdateService::new(factory.clone(), fetcher));
        let repository = Arc::new(DataRepository::new(factory.clone(), update_service));

        Self {
            factory,
            repository,
        }
    }
}
