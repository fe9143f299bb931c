use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::app::Result;
use crate::store::{BackendKind, DataService, DocumentService, SearchIndex, SqliteService};

/// Decides which backend the rest of the crate talks to.
///
/// The document store file existing on disk means a migration has
/// already happened, so the document backend wins; otherwise the
/// relational store is opened (and created on first use). After a
/// successful migration [`set_current`](Self::set_current) swaps the
/// live service exactly once; everything downstream resolves the
/// service through [`current_service`](Self::current_service) per call
/// and picks up the swap without restarting.
pub struct DataServiceFactory {
    relational_path: PathBuf,
    document_path: PathBuf,
    search_index: Option<Arc<dyn SearchIndex>>,
    current: Mutex<Option<Arc<dyn DataService>>>,
}

impl DataServiceFactory {
    pub fn new(
        relational_path: PathBuf,
        document_path: PathBuf,
        search_index: Option<Arc<dyn SearchIndex>>,
    ) -> Self {
        Self {
            relational_path,
            document_path,
            search_index,
            current: Mutex::new(None),
        }
    }

    /// Factory pinned to an existing service, bypassing path selection.
    pub fn with_service(service: Arc<dyn DataService>) -> Self {
        Self {
            relational_path: PathBuf::new(),
            document_path: PathBuf::new(),
            search_index: None,
            current: Mutex::new(Some(service)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<dyn DataService>>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn current_service(&self) -> Result<Arc<dyn DataService>> {
        let mut current = self.lock();
        if let Some(service) = current.as_ref() {
            return Ok(service.clone());
        }
        let service: Arc<dyn DataService> = if self.document_path.exists() {
            tracing::debug!(path = %self.document_path.display(), "opening document store");
            Arc::new(DocumentService::open(
                &self.document_path,
                self.search_index.clone(),
            )?)
        } else {
            tracing::debug!(path = %self.relational_path.display(), "opening relational store");
            Arc::new(SqliteService::open(
                &self.relational_path,
                self.search_index.clone(),
            )?)
        };
        *current = Some(service.clone());
        Ok(service)
    }

    /// True while the live service still runs on the legacy relational
    /// backend.
    pub fn legacy_backend_in_use(&self) -> Result<bool> {
        Ok(self.current_service()?.kind() == BackendKind::Relational)
    }

    /// A fresh document service at the configured path, the target of a
    /// migration. Does not become current until [`set_current`] is
    /// called.
    ///
    /// [`set_current`]: Self::set_current
    pub fn new_document_service(&self) -> Result<Arc<dyn DataService>> {
        Ok(Arc::new(DocumentService::open(
            &self.document_path,
            self.search_index.clone(),
        )?))
    }

    pub fn set_current(&self, service: Arc<dyn DataService>) {
        *self.lock() = Some(service);
    }
}
