use crate::domain::catalogue::PricingCatalogue;
use crate::domain::ports::CatalogueSource;
use crate::error::{CheckoutError, Result};
use crate::interfaces::json::catalogue_reader::CatalogueReader;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// A catalogue held in memory. `replace` swaps in a new snapshot; readers holding the
/// previous `Arc` keep seeing the old one.
#[derive(Clone)]
pub struct StaticCatalogue {
    current: Arc<RwLock<Arc<PricingCatalogue>>>,
}

impl StaticCatalogue {
    pub fn new(catalogue: PricingCatalogue) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(catalogue))),
        }
    }

    pub fn replace(&self, catalogue: PricingCatalogue) -> Result<()> {
        catalogue.validate()?;
        if let Ok(mut guard) = self.current.write() {
            *guard = Arc::new(catalogue);
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogueSource for StaticCatalogue {
    async fn snapshot(&self) -> Result<Arc<PricingCatalogue>> {
        let guard = self.current.read().map_err(|e| {
            CheckoutError::InternalError(
                format!("Catalogue lock poisoned: {e}").into(),
            )
        })?;
        Ok(Arc::clone(&guard))
    }
}

/// Reads the catalogue document from disk on every snapshot, so edits to the file are
/// picked up on the next poll.
#[derive(Debug, Clone)]
pub struct JsonFileCatalogue {
    path: PathBuf,
}

impl JsonFileCatalogue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CatalogueSource for JsonFileCatalogue {
    async fn snapshot(&self) -> Result<Arc<PricingCatalogue>> {
        let path = self.path.clone();
        let catalogue = tokio::task::spawn_blocking(move || CatalogueReader::from_path(path))
            .await
            .map_err(|e| CheckoutError::InternalError(Box::new(e)))??;
        Ok(Arc::new(catalogue))
    }
}
