pub mod api;
pub mod config;
pub mod db;
pub mod identity;
pub mod notifications;
pub mod storage;

pub use db::DbPool;

use std::sync::Arc;

use config::Config;
use identity::IdentityProvider;
use notifications::Mailer;
use storage::UploadStore;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub identity: Option<Arc<dyn IdentityProvider>>,
    pub uploads: UploadStore,
    pub mailer: Mailer,
}

impl AppState {
    pub fn new(
        config: Config,
        db: DbPool,
        identity: Option<Arc<dyn IdentityProvider>>,
        uploads: UploadStore,
    ) -> Self {
        let mailer = Mailer::new(config.email.clone());
        Self {
            config,
            db,
            identity,
            uploads,
            mailer,
        }
    }

    /// The identity provider, or a service error when none is configured.
    pub fn identity(&self) -> Result<&dyn IdentityProvider, api::error::ApiError> {
        self.identity
            .as_deref()
            .ok_or_else(|| api::error::ApiError::internal("Authentication service is not configured."))
    }
}
