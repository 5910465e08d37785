use std::sync::Arc;

use crate::{auth::jwt::JwtService, config::AppConfig, store::DocumentStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub config: Arc<AppConfig>,
    pub jwt: JwtService,
}

impl AppState {
    pub fn new(store: Arc<dyn DocumentStore>, config: AppConfig, jwt: JwtService) -> Self {
        Self {
            store,
            config: Arc::new(config),
            jwt,
        }
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn origin(&self) -> &str {
        &self.config.public_origin
    }
}
