use std::sync::Arc;

use anyhow::Context;

use crate::config::HubConfig;
use crate::hub::BroadcastHub;
use crate::session::SessionStore;
use crate::store::{JsonFileStore, RecordStore};
use crate::users::UserStore;

/// everything the handlers share; cheap to clone
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<HubConfig>,
    pub store: Arc<dyn RecordStore>,
    pub hub: BroadcastHub,
    pub users: Arc<UserStore>,
    pub sessions: SessionStore,
}

impl AppState {
    /// open the on-disk stores named by `config`
    pub fn new(config: HubConfig) -> anyhow::Result<Self> {
        let sensor_path = config.storage.sensor_path();
        let store = JsonFileStore::open(&sensor_path)
            .with_context(|| format!("failed to open record store {}", sensor_path.display()))?;

        Self::with_store(config, Arc::new(store))
    }

    pub fn with_store(config: HubConfig, store: Arc<dyn RecordStore>) -> anyhow::Result<Self> {
        let users_path = config.storage.users_path();
        let users = UserStore::open(&users_path, config.storage.bcrypt_cost)
            .with_context(|| format!("failed to open user directory {}", users_path.display()))?;

        std::fs::create_dir_all(&config.storage.uploads_dir).with_context(|| {
            format!("failed to create uploads directory {}", config.storage.uploads_dir.display())
        })?;

        let sessions = SessionStore::new(config.session.idle_timeout());
        Ok(Self {
            hub: BroadcastHub::new(config.broadcast.subscriber_buffer),
            config: Arc::new(config),
            store,
            users: Arc::new(users),
            sessions,
        })
    }
}
