use crate::auth::repo::{PgUserRepo, UserRepo};
use crate::bugs::repo::{BugRepo, PgBugRepo};
use crate::config::AppConfig;
use crate::memory::MemoryStore;
use crate::projects::repo::{PgProjectRepo, ProjectRepo};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserRepo>,
    pub bugs: Arc<dyn BugRepo>,
    pub projects: Arc<dyn ProjectRepo>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        match config.database_url.clone() {
            Some(url) => {
                let db = crate::db::connect(&config, &url).await?;
                info!("connected to PostgreSQL");
                Ok(Self::from_pool(db, config))
            }
            None => {
                warn!("DATABASE_URL not set; records live in memory and vanish on restart");
                Ok(Self::in_memory(config))
            }
        }
    }

    pub fn from_pool(db: PgPool, config: Arc<AppConfig>) -> Self {
        Self {
            config,
            users: Arc::new(PgUserRepo::new(db.clone())),
            bugs: Arc::new(PgBugRepo::new(db.clone())),
            projects: Arc::new(PgProjectRepo::new(db)),
        }
    }

    pub fn in_memory(config: Arc<AppConfig>) -> Self {
        let store = Arc::new(MemoryStore::default());
        Self {
            config,
            users: store.clone(),
            bugs: store.clone(),
            projects: store,
        }
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        let config = Arc::new(AppConfig {
            database_url: None,
            max_connections: 1,
            jwt: crate::config::JwtConfig {
                secret: "test".into(),
                ttl_days: 1,
            },
            host: "127.0.0.1".into(),
            port: 0,
        });
        Self::in_memory(config)
    }
}
