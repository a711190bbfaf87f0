use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::mail::{Mailer, RecordingMailer, SmtpMailer};
use crate::storage::{LocalStorage, StorageClient};
use crate::users::{memory::MemoryUserStore, PgUserStore, UserStore};

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserStore>,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn StorageClient>,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let users: Arc<dyn UserStore> = if config.uses_memory_store() {
            warn!("DATABASE_URL=memory: accounts live only as long as this process");
            Arc::new(MemoryUserStore::new())
        } else {
            let db = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(&config.database_url)
                .await
                .context("connect to database")?;

            if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
                warn!(error = %e, "migration failed; continuing");
            }
            Arc::new(PgUserStore::new(db))
        };

        let local = LocalStorage::new(&config.upload_folder);
        local.ensure_layout().await?;
        let storage = Arc::new(local) as Arc<dyn StorageClient>;

        let mailer: Arc<dyn Mailer> = match &config.mail {
            Some(mail) => Arc::new(SmtpMailer::new(mail)?),
            None => {
                info!("MAIL_SERVER not set; outgoing mail is only logged");
                Arc::new(RecordingMailer::new())
            }
        };

        Ok(Self {
            users,
            config,
            storage,
            mailer,
        })
    }

    #[cfg(test)]
    pub fn from_parts(
        users: Arc<dyn UserStore>,
        config: Arc<AppConfig>,
        storage: Arc<dyn StorageClient>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            users,
            config,
            storage,
            mailer,
        }
    }

    #[cfg(test)]
    pub fn test_config() -> AppConfig {
        use crate::config::TokenConfig;
        use std::path::PathBuf;

        AppConfig {
            database_url: "memory".into(),
            tokens: TokenConfig {
                secret: "test".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                reset_ttl_minutes: 30,
            },
            upload_folder: PathBuf::from("target/test-uploads"),
            app_base_url: "http://localhost:3030".into(),
            session_ttl_days: 30,
            secure_cookies: false,
            mail: None,
        }
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        use async_trait::async_trait;
        use bytes::Bytes;

        #[derive(Clone)]
        struct FakeStorage;
        #[async_trait]
        impl StorageClient for FakeStorage {
            async fn put_object(&self, _k: &str, _b: Bytes) -> anyhow::Result<()> {
                Ok(())
            }
            async fn delete_object(&self, _k: &str) -> anyhow::Result<()> {
                Ok(())
            }
        }

        Self {
            users: Arc::new(MemoryUserStore::new()),
            config: Arc::new(Self::test_config()),
            storage: Arc::new(FakeStorage),
            mailer: Arc::new(RecordingMailer::new()),
        }
    }
}
