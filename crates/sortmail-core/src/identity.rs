use anyhow::Result;
use async_trait::async_trait;
use chrono::Local;
use sqlx::{SqlitePool, sqlite::SqliteConnectOptions, sqlite::SqlitePoolOptions};
use tracing::debug;

use crate::SortError;

/// Authority on whether an account exists.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn lookup(&self, email: &str) -> Result<bool>;
    async fn create(&self, email: &str) -> Result<()>;
}

/// Local account registry kept in a SQLite `users` table.
#[derive(Clone)]
pub struct SqliteIdentityStore {
    pool: SqlitePool,
}

impl SqliteIdentityStore {
    /// Opens the database file at `path`, creating it when missing. A
    /// leading `sqlite:` scheme is accepted and ignored.
    pub async fn connect(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.strip_prefix("sqlite:").unwrap_or(path))
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub async fn init(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn normalize_email(email: &str) -> Result<String> {
    let trimmed = email.trim().to_lowercase();
    match trimmed.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(trimmed),
        _ => Err(SortError::Auth(format!("invalid email address: {:?}", email)).into()),
    }
}

#[async_trait]
impl IdentityProvider for SqliteIdentityStore {
    async fn lookup(&self, email: &str) -> Result<bool> {
        let email = normalize_email(email)?;
        let row = sqlx::query_as::<_, (i64,)>("SELECT id FROM users WHERE email = ?")
            .bind(&email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SortError::Auth(e.to_string()))?;
        debug!(%email, found = row.is_some(), "identity lookup");
        Ok(row.is_some())
    }

    async fn create(&self, email: &str) -> Result<()> {
        let email = normalize_email(email)?;
        if self.lookup(&email).await? {
            return Err(SortError::Auth(format!("account already exists for {}", email)).into());
        }
        sqlx::query("INSERT INTO users (email, created_ts) VALUES (?, ?)")
            .bind(&email)
            .bind(Local::now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(|e| SortError::Auth(e.to_string()))?;
        debug!(%email, "identity created");
        Ok(())
    }
}
