use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use thiserror::Error;

use crate::config::AppConfig;

/// Failure from any repository backend.
#[derive(Debug, Error)]
pub enum RepoError {
    /// A unique constraint rejected the write; carries the offending field.
    #[error("duplicate value for {0}")]
    Conflict(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for RepoError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepoError::Conflict(db.constraint().unwrap_or("unique").to_string())
            }
            _ => RepoError::Other(anyhow::Error::new(e)),
        }
    }
}

pub async fn connect(config: &AppConfig, url: &str) -> anyhow::Result<PgPool> {
    let db = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(url)
        .await
        .context("connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .context("run migrations")?;

    Ok(db)
}

/// Wraps a search term for `ILIKE '%term%'`, escaping wildcard characters.
pub fn ilike_pattern(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    out.push('%');
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('%');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ilike_pattern_escapes_wildcards() {
        assert_eq!(ilike_pattern("login"), "%login%");
        assert_eq!(ilike_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
    }
}
