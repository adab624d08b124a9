use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use zoomrec_store::{EventStore, HttpEventStore, HttpStoreConfig, SqliteEventStore};

use crate::cli_args::StoreArgs;

/// Installs the global subscriber. `RUST_LOG` wins over `default_level`.
pub(crate) fn init_tracing(default_level: &str) -> Result<()> {
    let level = default_level
        .parse::<LevelFilter>()
        .with_context(|| format!("invalid log level '{default_level}'"))?;
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|error| anyhow!("failed to install tracing subscriber: {error}"))
}

pub(crate) fn open_store(args: &StoreArgs) -> Result<Arc<dyn EventStore>> {
    if let Some(base_url) = args
        .server_url
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        let store = HttpEventStore::new(HttpStoreConfig {
            username: args.server_username.clone(),
            password: args.server_password.clone(),
            ..HttpStoreConfig::new(base_url)
        })
        .context("failed to build event service client")?;
        tracing::debug!(server_url = %base_url, "using remote event store");
        return Ok(Arc::new(store));
    }

    let store = SqliteEventStore::new(&args.db_path).with_context(|| {
        format!("failed to open event database {}", args.db_path.display())
    })?;
    tracing::debug!(db_path = %args.db_path.display(), "using sqlite event store");
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::open_store;
    use crate::cli_args::StoreArgs;
    use zoomrec_types::EventDraft;

    #[tokio::test]
    async fn functional_sqlite_store_is_used_without_server_url() {
        let dir = tempfile::tempdir().expect("tempdir");
        let args = StoreArgs {
            server_url: Some("  ".to_string()),
            server_username: None,
            server_password: None,
            db_path: dir.path().join("nested").join("events.sqlite3"),
        };
        let store = open_store(&args).expect("open store");
        store
            .create(EventDraft {
                dtstart: Some("03/06/2024 10:00".to_string()),
                timezone: Some("UTC".to_string()),
                duration: Some("30".to_string()),
                id: Some("123456789".to_string()),
                user_key: Some("user-1".to_string()),
                ..EventDraft::default()
            })
            .await
            .expect("create");
        assert!(args.db_path.exists());
    }
}
