//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." (every developer at 3am) 🦆
//!
//! 🏗️ Powered by Figment. `RLX_*` environment variables are the base layer, an optional
//! TOML file goes on top. Nested keys in env vars use `__`, so
//! `RLX_CONSUMER__ROW_ERROR_POLICY=reject_job` reaches `consumer.row_error_policy`.
//!
//! Every section has a default. With no file and no env vars you get a directory blob
//! store under `./tmp/doc-files`, an in-memory queue, and an in-memory document store.

use std::path::Path;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::{BlobStoreConfig, DocumentStoreConfig, JobQueueConfig};
use crate::consumer::ConsumerConfig;
use crate::producer::ProducerConfig;

/// 🏷️ Every env var this crate reads starts with this.
pub const ENV_PREFIX: &str = "RLX_";

/// 📦 One struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub blob_store: BlobStoreConfig,
    #[serde(default)]
    pub job_queue: JobQueueConfig,
    #[serde(default, alias = "document_store")]
    pub doc_store: DocumentStoreConfig,
    #[serde(default)]
    pub producer: ProducerConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
}

/// 🚀 Load the config from `RLX_*` env vars, plus the TOML file when one is given.
///
/// - `None` → env vars only.
/// - `Some(path)` → env vars, then the file merged over them. The file wins on conflicts.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        file = %config_file_name.map(|p| p.display().to_string()).unwrap_or_else(|| "<none>".to_string()),
        "🔧 loading configuration"
    );

    let config = Figment::new().merge(Env::prefixed(ENV_PREFIX).split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables ({ENV_PREFIX}*). \
             The file exists in our hearts, but apparently not in a shape serde recognizes.",
            path.display()
        ),
        None => format!(
            "💀 Failed to parse configuration from environment variables ({ENV_PREFIX}*). \
             No file was provided, so this one's all on the environment. Classic."
        ),
    };
    config.extract().context(context_msg)
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;
    use crate::consumer::RowErrorPolicy;

    #[test]
    fn the_one_where_nothing_is_configured_and_everything_still_works() {
        Jail::expect_with(|_jail| {
            let app_config = load_config(None).map_err(|e| e.to_string())?;

            match app_config.blob_store {
                BlobStoreConfig::Directory(ref c) => {
                    assert_eq!(c.directory, "./tmp");
                    assert_eq!(c.prefix.as_deref(), Some("doc-files"));
                }
                ref other => panic!("💀 expected the directory blob store by default, got {other:?}"),
            }
            assert!(matches!(app_config.job_queue, JobQueueConfig::InMemory(_)));
            assert!(matches!(app_config.doc_store, DocumentStoreConfig::InMemory));
            assert_eq!(app_config.producer.event_type, "file.upload");
            assert_eq!(app_config.consumer.row_error_policy, RowErrorPolicy::Skip);
            Ok(())
        });
    }

    #[test]
    fn the_one_where_the_toml_file_picks_every_backend() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config_path = dir.path().join("rlx.toml");
        std::fs::write(
            &config_path,
            r#"
            [blob_store.Directory]
            directory = "/var/lib/rlx"
            prefix = "uploads"

            [job_queue.Spool]
            directory = "/var/spool/rlx"
            visibility_timeout_ms = 5000

            [doc_store.Ndjson]
            file_name = "/var/lib/rlx/docs.ndjson"

            [producer]
            event_type = "csv.upload"

            [consumer]
            row_error_policy = "reject_job"
            idle_shutdown_ms = 2500
            "#,
        )?;

        let app_config = load_config(Some(config_path.as_path()))?;

        assert!(matches!(
            app_config.blob_store,
            BlobStoreConfig::Directory(ref c) if c.directory == "/var/lib/rlx" && c.prefix.as_deref() == Some("uploads")
        ));
        match app_config.job_queue {
            JobQueueConfig::Spool(ref c) => {
                assert_eq!(c.directory, "/var/spool/rlx");
                assert_eq!(c.visibility_timeout_ms, 5000);
                assert_eq!(c.poll_interval_ms, 500);
            }
            ref other => panic!("💀 expected the spool queue, got {other:?}"),
        }
        assert!(matches!(
            app_config.doc_store,
            DocumentStoreConfig::Ndjson(ref c) if c.file_name == "/var/lib/rlx/docs.ndjson"
        ));
        assert_eq!(app_config.producer.event_type, "csv.upload");
        assert_eq!(app_config.consumer.row_error_policy, RowErrorPolicy::RejectJob);
        assert_eq!(app_config.consumer.idle_shutdown_ms, Some(2500));
        Ok(())
    }

    #[test]
    fn the_one_where_env_vars_reach_nested_keys() {
        Jail::expect_with(|jail| {
            jail.set_env("RLX_CONSUMER__ROW_ERROR_POLICY", "reject_job");
            jail.set_env("RLX_PRODUCER__EVENT_TYPE", "from.env");

            let app_config = load_config(None).map_err(|e| e.to_string())?;

            assert_eq!(app_config.consumer.row_error_policy, RowErrorPolicy::RejectJob);
            assert_eq!(app_config.producer.event_type, "from.env");
            Ok(())
        });
    }

    #[test]
    fn the_one_where_the_file_outranks_the_environment() {
        Jail::expect_with(|jail| {
            jail.set_env("RLX_PRODUCER__EVENT_TYPE", "from.env");
            jail.create_file(
                "rlx.toml",
                r#"
                [producer]
                event_type = "from.file"
                "#,
            )?;

            let app_config = load_config(Some(Path::new("rlx.toml"))).map_err(|e| e.to_string())?;
            assert_eq!(app_config.producer.event_type, "from.file");
            Ok(())
        });
    }
}
