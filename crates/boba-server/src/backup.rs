//! Debounced database backup to S3-compatible object storage.
//!
//! Every successful mutation schedules a backup; the upload only runs
//! once the database has been quiet for the configured window, so a
//! burst of writes produces a single upload.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::BackupConfig;
use crate::error::AppError;

/// Handle used by request handlers to signal "the database changed".
#[derive(Clone)]
pub struct BackupHandle {
    tx: mpsc::UnboundedSender<()>,
}

impl BackupHandle {
    pub fn schedule(&self) {
        // A dropped worker means shutdown is in progress; nothing to do.
        let _ = self.tx.send(());
    }
}

/// Spawn the backup worker for the database at `db_path`.
pub fn spawn(config: BackupConfig, db_path: PathBuf, window: Duration) -> BackupHandle {
    let storage = Arc::new(BackupStorage::new(config));
    spawn_with_uploader(window, move || {
        let storage = Arc::clone(&storage);
        let db_path = db_path.clone();
        async move { storage.upload_database(&db_path).await }
    })
}

/// Trailing-edge debounce loop: the first signal opens a window, every
/// further signal restarts it, and the upload fires when a full window
/// passes without a signal.
fn spawn_with_uploader<F, Fut>(window: Duration, mut upload: F) -> BackupHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), AppError>> + Send,
{
    let (tx, mut rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while rx.recv().await.is_some() {
            let mut deadline = Instant::now() + window;
            loop {
                match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(Some(())) => deadline = Instant::now() + window,
                    Ok(None) => return,
                    Err(_) => break,
                }
            }
            if let Err(error) = upload().await {
                tracing::warn!(%error, "database backup failed");
            } else {
                tracing::info!("database backup uploaded");
            }
        }
    });

    BackupHandle { tx }
}

struct BackupStorage {
    config: BackupConfig,
}

impl BackupStorage {
    const fn new(config: BackupConfig) -> Self {
        Self { config }
    }

    /// Object key is stable so the bucket holds a mirror of the current
    /// database, not an unbounded history.
    fn object_key(&self) -> String {
        self.config.key_prefix.as_deref().map_or_else(
            || "backups/boba.db".to_string(),
            |prefix| format!("{prefix}/boba.db"),
        )
    }

    async fn upload_database(&self, db_path: &std::path::Path) -> Result<(), AppError> {
        let bytes = tokio::fs::read(db_path).await?;
        let key = self.object_key();

        self.s3_client()
            .put_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .body(ByteStream::from(bytes))
            .content_type("application/vnd.sqlite3")
            .send()
            .await
            .map_err(|error| {
                AppError::internal(format!(
                    "S3 put_object failed for {}/{key}: {error}",
                    self.config.bucket
                ))
            })?;

        Ok(())
    }

    fn s3_client(&self) -> Client {
        let credentials = Credentials::new(
            self.config.access_key_id.clone(),
            self.config.secret_access_key.clone(),
            None,
            None,
            "boba-server-backup",
        );

        let mut builder = aws_sdk_s3::config::Builder::new()
            .region(Region::new(self.config.region.clone()))
            .credentials_provider(credentials);
        if let Some(endpoint) = &self.config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Client::from_conf(builder.build())
    }
}
