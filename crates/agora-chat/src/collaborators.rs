use std::collections::HashSet;
use std::future::Future;
use std::path::{Component, Path, PathBuf};

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use agora_types::events::GatewayEvent;

// -- File storage --

/// Object storage holding the bytes behind image/file messages.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Remove an object. Removing an object that does not exist succeeds.
    async fn delete_object(&self, object_key: &str) -> Result<()>;
}

/// Objects stored as flat files under a directory, keyed by relative path.
pub struct LocalFileStore {
    dir: PathBuf,
}

impl LocalFileStore {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("File storage directory: {}", dir.display());
        Ok(Self { dir })
    }

    /// Resolve an object key to a path inside the storage directory.
    /// Keys with absolute or parent components are rejected.
    pub fn object_path(&self, object_key: &str) -> Result<PathBuf> {
        let key = Path::new(object_key);
        if object_key.is_empty() || !key.components().all(|c| matches!(c, Component::Normal(_))) {
            bail!("invalid object key '{}'", object_key);
        }
        Ok(self.dir.join(key))
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn delete_object(&self, object_key: &str) -> Result<()> {
        let path = self.object_path(object_key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted object {}", object_key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Object {} already gone", object_key);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

// -- File security --

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileVerdict {
    Accept { sanitized_name: String },
    Reject { reason: String },
}

/// Screens attachment names before a file message is stored.
#[async_trait]
pub trait FileSecurity: Send + Sync {
    async fn inspect(&self, file_name: &str) -> FileVerdict;
}

const DEFAULT_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "pdf", "txt", "md", "doc", "docx", "zip",
];

/// Accepts names whose extension is on the allowlist. Directory components
/// are dropped and anything outside `[A-Za-z0-9._-]` becomes `_`.
pub struct ExtensionAllowlist {
    extensions: HashSet<String>,
}

impl ExtensionAllowlist {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    /// Parse a comma-separated list such as `"png,jpg,pdf"`.
    pub fn from_csv(list: &str) -> Self {
        Self::new(list.split(','))
    }

    fn sanitize(file_name: &str) -> String {
        let base = file_name.rsplit(['/', '\\']).next().unwrap_or_default();
        base.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect::<String>()
            .trim_start_matches('.')
            .to_string()
    }
}

impl Default for ExtensionAllowlist {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSIONS)
    }
}

#[async_trait]
impl FileSecurity for ExtensionAllowlist {
    async fn inspect(&self, file_name: &str) -> FileVerdict {
        let sanitized = Self::sanitize(file_name);
        let extension = match sanitized.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
            _ => {
                return FileVerdict::Reject {
                    reason: "file name has no extension".into(),
                };
            }
        };

        if !self.extensions.contains(&extension) {
            return FileVerdict::Reject {
                reason: format!("file type '.{}' is not allowed", extension),
            };
        }

        FileVerdict::Accept {
            sanitized_name: sanitized,
        }
    }
}

// -- Broadcast --

/// Fan-out of state changes to the connected sessions of `audience`.
/// Delivery is fire-and-forget; implementations log their own failures.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn publish(&self, audience: &[Uuid], event: GatewayEvent);
}

pub struct NoopBroadcaster;

#[async_trait]
impl Broadcaster for NoopBroadcaster {
    async fn publish(&self, _audience: &[Uuid], _event: GatewayEvent) {}
}

/// Run a best-effort side action, retrying it once on failure.
pub(crate) async fn retry_once<F, Fut, T>(what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(first) => {
            debug!("{} failed, retrying once: {}", what, first);
            op().await
        }
    }
}
