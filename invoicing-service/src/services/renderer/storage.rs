use async_trait::async_trait;
use service_core::error::AppError;
use std::path::PathBuf;
use tokio::fs;

/// Public prefix under which stored documents are referenced.
pub const PUBLIC_PREFIX: &str = "/uploads";

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Store `data` under `name`, replacing any previous content, and return
    /// the reference recorded on the invoice.
    async fn put(&self, name: &str, data: Vec<u8>) -> Result<String, AppError>;

    /// Load the bytes behind a reference returned by `put`.
    async fn get(&self, reference: &str) -> Result<Vec<u8>, AppError>;
}

pub struct LocalDocumentStore {
    base_path: PathBuf,
}

impl LocalDocumentStore {
    pub async fn new(base_path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let base_path = base_path.into();
        if !base_path.exists() {
            fs::create_dir_all(&base_path).await?;
        }
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }
}

/// Flat file names only; anything that could escape the base directory is refused.
fn checked_name(name: &str) -> Result<&str, AppError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(name)
    } else {
        Err(AppError::BadRequest(anyhow::anyhow!(
            "Invalid document name: {}",
            name
        )))
    }
}

#[async_trait]
impl DocumentStore for LocalDocumentStore {
    async fn put(&self, name: &str, data: Vec<u8>) -> Result<String, AppError> {
        let name = checked_name(name)?;
        fs::write(self.base_path.join(name), data).await?;
        Ok(format!("{}/{}", PUBLIC_PREFIX, name))
    }

    async fn get(&self, reference: &str) -> Result<Vec<u8>, AppError> {
        let name = reference
            .strip_prefix(PUBLIC_PREFIX)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Unknown document reference: {}", reference))
            })?;
        let name = checked_name(name)?;

        match fs::read(self.base_path.join(name)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AppError::NotFound(
                anyhow::anyhow!("Document {} not found", reference),
            )),
            Err(e) => Err(e.into()),
        }
    }
}
