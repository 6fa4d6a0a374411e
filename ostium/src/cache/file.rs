use std::{error, io, path::PathBuf};

use async_trait::async_trait;
use tokio::fs::OpenOptions;

use super::CachePersistence;

/// Persists the token cache to a local file
///
/// On Unix the file is created readable and writable only by its owner.
#[derive(Debug)]
pub struct FilePersistence {
    path: PathBuf,
}

impl FilePersistence {
    /// Constructs a new file persistence hook
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_blob(&self) -> Result<Option<Vec<u8>>, io::Error> {
        use tokio::io::AsyncReadExt;

        let mut file = match OpenOptions::new().read(true).open(&self.path).await {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };

        let mut data = Vec::new();
        file.read_to_end(&mut data).await?;
        Ok(Some(data))
    }

    async fn write_blob(&self, blob: &[u8]) -> Result<(), io::Error> {
        use tokio::io::AsyncWriteExt;

        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        file_opts.mode(0o600);

        let mut file = file_opts.open(&self.path).await?;
        file.write_all(blob).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl CachePersistence for FilePersistence {
    async fn load(&self) -> Result<Option<Vec<u8>>, Box<dyn error::Error + Send + Sync + 'static>> {
        Ok(self.read_blob().await?)
    }

    async fn save(&self, blob: &[u8]) -> Result<(), Box<dyn error::Error + Send + Sync + 'static>> {
        Ok(self.write_blob(blob).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use color_eyre::Result;
    use ostium_clock::UnixTime;

    use super::*;
    use crate::{
        authority::Authority,
        braids::{AccessToken, ClientId},
        cache::{TokenCache, TokenCacheEntry, TokenCacheKey},
    };

    #[tokio::test]
    async fn missing_file_restores_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = TokenCache::new()
            .with_persistence(Arc::new(FilePersistence::new(dir.path().join("cache.json"))));

        assert!(!cache.restore().await?);
        assert_eq!(cache.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn persisted_cache_is_restored() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("cache.json");

        let cache = TokenCache::new().with_persistence(Arc::new(FilePersistence::new(&path)));
        cache.store(
            TokenCacheKey::new(
                &Authority::parse("https://login.example.com/contoso")?,
                "api",
                &ClientId::from_static("client-1"),
                None,
                false,
            ),
            TokenCacheEntry::new(AccessToken::new("AT1".into()), UnixTime(1_000)),
        );
        cache.persist().await?;

        let restored = TokenCache::new().with_persistence(Arc::new(FilePersistence::new(&path)));
        assert!(restored.restore().await?);
        assert_eq!(restored.read_items(), cache.read_items());
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_is_private_to_owner() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("cache.json");
        FilePersistence::new(&path).save(b"{}").await.map_err(|e| color_eyre::eyre::eyre!(e))?;

        let mode = std::fs::metadata(&path)?.permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        Ok(())
    }
}
