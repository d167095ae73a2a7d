use super::types::{ByteSink, LocalSink};
use async_trait::async_trait;
use std::io;
use std::path::Path;
use tokio::fs::File;

/// Writes transfers to the local filesystem, creating parent directories as needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSink;

#[async_trait]
impl LocalSink for FsSink {
    async fn open_local_sink(&self, local_path: &Path) -> io::Result<ByteSink> {
        if let Some(parent) = local_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file = File::create(local_path).await?;
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn fs_sink_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/out.bin");

        let mut sink = FsSink.open_local_sink(&path).await.unwrap();
        sink.write_all(b"payload").await.unwrap();
        sink.shutdown().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"payload");
    }
}
