//! Streaming MD5 digests used for content deduplication.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

const CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("failed to read {path} while hashing: {source}")]
    Io { path: PathBuf, source: io::Error },
}

pub type HashResult<T> = std::result::Result<T, HashError>;

/// Lowercase 32-character hex MD5 of a local file, read in fixed-size chunks.
pub async fn digest_file(path: &Path) -> HashResult<String> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|source| HashError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    digest_reader(file).await.map_err(|source| HashError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub async fn digest_reader<R>(mut reader: R) -> io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut context = md5::Context::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        context.consume(&buffer[..read]);
    }
    Ok(hex::encode(context.compute().0))
}

pub fn digest_bytes(data: &[u8]) -> String {
    hex::encode(md5::compute(data).0)
}
