use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::{
    multipart::{Form, Part},
    ClientBuilder,
};
use serde::Deserialize;
use tokio::task;
use tracing::{debug, warn};
use url::Url;

use super::{api_url, TransferError};
use crate::{TransferChannel, TransferProgress};
use fedlink_core::{storage::StagedFile, RoundNumber};

/// The default size of the buffer flushed to disk during downloads: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone)]
/// A transfer channel talking HTTP.
pub struct HttpChannel {
    /// HTTP client
    client: reqwest::Client,
    /// Number of bytes buffered before they are written to disk and progress is reported
    chunk_size: usize,
}

impl HttpChannel {
    /// Creates a new HTTP channel.
    pub fn new(chunk_size: usize) -> Result<Self, TransferError> {
        let client = ClientBuilder::new()
            .build()
            .map_err(|e| TransferError::RemoteUnavailable(e.to_string()))?;
        Ok(Self::with_client(client, chunk_size))
    }

    /// Creates a new HTTP channel on top of an existing client.
    pub fn with_client(client: reqwest::Client, chunk_size: usize) -> Self {
        Self {
            client,
            chunk_size: chunk_size.max(1),
        }
    }
}

#[derive(Deserialize)]
struct CurrentRound {
    current_round: RoundNumber,
}

fn unavailable(e: reqwest::Error) -> TransferError {
    TransferError::RemoteUnavailable(e.to_string())
}

#[async_trait]
impl TransferChannel for HttpChannel {
    async fn download(
        &mut self,
        url: &Url,
        destination: &Path,
        progress: &mut (dyn FnMut(TransferProgress) + Send),
    ) -> Result<u64, TransferError> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(unavailable)?;
        if !response.status().is_success() {
            return Err(TransferError::RemoteUnavailable(format!(
                "{} answered with status {}",
                url,
                response.status()
            )));
        }

        let total = response.content_length();
        let mut staged = StagedFile::new(destination)?;
        let mut buffer = BytesMut::with_capacity(self.chunk_size);
        let mut transferred = 0_u64;
        progress(TransferProgress { transferred, total });

        // dropping `staged` on any early return discards the partial download
        loop {
            let chunk = match response.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    warn!("download of {} interrupted after {} bytes", url, transferred);
                    return Err(TransferError::TransferInterrupted(e.to_string()));
                }
            };
            transferred += chunk.len() as u64;
            buffer.extend_from_slice(&chunk);
            if buffer.len() >= self.chunk_size {
                staged = flush(staged, buffer.split().freeze(), destination).await?;
                progress(TransferProgress { transferred, total });
            }
        }
        if !buffer.is_empty() {
            staged = flush(staged, buffer.split().freeze(), destination).await?;
            progress(TransferProgress { transferred, total });
        }

        if let Some(total) = total {
            if transferred < total {
                return Err(TransferError::TransferInterrupted(format!(
                    "received {} of {} bytes",
                    transferred, total
                )));
            }
        }
        let target = destination.to_path_buf();
        task::spawn_blocking(move || staged.commit())
            .await
            .map_err(|e| join_error(target, e))??;
        debug!("downloaded {} bytes from {}", transferred, url);
        Ok(transferred)
    }

    async fn upload(
        &mut self,
        url: &Url,
        file: &Path,
        fields: &[(String, String)],
    ) -> Result<serde_json::Value, TransferError> {
        let bytes = tokio::fs::read(file)
            .await
            .map_err(|source| TransferError::Io {
                path: file.to_path_buf(),
                source,
            })?;
        let file_name = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "checkpoint.pth".to_string());

        let mut form = Form::new().part("file", Part::bytes(bytes).file_name(file_name));
        for (name, value) in fields {
            form = form.text(name.clone(), value.clone());
        }

        let response = self
            .client
            .post(url.clone())
            .multipart(form)
            .send()
            .await
            .map_err(unavailable)?;
        let status = response.status();
        let body = response.text().await.map_err(unavailable)?;
        if !status.is_success() {
            return Err(TransferError::RemoteRejected {
                status: status.as_u16(),
                body,
            });
        }
        debug!("uploaded {} to {}", file.display(), url);
        Ok(serde_json::from_str(&body).unwrap_or_else(|_| serde_json::Value::String(body)))
    }

    async fn current_round(&mut self, server_url: &Url) -> Result<RoundNumber, TransferError> {
        let url = api_url(server_url, "get-current-round");
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(unavailable)?;
        if !response.status().is_success() {
            return Err(TransferError::RemoteUnavailable(format!(
                "{} answered with status {}",
                url,
                response.status()
            )));
        }
        let body = response.bytes().await.map_err(unavailable)?;
        serde_json::from_slice::<CurrentRound>(&body)
            .map(|round| round.current_round)
            .map_err(|e| TransferError::Deserialize(e.to_string()))
    }
}

/// Append `chunk` to the staged download on the blocking thread pool.
async fn flush(
    mut staged: StagedFile,
    chunk: Bytes,
    destination: &Path,
) -> Result<StagedFile, TransferError> {
    let path = destination.to_path_buf();
    task::spawn_blocking(move || match staged.write_all(&chunk) {
        Ok(()) => Ok(staged),
        Err(source) => Err(TransferError::Io { path, source }),
    })
    .await
    .map_err(|e| join_error(destination.to_path_buf(), e))?
}

fn join_error(path: PathBuf, e: task::JoinError) -> TransferError {
    TransferError::Io {
        path,
        source: io::Error::new(io::ErrorKind::Other, e.to_string()),
    }
}
