//! Transfer channels.

mod http;

use std::{io, path::PathBuf};

use thiserror::Error;
use url::Url;

pub use self::http::{HttpChannel, DEFAULT_CHUNK_SIZE};
use fedlink_core::storage::StorageError;

/// Error returned by a [`TransferChannel`](crate::TransferChannel).
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("request rejected with status {status}: {body}")]
    RemoteRejected { status: u16, body: String },

    #[error("transfer interrupted: {0}")]
    TransferInterrupted(String),

    #[error("failed to deserialize data: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("I/O on {} failed: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Build `{base}/api/{endpoint}`, keeping any path prefix of `base`.
pub fn api_url(base: &Url, endpoint: &str) -> Url {
    let mut url = base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push("api").push(endpoint);
    }
    url
}
