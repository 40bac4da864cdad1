//! Re-posting participant uploads to the federated server.

use bytes::{Buf, Bytes};
use futures::TryStreamExt;
use reqwest::{
    multipart::{Form, Part},
    ClientBuilder,
};
use thiserror::Error;
use tracing::debug;
use url::Url;
use warp::multipart::FormData;

/// The upload of a participant, as received by the relay.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct UploadRequest {
    pub file: Option<Bytes>,
    pub client_id: Option<String>,
    pub cur_round: Option<String>,
    pub dataset_size: Option<String>,
    pub federated_server_url: Option<String>,
}

impl UploadRequest {
    /// Read all the parts of a multipart form. Unknown parts are ignored.
    pub async fn from_form(form: FormData) -> Result<Self, warp::Error> {
        let parts: Vec<(String, Vec<u8>)> = form
            .and_then(|mut part| async move {
                let mut data = Vec::new();
                while let Some(chunk) = part.data().await {
                    data.extend_from_slice(chunk?.chunk());
                }
                Ok::<_, warp::Error>((part.name().to_string(), data))
            })
            .try_collect()
            .await?;

        let mut request = Self::default();
        for (name, data) in parts {
            if name == "file" {
                request.file = Some(Bytes::from(data));
                continue;
            }
            let text = Some(String::from_utf8_lossy(&data).trim().to_string());
            match name.as_str() {
                "client_id" => request.client_id = text,
                "cur_round" => request.cur_round = text,
                "dataset_size" => request.dataset_size = text,
                "federated_server_url" => request.federated_server_url = text,
                other => debug!("ignoring form part {}", other),
            }
        }
        Ok(request)
    }

    /// The name under which the file is posted to the federated server.
    pub fn upstream_file_name(&self) -> String {
        format!("client_{}.pth", self.client_id.as_deref().unwrap_or_default())
    }
}

/// What the federated server answered.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: String,
}

/// Errors of the forwarder.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("No federated server URL given")]
    NoUpstream,
    #[error("invalid federated server URL {0}")]
    InvalidUpstream(String),
    #[error("federated server unreachable: {0}")]
    Unreachable(String),
}

#[derive(Debug, Clone)]
/// Posts participant uploads to the federated server.
pub struct Forwarder {
    client: reqwest::Client,
    default_upstream: Option<Url>,
}

impl Forwarder {
    pub fn new(default_upstream: Option<Url>) -> Result<Self, ForwardError> {
        let client = ClientBuilder::new()
            .build()
            .map_err(|e| ForwardError::Unreachable(e.to_string()))?;
        Ok(Self {
            client,
            default_upstream,
        })
    }

    /// The federated server to post to: the one named by the participant, or the default one.
    pub fn upstream_for(&self, request: &UploadRequest) -> Result<Url, ForwardError> {
        match request.federated_server_url.as_deref() {
            Some(url) if !url.is_empty() => {
                Url::parse(url).map_err(|_| ForwardError::InvalidUpstream(url.to_string()))
            }
            _ => self.default_upstream.clone().ok_or(ForwardError::NoUpstream),
        }
    }

    /// Post `file` with the metadata of `request` to the federated server.
    pub async fn forward(
        &self,
        request: &UploadRequest,
        file: Bytes,
    ) -> Result<UpstreamResponse, ForwardError> {
        let upstream = self.upstream_for(request)?;
        let url = format!(
            "{}/api/upload-client-weights",
            upstream.as_str().trim_end_matches('/')
        );

        let mut form = Form::new().part(
            "file",
            Part::bytes(file.to_vec()).file_name(request.upstream_file_name()),
        );
        let fields = [
            ("client_id", &request.client_id),
            ("cur_round", &request.cur_round),
            ("dataset_size", &request.dataset_size),
        ];
        for (name, value) in fields.iter() {
            if let Some(value) = value.as_ref() {
                form = form.text(*name, value.clone());
            }
        }

        debug!("forwarding {} bytes to {}", file.len(), url);
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ForwardError::Unreachable(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ForwardError::Unreachable(e.to_string()))?;
        Ok(UpstreamResponse { status, body })
    }
}
