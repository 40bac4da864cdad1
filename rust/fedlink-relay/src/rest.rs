//! The REST API of the relay.

use std::{convert::Infallible, net::SocketAddr};

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};
use warp::{
    http::StatusCode,
    multipart::FormData,
    reply::{self, WithStatus},
    Filter,
};

use crate::{
    forward::{ForwardError, Forwarder, UploadRequest, UpstreamResponse},
    settings::ApiSettings,
};

/// Starts a HTTP server at the configured address. The server runs until `shutdown` resolves.
///
/// # Errors
/// Fails if the server cannot be bound to the configured address.
pub async fn serve(
    api_settings: ApiSettings,
    forwarder: Forwarder,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), RestError> {
    let routes = routes(forwarder, api_settings.max_upload_size);
    let (address, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(api_settings.bind_address, shutdown)?;
    info!("relay listening on {}", address);
    server.await;
    Ok(())
}

/// The filters of the relay, ready to be served.
pub fn routes(
    forwarder: Forwarder,
    max_upload_size: u64,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Infallible> + Clone {
    warp::path!("api" / "send-local-model")
        .and(warp::post())
        .and(warp::multipart::form().max_length(max_upload_size))
        .and(with_forwarder(forwarder))
        .and_then(handle_send_local_model)
        .recover(handle_reject)
        .with(warp::log("http"))
}

/// Handles and responds to an upload of a local model.
async fn handle_send_local_model(
    form: FormData,
    forwarder: Forwarder,
) -> Result<WithStatus<reply::Json>, Infallible> {
    let mut request = match UploadRequest::from_form(form).await {
        Ok(request) => request,
        Err(err) => {
            warn!("failed to read the upload form: {}", err);
            return Ok(failure(StatusCode::BAD_REQUEST, err.to_string()));
        }
    };
    let file = match request.file.take() {
        Some(file) => file,
        None => return Ok(failure(StatusCode::BAD_REQUEST, "No file received")),
    };

    let reply = match forwarder.forward(&request, file).await {
        Ok(response) => relay_response(response),
        Err(err @ ForwardError::Unreachable(_)) => {
            warn!("{}", err);
            failure(StatusCode::BAD_GATEWAY, err.to_string())
        }
        Err(err) => failure(StatusCode::BAD_REQUEST, err.to_string()),
    };
    Ok(reply)
}

/// Translates the answer of the federated server for the participant.
fn relay_response(response: UpstreamResponse) -> WithStatus<reply::Json> {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    if status.is_success() {
        let server_response =
            serde_json::from_str::<Value>(&response.body).unwrap_or(Value::String(response.body));
        reply::with_status(
            reply::json(&json!({ "success": true, "server_response": server_response })),
            StatusCode::OK,
        )
    } else {
        warn!("federated server rejected the upload with status {}", status);
        reply::with_status(
            reply::json(&json!({ "success": false, "server_response": response.body })),
            status,
        )
    }
}

fn failure(status: StatusCode, error: impl Into<String>) -> WithStatus<reply::Json> {
    reply::with_status(
        reply::json(&json!({ "success": false, "error": error.into() })),
        status,
    )
}

/// Converts a forwarder into a `warp` filter.
fn with_forwarder(
    forwarder: Forwarder,
) -> impl Filter<Extract = (Forwarder,), Error = Infallible> + Clone {
    warp::any().map(move || forwarder.clone())
}

/// Handles `warp` rejections of bad requests.
async fn handle_reject(err: warp::Rejection) -> Result<impl warp::Reply, Infallible> {
    let code = if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        StatusCode::METHOD_NOT_ALLOWED
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        StatusCode::PAYLOAD_TOO_LARGE
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        StatusCode::UNSUPPORTED_MEDIA_TYPE
    } else {
        StatusCode::BAD_REQUEST
    };
    Ok(failure(code, code.canonical_reason().unwrap_or("bad request")))
}

#[derive(Debug, Error)]
/// Errors of the REST API.
pub enum RestError {
    #[error("failed to bind the REST API: {0}")]
    Bind(#[from] warp::Error),
}
