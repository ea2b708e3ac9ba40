//! HTTP surface of the emulator: one service function routing the table
//! and item APIs onto the in-memory store.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use gridstore_types::{
    BatchWriteRequest, BatchWriteResponse, ErrorResponse, ListTablesResponse, PutItemRequest,
    ScanRequest, TableDefinition,
};
use hyper::header::CONTENT_TYPE;
use hyper::{Body, Method, Request, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::store::{StoreError, TableStore};

#[derive(Debug, Error)]
pub(crate) enum RequestError {
    /// The requested path has no registered handler.
    #[error("not found")]
    NoHandler,

    #[error("error reading request body: {0}")]
    ReadingBody(#[source] hyper::Error),

    #[error("invalid request body: {0}")]
    InvalidRequestBody(#[source] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RequestError {
    fn status(&self) -> StatusCode {
        match self {
            Self::NoHandler => StatusCode::NOT_FOUND,
            Self::ReadingBody(_) | Self::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::Store(StoreError::TableExists { .. }) => StatusCode::CONFLICT,
            Self::Store(StoreError::TableNotFound { .. }) => StatusCode::NOT_FOUND,
            Self::Store(StoreError::MissingKeyAttribute(_))
            | Self::Store(StoreError::BatchTooLarge { .. }) => StatusCode::BAD_REQUEST,
        }
    }

    fn into_response(self) -> Response<Body> {
        let body = ErrorResponse {
            error: self.to_string(),
        };
        json_response(self.status(), &body)
    }
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    let json = serde_json::to_string(value).unwrap();
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(json))
        .unwrap()
}

async fn read_json<T: DeserializeOwned>(req: Request<Body>) -> Result<T, RequestError> {
    let body = hyper::body::to_bytes(req.into_body())
        .await
        .map_err(RequestError::ReadingBody)?;
    serde_json::from_slice(&body).map_err(RequestError::InvalidRequestBody)
}

pub(crate) async fn route_request(
    store: Arc<TableStore>,
    latency: Duration,
    scan_page_size: usize,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }

    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let response = match perform_request(store, scan_page_size, req).await {
        Ok(response) => response,
        Err(error) => {
            debug!(%method, %path, %error, "request failed");
            error.into_response()
        }
    };
    debug!(%method, %path, status = %response.status(), "processed request");
    Ok(response)
}

async fn perform_request(
    store: Arc<TableStore>,
    scan_page_size: usize,
    req: Request<Body>,
) -> Result<Response<Body>, RequestError> {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    match (method, path.as_str()) {
        (Method::GET, "/health") => Ok(Response::new(Body::empty())),
        (Method::POST, "/api/v1/tables") => {
            let definition: TableDefinition = read_json(req).await?;
            let description = store.create_table(definition)?;
            Ok(json_response(StatusCode::CREATED, &description))
        }
        (Method::GET, "/api/v1/tables") => Ok(json_response(
            StatusCode::OK,
            &ListTablesResponse {
                tables: store.list_tables(),
            },
        )),
        (method, path) => {
            let Some(rest) = path.strip_prefix("/api/v1/tables/") else {
                return Err(RequestError::NoHandler);
            };
            match (method, rest.split_once('/')) {
                (Method::GET, None) => {
                    Ok(json_response(StatusCode::OK, &store.describe_table(rest)?))
                }
                (Method::DELETE, None) => {
                    store.delete_table(rest)?;
                    Ok(Response::new(Body::empty()))
                }
                (Method::POST, Some((table_name, "items"))) => {
                    let put: PutItemRequest = read_json(req).await?;
                    store.put_item(table_name, put.item)?;
                    Ok(Response::new(Body::empty()))
                }
                (Method::POST, Some((table_name, "batch"))) => {
                    let batch: BatchWriteRequest = read_json(req).await?;
                    let unprocessed = store.batch_write(table_name, batch.requests)?;
                    Ok(json_response(
                        StatusCode::OK,
                        &BatchWriteResponse { unprocessed },
                    ))
                }
                (Method::POST, Some((table_name, "scan"))) => {
                    let request: ScanRequest = read_json(req).await?;
                    let page = store.scan(table_name, &request, scan_page_size)?;
                    Ok(json_response(StatusCode::OK, &page))
                }
                _ => Err(RequestError::NoHandler),
            }
        }
    }
}
