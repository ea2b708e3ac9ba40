//! HTTP client for the Gridstore table service.

use futures::{Stream, TryStreamExt, stream};
use gridstore_types::{
    BatchWriteRequest, BatchWriteResponse, ListTablesResponse, PutItemRequest, ScanOutput,
    ScanPage, TableDefinition, TableDescription,
};
use reqwest::{IntoUrl, Method, StatusCode};
use secrecy::{ExposeSecret, Secret};
use url::Url;

pub use gridstore_types::{Item, ScanRequest, WriteRequest};

/// Primary error type for the [`Client`]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("base URL error: {0}")]
    BaseUrl(#[source] reqwest::Error),

    #[error("request URL error: {0}")]
    RequestUrl(#[from] url::ParseError),

    #[error("failed to parse JSON response: {0}")]
    Json(#[source] reqwest::Error),

    #[error("failed to parse plaintext response: {0}")]
    Text(#[source] reqwest::Error),

    #[error("table {table_name:?} does not exist")]
    TableNotFound { table_name: String },

    #[error("server responded with error [{code}]: {message}")]
    ApiError { code: StatusCode, message: String },

    #[error("failed to send {method} {url} request: {source}")]
    RequestSend {
        method: Method,
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl Error {
    fn request_send(method: Method, url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::RequestSend {
            method,
            url: url.into(),
            source,
        }
    }

    /// Whether this error bottoms out in a refused TCP connection, i.e. the
    /// endpoint is not listening at all.
    pub fn is_connection_refused(&self) -> bool {
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            if let Some(io) = err.downcast_ref::<std::io::Error>() {
                if io.kind() == std::io::ErrorKind::ConnectionRefused {
                    return true;
                }
            }
            source = err.source();
        }
        false
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Where a [`Client`] points and how it authenticates.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    region: String,
    endpoint: Url,
    auth_token: Option<Secret<String>>,
}

impl ConnectionConfig {
    /// Configuration for an arbitrary endpoint, labeled with `region`.
    pub fn new<U: IntoUrl>(region: impl Into<String>, endpoint: U) -> Result<Self> {
        Ok(Self {
            region: region.into(),
            endpoint: endpoint.into_url().map_err(Error::BaseUrl)?,
            auth_token: None,
        })
    }

    /// Configuration for the live service in `region`.
    pub fn live(region: impl Into<String>) -> Result<Self> {
        let region = region.into();
        let endpoint = format!("https://tables.{region}.gridstore.io");
        Self::new(region, endpoint)
    }

    /// Configuration for a local emulator listening on `port`.
    ///
    /// The region is reported as `local`.
    pub fn local(port: u16) -> Result<Self> {
        Self::new("local", format!("http://127.0.0.1:{port}"))
    }

    /// Replace the endpoint, keeping the region label.
    pub fn with_endpoint<U: IntoUrl>(mut self, endpoint: U) -> Result<Self> {
        self.endpoint = endpoint.into_url().map_err(Error::BaseUrl)?;
        Ok(self)
    }

    /// Set the `Bearer` token that will be sent with each request.
    pub fn with_auth_token<S: Into<String>>(mut self, auth_token: S) -> Self {
        self.auth_token = Some(Secret::new(auth_token.into()));
        self
    }

    /// The region label this configuration points at.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// The endpoint requests are sent to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// Table-administration handle for a Gridstore endpoint.
///
/// Item operations on a particular table go through [`Client::table`].
#[derive(Debug, Clone)]
pub struct Client {
    config: ConnectionConfig,
    /// A [`reqwest::Client`] for handling HTTP requests
    http_client: reqwest::Client,
}

impl Client {
    /// Create a new [`Client`] for the given connection.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            http_client: reqwest::Client::new(),
        }
    }

    /// The connection this client was built from.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Make a request to the `GET /health` API.
    pub async fn health(&self) -> Result<()> {
        let url = self.config.endpoint.join("/health")?;
        let mut req = self.http_client.get(url);
        if let Some(token) = &self.config.auth_token {
            req = req.bearer_auth(token.expose_secret());
        }
        let resp = req
            .send()
            .await
            .map_err(|src| Error::request_send(Method::GET, "/health", src))?;
        match resp.status() {
            StatusCode::OK => Ok(()),
            code => Err(Error::ApiError {
                code,
                message: resp.text().await.map_err(Error::Text)?,
            }),
        }
    }

    /// Make a request to the `POST /api/v1/tables` API.
    ///
    /// The service answers with the created table's description; its status
    /// starts out `CREATING` until provisioning finishes.
    pub async fn create_table(&self, definition: &TableDefinition) -> Result<TableDescription> {
        let api_path = "/api/v1/tables";
        let url = self.config.endpoint.join(api_path)?;
        let mut req = self.http_client.post(url).json(definition);
        if let Some(token) = &self.config.auth_token {
            req = req.bearer_auth(token.expose_secret());
        }
        let resp = req
            .send()
            .await
            .map_err(|src| Error::request_send(Method::POST, api_path, src))?;
        match resp.status() {
            StatusCode::CREATED => resp.json().await.map_err(Error::Json),
            code => Err(Error::ApiError {
                code,
                message: resp.text().await.map_err(Error::Text)?,
            }),
        }
    }

    /// Make a request to the `GET /api/v1/tables` API.
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let api_path = "/api/v1/tables";
        let url = self.config.endpoint.join(api_path)?;
        let mut req = self.http_client.get(url);
        if let Some(token) = &self.config.auth_token {
            req = req.bearer_auth(token.expose_secret());
        }
        let resp = req
            .send()
            .await
            .map_err(|src| Error::request_send(Method::GET, api_path, src))?;
        match resp.status() {
            StatusCode::OK => {
                let list: ListTablesResponse = resp.json().await.map_err(Error::Json)?;
                Ok(list.tables)
            }
            code => Err(Error::ApiError {
                code,
                message: resp.text().await.map_err(Error::Text)?,
            }),
        }
    }

    /// Make a request to the `GET /api/v1/tables/{name}` API.
    pub async fn describe_table(&self, table_name: &str) -> Result<TableDescription> {
        let api_path = format!("/api/v1/tables/{table_name}");
        let url = self.config.endpoint.join(&api_path)?;
        let mut req = self.http_client.get(url);
        if let Some(token) = &self.config.auth_token {
            req = req.bearer_auth(token.expose_secret());
        }
        let resp = req
            .send()
            .await
            .map_err(|src| Error::request_send(Method::GET, api_path, src))?;
        match resp.status() {
            StatusCode::OK => resp.json().await.map_err(Error::Json),
            StatusCode::NOT_FOUND => Err(Error::TableNotFound {
                table_name: table_name.to_owned(),
            }),
            code => Err(Error::ApiError {
                code,
                message: resp.text().await.map_err(Error::Text)?,
            }),
        }
    }

    /// Make a request to the `DELETE /api/v1/tables/{name}` API.
    pub async fn delete_table(&self, table_name: &str) -> Result<()> {
        let api_path = format!("/api/v1/tables/{table_name}");
        let url = self.config.endpoint.join(&api_path)?;
        let mut req = self.http_client.delete(url);
        if let Some(token) = &self.config.auth_token {
            req = req.bearer_auth(token.expose_secret());
        }
        let resp = req
            .send()
            .await
            .map_err(|src| Error::request_send(Method::DELETE, api_path, src))?;
        match resp.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => Err(Error::TableNotFound {
                table_name: table_name.to_owned(),
            }),
            code => Err(Error::ApiError {
                code,
                message: resp.text().await.map_err(Error::Text)?,
            }),
        }
    }

    /// An item-operations handle for the named table.
    pub fn table(&self, table_name: impl Into<String>) -> TableClient {
        TableClient {
            client: self.clone(),
            table_name: table_name.into(),
        }
    }
}

/// Item operations on one table.
///
/// Produced by [`Client::table`].
#[derive(Debug, Clone)]
pub struct TableClient {
    client: Client,
    table_name: String,
}

impl TableClient {
    /// The table this handle operates on.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Make a request to the `POST /api/v1/tables/{name}/items` API.
    pub async fn put_item(&self, item: Item) -> Result<()> {
        let api_path = format!("/api/v1/tables/{}/items", self.table_name);
        let url = self.client.config.endpoint.join(&api_path)?;
        let mut req = self
            .client
            .http_client
            .post(url)
            .json(&PutItemRequest { item });
        if let Some(token) = &self.client.config.auth_token {
            req = req.bearer_auth(token.expose_secret());
        }
        let resp = req
            .send()
            .await
            .map_err(|src| Error::request_send(Method::POST, api_path, src))?;
        match resp.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => Err(Error::TableNotFound {
                table_name: self.table_name.clone(),
            }),
            code => Err(Error::ApiError {
                code,
                message: resp.text().await.map_err(Error::Text)?,
            }),
        }
    }

    /// Make a request to the `POST /api/v1/tables/{name}/batch` API.
    ///
    /// Returns the unprocessed residue of the batch; the caller is expected
    /// to resubmit it. Batches over [`MAX_BATCH_ITEMS`] entries are rejected
    /// by the service.
    ///
    /// [`MAX_BATCH_ITEMS`]: gridstore_types::MAX_BATCH_ITEMS
    pub async fn batch_write(&self, requests: Vec<WriteRequest>) -> Result<Vec<WriteRequest>> {
        let api_path = format!("/api/v1/tables/{}/batch", self.table_name);
        let url = self.client.config.endpoint.join(&api_path)?;
        let mut req = self
            .client
            .http_client
            .post(url)
            .json(&BatchWriteRequest { requests });
        if let Some(token) = &self.client.config.auth_token {
            req = req.bearer_auth(token.expose_secret());
        }
        let resp = req
            .send()
            .await
            .map_err(|src| Error::request_send(Method::POST, api_path, src))?;
        match resp.status() {
            StatusCode::OK => {
                let response: BatchWriteResponse = resp.json().await.map_err(Error::Json)?;
                Ok(response.unprocessed)
            }
            StatusCode::NOT_FOUND => Err(Error::TableNotFound {
                table_name: self.table_name.clone(),
            }),
            code => Err(Error::ApiError {
                code,
                message: resp.text().await.map_err(Error::Text)?,
            }),
        }
    }

    /// Fetch a single scan page. Most callers want [`TableClient::scan`].
    pub async fn scan_page(&self, request: &ScanRequest) -> Result<ScanPage> {
        let api_path = format!("/api/v1/tables/{}/scan", self.table_name);
        let url = self.client.config.endpoint.join(&api_path)?;
        let mut req = self.client.http_client.post(url).json(request);
        if let Some(token) = &self.client.config.auth_token {
            req = req.bearer_auth(token.expose_secret());
        }
        let resp = req
            .send()
            .await
            .map_err(|src| Error::request_send(Method::POST, api_path, src))?;
        match resp.status() {
            StatusCode::OK => resp.json().await.map_err(Error::Json),
            StatusCode::NOT_FOUND => Err(Error::TableNotFound {
                table_name: self.table_name.clone(),
            }),
            code => Err(Error::ApiError {
                code,
                message: resp.text().await.map_err(Error::Text)?,
            }),
        }
    }

    /// Compose a request to the `POST /api/v1/tables/{name}/scan` API.
    pub fn scan(&self) -> ScanRequestBuilder {
        ScanRequestBuilder {
            table: self.clone(),
            request: ScanRequest::default(),
        }
    }
}

/// Builder type for composing a scan request.
///
/// Produced by [`TableClient::scan`].
#[derive(Debug)]
pub struct ScanRequestBuilder {
    table: TableClient,
    request: ScanRequest,
}

impl ScanRequestBuilder {
    /// Request a strongly consistent scan.
    pub fn consistent_read(mut self, set_to: bool) -> Self {
        self.request.consistent_read = set_to;
        self
    }

    /// Cap the number of items per page. The service may return fewer.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.request.page_size = Some(page_size);
        self
    }

    /// Resume after this key, exclusive.
    pub fn start_key(mut self, start_key: Item) -> Self {
        self.request.start_key = Some(start_key);
        self
    }

    /// Run the scan to completion, following page boundaries, and return
    /// the aggregated output.
    pub async fn send(self) -> Result<ScanOutput> {
        let mut output = ScanOutput::default();
        let mut request = self.request;
        loop {
            let page = self.table.scan_page(&request).await?;
            let last_key = page.last_key.clone();
            output.push_page(page);
            match last_key {
                Some(key) => request.start_key = Some(key),
                None => return Ok(output),
            }
        }
    }

    /// Turn the scan into a lazy stream of items, fetching pages on demand.
    pub fn into_stream(self) -> impl Stream<Item = Result<Item>> + Send {
        let Self { table, request } = self;
        stream::try_unfold(Some((table, request)), |state| async move {
            let Some((table, request)) = state else {
                return Ok::<_, Error>(None);
            };
            let page = table.scan_page(&request).await?;
            let next = page.last_key.clone().map(|last_key| {
                (
                    table,
                    ScanRequest {
                        start_key: Some(last_key),
                        ..request
                    },
                )
            });
            Ok(Some((page, next)))
        })
        .map_ok(|page: ScanPage| stream::iter(page.items.into_iter().map(Ok::<_, Error>)))
        .try_flatten()
    }
}
