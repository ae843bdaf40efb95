//! HTTP client for the RabbitMQ management API.
//!
//! # Example
//!
//! ```rust,no_run
//! use bunny_rmq::ManagementClient;
//!
//! # async fn example() -> bunny_rmq::Result<()> {
//! let client = ManagementClient::new("http://localhost:15672", "guest", "guest")?;
//! let overview = client.overview().await?;
//! println!("RabbitMQ {}", overview.rabbitmq_version);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use crate::error::{Result, RmqError};
use crate::types::{
    BindingInfo, BindingSettings, ClusterName, ConnectionInfo, ErrorBody, ExchangeInfo,
    ExchangeSettings, FetchedMessage, GetMessagesRequest, Overview, PermissionInfo, Permissions,
    PublishRequest, PublishResponse, QueueInfo, QueueSettings, UserInfo, UserSettings, VhostInfo,
    VhostSettings,
};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Name the API uses for the nameless default exchange.
const DEFAULT_EXCHANGE: &str = "amq.default";

/// Authenticated client for one management endpoint.
#[derive(Clone)]
pub struct ManagementClient {
    endpoint: Url,
    username: String,
    password: String,
    tls: bool,
    http: reqwest::Client,
}

impl std::fmt::Debug for ManagementClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagementClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("username", &self.username)
            .field("tls", &self.tls)
            .finish_non_exhaustive()
    }
}

impl ManagementClient {
    /// Create a client for `endpoint` with the default request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not an absolute `http(s)` URL or
    /// the HTTP client cannot be built.
    pub fn new(endpoint: &str, username: &str, password: &str) -> Result<Self> {
        Self::with_timeout(endpoint, username, password, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client with a custom request timeout.
    ///
    /// A TLS-capable transport is selected when the endpoint starts with
    /// `https://` (case-insensitive); plain HTTP otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is invalid or the HTTP client cannot
    /// be built.
    pub fn with_timeout(
        endpoint: &str,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let url = Url::parse(endpoint)
            .map_err(|e| RmqError::invalid_endpoint(endpoint, e.to_string()))?;
        if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
            return Err(RmqError::invalid_endpoint(
                endpoint,
                "must be an http:// or https:// URL",
            ));
        }

        let tls = is_tls_endpoint(endpoint);
        let builder = reqwest::Client::builder().timeout(timeout);
        let builder = if tls {
            builder.use_native_tls().https_only(true)
        } else {
            builder
        };
        let http = builder.build()?;

        debug!(endpoint = %url, tls, "created management client");

        Ok(Self {
            endpoint: url,
            username: username.to_string(),
            password: password.to_string(),
            tls,
            http,
        })
    }

    /// The endpoint this client talks to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    /// The user requests are authenticated as.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Whether the TLS transport is in use.
    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.tls
    }

    // ========================================================================
    // Cluster
    // ========================================================================

    /// `GET /api/overview`.
    pub async fn overview(&self) -> Result<Overview> {
        self.get(&["overview"]).await
    }

    /// `GET /api/cluster-name`.
    pub async fn cluster_name(&self) -> Result<ClusterName> {
        self.get(&["cluster-name"]).await
    }

    // ========================================================================
    // Virtual hosts
    // ========================================================================

    /// `GET /api/vhosts`.
    pub async fn list_vhosts(&self) -> Result<Vec<VhostInfo>> {
        self.get(&["vhosts"]).await
    }

    /// `PUT /api/vhosts/{name}`.
    pub async fn declare_vhost(&self, name: &str, settings: &VhostSettings) -> Result<()> {
        self.send(Method::PUT, &["vhosts", name], Some(settings)).await
    }

    /// `DELETE /api/vhosts/{name}`; a missing vhost counts as deleted.
    pub async fn delete_vhost(&self, name: &str) -> Result<()> {
        self.send::<()>(Method::DELETE, &["vhosts", name], None).await
    }

    // ========================================================================
    // Queues
    // ========================================================================

    /// `GET /api/queues[/{vhost}]`; `None` lists every vhost.
    pub async fn list_queues(&self, vhost: Option<&str>) -> Result<Vec<QueueInfo>> {
        match vhost {
            Some(vhost) => self.get(&["queues", vhost]).await,
            None => self.get(&["queues"]).await,
        }
    }

    /// `PUT /api/queues/{vhost}/{name}`.
    pub async fn declare_queue(
        &self,
        vhost: &str,
        name: &str,
        settings: &QueueSettings,
    ) -> Result<()> {
        self.send(Method::PUT, &["queues", vhost, name], Some(settings))
            .await
    }

    /// `DELETE /api/queues/{vhost}/{name}`.
    pub async fn delete_queue(&self, vhost: &str, name: &str) -> Result<()> {
        self.send::<()>(Method::DELETE, &["queues", vhost, name], None)
            .await
    }

    /// `DELETE /api/queues/{vhost}/{name}/contents`.
    pub async fn purge_queue(&self, vhost: &str, name: &str) -> Result<()> {
        self.send::<()>(Method::DELETE, &["queues", vhost, name, "contents"], None)
            .await
    }

    /// `POST /api/queues/{vhost}/{name}/get`.
    pub async fn get_messages(
        &self,
        vhost: &str,
        name: &str,
        request: &GetMessagesRequest,
    ) -> Result<Vec<FetchedMessage>> {
        self.post_json(&["queues", vhost, name, "get"], request).await
    }

    // ========================================================================
    // Exchanges
    // ========================================================================

    /// `GET /api/exchanges[/{vhost}]`.
    pub async fn list_exchanges(&self, vhost: Option<&str>) -> Result<Vec<ExchangeInfo>> {
        match vhost {
            Some(vhost) => self.get(&["exchanges", vhost]).await,
            None => self.get(&["exchanges"]).await,
        }
    }

    /// `PUT /api/exchanges/{vhost}/{name}`.
    pub async fn declare_exchange(
        &self,
        vhost: &str,
        name: &str,
        settings: &ExchangeSettings,
    ) -> Result<()> {
        self.send(Method::PUT, &["exchanges", vhost, name], Some(settings))
            .await
    }

    /// `DELETE /api/exchanges/{vhost}/{name}`.
    pub async fn delete_exchange(&self, vhost: &str, name: &str) -> Result<()> {
        self.send::<()>(Method::DELETE, &["exchanges", vhost, name], None)
            .await
    }

    /// `POST /api/exchanges/{vhost}/{name}/publish`.
    pub async fn publish(
        &self,
        vhost: &str,
        exchange: &str,
        request: &PublishRequest,
    ) -> Result<PublishResponse> {
        let exchange = if exchange.is_empty() {
            DEFAULT_EXCHANGE
        } else {
            exchange
        };
        self.post_json(&["exchanges", vhost, exchange, "publish"], request)
            .await
    }

    // ========================================================================
    // Bindings
    // ========================================================================

    /// `GET /api/bindings[/{vhost}]`.
    pub async fn list_bindings(&self, vhost: Option<&str>) -> Result<Vec<BindingInfo>> {
        match vhost {
            Some(vhost) => self.get(&["bindings", vhost]).await,
            None => self.get(&["bindings"]).await,
        }
    }

    /// `POST /api/bindings/{vhost}/e/{source}/q/{queue}`.
    pub async fn bind_queue(
        &self,
        vhost: &str,
        source: &str,
        queue: &str,
        settings: &BindingSettings,
    ) -> Result<()> {
        self.send(
            Method::POST,
            &["bindings", vhost, "e", source, "q", queue],
            Some(settings),
        )
        .await
    }

    /// Delete a binding previously returned by [`Self::list_bindings`].
    pub async fn delete_binding(&self, binding: &BindingInfo) -> Result<()> {
        let kind = if binding.destination_type == "exchange" {
            "e"
        } else {
            "q"
        };
        self.send::<()>(
            Method::DELETE,
            &[
                "bindings",
                &binding.vhost,
                "e",
                &binding.source,
                kind,
                &binding.destination,
                &binding.properties_key,
            ],
            None,
        )
        .await
    }

    // ========================================================================
    // Connections
    // ========================================================================

    /// `GET /api/connections` or `GET /api/vhosts/{vhost}/connections`.
    pub async fn list_connections(&self, vhost: Option<&str>) -> Result<Vec<ConnectionInfo>> {
        match vhost {
            Some(vhost) => self.get(&["vhosts", vhost, "connections"]).await,
            None => self.get(&["connections"]).await,
        }
    }

    /// `DELETE /api/connections/{name}`.
    pub async fn close_connection(&self, name: &str, reason: &str) -> Result<()> {
        let url = self.url(&["connections", name])?;
        trace!(%url, "DELETE");
        let request = self
            .authorized(self.http.request(Method::DELETE, url))
            .header("X-Reason", reason);
        check_response(&Method::DELETE, request.send().await?).await?;
        Ok(())
    }

    // ========================================================================
    // Users and permissions
    // ========================================================================

    /// `GET /api/users`.
    pub async fn list_users(&self) -> Result<Vec<UserInfo>> {
        self.get(&["users"]).await
    }

    /// `PUT /api/users/{name}`.
    pub async fn put_user(&self, name: &str, settings: &UserSettings) -> Result<()> {
        self.send(Method::PUT, &["users", name], Some(settings)).await
    }

    /// `DELETE /api/users/{name}`.
    pub async fn delete_user(&self, name: &str) -> Result<()> {
        self.send::<()>(Method::DELETE, &["users", name], None).await
    }

    /// `GET /api/users/{name}/permissions`.
    pub async fn list_user_permissions(&self, user: &str) -> Result<Vec<PermissionInfo>> {
        self.get(&["users", user, "permissions"]).await
    }

    /// `PUT /api/permissions/{vhost}/{user}`.
    pub async fn update_permissions(
        &self,
        vhost: &str,
        user: &str,
        permissions: &Permissions,
    ) -> Result<()> {
        self.send(Method::PUT, &["permissions", vhost, user], Some(permissions))
            .await
    }

    /// `DELETE /api/permissions/{vhost}/{user}`.
    pub async fn clear_permissions(&self, vhost: &str, user: &str) -> Result<()> {
        self.send::<()>(Method::DELETE, &["permissions", vhost, user], None)
            .await
    }

    // ========================================================================
    // Plumbing
    // ========================================================================

    /// Build `{endpoint}/api/{segments...}`, percent-encoding every segment
    /// (so the default vhost `/` becomes `%2F`).
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| RmqError::invalid_endpoint(self.endpoint.as_str(), "cannot be a base"))?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.username, Some(&self.password))
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let url = self.url(segments)?;
        trace!(%url, "GET");
        let response = self.authorized(self.http.get(url)).send().await?;
        decode(check_response(&Method::GET, response).await?).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<T> {
        let url = self.url(segments)?;
        trace!(%url, "POST");
        let response = self
            .authorized(self.http.post(url))
            .json(body)
            .send()
            .await?;
        decode(check_response(&Method::POST, response).await?).await
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&B>,
    ) -> Result<()> {
        let url = self.url(segments)?;
        trace!(%url, %method, "request");
        let mut request = self.authorized(self.http.request(method.clone(), url));
        if let Some(body) = body {
            request = request.json(body);
        }
        check_response(&method, request.send().await?).await?;
        Ok(())
    }
}

/// `true` when the URI asks for TLS.
#[must_use]
pub fn is_tls_endpoint(uri: &str) -> bool {
    uri.get(..8)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("https://"))
}

async fn check_response(method: &Method, response: Response) -> Result<Response> {
    let status = response.status().as_u16();
    if !is_failure(method, status) {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

/// Whether a status must be reported as an error. A 404 answering a DELETE
/// means the object is already gone and counts as success.
pub(crate) fn is_failure(method: &Method, status: u16) -> bool {
    if *method == Method::DELETE && status == StatusCode::NOT_FOUND.as_u16() {
        return false;
    }
    status >= 400
}

/// Build the error for a failed response, preferring the broker's reason.
pub(crate) fn status_error(status: u16, body: &str) -> RmqError {
    if status == StatusCode::UNAUTHORIZED.as_u16() {
        return RmqError::Unauthorized;
    }

    let message = match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) if !parsed.reason.is_empty() => parsed.reason,
        Ok(parsed) if !parsed.error.is_empty() => parsed.error,
        Ok(_) => format!("error {status} from RabbitMQ"),
        Err(e) => format!("error {status} from RabbitMQ: {e}"),
    };
    RmqError::api(status, message)
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| RmqError::decode(e.to_string()))
}
