//! The HTTP adapter towards the collector.
//!
//! Exactly two exchanges exist: the new-session GET that fetches the initial
//! server configuration, and the beacon POST that ships a chunk. Both return
//! a [`StatusResponse`]. The trait seam exists so the worker can be driven
//! against a stub in tests; production uses [`ReqwestHttpClient`].

use openrum_config::HttpClientConfig;
use openrum_protocol::{is_erroneous_status, ParseStatusError, ResponseAttributes};

/// An error performing a beacon exchange.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// The request could not be sent or the response not be read.
    #[error("could not reach the collector")]
    Transport(#[from] reqwest::Error),
    /// The response body does not parse as a status response.
    #[error("malformed status response")]
    Status(#[from] ParseStatusError),
}

impl HttpError {
    /// Returns `true` if the error indicates a network problem rather than a
    /// protocol one.
    pub fn is_network_error(&self) -> bool {
        match self {
            Self::Transport(error) => error.is_timeout() || error.is_connect(),
            Self::Status(_) => false,
        }
    }
}

/// A parsed collector response.
#[derive(Clone, Debug)]
pub struct StatusResponse {
    /// The HTTP status code of the exchange.
    pub status_code: u16,
    /// The configuration attributes carried in the body.
    pub attributes: ResponseAttributes,
}

impl StatusResponse {
    /// Whether this response leaves the triggering chunk buffered for retry.
    pub fn is_erroneous(&self) -> bool {
        is_erroneous_status(self.status_code)
    }
}

/// The two beacon exchanges, behind a seam for tests.
pub trait HttpClient: Send + Sync {
    /// Requests a new-session configuration (`GET <endpoint>?type=m&…`).
    fn send_status_request(&self) -> Result<StatusResponse, HttpError>;

    /// Ships one beacon chunk (`POST` with a `text/plain` body).
    fn send_beacon_request(
        &self,
        client_ip: Option<&str>,
        payload: &[u8],
    ) -> Result<StatusResponse, HttpError>;
}

/// Constructs HTTP clients for the worker.
///
/// The worker builds a fresh client per send attempt so that a changed server
/// id from a status response takes effect immediately.
pub trait HttpClientProvider: Send + Sync {
    /// Creates a client for the given endpoint configuration.
    fn create_client(&self, config: &HttpClientConfig) -> Box<dyn HttpClient>;
}

/// Default provider backed by [`ReqwestHttpClient`].
#[derive(Debug, Default)]
pub struct ReqwestHttpClientProvider;

impl HttpClientProvider for ReqwestHttpClientProvider {
    fn create_client(&self, config: &HttpClientConfig) -> Box<dyn HttpClient> {
        Box::new(ReqwestHttpClient::new(config.clone()))
    }
}

/// The production HTTP client over `reqwest`'s blocking API.
///
/// All I/O happens on the agent's worker thread, so the blocking client is
/// the right fit; no async runtime is dragged into the host application.
#[derive(Debug)]
pub struct ReqwestHttpClient {
    config: HttpClientConfig,
    client: reqwest::blocking::Client,
}

impl ReqwestHttpClient {
    /// Creates a client for the given endpoint configuration.
    pub fn new(config: HttpClientConfig) -> Self {
        let client = match reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
        {
            Ok(client) => client,
            Err(error) => {
                tracing::warn!(%error, "failed to apply HTTP client settings, using defaults");
                reqwest::blocking::Client::new()
            }
        };

        Self { config, client }
    }

    fn monitor_url(&self) -> url::Url {
        let mut url = self.config.base_url.clone();
        url.query_pairs_mut()
            .append_pair("type", "m")
            .append_pair("srvid", &self.config.server_id.to_string())
            .append_pair("app", &self.config.application_id)
            .append_pair("va", openrum_config::AGENT_VERSION)
            .append_pair("pt", &openrum_protocol::PLATFORM_TYPE_OPENKIT.to_string())
            .append_pair("tt", openrum_protocol::AGENT_TECHNOLOGY_TYPE);
        url
    }

    fn into_status_response(
        response: reqwest::blocking::Response,
    ) -> Result<StatusResponse, HttpError> {
        let status_code = response.status().as_u16();
        let body = response.text()?;
        let attributes = if body.trim().is_empty() {
            ResponseAttributes::default()
        } else {
            ResponseAttributes::parse(&body)?
        };

        Ok(StatusResponse {
            status_code,
            attributes,
        })
    }
}

impl HttpClient for ReqwestHttpClient {
    fn send_status_request(&self) -> Result<StatusResponse, HttpError> {
        let response = self.client.get(self.monitor_url()).send()?;
        Self::into_status_response(response)
    }

    fn send_beacon_request(
        &self,
        client_ip: Option<&str>,
        payload: &[u8],
    ) -> Result<StatusResponse, HttpError> {
        let mut request = self
            .client
            .post(self.monitor_url())
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(payload.to_vec());

        if let Some(client_ip) = client_ip {
            request = request.header("X-Client-IP", client_ip);
        }

        let response = request.send()?;
        Self::into_status_response(response)
    }
}
