//! Fallback Request Client
//!
//! Issues a request against the primary origin and, on any failure, repeats
//! the identical request once against the production origin.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use crate::abort::AbortSignal;
use crate::config::ApiConfig;
use crate::error::ClientError;

/// Fetch-style request options
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    /// Request method
    pub method: HttpMethod,
    /// Extra headers
    pub headers: Vec<(String, String)>,
    /// Request body
    pub body: Option<Vec<u8>>,
    /// Cancels the request when aborted
    pub signal: Option<AbortSignal>,
}

impl RequestOptions {
    /// A plain GET
    #[must_use]
    pub fn get() -> Self {
        Self::default()
    }

    /// A POST with a JSON body
    pub fn post_json<B: Serialize + ?Sized>(body: &B) -> Result<Self, serde_json::Error> {
        Ok(Self {
            method: HttpMethod::Post,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: Some(serde_json::to_vec(body)?),
            signal: None,
        })
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach an abort signal
    #[must_use]
    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// Result of a fallback request
#[derive(Clone, Debug)]
pub enum FallbackResponse {
    /// Parsed JSON body
    Json(serde_json::Value),
    /// Raw response, when JSON parsing was not requested
    Raw(HttpResponse),
}

impl FallbackResponse {
    /// Consume as JSON, parsing a raw body if needed
    pub fn into_json(self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::Json(value) => Ok(value),
            Self::Raw(response) => response.json_value(),
        }
    }
}

/// Client that tries the primary origin, then the production origin once
pub struct FallbackClient<T: HttpTransport> {
    primary: Option<String>,
    production: Option<String>,
    transport: T,
}

impl<T: HttpTransport> FallbackClient<T> {
    /// Create a client from explicit origins
    pub fn new(primary: Option<String>, production: Option<String>, transport: T) -> Self {
        Self {
            primary: normalize_origin(primary),
            production: normalize_origin(production),
            transport,
        }
    }

    /// Create a client from API configuration
    pub fn from_config(config: &ApiConfig, transport: T) -> Self {
        Self::new(
            config.primary_url.clone(),
            config.production_url.clone(),
            transport,
        )
    }

    /// The underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Whether both origins are configured
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.primary.is_some() && self.production.is_some()
    }

    /// Request `endpoint`, falling back to the production origin on failure
    ///
    /// With `parse_json` the body is parsed (an undecodable primary body also
    /// triggers the fallback); otherwise the raw response is returned.
    pub async fn fetch_with_fallback(
        &self,
        endpoint: &str,
        options: RequestOptions,
        parse_json: bool,
    ) -> Result<FallbackResponse, ClientError> {
        if !endpoint.starts_with('/') {
            return Err(ClientError::InvalidEndpoint(endpoint.to_string()));
        }
        let (Some(primary), Some(production)) =
            (self.primary.as_deref(), self.production.as_deref())
        else {
            return Err(ClientError::NotConfigured(
                "primary and production API base URLs",
            ));
        };

        let primary_error = match self.attempt(primary, endpoint, &options, parse_json).await {
            Ok(response) => return Ok(response),
            Err(ClientError::Aborted) => return Err(ClientError::Aborted),
            Err(e) => e,
        };

        warn!(
            endpoint = endpoint,
            error = %primary_error,
            "Primary origin failed, retrying against production"
        );

        match self
            .attempt(production, endpoint, &options, parse_json)
            .await
        {
            Ok(response) => {
                debug!(endpoint = endpoint, "Production origin succeeded");
                Ok(response)
            }
            Err(ClientError::Aborted) => Err(ClientError::Aborted),
            Err(production_error) => {
                warn!(
                    endpoint = endpoint,
                    error = %production_error,
                    "Production origin failed"
                );
                Err(ClientError::FallbackExhausted {
                    endpoint: endpoint.to_string(),
                    primary: primary_error.to_string(),
                    production: production_error.to_string(),
                })
            }
        }
    }

    /// Request `endpoint` and decode the JSON body into `R`
    pub async fn request_json<R: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<R, ClientError> {
        let value = self
            .fetch_with_fallback(endpoint, options, true)
            .await?
            .into_json()?;
        Ok(serde_json::from_value(value)?)
    }

    async fn attempt(
        &self,
        origin: &str,
        endpoint: &str,
        options: &RequestOptions,
        parse_json: bool,
    ) -> Result<FallbackResponse, ClientError> {
        let request = HttpRequest {
            method: options.method,
            url: format!("{origin}{endpoint}"),
            headers: options.headers.clone(),
            body: options.body.clone(),
        };
        debug!(
            method = request.method.as_str(),
            url = %request.url,
            transport = self.transport.name(),
            "Sending request"
        );

        let call = async {
            let response = self.transport.execute(request).await?;
            if !response.is_success() {
                return Err(ClientError::status(response.status, &response.text()));
            }
            if parse_json {
                Ok(FallbackResponse::Json(response.json_value()?))
            } else {
                Ok(FallbackResponse::Raw(response))
            }
        };

        match &options.signal {
            Some(signal) => {
                if signal.is_aborted() {
                    return Err(ClientError::Aborted);
                }
                tokio::select! {
                    biased;
                    () = signal.aborted() => Err(ClientError::Aborted),
                    result = call => result,
                }
            }
            None => call.await,
        }
    }
}

fn normalize_origin(origin: Option<String>) -> Option<String> {
    origin
        .map(|o| o.trim().trim_end_matches('/').to_string())
        .filter(|o| !o.is_empty())
}
