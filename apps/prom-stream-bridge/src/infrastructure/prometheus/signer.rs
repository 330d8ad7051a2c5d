//! SigV4 Request Signing
//!
//! Computes AWS SigV4 headers for backend queries. Managed Prometheus
//! offerings such as Amazon Managed Prometheus reject unsigned
//! requests, while self-hosted backends ignore the extra headers, so
//! signing is keyed purely off whether credentials were configured.

use aws_credential_types::Credentials as AwsCredentials;
use aws_sigv4::http_request::{SignableBody, SignableRequest, SigningSettings, sign};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;
use http::HeaderMap;
use reqwest::Url;

use crate::infrastructure::config::BridgeConfig;

/// Request signing error.
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    /// Signing parameters could not be assembled.
    #[error("failed to build signing parameters: {0}")]
    Params(String),
    /// The request could not be converted into signable form.
    #[error("failed to build signable request: {0}")]
    Request(String),
    /// The signature itself could not be computed.
    #[error("signing failed: {0}")]
    Sign(String),
}

/// Signs backend requests with SigV4 when credentials are configured.
pub struct RequestSigner {
    credentials: Option<AwsCredentials>,
    region: String,
    service: String,
}

impl RequestSigner {
    /// Build a signer from the loaded configuration.
    #[must_use]
    pub fn from_config(config: &BridgeConfig) -> Self {
        let credentials = config.credentials.as_ref().map(|creds| {
            AwsCredentials::new(
                creds.access_key(),
                creds.secret_key(),
                creds.session_token().map(ToString::to_string),
                None,
                "prom-stream-bridge",
            )
        });

        Self {
            credentials,
            region: config.backend.region.clone(),
            service: config.backend.service.clone(),
        }
    }

    /// Whether requests will actually be signed.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.credentials.is_some()
    }

    /// Compute the headers for a GET of `url`.
    ///
    /// Returns an empty map when no credentials are configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the signature cannot be computed.
    pub fn sign_get(&self, url: &Url) -> Result<HeaderMap, SignerError> {
        let Some(credentials) = &self.credentials else {
            return Ok(HeaderMap::new());
        };

        let identity: Identity = credentials.clone().into();
        let signing_settings = SigningSettings::default();
        let signing_params = v4::SigningParams::builder()
            .identity(&identity)
            .region(&self.region)
            .name(&self.service)
            .time(std::time::SystemTime::now())
            .settings(signing_settings)
            .build()
            .map_err(|err| SignerError::Params(err.to_string()))?
            .into();

        let signable = SignableRequest::new(
            "GET",
            url.as_str(),
            std::iter::empty::<(&str, &str)>(),
            SignableBody::Bytes(b""),
        )
        .map_err(|err| SignerError::Request(err.to_string()))?;

        let (instructions, _signature) = sign(signable, &signing_params)
            .map_err(|err| SignerError::Sign(err.to_string()))?
            .into_parts();

        let mut request = http::Request::builder()
            .method("GET")
            .uri(url.as_str())
            .body(())
            .map_err(|err| SignerError::Request(err.to_string()))?;
        instructions.apply_to_request_http1x(&mut request);

        let (parts, ()) = request.into_parts();
        Ok(parts.headers)
    }
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("enabled", &self.is_enabled())
            .field("region", &self.region)
            .field("service", &self.service)
            .finish()
    }
}
