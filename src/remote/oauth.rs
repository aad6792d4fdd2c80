//! OAuth token lifecycle for the remote filesystem.
//!
//! Startup exchanges an authorization code for an access/refresh token
//! pair; a 401 later on refreshes the access token exactly once before the
//! request is retried.

use serde::Deserialize;
use tracing::debug;

use super::rest::{url_encode, Method, RestError, RestRequest, RestTransport};

/// Out-of-band redirect URI used by the device-style authorization flow.
const REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Holds client credentials and the current token pair.
#[derive(Debug, Default)]
pub struct Authenticator {
    token_url: String,
    client_id: String,
    client_secret: String,
    access_token: String,
    refresh_token: String,
}

impl Authenticator {
    pub fn new(token_url: impl Into<String>) -> Self {
        Self {
            token_url: token_url.into(),
            ..Self::default()
        }
    }

    /// Whether an access token is currently held.
    pub fn has_token(&self) -> bool {
        !self.access_token.is_empty()
    }

    /// The `Authorization` header value for the current token.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// Exchange an authorization code for the initial token pair.
    pub fn exchange_code(
        &mut self,
        transport: &mut dyn RestTransport,
        client_id: &str,
        client_secret: &str,
        access_code: &str,
    ) -> Result<(), RestError> {
        self.client_id = client_id.to_string();
        self.client_secret = client_secret.to_string();

        let form = format!(
            "code={}&client_id={}&client_secret={}&redirect_uri={}&grant_type=authorization_code",
            url_encode(access_code),
            url_encode(client_id),
            url_encode(client_secret),
            url_encode(REDIRECT_URI),
        );
        let token = self.token_request(transport, form)?;
        self.access_token = token.access_token;
        if let Some(refresh) = token.refresh_token {
            self.refresh_token = refresh;
        }
        debug!("authorization code exchanged");
        Ok(())
    }

    /// Refresh the access token using the stored refresh token. Called at
    /// most once per failed request.
    pub fn refresh(&mut self, transport: &mut dyn RestTransport) -> Result<(), RestError> {
        if self.refresh_token.is_empty() {
            return Err(RestError::Transport("no refresh token held".into()));
        }
        let form = format!(
            "refresh_token={}&client_id={}&client_secret={}&grant_type=refresh_token",
            url_encode(&self.refresh_token),
            url_encode(&self.client_id),
            url_encode(&self.client_secret),
        );
        let token = self.token_request(transport, form)?;
        self.access_token = token.access_token;
        debug!("access token refreshed");
        Ok(())
    }

    fn token_request(
        &self,
        transport: &mut dyn RestTransport,
        form: String,
    ) -> Result<TokenResponse, RestError> {
        let req = RestRequest::new(Method::Post, self.token_url.clone())
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(form);
        let response = transport.request(&req)?;
        if !response.is_success() {
            return Err(RestError::Transport(format!(
                "token endpoint answered {}",
                response.status
            )));
        }
        serde_json::from_slice(&response.body)
            .map_err(|e| RestError::Transport(format!("malformed token response: {e}")))
    }
}
