pub mod api;
pub mod rate_limiter;
pub mod retry;
pub mod stream;


pub use api::RedditApiClient;
pub use stream::RedditCommentSource;

use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthType, AuthUrl, ClientId, ClientSecret, ResourceOwnerPassword, ResourceOwnerUsername,
    TokenResponse, TokenUrl,
};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use tracker_core::{CommentEvent, ConfigError, CoreError, RedditApiError};

pub const REDDIT_AUTH_URL: &str = "https://www.reddit.com/api/v1/authorize";
pub const REDDIT_TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";

/// Tokens are renewed this long before Reddit would reject them.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Script-app credentials, read from `credentials.json`.
#[derive(Clone, Deserialize)]
pub struct RedditCredentials {
    #[serde(alias = "client_id2")]
    pub client_id: String,
    #[serde(alias = "client_secret2")]
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub user_agent: String,
}

impl fmt::Debug for RedditCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedditCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl RedditCredentials {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::from_io(path, &e))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        let credentials: Self =
            serde_json::from_str(raw).map_err(|e| ConfigError::InvalidFormat {
                details: format!("credentials: {}", e),
            })?;
        credentials.validate()?;
        Ok(credentials)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("username", &self.username),
            ("password", &self.password),
            ("user_agent", &self.user_agent),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    field: field.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RedditToken {
    pub access_token: String,
    pub expires_at: SystemTime,
}

impl RedditToken {
    pub fn new(access_token: String, expires_in: Duration) -> Self {
        Self {
            access_token,
            expires_at: SystemTime::now() + expires_in,
        }
    }

    pub fn is_expired(&self) -> bool {
        SystemTime::now() >= self.expires_at
    }

    pub fn needs_refresh(&self) -> bool {
        SystemTime::now() + TOKEN_REFRESH_MARGIN >= self.expires_at
    }
}

/// Authenticated access to Reddit as a script app.
///
/// Uses the OAuth2 password grant. The bearer token is cached and renewed
/// shortly before it expires, or right away after a 401.
pub struct RedditClient {
    credentials: RedditCredentials,
    oauth_client: BasicClient,
    api: RedditApiClient,
    token: Mutex<Option<RedditToken>>,
}

impl RedditClient {
    pub fn new(credentials: RedditCredentials) -> Result<Self, CoreError> {
        credentials.validate()?;

        let auth_url = AuthUrl::new(REDDIT_AUTH_URL.to_string()).map_err(|e| {
            CoreError::Internal {
                message: format!("Invalid auth URL: {}", e),
            }
        })?;
        let token_url = TokenUrl::new(REDDIT_TOKEN_URL.to_string()).map_err(|e| {
            CoreError::Internal {
                message: format!("Invalid token URL: {}", e),
            }
        })?;

        let oauth_client = BasicClient::new(
            ClientId::new(credentials.client_id.clone()),
            Some(ClientSecret::new(credentials.client_secret.clone())),
            auth_url,
            Some(token_url),
        )
        .set_auth_type(AuthType::BasicAuth);

        let api = RedditApiClient::new(&credentials.user_agent)?;

        Ok(Self {
            credentials,
            oauth_client,
            api,
            token: Mutex::new(None),
        })
    }

    /// Runs the password grant and caches the new token.
    pub async fn authenticate(&self) -> Result<String, CoreError> {
        let username = ResourceOwnerUsername::new(self.credentials.username.clone());
        let password = ResourceOwnerPassword::new(self.credentials.password.clone());

        let response = self
            .oauth_client
            .exchange_password(&username, &password)
            .request_async(async_http_client)
            .await
            .map_err(|e| {
                debug!("Password grant failed: {}", e);
                RedditApiError::AuthenticationFailed {
                    reason: e.to_string(),
                }
            })?;

        let expires_in = response
            .expires_in()
            .unwrap_or_else(|| Duration::from_secs(3600));
        let token = RedditToken::new(response.access_token().secret().clone(), expires_in);
        let access_token = token.access_token.clone();

        *self.token.lock().await = Some(token);
        info!(
            "Authenticated with Reddit as {} (token valid for {:?})",
            self.credentials.username, expires_in
        );
        Ok(access_token)
    }

    /// Returns a usable bearer token, authenticating when needed.
    pub async fn access_token(&self) -> Result<String, CoreError> {
        {
            let token = self.token.lock().await;
            if let Some(token) = token.as_ref().filter(|t| !t.needs_refresh()) {
                return Ok(token.access_token.clone());
            }
        }
        self.authenticate().await
    }

    pub async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    #[cfg(test)]
    pub(crate) async fn set_token(&self, token: RedditToken) {
        *self.token.lock().await = Some(token);
    }

    #[cfg(test)]
    pub(crate) async fn is_authenticated(&self) -> bool {
        self.token
            .lock()
            .await
            .as_ref()
            .map(|t| !t.is_expired())
            .unwrap_or(false)
    }

    /// Newest comments of `subreddit`, newest first.
    pub async fn fetch_new_comments(
        &self,
        subreddit: &str,
        limit: u32,
    ) -> Result<Vec<CommentEvent>, CoreError> {
        let access_token = self.access_token().await?;
        match self.api.get_new_comments(&access_token, subreddit, limit).await {
            Err(CoreError::RedditApi(RedditApiError::InvalidToken)) => {
                warn!("Reddit rejected the access token, dropping it");
                self.invalidate_token().await;
                Err(CoreError::RedditApi(RedditApiError::InvalidToken))
            }
            result => result,
        }
    }
}
