use crate::rate_limiter::{RateLimitConfig, RateLimiter};
use chrono::{TimeZone, Utc};
use reqwest::{Client, Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};
use tracker_core::{CommentEvent, CoreError, RedditApiError};
use url::Url;

pub const REDDIT_API_BASE: &str = "https://oauth.reddit.com";

/// Largest page Reddit serves for a listing
pub const LISTING_LIMIT: u32 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListing<T> {
    pub kind: String,
    pub data: RedditListingData<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingData<T> {
    pub children: Vec<RedditListingChild<T>>,
    pub after: Option<String>,
    pub before: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingChild<T> {
    pub kind: String,
    pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditCommentData {
    pub id: String,
    pub author: String,
    /// `t2_` fullname of the author, absent for deleted accounts
    pub author_fullname: Option<String>,
    pub body: String,
    pub subreddit: String,
    pub created_utc: f64,
}

impl From<RedditCommentData> for CommentEvent {
    fn from(comment: RedditCommentData) -> Self {
        let author_id = comment
            .author_fullname
            .map(|fullname| fullname.trim_start_matches("t2_").to_string())
            .filter(|id| !id.is_empty());
        let author_name = Some(comment.author).filter(|name| name != "[deleted]");
        let timestamp = Utc
            .timestamp_opt(comment.created_utc as i64, 0)
            .single()
            .unwrap_or_else(Utc::now);

        Self {
            id: comment.id,
            author_id,
            author_name,
            body: comment.body,
            subreddit: comment.subreddit,
            timestamp,
        }
    }
}

#[derive(Debug)]
pub struct RedditApiClient {
    http_client: Client,
    rate_limiter: RateLimiter,
    base_url: Url,
}

impl RedditApiClient {
    pub fn new(user_agent: &str) -> Result<Self, CoreError> {
        let http_client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(30))
            .build()?;
        let base_url = Url::parse(REDDIT_API_BASE).map_err(|e| CoreError::Internal {
            message: format!("invalid API base {}: {}", REDDIT_API_BASE, e),
        })?;

        Ok(Self {
            http_client,
            rate_limiter: RateLimiter::new(RateLimitConfig::reddit_oauth()),
            base_url,
        })
    }

    pub fn endpoint_url(&self, endpoint: &str) -> Result<Url, CoreError> {
        self.base_url
            .join(endpoint)
            .map_err(|e| CoreError::Internal {
                message: format!("invalid endpoint {}: {}", endpoint, e),
            })
    }

    pub async fn make_request(
        &self,
        method: Method,
        endpoint: &str,
        access_token: &str,
        query_params: &[(&str, &str)],
    ) -> Result<Response, CoreError> {
        let url = self.endpoint_url(endpoint)?;

        let waited = self.rate_limiter.acquire().await;
        if waited > Duration::from_millis(1) {
            debug!("Waited {:?} for rate limit before {} {}", waited, method, endpoint);
        }

        let request = self
            .http_client
            .request(method.clone(), url)
            .bearer_auth(access_token)
            .query(query_params);

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Err(CoreError::RedditApi(RedditApiError::RequestTimeout))
            }
            Err(e) => {
                debug!("Network error for {} {}: {}", method, endpoint, e);
                return Err(CoreError::Network(e));
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        Err(CoreError::RedditApi(status_error(
            status,
            retry_after_header(&response),
            endpoint,
        )))
    }

    /// Newest comments of `subreddit`, newest first.
    pub async fn get_new_comments(
        &self,
        access_token: &str,
        subreddit: &str,
        limit: u32,
    ) -> Result<Vec<CommentEvent>, CoreError> {
        let endpoint = format!("/r/{}/comments", subreddit);
        let limit = limit.min(LISTING_LIMIT).to_string();

        let response = self
            .make_request(
                Method::GET,
                &endpoint,
                access_token,
                &[("limit", limit.as_str()), ("raw_json", "1")],
            )
            .await?;

        let listing: RedditListing<RedditCommentData> = response.json().await.map_err(|e| {
            error!("Failed to parse comment listing: {}", e);
            CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: format!("Failed to parse comments for r/{}", subreddit),
            })
        })?;

        Ok(listing
            .data
            .children
            .into_iter()
            .filter(|child| child.kind == "t1")
            .map(|child| CommentEvent::from(child.data))
            .collect())
    }
}

fn retry_after_header(response: &Response) -> Option<u64> {
    let headers = response.headers();
    ["retry-after", "x-ratelimit-reset"]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.trim().parse::<f64>().ok())
        .map(|secs| secs.ceil() as u64)
        .next()
}

/// Maps a non-success status to the matching API error.
pub fn status_error(status: StatusCode, retry_after: Option<u64>, endpoint: &str) -> RedditApiError {
    match status.as_u16() {
        429 => {
            let retry_after = retry_after.unwrap_or(60);
            warn!("Rate limited, retry after {} seconds", retry_after);
            RedditApiError::RateLimitExceeded { retry_after }
        }
        401 => RedditApiError::InvalidToken,
        403 => RedditApiError::Forbidden {
            resource: endpoint.to_string(),
        },
        404 => RedditApiError::SubredditNotFound {
            subreddit: endpoint
                .trim_start_matches("/r/")
                .split('/')
                .next()
                .unwrap_or(endpoint)
                .to_string(),
        },
        code if status.is_server_error() => RedditApiError::ServerError { status_code: code },
        code => RedditApiError::InvalidResponse {
            details: format!("unexpected status {} for {}", code, endpoint),
        },
    }
}
