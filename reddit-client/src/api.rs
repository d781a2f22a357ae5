use crate::rate_limiter::{RateLimitConfig, RateLimiter};
use autoreply_core::{Comment, CoreError, RedditApiError, Submission};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

pub const REDDIT_API_BASE: &str = "https://oauth.reddit.com";

/// Ids per `/api/morechildren` call.
pub const MORE_CHILDREN_BATCH: usize = 100;

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
pub struct RedditPostData {
    pub id: String,
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    pub author: String,
    pub subreddit: String,
    pub permalink: String,
    pub created_utc: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditCommentData {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub body: String,
    pub author: String,
    pub parent_id: String,
    pub link_id: String,
    pub subreddit: String,
    #[serde(default)]
    pub permalink: String,
    /// Either an empty string or a nested listing.
    #[serde(default)]
    pub replies: Value,
    #[serde(default)]
    pub created_utc: f64,
}

/// A "load more comments" placeholder. An empty `children` list marks a
/// "continue this thread" link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditMoreData {
    #[serde(default)]
    pub id: String,
    pub parent_id: String,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub children: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditUserData {
    pub id: String,
    pub name: String,
}

/// Envelope used by the `api_type=json` endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiJsonResponse {
    pub json: ApiJsonBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiJsonBody {
    #[serde(default)]
    pub errors: Vec<Value>,
    #[serde(default)]
    pub data: Option<ApiThings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiThings {
    #[serde(default)]
    pub things: Vec<RedditListingChild<Value>>,
}

impl ApiJsonBody {
    /// Flatten `[["RATELIMIT", "you are doing that too much", "ratelimit"]]`
    /// style errors into one line.
    pub fn error_summary(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        let parts: Vec<String> = self
            .errors
            .iter()
            .map(|err| match err {
                Value::Array(fields) => fields
                    .iter()
                    .filter_map(|f| f.as_str())
                    .take(2)
                    .collect::<Vec<_>>()
                    .join(": "),
                other => other.to_string(),
            })
            .collect();
        Some(parts.join("; "))
    }
}

/// A listing child decoded by its `kind` tag.
#[derive(Debug, Clone)]
pub enum Thing {
    Link(RedditPostData),
    Comment(RedditCommentData),
    More(RedditMoreData),
    Other(String),
}

impl Thing {
    pub fn parse(child: RedditListingChild<Value>) -> Result<Self, serde_json::Error> {
        Ok(match child.kind.as_str() {
            "t3" => Thing::Link(serde_json::from_value(child.data)?),
            "t1" => Thing::Comment(serde_json::from_value(child.data)?),
            "more" => Thing::More(serde_json::from_value(child.data)?),
            _ => Thing::Other(child.kind),
        })
    }
}

#[derive(Debug)]
pub struct RedditApiClient {
    http_client: Client,
    rate_limiter: Arc<RateLimiter>,
    user_agent: String,
    base_url: Url,
}

impl RedditApiClient {
    pub fn new(user_agent: String) -> Result<Self, CoreError> {
        Self::with_base_url(user_agent, REDDIT_API_BASE)
    }

    pub fn with_base_url(user_agent: String, base_url: &str) -> Result<Self, CoreError> {
        let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig::reddit_oauth()));

        let http_client = Client::builder()
            .user_agent(&user_agent)
            .timeout(Duration::from_secs(30))
            .build()?;

        let base_url = Url::parse(base_url).map_err(|e| CoreError::Internal {
            message: format!("invalid API base url {}: {}", base_url, e),
        })?;

        Ok(Self {
            http_client,
            rate_limiter,
            user_agent,
            base_url,
        })
    }

    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn endpoint_url(&self, endpoint: &str) -> Result<Url, CoreError> {
        self.base_url.join(endpoint).map_err(|e| CoreError::Internal {
            message: format!("invalid endpoint {}: {}", endpoint, e),
        })
    }

    pub async fn make_request(
        &self,
        method: Method,
        endpoint: &str,
        access_token: &str,
        query_params: Option<&[(&str, &str)]>,
        form: Option<&[(&str, &str)]>,
    ) -> Result<Response, CoreError> {
        let url = self.endpoint_url(endpoint)?;

        let _permit = self.rate_limiter.acquire_permit().await?;
        debug!("Acquired rate limit permit for {} {}", method, endpoint);

        // raw_json=1 keeps Reddit from HTML-escaping bodies and titles.
        let mut request_builder = self
            .http_client
            .request(method.clone(), url)
            .bearer_auth(access_token)
            .header("User-Agent", &self.user_agent)
            .query(&[("raw_json", "1")]);

        if let Some(params) = query_params {
            request_builder = request_builder.query(params);
        }
        if let Some(fields) = form {
            request_builder = request_builder.form(fields);
        }

        debug!("Making Reddit API request: {} {}", method, endpoint);
        let response = match request_builder.send().await {
            Ok(response) => response,
            Err(e) => {
                error!("Network error for {} {}: {}", method, endpoint, e);
                if e.is_timeout() {
                    return Err(CoreError::RedditApi(RedditApiError::RequestTimeout));
                }
                return Err(CoreError::Network(e));
            }
        };

        let status = response.status();
        if status.is_success() {
            debug!("Request successful: {} {}", status, endpoint);
            return Ok(response);
        }

        error!("Request failed with status: {} for {}", status, endpoint);
        match status.as_u16() {
            429 => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                warn!("Rate limited, retry after {} seconds", retry_after);
                Err(CoreError::RedditApi(RedditApiError::RateLimitExceeded {
                    retry_after,
                }))
            }
            401 => Err(CoreError::RedditApi(RedditApiError::InvalidToken)),
            403 => Err(CoreError::RedditApi(RedditApiError::Forbidden {
                resource: endpoint.to_string(),
            })),
            404 => Err(CoreError::RedditApi(RedditApiError::ThingNotFound {
                thing_id: endpoint.to_string(),
            })),
            code if status.is_server_error() => {
                Err(CoreError::RedditApi(RedditApiError::ServerError {
                    status_code: code,
                }))
            }
            code => Err(CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: format!("unexpected status {} from {}", code, endpoint),
            })),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        access_token: &str,
        query_params: Option<&[(&str, &str)]>,
    ) -> Result<T, CoreError> {
        let response = self
            .make_request(Method::GET, endpoint, access_token, query_params, None)
            .await?;

        response.json().await.map_err(|e| {
            error!("Failed to parse response from {}: {}", endpoint, e);
            CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: format!("Failed to parse response from {}", endpoint),
            })
        })
    }

    pub async fn get_user_info(&self, access_token: &str) -> Result<RedditUserData, CoreError> {
        let user_data: RedditUserData = self.get_json("/api/v1/me", access_token, None).await?;
        debug!("Retrieved user info for: {}", user_data.name);
        Ok(user_data)
    }

    pub async fn get_new_submissions(
        &self,
        access_token: &str,
        subreddit: &str,
        limit: u32,
    ) -> Result<RedditListing<RedditPostData>, CoreError> {
        let endpoint = format!("/r/{}/new", subreddit);
        let limit = limit.to_string();
        let listing: RedditListing<RedditPostData> = self
            .get_json(&endpoint, access_token, Some(&[("limit", limit.as_str())][..]))
            .await
            .map_err(|e| not_found_as_subreddit(e, subreddit))?;

        debug!(
            "Retrieved {} submissions from r/{}",
            listing.data.children.len(),
            subreddit
        );
        Ok(listing)
    }

    pub async fn get_new_comments(
        &self,
        access_token: &str,
        subreddit: &str,
        limit: u32,
    ) -> Result<RedditListing<RedditCommentData>, CoreError> {
        let endpoint = format!("/r/{}/comments", subreddit);
        let limit = limit.to_string();
        let listing: RedditListing<RedditCommentData> = self
            .get_json(&endpoint, access_token, Some(&[("limit", limit.as_str())][..]))
            .await
            .map_err(|e| not_found_as_subreddit(e, subreddit))?;

        debug!(
            "Retrieved {} comments from r/{}",
            listing.data.children.len(),
            subreddit
        );
        Ok(listing)
    }

    /// The comment page of a submission: `[submission listing, comment listing]`.
    /// With `focus_comment` the comment listing is rooted at that comment.
    pub async fn get_comment_page(
        &self,
        access_token: &str,
        article: &str,
        focus_comment: Option<&str>,
    ) -> Result<Vec<RedditListing<Value>>, CoreError> {
        let endpoint = format!("/comments/{}", article);
        let mut params = vec![("limit", "500"), ("sort", "new")];
        if let Some(comment) = focus_comment {
            params.push(("comment", comment));
            params.push(("context", "0"));
        }

        self.get_json(&endpoint, access_token, Some(params.as_slice()))
            .await
            .map_err(|e| match e {
                CoreError::RedditApi(RedditApiError::ThingNotFound { .. }) => {
                    CoreError::RedditApi(RedditApiError::ThingNotFound {
                        thing_id: focus_comment.unwrap_or(article).to_string(),
                    })
                }
                other => other,
            })
    }

    pub async fn get_more_children(
        &self,
        access_token: &str,
        link_id: &str,
        children: &[String],
    ) -> Result<Vec<RedditListingChild<Value>>, CoreError> {
        let joined = children.join(",");
        let params = [
            ("api_type", "json"),
            ("link_id", link_id),
            ("children", joined.as_str()),
            ("limit_children", "false"),
        ];
        let response: ApiJsonResponse = self
            .get_json("/api/morechildren", access_token, Some(&params[..]))
            .await?;

        if let Some(errors) = response.json.error_summary() {
            return Err(CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: errors,
            }));
        }

        let things = response.json.data.map(|d| d.things).unwrap_or_default();
        debug!(
            "Expanded {} placeholder ids under {} into {} things",
            children.len(),
            link_id,
            things.len()
        );
        Ok(things)
    }

    pub async fn get_info(&self, access_token: &str, fullname: &str) -> Result<Thing, CoreError> {
        let listing: RedditListing<Value> = self
            .get_json("/api/info", access_token, Some(&[("id", fullname)][..]))
            .await?;

        let child = listing.data.children.into_iter().next().ok_or_else(|| {
            CoreError::RedditApi(RedditApiError::ThingNotFound {
                thing_id: fullname.to_string(),
            })
        })?;

        Thing::parse(child).map_err(|e| invalid_response(fullname, e))
    }

    pub async fn submit_comment(
        &self,
        access_token: &str,
        thing_id: &str,
        text: &str,
    ) -> Result<RedditCommentData, CoreError> {
        let form = [("api_type", "json"), ("thing_id", thing_id), ("text", text)];
        let response = self
            .make_request(Method::POST, "/api/comment", access_token, None, Some(&form[..]))
            .await?;

        let body: ApiJsonResponse = response.json().await.map_err(|e| {
            error!("Failed to parse comment response: {}", e);
            CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: "Failed to parse comment response".to_string(),
            })
        })?;

        if let Some(errors) = body.json.error_summary() {
            return Err(CoreError::RedditApi(RedditApiError::ActionRejected { errors }));
        }

        let created = body
            .json
            .data
            .and_then(|d| d.things.into_iter().next())
            .ok_or_else(|| {
                CoreError::RedditApi(RedditApiError::InvalidResponse {
                    details: "comment response contained no thing".to_string(),
                })
            })?;

        let comment: RedditCommentData =
            serde_json::from_value(created.data).map_err(|e| invalid_response(thing_id, e))?;
        info!("Posted {} in reply to {}", comment.name, thing_id);
        Ok(comment)
    }
}

fn not_found_as_subreddit(error: CoreError, subreddit: &str) -> CoreError {
    match error {
        CoreError::RedditApi(RedditApiError::ThingNotFound { .. }) => {
            CoreError::RedditApi(RedditApiError::SubredditNotFound {
                subreddit: subreddit.to_string(),
            })
        }
        other => other,
    }
}

pub(crate) fn invalid_response(context: &str, error: serde_json::Error) -> CoreError {
    CoreError::RedditApi(RedditApiError::InvalidResponse {
        details: format!("{}: {}", context, error),
    })
}

pub(crate) fn author_of(author: String) -> Option<String> {
    if author.is_empty() || author == "[deleted]" {
        None
    } else {
        Some(author)
    }
}

impl From<RedditPostData> for Submission {
    fn from(post_data: RedditPostData) -> Self {
        Self {
            id: post_data.id,
            fullname: post_data.name,
            title: post_data.title,
            selftext: post_data.selftext,
            author: author_of(post_data.author),
            subreddit: post_data.subreddit,
            permalink: post_data.permalink,
        }
    }
}

impl From<RedditCommentData> for Comment {
    fn from(comment_data: RedditCommentData) -> Self {
        Self {
            id: comment_data.id,
            fullname: comment_data.name,
            body: comment_data.body,
            author: author_of(comment_data.author),
            parent_id: comment_data.parent_id,
            link_id: comment_data.link_id,
            subreddit: comment_data.subreddit,
            permalink: comment_data.permalink,
        }
    }
}
