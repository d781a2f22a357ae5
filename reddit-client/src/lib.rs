use async_trait::async_trait;
use autoreply_core::{
    AccountCredentials, Comment, CoreError, Identity, Item, ItemKind, Platform, PostedReply,
    RedditApiError, ReplyTree, Submission, REDDIT_WEB_BASE,
};
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, ClientId, ClientSecret, HttpRequest, HttpResponse, RequestTokenError,
    ResourceOwnerPassword, ResourceOwnerUsername, Scope, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub mod api;
pub mod rate_limiter;
pub mod tree;

#[cfg(test)]
mod tests;

use api::{RedditApiClient, Thing, MORE_CHILDREN_BATCH};
use tree::ReplyCollector;

const REDDIT_AUTH_URL: &str = "https://www.reddit.com/api/v1/authorize";
const REDDIT_TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";

/// Refresh this long before the token actually expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RedditOAuth2Config {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub user_agent: String,
}

impl RedditOAuth2Config {
    pub fn new(
        client_id: String,
        client_secret: String,
        username: String,
        password: String,
        user_agent: String,
    ) -> Self {
        Self {
            client_id,
            client_secret,
            username,
            password,
            user_agent,
        }
    }

    pub fn from_credentials(username: &str, credentials: &AccountCredentials) -> Self {
        Self::new(
            credentials.client_id.clone(),
            credentials.client_secret.clone(),
            username.to_string(),
            credentials.password.clone(),
            credentials.user_agent_for(username),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditToken {
    pub access_token: String,
    pub expires_at: SystemTime,
    pub scope: String,
}

impl RedditToken {
    pub fn is_expired(&self) -> bool {
        SystemTime::now() + TOKEN_EXPIRY_MARGIN >= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthState {
    NotAuthenticated,
    Authenticated { expires_at: SystemTime },
    Expired,
}

/// One logged-in Reddit account. Every worker of that account shares one
/// client, and with it the token and the request budget.
pub struct RedditClient {
    config: RedditOAuth2Config,
    oauth_client: BasicClient,
    api: RedditApiClient,
    token: RwLock<Option<RedditToken>>,
    identity: RwLock<Option<Identity>>,
    auth_lock: Mutex<()>,
}

impl std::fmt::Debug for RedditClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedditClient")
            .field("username", &self.config.username)
            .field("auth_state", &self.get_auth_state())
            .finish()
    }
}

impl RedditClient {
    pub fn new(config: RedditOAuth2Config) -> Result<Self, CoreError> {
        let api = RedditApiClient::new(config.user_agent.clone())?;
        Self::with_api(config, api)
    }

    pub fn with_api(config: RedditOAuth2Config, api: RedditApiClient) -> Result<Self, CoreError> {
        let auth_url = AuthUrl::new(REDDIT_AUTH_URL.to_string()).map_err(|e| CoreError::Internal {
            message: format!("invalid auth url: {}", e),
        })?;
        let token_url =
            TokenUrl::new(REDDIT_TOKEN_URL.to_string()).map_err(|e| CoreError::Internal {
                message: format!("invalid token url: {}", e),
            })?;

        let oauth_client = BasicClient::new(
            ClientId::new(config.client_id.clone()),
            Some(ClientSecret::new(config.client_secret.clone())),
            auth_url,
            Some(token_url),
        );

        Ok(Self {
            config,
            oauth_client,
            api,
            token: RwLock::new(None),
            identity: RwLock::new(None),
            auth_lock: Mutex::new(()),
        })
    }

    pub fn username(&self) -> &str {
        &self.config.username
    }

    pub fn get_required_scopes() -> Vec<&'static str> {
        vec!["identity", "read", "submit"]
    }

    pub fn get_auth_state(&self) -> AuthState {
        match self.token.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            None => AuthState::NotAuthenticated,
            Some(token) if token.is_expired() => AuthState::Expired,
            Some(token) => AuthState::Authenticated {
                expires_at: token.expires_at,
            },
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.get_auth_state(), AuthState::Authenticated { .. })
    }

    pub fn set_token(&self, token: RedditToken) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(token);
    }

    fn cached_token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .filter(|token| !token.is_expired())
            .map(|token| token.access_token.clone())
    }

    fn invalidate_token(&self) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// A valid access token, logging in again when the cached one expired.
    pub async fn access_token(&self) -> Result<String, CoreError> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        let _guard = self.auth_lock.lock().await;
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        let token = self.exchange_password().await?;
        let access_token = token.access_token.clone();
        self.set_token(token);
        Ok(access_token)
    }

    async fn exchange_password(&self) -> Result<RedditToken, CoreError> {
        info!("Requesting access token for u/{}", self.config.username);

        let username = ResourceOwnerUsername::new(self.config.username.clone());
        let password = ResourceOwnerPassword::new(self.config.password.clone());
        let http = self.api.http_client().clone();

        let mut request = self.oauth_client.exchange_password(&username, &password);
        for scope in Self::get_required_scopes() {
            request = request.add_scope(Scope::new(scope.to_string()));
        }

        let response = request
            .request_async(|req| token_http_client(http.clone(), req))
            .await
            .map_err(|e| {
                let reason = match e {
                    RequestTokenError::ServerResponse(resp) => resp.error().to_string(),
                    RequestTokenError::Request(err) => err.to_string(),
                    // Reddit answers a bad password with 200 and {"error": "invalid_grant"}.
                    RequestTokenError::Parse(_, body) => String::from_utf8_lossy(&body).into_owned(),
                    RequestTokenError::Other(message) => message,
                };
                CoreError::RedditApi(RedditApiError::AuthenticationFailed { reason })
            })?;

        let expires_in = response
            .expires_in()
            .unwrap_or_else(|| Duration::from_secs(3600));
        let scope = response
            .scopes()
            .map(|scopes| {
                scopes
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();

        debug!("Access token for u/{} valid for {:?}", self.config.username, expires_in);
        Ok(RedditToken {
            access_token: response.access_token().secret().clone(),
            expires_at: SystemTime::now() + expires_in,
            scope,
        })
    }

    /// Run an authorized call, dropping the cached token when Reddit
    /// reports it invalid so the next call logs in again.
    async fn authorized<T, F, Fut>(&self, call: F) -> Result<T, CoreError>
    where
        F: FnOnce(String) -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let token = self.access_token().await?;
        let result = call(token).await;
        if let Err(CoreError::RedditApi(RedditApiError::InvalidToken)) = &result {
            warn!("Access token for u/{} was rejected", self.config.username);
            self.invalidate_token();
        }
        result
    }

    async fn comment_page_replies(
        &self,
        token: &str,
        article: &str,
        focus_comment: Option<&str>,
        collector: &mut ReplyCollector,
    ) -> Result<(), CoreError> {
        let mut page = self.api.get_comment_page(token, article, focus_comment).await?;
        if page.len() < 2 {
            return Err(CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: format!("comment page for {} had {} listings", article, page.len()),
            }));
        }
        let comments = page.swap_remove(1);
        collector.collect_children(comments.data.children)
    }

    async fn load_reply_tree(&self, token: &str, item: &Item) -> Result<ReplyTree, CoreError> {
        let (article, focus) = match item {
            Item::Submission(submission) => (submission.id.as_str(), None),
            Item::Comment(comment) => (comment.submission_id(), Some(comment.id.as_str())),
        };
        let link_id = format!("t3_{}", article);

        let mut collector = ReplyCollector::new();
        self.comment_page_replies(token, article, focus, &mut collector)
            .await?;

        loop {
            let pending = collector.take_pending();
            if pending.is_empty() {
                break;
            }

            let batches = pending
                .child_ids
                .chunks(MORE_CHILDREN_BATCH)
                .map(|chunk| self.api.get_more_children(token, &link_id, chunk));
            for things in futures::future::try_join_all(batches).await? {
                collector.collect_children(things)?;
            }

            for parent in &pending.continue_threads {
                self.comment_page_replies(token, article, Some(parent), &mut collector)
                    .await?;
            }
        }

        debug!(
            "Loaded {} replies under {}",
            collector.len(),
            item.fullname()
        );
        Ok(ReplyTree::from_entries(item.fullname(), collector.into_entries()))
    }
}

/// Token endpoint transport for `oauth2`, reusing the API client's
/// connection pool and user agent.
async fn token_http_client(
    client: reqwest::Client,
    request: HttpRequest,
) -> Result<HttpResponse, reqwest::Error> {
    let response = client
        .request(request.method, request.url.as_str())
        .headers(request.headers)
        .body(request.body)
        .send()
        .await?;

    let status_code = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?.to_vec();

    Ok(HttpResponse {
        status_code,
        headers,
        body,
    })
}

#[async_trait]
impl Platform for RedditClient {
    async fn authenticate(&self) -> Result<Identity, CoreError> {
        let user = self
            .authorized(|token| async move { self.api.get_user_info(&token).await })
            .await?;

        if !user.name.eq_ignore_ascii_case(&self.config.username) {
            warn!(
                "Logged in as u/{} but configured as u/{}",
                user.name, self.config.username
            );
        }

        let identity = Identity::new(user.name);
        info!("Authenticated as {}", identity);
        *self.identity.write().unwrap_or_else(|e| e.into_inner()) = Some(identity.clone());
        Ok(identity)
    }

    async fn current_identity(&self) -> Result<Identity, CoreError> {
        let cached = self
            .identity
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match cached {
            Some(identity) => Ok(identity),
            None => self.authenticate().await,
        }
    }

    async fn fetch_new(
        &self,
        subreddit: &str,
        kind: ItemKind,
        limit: u32,
    ) -> Result<Vec<Item>, CoreError> {
        match kind {
            ItemKind::Submission => {
                let listing = self
                    .authorized(|token| async move {
                        self.api.get_new_submissions(&token, subreddit, limit).await
                    })
                    .await?;
                Ok(listing
                    .data
                    .children
                    .into_iter()
                    .map(|child| Item::Submission(Submission::from(child.data)))
                    .collect())
            }
            ItemKind::Comment => {
                let listing = self
                    .authorized(|token| async move {
                        self.api.get_new_comments(&token, subreddit, limit).await
                    })
                    .await?;
                Ok(listing
                    .data
                    .children
                    .into_iter()
                    .map(|child| Item::Comment(Comment::from(child.data)))
                    .collect())
            }
        }
    }

    async fn expand_replies(&self, item: &Item) -> Result<ReplyTree, CoreError> {
        self.authorized(|token| async move { self.load_reply_tree(&token, item).await })
            .await
    }

    async fn post_reply(&self, item: &Item, text: &str) -> Result<PostedReply, CoreError> {
        let thing_id = item.fullname();
        self.authorized(|token| async move { self.api.submit_comment(&token, thing_id, text).await })
            .await
            .map(|comment| PostedReply {
                permalink: (!comment.permalink.is_empty())
                    .then(|| format!("{}{}", REDDIT_WEB_BASE, comment.permalink)),
                fullname: comment.name,
            })
            .map_err(|e| CoreError::ReplyRejected {
                thing_id: thing_id.to_string(),
                reason: e.to_string(),
            })
    }

    async fn parent_of(&self, comment: &Comment) -> Result<Item, CoreError> {
        let parent_id = comment.parent_id.as_str();
        let thing = self
            .authorized(|token| async move { self.api.get_info(&token, parent_id).await })
            .await?;

        match thing {
            Thing::Link(post) => Ok(Item::Submission(post.into())),
            Thing::Comment(parent) => Ok(Item::Comment(parent.into())),
            Thing::More(_) | Thing::Other(_) => {
                Err(CoreError::RedditApi(RedditApiError::InvalidResponse {
                    details: format!("{} is not a submission or comment", parent_id),
                }))
            }
        }
    }
}
