#[cfg(test)]
mod tests {
    use crate::{api, AuthState, RedditClient, RedditOAuth2Config, RedditToken};
    use autoreply_core::{
        AccountCredentials, Comment, CoreError, Item, Platform, RedditApiError, Submission,
    };
    use httpmock::prelude::*;
    use serde_json::{json, Value};
    use std::time::{Duration, SystemTime};

    fn create_test_config() -> RedditOAuth2Config {
        RedditOAuth2Config::new(
            "test_client_id".to_string(),
            "test_client_secret".to_string(),
            "test_user".to_string(),
            "hunter2".to_string(),
            "autoreply/1.0 (by u/test_user)".to_string(),
        )
    }

    fn token_expiring_in(offset: Duration, expired: bool) -> RedditToken {
        let now = SystemTime::now();
        RedditToken {
            access_token: "test_access_token".to_string(),
            expires_at: if expired { now - offset } else { now + offset },
            scope: "identity read submit".to_string(),
        }
    }

    /// A logged-in client talking to `base_url` instead of Reddit.
    fn client_for(base_url: &str) -> RedditClient {
        let config = create_test_config();
        let api = api::RedditApiClient::with_base_url(config.user_agent.clone(), base_url).unwrap();
        let client = RedditClient::with_api(config, api).unwrap();
        client.set_token(token_expiring_in(Duration::from_secs(3600), false));
        client
    }

    /// A client whose API calls fail fast with a refused connection.
    fn offline_client() -> RedditClient {
        client_for("http://127.0.0.1:9")
    }

    fn comment_json(id: &str, parent: &str, author: &str, replies: Value) -> Value {
        json!({
            "kind": "t1",
            "data": {
                "id": id,
                "name": format!("t1_{id}"),
                "body": "text",
                "author": author,
                "parent_id": parent,
                "link_id": "t3_abc",
                "subreddit": "FortNiteBR",
                "permalink": format!("/r/FortNiteBR/comments/abc/_/{id}/"),
                "replies": replies
            }
        })
    }

    fn listing_json(children: Vec<Value>) -> Value {
        json!({"kind": "Listing", "data": {"children": children, "after": null, "before": null}})
    }

    fn comment_page(children: Vec<Value>) -> Value {
        json!([listing_json(vec![]), listing_json(children)])
    }

    fn sample_submission() -> Item {
        Item::Submission(Submission {
            id: "abc".to_string(),
            fullname: "t3_abc".to_string(),
            title: "Free V-bucks giveaway!!".to_string(),
            selftext: String::new(),
            author: Some("someone".to_string()),
            subreddit: "FortNiteBR".to_string(),
            permalink: "/r/FortNiteBR/comments/abc/free/".to_string(),
        })
    }

    #[test]
    fn test_config_creation() {
        let config = create_test_config();
        assert_eq!(config.client_id, "test_client_id");
        assert_eq!(config.client_secret, "test_client_secret");
        assert_eq!(config.username, "test_user");
        assert_eq!(config.user_agent, "autoreply/1.0 (by u/test_user)");
    }

    #[test]
    fn test_config_from_credentials_uses_default_user_agent() {
        let credentials = AccountCredentials {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            password: "pw".to_string(),
            user_agent: None,
        };

        let config = RedditOAuth2Config::from_credentials("helpful_bot", &credentials);
        assert_eq!(config.username, "helpful_bot");
        assert_eq!(config.password, "pw");
        assert!(config.user_agent.contains("u/helpful_bot"));
    }

    #[test]
    fn test_client_creation() {
        let client = RedditClient::new(create_test_config()).unwrap();
        assert_eq!(client.username(), "test_user");
        assert!(!client.is_authenticated());
        assert_eq!(client.get_auth_state(), AuthState::NotAuthenticated);
    }

    #[test]
    fn test_required_scopes() {
        let scopes = RedditClient::get_required_scopes();
        assert_eq!(scopes, vec!["identity", "read", "submit"]);
    }

    #[test]
    fn test_token_creation_and_expiry() {
        let valid_token = token_expiring_in(Duration::from_secs(3600), false);
        let nearly_expired = token_expiring_in(Duration::from_secs(30), false);
        let expired_token = token_expiring_in(Duration::from_secs(3600), true);

        assert!(!valid_token.is_expired());
        assert!(nearly_expired.is_expired());
        assert!(expired_token.is_expired());

        let client = RedditClient::new(create_test_config()).unwrap();

        client.set_token(valid_token.clone());
        assert!(client.is_authenticated());
        assert!(matches!(
            client.get_auth_state(),
            AuthState::Authenticated { .. }
        ));

        client.set_token(expired_token);
        assert!(!client.is_authenticated());
        assert_eq!(client.get_auth_state(), AuthState::Expired);
    }

    #[test]
    fn test_token_serialization() {
        let token = RedditToken {
            access_token: "test_access_token".to_string(),
            expires_at: SystemTime::UNIX_EPOCH + Duration::from_secs(1640995200),
            scope: "identity read".to_string(),
        };

        let serialized = serde_json::to_string(&token).unwrap();
        assert!(serialized.contains("test_access_token"));

        let deserialized: RedditToken = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized.access_token, token.access_token);
        assert_eq!(deserialized.expires_at, token.expires_at);
        assert_eq!(deserialized.scope, token.scope);
    }

    #[test]
    fn test_debug_output_hides_secrets() {
        let client = RedditClient::new(create_test_config()).unwrap();
        let output = format!("{:?}", client);
        assert!(output.contains("test_user"));
        assert!(!output.contains("hunter2"));
        assert!(!output.contains("test_client_secret"));
    }

    #[test]
    fn test_cached_token_is_reused() {
        let client = offline_client();
        let token = tokio_test::block_on(client.access_token()).unwrap();
        assert_eq!(token, "test_access_token");
    }

    #[tokio::test]
    async fn test_failed_reply_is_reported_as_rejected() {
        let client = offline_client();
        let result = client.post_reply(&sample_submission(), "Beware of scams!").await;

        match result {
            Err(CoreError::ReplyRejected { thing_id, .. }) => assert_eq!(thing_id, "t3_abc"),
            other => panic!("Expected ReplyRejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_api_surfaces_network_error() {
        let client = offline_client();
        let comment = Comment {
            id: "c1".to_string(),
            fullname: "t1_c1".to_string(),
            body: "thanks".to_string(),
            author: Some("someone".to_string()),
            parent_id: "t1_c0".to_string(),
            link_id: "t3_abc".to_string(),
            subreddit: "FortNiteBR".to_string(),
            permalink: String::new(),
        };

        let result = client.parent_of(&comment).await;
        assert!(matches!(
            result,
            Err(CoreError::Network(_)) | Err(CoreError::RedditApi(RedditApiError::RequestTimeout))
        ));
    }

    #[tokio::test]
    async fn test_reply_tree_follows_more_and_continue_placeholders() {
        let server = MockServer::start_async().await;
        let page = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/comments/abc")
                    .query_param("comment", "top")
                    .query_param("raw_json", "1");
                then.status(200).json_body(comment_page(vec![comment_json(
                    "top",
                    "t3_abc",
                    "someone",
                    listing_json(vec![json!({
                        "kind": "more",
                        "data": {"id": "m1", "parent_id": "t1_top", "count": 1, "children": ["m1"]}
                    })]),
                )]));
            })
            .await;
        let more = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/morechildren")
                    .query_param("link_id", "t3_abc")
                    .query_param("children", "m1");
                then.status(200).json_body(json!({
                    "json": {
                        "errors": [],
                        "data": {"things": [
                            comment_json("m1", "t1_top", "alice", json!("")),
                            {"kind": "more", "data": {"id": "_", "parent_id": "t1_m1", "count": 0, "children": []}}
                        ]}
                    }
                }));
            })
            .await;
        let continued = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/comments/abc")
                    .query_param("comment", "m1");
                then.status(200).json_body(comment_page(vec![comment_json(
                    "m1",
                    "t1_top",
                    "alice",
                    listing_json(vec![comment_json("deep", "t1_m1", "test_user", json!(""))]),
                )]));
            })
            .await;

        let client = client_for(&server.base_url());
        let item = Item::Comment(Comment {
            id: "top".to_string(),
            fullname: "t1_top".to_string(),
            body: "giveaway".to_string(),
            author: Some("someone".to_string()),
            parent_id: "t3_abc".to_string(),
            link_id: "t3_abc".to_string(),
            subreddit: "FortNiteBR".to_string(),
            permalink: String::new(),
        });

        let tree = client.expand_replies(&item).await.unwrap();
        let found: Vec<(&str, Option<&str>)> = tree
            .iter()
            .map(|reply| (reply.fullname.as_str(), reply.author.as_deref()))
            .collect();
        assert_eq!(
            found,
            vec![("t1_m1", Some("alice")), ("t1_deep", Some("test_user"))]
        );

        assert_eq!(page.calls_async().await, 1);
        assert_eq!(more.calls_async().await, 1);
        assert_eq!(continued.calls_async().await, 1);
    }

    #[tokio::test]
    async fn test_rejected_token_is_dropped() {
        let server = MockServer::start_async().await;
        let me = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/me");
                then.status(401).json_body(json!({"message": "Unauthorized", "error": 401}));
            })
            .await;

        let client = client_for(&server.base_url());
        assert!(client.is_authenticated());

        let result = client.authenticate().await;
        assert!(matches!(
            result,
            Err(CoreError::RedditApi(RedditApiError::InvalidToken))
        ));
        assert_eq!(client.get_auth_state(), AuthState::NotAuthenticated);
        assert_eq!(me.calls_async().await, 1);
    }

    #[tokio::test]
    async fn test_ratelimit_envelope_is_reported_as_rejected() {
        let server = MockServer::start_async().await;
        let submit = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/comment")
                    .body_includes("thing_id=t3_abc");
                then.status(200).json_body(json!({
                    "json": {
                        "errors": [["RATELIMIT", "you are doing that too much. try again in 5 minutes.", "ratelimit"]]
                    }
                }));
            })
            .await;

        let client = client_for(&server.base_url());
        let result = client.post_reply(&sample_submission(), "Beware of scams!").await;

        match result {
            Err(CoreError::ReplyRejected { thing_id, reason }) => {
                assert_eq!(thing_id, "t3_abc");
                assert!(reason.contains("RATELIMIT"), "{reason}");
            }
            other => panic!("Expected ReplyRejected, got {:?}", other),
        }
        assert_eq!(submit.calls_async().await, 1);
        assert!(client.is_authenticated());
    }

    #[tokio::test]
    async fn test_posted_reply_carries_fullname_and_permalink() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/comment");
                then.status(200).json_body(json!({
                    "json": {
                        "errors": [],
                        "data": {"things": [comment_json("new1", "t3_abc", "test_user", json!(""))]}
                    }
                }));
            })
            .await;

        let client = client_for(&server.base_url());
        let posted = client
            .post_reply(&sample_submission(), "Beware of scams!")
            .await
            .unwrap();

        assert_eq!(posted.fullname, "t1_new1");
        assert_eq!(
            posted.permalink.as_deref(),
            Some("https://www.reddit.com/r/FortNiteBR/comments/abc/_/new1/")
        );
    }
}
