//! Wire-level tests for the Streamable HTTP client transport.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use serde_json::json;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wiremcp_http::{ReconnectionOptions, StreamableHttpOptions, StreamableHttpTransport};
use wiremcp_protocol::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, RequestId, Transport, TransportError,
    TransportSendOptions,
};

fn request_message(id: i64, method: &str) -> JsonRpcMessage {
    JsonRpcRequest::new(method, Some(json!({})), RequestId::Number(id)).into()
}

fn notification_message(method: &str) -> JsonRpcMessage {
    JsonRpcNotification::new(method, None).into()
}

fn fast_reconnect() -> ReconnectionOptions {
    ReconnectionOptions {
        initial_reconnection_delay: Duration::from_millis(20),
        max_reconnection_delay: Duration::from_millis(100),
        reconnection_delay_grow_factor: 1.5,
        max_retries: 2,
    }
}

async fn transport_for(server: &MockServer, options: StreamableHttpOptions) -> StreamableHttpTransport {
    let transport = StreamableHttpTransport::new(Url::parse(&server.uri()).unwrap(), options);
    transport.start().await.unwrap();
    transport
}

#[tokio::test]
async fn session_id_is_captured_and_echoed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("mcp-session-id", "sess-1")
                .set_body_json(json!({"jsonrpc": "2.0", "id": 0, "result": {}})),
        )
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let transport = transport_for(&server, StreamableHttpOptions::default()).await;

    transport
        .send(request_message(0, "initialize"), TransportSendOptions::default())
        .await
        .unwrap();
    assert_eq!(transport.session_id().as_deref(), Some("sess-1"));

    transport
        .send(request_message(1, "ping"), TransportSendOptions::default())
        .await
        .unwrap();

    transport.terminate_session().await.unwrap();
    assert_eq!(transport.session_id(), None);

    transport
        .send(request_message(2, "ping"), TransportSendOptions::default())
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let posts: Vec<_> = requests
        .iter()
        .filter(|r| r.method.as_str() == "POST")
        .collect();
    assert_eq!(posts.len(), 3);
    assert!(!posts[0].headers.contains_key("mcp-session-id"));
    assert_eq!(
        posts[1].headers.get("mcp-session-id").unwrap(),
        "sess-1"
    );
    // After DELETE the session header is gone again.
    assert!(!posts[2].headers.contains_key("mcp-session-id"));

    let delete = requests
        .iter()
        .find(|r| r.method.as_str() == "DELETE")
        .unwrap();
    assert_eq!(delete.headers.get("mcp-session-id").unwrap(), "sess-1");
}

#[tokio::test]
async fn accepted_notification_delivers_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    let transport = transport_for(&server, StreamableHttpOptions::default()).await;
    transport
        .send(
            notification_message("notifications/initialized"),
            TransportSendOptions::default(),
        )
        .await
        .unwrap();

    let nothing =
        tokio::time::timeout(Duration::from_millis(100), transport.receive()).await;
    assert!(nothing.is_err(), "no message should have been delivered");
}

#[tokio::test]
async fn not_found_with_session_surfaces_session_closed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let transport = transport_for(
        &server,
        StreamableHttpOptions {
            session_id: Some("sess-9".to_string()),
            ..Default::default()
        },
    )
    .await;

    let err = transport
        .send(request_message(0, "ping"), TransportSendOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::SessionClosed), "got {err:?}");
    assert_eq!(transport.session_id(), None);

    // Without a session a 404 is a plain HTTP error.
    let err = transport
        .send(request_message(1, "ping"), TransportSendOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Http { status: 404, .. }));
}

#[tokio::test]
async fn json_response_is_delivered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0", "id": 0, "result": {"ok": true}
        })))
        .mount(&server)
        .await;

    let transport = transport_for(&server, StreamableHttpOptions::default()).await;
    transport
        .send(request_message(0, "ping"), TransportSendOptions::default())
        .await
        .unwrap();

    let received = transport.receive().await.unwrap().unwrap();
    match received.message {
        JsonRpcMessage::Response(response) => {
            assert_eq!(response.result().unwrap()["ok"], json!(true));
        }
        other => panic!("expected response, got {other:?}"),
    }
}

#[tokio::test]
async fn sse_post_response_streams_messages_and_tokens() {
    let server = MockServer::start().await;
    let sse_body = "id: e1\ndata: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\",\"params\":{\"progressToken\":0,\"progress\":0.5}}\n\nid: e2\ndata: {\"jsonrpc\":\"2.0\",\"id\":0,\"result\":{}}\n\n";
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body, "text/event-stream"),
        )
        .mount(&server)
        .await;

    let transport = transport_for(&server, StreamableHttpOptions::default()).await;
    let tokens = Arc::new(StdMutex::new(Vec::new()));
    let tokens_sink = Arc::clone(&tokens);
    transport
        .send(
            request_message(0, "tools/call"),
            TransportSendOptions {
                on_resumption_token: Some(Arc::new(move |token| {
                    tokens_sink.lock().unwrap().push(token);
                })),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let first = transport.receive().await.unwrap().unwrap();
    assert_eq!(first.message.method(), Some("notifications/progress"));
    let second = transport.receive().await.unwrap().unwrap();
    assert!(matches!(second.message, JsonRpcMessage::Response(_)));

    assert_eq!(*tokens.lock().unwrap(), vec!["e1".to_string(), "e2".to_string()]);
}

#[tokio::test]
async fn unexpected_content_type_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html/>", "text/html"))
        .mount(&server)
        .await;

    let transport = transport_for(&server, StreamableHttpOptions::default()).await;
    let err = transport
        .send(request_message(0, "ping"), TransportSendOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::UnexpectedContentType(_)));
}

#[tokio::test]
async fn get_stream_reconnects_with_last_event_id_then_gives_up() {
    let server = MockServer::start().await;
    let sse_body =
        "id: e1\ndata: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\",\"params\":{\"level\":\"info\"}}\n\n";
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body, "text/event-stream"),
        )
        .mount(&server)
        .await;

    let transport = transport_for(
        &server,
        StreamableHttpOptions::default().with_reconnection(fast_reconnect()),
    )
    .await;
    transport.start_notification_stream().unwrap();

    // Drain deliveries until the stream gives up: three connections (the
    // initial one plus max_retries reconnects), then a surfaced error.
    let mut messages = 0;
    let error = loop {
        match tokio::time::timeout(Duration::from_secs(5), transport.receive())
            .await
            .expect("stream never gave up")
        {
            Ok(Some(_)) => messages += 1,
            Ok(None) => panic!("transport closed unexpectedly"),
            Err(e) => break e,
        }
    };
    assert_eq!(messages, 3);
    assert!(matches!(error, TransportError::ConnectionFailed(_)));

    let requests = server.received_requests().await.unwrap();
    let gets: Vec<_> = requests
        .iter()
        .filter(|r| r.method.as_str() == "GET")
        .collect();
    assert_eq!(gets.len(), 3);
    assert!(!gets[0].headers.contains_key("last-event-id"));
    assert_eq!(gets[1].headers.get("last-event-id").unwrap(), "e1");
    assert_eq!(gets[2].headers.get("last-event-id").unwrap(), "e1");
}

#[tokio::test]
async fn get_stream_405_means_unsupported_not_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    let transport = transport_for(
        &server,
        StreamableHttpOptions::default().with_reconnection(fast_reconnect()),
    )
    .await;
    transport.start_notification_stream().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // No error was surfaced and POSTs keep working.
    let nothing =
        tokio::time::timeout(Duration::from_millis(50), transport.receive()).await;
    assert!(nothing.is_err());
    transport
        .send(
            notification_message("notifications/initialized"),
            TransportSendOptions::default(),
        )
        .await
        .unwrap();

    let gets = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.method.as_str() == "GET")
        .count();
    assert_eq!(gets, 1, "a 405 GET must not be retried");
}

mod auth_support {
    use super::*;
    use async_trait::async_trait;
    use wiremcp_auth::{
        InvalidationScope, OAuthClientInformation, OAuthClientInformationFull,
        OAuthClientMetadata, OAuthClientProvider, OAuthResult, OAuthTokens,
    };

    #[derive(Default)]
    pub struct StaticProvider {
        pub tokens: StdMutex<Option<OAuthTokens>>,
        pub client_info: StdMutex<Option<OAuthClientInformationFull>>,
        pub verifier: StdMutex<Option<String>>,
    }

    impl StaticProvider {
        pub fn registered_with_refresh_token(access: &str, refresh: &str) -> Self {
            let provider = Self::default();
            *provider.client_info.lock().unwrap() = Some(
                serde_json::from_value(json!({
                    "client_id": "client-1",
                    "redirect_uris": ["http://localhost:3000/callback"]
                }))
                .unwrap(),
            );
            *provider.tokens.lock().unwrap() = Some(OAuthTokens {
                access_token: access.to_string(),
                token_type: "bearer".to_string(),
                expires_in: Some(3600),
                scope: None,
                refresh_token: Some(refresh.to_string()),
            });
            provider
        }
    }

    #[async_trait]
    impl OAuthClientProvider for StaticProvider {
        fn redirect_url(&self) -> String {
            "http://localhost:3000/callback".to_string()
        }

        fn client_metadata(&self) -> OAuthClientMetadata {
            OAuthClientMetadata {
                redirect_uris: vec![self.redirect_url()],
                ..Default::default()
            }
        }

        async fn client_information(&self) -> OAuthResult<Option<OAuthClientInformation>> {
            Ok(self
                .client_info
                .lock()
                .unwrap()
                .as_ref()
                .map(|full| full.client.clone()))
        }

        async fn save_client_information(
            &self,
            info: OAuthClientInformationFull,
        ) -> OAuthResult<()> {
            *self.client_info.lock().unwrap() = Some(info);
            Ok(())
        }

        async fn tokens(&self) -> OAuthResult<Option<OAuthTokens>> {
            Ok(self.tokens.lock().unwrap().clone())
        }

        async fn save_tokens(&self, tokens: OAuthTokens) -> OAuthResult<()> {
            *self.tokens.lock().unwrap() = Some(tokens);
            Ok(())
        }

        async fn redirect_to_authorization(&self, _url: Url) -> OAuthResult<()> {
            Ok(())
        }

        async fn save_code_verifier(&self, verifier: String) -> OAuthResult<()> {
            *self.verifier.lock().unwrap() = Some(verifier);
            Ok(())
        }

        async fn code_verifier(&self) -> OAuthResult<String> {
            Ok(self.verifier.lock().unwrap().clone().unwrap_or_default())
        }

        async fn invalidate_credentials(&self, scope: InvalidationScope) -> OAuthResult<()> {
            match scope {
                InvalidationScope::All => {
                    *self.client_info.lock().unwrap() = None;
                    *self.tokens.lock().unwrap() = None;
                    *self.verifier.lock().unwrap() = None;
                }
                InvalidationScope::Client => *self.client_info.lock().unwrap() = None,
                InvalidationScope::Tokens => *self.tokens.lock().unwrap() = None,
                InvalidationScope::Verifier => *self.verifier.lock().unwrap() = None,
            }
            Ok(())
        }
    }
}

#[tokio::test]
async fn unauthorized_post_refreshes_and_retries_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .and(header("authorization", "Bearer A0"))
        .respond_with(
            ResponseTemplate::new(401)
                .insert_header("www-authenticate", "Bearer resource_metadata=\"ignored\""),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": server.uri(),
            "authorization_endpoint": format!("{}/authorize", server.uri()),
            "token_endpoint": format!("{}/token", server.uri())
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "A1",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "R1"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/"))
        .and(header("authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0", "id": 0, "result": {"authorized": true}
        })))
        .mount(&server)
        .await;

    let provider = Arc::new(auth_support::StaticProvider::registered_with_refresh_token(
        "A0", "R0",
    ));
    let transport = transport_for(
        &server,
        StreamableHttpOptions::default().with_auth_provider(provider),
    )
    .await;

    transport
        .send(request_message(0, "tools/list"), TransportSendOptions::default())
        .await
        .unwrap();

    let received = transport.receive().await.unwrap().unwrap();
    match received.message {
        JsonRpcMessage::Response(response) => {
            assert_eq!(response.result().unwrap()["authorized"], json!(true));
        }
        other => panic!("expected response, got {other:?}"),
    }

    // Exactly two POSTs to the MCP endpoint: the 401 and the single retry.
    let posts = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.method.as_str() == "POST" && r.url.path() == "/")
        .count();
    assert_eq!(posts, 2);
}

#[tokio::test]
async fn resumption_token_reopens_the_stream_instead_of_posting() {
    let server = MockServer::start().await;
    let sse_body = "id: tok-2\ndata: {\"jsonrpc\":\"2.0\",\"id\":5,\"result\":{}}\n\n";
    Mock::given(method("GET"))
        .and(header("last-event-id", "tok-1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body, "text/event-stream"),
        )
        .mount(&server)
        .await;

    let transport = transport_for(
        &server,
        StreamableHttpOptions::default().with_reconnection(ReconnectionOptions {
            max_retries: 0,
            ..fast_reconnect()
        }),
    )
    .await;

    transport
        .send(
            request_message(5, "tools/call"),
            TransportSendOptions {
                resumption_token: Some("tok-1".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let received = transport.receive().await.unwrap().unwrap();
    assert!(matches!(received.message, JsonRpcMessage::Response(_)));

    let requests = server.received_requests().await.unwrap();
    assert!(
        requests.iter().all(|r| r.method.as_str() != "POST"),
        "resumption must not re-POST the message"
    );
}
