use anyhow::Result;
use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::io::Read;
use std::time::Duration;
use wland_core::{TransportMode, WebhookConfig};
use wland_errors::ChatError;

pub mod payload;

pub use payload::{
    StreamLine, TEXT_ALIASES, apply_directives, decode_stream_line, extract_reply, extract_text,
    has_directive_fields, merge_fragments, parse_response, split_json_objects,
};

pub const AUTH_HEADER: &str = "X-N8N-Auth";

/// Body of the outbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    #[serde(rename = "chatInput")]
    pub chat_input: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

/// A successful webhook response, either incrementally readable or complete.
pub enum WebhookReply {
    Stream(Box<dyn Read + Send>),
    Body(String),
}

impl std::fmt::Debug for WebhookReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebhookReply::Stream(_) => f.write_str("WebhookReply::Stream(..)"),
            WebhookReply::Body(body) => f.debug_tuple("WebhookReply::Body").field(body).finish(),
        }
    }
}

pub trait WebhookTransport {
    /// The URL requests are sent to, if configured.
    fn endpoint(&self) -> Option<String>;

    /// Sends one chat message. Non-2xx statuses and transport failures come
    /// back as [`ChatError`]s wrapped in `anyhow::Error`.
    fn post(&self, payload: &ChatPayload) -> Result<WebhookReply>;
}

#[derive(Debug, Clone)]
pub struct WebhookClient {
    cfg: WebhookConfig,
    client: Client,
}

impl WebhookClient {
    pub fn new(cfg: WebhookConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds.max(1)))
            .build()?;
        Ok(Self { cfg, client })
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.cfg
    }

    pub fn build_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = self.cfg.resolve_auth_token() {
            headers.insert(
                HeaderName::from_bytes(AUTH_HEADER.as_bytes())?,
                HeaderValue::from_str(&token)?,
            );
        }
        Ok(headers)
    }

    fn is_stream_response(&self, resp: &Response) -> bool {
        match self.cfg.transport {
            TransportMode::Stream => true,
            TransportMode::Buffered => false,
            TransportMode::Auto => {
                let content_type = resp
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_ascii_lowercase();
                content_type.contains("ndjson")
                    || content_type.contains("jsonl")
                    || content_type.contains("event-stream")
                    || resp.content_length().is_none()
            }
        }
    }
}

impl WebhookTransport for WebhookClient {
    fn endpoint(&self) -> Option<String> {
        self.cfg.resolve_url()
    }

    fn post(&self, payload: &ChatPayload) -> Result<WebhookReply> {
        let url = self.endpoint().ok_or(ChatError::Configuration)?;
        let response = self
            .client
            .post(&url)
            .headers(self.build_headers()?)
            .body(serde_json::to_vec(payload)?)
            .send()
            .map_err(|err| format_transport_error(&err, &url, self.cfg.timeout_seconds))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ChatError::from_status(status.as_u16(), &url, &body).into());
        }

        if self.is_stream_response(&response) {
            return Ok(WebhookReply::Stream(Box::new(response)));
        }
        let body = response
            .text()
            .map_err(|err| format_transport_error(&err, &url, self.cfg.timeout_seconds))?;
        Ok(WebhookReply::Body(body))
    }
}

/// Maps a reqwest failure onto the timeout / transport variants.
fn format_transport_error(err: &reqwest::Error, url: &str, timeout_seconds: u64) -> ChatError {
    if err.is_timeout() {
        return ChatError::Timeout {
            url: url.to_string(),
            seconds: timeout_seconds,
        };
    }
    let inner = err.source().map(|e| e.to_string()).unwrap_or_default();
    let detail = if inner.is_empty() {
        err.to_string()
    } else {
        format!("{err}: {inner}")
    };
    ChatError::Transport {
        url: url.to_string(),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wland_testkit::{MockResponse, MockWebhook};

    fn client_for(url: &str, transport: TransportMode, token: Option<&str>) -> WebhookClient {
        WebhookClient::new(WebhookConfig {
            url: url.to_string(),
            auth_token: token.map(ToString::to_string),
            auth_token_env: "WLAND_CHAT_TOKEN_UNSET_FOR_WEBHOOK_TEST".to_string(),
            timeout_seconds: 5,
            transport,
        })
        .expect("client")
    }

    fn payload() -> ChatPayload {
        ChatPayload {
            chat_input: "Hola".to_string(),
            session_id: "temp_1_abc".to_string(),
        }
    }

    #[test]
    fn payload_uses_webhook_field_names() {
        let value = serde_json::to_value(payload()).expect("serialize");
        assert_eq!(value["chatInput"], "Hola");
        assert_eq!(value["sessionId"], "temp_1_abc");
    }

    #[test]
    fn auth_header_only_sent_when_token_configured() {
        let with_token = client_for("http://127.0.0.1:9/x", TransportMode::Auto, Some("s3cret"));
        let headers = with_token.build_headers().expect("headers");
        assert_eq!(headers.get(AUTH_HEADER).expect("auth"), "s3cret");
        assert_eq!(headers.get(CONTENT_TYPE).expect("ct"), "application/json");

        let without = client_for("http://127.0.0.1:9/x", TransportMode::Auto, Some("  "));
        assert!(without.build_headers().expect("headers").get(AUTH_HEADER).is_none());
    }

    #[test]
    fn missing_url_fails_before_network_call() {
        let client = client_for("   ", TransportMode::Auto, None);
        let err = client.post(&payload()).expect_err("no url");
        assert_eq!(
            err.downcast_ref::<ChatError>(),
            Some(&ChatError::Configuration)
        );
    }

    #[test]
    fn buffered_json_body_is_returned_whole() {
        let server = MockWebhook::start(vec![MockResponse::json(
            200,
            r#"{"message":"¡Hola! ¿Cómo puedo ayudarte?"}"#,
        )]);
        let client = client_for(&server.endpoint, TransportMode::Auto, Some("tok"));
        let reply = client.post(&payload()).expect("reply");
        match reply {
            WebhookReply::Body(body) => assert!(body.contains("¿Cómo puedo ayudarte?")),
            other => panic!("expected body, got {other:?}"),
        }

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.method, "POST");
        assert_eq!(request.header("x-n8n-auth").as_deref(), Some("tok"));
        assert_eq!(
            request.header("content-type").as_deref(),
            Some("application/json")
        );
        let body: serde_json::Value = serde_json::from_str(&request.body).expect("json body");
        assert_eq!(body["chatInput"], "Hola");
        assert_eq!(body["sessionId"], "temp_1_abc");
    }

    #[test]
    fn ndjson_response_is_streamed() {
        let server = MockWebhook::start(vec![MockResponse::streaming(
            200,
            "application/x-ndjson",
            vec!["{\"type\":\"begin\"}\n", "{\"content\":\"Hi\"}\n"],
        )]);
        let client = client_for(&server.endpoint, TransportMode::Auto, None);
        let reply = client.post(&payload()).expect("reply");
        let WebhookReply::Stream(mut reader) = reply else {
            panic!("expected stream");
        };
        let mut body = String::new();
        reader.read_to_string(&mut body).expect("read");
        assert!(body.contains("\"Hi\""));
    }

    #[test]
    fn buffered_mode_forces_full_read() {
        let server = MockWebhook::start(vec![MockResponse::streaming(
            200,
            "application/x-ndjson",
            vec!["{\"content\":\"Hi\"}\n"],
        )]);
        let client = client_for(&server.endpoint, TransportMode::Buffered, None);
        assert!(matches!(
            client.post(&payload()).expect("reply"),
            WebhookReply::Body(_)
        ));
    }

    #[test]
    fn error_statuses_are_classified() {
        let cases = [
            (401, "Auth"),
            (403, "Auth"),
            (404, "NotFound"),
            (500, "Server"),
            (502, "Server"),
            (503, "Server"),
            (418, "Http"),
        ];
        for (status, expected) in cases {
            let server = MockWebhook::start(vec![MockResponse::json(status, r#"{"error":"x"}"#)]);
            let client = client_for(&server.endpoint, TransportMode::Auto, None);
            let err = client.post(&payload()).expect_err("status error");
            let chat_error = err.downcast_ref::<ChatError>().expect("typed error");
            let variant = match chat_error {
                ChatError::Auth { .. } => "Auth",
                ChatError::NotFound { .. } => "NotFound",
                ChatError::Server { .. } => "Server",
                ChatError::Http { .. } => "Http",
                _ => "other",
            };
            assert_eq!(variant, expected, "status {status}");
        }
    }

    #[test]
    fn not_found_error_names_the_webhook_url() {
        let server = MockWebhook::start(vec![MockResponse::json(404, "Not Found")]);
        let client = client_for(&server.endpoint, TransportMode::Auto, None);
        let err = client.post(&payload()).expect_err("404");
        assert!(err.to_string().contains(&server.endpoint));
    }

    #[test]
    fn connection_refused_is_a_transport_error() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("addr")
        };
        let client = client_for(&format!("http://{addr}/webhook"), TransportMode::Auto, None);
        let err = client.post(&payload()).expect_err("refused");
        assert!(matches!(
            err.downcast_ref::<ChatError>(),
            Some(ChatError::Transport { .. })
        ));
    }
}
