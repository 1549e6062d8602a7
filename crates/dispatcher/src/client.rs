use quill_core::headers;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Longest slice of a rejected response body kept in `error_message`.
const MAX_ERROR_BODY: usize = 200;
/// Bytes read from a rejected response; enough for `MAX_ERROR_BODY` chars.
const MAX_ERROR_BODY_BYTES: usize = MAX_ERROR_BODY * 4;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to build http client: {0}")]
    Build(#[from] reqwest::Error),
}

/// One signed POST to a subscriber.
#[derive(Debug, Clone)]
pub struct OutboundRequest<'a> {
    pub url: &'a str,
    pub delivery_id: &'a str,
    pub event_type: &'a str,
    pub body: &'a str,
    pub signature: &'a str,
    pub timestamp: i64,
}

/// How a single attempt ended. Only [`DeliveryOutcome::Delivered`] counts as success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { status: u16 },
    Rejected { status: u16, body: String },
    /// Redirects are never followed.
    Redirected { status: u16, location: Option<String> },
    TimedOut,
    Network(String),
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }

    pub fn response_status(&self) -> Option<i32> {
        match self {
            DeliveryOutcome::Delivered { status }
            | DeliveryOutcome::Rejected { status, .. }
            | DeliveryOutcome::Redirected { status, .. } => Some(i32::from(*status)),
            DeliveryOutcome::TimedOut | DeliveryOutcome::Network(_) => None,
        }
    }

    pub fn error_message(&self) -> Option<String> {
        match self {
            DeliveryOutcome::Delivered { .. } => None,
            DeliveryOutcome::Rejected { status, body } if body.is_empty() => {
                Some(format!("HTTP {}", status))
            }
            DeliveryOutcome::Rejected { status, body } => Some(format!("HTTP {}: {}", status, body)),
            DeliveryOutcome::Redirected { status, location } => Some(match location {
                Some(location) => format!("HTTP {}: redirect to {} not followed", status, location),
                None => format!("HTTP {}: redirect not followed", status),
            }),
            DeliveryOutcome::TimedOut => Some("request timed out".to_string()),
            DeliveryOutcome::Network(message) => Some(message.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
}

impl DeliveryClient {
    pub fn new(timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("quill-webhooks/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Sends one attempt. Transport problems become outcomes, never errors.
    pub async fn send(&self, request: &OutboundRequest<'_>) -> DeliveryOutcome {
        let start = Instant::now();
        let result = self
            .client
            .post(request.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(headers::EVENT, request.event_type)
            .header(headers::DELIVERY, request.delivery_id)
            .header(headers::SIGNATURE, request.signature)
            .header(headers::TIMESTAMP, request.timestamp.to_string())
            .body(request.body.to_owned())
            .send()
            .await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let mut response = match result {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                debug!(delivery_id = request.delivery_id, latency_ms, "webhook request timed out");
                return DeliveryOutcome::TimedOut;
            }
            Err(err) => {
                debug!(delivery_id = request.delivery_id, error = %err, "webhook request failed");
                return DeliveryOutcome::Network(describe(&err));
            }
        };

        let status = response.status();
        debug!(
            delivery_id = request.delivery_id,
            status = status.as_u16(),
            latency_ms,
            "webhook responded"
        );

        if status.is_success() {
            return DeliveryOutcome::Delivered {
                status: status.as_u16(),
            };
        }

        if status.is_redirection() {
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned);
            warn!(
                delivery_id = request.delivery_id,
                status = status.as_u16(),
                location = location.as_deref().unwrap_or(""),
                "webhook endpoint redirected; not following"
            );
            return DeliveryOutcome::Redirected {
                status: status.as_u16(),
                location,
            };
        }

        let body = read_prefix(&mut response, MAX_ERROR_BODY_BYTES).await;
        DeliveryOutcome::Rejected {
            status: status.as_u16(),
            body: truncate(body.trim(), MAX_ERROR_BODY),
        }
    }
}

/// Reads at most about `max_bytes` of the body, leaving the rest unread.
async fn read_prefix(response: &mut reqwest::Response, max_bytes: usize) -> String {
    let mut buf = Vec::new();
    while buf.len() < max_bytes {
        match response.chunk().await {
            Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
            Ok(None) => break,
            Err(err) => {
                debug!(error = %err, "failed to read rejected response body");
                break;
            }
        }
    }
    buf.truncate(max_bytes);
    String::from_utf8_lossy(&buf).into_owned()
}

fn describe(err: &reqwest::Error) -> String {
    if err.is_connect() {
        format!("connection failed: {}", err)
    } else {
        err.to_string()
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(url: &str) -> OutboundRequest<'_> {
        OutboundRequest {
            url,
            delivery_id: "dlv_test",
            event_type: "note.created",
            body: r#"{"noteId":"n1"}"#,
            signature: "sha256=abc",
            timestamp: 1_700_000_000,
        }
    }

    fn client() -> DeliveryClient {
        DeliveryClient::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_sends_signed_headers_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("content-type", "application/json"))
            .and(header("X-Quill-Event", "note.created"))
            .and(header("X-Quill-Delivery", "dlv_test"))
            .and(header("X-Quill-Signature", "sha256=abc"))
            .and(header("X-Quill-Timestamp", "1700000000"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/hook", server.uri());
        let outcome = client().send(&request(&url)).await;

        assert_eq!(outcome, DeliveryOutcome::Delivered { status: 204 });
        assert!(outcome.is_success());
        assert_eq!(outcome.response_status(), Some(204));
        assert!(outcome.error_message().is_none());

        let received = server.received_requests().await.unwrap();
        assert_eq!(received[0].body, br#"{"noteId":"n1"}"#.to_vec());
    }

    #[tokio::test]
    async fn test_server_error_is_rejected_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("database down"))
            .mount(&server)
            .await;

        let outcome = client().send(&request(&server.uri())).await;

        assert!(!outcome.is_success());
        assert_eq!(outcome.response_status(), Some(500));
        assert_eq!(outcome.error_message().as_deref(), Some("HTTP 500: database down"));
    }

    #[tokio::test]
    async fn test_large_rejection_body_is_cut() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("x".repeat(1 << 20)))
            .mount(&server)
            .await;

        let outcome = client().send(&request(&server.uri())).await;

        let DeliveryOutcome::Rejected { status, body } = &outcome else {
            panic!("expected a rejection, got {:?}", outcome);
        };
        assert_eq!(*status, 502);
        assert_eq!(body.len(), MAX_ERROR_BODY + 3);
        assert!(body.ends_with("..."));
        assert_eq!(
            outcome.error_message(),
            Some(format!("HTTP 502: {}...", "x".repeat(MAX_ERROR_BODY)))
        );
    }

    #[tokio::test]
    async fn test_client_error_without_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&server)
            .await;

        let outcome = client().send(&request(&server.uri())).await;
        assert_eq!(outcome.error_message().as_deref(), Some("HTTP 410"));
    }

    #[tokio::test]
    async fn test_redirect_is_not_followed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/old"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("Location", format!("{}/new", server.uri())),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let url = format!("{}/old", server.uri());
        let outcome = client().send(&request(&url)).await;

        assert!(matches!(outcome, DeliveryOutcome::Redirected { status: 302, .. }));
        assert_eq!(outcome.response_status(), Some(302));
        assert!(outcome.error_message().unwrap().contains("not followed"));
    }

    #[tokio::test]
    async fn test_slow_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let client = DeliveryClient::new(Duration::from_millis(100)).unwrap();
        let outcome = client.send(&request(&server.uri())).await;

        assert_eq!(outcome, DeliveryOutcome::TimedOut);
        assert_eq!(outcome.response_status(), None);
        assert_eq!(outcome.error_message().as_deref(), Some("request timed out"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_failure() {
        let outcome = client().send(&request("http://127.0.0.1:1/hook")).await;

        assert!(matches!(outcome, DeliveryOutcome::Network(_)));
        assert_eq!(outcome.response_status(), None);
        assert!(outcome.error_message().is_some());
    }

    #[test]
    fn test_truncate_keeps_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééé", 2), "éé...");
    }
}
