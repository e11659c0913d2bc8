//! `OpenAiCompatClient` against a scripted local HTTP server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use occam_core::provider::{ChatMessage, SamplingParams};
use occam_core::{ChatProvider, ChatRequest, OpenAiCompatClient, ProviderError, RetryPolicy};

/// Answers every request with the same status and body, keeping the raw
/// request text for inspection.
struct ScriptedServer {
    base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl ScriptedServer {
    async fn start(status: u16, body: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let seen = Arc::clone(&requests);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let seen = Arc::clone(&seen);
                tokio::spawn(serve(stream, status, body, seen));
            }
        });

        Self {
            base_url: format!("http://{addr}/v1"),
            requests,
        }
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

async fn serve(
    mut stream: TcpStream,
    status: u16,
    body: &'static str,
    seen: Arc<Mutex<Vec<String>>>,
) -> Option<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    // Recorded before replying so the client never observes a missing entry.
    seen.lock().unwrap().push(String::from_utf8_lossy(&buf).to_string());

    let response = format!(
        "HTTP/1.1 {status} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await.ok()?;
    stream.shutdown().await.ok()
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        backoff_base_ms: 1,
        backoff_max_ms: 5,
    }
}

fn client(server: &ScriptedServer, max_attempts: u32) -> OpenAiCompatClient {
    OpenAiCompatClient::new(
        &server.base_url,
        "test-key",
        Duration::from_secs(5),
        fast_retry(max_attempts),
    )
    .unwrap()
}

fn request() -> ChatRequest {
    ChatRequest::new(
        "test-model",
        vec![
            ChatMessage::system("You are a helpful assistant."),
            ChatMessage::user("Say hello."),
        ],
        &SamplingParams::default(),
    )
}

#[tokio::test]
async fn success_returns_first_choice() {
    let server = ScriptedServer::start(
        200,
        r#"{"choices":[{"message":{"role":"assistant","content":"hello there"}}],"usage":{"prompt_tokens":7,"completion_tokens":2,"total_tokens":9}}"#,
    )
    .await;

    let completion = client(&server, 3).complete(&request()).await.unwrap();
    assert_eq!(completion.text, "hello there");
    assert_eq!(completion.usage.unwrap().total_tokens, 9);

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let raw = requests[0].to_ascii_lowercase();
    assert!(raw.starts_with("post /v1/chat/completions"));
    assert!(raw.contains("authorization: bearer test-key"));
    assert!(requests[0].contains(r#""model":"test-model""#));
}

#[tokio::test]
async fn unauthorized_fails_without_retry() {
    let server = ScriptedServer::start(401, r#"{"error":"invalid api key"}"#).await;

    let err = client(&server, 4).complete(&request()).await.unwrap_err();
    assert!(matches!(err, ProviderError::Authentication(_)));
    assert!(err.is_fatal());
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn server_errors_exhaust_the_retry_budget() {
    let server = ScriptedServer::start(503, r#"{"error":"overloaded"}"#).await;

    let err = client(&server, 3).complete(&request()).await.unwrap_err();
    match err {
        ProviderError::TransientExhausted {
            attempts,
            last_error,
        } => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("503"));
        }
        other => panic!("expected TransientExhausted, got {other}"),
    }
    assert_eq!(server.requests().len(), 3);
}

#[tokio::test]
async fn non_json_body_is_unknown_error() {
    let server = ScriptedServer::start(200, "<html>gateway</html>").await;

    let err = client(&server, 3).complete(&request()).await.unwrap_err();
    assert!(matches!(err, ProviderError::Unknown(_)));
    assert!(!err.is_fatal());
    assert_eq!(server.requests().len(), 1);
}
