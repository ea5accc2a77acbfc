use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use formflow_api::{FormflowClient, TokenRefresher};
use formflow_engine::EngineError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serves one scripted response per connection and records each request's
/// `Authorization` header.
async fn scripted_backend(responses: Vec<(u16, &'static str)>) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();

    tokio::spawn(async move {
        for (status, body) in responses {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            while !request.windows(4).any(|window| window == b"\r\n\r\n") {
                let read = socket.read(&mut chunk).await.unwrap_or(0);
                if read == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..read]);
            }
            let text = String::from_utf8_lossy(&request).to_string();
            let authorization = text
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("authorization").then(|| value.trim().to_string())
                })
                .unwrap_or_default();
            log.lock().unwrap().push(authorization);

            let reason = if status == 200 { "OK" } else { "Unauthorized" };
            let response = format!(
                "HTTP/1.1 {} {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                reason,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    (format!("http://{}", address), seen)
}

struct CountingRefresher {
    calls: AtomicUsize,
    token: Option<&'static str>,
}

impl CountingRefresher {
    fn returning(token: Option<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            token,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenRefresher for CountingRefresher {
    async fn refresh(&self) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.token.map(str::to_string).ok_or_else(|| anyhow!("refresh rejected"))
    }
}

fn client(base_url: &str, refresher: &Arc<CountingRefresher>) -> FormflowClient {
    FormflowClient::new(base_url, Some("stale-token".into()), Duration::from_secs(5))
        .expect("client")
        .with_refresher(refresher.clone())
}

#[tokio::test]
async fn expired_token_is_refreshed_and_request_retried_once() {
    let (base_url, seen) = scripted_backend(vec![(401, r#"{"message":"token expired"}"#), (200, r#"["Shuwaikh","Shuaiba"]"#)]).await;
    let refresher = CountingRefresher::returning(Some("fresh-token"));

    let ports: Vec<String> = client(&base_url, &refresher).get_json(&["lookups", "ports"]).await.expect("retried request succeeds");

    assert_eq!(ports, vec!["Shuwaikh".to_string(), "Shuaiba".to_string()]);
    assert_eq!(refresher.calls(), 1);
    assert_eq!(seen.lock().unwrap().as_slice(), ["Bearer stale-token", "Bearer fresh-token"]);
}

#[tokio::test]
async fn second_rejection_becomes_unauthorized() {
    let (base_url, seen) = scripted_backend(vec![(401, r#"{"message":"token expired"}"#), (401, r#"{"message":"session revoked"}"#)]).await;
    let refresher = CountingRefresher::returning(Some("fresh-token"));

    let failure = client(&base_url, &refresher)
        .get_json::<Vec<String>>(&["lookups", "ports"])
        .await
        .expect_err("both attempts rejected");

    assert!(failure.is_unauthorized());
    assert_eq!(refresher.calls(), 1);
    assert_eq!(seen.lock().unwrap().len(), 2);
    assert!(matches!(EngineError::from(failure), EngineError::Unauthorized { ref message } if message == "session revoked"));
}

#[tokio::test]
async fn failed_refresh_skips_the_retry() {
    let (base_url, seen) = scripted_backend(vec![(401, r#"{"message":"token expired"}"#)]).await;
    let refresher = CountingRefresher::returning(None);

    let failure = client(&base_url, &refresher)
        .get_json::<Vec<String>>(&["lookups", "ports"])
        .await
        .expect_err("refresh failed");

    assert_eq!(failure.status_code, 401);
    assert_eq!(failure.message, "token expired");
    assert_eq!(refresher.calls(), 1);
    assert_eq!(seen.lock().unwrap().len(), 1);
}
