//! Integration tests for HttpApplicationService against a local HTTP responder.

use spindle_application::{ApplicationError, ApplicationService, HttpApplicationService};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Serve exactly one request with a canned response, returning the request line.
async fn respond_once(status: &str, body: &str) -> (String, JoinHandle<String>) {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let base_url = format!("http://{}", listener.local_addr().unwrap());
  let response = format!(
    "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
    status,
    body.len(),
    body
  );

  let handle = tokio::spawn(async move {
    let (mut socket, _) = listener.accept().await.unwrap();
    let mut buffer = vec![0u8; 4096];
    let mut request = Vec::new();
    loop {
      let read = socket.read(&mut buffer).await.unwrap();
      request.extend_from_slice(&buffer[..read]);
      if read == 0 || request.windows(4).any(|w| w == b"\r\n\r\n") {
        break;
      }
    }
    socket.write_all(response.as_bytes()).await.unwrap();
    socket.shutdown().await.unwrap();

    let request = String::from_utf8_lossy(&request).to_string();
    request.lines().next().unwrap_or_default().to_string()
  });

  (base_url, handle)
}

#[tokio::test]
async fn test_found_application() {
  let (base_url, server) = respond_once(
    "200 OK",
    r#"{"name":"checkout","email":"payments@example.com","trafficGuards":[]}"#,
  )
  .await;
  let service = HttpApplicationService::new(&base_url).unwrap();

  let application = service
    .get_application("prod", "checkout")
    .await
    .unwrap()
    .expect("application should exist");

  assert_eq!(application.name, "checkout");
  assert_eq!(application.email.as_deref(), Some("payments@example.com"));
  assert!(application.attributes.contains_key("trafficGuards"));
  assert_eq!(
    server.await.unwrap(),
    "GET /v2/applications/checkout?account=prod HTTP/1.1"
  );
}

#[tokio::test]
async fn test_not_found_is_none() {
  let (base_url, server) = respond_once("404 Not Found", r#"{"error":"not found"}"#).await;
  let service = HttpApplicationService::new(&base_url).unwrap();

  let application = service.get_application("prod", "missing").await.unwrap();
  assert!(application.is_none());
  server.await.unwrap();
}

#[tokio::test]
async fn test_server_error_is_surfaced() {
  let (base_url, server) = respond_once("503 Service Unavailable", "overloaded").await;
  let service = HttpApplicationService::new(&base_url).unwrap();

  let err = service.get_application("prod", "checkout").await.unwrap_err();
  match err {
    ApplicationError::Status { status, body } => {
      assert_eq!(status, 503);
      assert_eq!(body, "overloaded");
    }
    other => panic!("unexpected error: {other}"),
  }
  server.await.unwrap();
}

#[tokio::test]
async fn test_malformed_body_is_http_error() {
  let (base_url, server) = respond_once("200 OK", "{not json").await;
  let service = HttpApplicationService::new(&base_url).unwrap();

  let err = service.get_application("prod", "checkout").await.unwrap_err();
  assert!(matches!(err, ApplicationError::Http(_)));
  server.await.unwrap();
}
