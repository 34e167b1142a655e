//! Integration tests for the HTTP clip API
//!
//! Each test serves one canned response from a loopback listener and checks
//! both the request the client sent and how the response was interpreted.

use artvoice::api::{ApiError, ClipApi, ClipFetcher, ClipUploader};
use artvoice::{ArtworkId, ClipId};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

struct Responder {
    base_url: String,
    request: JoinHandle<String>,
}

impl Responder {
    /// Serve exactly one request with `status`, `content_type` and `body`.
    async fn start(status: &str, content_type: &str, body: Vec<u8>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let head = format!(
            "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            status,
            content_type,
            body.len()
        );

        let request = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let raw = read_request(&mut socket).await;
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(&body).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&raw).to_string()
        });

        Self { base_url, request }
    }

    fn api(&self, token: Option<&str>) -> ClipApi {
        ClipApi::new(self.base_url.clone(), token.map(str::to_string))
    }

    async fn request(self) -> String {
        self.request.await.unwrap()
    }
}

/// Read headers, then the body by Content-Length or chunked framing.
async fn read_request(socket: &mut tokio::net::TcpStream) -> Vec<u8> {
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            return raw;
        }
        raw.extend_from_slice(&buf[..n]);
        if let Some(pos) = find(&raw, b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let headers = String::from_utf8_lossy(&raw[..header_end]).to_lowercase();
    let content_length = headers
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok());
    let chunked = headers.contains("transfer-encoding: chunked");

    loop {
        let body = &raw[header_end..];
        let complete = match content_length {
            Some(len) => body.len() >= len,
            None if chunked => find(body, b"0\r\n\r\n").is_some(),
            None => true,
        };
        if complete {
            break;
        }
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&buf[..n]);
    }
    raw
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

// ============================================================================
// Upload
// ============================================================================

#[tokio::test]
async fn upload_sends_multipart_with_bearer_token() {
    let server = Responder::start(
        "200 OK",
        "application/json",
        br#"{"id": 42, "filename": "audio_7_1_x_recording.wav", "image_id": 7, "user_id": 1}"#
            .to_vec(),
    )
    .await;

    let id = server
        .api(Some("tok123"))
        .upload(ArtworkId(7), b"RIFFdata".to_vec(), "audio/wav")
        .await
        .unwrap();
    assert_eq!(id, ClipId(42));

    let request = server.request().await;
    let lower = request.to_lowercase();
    assert!(request.starts_with("POST /upload-audio/7 HTTP/1.1"));
    assert!(lower.contains("authorization: bearer tok123"));
    assert!(lower.contains("multipart/form-data"));
    assert!(request.contains(r#"name="audio"; filename="recording.wav""#));
    assert!(request.contains(r#"name="image_id""#));
    assert!(request.contains("RIFFdata"));
}

#[tokio::test]
async fn upload_rejected_token_is_unauthorized() {
    let server = Responder::start(
        "401 Unauthorized",
        "application/json",
        br#"{"detail": "Could not validate credentials"}"#.to_vec(),
    )
    .await;

    let result = server
        .api(Some("expired"))
        .upload(ArtworkId(1), vec![1, 2, 3], "audio/wav")
        .await;
    assert_eq!(result, Err(ApiError::Unauthorized));
}

#[tokio::test]
async fn upload_server_error_carries_detail() {
    let server = Responder::start(
        "500 Internal Server Error",
        "application/json",
        br#"{"detail": "disk full"}"#.to_vec(),
    )
    .await;

    let result = server
        .api(Some("tok"))
        .upload(ArtworkId(1), vec![1], "audio/ogg")
        .await;
    assert_eq!(
        result,
        Err(ApiError::UploadFailed {
            status: 500,
            message: "disk full".into()
        })
    );
}

// ============================================================================
// Fetch
// ============================================================================

#[tokio::test]
async fn fetch_returns_audio_bytes() {
    let server = Responder::start("200 OK", "audio/wav", vec![9, 8, 7, 6]).await;

    let bytes = server.api(None).fetch(ClipId(5)).await.unwrap();
    assert_eq!(bytes, vec![9, 8, 7, 6]);

    let request = server.request().await;
    assert!(request.starts_with("GET /audio/5 HTTP/1.1"));
    assert!(request.to_lowercase().contains("accept: audio/*"));
}

#[tokio::test]
async fn fetch_missing_clip_reports_status() {
    let server = Responder::start("404 Not Found", "application/json", b"{}".to_vec()).await;
    let result = server.api(None).fetch(ClipId(99)).await;
    assert_eq!(result, Err(ApiError::FetchFailed { status: 404 }));
}

#[tokio::test]
async fn unreachable_backend_is_a_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let api = ClipApi::new(format!("http://{}", addr), None);
    assert!(matches!(
        api.fetch(ClipId(1)).await,
        Err(ApiError::Network(_))
    ));
}

// ============================================================================
// Listing
// ============================================================================

#[tokio::test]
async fn list_parses_clip_records() {
    let server = Responder::start(
        "200 OK",
        "application/json",
        br#"[
            {"id": 1, "filename": "a.ogg", "image_id": 3, "user_id": 2},
            {"id": 2, "filename": "b.wav", "image_id": 3, "user_id": 4,
             "created_at": "2024-05-01T12:30:00"}
        ]"#
        .to_vec(),
    )
    .await;

    let clips = server.api(None).list_clips(ArtworkId(3)).await.unwrap();
    assert_eq!(clips.len(), 2);
    assert_eq!(clips[0].id, ClipId(1));
    assert!(clips[0].created_at.is_none());
    assert!(clips[1].created_at.is_some());

    let request = server.request().await;
    assert!(request.starts_with("GET /image/3/audios HTTP/1.1"));
}

#[tokio::test]
async fn list_unknown_artwork_is_not_found() {
    let server = Responder::start(
        "404 Not Found",
        "application/json",
        br#"{"detail": "Image not found"}"#.to_vec(),
    )
    .await;
    let result = server.api(None).list_clips(ArtworkId(77)).await;
    assert_eq!(result, Err(ApiError::ArtworkNotFound(ArtworkId(77))));
}

#[tokio::test]
async fn list_with_malformed_body_is_a_parse_error() {
    let server = Responder::start("200 OK", "application/json", b"not json".to_vec()).await;
    assert!(matches!(
        server.api(None).list_clips(ArtworkId(1)).await,
        Err(ApiError::Parse(_))
    ));
}
