use async_trait::async_trait;
use std::time::Duration;
use reqwest::{Client, RequestBuilder, Response, Url};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::ApiConfig;
use crate::error::{OneVoiceError, Result};
use crate::feedback::Feedback;
use crate::task::{SubmitResponse, TaskId, TaskSnapshot};
use super::{TaskApi, VideoUpload};

const STATUS_FAILED: &str = "Failed to fetch task status.";
const UPLOAD_FAILED: &str = "Failed to upload video.";
const URL_FAILED: &str = "Failed to process YouTube video.";
const DOWNLOAD_FAILED: &str = "Failed to download video.";
const FEEDBACK_FAILED: &str = "Failed to submit feedback.";

const VIDEO_MIME: &str = "video/mp4";

/// Structured error body returned by the processing service
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<Value>,
}

/// `TaskApi` over the service's HTTP endpoints
pub struct HttpTaskApi {
    client: Client,
    base_url: Url,
    transfer_timeout: Duration,
}

impl HttpTaskApi {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| OneVoiceError::Config(format!("Invalid API base URL '{}': {}", config.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(OneVoiceError::Config(format!("API base URL '{}' cannot be used as a base", config.base_url)));
        }

        // Status and feedback calls are bounded by the client-wide timeout;
        // uploads and downloads override it per request.
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url,
            transfer_timeout: Duration::from_secs(config.transfer_timeout_secs),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| OneVoiceError::Config("API base URL cannot be used as a base".to_string()))?
            .pop_if_empty()
            .extend(["api", "process"])
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder, fallback: &str) -> Result<Response> {
        let response = request.send().await.map_err(network_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.bytes().await.unwrap_or_default();
        let detail = error_detail(&body, fallback);
        debug!("Request failed with HTTP {}: {}", status, detail);
        Err(OneVoiceError::RequestFailed { status: status.as_u16(), detail })
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
        let body = response.bytes().await.map_err(network_error)?;
        serde_json::from_slice(&body).map_err(|e| OneVoiceError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl TaskApi for HttpTaskApi {
    async fn submit_file(&self, upload: VideoUpload) -> Result<TaskId> {
        let url = self.endpoint(&[])?;
        debug!("Uploading {} ({} bytes) to {}", upload.file_name, upload.content.len(), url);

        let part = Part::bytes(upload.content)
            .file_name(upload.file_name)
            .mime_str(VIDEO_MIME)?;
        let form = Form::new().part("file", part);

        let request = self.client.post(url).multipart(form).timeout(self.transfer_timeout);
        let response = self.send(request, UPLOAD_FAILED).await?;
        let body: SubmitResponse = Self::read_json(response).await?;
        Ok(body.task_id)
    }

    async fn submit_url(&self, video_url: &str) -> Result<TaskId> {
        let url = self.endpoint(&["youtube"])?;
        debug!("Submitting video URL {} to {}", video_url, url);

        let request = self.client.post(url).json(&json!({ "url": video_url }));
        let response = self.send(request, URL_FAILED).await?;
        let body: SubmitResponse = Self::read_json(response).await?;
        Ok(body.task_id)
    }

    async fn get_status(&self, task_id: &TaskId) -> Result<TaskSnapshot> {
        let url = self.endpoint(&["status", task_id.as_str()])?;
        debug!("Polling status: {}", url);

        let response = self.send(self.client.get(url), STATUS_FAILED).await?;
        Self::read_json(response).await
    }

    async fn fetch_artifact(&self, task_id: &TaskId) -> Result<Vec<u8>> {
        let url = self.endpoint(&["download", task_id.as_str()])?;
        debug!("Downloading artifact: {}", url);

        let request = self.client.get(url).timeout(self.transfer_timeout);
        let response = self.send(request, DOWNLOAD_FAILED).await?;
        let bytes = response.bytes().await.map_err(network_error)?;
        Ok(bytes.to_vec())
    }

    async fn submit_feedback(&self, task_id: &TaskId, feedback: &Feedback) -> Result<()> {
        let url = self.endpoint(&["feedback", task_id.as_str()])?;
        debug!("Submitting feedback for {}: rating {}", task_id, feedback.rating);

        self.send(self.client.post(url).json(feedback), FEEDBACK_FAILED).await?;
        Ok(())
    }

    fn download_url(&self, task_id: &TaskId) -> Result<String> {
        Ok(self.endpoint(&["download", task_id.as_str()])?.to_string())
    }
}

/// Any failure before a response arrived is a network error, including timeouts.
fn network_error(err: reqwest::Error) -> OneVoiceError {
    if err.is_timeout() {
        OneVoiceError::Network(format!("request timed out: {}", err))
    } else {
        OneVoiceError::Network(err.to_string())
    }
}

/// Message to surface for a non-success response.
///
/// The backend's `detail` is used verbatim when it is a string. Framework
/// validation errors carry structured `detail` values, which are rendered as JSON.
fn error_detail(body: &[u8], fallback: &str) -> String {
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(ErrorBody { detail: Some(Value::String(detail)) }) if !detail.trim().is_empty() => detail,
        Ok(ErrorBody { detail: Some(detail) }) if !detail.is_null() && !detail.is_string() => detail.to_string(),
        _ => fallback.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::Rating;
    use crate::task::{Stage, TaskStatus};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    struct Canned {
        status: &'static str,
        content_type: &'static str,
        body: Vec<u8>,
    }

    impl Canned {
        fn json(status: &'static str, body: &str) -> Self {
            Self { status, content_type: "application/json", body: body.as_bytes().to_vec() }
        }
    }

    /// Serve the canned responses in order, one connection each, and hand back the raw requests.
    async fn serve(responses: Vec<Canned>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for canned in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                requests.push(read_request(&mut socket).await);

                let head = format!(
                    "HTTP/1.1 {}\r\ncontent-type: {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                    canned.status,
                    canned.content_type,
                    canned.body.len()
                );
                socket.write_all(head.as_bytes()).await.unwrap();
                socket.write_all(&canned.body).await.unwrap();
                let _ = socket.shutdown().await;
            }
            requests
        });

        (format!("http://{}", addr), handle)
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 8192];
        let mut header_end = None;

        loop {
            if let Some(end) = header_end {
                let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
                let complete = if head.contains("transfer-encoding: chunked") {
                    buf.ends_with(b"0\r\n\r\n")
                } else {
                    let length = head
                        .lines()
                        .find_map(|line| line.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    buf.len() >= end + 4 + length
                };
                if complete {
                    break;
                }
            }

            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if header_end.is_none() {
                header_end = buf.windows(4).position(|w| w == b"\r\n\r\n");
            }
        }

        String::from_utf8_lossy(&buf).to_string()
    }

    fn api_for(base_url: &str) -> HttpTaskApi {
        let config = ApiConfig {
            base_url: base_url.to_string(),
            request_timeout_secs: 1,
            transfer_timeout_secs: 5,
            ..ApiConfig::default()
        };
        HttpTaskApi::new(&config).unwrap()
    }

    #[test]
    fn test_error_detail_prefers_backend_message() {
        assert_eq!(error_detail(br#"{"detail":"Task not found"}"#, STATUS_FAILED), "Task not found");
        assert_eq!(error_detail(b"<html>bad gateway</html>", STATUS_FAILED), STATUS_FAILED);
        assert_eq!(error_detail(br#"{"detail":null}"#, FEEDBACK_FAILED), FEEDBACK_FAILED);
        assert_eq!(error_detail(br#"{"detail":"  "}"#, FEEDBACK_FAILED), FEEDBACK_FAILED);
        assert_eq!(
            error_detail(br#"{"detail":[{"msg":"field required"}]}"#, UPLOAD_FAILED),
            r#"[{"msg":"field required"}]"#
        );
    }

    #[test]
    fn test_endpoints_are_built_under_base_path() {
        let api = api_for("http://example.test/dub/");
        let id = TaskId::new("abc 1").unwrap();
        assert_eq!(
            api.endpoint(&["status", id.as_str()]).unwrap().as_str(),
            "http://example.test/dub/api/process/status/abc%201"
        );
        assert_eq!(api.download_url(&id).unwrap(), "http://example.test/dub/api/process/download/abc%201");
        assert_eq!(api.endpoint(&[]).unwrap().as_str(), "http://example.test/dub/api/process");
    }

    #[test]
    fn test_rejects_unparsable_base_url() {
        let config = ApiConfig { base_url: "not a url".to_string(), ..ApiConfig::default() };
        assert!(matches!(HttpTaskApi::new(&config), Err(OneVoiceError::Config(_))));
    }

    #[tokio::test]
    async fn test_get_status_parses_snapshot() {
        let (base, server) = serve(vec![Canned::json(
            "200 OK",
            r#"{"status":"processing","stage":"translation","progress":40.0}"#,
        )])
        .await;

        let snapshot = api_for(&base).get_status(&TaskId::new("t-1").unwrap()).await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Processing);
        assert_eq!(snapshot.stage, Some(Stage::Translation));

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("GET /api/process/status/t-1 "));
    }

    #[tokio::test]
    async fn test_get_status_surfaces_backend_detail() {
        let (base, _server) = serve(vec![Canned::json("404 Not Found", r#"{"detail":"Task not found"}"#)]).await;

        let err = api_for(&base).get_status(&TaskId::new("gone").unwrap()).await.unwrap_err();
        match err {
            OneVoiceError::RequestFailed { status, detail } => {
                assert_eq!(status, 404);
                assert_eq!(detail, "Task not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_garbled_body_is_invalid_response() {
        let (base, _server) = serve(vec![Canned::json("200 OK", "{not json")]).await;

        let err = api_for(&base).get_status(&TaskId::new("t").unwrap()).await.unwrap_err();
        assert!(matches!(err, OneVoiceError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = api_for(&format!("http://{}", addr))
            .get_status(&TaskId::new("t").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, OneVoiceError::Network(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_hung_request_times_out_as_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let err = api_for(&format!("http://{}", addr))
            .get_status(&TaskId::new("t").unwrap())
            .await
            .unwrap_err();
        match err {
            OneVoiceError::Network(message) => assert!(message.contains("timed out")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_submit_url_posts_json() {
        let (base, server) = serve(vec![Canned::json("200 OK", r#"{"task_id":"yt-9","status":"pending"}"#)]).await;

        let id = api_for(&base).submit_url("https://www.youtube.com/watch?v=abc").await.unwrap();
        assert_eq!(id.as_str(), "yt-9");

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("POST /api/process/youtube "));
        assert!(requests[0].contains(r#"{"url":"https://www.youtube.com/watch?v=abc"}"#));
    }

    #[tokio::test]
    async fn test_submit_file_sends_multipart() {
        let (base, server) = serve(vec![Canned::json("200 OK", r#"{"task_id":"f-1"}"#)]).await;

        let upload = VideoUpload { file_name: "clip.mp4".to_string(), content: b"\0\0\0\x18ftypmp42".to_vec() };
        let id = api_for(&base).submit_file(upload).await.unwrap();
        assert_eq!(id.as_str(), "f-1");

        let requests = server.await.unwrap();
        let request = requests[0].to_lowercase();
        assert!(request.starts_with("post /api/process "));
        assert!(request.contains("multipart/form-data"));
        assert!(request.contains(r#"name="file"; filename="clip.mp4""#));
        assert!(request.contains("content-type: video/mp4"));
    }

    #[tokio::test]
    async fn test_upload_rejection_uses_detail() {
        let (base, _server) = serve(vec![Canned::json("400 Bad Request", r#"{"detail":"MP4 files only."}"#)]).await;

        let upload = VideoUpload { file_name: "clip.mp4".to_string(), content: vec![0; 16] };
        let err = api_for(&base).submit_file(upload).await.unwrap_err();
        assert_eq!(err.to_string(), "MP4 files only.");
    }

    #[tokio::test]
    async fn test_fetch_artifact_returns_raw_bytes() {
        let (base, _server) = serve(vec![Canned {
            status: "200 OK",
            content_type: "video/mp4",
            body: vec![1, 2, 3, 4, 5],
        }])
        .await;

        let bytes = api_for(&base).fetch_artifact(&TaskId::new("done").unwrap()).await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_download_failure_without_detail_uses_fallback() {
        let (base, _server) = serve(vec![Canned {
            status: "500 Internal Server Error",
            content_type: "text/plain",
            body: b"boom".to_vec(),
        }])
        .await;

        let err = api_for(&base).fetch_artifact(&TaskId::new("done").unwrap()).await.unwrap_err();
        assert_eq!(err.to_string(), DOWNLOAD_FAILED);
    }

    #[tokio::test]
    async fn test_submit_feedback_posts_rating() {
        let (base, server) = serve(vec![Canned::json("200 OK", "")]).await;

        let feedback = Feedback { rating: Rating::new(4).unwrap(), comment: None };
        api_for(&base)
            .submit_feedback(&TaskId::new("t-7").unwrap(), &feedback)
            .await
            .unwrap();

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("POST /api/process/feedback/t-7 "));
        assert!(requests[0].ends_with(r#"{"rating":4}"#));
    }
}
