//! Remote photo service boundary.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response};
use url::Url;

use crate::api::{
    CountResponse, MessageResponse, PhotoDescriptor, PhotoPayload, PhotoResponse, PhotosResponse,
    UploadReceipt, UploadResponse,
};
use crate::error::{ErrorKind, Result, TransportError};
use crate::session::Session;
use crate::upload::SelectedFile;
use crate::{config, EntityId, PhotoId};

/// Operations the pipeline needs from the remote service.
///
/// Implementations classify every failure into [`TransportError`] (or
/// [`ErrorKind::Unauthenticated`] when no credential is available) before
/// returning.
#[async_trait]
pub trait PhotoApi: Send + Sync {
    /// Metadata of all photos stored for `entity`, in server order.
    async fn photos(&self, entity: EntityId) -> Result<Vec<PhotoDescriptor>>;

    /// Full payload of a single photo.
    async fn photo(&self, photo: PhotoId) -> Result<PhotoPayload>;

    async fn delete_photo(&self, photo: PhotoId) -> Result<()>;

    /// Sends all `files` as one multipart request.
    async fn upload_photos(&self, entity: EntityId, files: &[SelectedFile])
        -> Result<UploadReceipt>;

    async fn photo_count(&self, entity: EntityId) -> Result<usize>;
}

#[async_trait]
impl<A: PhotoApi + ?Sized> PhotoApi for Arc<A> {
    async fn photos(&self, entity: EntityId) -> Result<Vec<PhotoDescriptor>> {
        (**self).photos(entity).await
    }

    async fn photo(&self, photo: PhotoId) -> Result<PhotoPayload> {
        (**self).photo(photo).await
    }

    async fn delete_photo(&self, photo: PhotoId) -> Result<()> {
        (**self).delete_photo(photo).await
    }

    async fn upload_photos(
        &self,
        entity: EntityId,
        files: &[SelectedFile],
    ) -> Result<UploadReceipt> {
        (**self).upload_photos(entity, files).await
    }

    async fn photo_count(&self, entity: EntityId) -> Result<usize> {
        (**self).photo_count(entity).await
    }
}

/// [`PhotoApi`] over HTTP.
#[derive(Clone)]
pub struct HttpPhotoApi {
    client: reqwest::Client,
    base: Url,
    session: Arc<dyn Session>,
    fetch_timeout: Duration,
    upload_timeout: Duration,
}

impl HttpPhotoApi {
    pub fn new(config: &config::Api, session: impl Session + 'static) -> Result<Self> {
        Self::with_client(config, session, reqwest::Client::new())
    }

    /// Same as `new` but sends through a preconfigured `reqwest` client, e.g.
    /// one with custom proxy or tls settings.
    pub fn with_client(
        config: &config::Api,
        session: impl Session + 'static,
        client: reqwest::Client,
    ) -> Result<Self> {
        let mut base = config.url.clone();
        // make `join` append instead of replacing the last segment
        if !base.ends_with('/') {
            base.push('/');
        }
        Ok(Self {
            client,
            base: Url::parse(&base)?,
            session: Arc::new(session),
            fetch_timeout: config.fetch_timeout(),
            upload_timeout: config.upload_timeout(),
        })
    }

    /// Url serving the raw image bytes of a photo, for consumers that can
    /// stream images directly.
    pub fn raw_url(&self, photo: PhotoId) -> Result<Url> {
        self.url(&format!("photo/image/{photo}/raw"))
    }

    fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path)?)
    }

    fn bearer(&self) -> Result<String> {
        self.session
            .bearer()
            .ok_or_else(|| ErrorKind::Unauthenticated.into())
    }

    /// Sends the request, turning non-success statuses into classified
    /// errors.
    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(TransportError::from)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().clone();
        // the body may explain the failure, worth having in the logs
        if let Ok(body) = response.json::<MessageResponse>().await {
            if let Some(msg) = body.err_message {
                tracing::warn!(%url, %status, "request failed: {}", msg);
            }
        }
        Err(TransportError::from_status(status).into())
    }
}

#[async_trait]
impl PhotoApi for HttpPhotoApi {
    async fn photos(&self, entity: EntityId) -> Result<Vec<PhotoDescriptor>> {
        let token = self.bearer()?;
        let url = self.url(&format!("photo/{entity}/get-photos"))?;
        let request = self
            .client
            .get(url)
            .bearer_auth(token)
            .timeout(self.fetch_timeout);

        let body: PhotosResponse = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(TransportError::from)?;

        Ok(body
            .photos
            .into_iter()
            .map(|dto| PhotoDescriptor::from_dto(entity, dto))
            .collect())
    }

    async fn photo(&self, photo: PhotoId) -> Result<PhotoPayload> {
        let token = self.bearer()?;
        let url = self.url(&format!("photo/image/{photo}"))?;
        let request = self
            .client
            .get(url)
            .bearer_auth(token)
            .timeout(self.fetch_timeout);

        let body: PhotoResponse = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(TransportError::from)?;

        Ok(PhotoPayload::from_dto(body.photo)?)
    }

    async fn delete_photo(&self, photo: PhotoId) -> Result<()> {
        let token = self.bearer()?;
        let url = self.url(&format!("photo/image/{photo}"))?;
        let request = self
            .client
            .delete(url)
            .bearer_auth(token)
            .timeout(self.fetch_timeout);

        self.send(request).await?;
        Ok(())
    }

    async fn upload_photos(
        &self,
        entity: EntityId,
        files: &[SelectedFile],
    ) -> Result<UploadReceipt> {
        let token = self.bearer()?;
        let url = self.url(&format!("photo/{entity}/upload-photo"))?;

        let mut form = Form::new();
        for file in files {
            let part = Part::bytes(file.bytes.clone())
                .file_name(file.name.clone())
                .mime_str(file.content_type.as_ref())
                .map_err(TransportError::from)?;
            form = form.part("files", part);
        }

        let request = self
            .client
            .post(url)
            .bearer_auth(token)
            .multipart(form)
            .timeout(self.upload_timeout);

        let body: UploadResponse = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(TransportError::from)?;

        match (body.message, body.err_message) {
            (Some(message), _) => Ok(UploadReceipt {
                message,
                errors: body.errors,
            }),
            (None, Some(err)) => Err(TransportError::Rejected(err).into()),
            (None, None) => Err(TransportError::Rejected("Upload failed".to_string()).into()),
        }
    }

    async fn photo_count(&self, entity: EntityId) -> Result<usize> {
        let token = self.bearer()?;
        let url = self.url(&format!("photo/{entity}/count"))?;
        let request = self
            .client
            .get(url)
            .bearer_auth(token)
            .timeout(self.fetch_timeout);

        let body: CountResponse = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(TransportError::from)?;

        Ok(body.photo_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::StaticSession;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    fn api(url: &str, session: StaticSession) -> HttpPhotoApi {
        let config = config::Api {
            url: url.to_string(),
            ..Default::default()
        };
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        HttpPhotoApi::with_client(&config, session, client).unwrap()
    }

    /// Reads one request, headers and body, off the stream.
    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = vec![];
        let mut chunk = [0u8; 8192];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            if head.contains("transfer-encoding: chunked") {
                if buf.ends_with(b"0\r\n\r\n") {
                    break;
                }
                continue;
            }
            let length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Answers a single request with the given status line and json body,
    /// handing back the raw request.
    async fn respond_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_request(&mut stream).await;
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
            request
        });
        (url, handle)
    }

    #[test]
    fn routes_keep_base_path() {
        let api = api("https://rentals.example/api", StaticSession::new("t"));
        assert_eq!(
            api.url("photo/9/get-photos").unwrap().as_str(),
            "https://rentals.example/api/photo/9/get-photos"
        );
        assert_eq!(
            api.raw_url(4).unwrap().as_str(),
            "https://rentals.example/api/photo/image/4/raw"
        );
    }

    #[tokio::test]
    async fn missing_credential_fails_before_sending() {
        // nothing listens on the discard port, a sent request would surface
        // as a network error instead
        let api = api("http://127.0.0.1:9", StaticSession::anonymous());

        let err = api.photos(1).await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Unauthenticated));

        let err = api.delete_photo(1).await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Unauthenticated));

        let err = api.upload_photos(1, &[]).await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Unauthenticated));
    }

    #[tokio::test]
    async fn upload_sends_one_files_part_per_file() {
        let (url, server) =
            respond_once("200 OK", r#"{"message": "Processed 2 out of 2 photos."}"#).await;
        let api = api(&url, StaticSession::new("secret"));
        let files = [
            SelectedFile::with_type("front.jpg", "image/jpeg", vec![1, 2, 3]),
            SelectedFile::with_type("yard.png", "image/png", vec![4, 5]),
        ];

        let receipt = api.upload_photos(7, &files).await.unwrap();
        assert_eq!(receipt.message, "Processed 2 out of 2 photos.");
        assert!(!receipt.is_partial());

        let request = server.await.unwrap();
        let lower = request.to_ascii_lowercase();
        assert!(request.starts_with("POST /api/photo/7/upload-photo HTTP/1.1"));
        assert!(lower.contains("authorization: bearer secret"));
        assert!(lower.contains("content-type: multipart/form-data; boundary="));
        assert_eq!(request.matches("name=\"files\"").count(), 2);
        assert!(request.contains("filename=\"front.jpg\""));
        assert!(request.contains("filename=\"yard.png\""));
    }

    #[tokio::test]
    async fn partial_upload_carries_errors() {
        let (url, _server) = respond_once(
            "207 Multi-Status",
            r#"{"message": "Processed 1 out of 2 photos.", "errors": ["File b.jpg is empty"]}"#,
        )
        .await;
        let api = api(&url, StaticSession::new("secret"));
        let files = [SelectedFile::with_type("a.jpg", "image/jpeg", vec![1])];

        let receipt = api.upload_photos(7, &files).await.unwrap();
        assert!(receipt.is_partial());
        assert_eq!(receipt.errors, vec!["File b.jpg is empty".to_string()]);
    }

    #[tokio::test]
    async fn unknown_entity_lists_no_photos() {
        let (url, server) =
            respond_once("404 Not Found", r#"{"errMessage": "Property not found"}"#).await;
        let api = api(&url, StaticSession::new("secret"));
        let loader = crate::loader::PhotoLoader::new(api);

        assert!(loader.fetch_metadata(5).await.unwrap().is_empty());
        assert!(server
            .await
            .unwrap()
            .starts_with("GET /api/photo/5/get-photos HTTP/1.1"));
    }

    #[tokio::test]
    async fn statuses_are_classified() {
        let cases = [
            ("404 Not Found", TransportError::NotFound),
            ("413 Payload Too Large", TransportError::PayloadTooLarge),
            ("400 Bad Request", TransportError::MalformedRequest),
            ("401 Unauthorized", TransportError::Unauthenticated),
            ("503 Service Unavailable", TransportError::Server(503)),
        ];
        for (status, expected) in cases {
            let (url, _server) = respond_once(status, r#"{"errMessage": "nope"}"#).await;
            let api = api(&url, StaticSession::new("secret"));
            let err = api.photos(1).await.unwrap_err();
            assert_eq!(err.transport(), Some(&expected), "{status}");
        }
    }

    #[tokio::test]
    async fn oversized_upload_is_classified() {
        let (url, _server) =
            respond_once("413 Payload Too Large", r#"{"errMessage": "too big"}"#).await;
        let api = api(&url, StaticSession::new("secret"));
        let files = [SelectedFile::with_type("a.jpg", "image/jpeg", vec![1])];

        let err = api.upload_photos(7, &files).await.unwrap_err();
        assert_eq!(err.transport(), Some(&TransportError::PayloadTooLarge));
    }

    #[tokio::test]
    async fn stalled_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api", listener.local_addr().unwrap());
        let _server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_request(&mut stream).await;
            // never answer
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let config = config::Api {
            url,
            fetch_timeout: 1,
            ..Default::default()
        };
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let api = HttpPhotoApi::with_client(&config, StaticSession::new("secret"), client).unwrap();

        let err = api.photo(1).await.unwrap_err();
        assert_eq!(err.transport(), Some(&TransportError::Timeout));
    }
}
