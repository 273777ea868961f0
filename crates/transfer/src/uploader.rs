use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use tracing::trace;
use treesync_protocol::PresignedTarget;

use crate::TransferError;

/// Longest response body kept in a [`TransferError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Boxed future returned by [`Uploader::upload`].
pub type UploadFuture<'a> = Pin<Box<dyn Future<Output = Result<(), TransferError>> + Send + 'a>>;

/// Sends one staged file to its presigned target.
///
/// The agent uses [`HttpUploader`]; keeping this a trait lets the
/// dispatcher be tested without a network.
pub trait Uploader: Send + Sync {
    fn upload<'a>(&'a self, source: &'a Path, target: &'a PresignedTarget) -> UploadFuture<'a>;
}

/// Presigned-POST uploader.
///
/// Sends a multipart form: every target field in key order, then the file
/// bytes as the `file` part. Any 2xx status means the store accepted it.
pub struct HttpUploader {
    client: reqwest::Client,
}

impl HttpUploader {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Uploader for HttpUploader {
    fn upload<'a>(&'a self, source: &'a Path, target: &'a PresignedTarget) -> UploadFuture<'a> {
        Box::pin(async move {
            let data = tokio::fs::read(source).await?;
            let size = data.len();
            let file_name = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "file".into());

            let mut form = reqwest::multipart::Form::new();
            for (key, value) in &target.fields {
                form = form.text(key.clone(), value.clone());
            }
            form = form.part(
                "file",
                reqwest::multipart::Part::bytes(data).file_name(file_name),
            );

            let response = self
                .client
                .post(&target.url)
                .multipart(form)
                .send()
                .await
                .map_err(|e| TransferError::Http(e.to_string()))?;

            let status = response.status();
            if status.is_success() {
                trace!(url = %target.url, size, status = %status, "upload accepted");
                return Ok(());
            }

            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            Err(TransferError::Status {
                status: status.as_u16(),
                body,
            })
        })
    }
}
