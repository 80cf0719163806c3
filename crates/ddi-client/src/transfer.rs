//! Artifact transfers. The status is checked before any body bytes are consumed.
//!
//! Transfers have no overall deadline; each chunk must arrive within the
//! client's request timeout.

use std::path::Path;
use std::time::Duration;

use log::{debug, info, warn};
use reqwest::Url;
use tokio::io::AsyncWriteExt;

use crate::client::DdiClient;
use crate::error::{DdiError, Result};

/// Next body chunk, failing once `stall` passes without data.
async fn next_chunk(
    response: &mut reqwest::Response,
    url: &Url,
    stall: Duration,
) -> Result<Option<Vec<u8>>> {
    match tokio::time::timeout(stall, response.chunk()).await {
        Ok(chunk) => Ok(chunk?.map(|bytes| bytes.to_vec())),
        Err(_) => Err(DdiError::timed_out(format!(
            "transfer of {} stalled for {:?}",
            url, stall
        ))),
    }
}

async fn write_body(
    mut response: reqwest::Response,
    url: &Url,
    stall: Duration,
    path: &Path,
) -> Result<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written: u64 = 0;
    while let Some(chunk) = next_chunk(&mut response, url, stall).await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

impl DdiClient {
    /// Stream `url` into the file at `path`.
    ///
    /// The file is created only once the server has answered `200 OK`, and
    /// removed again if the transfer fails partway.
    pub async fn download_to(&self, url: &Url, path: &Path) -> Result<()> {
        let response = self.open_stream(url).await?;

        match write_body(response, url, self.config().request_timeout, path).await {
            Ok(written) => {
                info!(
                    "[Ddi] Downloaded {} ({} bytes) to {}",
                    url,
                    written,
                    path.display()
                );
                Ok(())
            }
            Err(err) => {
                warn!("[Ddi] Download of {} failed: {}", url, err);
                if let Err(e) = tokio::fs::remove_file(path).await {
                    debug!("[Ddi] Could not remove {}: {}", path.display(), e);
                }
                Err(err)
            }
        }
    }

    /// Stream `url` into `receiver` chunk by chunk.
    ///
    /// A receiver returning `false` stops the transfer with
    /// [`DdiError::TransferAborted`].
    pub async fn download_with<F>(&self, url: &Url, mut receiver: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> bool + Send,
    {
        let mut response = self.open_stream(url).await?;
        let stall = self.config().request_timeout;

        while let Some(chunk) = next_chunk(&mut response, url, stall).await? {
            if !receiver(&chunk) {
                debug!("[Ddi] Receiver stopped transfer of {}", url);
                return Err(DdiError::TransferAborted);
            }
        }
        Ok(())
    }

    /// Fetch a resource body as text.
    pub async fn get_body(&self, url: &Url) -> Result<String> {
        self.fetch_text(url, |http| http.get(url.clone())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::error::ErrorKind;
    use crate::test_support::{noop_client, MockServer, NoopHandler, Reply};
    use crate::types::DeploymentBase;
    use std::sync::Arc;

    fn client_with_timeout(timeout: Duration) -> DdiClient {
        DdiClient::builder(Arc::new(NoopHandler))
            .config(ClientConfig::default().with_request_timeout(timeout))
            .build()
    }

    #[tokio::test]
    async fn non_200_download_never_creates_the_file() {
        let server = MockServer::start(vec![Reply::new(404, "missing")]).await;
        let client = noop_client();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.bin");

        let err = client
            .download_to(&server.url("/artifact.bin"), &path)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DdiError::UnexpectedStatus {
                presented: 404,
                expected: 200
            }
        ));
        assert!(!path.exists());
        server.stop();
    }

    #[tokio::test]
    async fn download_writes_full_body() {
        let server = MockServer::start(vec![Reply::new(200, "firmware-bytes")]).await;
        let client = noop_client();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.bin");

        client
            .download_to(&server.url("/artifact.bin"), &path)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"firmware-bytes");
        let requests = server.requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "GET");
        assert_eq!(requests[0].path, "/artifact.bin");
        server.stop();
    }

    #[tokio::test]
    async fn slow_download_may_outlast_request_timeout() {
        let body = "0123456789".repeat(3);
        let server = MockServer::start(vec![
            Reply::ok(body.clone()).paced(3, Duration::from_millis(600))
        ])
        .await;
        let client = client_with_timeout(Duration::from_secs(1));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("firmware.bin");

        client
            .download_to(&server.url("/firmware.bin"), &path)
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), body);
        server.stop();
    }

    #[tokio::test]
    async fn stalled_download_fails_and_removes_partial_file() {
        let server = MockServer::start(vec![
            Reply::ok("0123456789abcdefghij").paced(2, Duration::from_secs(2))
        ])
        .await;
        let client = client_with_timeout(Duration::from_millis(300));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("firmware.bin");

        let err = client
            .download_to(&server.url("/firmware.bin"), &path)
            .await
            .unwrap_err();

        assert!(matches!(err, DdiError::TimedOut(_)));
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(!path.exists());
        server.stop();
    }

    #[tokio::test]
    async fn stalled_receiver_transfer_times_out() {
        let server = MockServer::start(vec![
            Reply::ok("abcdef").paced(2, Duration::from_secs(2))
        ])
        .await;
        let client = client_with_timeout(Duration::from_millis(300));

        let mut received = Vec::new();
        let err = client
            .download_with(&server.url("/a"), |chunk| {
                received.extend_from_slice(chunk);
                true
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DdiError::TimedOut(_)));
        assert_eq!(received, b"abc");
        server.stop();
    }

    #[tokio::test]
    async fn receiver_sees_body_and_can_abort() {
        let server = MockServer::start(vec![
            Reply::new(200, "abc"),
            Reply::new(200, "def"),
        ])
        .await;
        let client = noop_client();

        let mut received = Vec::new();
        client
            .download_with(&server.url("/a"), |chunk| {
                received.extend_from_slice(chunk);
                true
            })
            .await
            .unwrap();
        assert_eq!(received, b"abc");

        let err = client
            .download_with(&server.url("/b"), |_| false)
            .await
            .unwrap_err();
        assert!(matches!(err, DdiError::TransferAborted));
        server.stop();
    }

    #[tokio::test]
    async fn receiver_is_not_called_on_error_status() {
        let server = MockServer::start(vec![Reply::new(500, "boom")]).await;
        let client = noop_client();

        let mut calls = 0;
        let err = client
            .download_with(&server.url("/a"), |_| {
                calls += 1;
                true
            })
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(500));
        assert_eq!(calls, 0);
        server.stop();
    }

    #[tokio::test]
    async fn artifact_handles_download_through_client() {
        let server = MockServer::start(vec![
            Reply::ok("rootfs-bytes"),
            Reply::ok("5d41402a  rootfs.img"),
        ])
        .await;
        let body = r#"{"id":"4","deployment":{"download":"forced","update":"forced","chunks":[
            {"part":"os","version":"2","name":"rootfs","artifacts":[
                {"filename":"rootfs.img","hashes":{"sha1":"x","md5":"y"},"size":12,
                 "_links":{"download-http":{"href":"{base}/rootfs.img"},
                           "md5sum-http":{"href":"{base}/rootfs.img.MD5SUM"}}}]}]}}"#
            .replace("{base}", server.base_url());
        let deployment = DeploymentBase::from_json(&body, &noop_client()).unwrap();
        let artifact = deployment.artifacts().next().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(&artifact.filename);

        artifact.download_to(&path).await.unwrap();
        let md5 = artifact.md5sum().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"rootfs-bytes");
        assert_eq!(md5, "5d41402a  rootfs.img");
        let paths: Vec<_> = server
            .requests()
            .await
            .into_iter()
            .map(|r| r.path)
            .collect();
        assert_eq!(paths, vec!["/rootfs.img", "/rootfs.img.MD5SUM"]);
        server.stop();
    }

    #[tokio::test]
    async fn get_body_returns_text() {
        let server = MockServer::start(vec![Reply::new(200, "d41d8cd9  rootfs.img")]).await;
        let client = noop_client();
        let body = client.get_body(&server.url("/md5")).await.unwrap();
        assert_eq!(body, "d41d8cd9  rootfs.img");
        server.stop();
    }
}
