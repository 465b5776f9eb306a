// file: src/download/fetchers.rs
// description: per-source fetch strategies returning byte streams
// reference: https://docs.rs/reqwest, https://docs.rs/async-trait

use crate::error::{DownloadError, DownloadErrorKind};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::path::PathBuf;
use tokio::io::AsyncReadExt;
use tracing::debug;
use url::Url;

pub type ByteStream = BoxStream<'static, std::result::Result<Bytes, DownloadError>>;

pub struct FetchResponse {
    /// Declared size, when the source reports one.
    pub content_length: Option<u64>,
    pub stream: ByteStream,
}

#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub bearer_token: Option<String>,
}

impl AuthContext {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            bearer_token: Some(token.into()),
        }
    }
}

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn open(
        &self,
        reference: &str,
        auth: &AuthContext,
    ) -> std::result::Result<FetchResponse, DownloadError>;
}

pub type UrlRewrite = fn(&Url) -> Url;

pub struct HttpFetcher {
    client: reqwest::Client,
    rewrite: Option<UrlRewrite>,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            rewrite: None,
        }
    }

    pub fn with_rewrite(client: reqwest::Client, rewrite: UrlRewrite) -> Self {
        Self {
            client,
            rewrite: Some(rewrite),
        }
    }

    pub fn direct_url(&self, reference: &str) -> std::result::Result<Url, DownloadError> {
        let url = Url::parse(reference)
            .map_err(|e| DownloadError::permanent(DownloadErrorKind::Unknown, e.to_string()))?;
        Ok(match self.rewrite {
            Some(rewrite) => rewrite(&url),
            None => url,
        })
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn open(
        &self,
        reference: &str,
        auth: &AuthContext,
    ) -> std::result::Result<FetchResponse, DownloadError> {
        let url = self.direct_url(reference)?;
        debug!("GET {}", url);

        let mut request = self.client.get(url.as_str());
        if let Some(token) = &auth.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DownloadError::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::from_status(status.as_u16(), url.as_str()));
        }

        let content_length = response.content_length();
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| DownloadError::from_reqwest(&e)))
            .boxed();

        Ok(FetchResponse {
            content_length,
            stream,
        })
    }
}

/// Streams a file from disk in fixed-size chunks.
pub struct LocalFetcher {
    chunk_bytes: usize,
}

impl LocalFetcher {
    pub fn new(chunk_bytes: usize) -> Self {
        Self {
            chunk_bytes: chunk_bytes.max(1),
        }
    }
}

#[async_trait]
impl SourceFetcher for LocalFetcher {
    async fn open(
        &self,
        reference: &str,
        _auth: &AuthContext,
    ) -> std::result::Result<FetchResponse, DownloadError> {
        let path = PathBuf::from(reference);
        let file = tokio::fs::File::open(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                DownloadError::permanent(DownloadErrorKind::NotFound, path.display().to_string())
            }
            std::io::ErrorKind::PermissionDenied => {
                DownloadError::permanent(DownloadErrorKind::Auth, path.display().to_string())
            }
            _ => DownloadError::permanent(DownloadErrorKind::Unknown, e.to_string()),
        })?;

        let content_length = file.metadata().await.ok().map(|m| m.len());
        let chunk_bytes = self.chunk_bytes;

        let stream = stream::unfold(Some(file), move |state| async move {
            let mut file = state?;
            let mut buffer = vec![0u8; chunk_bytes];
            match file.read(&mut buffer).await {
                Ok(0) => None,
                Ok(n) => {
                    buffer.truncate(n);
                    Some((Ok(Bytes::from(buffer)), Some(file)))
                }
                Err(e) => Some((
                    Err(DownloadError::permanent(DownloadErrorKind::Unknown, e.to_string())),
                    None,
                )),
            }
        })
        .boxed();

        Ok(FetchResponse {
            content_length,
            stream,
        })
    }
}

/// `/s/<id>` shared links become `/shared/static/<id>` direct links.
pub fn rewrite_box(url: &Url) -> Url {
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();

    let mut direct = url.clone();
    if let ["s", id] = segments.as_slice() {
        direct.set_path(&format!("/shared/static/{}", id));
    }
    direct
}

pub fn rewrite_google_drive(url: &Url) -> Url {
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();

    let from_path = match segments.as_slice() {
        ["file", "d", id, ..] => Some(id.to_string()),
        _ => None,
    };
    let file_id = from_path.or_else(|| {
        url.query_pairs()
            .find(|(key, _)| key == "id")
            .map(|(_, value)| value.to_string())
    });

    match file_id {
        Some(id) => {
            let mut direct = url.clone();
            direct.set_host(Some("drive.google.com")).ok();
            direct.set_path("/uc");
            direct
                .query_pairs_mut()
                .clear()
                .append_pair("export", "download")
                .append_pair("id", &id);
            direct
        }
        None => url.clone(),
    }
}

/// SharePoint and OneDrive serve the raw file with `download=1`.
pub fn rewrite_sharepoint(url: &Url) -> Url {
    let mut direct = url.clone();
    if !url.query_pairs().any(|(key, _)| key == "download") {
        direct.query_pairs_mut().append_pair("download", "1");
    }
    direct
}

pub fn rewrite_dropbox(url: &Url) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "dl")
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let mut direct = url.clone();
    {
        let mut pairs = direct.query_pairs_mut();
        pairs.clear();
        for (key, value) in &kept {
            pairs.append_pair(key, value);
        }
        pairs.append_pair("dl", "1");
    }
    direct
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_box_rewrite() {
        let direct = rewrite_box(&url("https://app.box.com/s/abc123"));
        assert_eq!(direct.as_str(), "https://app.box.com/shared/static/abc123");

        let untouched = rewrite_box(&url("https://app.box.com/file/99"));
        assert_eq!(untouched.as_str(), "https://app.box.com/file/99");
    }

    #[test]
    fn test_google_drive_rewrite() {
        let direct = rewrite_google_drive(&url("https://drive.google.com/file/d/XYZ/view?usp=sharing"));
        assert_eq!(
            direct.as_str(),
            "https://drive.google.com/uc?export=download&id=XYZ"
        );

        let direct = rewrite_google_drive(&url("https://drive.google.com/open?id=ABC"));
        assert_eq!(
            direct.as_str(),
            "https://drive.google.com/uc?export=download&id=ABC"
        );
    }

    #[test]
    fn test_sharepoint_and_dropbox_rewrite() {
        let direct = rewrite_sharepoint(&url("https://contoso.sharepoint.com/x/doc.pdf?web=1"));
        assert_eq!(
            direct.as_str(),
            "https://contoso.sharepoint.com/x/doc.pdf?web=1&download=1"
        );

        let direct = rewrite_dropbox(&url("https://www.dropbox.com/s/k/file.pdf?dl=0"));
        assert_eq!(direct.as_str(), "https://www.dropbox.com/s/k/file.pdf?dl=1");
    }

    #[tokio::test]
    async fn test_local_fetcher_streams_chunks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, vec![7u8; 25]).unwrap();

        let fetcher = LocalFetcher::new(10);
        let response = fetcher
            .open(&path.to_string_lossy(), &AuthContext::default())
            .await
            .unwrap();
        assert_eq!(response.content_length, Some(25));

        let chunks: Vec<Bytes> = response
            .stream
            .map(|c| c.unwrap())
            .collect::<Vec<_>>()
            .await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), 25);
    }

    #[tokio::test]
    async fn test_local_fetcher_missing_file() {
        let fetcher = LocalFetcher::new(10);
        let err = match fetcher
            .open("/no/such/file.pdf", &AuthContext::default())
            .await
        {
            Err(err) => err,
            Ok(_) => panic!("expected not_found"),
        };
        assert_eq!(err.kind, DownloadErrorKind::NotFound);
        assert!(!err.transient);
    }
}
