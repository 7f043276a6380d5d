use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::{Client, ClientBuilder};
use tracing::debug;

use crate::error::FetchError;
use crate::url_utils::{extension_for, hash_url, AssetBucket, DESKTOP_USER_AGENT};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// A successfully fetched and written asset.
#[derive(Debug, Clone)]
pub struct DownloadedAsset {
    /// Path relative to the clone's output directory, e.g.
    /// `assets/images/4fcb2a91d07e.jpg`.
    pub local_path: String,
    pub full_path: PathBuf,
    pub content_type: String,
    pub bucket: AssetBucket,
    pub byte_size: u64,
}

/// Plain-HTTP asset downloader. One GET per distinct URL, no retries: a
/// flaky CDN request must never abort the whole clone.
pub struct AssetFetcher {
    client: Client,
    assets_dir: PathBuf,
}

impl AssetFetcher {
    pub fn new(assets_dir: &Path) -> Result<Self, reqwest::Error> {
        let client = ClientBuilder::new()
            .use_rustls_tls()
            .user_agent(DESKTOP_USER_AGENT)
            .timeout(FETCH_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            assets_dir: assets_dir.to_path_buf(),
        })
    }

    /// Download one asset to `assets/<bucket>/<hash><ext>`. `content_type_hint`
    /// is the content type observed for this URL during rendering, used when
    /// the plain GET response carries none.
    pub async fn download(
        &self,
        url: &str,
        content_type_hint: Option<&str>,
    ) -> Result<DownloadedAsset, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let header = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        let content_type = effective_content_type(header, content_type_hint);

        let bytes = response.bytes().await?;

        let ext = extension_for(url, &content_type);
        let bucket = AssetBucket::classify(url, &content_type);
        let filename = format!("{}{}", hash_url(url), ext);

        let type_dir = self.assets_dir.join(bucket.as_str());
        tokio::fs::create_dir_all(&type_dir).await?;
        let full_path = type_dir.join(&filename);
        tokio::fs::write(&full_path, &bytes).await?;

        debug!(url, local = %full_path.display(), size = bytes.len(), "asset downloaded");

        Ok(DownloadedAsset {
            local_path: format!("assets/{}/{}", bucket.as_str(), filename),
            full_path,
            content_type,
            bucket,
            byte_size: bytes.len() as u64,
        })
    }
}

/// The response's own `Content-Type` wins; the content type observed during
/// rendering fills in only when the header is absent or unreadable.
fn effective_content_type(header: Option<&str>, hint: Option<&str>) -> String {
    header.or(hint).unwrap_or_default().to_string()
}
