//! Support for downloading over HTTP.

use std::time::Duration;

use futures::future::BoxFuture;
use futures::TryStreamExt;
use reqwest::{Client, StatusCode, Url};
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use crate::caching::{CacheContents, CacheError};

use super::{Downloader, ProgressFn};

const USER_AGENT: &str = concat!("blobcache/", env!("CARGO_PKG_VERSION"));

/// Downloader for plain HTTP(S) origins.
#[derive(Debug)]
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn download_url(
        &self,
        url: &Url,
        destination: &mut File,
        progress: ProgressFn<'_>,
    ) -> CacheContents<()> {
        // a previous attempt may have left partial contents behind
        destination.rewind().await?;
        destination.set_len(0).await?;

        let builder = self
            .client
            .get(url.clone())
            .header(reqwest::header::USER_AGENT, USER_AGENT);
        let response = builder.send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(CacheError::NotFound);
        }
        if !status.is_success() {
            return Err(CacheError::DownloadError(format!(
                "server responded with {status}"
            )));
        }

        let total = response.content_length().filter(|total| *total > 0);
        let mut stream = response.bytes_stream();

        let mut written = 0u64;
        while let Some(chunk) = stream.try_next().await? {
            destination.write_all(&chunk).await?;
            written += chunk.len() as u64;
            if let Some(total) = total {
                progress((written as f64 / total as f64).min(1.0));
            }
        }
        destination.flush().await?;

        tracing::debug!(url = %url, bytes = written, "download complete");
        Ok(())
    }
}

impl Downloader for HttpDownloader {
    fn download<'a>(
        &'a self,
        url: &'a str,
        destination: &'a mut File,
        progress: ProgressFn<'a>,
    ) -> BoxFuture<'a, CacheContents<()>> {
        Box::pin(async move {
            let url = Url::parse(url).map_err(|e| CacheError::DownloadError(e.to_string()))?;

            // retry transient failures a couple of times; it is highly
            // unlikely a `NotFound` turns into a different result
            let mut tries = 0;
            loop {
                tries += 1;
                let result = self.download_url(&url, destination, progress).await;

                match result {
                    Ok(()) | Err(CacheError::NotFound) => break result,
                    Err(ref err) if tries < 3 => {
                        tracing::debug!(url = %url, error = %err, "retrying failed download");
                        tokio::time::sleep(Duration::from_millis(20)).await;
                    }
                    Err(_) => break result,
                }
            }
        })
    }
}
