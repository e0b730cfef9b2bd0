//! Capability discovery: learn `total_bytes` and whether the origin honors
//! byte-range requests.

use reqwest::{Client, StatusCode};

use crate::error::DownloadError;

/// Outcome of capability discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub total_bytes: u64,
    pub supports_resume: bool,
}

/// Runs Strategy A (HEAD probe), falling back to Strategy B (single-byte
/// range GET) on any non-2xx response or transport error.
///
/// Returns `Capabilities { total_bytes: 0, supports_resume: false }` if
/// both strategies fail to establish a size. This is a tolerated degraded
/// mode: the caller falls back to `Content-Range` parsing from the first
/// real chunk GET instead.
pub async fn discover(client: &Client, url: &str) -> Result<Capabilities, DownloadError> {
    match head_probe(client, url).await {
        Some(caps) => Ok(caps),
        None => range_probe(client, url).await,
    }
}

async fn head_probe(client: &Client, url: &str) -> Option<Capabilities> {
    let response = client.head(url).send().await.ok()?;
    if !response.status().is_success() {
        return None;
    }

    let total_bytes = response.content_length().unwrap_or(0);
    let supports_resume = response.status() == StatusCode::PARTIAL_CONTENT
        || response
            .headers()
            .get("accept-ranges")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("bytes"))
            .unwrap_or(false);

    tracing::info!(url, total_bytes, supports_resume, "head probe succeeded");
    Some(Capabilities {
        total_bytes,
        supports_resume,
    })
}

/// Strategy B: `Range: bytes=0-0`. The response status is examined as soon
/// as headers are available; a `200` means the server ignored the range
/// and the body must not be drained.
async fn range_probe(client: &Client, url: &str) -> Result<Capabilities, DownloadError> {
    let response = client
        .get(url)
        .header("Range", "bytes=0-0")
        .send()
        .await
        .map_err(|e| DownloadError::Network(e.to_string()))?;

    match response.status() {
        StatusCode::PARTIAL_CONTENT => {
            let total_bytes = response
                .headers()
                .get("content-range")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range_total)
                .unwrap_or(0);
            tracing::info!(url, total_bytes, "range probe: server honors ranges");
            Ok(Capabilities {
                total_bytes,
                supports_resume: true,
            })
        }
        StatusCode::OK => {
            // server served the whole body for a ranged request; do not
            // read it here, the caller re-issues a fresh GET in the chunk
            // loop once supports_resume is known to be false.
            let total_bytes = response.content_length().unwrap_or(0);
            drop(response);
            tracing::info!(url, total_bytes, "range probe: server ignored range");
            Ok(Capabilities {
                total_bytes,
                supports_resume: false,
            })
        }
        status => Err(DownloadError::Http {
            status: status.as_u16(),
            text: status.canonical_reason().unwrap_or("").to_string(),
        }),
    }
}

/// Parses the `total` out of a `Content-Range: bytes a-b/total` header.
pub(crate) fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse().ok()
}
