//! Element-load strategy: fetch the image and confirm it decodes as one.

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::{header, Client};

use super::{check_response, content_type, PreloadStrategy, StrategyKind};
use crate::asset::{AssetHandle, AssetUrl};
use crate::error::StrategyError;

/// Magic numbers of image formats accepted when the server omits or
/// mislabels the content type.
const IMAGE_SIGNATURES: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"BM", "image/bmp"),
    (b"\x00\x00\x01\x00", "image/x-icon"),
];

pub struct ElementLoadStrategy {
    client: Client,
    timeout: Duration,
}

impl ElementLoadStrategy {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn load(&self, url: &AssetUrl) -> Result<AssetHandle, StrategyError> {
        let response = self
            .client
            .get(url.as_url().clone())
            .header(header::ACCEPT, "image/avif,image/webp,image/*,*/*;q=0.8")
            .send()
            .await?;
        let response = check_response(url, response).await?;
        let declared = content_type(&response);
        let body = response.bytes().await?;

        let content_type = decoded_type(declared.as_deref(), &body)
            .ok_or_else(|| StrategyError::Decode(format!(
                "{} is not an image (content-type {:?}, {} bytes)",
                url,
                declared,
                body.len()
            )))?;

        Ok(AssetHandle::new(StrategyKind::ElementLoad, Some(content_type), 0).with_body(&body))
    }
}

impl PreloadStrategy for ElementLoadStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ElementLoad
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn execute<'a>(&'a self, url: &'a AssetUrl) -> BoxFuture<'a, Result<AssetHandle, StrategyError>> {
        Box::pin(self.load(url))
    }
}

/// Decide whether a body is an image, returning its effective MIME type.
///
/// An empty body never decodes, whatever the headers claim.
fn decoded_type(declared: Option<&str>, body: &[u8]) -> Option<String> {
    if body.is_empty() {
        return None;
    }

    if let Some(declared) = declared {
        let mime = declared.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        if mime.starts_with("image/") {
            return Some(mime);
        }
    }

    sniff(body).map(|s| s.to_string())
}

fn sniff(body: &[u8]) -> Option<&'static str> {
    for &(signature, mime) in IMAGE_SIGNATURES {
        if body.starts_with(signature) {
            return Some(mime);
        }
    }
    if body.len() >= 12 && &body[..4] == b"RIFF" && &body[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    let head = String::from_utf8_lossy(&body[..body.len().min(256)]);
    let head = head.trim_start();
    if head.starts_with("<svg") || (head.starts_with("<?xml") && head.contains("<svg")) {
        return Some("image/svg+xml");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_image_type_wins() {
        assert_eq!(decoded_type(Some("image/jpeg; charset=binary"), b"abc").as_deref(), Some("image/jpeg"));
        assert_eq!(decoded_type(Some("IMAGE/PNG"), b"abc").as_deref(), Some("image/png"));
    }

    #[test]
    fn test_sniffs_when_header_is_wrong() {
        assert_eq!(
            decoded_type(Some("application/octet-stream"), b"\x89PNG\r\n\x1a\n....").as_deref(),
            Some("image/png")
        );
        assert_eq!(decoded_type(None, b"GIF89a...").as_deref(), Some("image/gif"));
        assert_eq!(decoded_type(None, b"RIFF\0\0\0\0WEBPVP8 ").as_deref(), Some("image/webp"));
        assert_eq!(
            decoded_type(Some("text/xml"), b"<?xml version=\"1.0\"?><svg></svg>").as_deref(),
            Some("image/svg+xml")
        );
    }

    #[test]
    fn test_rejects_non_images() {
        assert_eq!(decoded_type(Some("text/html"), b"<html></html>"), None);
        assert_eq!(decoded_type(None, b"plain text"), None);
        assert_eq!(decoded_type(Some("image/png"), b""), None);
    }
}
