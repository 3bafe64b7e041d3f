//! Image resolver: fetch by reference, sniff format, size in EMU.

use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use imagesize::{ImageError, ImageType};
use log::debug;

use super::scaled_extent;
use crate::engine::classifier::effective_dimension;
use crate::engine::traits::AssetFetcher;
use crate::engine::value::{
    ContentFormat, EmbeddedObject, ImagePayload, ObjectKind, PlacementToken,
};
use crate::engine::ResolveError;

/// Fetches `http(s)://` sources over the network and decodes `data:` URIs inline.
pub struct HttpAssetFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpAssetFetcher {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl AssetFetcher for HttpAssetFetcher {
    async fn fetch(&self, source: &str) -> Result<Vec<u8>, ResolveError> {
        if let Some(rest) = source.strip_prefix("data:") {
            return decode_data_uri(source, rest);
        }
        if !(source.starts_with("http://") || source.starts_with("https://")) {
            return Err(fetch_error(source, "unsupported source scheme"));
        }

        // Single attempt: a failed fetch aborts the render.
        let response = self
            .client
            .get(source)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| fetch_error(source, &e.to_string()))?
            .error_for_status()
            .map_err(|e| fetch_error(source, &e.to_string()))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| fetch_error(source, &e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

fn decode_data_uri(source: &str, rest: &str) -> Result<Vec<u8>, ResolveError> {
    let (header, data) = rest
        .split_once(',')
        .ok_or_else(|| fetch_error(source, "malformed data URI"))?;
    if !header.ends_with(";base64") {
        return Err(fetch_error(source, "data URI must be base64 encoded"));
    }
    BASE64_STANDARD
        .decode(data.trim())
        .map_err(|e| fetch_error(source, &e.to_string()))
}

fn fetch_error(source: &str, reason: &str) -> ResolveError {
    // Data URIs can be huge; keep the reported location short.
    let location = match source.find(',') {
        Some(idx) if source.starts_with("data:") => format!("{},...", &source[..idx]),
        _ => source.to_string(),
    };
    ResolveError::AssetFetch {
        location,
        reason: reason.to_string(),
    }
}

/// Detect the raster format from the content's magic bytes.
pub fn sniff_format(content: &[u8]) -> Result<ContentFormat, ResolveError> {
    let image_type = imagesize::image_type(content).map_err(|e| match e {
        ImageError::NotSupported => {
            ResolveError::UnsupportedImageFormat("unrecognized image data".to_string())
        }
        other => ResolveError::UnsupportedImageFormat(other.to_string()),
    })?;

    match image_type {
        ImageType::Png => Ok(ContentFormat::Png),
        ImageType::Jpeg => Ok(ContentFormat::Jpeg),
        ImageType::Gif => Ok(ContentFormat::Gif),
        ImageType::Bmp => Ok(ContentFormat::Bmp),
        ImageType::Tiff => Ok(ContentFormat::Tiff),
        other => Err(ResolveError::UnsupportedImageFormat(format!("{other:?}"))),
    }
}

pub async fn resolve(
    payload: &ImagePayload,
    token: PlacementToken,
    fetcher: &dyn AssetFetcher,
) -> Result<EmbeddedObject, ResolveError> {
    debug!("Fetching image for token {}", token);
    let content = fetcher.fetch(&payload.source).await?;
    let format = sniff_format(&content)?;
    let size = imagesize::blob_size(&content)
        .map_err(|e| ResolveError::UnsupportedImageFormat(e.to_string()))?;

    let extent = scaled_extent(
        (size.width as u64, size.height as u64),
        effective_dimension(payload.width),
        effective_dimension(payload.height),
    );
    debug!(
        "Image {} resolved: {:?} {}x{} px -> {}x{} EMU",
        token, format, size.width, size.height, extent.cx, extent.cy
    );

    Ok(EmbeddedObject {
        kind: ObjectKind::Image,
        format,
        content,
        extent: Some(extent),
        token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::resolvers::qr::encode_grayscale_png;
    use crate::engine::value::Extent;

    struct StaticFetcher(Vec<u8>);

    #[async_trait]
    impl AssetFetcher for StaticFetcher {
        async fn fetch(&self, _source: &str) -> Result<Vec<u8>, ResolveError> {
            Ok(self.0.clone())
        }
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        encode_grayscale_png(width, height, &vec![255u8; (width * height) as usize]).unwrap()
    }

    fn payload(width: Option<f64>, height: Option<f64>) -> ImagePayload {
        ImagePayload {
            source: "https://example.com/pic.png".to_string(),
            width,
            height,
        }
    }

    #[tokio::test]
    async fn test_resolve_png_at_native_size() {
        // Arrange
        let fetcher = StaticFetcher(png(10, 20));

        // Act
        let object = resolve(&payload(None, None), PlacementToken(0), &fetcher)
            .await
            .unwrap();

        // Assert
        assert_eq!(object.kind, ObjectKind::Image);
        assert_eq!(object.format, ContentFormat::Png);
        assert_eq!(object.extent, Some(Extent { cx: 127_000, cy: 254_000 }));
    }

    #[tokio::test]
    async fn test_zero_width_is_treated_as_absent() {
        let fetcher = StaticFetcher(png(10, 20));
        let object = resolve(&payload(Some(0.0), Some(20.0)), PlacementToken(0), &fetcher)
            .await
            .unwrap();
        assert_eq!(object.extent, Some(Extent { cx: 360_000, cy: 720_000 }));
    }

    #[tokio::test]
    async fn test_unsupported_content_is_rejected() {
        let fetcher = StaticFetcher(b"<html>not an image</html>".to_vec());
        let err = resolve(&payload(None, None), PlacementToken(0), &fetcher)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::UnsupportedImageFormat(_)));
    }

    #[tokio::test]
    async fn test_fetch_decodes_data_uri() {
        let bytes = png(2, 2);
        let source = format!("data:image/png;base64,{}", BASE64_STANDARD.encode(&bytes));
        let fetcher = HttpAssetFetcher::new(reqwest::Client::new(), Duration::from_secs(1));

        let fetched = fetcher.fetch(&source).await.unwrap();

        assert_eq!(fetched, bytes);
    }

    #[tokio::test]
    async fn test_fetch_rejects_unknown_scheme() {
        let fetcher = HttpAssetFetcher::new(reqwest::Client::new(), Duration::from_secs(1));
        let err = fetcher.fetch("ftp://example.com/a.png").await.unwrap_err();
        match err {
            ResolveError::AssetFetch { location, .. } => {
                assert_eq!(location, "ftp://example.com/a.png")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_rejects_non_base64_data_uri() {
        let fetcher = HttpAssetFetcher::new(reqwest::Client::new(), Duration::from_secs(1));
        let err = fetcher.fetch("data:text/plain,hello").await.unwrap_err();
        assert!(matches!(err, ResolveError::AssetFetch { .. }));
    }

    #[test]
    fn test_sniff_jpeg_and_gif_headers() {
        assert_eq!(
            sniff_format(b"GIF89a\x01\x00\x01\x00\x00\x00\x00").unwrap(),
            ContentFormat::Gif
        );
        assert!(sniff_format(b"RIFF\x00\x00\x00\x00WEBPVP8 ").is_err());
    }
}
