//! Reqwest-backed resource provider.

use std::time::Duration;

use reqwest::header::CACHE_CONTROL;
use reqwest::StatusCode;

use super::key::ResourceKey;
use super::types::{BoxFuture, FetchError, FetchedResource, ResourceProvider};

/// Default timeout for a single fetch.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// HTTP resource provider for the reference endpoints.
///
/// Style, sprite, and glyph keys carry absolute URLs; tile keys are expanded
/// through a URL template with `{z}`, `{x}`, and `{y}` placeholders, e.g.
/// `http://localhost:3000/tiles/{z}/{x}/{y}`.
pub struct HttpResourceProvider {
    client: reqwest::Client,
    tile_url_template: String,
}

impl HttpResourceProvider {
    /// Creates a provider with the default timeout.
    pub fn new(tile_url_template: impl Into<String>) -> Result<Self, FetchError> {
        Self::with_timeout(tile_url_template, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Creates a provider with a custom per-request timeout.
    pub fn with_timeout(
        tile_url_template: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            tile_url_template: tile_url_template.into(),
        })
    }

    fn url_for(&self, key: &ResourceKey) -> String {
        match key {
            ResourceKey::Style { url }
            | ResourceKey::Sprite { url }
            | ResourceKey::GlyphRange { url } => url.clone(),
            ResourceKey::Tile { coord } => self
                .tile_url_template
                .replace("{z}", &coord.zoom.to_string())
                .replace("{x}", &coord.x.to_string())
                .replace("{y}", &coord.y.to_string()),
        }
    }
}

impl ResourceProvider for HttpResourceProvider {
    fn fetch(&self, key: &ResourceKey) -> BoxFuture<'_, Result<FetchedResource, FetchError>> {
        let url = self.url_for(key);
        Box::pin(async move {
            let response = self.client.get(&url).send().await.map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Transport(format!("request to {url} failed: {e}"))
                }
            })?;

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                return Err(FetchError::NotFound);
            }
            if !status.is_success() {
                return Err(FetchError::Server {
                    status: status.as_u16(),
                });
            }

            let must_revalidate = response
                .headers()
                .get(CACHE_CONTROL)
                .and_then(|v| v.to_str().ok())
                .map(cache_control_must_revalidate)
                .unwrap_or(false);

            let bytes = response
                .bytes()
                .await
                .map_err(|e| FetchError::Transport(format!("failed to read body from {url}: {e}")))?
                .to_vec();

            Ok(FetchedResource {
                bytes,
                must_revalidate,
            })
        })
    }
}

/// Interprets a `Cache-Control` header as "must revalidate" vs "may cache".
///
/// The reference tile endpoint serves `private, max-age=0`, which disables
/// caching; the core treats such bytes as freshly validated anyway.
pub(crate) fn cache_control_must_revalidate(value: &str) -> bool {
    value
        .split(',')
        .map(|d| d.trim().to_ascii_lowercase())
        .any(|d| d == "no-cache" || d == "no-store" || d == "must-revalidate" || d == "max-age=0")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_url_expansion() {
        let provider = HttpResourceProvider::new("http://localhost:3000/tiles/{z}/{x}/{y}")
            .expect("provider should build");
        let url = provider.url_for(&ResourceKey::tile(12, 1205, 1539));
        assert_eq!(url, "http://localhost:3000/tiles/12/1205/1539");
    }

    #[test]
    fn test_style_url_passthrough() {
        let provider = HttpResourceProvider::new("http://localhost:3000/tiles/{z}/{x}/{y}")
            .expect("provider should build");
        let url = provider.url_for(&ResourceKey::Style {
            url: "http://localhost/styles.json".to_string(),
        });
        assert_eq!(url, "http://localhost/styles.json");
    }

    #[test]
    fn test_cache_control_reference_endpoint() {
        // The reference server sends exactly this directive.
        assert!(cache_control_must_revalidate("private, max-age=0"));
    }

    #[test]
    fn test_cache_control_long_lived() {
        assert!(!cache_control_must_revalidate("private, max-age=31536000"));
        assert!(!cache_control_must_revalidate("public"));
    }

    #[test]
    fn test_cache_control_no_store() {
        assert!(cache_control_must_revalidate("no-store"));
        assert!(cache_control_must_revalidate("No-Cache, private"));
    }
}
