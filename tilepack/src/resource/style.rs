//! Style-document parsing.
//!
//! Once a pack's style document is fetched, its `sprite` and `glyphs` fields
//! determine which additional assets the pack must carry. Everything else in
//! the document belongs to the rendering layer and is ignored here.

use serde::Deserialize;

use super::key::ResourceKey;
use super::types::FetchError;

#[derive(Debug, Deserialize)]
struct StyleDocument {
    sprite: Option<String>,
    glyphs: Option<String>,
}

/// Extracts the sprite/glyph resource keys referenced by a style document.
///
/// A style referencing neither yields an empty list. Invalid JSON is a
/// permanently malformed response; the pack's style resource is already
/// counted, so the caller records the failure without retrying.
pub fn style_dependency_keys(bytes: &[u8]) -> Result<Vec<ResourceKey>, FetchError> {
    let doc: StyleDocument = serde_json::from_slice(bytes)
        .map_err(|e| FetchError::Malformed(format!("style document is not valid JSON: {e}")))?;

    let mut keys = Vec::new();
    if let Some(url) = doc.sprite {
        keys.push(ResourceKey::Sprite { url });
    }
    if let Some(url) = doc.glyphs {
        keys.push(ResourceKey::GlyphRange { url });
    }
    Ok(keys)
}
