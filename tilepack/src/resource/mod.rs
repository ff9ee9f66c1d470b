//! Fetchable resources and the provider abstraction.
//!
//! A [`ResourceKey`] identifies one fetchable unit (style document, sprite,
//! glyph range, or tile). A [`ResourceProvider`] answers byte-fetch requests
//! for keys; the reqwest-backed [`HttpResourceProvider`] talks to the two
//! reference endpoints (a style-document URL and a `{z}/{x}/{y}` tile URL
//! template).

mod http;
mod key;
mod style;
mod types;

pub use http::HttpResourceProvider;
pub use key::ResourceKey;
pub use style::style_dependency_keys;
pub use types::{BoxFuture, FetchError, FetchedResource, ResourceProvider};
