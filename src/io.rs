//! External resource loading capability and inline data-URI decoding.
//!
//! The loader never performs file or network I/O itself. External URIs are
//! delegated to a [`UriLoader`] collaborator; `data:` URIs are decoded
//! inline. All futures are boxed and `Send` so they can run on any async
//! runtime.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};

/// A boxed, `Send` future returning a `Result`.
///
/// All [`UriLoader`] methods return this type.
pub type IoFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

/// Capability for fetching external resources referenced by URI.
///
/// Implementations decide what a URI means (filesystem path, HTTP URL,
/// archive entry). Fetch failures should be reported through
/// [`Error::Load`] so the loader can annotate them with document context.
pub trait UriLoader: Send + Sync + 'static {
    /// Fetch the entire resource at the given URL.
    fn load_uri(&self, url: &str) -> IoFuture<Vec<u8>>;

    /// Rewrite a URL before it is fetched.
    ///
    /// The default implementation returns the URL unchanged.
    fn preprocess_url(&self, url: String) -> IoFuture<String> {
        Box::pin(async move { Ok(url) })
    }
}

/// In-memory [`UriLoader`] for tests and embedded assets.
///
/// Thread-safe and mutable after being handed to a loader.
#[derive(Clone, Default)]
pub struct MemoryUriLoader {
    files: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryUriLoader {
    /// Create an empty in-memory loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a resource at the given URL, overwriting any existing entry.
    pub fn insert(&self, url: impl Into<String>, data: Vec<u8>) {
        self.files.write().insert(url.into(), data);
    }
}

impl UriLoader for MemoryUriLoader {
    fn load_uri(&self, url: &str) -> IoFuture<Vec<u8>> {
        let files = self.files.clone();
        let url = url.to_string();
        Box::pin(async move {
            files
                .read()
                .get(&url)
                .cloned()
                .ok_or_else(|| Error::load("uriLoader", &url, "not found"))
        })
    }
}

/// Reject URIs that escape their base via `..` path traversal.
///
/// Data URIs are exempt — they carry their payload inline.
pub(crate) fn validate_uri(context: &str, uri: &str) -> Result<()> {
    if is_data_uri(uri) {
        return Ok(());
    }
    let traverses = uri
        .split(['/', '\\'])
        .any(|segment| segment == "..");
    if traverses {
        return Err(Error::Uri {
            context: context.to_string(),
            uri: uri.to_string(),
        });
    }
    Ok(())
}

/// Whether a URI carries inline data.
pub(crate) fn is_data_uri(uri: &str) -> bool {
    uri.starts_with("data:")
}

/// Parse a data URI (e.g. `data:application/octet-stream;base64,...`) and
/// return the decoded bytes.
pub(crate) fn parse_data_uri(uri: &str) -> Option<Vec<u8>> {
    let rest = uri.strip_prefix("data:")?;
    let base64_start = rest.find(";base64,")?;
    let encoded = &rest[base64_start + 8..];
    base64_decode(encoded)
}

/// Simple base64 decoder (avoids adding a dependency).
///
/// Whitespace and padding are skipped; any other character outside the
/// alphabet aborts the decode.
fn base64_decode(input: &str) -> Option<Vec<u8>> {
    fn sextet(c: u8) -> Option<u32> {
        match c {
            b'A'..=b'Z' => Some(u32::from(c - b'A')),
            b'a'..=b'z' => Some(u32::from(c - b'a') + 26),
            b'0'..=b'9' => Some(u32::from(c - b'0') + 52),
            b'+' => Some(62),
            b'/' => Some(63),
            _ => None,
        }
    }

    let mut out = Vec::with_capacity(input.len() / 4 * 3);
    let mut acc = 0u32;
    let mut bits = 0u32;
    for byte in input.bytes() {
        if matches!(byte, b'\r' | b'\n' | b' ' | b'=') {
            continue;
        }
        acc = (acc << 6) | sextet(byte)?;
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push((acc >> bits) as u8);
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_decode() {
        let decoded = base64_decode("SGVsbG8gV29ybGQ=").unwrap();
        assert_eq!(decoded, b"Hello World");
    }

    #[test]
    fn test_base64_decode_no_padding() {
        let decoded = base64_decode("YQ==").unwrap();
        assert_eq!(decoded, b"a");
    }

    #[test]
    fn test_base64_decode_skips_whitespace() {
        let decoded = base64_decode("SGVs\nbG8g\r\nV29y bGQ=").unwrap();
        assert_eq!(decoded, b"Hello World");
        assert!(base64_decode("SGVs*bG8=").is_none());
    }

    #[test]
    fn test_parse_data_uri() {
        let uri = "data:application/octet-stream;base64,AQID";
        assert_eq!(parse_data_uri(uri).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_parse_data_uri_not_data() {
        assert!(parse_data_uri("file://some/path").is_none());
    }

    #[test]
    fn test_validate_uri_rejects_traversal() {
        assert!(validate_uri("/buffers/0/uri", "../secret.bin").is_err());
        assert!(validate_uri("/buffers/0/uri", "textures/../../x").is_err());
        assert!(validate_uri("/buffers/0/uri", "textures/ok.bin").is_ok());
        // data uris are exempt even if they contain dots
        assert!(validate_uri("/buffers/0/uri", "data:application/octet-stream;base64,AQID").is_ok());
    }

    #[tokio::test]
    async fn test_memory_loader() {
        let loader = MemoryUriLoader::new();
        loader.insert("mesh.bin", vec![1, 2, 3]);
        assert_eq!(loader.load_uri("mesh.bin").await.unwrap(), vec![1, 2, 3]);
        assert!(loader.load_uri("missing.bin").await.is_err());
    }
}
