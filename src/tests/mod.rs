//! Scene-loading tests built on small synthetic documents.

use crate::document::Document;
use crate::error::Result;
use crate::extension::ExtensionRegistry;
use crate::loader::{GltfLoader, LoaderOptions};
use crate::scene::LoadedScene;

mod animation_test;
mod loader_test;

/// Parse a test document from inline JSON.
fn document(json: serde_json::Value) -> Document {
    // surfaces loader warnings when tests run with RUST_LOG set
    let _ = env_logger::builder().is_test(true).try_init();
    Document::from_json(json).expect("test document must parse")
}

/// Load the default scene of an inline document.
async fn load(json: serde_json::Value) -> Result<LoadedScene> {
    load_with_bin(json, None).await
}

/// Load the default scene with an embedded binary chunk.
async fn load_with_bin(json: serde_json::Value, bin: Option<Vec<u8>>) -> Result<LoadedScene> {
    let loader = GltfLoader::new(ExtensionRegistry::new());
    loader.load_default_scene(document(json), bin).await
}

/// Load with explicit options.
async fn load_with_options(
    json: serde_json::Value,
    bin: Option<Vec<u8>>,
    options: LoaderOptions,
) -> Result<LoadedScene> {
    let loader = GltfLoader::new(ExtensionRegistry::new()).with_options(options);
    loader.load_default_scene(document(json), bin).await
}

/// Little-endian f32 stream as raw bytes, for binary chunks.
fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}
