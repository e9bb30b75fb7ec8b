//! # glTF Scene Loader
//!
//! Resolves a parsed glTF 2.0 document (plus an optional embedded binary
//! chunk) into a fully linked scene graph: transform nodes, mesh primitives
//! with geometry and morph targets, skeletons, cameras, materials with
//! textures, and animation curves.
//!
//! The loader performs no file or network I/O itself: external URIs go
//! through a [`UriLoader`](io::UriLoader) collaborator, and the result is a
//! renderer-agnostic object model the host maps onto its own engine types.
//!
//! # Example
//!
//! ```ignore
//! use gltf_scene_loader::{Document, ExtensionRegistry, GltfLoader, LoaderOptions};
//!
//! let json: serde_json::Value = serde_json::from_slice(&gltf_bytes)?;
//! let document = Document::from_json(json)?;
//!
//! let loader = GltfLoader::new(ExtensionRegistry::new())
//!     .with_options(LoaderOptions::new().with_target_fps(30.0));
//! let scene = loader.load_default_scene(document, bin_chunk).await?;
//! for handle in &scene.meshes {
//!     println!("{}", scene.graph.node(*handle).name);
//! }
//! ```

pub mod accessor;
pub mod animation;
pub mod buffer;
pub mod document;
pub mod error;
pub mod extension;
pub mod io;
pub mod loader;
pub mod material;
pub mod math;
pub mod mesh;
pub mod node;
pub mod scene;
pub mod skin;
pub mod vertex;

#[cfg(test)]
mod tests;

pub use buffer::ByteSlice;
pub use document::Document;
pub use error::{Error, Result};
pub use extension::{Extension, ExtensionFactory, ExtensionRegistry, Step};
pub use io::{IoFuture, MemoryUriLoader, UriLoader};
pub use loader::{CoordinateSystemMode, GltfLoader, LoadContext, LoaderOptions};
pub use scene::{
    AlphaMode, AnimationCurve, AnimationGroup, BoundingBox, CameraObject, CameraProjection,
    CurveProperty, DrawMode, GeometryData, Interpolation, KeyValue, Keyframe, LoadedScene,
    LoaderObserver, MaterialHandle, MaterialInstance, MeshObject, MorphTarget,
    MorphTargetManager, NodeHandle, NodeKind, SceneGraph, SceneNode, Skeleton, SkeletonHandle,
    TextureInstance, Winding,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod version_tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
