//! Data model of a parsed glTF 2.0 document.
//!
//! The loader consumes an already-parsed JSON object graph; these types are
//! the serde image of that JSON. Cross-references between elements are
//! integer indices into the document's flat top-level arrays. After parsing,
//! [`Document::assign_indices`] stamps every element with its own array
//! position — that position is the only stable identity used during
//! resolution, and [`indexed`] is the single bounds-checked way to follow a
//! reference.

use serde::Deserialize;

use crate::error::{Error, Result};

/// Padding tolerance (bytes) allowed between a buffer's declared length and
/// the embedded binary chunk's actual length.
const BIN_PADDING_TOLERANCE: u64 = 3;

/// Bounds-checked index lookup with uniform error context.
///
/// All cross-reference resolution goes through this so failures carry the
/// JSON pointer of the referencing property and the offending index.
pub(crate) fn indexed<'a, T>(context: &str, array: &'a [T], index: Option<u32>) -> Result<&'a T> {
    let idx = index.ok_or_else(|| Error::reference(context, "undefined"))?;
    array
        .get(idx as usize)
        .ok_or_else(|| Error::reference(context, idx))
}

/// Build the JSON pointer of a top-level array element, e.g. `/nodes/3`.
pub(crate) fn pointer(kind: &str, index: usize) -> String {
    format!("/{kind}/{index}")
}

trait IndexedElement {
    fn set_index(&mut self, index: usize);
}

macro_rules! impl_indexed {
    ($($ty:ty),* $(,)?) => {
        $(impl IndexedElement for $ty {
            fn set_index(&mut self, index: usize) {
                self.index = index;
            }
        })*
    };
}

impl_indexed!(
    Accessor, Buffer, BufferView, Camera, Image, Material, Mesh, Node, Sampler, SceneDef, Skin,
    Texture, Animation,
);

fn assign<T: IndexedElement>(items: &mut [T]) {
    for (i, item) in items.iter_mut().enumerate() {
        item.set_index(i);
    }
}

/// A parsed glTF document: flat, insertion-ordered arrays of every element
/// kind, plus the names of extensions the asset uses or requires.
///
/// The optional embedded binary chunk is *not* part of the JSON; it is
/// passed alongside the document at loader construction.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Document {
    pub accessors: Vec<Accessor>,
    pub animations: Vec<Animation>,
    pub buffers: Vec<Buffer>,
    pub buffer_views: Vec<BufferView>,
    pub cameras: Vec<Camera>,
    pub images: Vec<Image>,
    pub materials: Vec<Material>,
    pub meshes: Vec<Mesh>,
    pub nodes: Vec<Node>,
    pub samplers: Vec<Sampler>,
    pub scenes: Vec<SceneDef>,
    pub skins: Vec<Skin>,
    pub textures: Vec<Texture>,
    /// Default scene index.
    pub scene: Option<u32>,
    pub extensions_used: Vec<String>,
    pub extensions_required: Vec<String>,
}

impl Document {
    /// Parse a document from a JSON value.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| Error::Structural(format!("invalid glTF document: {e}")))
    }

    /// Stamp every element of every top-level array with its array position.
    ///
    /// No-op on empty arrays. Must run before any resolution starts.
    pub fn assign_indices(&mut self) {
        assign(&mut self.accessors);
        assign(&mut self.animations);
        assign(&mut self.buffers);
        assign(&mut self.buffer_views);
        assign(&mut self.cameras);
        assign(&mut self.images);
        assign(&mut self.materials);
        assign(&mut self.meshes);
        assign(&mut self.nodes);
        assign(&mut self.samplers);
        assign(&mut self.scenes);
        assign(&mut self.skins);
        assign(&mut self.textures);
    }

    /// Validate the embedded binary chunk against the first buffer.
    ///
    /// glTF allows the chunk to be padded up to 3 bytes past the declared
    /// length. Mismatches beyond that are logged, never fatal.
    pub(crate) fn validate_bin_chunk(&self, bin: Option<&[u8]>) {
        let Some(bin) = bin else { return };
        match self.buffers.first() {
            Some(buffer) if buffer.uri.is_none() => {
                let declared = buffer.byte_length;
                let actual = bin.len() as u64;
                if actual < declared || actual > declared + BIN_PADDING_TOLERANCE {
                    log::warn!(
                        "/buffers/0: binary chunk length {actual} outside declared \
                         {declared}..={} range",
                        declared + BIN_PADDING_TOLERANCE
                    );
                }
            }
            _ => {
                log::warn!("embedded binary chunk present but no matching buffer");
            }
        }
    }
}

/// A source of raw bytes, resolved by URI or from the embedded chunk.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Buffer {
    pub uri: Option<String>,
    pub byte_length: u64,
    pub name: Option<String>,
    #[serde(skip)]
    pub index: usize,
}

/// A byte range over a buffer.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BufferView {
    pub buffer: Option<u32>,
    pub byte_offset: u64,
    pub byte_length: u64,
    pub byte_stride: Option<u64>,
    pub name: Option<String>,
    #[serde(skip)]
    pub index: usize,
}

/// A typed element stream over a buffer view.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Accessor {
    pub buffer_view: Option<u32>,
    pub byte_offset: u64,
    pub component_type: u32,
    pub normalized: bool,
    pub count: u64,
    #[serde(rename = "type")]
    pub element_type: String,
    pub min: Option<Vec<f32>>,
    pub max: Option<Vec<f32>>,
    pub sparse: Option<Sparse>,
    pub name: Option<String>,
    #[serde(skip)]
    pub index: usize,
}

/// Sparse overlay patching a base accessor at selected element indices.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Sparse {
    pub count: u64,
    pub indices: SparseIndices,
    pub values: SparseValues,
}

/// Where the sparse element indices live.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SparseIndices {
    pub buffer_view: Option<u32>,
    pub byte_offset: u64,
    pub component_type: u32,
}

/// Where the sparse replacement values live.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SparseValues {
    pub buffer_view: Option<u32>,
    pub byte_offset: u64,
}

/// Image content, embedded in a buffer view or referenced by URI.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Image {
    pub uri: Option<String>,
    pub mime_type: Option<String>,
    pub buffer_view: Option<u32>,
    pub name: Option<String>,
    #[serde(skip)]
    pub index: usize,
}

/// Texture filtering/wrapping parameters (raw GL codes).
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Sampler {
    pub mag_filter: Option<u32>,
    pub min_filter: Option<u32>,
    pub wrap_s: Option<u32>,
    pub wrap_t: Option<u32>,
    pub name: Option<String>,
    #[serde(skip)]
    pub index: usize,
}

/// A texture: an image source paired with a sampler.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Texture {
    pub sampler: Option<u32>,
    pub source: Option<u32>,
    pub name: Option<String>,
    #[serde(skip)]
    pub index: usize,
}

/// Reference from a material property to a texture.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TextureInfo {
    /// Index of the referenced texture.
    pub index: Option<u32>,
    pub tex_coord: u32,
}

/// Normal-map reference with bump scale.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NormalTextureInfo {
    pub index: Option<u32>,
    pub tex_coord: u32,
    pub scale: f32,
}

impl Default for NormalTextureInfo {
    fn default() -> Self {
        Self {
            index: None,
            tex_coord: 0,
            scale: 1.0,
        }
    }
}

/// Occlusion-map reference with strength.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OcclusionTextureInfo {
    pub index: Option<u32>,
    pub tex_coord: u32,
    pub strength: f32,
}

impl Default for OcclusionTextureInfo {
    fn default() -> Self {
        Self {
            index: None,
            tex_coord: 0,
            strength: 1.0,
        }
    }
}

/// Metallic-roughness property block.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PbrMetallicRoughness {
    pub base_color_factor: [f32; 4],
    pub base_color_texture: Option<TextureInfo>,
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub metallic_roughness_texture: Option<TextureInfo>,
}

impl Default for PbrMetallicRoughness {
    fn default() -> Self {
        Self {
            base_color_factor: [1.0, 1.0, 1.0, 1.0],
            base_color_texture: None,
            metallic_factor: 1.0,
            roughness_factor: 1.0,
            metallic_roughness_texture: None,
        }
    }
}

/// A PBR material definition.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Material {
    pub name: Option<String>,
    pub pbr_metallic_roughness: Option<PbrMetallicRoughness>,
    pub normal_texture: Option<NormalTextureInfo>,
    pub occlusion_texture: Option<OcclusionTextureInfo>,
    pub emissive_texture: Option<TextureInfo>,
    pub emissive_factor: [f32; 3],
    pub alpha_mode: Option<String>,
    pub alpha_cutoff: Option<f32>,
    pub double_sided: bool,
    #[serde(skip)]
    pub index: usize,
}

/// A mesh: one or more primitives plus default morph weights.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Mesh {
    pub primitives: Vec<Primitive>,
    pub weights: Vec<f32>,
    pub name: Option<String>,
    pub extras: Option<serde_json::Value>,
    #[serde(skip)]
    pub index: usize,
}

impl Mesh {
    /// Morph target names from `extras.targetNames`, if present.
    pub fn target_names(&self) -> Option<Vec<String>> {
        let names = self.extras.as_ref()?.get("targetNames")?.as_array()?;
        Some(
            names
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
        )
    }
}

/// One drawable unit of a mesh.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Primitive {
    /// Semantic name → accessor index.
    pub attributes: std::collections::BTreeMap<String, u32>,
    pub indices: Option<u32>,
    pub material: Option<u32>,
    pub mode: Option<u32>,
    /// Morph target attribute maps.
    pub targets: Vec<std::collections::BTreeMap<String, u32>>,
}

/// Joints and bind matrices for skeletal animation.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Skin {
    pub inverse_bind_matrices: Option<u32>,
    pub skeleton: Option<u32>,
    pub joints: Vec<u32>,
    pub name: Option<String>,
    #[serde(skip)]
    pub index: usize,
}

/// Perspective projection parameters.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CameraPerspective {
    pub aspect_ratio: Option<f32>,
    pub yfov: f32,
    pub zfar: Option<f32>,
    pub znear: f32,
}

/// Orthographic projection parameters.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CameraOrthographic {
    pub xmag: f32,
    pub ymag: f32,
    pub zfar: f32,
    pub znear: f32,
}

/// A camera definition.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Camera {
    #[serde(rename = "type")]
    pub camera_type: String,
    pub perspective: Option<CameraPerspective>,
    pub orthographic: Option<CameraOrthographic>,
    pub name: Option<String>,
    #[serde(skip)]
    pub index: usize,
}

/// A scene-graph node.
///
/// Either `matrix` or the individual TRS fields describe the local
/// transform; the document never carries both.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Node {
    pub camera: Option<u32>,
    pub children: Vec<u32>,
    pub skin: Option<u32>,
    pub matrix: Option<[f32; 16]>,
    pub mesh: Option<u32>,
    pub rotation: Option<[f32; 4]>,
    pub scale: Option<[f32; 3]>,
    pub translation: Option<[f32; 3]>,
    pub weights: Vec<f32>,
    pub name: Option<String>,
    #[serde(skip)]
    pub index: usize,
}

/// An animation: channels binding samplers to node properties.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Animation {
    pub channels: Vec<Channel>,
    pub samplers: Vec<AnimationSampler>,
    pub name: Option<String>,
    #[serde(skip)]
    pub index: usize,
}

/// Binds one sampler to one targeted node property.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Channel {
    pub sampler: Option<u32>,
    pub target: ChannelTarget,
}

/// The node property an animation channel drives.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChannelTarget {
    pub node: Option<u32>,
    pub path: String,
}

/// Keyframe input/output accessors plus interpolation mode.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnimationSampler {
    pub input: Option<u32>,
    pub interpolation: Option<String>,
    pub output: Option<u32>,
}

/// A scene: the set of root node indices.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SceneDef {
    pub nodes: Vec<u32>,
    pub name: Option<String>,
    #[serde(skip)]
    pub index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assign_indices_stamps_positions() {
        let mut doc = Document::from_json(json!({
            "nodes": [{}, {"mesh": 0}, {"children": [0]}],
            "meshes": [{"primitives": [{"attributes": {"POSITION": 0}}]}],
            "accessors": [{"componentType": 5126, "count": 1, "type": "VEC3"}],
        }))
        .unwrap();
        doc.assign_indices();

        for (i, node) in doc.nodes.iter().enumerate() {
            assert_eq!(node.index, i);
        }
        assert_eq!(doc.meshes[0].index, 0);
        assert_eq!(doc.accessors[0].index, 0);

        // a valid lookup returns the same element
        let node = indexed("/scenes/0/nodes/1", &doc.nodes, Some(1)).unwrap();
        assert_eq!(node.index, 1);
        assert_eq!(node.mesh, Some(0));
    }

    #[test]
    fn indexed_error_messages() {
        let nodes: Vec<Node> = Vec::new();
        let err = indexed("/nodes/0/children/0", &nodes, Some(4)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "/nodes/0/children/0: Failed to find index (4)"
        );

        let err = indexed("/animations/0/channels/0/sampler", &nodes, None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "/animations/0/channels/0/sampler: Failed to find index (undefined)"
        );
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let doc = Document::from_json(json!({
            "asset": {"version": "2.0"},
            "nodes": [{"translation": [1.0, 0.0, 0.0], "futureField": 42}],
        }))
        .unwrap();
        assert_eq!(doc.nodes[0].translation, Some([1.0, 0.0, 0.0]));
    }

    #[test]
    fn mesh_target_names() {
        let doc = Document::from_json(json!({
            "meshes": [{
                "primitives": [],
                "extras": {"targetNames": ["smile", "frown"]},
            }],
        }))
        .unwrap();
        assert_eq!(
            doc.meshes[0].target_names().unwrap(),
            vec!["smile".to_string(), "frown".to_string()]
        );
    }
}
