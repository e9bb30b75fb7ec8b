//! Output object model produced by a load.
//!
//! The loader never attaches anything to the parsed document; every resolved
//! artifact lives in an explicit side structure owned by the load. Scene
//! nodes form an arena ([`SceneGraph`]) addressed by [`NodeHandle`], with a
//! closed set of node kinds rather than a type hierarchy. Every constructed
//! object is tagged with the JSON pointer(s) of its source declaration so
//! downstream tooling can trace it back.

use std::sync::Arc;

use crate::buffer::ByteSlice;
use crate::error::{Error, Result};
use crate::math::{Mat4, Quat, Vec3};

/// Handle of a node inside a [`SceneGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(pub(crate) usize);

/// Handle of a material inside [`LoadedScene::materials`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialHandle(pub(crate) usize);

/// Handle of a skeleton inside [`LoadedScene::skeletons`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SkeletonHandle(pub(crate) usize);

/// What a scene node carries.
#[derive(Debug)]
pub enum NodeKind {
    /// A plain transform with no renderable payload.
    Transform,
    /// A renderable mesh primitive.
    Mesh(MeshObject),
    /// A camera.
    Camera(CameraObject),
}

/// One node of the resolved scene graph.
#[derive(Debug)]
pub struct SceneNode {
    /// Node name (from the document, or generated).
    pub name: String,
    /// Payload kind.
    pub kind: NodeKind,
    /// Parent handle; `None` only for the synthetic root.
    pub parent: Option<NodeHandle>,
    /// Child handles.
    pub children: Vec<NodeHandle>,
    /// Local translation.
    pub translation: Vec3,
    /// Local rotation.
    pub rotation: Quat,
    /// Local scale.
    pub scale: Vec3,
    /// Disabled nodes are invisible to queries; the synthetic root stays
    /// disabled until the whole scene finishes loading.
    pub enabled: bool,
    /// JSON pointers of the source declarations this object came from.
    /// A skin-shared mesh may carry several.
    pub source_pointers: Vec<String>,
}

impl SceneNode {
    /// Create a transform node with identity TRS.
    pub fn transform(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Transform,
            parent: None,
            children: Vec::new(),
            translation: Vec3::zeros(),
            rotation: Quat::new(1.0, 0.0, 0.0, 0.0),
            scale: Vec3::new(1.0, 1.0, 1.0),
            enabled: true,
            source_pointers: Vec::new(),
        }
    }

    /// Borrow the mesh payload, if this is a mesh node.
    pub fn mesh(&self) -> Option<&MeshObject> {
        match &self.kind {
            NodeKind::Mesh(mesh) => Some(mesh),
            _ => None,
        }
    }

    /// Mutably borrow the mesh payload, if this is a mesh node.
    pub fn mesh_mut(&mut self) -> Option<&mut MeshObject> {
        match &mut self.kind {
            NodeKind::Mesh(mesh) => Some(mesh),
            _ => None,
        }
    }
}

/// Arena of scene nodes.
///
/// Parent/child links are handle-based; [`SceneGraph::set_parent`] keeps
/// both sides consistent.
#[derive(Debug, Default)]
pub struct SceneGraph {
    nodes: Vec<SceneNode>,
}

impl SceneGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node and return its handle.
    pub fn add_node(&mut self, node: SceneNode) -> NodeHandle {
        let handle = NodeHandle(self.nodes.len());
        self.nodes.push(node);
        handle
    }

    /// Borrow a node.
    pub fn node(&self, handle: NodeHandle) -> &SceneNode {
        &self.nodes[handle.0]
    }

    /// Mutably borrow a node.
    pub fn node_mut(&mut self, handle: NodeHandle) -> &mut SceneNode {
        &mut self.nodes[handle.0]
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate over all handles.
    pub fn handles(&self) -> impl Iterator<Item = NodeHandle> {
        (0..self.nodes.len()).map(NodeHandle)
    }

    /// Reparent a node, maintaining both child lists.
    pub fn set_parent(&mut self, child: NodeHandle, parent: Option<NodeHandle>) {
        if let Some(old) = self.nodes[child.0].parent {
            self.nodes[old.0].children.retain(|&c| c != child);
        }
        self.nodes[child.0].parent = parent;
        if let Some(new) = parent {
            self.nodes[new.0].children.push(child);
        }
    }
}

/// Draw topology of a primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawMode {
    Points,
    Lines,
    LineLoop,
    LineStrip,
    Triangles,
    TriangleStrip,
    TriangleFan,
}

impl DrawMode {
    /// Decode a glTF primitive `mode` code; absent defaults to triangles.
    pub fn from_code(context: &str, code: Option<u32>) -> Result<Self> {
        match code {
            None | Some(4) => Ok(Self::Triangles),
            Some(0) => Ok(Self::Points),
            Some(1) => Ok(Self::Lines),
            Some(2) => Ok(Self::LineLoop),
            Some(3) => Ok(Self::LineStrip),
            Some(5) => Ok(Self::TriangleStrip),
            Some(6) => Ok(Self::TriangleFan),
            Some(other) => Err(Error::value(context, other)),
        }
    }
}

/// Triangle front-face winding convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winding {
    Clockwise,
    CounterClockwise,
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

/// Compute bounds from a flat xyz position stream.
pub fn compute_bounds(positions: &[f32]) -> Option<BoundingBox> {
    if positions.len() < 3 {
        return None;
    }
    let mut min = [f32::INFINITY; 3];
    let mut max = [f32::NEG_INFINITY; 3];
    for vertex in positions.chunks_exact(3) {
        for axis in 0..3 {
            min[axis] = min[axis].min(vertex[axis]);
            max[axis] = max[axis].max(vertex[axis]);
        }
    }
    Some(BoundingBox { min, max })
}

/// Resolved vertex/index data of one primitive.
///
/// All attribute streams are flat `f32` arrays (joint indices included, so
/// consumers deal with a single numeric representation).
#[derive(Debug, Default)]
pub struct GeometryData {
    pub positions: Option<Arc<Vec<f32>>>,
    pub normals: Option<Arc<Vec<f32>>>,
    pub tangents: Option<Arc<Vec<f32>>>,
    pub tex_coords: [Option<Arc<Vec<f32>>>; 6],
    pub joints: [Option<Arc<Vec<f32>>>; 2],
    pub weights: [Option<Arc<Vec<f32>>>; 2],
    pub colors: Option<Arc<Vec<f32>>>,
    /// Component count of the color stream (3 or 4).
    pub color_components: usize,
    /// Set when COLOR_0 carries a fourth component.
    pub has_vertex_alpha: bool,
    /// 4, or 8 when a second joint/weight set is present.
    pub num_bone_influencers: u32,
    /// Index stream; `None` marks the mesh as unindexed.
    pub indices: Option<Arc<Vec<u32>>>,
    /// Vertex count from the POSITION accessor.
    pub vertex_count: u64,
    /// Bounds taken from the POSITION accessor's declared min/max.
    pub declared_bounds: Option<BoundingBox>,
    /// Whether `declared_bounds` may be used without scanning vertices.
    pub bounds_authoritative: bool,
}

/// State of a mesh node's morph targets.
///
/// Updates are batched: the manager is frozen while targets stream in and
/// unfrozen exactly once when every target of every primitive has loaded.
#[derive(Debug, Default)]
pub struct MorphTargetManager {
    frozen: bool,
    targets: Vec<MorphTarget>,
}

impl MorphTargetManager {
    /// Create a frozen manager.
    pub fn new() -> Self {
        Self {
            frozen: true,
            targets: Vec::new(),
        }
    }

    /// Whether updates are currently batched.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Resume updates after all targets have loaded.
    pub fn unfreeze(&mut self) {
        self.frozen = false;
    }

    /// Append a loaded target.
    pub fn add_target(&mut self, target: MorphTarget) {
        self.targets.push(target);
    }

    /// The loaded targets.
    pub fn targets(&self) -> &[MorphTarget] {
        &self.targets
    }
}

/// One morph target with absolute vertex data (base + delta, not deltas).
#[derive(Debug)]
pub struct MorphTarget {
    pub name: String,
    pub weight: f32,
    pub positions: Option<Vec<f32>>,
    pub normals: Option<Vec<f32>>,
    /// 4-component layout matching the mesh's tangent stream.
    pub tangents: Option<Vec<f32>>,
}

/// Renderable payload of a mesh node.
#[derive(Debug)]
pub struct MeshObject {
    pub geometry: Arc<GeometryData>,
    pub draw_mode: DrawMode,
    pub material: Option<MaterialHandle>,
    pub skeleton: Option<SkeletonHandle>,
    pub winding: Winding,
    pub morph: Option<MorphTargetManager>,
    /// Set when this mesh is a lightweight instance of another mesh node.
    pub instance_of: Option<NodeHandle>,
    /// Final bounds, filled in after the node graph joins.
    pub bounding: Option<BoundingBox>,
}

/// Camera payload.
#[derive(Debug, Clone)]
pub struct CameraObject {
    pub name: String,
    pub projection: CameraProjection,
    pub source_pointer: String,
}

/// Camera projection parameters.
#[derive(Debug, Clone)]
pub enum CameraProjection {
    Perspective {
        yfov: f32,
        aspect: Option<f32>,
        znear: f32,
        zfar: Option<f32>,
    },
    Orthographic {
        xmag: f32,
        ymag: f32,
        znear: f32,
        zfar: f32,
    },
}

/// A bone of a resolved skeleton.
#[derive(Debug)]
pub struct Bone {
    pub name: String,
    /// Index of the parent bone within the owning skeleton.
    pub parent: Option<usize>,
    /// Document node index of the joint.
    pub joint_node: usize,
    /// Local TRS-derived matrix of the joint node.
    pub base_matrix: Mat4,
    /// Local bind-pose matrix relative to the parent bone.
    pub bind_matrix: Mat4,
    pub inverse_bind_matrix: Mat4,
    /// Live transform node this bone follows, linked after the node graph
    /// has finished building.
    pub linked_node: Option<NodeHandle>,
}

/// A resolved skeleton shared by every node referencing the same skin.
#[derive(Debug)]
pub struct Skeleton {
    pub name: String,
    pub bones: Vec<Bone>,
    /// Document node index of the skeleton root, when one was found.
    pub root_node: Option<usize>,
    pub source_pointer: String,
}

impl Skeleton {
    /// Find the bone driven by a document node index.
    pub fn bone_for_node(&self, node_index: usize) -> Option<usize> {
        self.bones.iter().position(|b| b.joint_node == node_index)
    }
}

/// Keyframe interpolation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Step,
    Linear,
    CubicSpline,
}

/// A keyframe value; shape depends on the targeted property.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    Scalar(f32),
    Vector(Vec3),
    Quaternion(Quat),
}

/// One keyframe. Tangents are present only for cubic-spline curves and are
/// already scaled to per-frame units.
#[derive(Debug, Clone)]
pub struct Keyframe {
    pub frame: f32,
    pub value: KeyValue,
    pub in_tangent: Option<KeyValue>,
    pub out_tangent: Option<KeyValue>,
}

/// The concrete property an animation curve drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurveProperty {
    Translation,
    Rotation,
    Scale,
    /// Weight of one morph target.
    MorphWeight { target: usize },
}

/// One per-property animation curve.
#[derive(Debug)]
pub struct AnimationCurve {
    pub target: NodeHandle,
    pub property: CurveProperty,
    pub interpolation: Interpolation,
    pub keys: Vec<Keyframe>,
}

/// A named group of curves assembled from one glTF animation.
#[derive(Debug)]
pub struct AnimationGroup {
    pub name: String,
    pub curves: Vec<AnimationCurve>,
    pub source_pointer: String,
}

/// Alpha rendering mode of a material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaMode {
    Opaque,
    Mask,
    Blend,
}

/// Texture filtering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Linear,
}

/// Texture wrapping mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wrap {
    ClampToEdge,
    MirroredRepeat,
    Repeat,
}

/// Sampler parameters attached to a texture instance.
#[derive(Debug, Clone, Copy)]
pub struct SamplerSettings {
    pub mag_filter: Filter,
    pub min_filter: Filter,
    pub wrap_u: Wrap,
    pub wrap_v: Wrap,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            mag_filter: Filter::Linear,
            min_filter: Filter::Linear,
            wrap_u: Wrap::Repeat,
            wrap_v: Wrap::Repeat,
        }
    }
}

/// A resolved texture: raw content bytes plus sampler state.
///
/// Pixel decoding is the renderer's concern; the loader passes the encoded
/// bytes through.
#[derive(Debug, Clone)]
pub struct TextureInstance {
    pub name: String,
    /// Encoded image bytes (from a buffer view or URI), when resolvable.
    pub data: Option<ByteSlice>,
    pub sampler: SamplerSettings,
    /// Marked for normal/occlusion/metallic-roughness maps.
    pub non_color_data: bool,
    /// Whether the alpha channel is meaningful.
    pub has_alpha: bool,
    pub tex_coord: u32,
    pub source_pointer: String,
}

/// A renderer-agnostic material instance.
///
/// One glTF material can produce several instances, one per draw mode.
#[derive(Debug, Clone)]
pub struct MaterialInstance {
    pub name: String,
    pub draw_mode: DrawMode,
    /// `None` for the cached default materials.
    pub source_pointer: Option<String>,
    pub base_color_factor: [f32; 4],
    /// Material alpha, taken from the base color factor when no texture
    /// overrides it.
    pub alpha: f32,
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub emissive_factor: [f32; 3],
    pub alpha_mode: AlphaMode,
    pub alpha_cutoff: f32,
    pub double_sided: bool,
    pub back_face_culling: bool,
    pub two_sided_lighting: bool,
    pub normal_scale: f32,
    pub invert_normal_map_x: bool,
    pub invert_normal_map_y: bool,
    pub occlusion_strength: f32,
    pub use_alpha_from_base_color_texture: bool,
    pub base_color_texture: Option<TextureInstance>,
    pub metallic_roughness_texture: Option<TextureInstance>,
    pub normal_texture: Option<TextureInstance>,
    pub occlusion_texture: Option<TextureInstance>,
    pub emissive_texture: Option<TextureInstance>,
}

/// Everything a completed load hands back to the host.
#[derive(Debug)]
pub struct LoadedScene {
    /// The resolved node graph.
    pub graph: SceneGraph,
    /// Synthetic root handle.
    pub root: NodeHandle,
    /// Mesh nodes, scene root first.
    pub meshes: Vec<NodeHandle>,
    /// Transform-only nodes.
    pub transform_nodes: Vec<NodeHandle>,
    /// Camera nodes.
    pub cameras: Vec<NodeHandle>,
    /// All geometries built during the load.
    pub geometries: Vec<Arc<GeometryData>>,
    /// All skeletons, indexed by [`SkeletonHandle`].
    pub skeletons: Vec<Skeleton>,
    /// Assembled animation groups (empty groups already discarded).
    pub animation_groups: Vec<AnimationGroup>,
    /// All material instances, indexed by [`MaterialHandle`].
    pub materials: Vec<MaterialInstance>,
    /// Light definitions passed through from extensions.
    pub lights: Vec<serde_json::Value>,
}

/// Lifecycle notifications fired synchronously as objects are constructed.
///
/// All methods default to no-ops; implement only what you need.
pub trait LoaderObserver: Send + Sync + 'static {
    fn on_mesh_loaded(&self, _node: &SceneNode) {}
    fn on_material_loaded(&self, _material: &MaterialInstance) {}
    fn on_texture_loaded(&self, _texture: &TextureInstance) {}
    fn on_camera_loaded(&self, _camera: &CameraObject) {}
    fn on_skin_loaded(&self, _skeleton: &Skeleton) {}
    fn on_animation_group_loaded(&self, _group: &AnimationGroup) {}
    fn on_extension_loaded(&self, _name: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_parent_maintains_child_lists() {
        let mut graph = SceneGraph::new();
        let a = graph.add_node(SceneNode::transform("a"));
        let b = graph.add_node(SceneNode::transform("b"));
        let c = graph.add_node(SceneNode::transform("c"));

        graph.set_parent(b, Some(a));
        graph.set_parent(c, Some(a));
        assert_eq!(graph.node(a).children, vec![b, c]);

        graph.set_parent(c, Some(b));
        assert_eq!(graph.node(a).children, vec![b]);
        assert_eq!(graph.node(b).children, vec![c]);
        assert_eq!(graph.node(c).parent, Some(b));
    }

    #[test]
    fn draw_mode_codes() {
        assert_eq!(
            DrawMode::from_code("/m", None).unwrap(),
            DrawMode::Triangles
        );
        assert_eq!(DrawMode::from_code("/m", Some(0)).unwrap(), DrawMode::Points);
        assert!(DrawMode::from_code("/m", Some(9)).is_err());
    }

    #[test]
    fn compute_bounds_basic() {
        let bounds = compute_bounds(&[1.0, 0.0, 0.0, -1.0, 2.0, 0.5]).unwrap();
        assert_eq!(bounds.min, [-1.0, 0.0, 0.0]);
        assert_eq!(bounds.max, [1.0, 2.0, 0.5]);
        assert!(compute_bounds(&[]).is_none());
    }

    #[test]
    fn morph_manager_freeze_cycle() {
        let mut manager = MorphTargetManager::new();
        assert!(manager.is_frozen());
        manager.add_target(MorphTarget {
            name: "smile".into(),
            weight: 0.0,
            positions: None,
            normals: None,
            tangents: None,
        });
        manager.unfreeze();
        assert!(!manager.is_frozen());
        assert_eq!(manager.targets().len(), 1);
    }
}
