//! The loader entry point and per-load context.
//!
//! [`GltfLoader`] holds everything that outlives a single load (extension
//! registry, options, observer, disposed flag). Each `load_scene` call
//! builds one [`LoadContext`] owning the document, the resolution caches,
//! and the scene graph under construction; all resolver methods hang off
//! the context so every artifact is dropped together when the load ends.
//!
//! Within one load every buffer, buffer view, accessor, material, and skin
//! resolves at most once: concurrent requesters for the same key share the
//! in-flight future through [`CacheMap`].

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::try_join_all;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::accessor::TypedValues;
use crate::buffer::ByteSlice;
use crate::document::{indexed, pointer, Document};
use crate::error::{Error, Result};
use crate::extension::{Extension, ExtensionRegistry, Step};
use crate::io::{IoFuture, UriLoader};
use crate::math::Vec3;
use crate::node::NodeState;
use crate::scene::{
    DrawMode, GeometryData, LoadedScene, LoaderObserver, MaterialHandle, MaterialInstance,
    NodeHandle, NodeKind, SceneGraph, SceneNode, Skeleton, SkeletonHandle,
};

/// How the loaded scene is fitted into the host's coordinate convention.
///
/// glTF data is right-handed; a left-handed host either gets a fixup
/// transform on the synthetic root or keeps the data as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoordinateSystemMode {
    /// Apply a 180° Y rotation plus Z-mirror scale on the synthetic root.
    #[default]
    AutoRotate,
    /// Keep right-handed data untouched; the host renders right-handed.
    ForceRightHanded,
}

/// Tunable parameters of a load.
#[derive(Clone)]
pub struct LoaderOptions {
    /// Coordinate-convention fixup applied to the synthetic root.
    pub coordinate_system: CoordinateSystemMode,
    /// Frame rate keyframe times are converted to. Zero falls back to 60.
    pub target_fps: f32,
    /// Reuse geometry for identical primitives shared across nodes.
    pub create_instances: bool,
    /// Always scan vertices for bounds, ignoring declared accessor min/max.
    pub always_compute_bounds: bool,
    /// Collaborator resolving external (non-data) URIs.
    pub uri_loader: Option<Arc<dyn UriLoader>>,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl LoaderOptions {
    /// Options with the default frame rate and instancing enabled.
    pub fn new() -> Self {
        Self {
            coordinate_system: CoordinateSystemMode::AutoRotate,
            target_fps: 60.0,
            create_instances: true,
            always_compute_bounds: false,
            uri_loader: None,
        }
    }

    #[must_use]
    pub fn with_coordinate_system(mut self, mode: CoordinateSystemMode) -> Self {
        self.coordinate_system = mode;
        self
    }

    #[must_use]
    pub fn with_target_fps(mut self, fps: f32) -> Self {
        self.target_fps = fps;
        self
    }

    #[must_use]
    pub fn with_create_instances(mut self, enabled: bool) -> Self {
        self.create_instances = enabled;
        self
    }

    #[must_use]
    pub fn with_always_compute_bounds(mut self, enabled: bool) -> Self {
        self.always_compute_bounds = enabled;
        self
    }

    #[must_use]
    pub fn with_uri_loader(mut self, loader: Arc<dyn UriLoader>) -> Self {
        self.uri_loader = Some(loader);
        self
    }
}

/// Write-once cache with request coalescing.
///
/// The first requester of a key runs the init future; concurrent requesters
/// for the same key await the same in-flight cell instead of duplicating
/// work. Values are never invalidated within a load.
pub(crate) struct CacheMap<K, V> {
    entries: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
}

impl<K, V> Default for CacheMap<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash, V: Clone> CacheMap<K, V> {
    pub(crate) async fn get_or_try_init<F, Fut>(&self, key: K, init: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V>>,
    {
        let cell = {
            let mut entries = self.entries.lock();
            Arc::clone(entries.entry(key).or_default())
        };
        let value = cell.get_or_try_init(init).await?;
        Ok(value.clone())
    }
}

/// Action queued during resolution and run once after the whole node graph
/// has joined.
pub(crate) type DeferredAction = Box<dyn FnOnce(&LoadContext) + Send>;

/// Everything owned by one load operation.
///
/// Extension hooks receive the context by `Arc` and can re-enter any
/// resolver on it; the per-element caches guarantee each document element
/// still resolves only once.
pub struct LoadContext {
    pub(crate) doc: Document,
    pub(crate) bin: Option<Arc<Vec<u8>>>,
    pub(crate) options: LoaderOptions,
    pub(crate) observer: Option<Arc<dyn LoaderObserver>>,
    pub(crate) disposed: Arc<AtomicBool>,
    pub(crate) extensions: Vec<Box<dyn Extension>>,
    /// (pointer, step) pairs currently claimed by an extension override.
    pub(crate) in_progress: Mutex<HashSet<(String, Step)>>,
    /// Document-level parent of each node; `None` is the graph root.
    pub(crate) node_parents: Vec<Option<usize>>,
    pub(crate) root: NodeHandle,
    pub(crate) graph: Mutex<SceneGraph>,
    /// Document node index → live transform handle.
    pub(crate) node_handles: Mutex<HashMap<usize, NodeHandle>>,
    pub(crate) node_states: Mutex<HashMap<usize, NodeState>>,
    pub(crate) deferred: Mutex<Vec<DeferredAction>>,
    pub(crate) buffers: CacheMap<usize, ByteSlice>,
    pub(crate) buffer_views: CacheMap<usize, ByteSlice>,
    pub(crate) float_accessors: CacheMap<usize, Arc<Vec<f32>>>,
    pub(crate) index_accessors: CacheMap<usize, Arc<Vec<u32>>>,
    pub(crate) typed_accessors: CacheMap<usize, Arc<TypedValues>>,
    pub(crate) skins: CacheMap<usize, SkeletonHandle>,
    pub(crate) materials: CacheMap<(usize, DrawMode), MaterialHandle>,
    pub(crate) default_materials: Mutex<HashMap<DrawMode, MaterialHandle>>,
    pub(crate) material_instances: Mutex<Vec<MaterialInstance>>,
    pub(crate) skeletons: Mutex<Vec<Skeleton>>,
    pub(crate) geometries: Mutex<Vec<Arc<GeometryData>>>,
    /// (mesh index, primitive position) → the first node built from the
    /// primitive, reused as the instancing source.
    pub(crate) primitive_sources: CacheMap<(usize, usize), NodeHandle>,
    pub(crate) lights: Mutex<Vec<serde_json::Value>>,
}

impl LoadContext {
    /// The parsed document being resolved.
    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// The options of this load.
    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    /// Handle of the synthetic root node.
    pub fn root(&self) -> NodeHandle {
        self.root
    }

    /// Record a light definition passed through by an extension.
    pub fn add_light(&self, light: serde_json::Value) {
        self.lights.lock().push(light);
    }

    /// Whether the target coordinate system is right-handed.
    pub fn right_handed(&self) -> bool {
        self.options.coordinate_system == CoordinateSystemMode::ForceRightHanded
    }

    /// Fire a lifecycle notification unless the loader was disposed.
    pub(crate) fn notify(&self, f: impl FnOnce(&dyn LoaderObserver)) {
        if self.disposed.load(Ordering::Relaxed) {
            return;
        }
        if let Some(observer) = &self.observer {
            f(observer.as_ref());
        }
    }

    /// Queue an action to run after the node graph joins.
    pub(crate) fn defer(&self, action: DeferredAction) {
        self.deferred.lock().push(action);
    }

    pub(crate) fn push_material(&self, instance: MaterialInstance) -> MaterialHandle {
        let mut materials = self.material_instances.lock();
        let handle = MaterialHandle(materials.len());
        materials.push(instance);
        handle
    }

    /// Offer a resolution step to the extensions in priority order.
    ///
    /// Returns `None` when no extension claims it (or when the same
    /// (pointer, step) pair is already being handled further up the stack,
    /// so nested re-entry falls through to default behavior).
    pub(crate) async fn dispatch<T>(
        self: &Arc<Self>,
        pointer: &str,
        step: Step,
        offer: impl Fn(&dyn Extension) -> Option<IoFuture<T>>,
    ) -> Option<Result<T>> {
        if self.extensions.is_empty() {
            return None;
        }
        let key = (pointer.to_string(), step);
        {
            let mut in_progress = self.in_progress.lock();
            if in_progress.contains(&key) {
                return None;
            }
            in_progress.insert(key.clone());
        }

        let mut claimed = None;
        for extension in &self.extensions {
            if !extension.enabled() {
                continue;
            }
            if let Some(future) = offer(extension.as_ref()) {
                claimed = Some(future);
                break;
            }
        }
        let result = match claimed {
            Some(future) => Some(future.await),
            None => None,
        };

        self.in_progress.lock().remove(&key);
        result
    }

    /// Synchronous variant of [`dispatch`](Self::dispatch) for steps whose
    /// hooks return a value directly.
    pub(crate) fn dispatch_sync<T>(
        self: &Arc<Self>,
        pointer: &str,
        step: Step,
        offer: impl Fn(&dyn Extension) -> Option<T>,
    ) -> Option<T> {
        if self.extensions.is_empty() {
            return None;
        }
        let key = (pointer.to_string(), step);
        {
            let mut in_progress = self.in_progress.lock();
            if in_progress.contains(&key) {
                return None;
            }
            in_progress.insert(key.clone());
        }

        let mut claimed = None;
        for extension in &self.extensions {
            if !extension.enabled() {
                continue;
            }
            if let Some(value) = offer(extension.as_ref()) {
                claimed = Some(value);
                break;
            }
        }

        self.in_progress.lock().remove(&key);
        claimed
    }

    /// Resolve one scene definition: fan out its root nodes under the
    /// synthetic root.
    pub(crate) async fn load_scene_def(self: &Arc<Self>, scene_index: u32) -> Result<()> {
        let scene = indexed("/scene", &self.doc.scenes, Some(scene_index))?;
        let ptr = pointer("scenes", scene.index);

        if let Some(result) = self
            .dispatch(&ptr, Step::Scene, |ext| ext.load_scene(self, &ptr, scene))
            .await
        {
            return result;
        }

        try_join_all(scene.nodes.iter().enumerate().map(|(i, &node)| {
            self.load_node(format!("{ptr}/nodes/{i}"), node, self.root)
        }))
        .await?;
        Ok(())
    }
}

/// Loads scenes out of parsed glTF documents.
pub struct GltfLoader {
    registry: ExtensionRegistry,
    options: LoaderOptions,
    observer: Option<Arc<dyn LoaderObserver>>,
    disposed: Arc<AtomicBool>,
}

impl GltfLoader {
    /// Create a loader with default options and the given extensions.
    pub fn new(registry: ExtensionRegistry) -> Self {
        Self {
            registry,
            options: LoaderOptions::new(),
            observer: None,
            disposed: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: LoaderOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn LoaderObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Stop honoring lifecycle callbacks; in-flight loads finish as no-ops
    /// and reject instead of handing back a half-built scene.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Relaxed);
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Relaxed)
    }

    /// Load the document's default scene (scene 0 when none is declared).
    pub async fn load_default_scene(
        &self,
        document: Document,
        bin: Option<Vec<u8>>,
    ) -> Result<LoadedScene> {
        let scene = document.scene.unwrap_or(0);
        self.load_scene(document, bin, scene).await
    }

    /// Load one scene of the document into a fully linked scene graph.
    pub async fn load_scene(
        &self,
        mut document: Document,
        bin: Option<Vec<u8>>,
        scene_index: u32,
    ) -> Result<LoadedScene> {
        document.assign_indices();

        let extensions = self.registry.instantiate();
        for required in &document.extensions_required {
            let available = extensions
                .iter()
                .any(|e| e.name() == required && e.enabled());
            if !available {
                return Err(Error::RequiredExtension(required.clone()));
            }
        }

        document.validate_bin_chunk(bin.as_deref());

        let mut node_parents = vec![None; document.nodes.len()];
        for node in &document.nodes {
            for &child in &node.children {
                if let Some(slot) = node_parents.get_mut(child as usize) {
                    *slot = Some(node.index);
                }
            }
        }

        // the root stays disabled until the whole scene has finished loading
        let mut graph = SceneGraph::new();
        let mut root_node = SceneNode::transform("__root__");
        root_node.enabled = false;
        if self.options.coordinate_system == CoordinateSystemMode::AutoRotate {
            root_node.rotation = crate::math::quat_from_xyzw([0.0, 1.0, 0.0, 0.0]);
            root_node.scale = Vec3::new(1.0, 1.0, -1.0);
        }
        let root = graph.add_node(root_node);

        let mut options = self.options.clone();
        if options.target_fps <= 0.0 {
            options.target_fps = 60.0;
        }

        let ctx = Arc::new(LoadContext {
            doc: document,
            bin: bin.map(Arc::new),
            options,
            observer: self.observer.clone(),
            disposed: Arc::clone(&self.disposed),
            extensions,
            in_progress: Mutex::new(HashSet::new()),
            node_parents,
            root,
            graph: Mutex::new(graph),
            node_handles: Mutex::new(HashMap::new()),
            node_states: Mutex::new(HashMap::new()),
            deferred: Mutex::new(Vec::new()),
            buffers: CacheMap::default(),
            buffer_views: CacheMap::default(),
            float_accessors: CacheMap::default(),
            index_accessors: CacheMap::default(),
            typed_accessors: CacheMap::default(),
            skins: CacheMap::default(),
            materials: CacheMap::default(),
            default_materials: Mutex::new(HashMap::new()),
            material_instances: Mutex::new(Vec::new()),
            skeletons: Mutex::new(Vec::new()),
            geometries: Mutex::new(Vec::new()),
            primitive_sources: CacheMap::default(),
            lights: Mutex::new(Vec::new()),
        });

        for extension in &ctx.extensions {
            if extension.enabled() {
                let name = extension.name().to_string();
                ctx.notify(|o| o.on_extension_loaded(&name));
            }
        }

        ctx.load_scene_def(scene_index).await?;

        // deferred actions run strictly after the node graph's join,
        // drained exactly once
        let actions: Vec<DeferredAction> = std::mem::take(&mut *ctx.deferred.lock());
        for action in actions {
            action(&ctx);
        }

        let groups =
            try_join_all(ctx.doc.animations.iter().map(|a| ctx.load_animation(a))).await?;
        let animation_groups = groups.into_iter().flatten().collect();

        if self.is_disposed() {
            return Err(Error::Disposed);
        }

        ctx.graph.lock().node_mut(root).enabled = true;
        Ok(Self::finish(&ctx, animation_groups))
    }

    /// Assemble the result bundle out of the finished context.
    fn finish(
        ctx: &Arc<LoadContext>,
        animation_groups: Vec<crate::scene::AnimationGroup>,
    ) -> LoadedScene {
        let graph = std::mem::take(&mut *ctx.graph.lock());

        let mut meshes = vec![ctx.root];
        let mut transform_nodes = Vec::new();
        let mut cameras = Vec::new();
        for handle in graph.handles() {
            match graph.node(handle).kind {
                NodeKind::Mesh(_) => meshes.push(handle),
                NodeKind::Camera(_) => cameras.push(handle),
                NodeKind::Transform => {
                    if handle != ctx.root {
                        transform_nodes.push(handle);
                    }
                }
            }
        }

        LoadedScene {
            graph,
            root: ctx.root,
            meshes,
            transform_nodes,
            cameras,
            geometries: std::mem::take(&mut *ctx.geometries.lock()),
            skeletons: std::mem::take(&mut *ctx.skeletons.lock()),
            animation_groups,
            materials: std::mem::take(&mut *ctx.material_instances.lock()),
            lights: std::mem::take(&mut *ctx.lights.lock()),
        }
    }
}
