//! Extension plugin registry and override protocol.
//!
//! Extensions are registered by name in an [`ExtensionRegistry`] that is
//! passed into loader construction (no global state). Each load instantiates
//! one [`Extension`] per registered factory, sorts the instances ascending by
//! their optional `order` (unordered sorts last), and offers every resolution
//! step to them in that order. The first extension returning `Some` claims
//! the step and no further extension or default logic runs for it.
//!
//! A per-(pointer, step) in-progress set guards against re-entrant dispatch:
//! when an extension's override internally re-triggers the same step on the
//! same property, the nested call falls through to default behavior instead
//! of re-entering extension dispatch.

use std::sync::Arc;

use crate::buffer::ByteSlice;
use crate::document::{
    Animation, Buffer, BufferView, Camera, Channel, Material, Node, Primitive, SceneDef, Skin,
    Texture, TextureInfo,
};
use crate::io::IoFuture;
use crate::loader::LoadContext;
use crate::scene::{
    AnimationCurve, AnimationGroup, CameraObject, DrawMode, GeometryData, MaterialHandle,
    MaterialInstance, NodeHandle, SkeletonHandle, TextureInstance,
};

/// A resolution step an extension can claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Scene,
    Node,
    Camera,
    VertexData,
    MeshPrimitive,
    Material,
    MaterialProperties,
    CreateMaterial,
    TextureInfo,
    Texture,
    Animation,
    AnimationChannel,
    Skin,
    Uri,
    BufferView,
    Buffer,
}

/// Produces one extension instance per load.
pub trait ExtensionFactory: Send + Sync + 'static {
    /// The extension's registered name (matched against
    /// `extensionsRequired`).
    fn name(&self) -> &str;

    /// Instantiate the extension for one load.
    fn create(&self) -> Box<dyn Extension>;
}

/// An extension instance, live for the duration of one load.
///
/// Every hook defaults to `None` (do not claim); an implementation overrides
/// only the steps it wants to intercept. Hooks receive the load context by
/// `Arc` so returned futures can own a clone of it.
#[allow(unused_variables)]
pub trait Extension: Send + Sync + 'static {
    /// The extension's name.
    fn name(&self) -> &str;

    /// Disabled extensions are skipped entirely.
    fn enabled(&self) -> bool {
        true
    }

    /// Dispatch priority; `None` sorts after every explicit order.
    fn order(&self) -> Option<i32> {
        None
    }

    fn load_scene(
        &self,
        ctx: &Arc<LoadContext>,
        pointer: &str,
        scene: &SceneDef,
    ) -> Option<IoFuture<()>> {
        None
    }

    fn load_node(
        &self,
        ctx: &Arc<LoadContext>,
        pointer: &str,
        node: &Node,
    ) -> Option<IoFuture<NodeHandle>> {
        None
    }

    fn load_camera(
        &self,
        ctx: &Arc<LoadContext>,
        pointer: &str,
        camera: &Camera,
    ) -> Option<IoFuture<CameraObject>> {
        None
    }

    fn load_vertex_data(
        &self,
        ctx: &Arc<LoadContext>,
        pointer: &str,
        primitive: &Primitive,
    ) -> Option<IoFuture<Arc<GeometryData>>> {
        None
    }

    fn load_mesh_primitive(
        &self,
        ctx: &Arc<LoadContext>,
        pointer: &str,
        primitive: &Primitive,
    ) -> Option<IoFuture<NodeHandle>> {
        None
    }

    fn load_material(
        &self,
        ctx: &Arc<LoadContext>,
        pointer: &str,
        material: &Material,
        draw_mode: DrawMode,
    ) -> Option<IoFuture<MaterialHandle>> {
        None
    }

    /// Material creation: replace the blank instance a material starts from.
    fn create_material(
        &self,
        ctx: &Arc<LoadContext>,
        pointer: &str,
        material: &Material,
        draw_mode: DrawMode,
    ) -> Option<MaterialInstance> {
        None
    }

    fn load_material_properties(
        &self,
        ctx: &Arc<LoadContext>,
        pointer: &str,
        material: &Material,
        instance: MaterialInstance,
    ) -> Option<IoFuture<MaterialInstance>> {
        None
    }

    fn load_texture_info(
        &self,
        ctx: &Arc<LoadContext>,
        pointer: &str,
        info: &TextureInfo,
    ) -> Option<IoFuture<TextureInstance>> {
        None
    }

    fn load_texture(
        &self,
        ctx: &Arc<LoadContext>,
        pointer: &str,
        texture: &Texture,
    ) -> Option<IoFuture<TextureInstance>> {
        None
    }

    fn load_animation(
        &self,
        ctx: &Arc<LoadContext>,
        pointer: &str,
        animation: &Animation,
    ) -> Option<IoFuture<Option<AnimationGroup>>> {
        None
    }

    fn load_animation_channel(
        &self,
        ctx: &Arc<LoadContext>,
        pointer: &str,
        animation: &Animation,
        channel: &Channel,
    ) -> Option<IoFuture<Vec<AnimationCurve>>> {
        None
    }

    fn load_skin(
        &self,
        ctx: &Arc<LoadContext>,
        pointer: &str,
        skin: &Skin,
    ) -> Option<IoFuture<SkeletonHandle>> {
        None
    }

    fn load_uri(
        &self,
        ctx: &Arc<LoadContext>,
        pointer: &str,
        uri: &str,
    ) -> Option<IoFuture<Vec<u8>>> {
        None
    }

    fn load_buffer_view(
        &self,
        ctx: &Arc<LoadContext>,
        pointer: &str,
        view: &BufferView,
    ) -> Option<IoFuture<ByteSlice>> {
        None
    }

    fn load_buffer(
        &self,
        ctx: &Arc<LoadContext>,
        pointer: &str,
        buffer: &Buffer,
    ) -> Option<IoFuture<ByteSlice>> {
        None
    }
}

/// Named extension factories, handed to the loader at construction.
#[derive(Default)]
pub struct ExtensionRegistry {
    factories: Vec<Box<dyn ExtensionFactory>>,
}

impl ExtensionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. Later registrations with the same name shadow
    /// earlier ones.
    pub fn register(&mut self, factory: Box<dyn ExtensionFactory>) {
        self.factories.retain(|f| f.name() != factory.name());
        self.factories.push(factory);
    }

    /// Whether a factory with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.iter().any(|f| f.name() == name)
    }

    /// Instantiate one extension per factory, sorted ascending by `order`
    /// (unordered instances last, registration order preserved otherwise).
    pub(crate) fn instantiate(&self) -> Vec<Box<dyn Extension>> {
        let mut instances: Vec<Box<dyn Extension>> =
            self.factories.iter().map(|f| f.create()).collect();
        instances.sort_by_key(|e| match e.order() {
            Some(order) => (false, order),
            None => (true, 0),
        });
        instances
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain {
        name: &'static str,
        order: Option<i32>,
    }

    impl Extension for Plain {
        fn name(&self) -> &str {
            self.name
        }
        fn order(&self) -> Option<i32> {
            self.order
        }
    }

    struct PlainFactory {
        name: &'static str,
        order: Option<i32>,
    }

    impl ExtensionFactory for PlainFactory {
        fn name(&self) -> &str {
            self.name
        }
        fn create(&self) -> Box<dyn Extension> {
            Box::new(Plain {
                name: self.name,
                order: self.order,
            })
        }
    }

    #[test]
    fn instances_sorted_by_order_with_unordered_last() {
        let mut registry = ExtensionRegistry::new();
        registry.register(Box::new(PlainFactory {
            name: "unordered",
            order: None,
        }));
        registry.register(Box::new(PlainFactory {
            name: "late",
            order: Some(10),
        }));
        registry.register(Box::new(PlainFactory {
            name: "early",
            order: Some(-5),
        }));

        let instances = registry.instantiate();
        let names: Vec<&str> = instances.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["early", "late", "unordered"]);
    }

    #[test]
    fn reregistration_shadows() {
        let mut registry = ExtensionRegistry::new();
        registry.register(Box::new(PlainFactory {
            name: "ext",
            order: Some(1),
        }));
        registry.register(Box::new(PlainFactory {
            name: "ext",
            order: Some(2),
        }));
        let instances = registry.instantiate();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].order(), Some(2));
    }
}
