//! Node graph construction.
//!
//! Nodes resolve recursively from the scene roots. A per-node state machine
//! (`Unvisited → Instantiated → ChildrenResolved`) rejects re-entrant
//! instantiation, which is how cyclic child references are caught. Camera,
//! children, and mesh resolution fan out concurrently per node; skinned
//! meshes get their final parent only from a deferred action after the whole
//! graph has joined.

use std::sync::Arc;

use futures_util::future::try_join_all;

use crate::document::{indexed, pointer, Node};
use crate::error::{Error, Result};
use crate::extension::Step;
use crate::io::IoFuture;
use crate::loader::LoadContext;
use crate::math::{
    decompose_trs, mat4_from_column_slice, mat4_from_scale_rotation_translation, quat_from_xyzw,
    Mat4, Quat, Vec3,
};
use crate::scene::{
    compute_bounds, CameraObject, CameraProjection, NodeHandle, NodeKind, SceneNode,
    SkeletonHandle,
};

/// Resolution state of a document node within one load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeState {
    Instantiated,
    ChildrenResolved,
}

/// A node's local translation/rotation/scale, decomposing `matrix` when the
/// document carries one.
pub(crate) fn node_trs(node: &Node) -> (Vec3, Quat, Vec3) {
    if let Some(matrix) = node.matrix {
        return decompose_trs(&mat4_from_column_slice(&matrix));
    }
    let translation = node.translation.map(Vec3::from).unwrap_or_else(Vec3::zeros);
    let rotation = node
        .rotation
        .map(quat_from_xyzw)
        .unwrap_or_else(|| Quat::new(1.0, 0.0, 0.0, 0.0));
    let scale = node
        .scale
        .map(Vec3::from)
        .unwrap_or_else(|| Vec3::new(1.0, 1.0, 1.0));
    (translation, rotation, scale)
}

/// A node's local transform matrix.
pub(crate) fn node_local_matrix(node: &Node) -> Mat4 {
    if let Some(matrix) = node.matrix {
        return mat4_from_column_slice(&matrix);
    }
    let (t, r, s) = node_trs(node);
    mat4_from_scale_rotation_translation(s, r, t)
}

impl LoadContext {
    /// Resolve a document node into a live transform, recursively resolving
    /// its camera, children, and mesh. Returns the node's transform handle.
    pub fn load_node(
        self: &Arc<Self>,
        context: String,
        node_index: u32,
        parent: NodeHandle,
    ) -> IoFuture<NodeHandle> {
        let ctx = Arc::clone(self);
        Box::pin(async move { ctx.load_node_inner(&context, node_index, parent).await })
    }

    async fn load_node_inner(
        self: &Arc<Self>,
        context: &str,
        node_index: u32,
        parent: NodeHandle,
    ) -> Result<NodeHandle> {
        let node = indexed(context, &self.doc.nodes, Some(node_index))?;
        let ptr = pointer("nodes", node.index);

        if let Some(result) = self
            .dispatch(&ptr, Step::Node, |ext| ext.load_node(self, &ptr, node))
            .await
        {
            return result;
        }

        {
            let mut states = self.node_states.lock();
            if states.contains_key(&node.index) {
                return Err(Error::Cycle {
                    context: ptr.clone(),
                });
            }
            states.insert(node.index, NodeState::Instantiated);
        }

        let mut scene_node = SceneNode::transform(
            node.name
                .clone()
                .unwrap_or_else(|| format!("node{}", node.index)),
        );
        // a skinned node's placement comes from skin resolution, not its TRS
        if node.skin.is_none() {
            let (t, r, s) = node_trs(node);
            scene_node.translation = t;
            scene_node.rotation = r;
            scene_node.scale = s;
        }
        scene_node.source_pointers.push(ptr.clone());

        let handle = {
            let mut graph = self.graph.lock();
            let handle = graph.add_node(scene_node);
            graph.set_parent(handle, Some(parent));
            handle
        };
        self.node_handles.lock().insert(node.index, handle);

        let camera_fut = async {
            if node.camera.is_some() {
                let camera = self.load_camera(&format!("{ptr}/camera"), node.camera).await?;
                let mut graph = self.graph.lock();
                let mut camera_node = SceneNode::transform(camera.name.clone());
                camera_node.source_pointers.push(camera.source_pointer.clone());
                camera_node.kind = NodeKind::Camera(camera);
                let child = graph.add_node(camera_node);
                graph.set_parent(child, Some(handle));
            }
            Ok::<_, Error>(())
        };
        let children_fut = try_join_all(node.children.iter().enumerate().map(|(i, &child)| {
            self.load_node(format!("{ptr}/children/{i}"), child, handle)
        }));
        let mesh_fut = self.load_node_mesh(&ptr, node, handle);

        let (_, _, mesh_handles) = tokio::try_join!(camera_fut, children_fut, mesh_fut)?;

        {
            let mut graph = self.graph.lock();
            for &mesh in &mesh_handles {
                if let Some(object) = graph.node_mut(mesh).mesh_mut() {
                    object.bounding = if object.geometry.bounds_authoritative {
                        object.geometry.declared_bounds
                    } else {
                        object
                            .geometry
                            .positions
                            .as_deref()
                            .and_then(|p| compute_bounds(p))
                    };
                }
            }
        }

        self.node_states
            .lock()
            .insert(node.index, NodeState::ChildrenResolved);
        Ok(handle)
    }

    /// Resolve a node's mesh (and skin, when present) under its transform.
    async fn load_node_mesh(
        self: &Arc<Self>,
        ptr: &str,
        node: &Node,
        handle: NodeHandle,
    ) -> Result<Vec<NodeHandle>> {
        if node.mesh.is_none() {
            return Ok(Vec::new());
        }
        let mesh_context = format!("{ptr}/mesh");
        if node.skin.is_none() {
            // single-primitive meshes merge into the node's own transform
            return self.load_mesh(&mesh_context, node, handle, Some(handle)).await;
        }

        let skin_ptr = format!("{ptr}/skin");
        let (mesh_handles, skeleton) = tokio::try_join!(
            self.load_mesh(&mesh_context, node, handle, None),
            self.load_skin(&skin_ptr, node.skin),
        )?;

        {
            let mut graph = self.graph.lock();
            for &mesh in &mesh_handles {
                let mesh_node = graph.node_mut(mesh);
                // the skin-carrier's origin tags the shared mesh as well
                mesh_node.source_pointers.push(ptr.to_string());
                if let Some(object) = mesh_node.mesh_mut() {
                    object.skeleton = Some(skeleton);
                }
            }
        }

        let declared = indexed(&skin_ptr, &self.doc.skins, node.skin)?.skeleton;
        let node_index = node.index;
        let meshes = mesh_handles.clone();
        self.defer(Box::new(move |ctx| {
            ctx.reparent_skinned_meshes(handle, node_index, declared, skeleton, &meshes);
        }));

        Ok(mesh_handles)
    }

    /// Final parent of a skinned mesh, applied after the whole node graph
    /// has been built.
    fn reparent_skinned_meshes(
        &self,
        carrier: NodeHandle,
        carrier_node_index: usize,
        declared_skeleton: Option<u32>,
        skeleton: SkeletonHandle,
        meshes: &[NodeHandle],
    ) {
        let target = match declared_skeleton {
            Some(declared) => {
                let declared = declared as usize;
                if self.node_parents.get(declared).copied().flatten() == Some(carrier_node_index)
                {
                    // the carrier owns the declared root: keep its own parent
                    self.graph.lock().node(carrier).parent.unwrap_or(self.root)
                } else {
                    let root = self.skeletons.lock()[skeleton.0].root_node;
                    match root.and_then(|r| self.node_handles.lock().get(&r).copied()) {
                        Some(root_handle) => self
                            .graph
                            .lock()
                            .node(root_handle)
                            .parent
                            .unwrap_or(self.root),
                        None => self.root,
                    }
                }
            }
            None => self.root,
        };

        let mut graph = self.graph.lock();
        for &mesh in meshes {
            graph.set_parent(mesh, Some(target));
        }
    }

    /// Resolve a camera reference into its projection parameters.
    pub async fn load_camera(
        self: &Arc<Self>,
        context: &str,
        camera_index: Option<u32>,
    ) -> Result<CameraObject> {
        let camera = indexed(context, &self.doc.cameras, camera_index)?;
        let ptr = pointer("cameras", camera.index);

        if let Some(result) = self
            .dispatch(&ptr, Step::Camera, |ext| ext.load_camera(self, &ptr, camera))
            .await
        {
            return result;
        }

        let projection = match camera.camera_type.as_str() {
            "perspective" => {
                let p = camera.perspective.as_ref().ok_or_else(|| {
                    Error::Structural(format!("{ptr}: missing perspective properties"))
                })?;
                CameraProjection::Perspective {
                    yfov: p.yfov,
                    aspect: p.aspect_ratio,
                    znear: p.znear,
                    zfar: p.zfar,
                }
            }
            "orthographic" => {
                let o = camera.orthographic.as_ref().ok_or_else(|| {
                    Error::Structural(format!("{ptr}: missing orthographic properties"))
                })?;
                CameraProjection::Orthographic {
                    xmag: o.xmag,
                    ymag: o.ymag,
                    znear: o.znear,
                    zfar: o.zfar,
                }
            }
            other => return Err(Error::value(&format!("{ptr}/type"), other)),
        };

        let object = CameraObject {
            name: camera
                .name
                .clone()
                .unwrap_or_else(|| format!("camera{}", camera.index)),
            projection,
            source_pointer: ptr,
        };
        self.notify(|o| o.on_camera_loaded(&object));
        Ok(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Node;

    #[test]
    fn trs_from_individual_fields() {
        let node = Node {
            translation: Some([1.0, 2.0, 3.0]),
            scale: Some([2.0, 2.0, 2.0]),
            ..Default::default()
        };
        let (t, r, s) = node_trs(&node);
        assert_eq!(t, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(s, Vec3::new(2.0, 2.0, 2.0));
        assert_eq!(r, Quat::new(1.0, 0.0, 0.0, 0.0));
    }

    #[test]
    fn trs_from_matrix_decomposition() {
        let node = Node {
            matrix: Some([
                2.0, 0.0, 0.0, 0.0, //
                0.0, 2.0, 0.0, 0.0, //
                0.0, 0.0, 2.0, 0.0, //
                5.0, 6.0, 7.0, 1.0,
            ]),
            ..Default::default()
        };
        let (t, _, s) = node_trs(&node);
        assert_eq!(t, Vec3::new(5.0, 6.0, 7.0));
        assert!((s - Vec3::new(2.0, 2.0, 2.0)).norm() < 1e-5);
    }
}
