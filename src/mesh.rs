//! Mesh primitive assembly.
//!
//! Each primitive becomes one mesh node. Primitives shared unmodified across
//! nodes (same mesh index, instancing enabled, no skin, no morph targets)
//! are built once; later references get a lightweight instance of the source
//! node sharing its geometry.

use std::sync::Arc;

use futures_util::future::try_join_all;

use crate::document::{indexed, pointer, Mesh, Node, Primitive};
use crate::error::{Error, Result};
use crate::extension::Step;
use crate::loader::LoadContext;
use crate::scene::{
    DrawMode, GeometryData, MeshObject, MorphTarget, MorphTargetManager, NodeHandle, NodeKind,
    SceneNode, Winding,
};

impl LoadContext {
    /// Build every primitive of a node's mesh.
    ///
    /// A single-primitive mesh merges into `host` (the node's own transform
    /// becomes the mesh node) when one is given; otherwise primitives become
    /// children of `parent`. Skinned nodes pass no host so their meshes stay
    /// separate from the skin-carrier transform.
    pub(crate) async fn load_mesh(
        self: &Arc<Self>,
        context: &str,
        node: &Node,
        parent: NodeHandle,
        host: Option<NodeHandle>,
    ) -> Result<Vec<NodeHandle>> {
        let mesh = indexed(context, &self.doc.meshes, node.mesh)?;
        let ptr = pointer("meshes", mesh.index);
        if mesh.primitives.is_empty() {
            return Err(Error::Structural(format!(
                "{ptr}: mesh has no primitives"
            )));
        }

        // all primitives of a mesh must agree on morph target count
        let target_count = mesh.primitives[0].targets.len();
        if mesh
            .primitives
            .iter()
            .any(|p| p.targets.len() != target_count)
        {
            return Err(Error::Structural(format!(
                "{ptr}: primitives disagree on morph target count"
            )));
        }

        let merge_into = if mesh.primitives.len() == 1 { host } else { None };
        let handles = try_join_all(mesh.primitives.iter().enumerate().map(|(i, primitive)| {
            let ptr = format!("{ptr}/primitives/{i}");
            async move {
                self.load_primitive(&ptr, mesh, i, primitive, node, parent, merge_into)
                    .await
            }
        }))
        .await?;

        // morph managers stay frozen until every target of every primitive
        // has loaded
        let mut graph = self.graph.lock();
        for &handle in &handles {
            if let Some(morph) = graph
                .node_mut(handle)
                .mesh_mut()
                .and_then(|m| m.morph.as_mut())
            {
                morph.unfreeze();
            }
        }

        Ok(handles)
    }

    #[allow(clippy::too_many_arguments)]
    async fn load_primitive(
        self: &Arc<Self>,
        ptr: &str,
        mesh: &Mesh,
        position: usize,
        primitive: &Primitive,
        node: &Node,
        parent: NodeHandle,
        merge_into: Option<NodeHandle>,
    ) -> Result<NodeHandle> {
        if let Some(result) = self
            .dispatch(ptr, Step::MeshPrimitive, |ext| {
                ext.load_mesh_primitive(self, ptr, primitive)
            })
            .await
        {
            return result;
        }

        let instanceable = self.options.create_instances
            && node.skin.is_none()
            && primitive.targets.is_empty();
        if instanceable {
            // first requester builds the source; everyone else (including
            // concurrent requesters) instantiates it
            let mut built_here = false;
            let source = self
                .primitive_sources
                .get_or_try_init((mesh.index, position), || async {
                    built_here = true;
                    self.build_primitive(ptr, mesh, position, primitive, node, parent, merge_into)
                        .await
                })
                .await?;
            if built_here {
                return Ok(source);
            }
            return Ok(self.instantiate_primitive(ptr, source, parent, merge_into));
        }

        self.build_primitive(ptr, mesh, position, primitive, node, parent, merge_into)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn build_primitive(
        self: &Arc<Self>,
        ptr: &str,
        mesh: &Mesh,
        position: usize,
        primitive: &Primitive,
        node: &Node,
        parent: NodeHandle,
        merge_into: Option<NodeHandle>,
    ) -> Result<NodeHandle> {
        let draw_mode = DrawMode::from_code(&format!("{ptr}/mode"), primitive.mode)?;
        let winding = if self.right_handed() {
            Winding::CounterClockwise
        } else {
            Winding::Clockwise
        };

        let geometry = self.load_vertex_data(ptr, primitive).await?;
        let material_ptr = format!("{ptr}/material");
        let (material, morph) = tokio::try_join!(
            self.load_material(&material_ptr, primitive.material, draw_mode),
            self.build_morph_targets(ptr, mesh, node, primitive, &geometry),
        )?;

        let base_name = mesh
            .name
            .clone()
            .unwrap_or_else(|| format!("mesh{}", mesh.index));
        let name = if mesh.primitives.len() > 1 {
            format!("{base_name}_primitive{position}")
        } else {
            base_name
        };

        let object = MeshObject {
            geometry,
            draw_mode,
            material: Some(material),
            skeleton: None,
            winding,
            morph,
            instance_of: None,
            bounding: None,
        };

        let handle = {
            let mut graph = self.graph.lock();
            match merge_into {
                // the node's own transform becomes the mesh node
                Some(host) => {
                    let host_node = graph.node_mut(host);
                    host_node.kind = NodeKind::Mesh(object);
                    host_node.source_pointers.push(ptr.to_string());
                    host
                }
                None => {
                    let mut scene_node = SceneNode::transform(name);
                    scene_node.kind = NodeKind::Mesh(object);
                    scene_node.source_pointers.push(ptr.to_string());
                    let handle = graph.add_node(scene_node);
                    graph.set_parent(handle, Some(parent));
                    handle
                }
            }
        };
        let graph = self.graph.lock();
        self.notify(|o| o.on_mesh_loaded(graph.node(handle)));
        Ok(handle)
    }

    /// Clone a previously built primitive node as a lightweight instance.
    fn instantiate_primitive(
        self: &Arc<Self>,
        ptr: &str,
        source: NodeHandle,
        parent: NodeHandle,
        merge_into: Option<NodeHandle>,
    ) -> NodeHandle {
        let mut graph = self.graph.lock();
        let (name, object) = {
            let source_node = graph.node(source);
            match source_node.mesh() {
                Some(mesh) => (
                    source_node.name.clone(),
                    MeshObject {
                        geometry: Arc::clone(&mesh.geometry),
                        draw_mode: mesh.draw_mode,
                        material: mesh.material,
                        skeleton: None,
                        winding: mesh.winding,
                        morph: None,
                        instance_of: Some(source),
                        bounding: None,
                    },
                ),
                None => unreachable!("instancing source is always a mesh node"),
            }
        };
        let handle = match merge_into {
            Some(host) => {
                let host_node = graph.node_mut(host);
                host_node.kind = NodeKind::Mesh(object);
                host_node.source_pointers.push(ptr.to_string());
                host
            }
            None => {
                let mut scene_node = SceneNode::transform(name);
                scene_node.kind = NodeKind::Mesh(object);
                scene_node.source_pointers.push(ptr.to_string());
                let handle = graph.add_node(scene_node);
                graph.set_parent(handle, Some(parent));
                handle
            }
        };
        self.notify(|o| o.on_mesh_loaded(graph.node(handle)));
        handle
    }

    /// Load a primitive's morph targets as absolute vertex data.
    async fn build_morph_targets(
        self: &Arc<Self>,
        ptr: &str,
        mesh: &Mesh,
        node: &Node,
        primitive: &Primitive,
        geometry: &Arc<GeometryData>,
    ) -> Result<Option<MorphTargetManager>> {
        if primitive.targets.is_empty() {
            return Ok(None);
        }

        let names = mesh.target_names();
        let mut manager = MorphTargetManager::new();
        for (i, target) in primitive.targets.iter().enumerate() {
            let target_ptr = format!("{ptr}/targets/{i}");
            let load = |semantic: &'static str| {
                let accessor = target.get(semantic).copied();
                let attr_ptr = format!("{target_ptr}/{semantic}");
                let ctx = Arc::clone(self);
                async move {
                    match accessor {
                        Some(index) => Ok::<_, Error>(Some(
                            ctx.load_float_accessor(&attr_ptr, Some(index)).await?,
                        )),
                        None => Ok(None),
                    }
                }
            };
            let (positions, normals, tangents) =
                tokio::try_join!(load("POSITION"), load("NORMAL"), load("TANGENT"))?;

            let name = names
                .as_ref()
                .and_then(|n| n.get(i).cloned())
                .unwrap_or_else(|| format!("target{i}"));
            let weight = node
                .weights
                .get(i)
                .or_else(|| mesh.weights.get(i))
                .copied()
                .unwrap_or(0.0);

            manager.add_target(MorphTarget {
                name,
                weight,
                positions: positions
                    .map(|delta| add_deltas(geometry.positions.as_deref(), &delta)),
                normals: normals.map(|delta| add_deltas(geometry.normals.as_deref(), &delta)),
                tangents: tangents
                    .map(|delta| add_tangent_deltas(geometry.tangents.as_deref(), &delta)),
            });
        }

        Ok(Some(manager))
    }
}

/// Absolute morph data: base plus delta, element-wise. A missing base
/// stream counts as zeros.
fn add_deltas(base: Option<&Vec<f32>>, delta: &[f32]) -> Vec<f32> {
    match base {
        Some(base) => delta
            .iter()
            .enumerate()
            .map(|(i, d)| base.get(i).copied().unwrap_or(0.0) + d)
            .collect(),
        None => delta.to_vec(),
    }
}

/// Tangent deltas are 3-component; expand into the mesh's 4-component
/// layout, leaving the handedness component untouched.
fn add_tangent_deltas(base: Option<&Vec<f32>>, delta: &[f32]) -> Vec<f32> {
    let count = delta.len() / 3;
    let mut out = Vec::with_capacity(count * 4);
    for i in 0..count {
        for c in 0..3 {
            let b = base
                .and_then(|b| b.get(i * 4 + c))
                .copied()
                .unwrap_or(0.0);
            out.push(b + delta[i * 3 + c]);
        }
        out.push(base.and_then(|b| b.get(i * 4 + 3)).copied().unwrap_or(0.0));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deltas_add_onto_base() {
        let base = vec![1.0, 2.0, 3.0];
        assert_eq!(add_deltas(Some(&base), &[0.5, -1.0, 0.0]), vec![1.5, 1.0, 3.0]);
        assert_eq!(add_deltas(None, &[0.5, -1.0, 0.0]), vec![0.5, -1.0, 0.0]);
    }

    #[test]
    fn tangent_deltas_expand_to_four_components() {
        let base = vec![1.0, 0.0, 0.0, -1.0, 0.0, 1.0, 0.0, 1.0];
        let delta = vec![0.1, 0.2, 0.3, 0.0, 0.0, 0.0];
        let out = add_tangent_deltas(Some(&base), &delta);
        assert_eq!(out, vec![1.1, 0.2, 0.3, -1.0, 0.0, 1.0, 0.0, 1.0]);
    }
}
