//! Vertex attribute semantics and per-primitive geometry assembly.
//!
//! Attribute accessors resolve concurrently; joint indices go through the
//! float decode path like everything else, so consumers see one numeric
//! representation across all streams.

use std::sync::Arc;

use futures_util::future::try_join_all;

use crate::accessor::{declared_bounding_box, num_components};
use crate::document::{indexed, Primitive};
use crate::error::{Error, Result};
use crate::extension::Step;
use crate::loader::LoadContext;
use crate::scene::GeometryData;

/// Maximum texture-coordinate sets carried per vertex.
pub const MAX_TEX_COORD_SETS: usize = 6;

/// Maximum joint-index/weight set pairs carried per vertex.
pub const MAX_JOINT_SETS: usize = 2;

/// The fixed vertex stream an attribute semantic maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VertexKind {
    Position,
    Normal,
    Tangent,
    TexCoord(usize),
    Joints(usize),
    Weights(usize),
    Color,
}

impl VertexKind {
    /// Map a glTF attribute semantic name; `None` for unrecognized names.
    pub(crate) fn from_semantic(semantic: &str) -> Option<Self> {
        match semantic {
            "POSITION" => Some(Self::Position),
            "NORMAL" => Some(Self::Normal),
            "TANGENT" => Some(Self::Tangent),
            "COLOR_0" => Some(Self::Color),
            _ => {
                if let Some(set) = numbered(semantic, "TEXCOORD_") {
                    return (set < MAX_TEX_COORD_SETS).then_some(Self::TexCoord(set));
                }
                if let Some(set) = numbered(semantic, "JOINTS_") {
                    return (set < MAX_JOINT_SETS).then_some(Self::Joints(set));
                }
                if let Some(set) = numbered(semantic, "WEIGHTS_") {
                    return (set < MAX_JOINT_SETS).then_some(Self::Weights(set));
                }
                None
            }
        }
    }
}

fn numbered(semantic: &str, prefix: &str) -> Option<usize> {
    semantic.strip_prefix(prefix)?.parse().ok()
}

impl LoadContext {
    /// Resolve a primitive's vertex and index streams into a
    /// [`GeometryData`], fanning out one decode per attribute.
    pub async fn load_vertex_data(
        self: &Arc<Self>,
        ptr: &str,
        primitive: &Primitive,
    ) -> Result<Arc<GeometryData>> {
        if let Some(result) = self
            .dispatch(ptr, Step::VertexData, |ext| {
                ext.load_vertex_data(self, ptr, primitive)
            })
            .await
        {
            return result;
        }

        let mut attribute_futures = Vec::new();
        for (semantic, &accessor_index) in &primitive.attributes {
            let Some(kind) = VertexKind::from_semantic(semantic) else {
                log::warn!("{ptr}: ignoring unrecognized attribute ({semantic})");
                continue;
            };
            let attr_ptr = format!("{ptr}/attributes/{semantic}");
            let ctx = Arc::clone(self);
            attribute_futures.push(async move {
                let data = ctx.load_float_accessor(&attr_ptr, Some(accessor_index)).await?;
                Ok::<_, Error>((kind, accessor_index, data))
            });
        }

        let ctx = Arc::clone(self);
        let index_ptr = format!("{ptr}/indices");
        let index_accessor = primitive.indices;
        let (attributes, indices) = tokio::try_join!(try_join_all(attribute_futures), async move {
            match index_accessor {
                Some(i) => Ok(Some(ctx.load_indices_accessor(&index_ptr, Some(i)).await?)),
                None => Ok(None),
            }
        })?;

        let mut geometry = GeometryData {
            indices,
            ..GeometryData::default()
        };
        for (kind, accessor_index, data) in attributes {
            let accessor = indexed(ptr, &self.doc.accessors, Some(accessor_index))?;
            match kind {
                VertexKind::Position => {
                    geometry.vertex_count = accessor.count;
                    geometry.declared_bounds = declared_bounding_box(accessor);
                    geometry.positions = Some(data);
                }
                VertexKind::Normal => geometry.normals = Some(data),
                VertexKind::Tangent => geometry.tangents = Some(data),
                VertexKind::TexCoord(set) => geometry.tex_coords[set] = Some(data),
                VertexKind::Joints(set) => geometry.joints[set] = Some(data),
                VertexKind::Weights(set) => geometry.weights[set] = Some(data),
                VertexKind::Color => {
                    let comps = num_components(
                        &format!("{ptr}/attributes/COLOR_0"),
                        &accessor.element_type,
                    )?;
                    geometry.color_components = comps;
                    geometry.has_vertex_alpha = comps == 4;
                    geometry.colors = Some(data);
                }
            }
        }

        if geometry.joints[0].is_some() {
            geometry.num_bone_influencers = if geometry.joints[1].is_some() { 8 } else { 4 };
        }
        // declared min/max only stands in for a vertex scan on unskinned meshes
        geometry.bounds_authoritative = geometry.declared_bounds.is_some()
            && geometry.joints[0].is_none()
            && !self.options.always_compute_bounds;

        let geometry = Arc::new(geometry);
        self.geometries.lock().push(Arc::clone(&geometry));
        Ok(geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semantic_mapping() {
        assert_eq!(VertexKind::from_semantic("POSITION"), Some(VertexKind::Position));
        assert_eq!(VertexKind::from_semantic("TEXCOORD_0"), Some(VertexKind::TexCoord(0)));
        assert_eq!(VertexKind::from_semantic("TEXCOORD_5"), Some(VertexKind::TexCoord(5)));
        assert_eq!(VertexKind::from_semantic("JOINTS_1"), Some(VertexKind::Joints(1)));
        assert_eq!(VertexKind::from_semantic("WEIGHTS_0"), Some(VertexKind::Weights(0)));
        assert_eq!(VertexKind::from_semantic("COLOR_0"), Some(VertexKind::Color));
    }

    #[test]
    fn unsupported_semantics_are_rejected() {
        assert_eq!(VertexKind::from_semantic("TEXCOORD_6"), None);
        assert_eq!(VertexKind::from_semantic("JOINTS_2"), None);
        assert_eq!(VertexKind::from_semantic("COLOR_1"), None);
        assert_eq!(VertexKind::from_semantic("_CUSTOM"), None);
        assert_eq!(VertexKind::from_semantic("TEXCOORD_"), None);
    }
}
