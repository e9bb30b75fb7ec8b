//! Skin resolution: skeletons, bones, and bind-pose math.
//!
//! A skin resolves to one shared skeleton per skin index. Bones are built
//! bottom-up along the document parent chain (a joint's ancestors get bones
//! before the joint itself, intermediate non-joint nodes included), stopping
//! at the skeleton root. Linking bones to their live transform nodes is
//! deferred until the whole node graph exists.

use std::collections::HashMap;
use std::sync::Arc;

use crate::document::{indexed, pointer, Skin};
use crate::error::Result;
use crate::extension::Step;
use crate::loader::LoadContext;
use crate::math::{invert_or_identity, Mat4};
use crate::node::node_local_matrix;
use crate::scene::{Bone, Skeleton, SkeletonHandle};

impl LoadContext {
    /// Resolve a skin into its shared skeleton, building it on first use.
    pub async fn load_skin(
        self: &Arc<Self>,
        context: &str,
        skin_index: Option<u32>,
    ) -> Result<SkeletonHandle> {
        let skin = indexed(context, &self.doc.skins, skin_index)?;
        let ptr = pointer("skins", skin.index);

        if let Some(result) = self
            .dispatch(&ptr, Step::Skin, |ext| ext.load_skin(self, &ptr, skin))
            .await
        {
            return result;
        }

        let ctx = Arc::clone(self);
        let skin = skin.clone();
        let skin_ptr = ptr.clone();
        self.skins
            .get_or_try_init(skin.index, move || async move {
                ctx.build_skeleton(&skin_ptr, &skin).await
            })
            .await
    }

    async fn build_skeleton(self: &Arc<Self>, ptr: &str, skin: &Skin) -> Result<SkeletonHandle> {
        let root_node = self.skeleton_root(ptr, skin);

        let mut bones: Vec<Bone> = Vec::new();
        let mut bone_of_node: HashMap<usize, usize> = HashMap::new();
        for &joint in &skin.joints {
            let joint_ptr = format!("{ptr}/joints");
            let node = indexed(&joint_ptr, &self.doc.nodes, Some(joint))?;
            self.ensure_bone(ptr, node.index, root_node, &mut bones, &mut bone_of_node)?;
        }

        // inverse bind matrices index by joint position, identity if absent
        let ibms: Option<Arc<Vec<f32>>> = match skin.inverse_bind_matrices {
            None => None,
            Some(accessor) => Some(
                self.load_float_accessor(
                    &format!("{ptr}/inverseBindMatrices"),
                    Some(accessor),
                )
                .await?,
            ),
        };
        for (position, &joint) in skin.joints.iter().enumerate() {
            let Some(&bone) = bone_of_node.get(&(joint as usize)) else {
                continue;
            };
            if let Some(ibms) = &ibms {
                if let Some(slice) = ibms.get(position * 16..position * 16 + 16) {
                    bones[bone].inverse_bind_matrix = Mat4::from_column_slice(slice);
                }
            }
        }

        // local bind pose relative to the parent bone:
        // parent_ibm * inverse(own_ibm)
        for i in 0..bones.len() {
            let own = invert_or_identity(&bones[i].inverse_bind_matrix);
            bones[i].bind_matrix = match bones[i].parent {
                Some(p) => bones[p].inverse_bind_matrix * own,
                None => own,
            };
        }

        let skeleton = Skeleton {
            name: skin
                .name
                .clone()
                .unwrap_or_else(|| format!("skeleton{}", skin.index)),
            bones,
            root_node,
            source_pointer: ptr.to_string(),
        };

        let handle = {
            let mut skeletons = self.skeletons.lock();
            let handle = SkeletonHandle(skeletons.len());
            skeletons.push(skeleton);
            handle
        };

        // bones can only follow live transforms once every node exists
        self.defer(Box::new(move |ctx| {
            let node_handles = ctx.node_handles.lock();
            let mut skeletons = ctx.skeletons.lock();
            for bone in &mut skeletons[handle.0].bones {
                bone.linked_node = node_handles.get(&bone.joint_node).copied();
            }
        }));

        {
            let skeletons = self.skeletons.lock();
            self.notify(|o| o.on_skin_loaded(&skeletons[handle.0]));
        }
        Ok(handle)
    }

    /// Create the bone for a node, creating its ancestor bones first.
    fn ensure_bone(
        self: &Arc<Self>,
        ptr: &str,
        node_index: usize,
        root: Option<usize>,
        bones: &mut Vec<Bone>,
        bone_of_node: &mut HashMap<usize, usize>,
    ) -> Result<usize> {
        if let Some(&bone) = bone_of_node.get(&node_index) {
            return Ok(bone);
        }

        let parent = if root == Some(node_index) {
            None
        } else {
            match self.node_parents.get(node_index).copied().flatten() {
                Some(parent_node) => {
                    Some(self.ensure_bone(ptr, parent_node, root, bones, bone_of_node)?)
                }
                None => None,
            }
        };

        let node = indexed(ptr, &self.doc.nodes, Some(node_index as u32))?;
        let base_matrix = node_local_matrix(node);
        let bone = bones.len();
        bones.push(Bone {
            name: node
                .name
                .clone()
                .unwrap_or_else(|| format!("joint{node_index}")),
            parent,
            joint_node: node_index,
            base_matrix,
            bind_matrix: Mat4::identity(),
            inverse_bind_matrix: Mat4::identity(),
            linked_node: None,
        });
        bone_of_node.insert(node_index, bone);
        Ok(bone)
    }

    /// The skeleton root: the declared node when it agrees with the joints'
    /// nearest common ancestor, else the discovered ancestor (warned).
    fn skeleton_root(&self, ptr: &str, skin: &Skin) -> Option<usize> {
        let discovered = self.find_skeleton_root(&skin.joints);
        if discovered.is_none() {
            log::warn!("{ptr}: failed to find common root of skin joints");
        }
        match (skin.skeleton, discovered) {
            (None, discovered) => discovered,
            (Some(declared), None) => Some(declared as usize),
            (Some(declared), Some(discovered)) => {
                let declared = declared as usize;
                if declared == discovered || self.is_ancestor(declared, discovered) {
                    Some(declared)
                } else {
                    log::warn!(
                        "{ptr}/skeleton: node ({declared}) is not a common root of the joints, \
                         overriding with nearest common ancestor ({discovered})"
                    );
                    Some(discovered)
                }
            }
        }
    }

    /// Deepest node shared by every joint's root-to-joint ancestor path.
    pub(crate) fn find_skeleton_root(&self, joints: &[u32]) -> Option<usize> {
        let mut paths: Vec<Vec<usize>> = Vec::with_capacity(joints.len());
        for &joint in joints {
            let mut path = vec![joint as usize];
            let mut current = joint as usize;
            while let Some(parent) = self.node_parents.get(current).copied().flatten() {
                path.push(parent);
                current = parent;
            }
            path.reverse();
            paths.push(path);
        }

        let first = paths.first()?;
        let mut common = None;
        for (depth, &candidate) in first.iter().enumerate() {
            if paths.iter().all(|p| p.get(depth) == Some(&candidate)) {
                common = Some(candidate);
            } else {
                break;
            }
        }
        common
    }

    fn is_ancestor(&self, ancestor: usize, node: usize) -> bool {
        let mut current = node;
        while let Some(parent) = self.node_parents.get(current).copied().flatten() {
            if parent == ancestor {
                return true;
            }
            current = parent;
        }
        false
    }
}
