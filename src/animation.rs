//! Animation resolution.
//!
//! Channels bind sampler keyframe data to live node properties. Keyframe
//! times convert to frame numbers at the configured target frame rate;
//! cubic-spline tangents are rescaled from per-second to per-frame units.
//! One channel can fan out into several curves (one per morph target), and
//! channels whose target cannot accept the property are skipped silently.

use std::sync::Arc;

use futures_util::future::try_join_all;

use crate::document::{indexed, pointer, Animation, Channel};
use crate::error::{Error, Result};
use crate::extension::Step;
use crate::loader::LoadContext;
use crate::math::{quat_from_xyzw, Quat, Vec3};
use crate::scene::{
    AnimationCurve, AnimationGroup, CurveProperty, Interpolation, KeyValue, Keyframe, NodeHandle,
};

impl LoadContext {
    /// Assemble one glTF animation into a named group of curves.
    ///
    /// Returns `None` when every channel was skipped; empty groups are not
    /// part of the result.
    pub(crate) async fn load_animation(
        self: &Arc<Self>,
        animation: &Animation,
    ) -> Result<Option<AnimationGroup>> {
        let ptr = pointer("animations", animation.index);

        if let Some(result) = self
            .dispatch(&ptr, Step::Animation, |ext| {
                ext.load_animation(self, &ptr, animation)
            })
            .await
        {
            return result;
        }

        let channel_curves =
            try_join_all(animation.channels.iter().enumerate().map(|(i, channel)| {
                let channel_ptr = format!("{ptr}/channels/{i}");
                async move {
                    self.load_animation_channel(&channel_ptr, animation, channel)
                        .await
                }
            }))
            .await?;

        let curves: Vec<AnimationCurve> = channel_curves.into_iter().flatten().collect();
        if curves.is_empty() {
            return Ok(None);
        }

        let group = AnimationGroup {
            name: animation
                .name
                .clone()
                .unwrap_or_else(|| format!("animation{}", animation.index)),
            curves,
            source_pointer: ptr,
        };
        self.notify(|o| o.on_animation_group_loaded(&group));
        Ok(Some(group))
    }

    /// Resolve one channel into zero or more curves.
    pub async fn load_animation_channel(
        self: &Arc<Self>,
        ptr: &str,
        animation: &Animation,
        channel: &Channel,
    ) -> Result<Vec<AnimationCurve>> {
        if let Some(result) = self
            .dispatch(ptr, Step::AnimationChannel, |ext| {
                ext.load_animation_channel(self, ptr, animation, channel)
            })
            .await
        {
            return result;
        }

        // orphan channels are permitted: no target node means no curves
        let Some(node_index) = channel.target.node else {
            return Ok(Vec::new());
        };
        let node = indexed(&format!("{ptr}/target/node"), &self.doc.nodes, Some(node_index))?;
        let Some(&target) = self.node_handles.lock().get(&node.index) else {
            return Ok(Vec::new());
        };

        let property = match channel.target.path.as_str() {
            "translation" => ChannelProperty::Translation,
            "rotation" => ChannelProperty::Rotation,
            "scale" => ChannelProperty::Scale,
            "weights" => {
                // a weights channel needs morph targets on the node's mesh
                let target_count = node
                    .mesh
                    .and_then(|m| self.doc.meshes.get(m as usize))
                    .and_then(|m| m.primitives.first())
                    .map(|p| p.targets.len())
                    .unwrap_or(0);
                if target_count == 0 {
                    return Ok(Vec::new());
                }
                ChannelProperty::Weights { target_count }
            }
            other => return Err(Error::value(&format!("{ptr}/target/path"), other)),
        };

        let sampler = indexed(
            &format!("{ptr}/sampler"),
            &animation.samplers,
            channel.sampler,
        )?;
        let interpolation = match sampler.interpolation.as_deref() {
            None | Some("LINEAR") => Interpolation::Linear,
            Some("STEP") => Interpolation::Step,
            Some("CUBICSPLINE") => Interpolation::CubicSpline,
            Some(other) => {
                return Err(Error::value(&format!("{ptr}/sampler/interpolation"), other))
            }
        };

        let input_ptr = format!("{ptr}/sampler/input");
        let output_ptr = format!("{ptr}/sampler/output");
        let (input, output) = tokio::try_join!(
            self.load_float_accessor(&input_ptr, sampler.input),
            self.load_float_accessor(&output_ptr, sampler.output),
        )?;

        let fps = self.options.target_fps;
        Ok(build_curves(
            target,
            property,
            interpolation,
            &input,
            &output,
            fps,
        ))
    }
}

#[derive(Debug, Clone, Copy)]
enum ChannelProperty {
    Translation,
    Rotation,
    Scale,
    Weights { target_count: usize },
}

fn vector_at(output: &[f32], offset: usize, scale: f32) -> Option<KeyValue> {
    let v = output.get(offset..offset + 3)?;
    Some(KeyValue::Vector(Vec3::new(v[0], v[1], v[2]) * scale))
}

fn quaternion_at(output: &[f32], offset: usize, scale: f32) -> Option<KeyValue> {
    let v = output.get(offset..offset + 4)?;
    let q = quat_from_xyzw([v[0], v[1], v[2], v[3]]);
    Some(KeyValue::Quaternion(Quat::from(q.coords * scale)))
}

fn scalar_at(output: &[f32], offset: usize, scale: f32) -> Option<KeyValue> {
    output.get(offset).map(|&v| KeyValue::Scalar(v * scale))
}

/// Build the concrete curves for one channel. Weights fan out into one
/// curve per morph target; a property with no effective output yields none.
fn build_curves(
    target: NodeHandle,
    property: ChannelProperty,
    interpolation: Interpolation,
    input: &[f32],
    output: &[f32],
    fps: f32,
) -> Vec<AnimationCurve> {
    let cubic = interpolation == Interpolation::CubicSpline;
    // tangents arrive in per-second units
    let tangent_scale = 1.0 / fps;

    let read: fn(&[f32], usize, f32) -> Option<KeyValue> = match property {
        ChannelProperty::Translation | ChannelProperty::Scale => vector_at,
        ChannelProperty::Rotation => quaternion_at,
        ChannelProperty::Weights { .. } => scalar_at,
    };
    let comps = match property {
        ChannelProperty::Rotation => 4,
        ChannelProperty::Translation | ChannelProperty::Scale => 3,
        ChannelProperty::Weights { .. } => 1,
    };
    let (lanes, curve_properties): (usize, Vec<CurveProperty>) = match property {
        ChannelProperty::Translation => (1, vec![CurveProperty::Translation]),
        ChannelProperty::Rotation => (1, vec![CurveProperty::Rotation]),
        ChannelProperty::Scale => (1, vec![CurveProperty::Scale]),
        ChannelProperty::Weights { target_count } => (
            target_count,
            (0..target_count)
                .map(|target| CurveProperty::MorphWeight { target })
                .collect(),
        ),
    };

    // per keyframe the output holds `lanes` elements, tripled for
    // cubic-spline (in-tangents, values, out-tangents)
    let key_stride = comps * lanes * if cubic { 3 } else { 1 };

    let mut curves = Vec::with_capacity(lanes);
    for (lane, curve_property) in curve_properties.into_iter().enumerate() {
        let mut keys = Vec::with_capacity(input.len());
        for (k, &time) in input.iter().enumerate() {
            let base = k * key_stride;
            let key = if cubic {
                let in_tangent = read(output, base + lane * comps, tangent_scale);
                let value = read(output, base + (lanes + lane) * comps, 1.0);
                let out_tangent = read(output, base + (2 * lanes + lane) * comps, tangent_scale);
                value.map(|value| Keyframe {
                    frame: time * fps,
                    value,
                    in_tangent,
                    out_tangent,
                })
            } else {
                read(output, base + lane * comps, 1.0).map(|value| Keyframe {
                    frame: time * fps,
                    value,
                    in_tangent: None,
                    out_tangent: None,
                })
            };
            match key {
                Some(key) => keys.push(key),
                None => break,
            }
        }
        if keys.is_empty() {
            continue;
        }
        curves.push(AnimationCurve {
            target,
            property: curve_property,
            interpolation,
            keys,
        });
    }
    curves
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_translation_keys() {
        let input = [0.0, 1.0];
        let output = [0.0, 0.0, 0.0, 1.0, 2.0, 3.0];
        let curves = build_curves(
            NodeHandle(0),
            ChannelProperty::Translation,
            Interpolation::Linear,
            &input,
            &output,
            60.0,
        );
        assert_eq!(curves.len(), 1);
        let keys = &curves[0].keys;
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[1].frame, 60.0);
        assert_eq!(keys[1].value, KeyValue::Vector(Vec3::new(1.0, 2.0, 3.0)));
        assert!(keys[1].in_tangent.is_none());
    }

    #[test]
    fn cubic_tangents_rescaled_to_frames() {
        let input = [0.0];
        // in-tangent, value, out-tangent
        let output = [
            60.0, 60.0, 60.0, //
            1.0, 1.0, 1.0, //
            120.0, 120.0, 120.0,
        ];
        let curves = build_curves(
            NodeHandle(0),
            ChannelProperty::Scale,
            Interpolation::CubicSpline,
            &input,
            &output,
            60.0,
        );
        assert_eq!(curves.len(), 1);
        let key = &curves[0].keys[0];
        assert_eq!(key.value, KeyValue::Vector(Vec3::new(1.0, 1.0, 1.0)));
        assert_eq!(key.in_tangent, Some(KeyValue::Vector(Vec3::new(1.0, 1.0, 1.0))));
        assert_eq!(
            key.out_tangent,
            Some(KeyValue::Vector(Vec3::new(2.0, 2.0, 2.0)))
        );
    }

    #[test]
    fn weights_fan_out_per_target() {
        let input = [0.0, 1.0];
        // two targets, interleaved per keyframe
        let output = [0.1, 0.2, 0.3, 0.4];
        let curves = build_curves(
            NodeHandle(0),
            ChannelProperty::Weights { target_count: 2 },
            Interpolation::Linear,
            &input,
            &output,
            60.0,
        );
        assert_eq!(curves.len(), 2);
        assert_eq!(curves[0].property, CurveProperty::MorphWeight { target: 0 });
        assert_eq!(curves[0].keys[1].value, KeyValue::Scalar(0.3));
        assert_eq!(curves[1].keys[0].value, KeyValue::Scalar(0.2));
    }

    #[test]
    fn truncated_output_yields_no_curve() {
        let input = [0.0, 1.0];
        let output: [f32; 0] = [];
        let curves = build_curves(
            NodeHandle(0),
            ChannelProperty::Translation,
            Interpolation::Linear,
            &input,
            &output,
            60.0,
        );
        assert!(curves.is_empty());
    }
}
