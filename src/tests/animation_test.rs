//! Animation group assembly tests.

use serde_json::json;

use super::{f32_bytes, load, load_with_bin, load_with_options};
use crate::error::Error;
use crate::loader::LoaderOptions;
use crate::math::Vec3;
use crate::scene::{CurveProperty, Interpolation, KeyValue};

fn translation_document() -> serde_json::Value {
    json!({
        "scenes": [{"nodes": [0]}],
        "nodes": [{"name": "mover"}],
        "animations": [{
            "name": "slide",
            "channels": [{
                "sampler": 0,
                "target": {"node": 0, "path": "translation"},
            }],
            "samplers": [{"input": 0, "output": 1}],
        }],
        "accessors": [
            {"bufferView": 0, "componentType": 5126, "count": 2, "type": "SCALAR"},
            {"bufferView": 1, "componentType": 5126, "count": 2, "type": "VEC3"},
        ],
        "bufferViews": [
            {"buffer": 0, "byteLength": 8},
            {"buffer": 0, "byteOffset": 8, "byteLength": 24},
        ],
        "buffers": [{"byteLength": 32}],
    })
}

fn translation_bin() -> Vec<u8> {
    let mut bin = f32_bytes(&[0.0, 1.0]);
    bin.extend_from_slice(&f32_bytes(&[0.0, 0.0, 0.0, 1.0, 2.0, 3.0]));
    bin
}

#[tokio::test]
async fn translation_channel_becomes_a_curve() {
    let scene = load_with_bin(translation_document(), Some(translation_bin()))
        .await
        .unwrap();

    assert_eq!(scene.animation_groups.len(), 1);
    let group = &scene.animation_groups[0];
    assert_eq!(group.name, "slide");
    assert_eq!(group.source_pointer, "/animations/0");
    assert_eq!(group.curves.len(), 1);

    let curve = &group.curves[0];
    assert_eq!(curve.property, CurveProperty::Translation);
    assert_eq!(curve.interpolation, Interpolation::Linear);
    assert_eq!(curve.target, scene.transform_nodes[0]);
    assert_eq!(curve.keys.len(), 2);
    // keyframe times convert to frames at the default 60 fps
    assert_eq!(curve.keys[0].frame, 0.0);
    assert_eq!(curve.keys[1].frame, 60.0);
    assert_eq!(curve.keys[1].value, KeyValue::Vector(Vec3::new(1.0, 2.0, 3.0)));
}

#[tokio::test]
async fn target_fps_rescales_frames() {
    let scene = load_with_options(
        translation_document(),
        Some(translation_bin()),
        LoaderOptions::new().with_target_fps(30.0),
    )
    .await
    .unwrap();
    let curve = &scene.animation_groups[0].curves[0];
    assert_eq!(curve.keys[1].frame, 30.0);
}

#[tokio::test]
async fn orphan_channels_suppress_the_group() {
    // no target node at all
    let scene = load(json!({
        "scenes": [{"nodes": [0]}],
        "nodes": [{}],
        "animations": [{
            "channels": [{"sampler": 0, "target": {"path": "translation"}}],
            "samplers": [{"input": 0, "output": 0}],
        }],
        "accessors": [{"componentType": 5126, "count": 2, "type": "SCALAR"}],
    }))
    .await
    .unwrap();
    assert!(scene.animation_groups.is_empty());

    // target node exists in the document but not in the loaded scene
    let scene = load(json!({
        "scenes": [{"nodes": [0]}],
        "nodes": [{}, {"name": "outside"}],
        "animations": [{
            "channels": [{
                "sampler": 0,
                "target": {"node": 1, "path": "translation"},
            }],
            "samplers": [{"input": 0, "output": 0}],
        }],
        "accessors": [{"componentType": 5126, "count": 2, "type": "SCALAR"}],
    }))
    .await
    .unwrap();
    assert!(scene.animation_groups.is_empty());
}

#[tokio::test]
async fn weights_channel_fans_out_per_morph_target() {
    // two targets: per keyframe the output interleaves one weight per target
    let mut bin = f32_bytes(&[0.0, 1.0]);
    bin.extend_from_slice(&f32_bytes(&[0.1, 0.2, 0.3, 0.4]));

    let scene = load_with_bin(
        json!({
            "scenes": [{"nodes": [0]}],
            "nodes": [{"mesh": 0}],
            "meshes": [{"primitives": [{
                "attributes": {"POSITION": 0},
                "targets": [{"POSITION": 0}, {"POSITION": 0}],
            }]}],
            "animations": [{
                "channels": [{
                    "sampler": 0,
                    "target": {"node": 0, "path": "weights"},
                }],
                "samplers": [{"input": 1, "output": 2}],
            }],
            "accessors": [
                {"componentType": 5126, "count": 1, "type": "VEC3"},
                {"bufferView": 0, "componentType": 5126, "count": 2, "type": "SCALAR"},
                {"bufferView": 1, "componentType": 5126, "count": 4, "type": "SCALAR"},
            ],
            "bufferViews": [
                {"buffer": 0, "byteLength": 8},
                {"buffer": 0, "byteOffset": 8, "byteLength": 16},
            ],
            "buffers": [{"byteLength": 24}],
        }),
        Some(bin),
    )
    .await
    .unwrap();

    let group = &scene.animation_groups[0];
    assert_eq!(group.curves.len(), 2);
    assert_eq!(
        group.curves[0].property,
        CurveProperty::MorphWeight { target: 0 }
    );
    assert_eq!(
        group.curves[1].property,
        CurveProperty::MorphWeight { target: 1 }
    );
    assert_eq!(group.curves[0].keys[1].value, KeyValue::Scalar(0.3));
    assert_eq!(group.curves[1].keys[0].value, KeyValue::Scalar(0.2));
}

#[tokio::test]
async fn invalid_interpolation_is_rejected() {
    let err = load(json!({
        "scenes": [{"nodes": [0]}],
        "nodes": [{}],
        "animations": [{
            "channels": [{
                "sampler": 0,
                "target": {"node": 0, "path": "translation"},
            }],
            "samplers": [{
                "input": 0,
                "output": 0,
                "interpolation": "QUADRATIC",
            }],
        }],
        "accessors": [{"componentType": 5126, "count": 2, "type": "SCALAR"}],
    }))
    .await
    .unwrap_err();
    assert!(matches!(err, Error::Value { .. }), "got {err:?}");
}

#[tokio::test]
async fn unknown_target_path_is_rejected() {
    let err = load(json!({
        "scenes": [{"nodes": [0]}],
        "nodes": [{}],
        "animations": [{
            "channels": [{
                "sampler": 0,
                "target": {"node": 0, "path": "color"},
            }],
            "samplers": [{"input": 0, "output": 0}],
        }],
        "accessors": [{"componentType": 5126, "count": 2, "type": "SCALAR"}],
    }))
    .await
    .unwrap_err();
    assert!(matches!(err, Error::Value { .. }), "got {err:?}");
}
