//! Material and texture resolution.
//!
//! A glTF material is cached per (material index, draw mode) pair: draw
//! topology is baked into the produced instance, so points and triangles
//! referencing the same material get distinct instances. Primitives with no
//! material share one cached default instance per draw mode.

use std::sync::Arc;

use crate::document::{indexed, pointer, Material, Sampler, TextureInfo};
use crate::error::{Error, Result};
use crate::extension::Step;
use crate::loader::LoadContext;
use crate::scene::{
    AlphaMode, DrawMode, Filter, MaterialHandle, MaterialInstance, SamplerSettings,
    TextureInstance, Wrap,
};

fn decode_mag_filter(context: &str, code: Option<u32>) -> Filter {
    match code {
        None | Some(9729) => Filter::Linear,
        Some(9728) => Filter::Nearest,
        Some(other) => {
            log::warn!("{context}/magFilter: invalid value ({other})");
            Filter::Linear
        }
    }
}

fn decode_min_filter(context: &str, code: Option<u32>) -> Filter {
    match code {
        None | Some(9729) | Some(9985) | Some(9987) => Filter::Linear,
        Some(9728) | Some(9984) | Some(9986) => Filter::Nearest,
        Some(other) => {
            log::warn!("{context}/minFilter: invalid value ({other})");
            Filter::Linear
        }
    }
}

fn decode_wrap(context: &str, code: Option<u32>) -> Wrap {
    match code {
        None | Some(10497) => Wrap::Repeat,
        Some(33071) => Wrap::ClampToEdge,
        Some(33648) => Wrap::MirroredRepeat,
        Some(other) => {
            log::warn!("{context}: invalid value ({other})");
            Wrap::Repeat
        }
    }
}

/// Decode a sampler's GL filter/wrap codes, substituting defaults for
/// invalid values.
pub(crate) fn sampler_settings(context: &str, sampler: &Sampler) -> SamplerSettings {
    SamplerSettings {
        mag_filter: decode_mag_filter(context, sampler.mag_filter),
        min_filter: decode_min_filter(context, sampler.min_filter),
        wrap_u: decode_wrap(&format!("{context}/wrapS"), sampler.wrap_s),
        wrap_v: decode_wrap(&format!("{context}/wrapT"), sampler.wrap_t),
    }
}

/// A material instance before any document property is applied.
pub(crate) fn blank_material(
    name: impl Into<String>,
    draw_mode: DrawMode,
    right_handed: bool,
) -> MaterialInstance {
    MaterialInstance {
        name: name.into(),
        draw_mode,
        source_pointer: None,
        base_color_factor: [1.0, 1.0, 1.0, 1.0],
        alpha: 1.0,
        metallic_factor: 1.0,
        roughness_factor: 1.0,
        emissive_factor: [0.0, 0.0, 0.0],
        alpha_mode: AlphaMode::Opaque,
        alpha_cutoff: 0.5,
        double_sided: false,
        back_face_culling: true,
        two_sided_lighting: false,
        normal_scale: 1.0,
        invert_normal_map_x: !right_handed,
        invert_normal_map_y: right_handed,
        occlusion_strength: 1.0,
        use_alpha_from_base_color_texture: false,
        base_color_texture: None,
        metallic_roughness_texture: None,
        normal_texture: None,
        occlusion_texture: None,
        emissive_texture: None,
    }
}

impl LoadContext {
    /// Resolve a primitive's material reference into a cached handle; `None`
    /// falls back to the per-draw-mode default material.
    pub async fn load_material(
        self: &Arc<Self>,
        context: &str,
        material_index: Option<u32>,
        draw_mode: DrawMode,
    ) -> Result<MaterialHandle> {
        if material_index.is_none() {
            return Ok(self.default_material(draw_mode));
        }
        let material = indexed(context, &self.doc.materials, material_index)?;
        let ptr = pointer("materials", material.index);

        if let Some(result) = self
            .dispatch(&ptr, Step::Material, |ext| {
                ext.load_material(self, &ptr, material, draw_mode)
            })
            .await
        {
            return result;
        }

        let ctx = Arc::clone(self);
        let material = material.clone();
        let material_ptr = ptr.clone();
        self.materials
            .get_or_try_init((material.index, draw_mode), move || async move {
                let instance = ctx
                    .build_material(&material_ptr, &material, draw_mode)
                    .await?;
                ctx.notify(|o| o.on_material_loaded(&instance));
                Ok(ctx.push_material(instance))
            })
            .await
    }

    /// The cached default material for a draw mode, creating it on first use.
    pub(crate) fn default_material(self: &Arc<Self>, draw_mode: DrawMode) -> MaterialHandle {
        let mut defaults = self.default_materials.lock();
        if let Some(&handle) = defaults.get(&draw_mode) {
            return handle;
        }
        let instance = blank_material("default", draw_mode, self.right_handed());
        self.notify(|o| o.on_material_loaded(&instance));
        let handle = self.push_material(instance);
        defaults.insert(draw_mode, handle);
        handle
    }

    async fn build_material(
        self: &Arc<Self>,
        ptr: &str,
        material: &Material,
        draw_mode: DrawMode,
    ) -> Result<MaterialInstance> {
        let name = material
            .name
            .clone()
            .unwrap_or_else(|| format!("material{}", material.index));
        let mut instance = self
            .dispatch_sync(ptr, Step::CreateMaterial, |ext| {
                ext.create_material(self, ptr, material, draw_mode)
            })
            .unwrap_or_else(|| blank_material(name, draw_mode, self.right_handed()));
        instance.source_pointer = Some(ptr.to_string());

        if let Some(result) = self
            .dispatch(ptr, Step::MaterialProperties, |ext| {
                ext.load_material_properties(self, ptr, material, instance.clone())
            })
            .await
        {
            return result;
        }

        let alpha_mode = match material.alpha_mode.as_deref() {
            None | Some("OPAQUE") => AlphaMode::Opaque,
            Some("MASK") => AlphaMode::Mask,
            Some("BLEND") => AlphaMode::Blend,
            Some(other) => return Err(Error::value(&format!("{ptr}/alphaMode"), other)),
        };
        instance.alpha_mode = alpha_mode;
        instance.alpha_cutoff = material.alpha_cutoff.unwrap_or(0.5);
        instance.emissive_factor = material.emissive_factor;
        if material.double_sided {
            instance.double_sided = true;
            instance.back_face_culling = false;
            instance.two_sided_lighting = true;
        }

        let pbr = material.pbr_metallic_roughness.clone().unwrap_or_default();
        instance.base_color_factor = pbr.base_color_factor;
        instance.alpha = pbr.base_color_factor[3];
        instance.metallic_factor = pbr.metallic_factor;
        instance.roughness_factor = pbr.roughness_factor;

        let base_alpha = alpha_mode != AlphaMode::Opaque;
        let (base_color, metallic_roughness, normal, occlusion, emissive) = tokio::try_join!(
            self.optional_texture(
                format!("{ptr}/pbrMetallicRoughness/baseColorTexture"),
                pbr.base_color_texture.clone(),
                false,
                base_alpha,
            ),
            self.optional_texture(
                format!("{ptr}/pbrMetallicRoughness/metallicRoughnessTexture"),
                pbr.metallic_roughness_texture.clone(),
                true,
                false,
            ),
            self.optional_texture(
                format!("{ptr}/normalTexture"),
                material.normal_texture.as_ref().map(|n| TextureInfo {
                    index: n.index,
                    tex_coord: n.tex_coord,
                }),
                true,
                false,
            ),
            self.optional_texture(
                format!("{ptr}/occlusionTexture"),
                material.occlusion_texture.as_ref().map(|o| TextureInfo {
                    index: o.index,
                    tex_coord: o.tex_coord,
                }),
                true,
                false,
            ),
            self.optional_texture(
                format!("{ptr}/emissiveTexture"),
                material.emissive_texture.clone(),
                false,
                false,
            ),
        )?;

        instance.base_color_texture = base_color;
        instance.metallic_roughness_texture = metallic_roughness;
        instance.normal_texture = normal;
        instance.occlusion_texture = occlusion;
        instance.emissive_texture = emissive;
        if let Some(n) = &material.normal_texture {
            instance.normal_scale = n.scale;
        }
        if let Some(o) = &material.occlusion_texture {
            instance.occlusion_strength = o.strength;
        }
        if alpha_mode == AlphaMode::Blend {
            instance.use_alpha_from_base_color_texture = instance.base_color_texture.is_some();
        }

        Ok(instance)
    }

    async fn optional_texture(
        self: &Arc<Self>,
        ptr: String,
        info: Option<TextureInfo>,
        non_color_data: bool,
        has_alpha: bool,
    ) -> Result<Option<TextureInstance>> {
        match info {
            None => Ok(None),
            Some(info) => {
                let mut texture = self.load_texture_info(&ptr, &info).await?;
                texture.non_color_data = non_color_data;
                texture.has_alpha = has_alpha;
                Ok(Some(texture))
            }
        }
    }

    /// Resolve a texture reference into an instance with content bytes and
    /// sampler state.
    pub async fn load_texture_info(
        self: &Arc<Self>,
        ptr: &str,
        info: &TextureInfo,
    ) -> Result<TextureInstance> {
        if let Some(result) = self
            .dispatch(ptr, Step::TextureInfo, |ext| {
                ext.load_texture_info(self, ptr, info)
            })
            .await
        {
            return result;
        }

        let texture = indexed(&format!("{ptr}/index"), &self.doc.textures, info.index)?;
        let texture_ptr = pointer("textures", texture.index);

        let mut instance = match self
            .dispatch(&texture_ptr, Step::Texture, |ext| {
                ext.load_texture(self, &texture_ptr, texture)
            })
            .await
        {
            Some(result) => result?,
            None => {
                let sampler = match texture.sampler {
                    None => SamplerSettings::default(),
                    Some(_) => {
                        let sampler = indexed(
                            &format!("{texture_ptr}/sampler"),
                            &self.doc.samplers,
                            texture.sampler,
                        )?;
                        sampler_settings(&pointer("samplers", sampler.index), sampler)
                    }
                };

                let image = indexed(
                    &format!("{texture_ptr}/source"),
                    &self.doc.images,
                    texture.source,
                )?;
                let image_ptr = pointer("images", image.index);
                let data = if image.buffer_view.is_some() {
                    Some(
                        self.load_buffer_view(
                            &format!("{image_ptr}/bufferView"),
                            image.buffer_view,
                        )
                        .await?,
                    )
                } else if let Some(uri) = &image.uri {
                    let bytes = self.load_uri_bytes(&format!("{image_ptr}/uri"), uri).await?;
                    Some(crate::buffer::ByteSlice::whole(Arc::new(bytes)))
                } else {
                    log::warn!("{image_ptr}: image has neither uri nor bufferView");
                    None
                };

                TextureInstance {
                    name: texture
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("texture{}", texture.index)),
                    data,
                    sampler,
                    non_color_data: false,
                    has_alpha: false,
                    tex_coord: info.tex_coord,
                    source_pointer: texture_ptr,
                }
            }
        };
        instance.tex_coord = info.tex_coord;

        self.notify(|o| o.on_texture_loaded(&instance));
        Ok(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_sampler_codes_fall_back_with_defaults() {
        let sampler = Sampler {
            mag_filter: Some(1234),
            min_filter: Some(9984),
            wrap_s: Some(33071),
            wrap_t: Some(7),
            ..Default::default()
        };
        let settings = sampler_settings("/samplers/0", &sampler);
        assert_eq!(settings.mag_filter, Filter::Linear);
        assert_eq!(settings.min_filter, Filter::Nearest);
        assert_eq!(settings.wrap_u, Wrap::ClampToEdge);
        assert_eq!(settings.wrap_v, Wrap::Repeat);
    }

    #[test]
    fn blank_material_handedness_flags() {
        let left = blank_material("m", DrawMode::Triangles, false);
        assert!(left.invert_normal_map_x);
        assert!(!left.invert_normal_map_y);

        let right = blank_material("m", DrawMode::Triangles, true);
        assert!(!right.invert_normal_map_x);
        assert!(right.invert_normal_map_y);
    }
}
