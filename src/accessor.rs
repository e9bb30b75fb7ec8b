//! Accessor decoding: typed element streams over buffer views.
//!
//! Decoding always yields exactly `count × components(type)` values.
//! Accessors without a buffer view decode to zero-filled arrays; sparse
//! patches are applied on top of the base array in source order. Results
//! are cached per accessor per requested representation, since several
//! consumers may need the same accessor as floats, indices, or raw values.

use std::sync::Arc;

use crate::document::{indexed, pointer, Accessor};
use crate::error::{Error, Result};
use crate::loader::LoadContext;
use crate::scene::BoundingBox;

/// A glTF component type with its decode rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentType {
    I8,
    U8,
    I16,
    U16,
    U32,
    F32,
}

impl ComponentType {
    /// Decode the raw glTF `componentType` code.
    pub fn from_code(context: &str, code: u32) -> Result<Self> {
        match code {
            5120 => Ok(Self::I8),
            5121 => Ok(Self::U8),
            5122 => Ok(Self::I16),
            5123 => Ok(Self::U16),
            5125 => Ok(Self::U32),
            5126 => Ok(Self::F32),
            other => Err(Error::value(context, other)),
        }
    }

    /// Size of one component in bytes.
    pub fn byte_size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::U32 | Self::F32 => 4,
        }
    }

    /// Maximum representable magnitude, used as the normalization divider.
    pub fn normalization_divider(self) -> f32 {
        match self {
            Self::I8 => i8::MAX as f32,
            Self::U8 => u8::MAX as f32,
            Self::I16 => i16::MAX as f32,
            Self::U16 => u16::MAX as f32,
            Self::U32 => u32::MAX as f32,
            Self::F32 => 1.0,
        }
    }
}

/// Number of components for an accessor `type` string.
pub fn num_components(context: &str, element_type: &str) -> Result<usize> {
    match element_type {
        "SCALAR" => Ok(1),
        "VEC2" => Ok(2),
        "VEC3" => Ok(3),
        "VEC4" => Ok(4),
        "MAT2" => Ok(4),
        "MAT3" => Ok(9),
        "MAT4" => Ok(16),
        other => Err(Error::value(context, other)),
    }
}

/// Raw decoded accessor values, preserving the source component type.
#[derive(Debug, Clone)]
pub enum TypedValues {
    I8(Vec<i8>),
    U8(Vec<u8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    F32(Vec<f32>),
}

impl TypedValues {
    /// Number of decoded components.
    pub fn len(&self) -> usize {
        match self {
            Self::I8(v) => v.len(),
            Self::U8(v) => v.len(),
            Self::I16(v) => v.len(),
            Self::U16(v) => v.len(),
            Self::U32(v) => v.len(),
            Self::F32(v) => v.len(),
        }
    }

    /// Whether no components were decoded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read one component at `offset`, converting to f32 with optional
/// normalization. Works at any byte offset — no alignment requirement.
fn read_component(
    context: &str,
    bytes: &[u8],
    offset: usize,
    ctype: ComponentType,
    normalized: bool,
) -> Result<f32> {
    let size = ctype.byte_size();
    let end = offset + size;
    if end > bytes.len() {
        return Err(Error::Structural(format!(
            "{context}: accessor data ends at byte {end} but only {} bytes are available",
            bytes.len()
        )));
    }
    let raw = match ctype {
        ComponentType::I8 => bytes[offset] as i8 as f32,
        ComponentType::U8 => bytes[offset] as f32,
        ComponentType::I16 => i16::from_le_bytes([bytes[offset], bytes[offset + 1]]) as f32,
        ComponentType::U16 => u16::from_le_bytes([bytes[offset], bytes[offset + 1]]) as f32,
        ComponentType::U32 => {
            u32::from_le_bytes(bytes[offset..end].try_into().unwrap()) as f32
        }
        ComponentType::F32 => f32::from_le_bytes(bytes[offset..end].try_into().unwrap()),
    };
    if normalized && ctype != ComponentType::F32 {
        // signed types clamp at -1 so the most negative raw value stays in range
        Ok((raw / ctype.normalization_divider()).max(-1.0))
    } else {
        Ok(raw)
    }
}

/// Read one component as an unsigned integer index.
fn read_index(context: &str, bytes: &[u8], offset: usize, ctype: ComponentType) -> Result<u32> {
    let size = ctype.byte_size();
    let end = offset + size;
    if end > bytes.len() {
        return Err(Error::Structural(format!(
            "{context}: index data ends at byte {end} but only {} bytes are available",
            bytes.len()
        )));
    }
    match ctype {
        ComponentType::U8 => Ok(bytes[offset] as u32),
        ComponentType::U16 => Ok(u16::from_le_bytes([bytes[offset], bytes[offset + 1]]) as u32),
        ComponentType::U32 => Ok(u32::from_le_bytes(bytes[offset..end].try_into().unwrap())),
        other => Err(Error::value(context, format!("{other:?}"))),
    }
}

/// Walk `count` elements of `comps` components each, honoring stride and
/// normalization, into a fresh array.
#[allow(clippy::too_many_arguments)]
fn decode_elements(
    context: &str,
    bytes: &[u8],
    base_offset: usize,
    count: usize,
    comps: usize,
    ctype: ComponentType,
    stride: usize,
    normalized: bool,
    out: &mut Vec<f32>,
) -> Result<()> {
    out.reserve(count * comps);
    for i in 0..count {
        let element_offset = base_offset + i * stride;
        for c in 0..comps {
            let offset = element_offset + c * ctype.byte_size();
            out.push(read_component(context, bytes, offset, ctype, normalized)?);
        }
    }
    Ok(())
}

/// Bounding box from an accessor's declared `min`/`max`, when present.
///
/// For normalized integer accessors both bounds are divided by the type's
/// divider and clamped via `max(x / divider, -1.0)` — the max bound
/// included, matching observed reference behavior.
pub(crate) fn declared_bounding_box(accessor: &Accessor) -> Option<BoundingBox> {
    let min = accessor.min.as_ref()?;
    let max = accessor.max.as_ref()?;
    if min.len() < 3 || max.len() < 3 {
        return None;
    }
    let ctype = ComponentType::from_code("", accessor.component_type).ok()?;
    let adjust = |v: f32| {
        if accessor.normalized && ctype != ComponentType::F32 {
            (v / ctype.normalization_divider()).max(-1.0)
        } else {
            v
        }
    };
    Some(BoundingBox {
        min: [adjust(min[0]), adjust(min[1]), adjust(min[2])],
        max: [adjust(max[0]), adjust(max[1]), adjust(max[2])],
    })
}

impl LoadContext {
    /// Decode an accessor as a flat `f32` array, cached per accessor.
    pub async fn load_float_accessor(
        self: &Arc<Self>,
        context: &str,
        accessor_index: Option<u32>,
    ) -> Result<Arc<Vec<f32>>> {
        let accessor = indexed(context, &self.doc.accessors, accessor_index)?;
        let ctx = Arc::clone(self);
        let accessor = accessor.clone();
        self.float_accessors
            .get_or_try_init(accessor.index, move || async move {
                let data = ctx.decode_float_accessor(&accessor).await?;
                Ok(Arc::new(data))
            })
            .await
    }

    /// Decode an index accessor (`SCALAR` of an unsigned component type) as
    /// `u32` values, cached per accessor.
    pub async fn load_indices_accessor(
        self: &Arc<Self>,
        context: &str,
        accessor_index: Option<u32>,
    ) -> Result<Arc<Vec<u32>>> {
        let accessor = indexed(context, &self.doc.accessors, accessor_index)?;
        let ctx = Arc::clone(self);
        let accessor = accessor.clone();
        self.index_accessors
            .get_or_try_init(accessor.index, move || async move {
                let data = ctx.decode_indices_accessor(&accessor).await?;
                Ok(Arc::new(data))
            })
            .await
    }

    /// Decode an accessor in its source component type, cached per accessor.
    ///
    /// Extensions that need raw (unconverted) values re-enter through this.
    pub async fn load_typed_accessor(
        self: &Arc<Self>,
        context: &str,
        accessor_index: Option<u32>,
    ) -> Result<Arc<TypedValues>> {
        let accessor = indexed(context, &self.doc.accessors, accessor_index)?;
        let ctx = Arc::clone(self);
        let accessor = accessor.clone();
        self.typed_accessors
            .get_or_try_init(accessor.index, move || async move {
                let data = ctx.decode_typed_accessor(&accessor).await?;
                Ok(Arc::new(data))
            })
            .await
    }

    async fn decode_float_accessor(self: &Arc<Self>, accessor: &Accessor) -> Result<Vec<f32>> {
        let ptr = pointer("accessors", accessor.index);
        let ctype = ComponentType::from_code(
            &format!("{ptr}/componentType"),
            accessor.component_type,
        )?;
        let comps = num_components(&format!("{ptr}/type"), &accessor.element_type)?;
        let count = accessor.count as usize;

        let mut data = match accessor.buffer_view {
            // no data source: zero-filled array of the right length
            None => vec![0.0f32; count * comps],
            Some(_) => {
                let bytes = self
                    .load_buffer_view(&format!("{ptr}/bufferView"), accessor.buffer_view)
                    .await?;
                let view = indexed(&ptr, &self.doc.buffer_views, accessor.buffer_view)?;
                let tight = ctype.byte_size() * comps;
                let stride = view.byte_stride.map(|s| s as usize).unwrap_or(tight);
                let base_offset = accessor.byte_offset as usize;

                let mut out = Vec::new();
                let packed_f32 =
                    ctype == ComponentType::F32 && !accessor.normalized && stride == tight;
                if packed_f32 {
                    let end = base_offset + count * tight;
                    if end > bytes.len() {
                        return Err(Error::Structural(format!(
                            "{ptr}: accessor data ends at byte {end} but the buffer view has {} bytes",
                            bytes.len()
                        )));
                    }
                    let raw = &bytes.as_bytes()[base_offset..end];
                    match bytemuck::try_cast_slice::<u8, f32>(raw) {
                        Ok(floats) => out.extend_from_slice(floats),
                        // misaligned byte offset: copy element-wise instead
                        Err(_) => {
                            for chunk in raw.chunks_exact(4) {
                                out.push(f32::from_le_bytes(chunk.try_into().unwrap()));
                            }
                        }
                    }
                } else {
                    decode_elements(
                        &ptr,
                        bytes.as_bytes(),
                        base_offset,
                        count,
                        comps,
                        ctype,
                        stride,
                        accessor.normalized,
                        &mut out,
                    )?;
                }
                out
            }
        };

        if let Some(sparse) = &accessor.sparse {
            if sparse.count > 0 {
                self.apply_sparse_floats(accessor, sparse, ctype, comps, &mut data)
                    .await?;
            }
        }

        Ok(data)
    }

    /// Apply a sparse overlay: overwrite the base array at each sparse
    /// index's component block, in source order.
    async fn apply_sparse_floats(
        self: &Arc<Self>,
        accessor: &Accessor,
        sparse: &crate::document::Sparse,
        ctype: ComponentType,
        comps: usize,
        data: &mut [f32],
    ) -> Result<()> {
        let ptr = pointer("accessors", accessor.index);
        let sparse_count = sparse.count as usize;

        let indices_ptr = format!("{ptr}/sparse/indices");
        let indices_ctype = ComponentType::from_code(
            &format!("{indices_ptr}/componentType"),
            sparse.indices.component_type,
        )?;
        let index_bytes = self
            .load_buffer_view(&format!("{indices_ptr}/bufferView"), sparse.indices.buffer_view)
            .await?;
        let mut sparse_indices = Vec::with_capacity(sparse_count);
        for i in 0..sparse_count {
            let offset = sparse.indices.byte_offset as usize + i * indices_ctype.byte_size();
            sparse_indices.push(read_index(
                &indices_ptr,
                index_bytes.as_bytes(),
                offset,
                indices_ctype,
            )?);
        }

        let values_ptr = format!("{ptr}/sparse/values");
        let value_bytes = self
            .load_buffer_view(&format!("{values_ptr}/bufferView"), sparse.values.buffer_view)
            .await?;
        let mut values = Vec::new();
        decode_elements(
            &values_ptr,
            value_bytes.as_bytes(),
            sparse.values.byte_offset as usize,
            sparse_count,
            comps,
            ctype,
            ctype.byte_size() * comps,
            accessor.normalized,
            &mut values,
        )?;

        for (i, &element) in sparse_indices.iter().enumerate() {
            let dst = element as usize * comps;
            if dst + comps > data.len() {
                return Err(Error::Structural(format!(
                    "{indices_ptr}: sparse index {element} outside accessor of {} elements",
                    accessor.count
                )));
            }
            data[dst..dst + comps].copy_from_slice(&values[i * comps..(i + 1) * comps]);
        }
        Ok(())
    }

    async fn decode_indices_accessor(self: &Arc<Self>, accessor: &Accessor) -> Result<Vec<u32>> {
        let ptr = pointer("accessors", accessor.index);
        if accessor.element_type != "SCALAR" {
            return Err(Error::value(
                &format!("{ptr}/type"),
                &accessor.element_type,
            ));
        }
        let ctype = ComponentType::from_code(
            &format!("{ptr}/componentType"),
            accessor.component_type,
        )?;
        if !matches!(
            ctype,
            ComponentType::U8 | ComponentType::U16 | ComponentType::U32
        ) {
            return Err(Error::value(
                &format!("{ptr}/componentType"),
                accessor.component_type,
            ));
        }

        let count = accessor.count as usize;
        if accessor.buffer_view.is_none() {
            return Ok(vec![0u32; count]);
        }

        let bytes = self
            .load_buffer_view(&format!("{ptr}/bufferView"), accessor.buffer_view)
            .await?;
        let view = indexed(&ptr, &self.doc.buffer_views, accessor.buffer_view)?;
        let stride = view
            .byte_stride
            .map(|s| s as usize)
            .unwrap_or_else(|| ctype.byte_size());
        let base_offset = accessor.byte_offset as usize;

        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            out.push(read_index(
                &ptr,
                bytes.as_bytes(),
                base_offset + i * stride,
                ctype,
            )?);
        }
        Ok(out)
    }

    async fn decode_typed_accessor(self: &Arc<Self>, accessor: &Accessor) -> Result<TypedValues> {
        let ptr = pointer("accessors", accessor.index);
        let ctype = ComponentType::from_code(
            &format!("{ptr}/componentType"),
            accessor.component_type,
        )?;
        let comps = num_components(&format!("{ptr}/type"), &accessor.element_type)?;
        let count = accessor.count as usize;
        let total = count * comps;

        let (bytes, base_offset, stride) = match accessor.buffer_view {
            None => (None, 0usize, 0usize),
            Some(_) => {
                let bytes = self
                    .load_buffer_view(&format!("{ptr}/bufferView"), accessor.buffer_view)
                    .await?;
                let view = indexed(&ptr, &self.doc.buffer_views, accessor.buffer_view)?;
                let tight = ctype.byte_size() * comps;
                let stride = view.byte_stride.map(|s| s as usize).unwrap_or(tight);
                (Some(bytes), accessor.byte_offset as usize, stride)
            }
        };

        macro_rules! decode_raw {
            ($variant:ident, $elem:ty, $read:expr) => {{
                let mut out: Vec<$elem> = Vec::with_capacity(total);
                match &bytes {
                    None => out.resize(total, 0 as $elem),
                    Some(bytes) => {
                        let bytes = bytes.as_bytes();
                        for i in 0..count {
                            for c in 0..comps {
                                let offset =
                                    base_offset + i * stride + c * ctype.byte_size();
                                let end = offset + ctype.byte_size();
                                if end > bytes.len() {
                                    return Err(Error::Structural(format!(
                                        "{ptr}: accessor data ends at byte {end} but only {} bytes are available",
                                        bytes.len()
                                    )));
                                }
                                #[allow(clippy::redundant_closure_call)]
                                out.push(($read)(bytes, offset));
                            }
                        }
                    }
                }
                TypedValues::$variant(out)
            }};
        }

        Ok(match ctype {
            ComponentType::I8 => decode_raw!(I8, i8, |b: &[u8], o: usize| b[o] as i8),
            ComponentType::U8 => decode_raw!(U8, u8, |b: &[u8], o: usize| b[o]),
            ComponentType::I16 => decode_raw!(I16, i16, |b: &[u8], o: usize| i16::from_le_bytes(
                [b[o], b[o + 1]]
            )),
            ComponentType::U16 => decode_raw!(U16, u16, |b: &[u8], o: usize| u16::from_le_bytes(
                [b[o], b[o + 1]]
            )),
            ComponentType::U32 => decode_raw!(U32, u32, |b: &[u8], o: usize| u32::from_le_bytes(
                b[o..o + 4].try_into().unwrap()
            )),
            ComponentType::F32 => decode_raw!(F32, f32, |b: &[u8], o: usize| f32::from_le_bytes(
                b[o..o + 4].try_into().unwrap()
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_type_codes() {
        assert_eq!(
            ComponentType::from_code("/a", 5126).unwrap(),
            ComponentType::F32
        );
        assert_eq!(
            ComponentType::from_code("/a", 5121).unwrap(),
            ComponentType::U8
        );
        assert!(ComponentType::from_code("/a", 5124).is_err());
    }

    #[test]
    fn component_counts() {
        assert_eq!(num_components("/t", "SCALAR").unwrap(), 1);
        assert_eq!(num_components("/t", "VEC3").unwrap(), 3);
        assert_eq!(num_components("/t", "MAT2").unwrap(), 4);
        assert_eq!(num_components("/t", "MAT3").unwrap(), 9);
        assert_eq!(num_components("/t", "MAT4").unwrap(), 16);
        assert!(num_components("/t", "VEC5").is_err());
    }

    #[test]
    fn normalized_unsigned_byte() {
        let bytes = [255u8, 0, 128];
        let max = read_component("/a", &bytes, 0, ComponentType::U8, true).unwrap();
        let zero = read_component("/a", &bytes, 1, ComponentType::U8, true).unwrap();
        assert!((max - 1.0).abs() < 1e-6);
        assert!(zero.abs() < 1e-6);
    }

    #[test]
    fn normalized_signed_byte_clamps_most_negative() {
        let bytes = [0x80u8]; // -128
        let v = read_component("/a", &bytes, 0, ComponentType::I8, true).unwrap();
        assert_eq!(v, -1.0);
    }

    #[test]
    fn read_component_at_misaligned_offset() {
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(&1.5f32.to_le_bytes());
        let v = read_component("/a", &bytes, 1, ComponentType::F32, false).unwrap();
        assert_eq!(v, 1.5);
    }

    #[test]
    fn read_component_out_of_range() {
        let bytes = [0u8, 1];
        assert!(read_component("/a", &bytes, 1, ComponentType::F32, false).is_err());
    }

    #[test]
    fn declared_bounds_normalized() {
        let accessor = Accessor {
            component_type: 5121, // u8
            normalized: true,
            element_type: "VEC3".into(),
            min: Some(vec![0.0, 0.0, 0.0]),
            max: Some(vec![255.0, 255.0, 255.0]),
            count: 1,
            ..Default::default()
        };
        let bounds = declared_bounding_box(&accessor).unwrap();
        assert_eq!(bounds.min, [0.0, 0.0, 0.0]);
        assert_eq!(bounds.max, [1.0, 1.0, 1.0]);
    }

    #[test]
    fn declared_bounds_absent() {
        let accessor = Accessor {
            component_type: 5126,
            element_type: "VEC3".into(),
            ..Default::default()
        };
        assert!(declared_bounding_box(&accessor).is_none());
    }
}
