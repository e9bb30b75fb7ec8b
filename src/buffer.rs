//! Buffer and buffer-view resolution.
//!
//! A buffer resolves to its full byte content exactly once per load — by
//! decoding a data URI, delegating an external URI to the [`UriLoader`]
//! collaborator, or slicing the document's embedded binary chunk. Every
//! consumer receives a [`ByteSlice`] range view into the cached bytes;
//! nothing is ever re-fetched.

use std::ops::Deref;
use std::sync::Arc;

use crate::document::{indexed, pointer};
use crate::error::{Error, Result};
use crate::extension::Step;
use crate::io;
use crate::loader::LoadContext;

/// A cheap, shareable byte range over resolved buffer content.
#[derive(Clone)]
pub struct ByteSlice {
    data: Arc<Vec<u8>>,
    offset: usize,
    len: usize,
}

impl ByteSlice {
    /// View over the entire backing allocation.
    pub fn whole(data: Arc<Vec<u8>>) -> Self {
        let len = data.len();
        Self {
            data,
            offset: 0,
            len,
        }
    }

    /// Narrow this view to a sub-range, bounds-checked against it.
    pub fn view(&self, context: &str, offset: u64, len: u64) -> Result<Self> {
        let offset = offset as usize;
        let len = len as usize;
        let end = offset.checked_add(len).unwrap_or(usize::MAX);
        if end > self.len {
            return Err(Error::Structural(format!(
                "{context}: byte range {offset}..{end} outside data of length {}",
                self.len
            )));
        }
        Ok(Self {
            data: Arc::clone(&self.data),
            offset: self.offset + offset,
            len,
        })
    }

    /// The viewed bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.len]
    }

    /// Length of the view in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the view is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Deref for ByteSlice {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl std::fmt::Debug for ByteSlice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ByteSlice({} bytes at {})", self.len, self.offset)
    }
}

impl LoadContext {
    /// Fetch raw bytes for a URI: inline data URI, or via the configured
    /// [`UriLoader`](crate::io::UriLoader) after URL preprocessing.
    pub async fn load_uri_bytes(
        self: &Arc<Self>,
        context: &str,
        uri: &str,
    ) -> Result<Vec<u8>> {
        if let Some(result) = self
            .dispatch(context, Step::Uri, |ext| ext.load_uri(self, context, uri))
            .await
        {
            return result;
        }

        io::validate_uri(context, uri)?;
        if io::is_data_uri(uri) {
            return io::parse_data_uri(uri)
                .ok_or_else(|| Error::load(context, uri, "invalid base64 payload"));
        }

        let loader = self
            .options
            .uri_loader
            .clone()
            .ok_or_else(|| Error::load(context, uri, "no uri loader configured"))?;
        let url = loader.preprocess_url(uri.to_string()).await?;
        loader.load_uri(&url).await.map_err(|e| match e {
            Error::Load { message, .. } => Error::load(context, uri, message),
            other => Error::load(context, uri, other),
        })
    }

    /// Resolve a byte range of a logical buffer.
    ///
    /// The full buffer content is fetched and cached on first access;
    /// concurrent requesters share the in-flight resolution.
    pub async fn load_buffer(
        self: &Arc<Self>,
        context: &str,
        buffer_index: Option<u32>,
        byte_offset: u64,
        byte_length: u64,
    ) -> Result<ByteSlice> {
        let buffer = indexed(context, &self.doc.buffers, buffer_index)?;
        let ptr = pointer("buffers", buffer.index);

        if let Some(result) = self
            .dispatch(&ptr, Step::Buffer, |ext| ext.load_buffer(self, &ptr, buffer))
            .await
        {
            return result?.view(context, byte_offset, byte_length);
        }

        let ctx = Arc::clone(self);
        let uri = buffer.uri.clone();
        let declared = buffer.byte_length;
        let buffer_ptr = ptr.clone();
        let whole = self
            .buffers
            .get_or_try_init(buffer.index, move || async move {
                match uri {
                    Some(uri) => {
                        let uri_ptr = format!("{buffer_ptr}/uri");
                        let bytes = ctx.load_uri_bytes(&uri_ptr, &uri).await?;
                        Ok(ByteSlice::whole(Arc::new(bytes)))
                    }
                    None => {
                        let bin = ctx.bin.clone().ok_or_else(|| {
                            Error::load(
                                &buffer_ptr,
                                "<embedded>",
                                "buffer has no uri and no embedded chunk is present",
                            )
                        })?;
                        // chunk may be padded or (within tolerance) short
                        let len = (declared as usize).min(bin.len());
                        ByteSlice::whole(bin).view(&buffer_ptr, 0, len as u64)
                    }
                }
            })
            .await?;

        whole.view(context, byte_offset, byte_length)
    }

    /// Resolve a bufferView into its byte range, cached per view index.
    pub async fn load_buffer_view(
        self: &Arc<Self>,
        context: &str,
        view_index: Option<u32>,
    ) -> Result<ByteSlice> {
        let view = indexed(context, &self.doc.buffer_views, view_index)?;
        let ptr = pointer("bufferViews", view.index);

        if let Some(result) = self
            .dispatch(&ptr, Step::BufferView, |ext| {
                ext.load_buffer_view(self, &ptr, view)
            })
            .await
        {
            return result;
        }

        let ctx = Arc::clone(self);
        let view = view.clone();
        let view_ptr = ptr.clone();
        self.buffer_views
            .get_or_try_init(view.index, move || async move {
                ctx.load_buffer(
                    &format!("{view_ptr}/buffer"),
                    view.buffer,
                    view.byte_offset,
                    view.byte_length,
                )
                .await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_slice_views() {
        let data = Arc::new(vec![0u8, 1, 2, 3, 4, 5, 6, 7]);
        let whole = ByteSlice::whole(Arc::clone(&data));
        assert_eq!(whole.len(), 8);

        let mid = whole.view("/test", 2, 4).unwrap();
        assert_eq!(mid.as_bytes(), &[2, 3, 4, 5]);

        let nested = mid.view("/test", 1, 2).unwrap();
        assert_eq!(nested.as_bytes(), &[3, 4]);

        assert!(whole.view("/test", 6, 4).is_err());
        assert!(mid.view("/test", 0, 5).is_err());
    }
}
