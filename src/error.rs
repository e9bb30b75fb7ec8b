//! Error types for scene-graph loading.

/// Errors that can occur while resolving a glTF document.
///
/// Fatal errors reject the whole load; conditions the loader can route
/// around are logged as warnings instead and never surface here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An index reference points outside its array or to a missing array.
    ///
    /// The context is the JSON pointer of the referencing property.
    #[error("{context}: Failed to find index ({index})")]
    Reference {
        /// JSON pointer of the referencing property.
        context: String,
        /// The offending index, or `undefined` when the reference is absent.
        index: String,
    },

    /// The document violates a structural invariant the loader cannot
    /// route around (mismatched morph target counts, missing attributes).
    #[error("{0}")]
    Structural(String),

    /// A node was visited again while already instantiated.
    #[error("{context}: invalid recursive node hierarchy")]
    Cycle {
        /// JSON pointer of the re-entered node.
        context: String,
    },

    /// An enumerated field holds a value outside its recognized set.
    #[error("{context}: invalid value ({value})")]
    Value {
        /// JSON pointer of the offending property.
        context: String,
        /// The unrecognized value.
        value: String,
    },

    /// A URI failed validation before any fetch was attempted.
    #[error("{context}: invalid uri ({uri})")]
    Uri {
        /// JSON pointer of the referencing property.
        context: String,
        /// The rejected URI.
        uri: String,
    },

    /// A resource fetch failed.
    #[error("{context}: failed to load {uri}: {message}")]
    Load {
        /// JSON pointer of the referencing property.
        context: String,
        /// The URI (or pseudo-URI) that failed.
        uri: String,
        /// Collaborator-provided failure detail.
        message: String,
    },

    /// The document requires an extension that is not registered or enabled.
    #[error("required extension {0} is not available")]
    RequiredExtension(String),

    /// The loader was disposed while the load was in flight.
    #[error("loader was disposed")]
    Disposed,
}

impl Error {
    /// Reference failure for an absent or out-of-range index.
    pub(crate) fn reference(context: &str, index: impl std::fmt::Display) -> Self {
        Self::Reference {
            context: context.to_string(),
            index: index.to_string(),
        }
    }

    /// Value failure for an unrecognized enumerated field.
    pub(crate) fn value(context: &str, value: impl std::fmt::Display) -> Self {
        Self::Value {
            context: context.to_string(),
            value: value.to_string(),
        }
    }

    /// Load failure annotated with context and URI.
    pub(crate) fn load(context: &str, uri: &str, message: impl std::fmt::Display) -> Self {
        Self::Load {
            context: context.to_string(),
            uri: uri.to_string(),
            message: message.to_string(),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_message_format() {
        let err = Error::reference("/nodes/0/mesh", 7);
        assert_eq!(err.to_string(), "/nodes/0/mesh: Failed to find index (7)");

        let err = Error::reference("/skins/0/joints/1", "undefined");
        assert_eq!(
            err.to_string(),
            "/skins/0/joints/1: Failed to find index (undefined)"
        );
    }
}
