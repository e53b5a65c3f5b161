#![forbid(unsafe_code)]

//! Usage errors raised by the property graph.
//!
//! Graph-consistency problems (an unknown subscriber id during fan-out, a
//! double delete in the registry) are not errors: they are logged and the
//! offending item is skipped. Everything in [`StateError`] is a programming
//! mistake at the call site and is returned immediately.

use thiserror::Error;

use crate::property::PropertyKind;

pub type Result<T> = std::result::Result<T, StateError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// A two-way link cannot be derived from a one-way copy.
    #[error("can not create a 'Link' from a 'Prop' property ({info})")]
    LinkFromProp { info: String },

    /// Only subscribing one-way props may spawn further props.
    #[error("can not create a 'Prop' from a non-subscribing 'Prop' property ({info})")]
    PropFromProp { info: String },

    /// One-way copy-by-value sync is undefined for object state.
    #[error("creating a 'Prop' is unsupported for object-typed property '{info}'")]
    PropFromObject { info: String },

    /// The property variant does not support the requested derivation.
    #[error("{operation} is not supported for a {kind:?} property ({info})")]
    Unsupported {
        kind: PropertyKind,
        operation: &'static str,
        info: String,
    },

    #[error("duplicate provided variable '{name}': already provided by this view or an ancestor")]
    DuplicateProvide { name: String },

    #[error("missing provided variable '{name}': can not resolve consume")]
    MissingProvide { name: String },

    /// A type-erased lookup (provide/consume, store key) found a property of
    /// a different value type.
    #[error("property '{name}' does not hold a value of type {expected}")]
    TypeMismatch { name: String, expected: &'static str },

    #[error("no property named '{name}'")]
    UnknownProperty { name: String },
}

impl StateError {
    #[must_use]
    pub fn unsupported(kind: PropertyKind, operation: &'static str, info: impl Into<String>) -> Self {
        Self::Unsupported {
            kind,
            operation,
            info: info.into(),
        }
    }

    #[must_use]
    pub fn type_mismatch<T>(name: impl Into<String>) -> Self {
        Self::TypeMismatch {
            name: name.into(),
            expected: std::any::type_name::<T>(),
        }
    }

    #[must_use]
    pub fn unknown(name: impl Into<String>) -> Self {
        Self::UnknownProperty { name: name.into() }
    }
}
