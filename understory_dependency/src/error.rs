// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types.
//!
//! Every fallible operation in this crate reports an [`Error`]. Errors are
//! grouped by [`ErrorKind`]:
//!
//! - [`ErrorKind::InvalidArgument`]: ill-typed or unrecognized input.
//! - [`ErrorKind::AccessDenied`]: a read-only property was written without
//!   its write key.
//! - [`ErrorKind::InvalidOperation`]: structural misuse, such as reusing a
//!   consumed expression.
//!
//! Absence is never an error. Looking up a property that has no local value,
//! removing a dependent that is not registered, or finding a dead weak
//! reference are all reported through `bool`/`Option` results.
//!
//! A failed operation leaves the object it was called on unchanged.

/// Broad classification of an [`Error`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A required input was ill-typed or not recognized.
    InvalidArgument,
    /// A read-only property was written without the matching write key.
    AccessDenied,
    /// The operation is not valid in the current state.
    InvalidOperation,
}

/// Errors reported by the dependency property system.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The class does not derive from the dependency object root class.
    #[error("`{class}` is not a dependency object class")]
    NotAParticipant {
        /// Name of the offending class.
        class: &'static str,
    },

    /// A value of the wrong type was supplied for a property.
    #[error("property `{property}` expects a value of type `{expected}`, got `{found}`")]
    ValueTypeMismatch {
        /// Name of the property.
        property: &'static str,
        /// Name of the property's value type.
        expected: &'static str,
        /// Name of the supplied value's type.
        found: &'static str,
    },

    /// The property's validation callback rejected the value.
    #[error("value is not valid for property `{property}`")]
    InvalidValue {
        /// Name of the property.
        property: &'static str,
    },

    /// A property with this name is already registered on the owner type.
    #[error("property `{property}` is already registered on `{owner}`")]
    DuplicateProperty {
        /// Name of the property.
        property: &'static str,
        /// Name of the owner class.
        owner: &'static str,
    },

    /// Metadata can only be overridden for a subclass of the owner type.
    #[error("`{class}` is not a subclass of `{owner}`, the owner of `{property}`")]
    NotASubclass {
        /// Name of the property.
        property: &'static str,
        /// Name of the owner class.
        owner: &'static str,
        /// Name of the class that was passed in.
        class: &'static str,
    },

    /// The property already has overridden metadata for this type.
    #[error("metadata for `{property}` is already overridden on `{class}`")]
    MetadataAlreadyOverridden {
        /// Name of the property.
        property: &'static str,
        /// Name of the class.
        class: &'static str,
    },

    /// The property is read-only and no write key was presented.
    #[error("property `{property}` is read-only")]
    ReadOnly {
        /// Name of the property.
        property: &'static str,
    },

    /// The presented write key belongs to a different property.
    #[error("write key for `{key}` cannot write property `{property}`")]
    WriteKeyMismatch {
        /// Name of the property being written.
        property: &'static str,
        /// Name of the property the key belongs to.
        key: &'static str,
    },

    /// The expression was already consumed by another slot.
    #[error("expression is not shareable and has already been attached")]
    ExpressionNotAttachable,

    /// Sources of shareable expressions cannot change.
    #[error("cannot change the sources of a shareable expression")]
    SharedExpressionSources,

    /// The expression is not attached to the given slot.
    #[error("expression is not attached to property `{property}`")]
    ExpressionNotAttached {
        /// Name of the property.
        property: &'static str,
    },

    /// A dependency source lives in a different affinity context.
    #[error("source `{source_property}` belongs to a different context than the target of `{property}`")]
    CrossContextSource {
        /// Name of the target property.
        property: &'static str,
        /// Name of the source property.
        source_property: &'static str,
    },

    /// The process-wide property id space is exhausted.
    #[error("too many properties registered (max {max})")]
    TooManyProperties {
        /// Maximum number of properties.
        max: usize,
    },
}

impl Error {
    /// Returns the broad classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotAParticipant { .. }
            | Self::ValueTypeMismatch { .. }
            | Self::InvalidValue { .. }
            | Self::DuplicateProperty { .. }
            | Self::NotASubclass { .. }
            | Self::MetadataAlreadyOverridden { .. } => ErrorKind::InvalidArgument,
            Self::ReadOnly { .. } | Self::WriteKeyMismatch { .. } => ErrorKind::AccessDenied,
            Self::ExpressionNotAttachable
            | Self::SharedExpressionSources
            | Self::ExpressionNotAttached { .. }
            | Self::CrossContextSource { .. }
            | Self::TooManyProperties { .. } => ErrorKind::InvalidOperation,
        }
    }
}

/// Result type used throughout this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
