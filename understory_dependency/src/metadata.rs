// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Property metadata definitions.
//!
//! This module provides [`PropertyMetadata`] for storing property configuration
//! and [`PropertyMetadataBuilder`] for ergonomic construction.


use crate::object::{DependencyObject, PropertyChange};
use crate::value::PropertyValue;

/// Callback invoked after the effective value of a property changes.
pub type PropertyChangedCallback = Box<dyn Fn(&DependencyObject, &PropertyChange) + Send + Sync>;

/// Callback for coercing a property value before it's stored.
///
/// This can be used to clamp values, validate ranges, etc.
/// The callback receives the proposed value and returns the coerced value.
pub type CoerceValueCallback<T> = Box<dyn Fn(T) -> T + Send + Sync>;

/// Callback deciding whether a proposed value is acceptable at all.
pub type ValidateValueCallback<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Callback producing a per-instance default value.
pub type DefaultValueFactory<T> = Box<dyn Fn(&DependencyObject) -> T + Send + Sync>;

/// Metadata for a dependency property.
///
/// This contains the configuration for a property including its default value,
/// whether it inherits, and optional callbacks.
///
/// # Example
///
/// ```rust
/// use understory_dependency::PropertyMetadataBuilder;
///
/// let metadata = PropertyMetadataBuilder::new(100.0_f64)
///     .inherits(true)
///     .validate(|v| v.is_finite())
///     .build();
///
/// assert_eq!(metadata.default_value(), &100.0);
/// assert!(metadata.inherits());
/// assert!(!metadata.is_valid(&f64::NAN));
/// ```
pub struct PropertyMetadata<T: PropertyValue> {
    default_value: T,
    inherits: bool,
    changed_callback: Option<PropertyChangedCallback>,
    coerce_callback: Option<CoerceValueCallback<T>>,
    validate_callback: Option<ValidateValueCallback<T>>,
    default_factory: Option<DefaultValueFactory<T>>,
}

impl<T: PropertyValue> PropertyMetadata<T> {
    /// Creates new property metadata with the given default value.
    ///
    /// All other fields use their defaults: no inheritance, no callbacks.
    #[must_use]
    pub fn new(default_value: T) -> Self {
        PropertyMetadataBuilder::new(default_value).build()
    }

    /// Returns a reference to the default value.
    ///
    /// When a [default factory](PropertyMetadataBuilder::default_factory) is
    /// set, objects get their default from the factory instead.
    #[must_use]
    #[inline]
    pub fn default_value(&self) -> &T {
        &self.default_value
    }

    /// Returns whether this property inherits from parent objects.
    #[must_use]
    #[inline]
    pub fn inherits(&self) -> bool {
        self.inherits
    }

    /// Invokes the changed callback if one is set.
    #[inline]
    pub fn on_changed(&self, owner: &DependencyObject, change: &PropertyChange) {
        if let Some(callback) = &self.changed_callback {
            callback(owner, change);
        }
    }

    /// Coerces a value using the coerce callback if one is set.
    #[inline]
    pub fn coerce(&self, value: T) -> T {
        if let Some(callback) = &self.coerce_callback {
            callback(value)
        } else {
            value
        }
    }

    /// Returns `true` unless the validation callback rejects `value`.
    #[inline]
    pub fn is_valid(&self, value: &T) -> bool {
        self.validate_callback
            .as_ref()
            .is_none_or(|callback| callback(value))
    }

    /// Returns whether defaults are produced per instance by a factory.
    #[must_use]
    #[inline]
    pub fn has_default_factory(&self) -> bool {
        self.default_factory.is_some()
    }

    /// Produces the default value for `owner`.
    ///
    /// Calls the default factory if one is set, otherwise clones the shared
    /// default value.
    #[must_use]
    pub fn create_default(&self, owner: &DependencyObject) -> T {
        match &self.default_factory {
            Some(factory) => factory(owner),
            None => self.default_value.clone(),
        }
    }

    /// Returns whether a changed callback is set.
    #[must_use]
    #[inline]
    pub fn has_changed_callback(&self) -> bool {
        self.changed_callback.is_some()
    }

    /// Returns whether a coerce callback is set.
    #[must_use]
    #[inline]
    pub fn has_coerce_callback(&self) -> bool {
        self.coerce_callback.is_some()
    }
}

// Manual Debug impl since callbacks aren't Debug
impl<T: PropertyValue + std::fmt::Debug> std::fmt::Debug for PropertyMetadata<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyMetadata")
            .field("default_value", &self.default_value)
            .field("inherits", &self.inherits)
            .field("has_changed_callback", &self.changed_callback.is_some())
            .field("has_coerce_callback", &self.coerce_callback.is_some())
            .field("has_validate_callback", &self.validate_callback.is_some())
            .field("has_default_factory", &self.default_factory.is_some())
            .finish()
    }
}

/// Builder for [`PropertyMetadata`].
///
/// # Example
///
/// ```rust
/// use understory_dependency::PropertyMetadataBuilder;
///
/// let metadata = PropertyMetadataBuilder::new(0.0_f64)
///     .inherits(true)
///     .coerce(|v| v.clamp(0.0, 100.0))
///     .build();
///
/// assert_eq!(metadata.coerce(150.0), 100.0);
/// ```
pub struct PropertyMetadataBuilder<T: PropertyValue> {
    metadata: PropertyMetadata<T>,
}

// Manual Debug impl since callbacks aren't Debug
impl<T: PropertyValue + std::fmt::Debug> std::fmt::Debug for PropertyMetadataBuilder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyMetadataBuilder")
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl<T: PropertyValue> PropertyMetadataBuilder<T> {
    /// Creates a new builder with the given default value.
    #[must_use]
    pub fn new(default_value: T) -> Self {
        Self {
            metadata: PropertyMetadata {
                default_value,
                inherits: false,
                changed_callback: None,
                coerce_callback: None,
                validate_callback: None,
                default_factory: None,
            },
        }
    }

    /// Sets whether this property inherits from parent objects.
    ///
    /// When `true`, reading a property that has no value on the object
    /// walks up the parent chain before falling back to the default.
    #[must_use]
    pub fn inherits(mut self, inherits: bool) -> Self {
        self.metadata.inherits = inherits;
        self
    }

    /// Sets a callback to be invoked when the effective value changes.
    #[must_use]
    pub fn on_changed<F>(mut self, callback: F) -> Self
    where
        F: Fn(&DependencyObject, &PropertyChange) + Send + Sync + 'static,
    {
        self.metadata.changed_callback = Some(Box::new(callback));
        self
    }

    /// Sets a callback to coerce values before they are stored.
    #[must_use]
    pub fn coerce<F>(mut self, callback: F) -> Self
    where
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        self.metadata.coerce_callback = Some(Box::new(callback));
        self
    }

    /// Sets a callback that rejects invalid values outright.
    ///
    /// Rejected writes fail with [`Error::InvalidValue`](crate::Error::InvalidValue)
    /// and leave the object unchanged.
    #[must_use]
    pub fn validate<F>(mut self, callback: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.metadata.validate_callback = Some(Box::new(callback));
        self
    }

    /// Produces defaults per instance instead of sharing one value.
    ///
    /// Use this for defaults that are expensive to build or that each object
    /// must own. The factory runs lazily, the first time an object actually
    /// reads its default, and the result is cached on that object.
    #[must_use]
    pub fn default_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&DependencyObject) -> T + Send + Sync + 'static,
    {
        self.metadata.default_factory = Some(Box::new(factory));
        self
    }

    /// Builds the [`PropertyMetadata`].
    #[must_use]
    pub fn build(self) -> PropertyMetadata<T> {
        self.metadata
    }
}
