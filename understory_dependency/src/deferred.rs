// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Deferred values.
//!
//! A [`DeferredReference`] stands in for a value that is expensive to
//! produce. It is parked in an object's store and only computed when the
//! property system actually needs the value, at which point the store keeps
//! the concrete result instead.

use std::any::TypeId;
use std::fmt;

use crate::id::DependencyProperty;
use crate::object::{DependencyObject, WeakDependencyObject};
use crate::registry::ErasedMetadata;
use crate::store::BaseValueSource;
use crate::value::{ErasedValue, PropertyValue};

/// A lazily computed property value.
///
/// Implementations compute a fresh value on every call to
/// [`value`](Self::value); callers are responsible for caching the result.
pub trait DeferredReference {
    /// Computes the value.
    ///
    /// `source` is the base value source of the slot being read.
    fn value(&self, source: BaseValueSource) -> ErasedValue;

    /// Returns the type of the value [`value`](Self::value) will produce,
    /// without computing it.
    fn value_type(&self) -> TypeId;
}

/// A deferred per-instance default, produced by the property's
/// [default factory](crate::PropertyMetadataBuilder::default_factory).
pub struct DeferredMutableDefaultReference {
    owner: WeakDependencyObject,
    property: DependencyProperty,
    metadata: &'static dyn ErasedMetadata,
}

impl DeferredMutableDefaultReference {
    /// Creates a reference to the default of `property` on `owner`.
    ///
    /// The metadata in effect for `owner`'s type is captured now.
    #[must_use]
    pub fn new(owner: &DependencyObject, property: DependencyProperty) -> Self {
        Self {
            owner: owner.downgrade(),
            property,
            metadata: property.metadata_for(owner.dependency_object_type()),
        }
    }

    /// Returns the property whose default this produces.
    #[must_use]
    pub fn property(&self) -> DependencyProperty {
        self.property
    }
}

impl DeferredReference for DeferredMutableDefaultReference {
    fn value(&self, _source: BaseValueSource) -> ErasedValue {
        // The reference does not keep its owner alive; once the owner is gone
        // only the shared default remains meaningful.
        match self.owner.upgrade() {
            Some(owner) => self.metadata.create_default(&owner),
            None => self.metadata.default_value(),
        }
    }

    fn value_type(&self) -> TypeId {
        self.property.value_type()
    }
}

impl fmt::Debug for DeferredMutableDefaultReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredMutableDefaultReference")
            .field("property", &self.property.name())
            .field("owner_alive", &self.owner.upgrade().is_some())
            .finish_non_exhaustive()
    }
}

/// A deferred value computed by a closure.
///
/// # Example
///
/// ```rust
/// use understory_dependency::{BaseValueSource, DeferredReference, DeferredValue};
///
/// let deferred = DeferredValue::new(|| 6 * 7);
/// assert_eq!(
///     deferred.value(BaseValueSource::Local).get::<i32>(),
///     Some(42)
/// );
/// ```
pub struct DeferredValue<T> {
    compute: Box<dyn Fn() -> T>,
}

impl<T: PropertyValue> DeferredValue<T> {
    /// Creates a deferred value that runs `compute` when read.
    pub fn new(compute: impl Fn() -> T + 'static) -> Self {
        Self {
            compute: Box::new(compute),
        }
    }
}

impl<T: PropertyValue> DeferredReference for DeferredValue<T> {
    fn value(&self, _source: BaseValueSource) -> ErasedValue {
        ErasedValue::new((self.compute)())
    }

    fn value_type(&self) -> TypeId {
        TypeId::of::<T>()
    }
}

impl<T> fmt::Debug for DeferredValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredValue")
            .field("type", &std::any::type_name::<T>())
            .finish_non_exhaustive()
    }
}
