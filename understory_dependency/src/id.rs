// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Property identification types.
//!
//! This module provides [`PropertyId`], the dense process-wide index of a
//! registered property, the erased handle [`DependencyProperty`], the typed
//! handle [`Property<T>`], and the write-key capability
//! ([`PropertyWriteKey<T>`] / [`DependencyPropertyKey`]) that gates writes to
//! read-only properties.

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::error::Result;
use crate::metadata::PropertyMetadata;
use crate::registry::{ErasedMetadata, PropertyRegistration};
use crate::type_identity::{DependencyObjectType, ObjectClass};
use crate::value::PropertyValue;

/// A runtime property identifier.
///
/// This is a lightweight handle (u16) that uniquely identifies a property for
/// the lifetime of the process. It is the key of every per-object
/// [`EffectiveValueStore`](crate::EffectiveValueStore).
///
/// # Example
///
/// ```rust
/// use understory_dependency::PropertyId;
///
/// let id = PropertyId::new(42);
/// assert_eq!(id.index(), 42);
/// ```
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PropertyId(u16);

impl PropertyId {
    /// Creates a new property ID from the given index.
    ///
    /// This is typically called by [`PropertyRegistry::register`](crate::PropertyRegistry::register)
    /// rather than directly.
    #[must_use]
    #[inline]
    pub const fn new(index: u16) -> Self {
        Self(index)
    }

    /// Returns the underlying index of this property ID.
    #[must_use]
    #[inline]
    pub const fn index(self) -> u16 {
        self.0
    }
}

impl fmt::Debug for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PropertyId").field(&self.0).finish()
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyId({})", self.0)
    }
}

/// An untyped handle to a registered property.
///
/// Handles are `Copy` and compare by [`PropertyId`]. They are used wherever
/// the value type is not statically known, such as in dependency sources and
/// change notifications.
#[derive(Copy, Clone)]
pub struct DependencyProperty {
    registration: &'static PropertyRegistration,
}

impl DependencyProperty {
    pub(crate) fn from_registration(registration: &'static PropertyRegistration) -> Self {
        Self { registration }
    }

    /// Returns the process-wide id of this property.
    #[must_use]
    #[inline]
    pub fn id(self) -> PropertyId {
        self.registration.id()
    }

    /// Returns the property name.
    #[must_use]
    #[inline]
    pub fn name(self) -> &'static str {
        self.registration.name()
    }

    /// Returns the type that registered this property.
    #[must_use]
    #[inline]
    pub fn owner_type(self) -> &'static DependencyObjectType {
        self.registration.owner()
    }

    /// Returns the [`TypeId`] of the property's value type.
    #[must_use]
    #[inline]
    pub fn value_type(self) -> TypeId {
        self.registration.value_type()
    }

    /// Returns the name of the property's value type.
    #[must_use]
    #[inline]
    pub fn value_type_name(self) -> &'static str {
        self.registration.value_type_name()
    }

    /// Returns `true` if writing this property requires its write key.
    #[must_use]
    #[inline]
    pub fn is_read_only(self) -> bool {
        self.registration.is_read_only()
    }

    /// Returns `true` if the property inherits values from ancestors on `ty`.
    #[must_use]
    pub fn inherits_on(self, ty: &'static DependencyObjectType) -> bool {
        self.metadata_for(ty).inherits()
    }

    pub(crate) fn metadata_for(self, ty: &'static DependencyObjectType) -> &'static dyn ErasedMetadata {
        self.registration.metadata_for(ty)
    }
}

impl PartialEq for DependencyProperty {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for DependencyProperty {}

impl Hash for DependencyProperty {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for DependencyProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyProperty")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("owner", &self.owner_type().name())
            .finish()
    }
}

/// A type-safe property key with phantom type for compile-time checking.
///
/// This wraps a [`DependencyProperty`] with a phantom type parameter `T` that
/// represents the property's value type. This enables compile-time type safety
/// when getting and setting property values.
///
/// # Type Safety
///
/// ```rust
/// use understory_dependency::{
///     DEPENDENCY_OBJECT, ObjectClass, Property, PropertyMetadataBuilder, PropertyRegistry,
/// };
///
/// static WIDGET: ObjectClass = ObjectClass::new("Widget", Some(&DEPENDENCY_OBJECT));
///
/// let width: Property<f64> = PropertyRegistry::global()
///     .register("Width", &WIDGET, PropertyMetadataBuilder::new(0.0_f64).build())
///     .unwrap();
///
/// // object.set_value(width, "not a number"); // Would not compile!
/// assert_eq!(width.name(), "Width");
/// ```
pub struct Property<T> {
    inner: DependencyProperty,
    _marker: PhantomData<fn() -> T>,
}

impl<T: PropertyValue> Property<T> {
    pub(crate) fn from_untyped(inner: DependencyProperty) -> Self {
        debug_assert_eq!(inner.value_type(), TypeId::of::<T>());
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    /// Returns the untyped handle.
    #[must_use]
    #[inline]
    pub fn untyped(self) -> DependencyProperty {
        self.inner
    }

    /// Returns the process-wide id of this property.
    #[must_use]
    #[inline]
    pub fn id(self) -> PropertyId {
        self.inner.id()
    }

    /// Returns the property name.
    #[must_use]
    #[inline]
    pub fn name(self) -> &'static str {
        self.inner.name()
    }

    /// Returns `true` if writing this property requires its write key.
    #[must_use]
    #[inline]
    pub fn is_read_only(self) -> bool {
        self.inner.is_read_only()
    }

    /// Returns the metadata registered together with the property.
    #[must_use]
    pub fn default_metadata(self) -> &'static PropertyMetadata<T> {
        self.metadata(self.inner.owner_type())
    }

    /// Returns the metadata in effect for objects of type `ty`.
    ///
    /// This is the closest override found walking from `ty` to its ancestors,
    /// or the registered metadata when no ancestor overrides it.
    #[must_use]
    pub fn metadata(self, ty: &'static DependencyObjectType) -> &'static PropertyMetadata<T> {
        self.inner
            .metadata_for(ty)
            .downcast_ref::<T>()
            .expect("metadata type is fixed at registration")
    }

    /// Replaces the metadata used for objects of `class` and its subclasses.
    ///
    /// # Errors
    ///
    /// - [`Error::ReadOnly`](crate::Error::ReadOnly) if the property is
    ///   read-only; use [`PropertyWriteKey::override_metadata`] instead.
    /// - [`Error::NotASubclass`](crate::Error::NotASubclass) if `class` does
    ///   not strictly derive from the owner type.
    /// - [`Error::MetadataAlreadyOverridden`](crate::Error::MetadataAlreadyOverridden)
    ///   if `class` already has overridden metadata.
    pub fn override_metadata(
        self,
        class: &'static ObjectClass,
        metadata: PropertyMetadata<T>,
    ) -> Result<()> {
        if self.is_read_only() {
            return Err(crate::Error::ReadOnly {
                property: self.name(),
            });
        }
        self.inner.registration.override_metadata(class, metadata)
    }
}

impl<T> Copy for Property<T> {}

impl<T> Clone for Property<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for Property<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl<T> Eq for Property<T> {}

impl<T> Hash for Property<T> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.hash(state);
    }
}

impl<T> fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("id", &self.inner.id())
            .field("name", &self.inner.name())
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> From<Property<T>> for DependencyProperty {
    #[inline]
    fn from(property: Property<T>) -> Self {
        property.inner
    }
}

/// Untyped write credential for a read-only property.
///
/// Exactly one key exists per read-only property. It is handed out once by
/// [`PropertyRegistry::register_read_only`](crate::PropertyRegistry::register_read_only)
/// and can be neither cloned nor constructed elsewhere.
pub struct DependencyPropertyKey {
    property: DependencyProperty,
}

impl DependencyPropertyKey {
    /// Returns the property this key unlocks.
    #[must_use]
    #[inline]
    pub fn property(&self) -> DependencyProperty {
        self.property
    }

    /// Returns `true` if this key unlocks `property`.
    #[must_use]
    #[inline]
    pub fn unlocks(&self, property: DependencyProperty) -> bool {
        self.property == property
    }
}

impl fmt::Debug for DependencyPropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyPropertyKey")
            .field("property", &self.property.name())
            .finish_non_exhaustive()
    }
}

/// Typed write credential for a read-only [`Property<T>`].
///
/// Derefs to its [`DependencyPropertyKey`] for use with the erased APIs.
pub struct PropertyWriteKey<T> {
    key: DependencyPropertyKey,
    _marker: PhantomData<fn() -> T>,
}

impl<T: PropertyValue> PropertyWriteKey<T> {
    pub(crate) fn new(property: Property<T>) -> Self {
        Self {
            key: DependencyPropertyKey {
                property: property.untyped(),
            },
            _marker: PhantomData,
        }
    }

    /// Returns the read-only property this key unlocks.
    #[must_use]
    #[inline]
    pub fn property(&self) -> Property<T> {
        Property::from_untyped(self.key.property)
    }

    /// Replaces the metadata used for objects of `class` and its subclasses.
    ///
    /// This is the only way to override metadata of a read-only property.
    ///
    /// # Errors
    ///
    /// See [`Property::override_metadata`], except that read-only access is
    /// granted by the key.
    pub fn override_metadata(
        &self,
        class: &'static ObjectClass,
        metadata: PropertyMetadata<T>,
    ) -> Result<()> {
        self.key
            .property
            .registration
            .override_metadata(class, metadata)
    }
}

impl<T> std::ops::Deref for PropertyWriteKey<T> {
    type Target = DependencyPropertyKey;

    fn deref(&self) -> &Self::Target {
        &self.key
    }
}

impl<T> fmt::Debug for PropertyWriteKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyWriteKey")
            .field("property", &self.key.property.name())
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}
