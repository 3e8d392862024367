// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Global property registry.
//!
//! This module provides [`PropertyRegistry`] for registering and looking up
//! property metadata. Registrations live for the whole process: every
//! [`Property<T>`] handle points straight at its registration, so reading
//! metadata never takes a lock.

use std::any::{Any, TypeId};
use std::sync::LazyLock;

use hashbrown::HashMap;
use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::id::{DependencyProperty, Property, PropertyId, PropertyWriteKey};
use crate::metadata::PropertyMetadata;
use crate::object::{DependencyObject, PropertyChange};
use crate::type_identity::{DependencyObjectType, ObjectClass};
use crate::value::{ErasedValue, PropertyValue};

/// A registration entry for a property.
///
/// This stores the property's name, owner, type information, and metadata.
pub(crate) struct PropertyRegistration {
    id: PropertyId,
    name: &'static str,
    owner: &'static DependencyObjectType,
    value_type: TypeId,
    value_type_name: &'static str,
    read_only: bool,
    metadata: &'static dyn ErasedMetadata,
    /// Per-type overrides keyed by [`DependencyObjectType::id`].
    overrides: RwLock<SmallVec<[(u32, &'static dyn ErasedMetadata); 2]>>,
}

impl PropertyRegistration {
    #[inline]
    pub(crate) fn id(&self) -> PropertyId {
        self.id
    }

    #[inline]
    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub(crate) fn owner(&self) -> &'static DependencyObjectType {
        self.owner
    }

    #[inline]
    pub(crate) fn value_type(&self) -> TypeId {
        self.value_type
    }

    #[inline]
    pub(crate) fn value_type_name(&self) -> &'static str {
        self.value_type_name
    }

    #[inline]
    pub(crate) fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn metadata_for(&self, ty: &'static DependencyObjectType) -> &'static dyn ErasedMetadata {
        let overrides = self.overrides.read();
        if overrides.is_empty() {
            return self.metadata;
        }
        for ancestor in ty.ancestors_and_self() {
            if let Some((_, metadata)) = overrides.iter().find(|(id, _)| *id == ancestor.id()) {
                return *metadata;
            }
        }
        self.metadata
    }

    pub(crate) fn override_metadata<T: PropertyValue>(
        &self,
        class: &'static ObjectClass,
        metadata: PropertyMetadata<T>,
    ) -> Result<()> {
        let ty = DependencyObjectType::from_class(class)?;
        if !ty.is_subclass_of(self.owner) {
            return Err(Error::NotASubclass {
                property: self.name,
                owner: self.owner.name(),
                class: ty.name(),
            });
        }

        let mut overrides = self.overrides.write();
        if overrides.iter().any(|(id, _)| *id == ty.id()) {
            return Err(Error::MetadataAlreadyOverridden {
                property: self.name,
                class: ty.name(),
            });
        }
        overrides.push((ty.id(), Box::leak(Box::new(metadata))));
        tracing::debug!(property = self.name, class = ty.name(), "overrode property metadata");
        Ok(())
    }
}

impl std::fmt::Debug for PropertyRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyRegistration")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("owner", &self.owner.name())
            .field("value_type", &self.value_type_name)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct RegistryTable {
    properties: Vec<&'static PropertyRegistration>,
    by_name: HashMap<(u32, &'static str), PropertyId>,
}

/// The process-wide registry of dependency properties.
///
/// Properties are registered once, usually from a class's
/// [static initializer](ObjectClass::with_static_init), and the registry
/// provides lookup by owner and name or by id.
///
/// # Example
///
/// ```rust
/// use understory_dependency::{
///     DEPENDENCY_OBJECT, DependencyObjectType, ObjectClass, PropertyMetadataBuilder,
///     PropertyRegistry,
/// };
///
/// static PANEL: ObjectClass = ObjectClass::new("Panel", Some(&DEPENDENCY_OBJECT));
///
/// let registry = PropertyRegistry::global();
/// let width = registry
///     .register("Width", &PANEL, PropertyMetadataBuilder::new(0.0_f64).build())
///     .unwrap();
///
/// let panel = DependencyObjectType::from_class(&PANEL).unwrap();
/// assert_eq!(registry.from_name(panel, "Width"), Some(width.untyped()));
/// assert_eq!(registry.get(width.id()), Some(width.untyped()));
/// ```
pub struct PropertyRegistry {
    table: RwLock<RegistryTable>,
}

static REGISTRY: LazyLock<PropertyRegistry> = LazyLock::new(|| PropertyRegistry {
    table: RwLock::new(RegistryTable::default()),
});

impl PropertyRegistry {
    /// Returns the process-wide registry.
    #[must_use]
    pub fn global() -> &'static Self {
        &REGISTRY
    }

    /// Registers a new property with the given name, owner and metadata.
    ///
    /// Returns a type-safe [`Property<T>`] handle for accessing the property.
    ///
    /// # Errors
    ///
    /// - [`Error::NotAParticipant`] if `owner` is not a dependency object class.
    /// - [`Error::DuplicateProperty`] if `owner` already has a property with
    ///   this name.
    /// - [`Error::TooManyProperties`] once 65,536 properties exist.
    pub fn register<T: PropertyValue>(
        &self,
        name: &'static str,
        owner: &'static ObjectClass,
        metadata: PropertyMetadata<T>,
    ) -> Result<Property<T>> {
        self.register_impl(name, owner, metadata, false)
    }

    /// Registers a read-only property.
    ///
    /// The returned key is the only credential that can write the property.
    ///
    /// # Errors
    ///
    /// Same as [`register`](Self::register).
    pub fn register_read_only<T: PropertyValue>(
        &self,
        name: &'static str,
        owner: &'static ObjectClass,
        metadata: PropertyMetadata<T>,
    ) -> Result<PropertyWriteKey<T>> {
        self.register_impl(name, owner, metadata, true)
            .map(PropertyWriteKey::new)
    }

    fn register_impl<T: PropertyValue>(
        &self,
        name: &'static str,
        owner: &'static ObjectClass,
        metadata: PropertyMetadata<T>,
        read_only: bool,
    ) -> Result<Property<T>> {
        // Resolve the owner before taking the table lock: class initializers
        // may register properties of their own.
        let owner = DependencyObjectType::from_class(owner)?;

        let mut table = self.table.write();
        if table.by_name.contains_key(&(owner.id(), name)) {
            return Err(Error::DuplicateProperty {
                property: name,
                owner: owner.name(),
            });
        }
        let id = u16::try_from(table.properties.len())
            .map(PropertyId::new)
            .map_err(|_| Error::TooManyProperties {
                max: usize::from(u16::MAX) + 1,
            })?;

        let registration: &'static PropertyRegistration = Box::leak(Box::new(PropertyRegistration {
            id,
            name,
            owner,
            value_type: TypeId::of::<T>(),
            value_type_name: std::any::type_name::<T>(),
            read_only,
            metadata: Box::leak(Box::new(metadata)),
            overrides: RwLock::new(SmallVec::new()),
        }));
        table.properties.push(registration);
        table.by_name.insert((owner.id(), name), id);
        drop(table);

        tracing::debug!(
            property = name,
            owner = owner.name(),
            id = id.index(),
            read_only,
            "registered property"
        );
        Ok(Property::from_untyped(DependencyProperty::from_registration(
            registration,
        )))
    }

    /// Returns the number of registered properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.read().properties.len()
    }

    /// Returns `true` if no properties are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.read().properties.is_empty()
    }

    /// Looks up a property by id.
    #[must_use]
    pub fn get(&self, id: PropertyId) -> Option<DependencyProperty> {
        self.table
            .read()
            .properties
            .get(usize::from(id.index()))
            .copied()
            .map(DependencyProperty::from_registration)
    }

    /// Looks up a property by name on `owner` or any of its ancestors.
    #[must_use]
    pub fn from_name(
        &self,
        owner: &'static DependencyObjectType,
        name: &str,
    ) -> Option<DependencyProperty> {
        let table = self.table.read();
        owner.ancestors_and_self().find_map(|ty| {
            table
                .by_name
                .get(&(ty.id(), name))
                .and_then(|id| table.properties.get(usize::from(id.index())).copied())
                .map(DependencyProperty::from_registration)
        })
    }
}

impl std::fmt::Debug for PropertyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyRegistry")
            .field("count", &self.len())
            .finish_non_exhaustive()
    }
}

/// Type-erased metadata trait for heterogeneous storage.
pub(crate) trait ErasedMetadata: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn inherits(&self) -> bool;
    fn has_default_factory(&self) -> bool;
    fn default_value(&self) -> ErasedValue;
    fn create_default(&self, owner: &DependencyObject) -> ErasedValue;
    fn coerce(&self, value: ErasedValue) -> ErasedValue;
    fn is_valid(&self, value: &ErasedValue) -> bool;
    fn on_changed(&self, owner: &DependencyObject, change: &PropertyChange);
}

impl<T: PropertyValue> ErasedMetadata for PropertyMetadata<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn inherits(&self) -> bool {
        Self::inherits(self)
    }

    fn has_default_factory(&self) -> bool {
        Self::has_default_factory(self)
    }

    fn default_value(&self) -> ErasedValue {
        ErasedValue::new(Self::default_value(self).clone())
    }

    fn create_default(&self, owner: &DependencyObject) -> ErasedValue {
        ErasedValue::new(Self::create_default(self, owner))
    }

    fn coerce(&self, value: ErasedValue) -> ErasedValue {
        if !self.has_coerce_callback() {
            return value;
        }
        match value.get::<T>() {
            Some(typed) => ErasedValue::new(Self::coerce(self, typed)),
            None => value,
        }
    }

    fn is_valid(&self, value: &ErasedValue) -> bool {
        value
            .downcast_ref::<T>()
            .is_some_and(|typed| Self::is_valid(self, typed))
    }

    fn on_changed(&self, owner: &DependencyObject, change: &PropertyChange) {
        Self::on_changed(self, owner, change);
    }
}

impl dyn ErasedMetadata {
    pub(crate) fn downcast_ref<T: PropertyValue>(&self) -> Option<&PropertyMetadata<T>> {
        self.as_any().downcast_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::metadata::PropertyMetadataBuilder;
    use crate::type_identity::DEPENDENCY_OBJECT;

    static CONTROL: ObjectClass = ObjectClass::new("Control", Some(&DEPENDENCY_OBJECT));
    static BUTTON: ObjectClass = ObjectClass::new("Button", Some(&CONTROL));
    static TOGGLE: ObjectClass = ObjectClass::new("Toggle", Some(&BUTTON));

    #[test]
    fn registry_register() {
        let registry = PropertyRegistry::global();
        let before = registry.len();

        let width = registry
            .register("RegisterWidth", &CONTROL, PropertyMetadataBuilder::new(0.0_f64).build())
            .unwrap();

        assert!(registry.len() > before);
        assert!(!registry.is_empty());
        assert_eq!(width.name(), "RegisterWidth");
        assert_eq!(width.untyped().owner_type().name(), "Control");
        assert!(!width.is_read_only());
    }

    #[test]
    fn registry_ids_are_dense_and_distinct() {
        let registry = PropertyRegistry::global();
        let a = registry
            .register("DenseA", &CONTROL, PropertyMetadata::new(0_i32))
            .unwrap();
        let b = registry
            .register("DenseB", &CONTROL, PropertyMetadata::new(0_i32))
            .unwrap();

        assert_ne!(a.id(), b.id());
        assert_eq!(registry.get(a.id()), Some(a.untyped()));
        assert_eq!(registry.get(b.id()), Some(b.untyped()));
    }

    #[test]
    fn registry_from_name_searches_ancestors() {
        let registry = PropertyRegistry::global();
        let padding = registry
            .register("Padding", &CONTROL, PropertyMetadata::new(0.0_f64))
            .unwrap();

        let button = DependencyObjectType::from_class(&BUTTON).unwrap();
        let control = DependencyObjectType::from_class(&CONTROL).unwrap();
        assert_eq!(registry.from_name(button, "Padding"), Some(padding.untyped()));
        assert_eq!(registry.from_name(control, "Padding"), Some(padding.untyped()));
        assert_eq!(registry.from_name(control, "NoSuchProperty"), None);
    }

    #[test]
    fn registry_duplicate_name() {
        let registry = PropertyRegistry::global();
        registry
            .register("Duplicate", &CONTROL, PropertyMetadata::new(0.0_f64))
            .unwrap();
        let err = registry
            .register("Duplicate", &CONTROL, PropertyMetadata::new(0.0_f64))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        // The same name on another class is fine.
        registry
            .register("Duplicate", &BUTTON, PropertyMetadata::new(0.0_f64))
            .unwrap();
    }

    #[test]
    fn registry_rejects_foreign_owner() {
        static FOREIGN: ObjectClass = ObjectClass::new("ForeignOwner", None);
        let err = PropertyRegistry::global()
            .register("X", &FOREIGN, PropertyMetadata::new(0_u8))
            .unwrap_err();
        assert_eq!(err, Error::NotAParticipant { class: "ForeignOwner" });
    }

    #[test]
    fn metadata_override_resolves_nearest_ancestor() {
        let registry = PropertyRegistry::global();
        let margin = registry
            .register("Margin", &CONTROL, PropertyMetadata::new(1.0_f64))
            .unwrap();
        margin
            .override_metadata(&BUTTON, PropertyMetadata::new(2.0_f64))
            .unwrap();

        let control = DependencyObjectType::from_class(&CONTROL).unwrap();
        let button = DependencyObjectType::from_class(&BUTTON).unwrap();
        let toggle = DependencyObjectType::from_class(&TOGGLE).unwrap();

        assert_eq!(margin.metadata(control).default_value(), &1.0);
        assert_eq!(margin.metadata(button).default_value(), &2.0);
        assert_eq!(margin.metadata(toggle).default_value(), &2.0);
        assert_eq!(margin.default_metadata().default_value(), &1.0);
    }

    #[test]
    fn metadata_override_rules() {
        let registry = PropertyRegistry::global();
        let border = registry
            .register("Border", &BUTTON, PropertyMetadata::new(0_u32))
            .unwrap();

        // Owner itself and unrelated ancestors are not subclasses.
        assert_eq!(
            border
                .override_metadata(&BUTTON, PropertyMetadata::new(1))
                .unwrap_err()
                .kind(),
            ErrorKind::InvalidArgument
        );
        assert!(matches!(
            border.override_metadata(&CONTROL, PropertyMetadata::new(1)),
            Err(Error::NotASubclass { .. })
        ));

        border
            .override_metadata(&TOGGLE, PropertyMetadata::new(1))
            .unwrap();
        assert!(matches!(
            border.override_metadata(&TOGGLE, PropertyMetadata::new(2)),
            Err(Error::MetadataAlreadyOverridden { .. })
        ));
    }

    #[test]
    fn read_only_override_requires_key() {
        let registry = PropertyRegistry::global();
        let key = registry
            .register_read_only("IsPressed", &BUTTON, PropertyMetadata::new(false))
            .unwrap();
        let property = key.property();

        let err = property
            .override_metadata(&TOGGLE, PropertyMetadata::new(true))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);

        key.override_metadata(&TOGGLE, PropertyMetadata::new(true))
            .unwrap();
        let toggle = DependencyObjectType::from_class(&TOGGLE).unwrap();
        assert!(*property.metadata(toggle).default_value());
    }

    #[test]
    fn registry_debug() {
        let debug = format!("{:?}", PropertyRegistry::global());
        assert!(debug.contains("PropertyRegistry"));
    }
}
