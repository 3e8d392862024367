// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Dependency objects.
//!
//! A [`DependencyObject`] is a shared handle to an object that stores
//! dependency property values. It owns an
//! [`EffectiveValueStore`](crate::EffectiveValueStore) with the values that
//! differ from the defaults, the [`DependentList`]s of its properties that
//! expressions read, and an optional parent for property inheritance.
//!
//! ## Resolution
//!
//! Reading a property resolves, in order:
//!
//! 1. the stored entry: a local value, a deferred value (computed and cached
//!    on first read) or the value of an attached expression;
//! 2. for [inheriting](crate::PropertyMetadataBuilder::inherits) properties,
//!    the nearest ancestor holding a value;
//! 3. the default from the metadata in effect for the object's type.
//!
//! ## Change notification
//!
//! A write that changes the effective value calls the property's
//! [changed callback](crate::PropertyMetadataBuilder::on_changed) and then
//! invalidates the property's dependents. Writing an equal value notifies
//! nobody. No borrow of the object is held while callbacks run, so callbacks
//! may read and write freely.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::context::ContextId;
use crate::deferred::{DeferredMutableDefaultReference, DeferredReference};
use crate::dependent::{Dependent, DependentList};
use crate::error::{Error, Result};
use crate::expression::Expression;
use crate::id::{DependencyProperty, DependencyPropertyKey, Property, PropertyId, PropertyWriteKey};
use crate::store::{
    BaseValueSource, EffectiveValueEntry, EffectiveValueStore, EntryIndex, EntryValue, ValueSource,
};
use crate::type_identity::{DependencyObjectType, ObjectClass};
use crate::value::{ErasedValue, PropertyValue};

struct ObjectInner {
    ty: &'static DependencyObjectType,
    context: Option<ContextId>,
    parent: RefCell<Option<WeakDependencyObject>>,
    store: RefCell<EffectiveValueStore>,
    dependents: RefCell<HashMap<PropertyId, DependentList>>,
    /// Properties whose dependents are being invalidated right now.
    propagating: RefCell<SmallVec<[PropertyId; 4]>>,
}

/// A shared handle to a dependency object.
///
/// Cloning the handle does not clone the object. Objects are not `Send`: each
/// belongs to one [`ContextId`].
///
/// # Example
///
/// ```rust
/// use understory_dependency::{
///     DEPENDENCY_OBJECT, DependencyObject, ObjectClass, PropertyMetadata, PropertyRegistry,
/// };
///
/// static BOX: ObjectClass = ObjectClass::new("Box", Some(&DEPENDENCY_OBJECT));
/// let width = PropertyRegistry::global()
///     .register("Width", &BOX, PropertyMetadata::new(0.0_f64))
///     .unwrap();
///
/// let instance = DependencyObject::new(&BOX).unwrap();
/// instance.set_value(width, 5.0).unwrap();
/// assert_eq!(instance.get_value(width), 5.0);
/// assert_eq!(instance.effective_value_count(), 1);
///
/// instance.clear_value(width).unwrap();
/// assert_eq!(instance.get_value(width), 0.0);
/// assert_eq!(instance.effective_value_count(), 0);
/// ```
#[derive(Clone)]
pub struct DependencyObject {
    inner: Rc<ObjectInner>,
}

impl DependencyObject {
    /// Creates an object of `class`, bound to the calling thread's context.
    ///
    /// # Errors
    ///
    /// [`Error::NotAParticipant`] if `class` does not derive from
    /// [`DEPENDENCY_OBJECT`](crate::DEPENDENCY_OBJECT).
    pub fn new(class: &'static ObjectClass) -> Result<Self> {
        Self::with_context(class, Some(ContextId::current()))
    }

    /// Creates an object of `class` bound to `context`.
    ///
    /// An object without a context never conflicts with another context.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn with_context(class: &'static ObjectClass, context: Option<ContextId>) -> Result<Self> {
        let ty = DependencyObjectType::from_class(class)?;
        Ok(Self {
            inner: Rc::new(ObjectInner {
                ty,
                context,
                parent: RefCell::new(None),
                store: RefCell::new(EffectiveValueStore::new()),
                dependents: RefCell::new(HashMap::new()),
                propagating: RefCell::new(SmallVec::new()),
            }),
        })
    }

    /// Returns the object's type identity.
    #[must_use]
    #[inline]
    pub fn dependency_object_type(&self) -> &'static DependencyObjectType {
        self.inner.ty
    }

    /// Returns the context the object is bound to.
    #[must_use]
    #[inline]
    pub fn context(&self) -> Option<ContextId> {
        self.inner.context
    }

    /// Creates a weak handle to this object.
    #[must_use]
    pub fn downgrade(&self) -> WeakDependencyObject {
        WeakDependencyObject {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Returns `true` if both handles refer to the same object.
    #[must_use]
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Sets the parent used for property inheritance.
    ///
    /// The parent is held weakly.
    pub fn set_parent(&self, parent: Option<&Self>) {
        *self.inner.parent.borrow_mut() = parent.map(Self::downgrade);
    }

    /// Returns the parent, if one is set and still alive.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.inner.parent.borrow().as_ref().and_then(WeakDependencyObject::upgrade)
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Returns the effective value of `property`.
    #[must_use]
    pub fn get_value<T: PropertyValue>(&self, property: Property<T>) -> T {
        match self.get_value_erased(property).get::<T>() {
            Some(value) => value,
            None => property.metadata(self.inner.ty).create_default(self),
        }
    }

    /// Returns the effective value of `property`, type-erased.
    ///
    /// Deferred values are computed here and replaced in the store by their
    /// result. Per-instance defaults are cached the first time they are read,
    /// but an inherited value always takes precedence over a cached default.
    #[must_use]
    pub fn get_value_erased(&self, property: impl Into<DependencyProperty>) -> ErasedValue {
        let property = property.into();
        if let Some(value) = self.inherited_over_default(property) {
            return value;
        }
        if let Some(value) = self.stored_value(property) {
            return value;
        }
        match self.base_value(property) {
            BaseValue::Value(value) => value,
            BaseValue::Factory(reference) => self.cache_default(property, &reference),
        }
    }

    /// Returns the locally set value of `property`, if any.
    ///
    /// This includes the current value of an attached expression but never
    /// an inherited value or a default.
    #[must_use]
    pub fn read_local_value(&self, property: impl Into<DependencyProperty>) -> Option<ErasedValue> {
        let property = property.into();
        if !self.has_local_value(property) {
            return None;
        }
        self.stored_value(property)
    }

    /// Returns `true` if `property` has a locally stored value or expression.
    #[must_use]
    pub fn has_local_value(&self, property: impl Into<DependencyProperty>) -> bool {
        let property = property.into();
        self.inner
            .store
            .borrow()
            .get(property.id())
            .is_some_and(|entry| entry.source() != BaseValueSource::Default)
    }

    /// Describes where the effective value of `property` comes from.
    #[must_use]
    pub fn value_source(&self, property: impl Into<DependencyProperty>) -> ValueSource {
        let property = property.into();
        let stored = self
            .inner
            .store
            .borrow()
            .get(property.id())
            .map(EffectiveValueEntry::value_source);
        if let Some(source) = stored
            && source.base != BaseValueSource::Default
        {
            return source;
        }
        if self.inherited_value(property).is_some() {
            return ValueSource {
                base: BaseValueSource::Inherited,
                ..ValueSource::default()
            };
        }
        stored.unwrap_or(ValueSource {
            base: BaseValueSource::Default,
            ..ValueSource::default()
        })
    }

    /// Returns the number of entries in the object's store.
    #[must_use]
    pub fn effective_value_count(&self) -> usize {
        self.inner.store.borrow().len()
    }

    /// Returns the expression attached to `property`, if any.
    #[must_use]
    pub fn expression(&self, property: impl Into<DependencyProperty>) -> Option<Expression> {
        let property = property.into();
        self.inner
            .store
            .borrow()
            .get(property.id())
            .and_then(EffectiveValueEntry::expression)
            .cloned()
    }

    /// Returns the value held by the store entry of `property`, computing a
    /// deferred value if needed.
    fn stored_value(&self, property: DependencyProperty) -> Option<ErasedValue> {
        let (reference, source) = {
            let store = self.inner.store.borrow();
            let entry = store.get(property.id())?;
            match entry.value() {
                EntryValue::Value(value) => return Some(value.clone()),
                EntryValue::Expression { value, .. } => return value.clone(),
                EntryValue::Deferred(reference) => (reference.clone(), entry.source()),
            }
        };
        self.materialize(property, &reference, source)
    }

    /// Computes a deferred value and keeps the result in its place.
    fn materialize(
        &self,
        property: DependencyProperty,
        reference: &Rc<dyn DeferredReference>,
        source: BaseValueSource,
    ) -> Option<ErasedValue> {
        let value = reference.value(source);
        if value.type_id() != property.value_type() {
            tracing::warn!(
                property = property.name(),
                expected = property.value_type_name(),
                found = value.type_name(),
                "deferred value has the wrong type"
            );
            return None;
        }
        let value = property.metadata_for(self.inner.ty).coerce(value);

        let mut store = self.inner.store.borrow_mut();
        if let Some(entry) = store.get_mut(property.id()) {
            let unchanged = matches!(
                entry.value(),
                EntryValue::Deferred(current) if Rc::ptr_eq(current, reference)
            );
            if unchanged {
                *entry.value_mut() = EntryValue::Value(value.clone());
            }
        }
        Some(value)
    }

    /// Resolves `property` without looking at the store.
    fn base_value(&self, property: DependencyProperty) -> BaseValue {
        if let Some(value) = self.inherited_value(property) {
            return BaseValue::Value(value);
        }
        let metadata = property.metadata_for(self.inner.ty);
        if metadata.has_default_factory() {
            BaseValue::Factory(Rc::new(DeferredMutableDefaultReference::new(self, property)))
        } else {
            BaseValue::Value(metadata.default_value())
        }
    }

    /// The inherited value of `property`, unless the object holds a value of
    /// its own. A cached default does not count as one.
    fn inherited_over_default(&self, property: DependencyProperty) -> Option<ErasedValue> {
        if self.has_local_value(property) {
            return None;
        }
        self.inherited_value(property)
    }

    /// Walks the parent chain for the nearest locally held value.
    fn inherited_value(&self, property: DependencyProperty) -> Option<ErasedValue> {
        if !property.inherits_on(self.inner.ty) {
            return None;
        }
        let mut current = self.parent();
        while let Some(ancestor) = current {
            if ancestor.has_local_value(property)
                && let Some(value) = ancestor.stored_value(property)
            {
                return Some(value);
            }
            current = ancestor.parent();
        }
        None
    }

    /// Produces a per-instance default and caches it as a default entry.
    fn cache_default(
        &self,
        property: DependencyProperty,
        reference: &Rc<DeferredMutableDefaultReference>,
    ) -> ErasedValue {
        let value = reference.value(BaseValueSource::Default);
        let mut store = self.inner.store.borrow_mut();
        let index = store.lookup(property.id());
        // The factory may have written the property itself.
        if let EntryIndex::Vacant(_) = index {
            store.set_effective_value(
                index,
                EffectiveValueEntry::new(
                    property,
                    EntryValue::Value(value.clone()),
                    BaseValueSource::Default,
                ),
            );
        }
        value
    }

    /// The effective value as reported in a [`PropertyChange`], without
    /// forcing deferred values.
    fn current_value(&self, property: DependencyProperty) -> ChangedValue {
        if let Some(value) = self.inherited_over_default(property) {
            return ChangedValue::Value(value);
        }
        {
            let store = self.inner.store.borrow();
            if let Some(entry) = store.get(property.id()) {
                match entry.value() {
                    EntryValue::Value(value)
                    | EntryValue::Expression {
                        value: Some(value), ..
                    } => return ChangedValue::Value(value.clone()),
                    EntryValue::Deferred(reference) => {
                        return ChangedValue::Deferred {
                            reference: reference.clone(),
                            source: entry.source(),
                        };
                    }
                    EntryValue::Expression { value: None, .. } => {}
                }
            }
        }
        match self.base_value(property) {
            BaseValue::Value(value) => ChangedValue::Value(value),
            BaseValue::Factory(reference) => ChangedValue::Deferred {
                reference,
                source: BaseValueSource::Default,
            },
        }
    }

    // =========================================================================
    // Writing
    // =========================================================================

    /// Sets the local value of `property`.
    ///
    /// # Errors
    ///
    /// - [`Error::ReadOnly`] if the property is read-only; use
    ///   [`set_value_with_key`](Self::set_value_with_key).
    /// - [`Error::InvalidValue`] if the property's validation rejects `value`.
    pub fn set_value<T: PropertyValue>(&self, property: Property<T>, value: T) -> Result<()> {
        self.set_value_erased(property, ErasedValue::new(value), None)
    }

    /// Sets the local value of the read-only property unlocked by `key`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidValue`] if the property's validation rejects `value`.
    pub fn set_value_with_key<T: PropertyValue>(
        &self,
        key: &PropertyWriteKey<T>,
        value: T,
    ) -> Result<()> {
        self.set_value_erased(key.property(), ErasedValue::new(value), Some(&**key))
    }

    /// Sets the local value of `property` from an erased value.
    ///
    /// If an expression is attached and
    /// [handles the write](crate::ExpressionBehavior::set_value), the store
    /// is left alone. Otherwise the value is coerced, replaces whatever the
    /// slot held (detaching an expression), and dependents are invalidated
    /// if the effective value changed.
    ///
    /// # Errors
    ///
    /// - [`Error::ReadOnly`] or [`Error::WriteKeyMismatch`] if `key` does not
    ///   unlock a read-only property, or is presented for another property.
    /// - [`Error::ValueTypeMismatch`] if `value` has the wrong type.
    /// - [`Error::InvalidValue`] if the property's validation rejects `value`.
    pub fn set_value_erased(
        &self,
        property: impl Into<DependencyProperty>,
        value: ErasedValue,
        key: Option<&DependencyPropertyKey>,
    ) -> Result<()> {
        let property = property.into();
        check_write_access(property, key)?;
        if value.type_id() != property.value_type() {
            return Err(Error::ValueTypeMismatch {
                property: property.name(),
                expected: property.value_type_name(),
                found: value.type_name(),
            });
        }
        let metadata = property.metadata_for(self.inner.ty);
        if !metadata.is_valid(&value) {
            return Err(Error::InvalidValue {
                property: property.name(),
            });
        }

        if let Some(expression) = self.expression(property)
            && expression.behavior().set_value(self, property, &value)
        {
            return Ok(());
        }

        let coerced = metadata.coerce(value.clone());
        let is_coerced = coerced != value;
        let old = self.current_value(property);
        let entry = EffectiveValueEntry::new(
            property,
            EntryValue::Value(coerced.clone()),
            BaseValueSource::Local,
        )
        .with_coerced(is_coerced);
        let previous = self.replace_entry(property, entry);
        self.detach_previous(property, previous);

        self.notify_if_changed(property, old, ChangedValue::Value(coerced));
        Ok(())
    }

    /// Parks a deferred value as the local value of `property`.
    ///
    /// The value is computed the first time the property is read. Dependents
    /// are invalidated immediately, since the new value is not known yet.
    ///
    /// # Errors
    ///
    /// - [`Error::ReadOnly`] or [`Error::WriteKeyMismatch`], as for
    ///   [`set_value_erased`](Self::set_value_erased).
    /// - [`Error::ValueTypeMismatch`] if the reference produces the wrong type.
    pub fn set_deferred_value(
        &self,
        property: impl Into<DependencyProperty>,
        reference: Rc<dyn DeferredReference>,
        key: Option<&DependencyPropertyKey>,
    ) -> Result<()> {
        let property = property.into();
        check_write_access(property, key)?;
        if reference.value_type() != property.value_type() {
            return Err(Error::ValueTypeMismatch {
                property: property.name(),
                expected: property.value_type_name(),
                found: "deferred value of another type",
            });
        }

        let old = self.current_value(property);
        let entry = EffectiveValueEntry::new(
            property,
            EntryValue::Deferred(reference.clone()),
            BaseValueSource::Local,
        );
        let previous = self.replace_entry(property, entry);
        self.detach_previous(property, previous);

        self.notify_if_changed(
            property,
            old,
            ChangedValue::Deferred {
                reference,
                source: BaseValueSource::Local,
            },
        );
        Ok(())
    }

    /// Removes the local value of `property`.
    ///
    /// An attached expression is detached. Clearing a property without a
    /// local value does nothing.
    ///
    /// # Errors
    ///
    /// [`Error::ReadOnly`] if the property is read-only; use
    /// [`clear_value_with_key`](Self::clear_value_with_key).
    pub fn clear_value<T: PropertyValue>(&self, property: Property<T>) -> Result<()> {
        self.clear_value_erased(property, None)
    }

    /// Removes the local value of the read-only property unlocked by `key`.
    ///
    /// # Errors
    ///
    /// None in practice; the signature matches the erased form.
    pub fn clear_value_with_key<T: PropertyValue>(&self, key: &PropertyWriteKey<T>) -> Result<()> {
        self.clear_value_erased(key.property(), Some(&**key))
    }

    /// Removes the local value of `property`.
    ///
    /// # Errors
    ///
    /// [`Error::ReadOnly`] or [`Error::WriteKeyMismatch`], as for
    /// [`set_value_erased`](Self::set_value_erased).
    pub fn clear_value_erased(
        &self,
        property: impl Into<DependencyProperty>,
        key: Option<&DependencyPropertyKey>,
    ) -> Result<()> {
        let property = property.into();
        check_write_access(property, key)?;
        if !self.has_local_value(property) {
            return Ok(());
        }

        let old = self.current_value(property);
        let previous = {
            let mut store = self.inner.store.borrow_mut();
            let index = store.lookup(property.id());
            store.unset_effective_value(index)
        };
        self.detach_previous(property, previous);

        let new = self.current_value(property);
        self.notify_if_changed(property, old, new);
        Ok(())
    }

    /// Attaches `expression` to `property`.
    ///
    /// Whatever the slot held before is replaced; a previous expression is
    /// detached. The expression is registered as a dependent of each of its
    /// sources, and its value becomes the effective value.
    ///
    /// # Errors
    ///
    /// - [`Error::ReadOnly`] if the property is read-only; use
    ///   [`set_expression_with_key`](Self::set_expression_with_key).
    /// - [`Error::ExpressionNotAttachable`] if the expression is not
    ///   shareable and was attached before.
    /// - [`Error::CrossContextSource`] if a source lives in another context
    ///   and the expression does not support unbound sources.
    pub fn set_expression(
        &self,
        property: impl Into<DependencyProperty>,
        expression: &Expression,
    ) -> Result<()> {
        self.set_expression_erased(property.into(), expression, None)
    }

    /// Attaches `expression` to the read-only property unlocked by `key`.
    ///
    /// # Errors
    ///
    /// As for [`set_expression`](Self::set_expression), except for
    /// [`Error::ReadOnly`].
    pub fn set_expression_with_key<T: PropertyValue>(
        &self,
        key: &PropertyWriteKey<T>,
        expression: &Expression,
    ) -> Result<()> {
        self.set_expression_erased(key.property().untyped(), expression, Some(&**key))
    }

    fn set_expression_erased(
        &self,
        property: DependencyProperty,
        expression: &Expression,
        key: Option<&DependencyPropertyKey>,
    ) -> Result<()> {
        check_write_access(property, key)?;
        if !expression.is_attachable() {
            return Err(Error::ExpressionNotAttachable);
        }
        let sources = expression.sources();
        expression.check_source_contexts(self, property, &sources)?;

        let old = self.current_value(property);
        let entry = EffectiveValueEntry::new(
            property,
            EntryValue::Expression {
                expression: expression.clone(),
                value: None,
            },
            BaseValueSource::Local,
        );
        let previous = self.replace_entry(property, entry);
        self.detach_previous(property, previous);

        expression.mark_attached();
        expression.behavior().on_attach(self, property);
        for source in &sources {
            if let Some(object) = source.object() {
                object.add_dependent(source.property(), Some(self), property, expression);
            }
        }
        tracing::trace!(
            property = property.name(),
            sources = sources.len(),
            "attached expression"
        );

        self.refresh_expression(property, expression);
        let new = self.current_value(property);
        self.notify_if_changed(property, old, new);
        Ok(())
    }

    /// Writes `entry` over whatever the store holds for `property`.
    fn replace_entry(
        &self,
        property: DependencyProperty,
        entry: EffectiveValueEntry,
    ) -> Option<EffectiveValueEntry> {
        let mut store = self.inner.store.borrow_mut();
        let index = store.lookup(property.id());
        store.set_effective_value(index, entry)
    }

    fn detach_previous(&self, property: DependencyProperty, previous: Option<EffectiveValueEntry>) {
        if let Some(expression) = previous.as_ref().and_then(EffectiveValueEntry::expression) {
            self.detach_expression(property, expression);
        }
    }

    fn detach_expression(&self, property: DependencyProperty, expression: &Expression) {
        for source in expression.sources() {
            if let Some(object) = source.object() {
                object.remove_dependent(source.property(), Some(self), property, expression);
            }
        }
        expression.mark_detached();
        expression.behavior().on_detach(self, property);
        tracing::trace!(property = property.name(), "detached expression");
    }

    /// Asks `expression` for a fresh value and stores it, if the expression
    /// is still attached to `property`.
    fn refresh_expression(&self, property: DependencyProperty, expression: &Expression) {
        let value = expression
            .behavior()
            .value(self, property)
            .filter(|value| {
                let matches = value.type_id() == property.value_type();
                if !matches {
                    tracing::warn!(
                        property = property.name(),
                        expected = property.value_type_name(),
                        found = value.type_name(),
                        "expression produced a value of the wrong type"
                    );
                }
                matches
            });

        let mut store = self.inner.store.borrow_mut();
        if let Some(entry) = store.get_mut(property.id())
            && let EntryValue::Expression {
                expression: current,
                value: slot,
            } = entry.value_mut()
            && current.ptr_eq(expression)
        {
            *slot = value;
        }
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    /// Re-resolves `property` and invalidates its dependents.
    ///
    /// An attached expression is asked for a new value first. The changed
    /// callback runs only if the effective value changed, but dependents are
    /// always invalidated.
    ///
    /// While the dependents of a property are being walked, a nested
    /// invalidation of the same property on the same object does not start
    /// another walk. This stops cycles, but it also applies when a callback
    /// writes the property again during the walk: the new value is stored,
    /// and dependents visited later in the walk read it, but dependents
    /// already visited are not notified a second time. The nested
    /// invalidation is logged as a cycle at `warn` level.
    pub fn invalidate_property(&self, property: impl Into<DependencyProperty>) {
        let property = property.into();
        let old = self.current_value(property);
        if let Some(expression) = self.expression(property) {
            self.refresh_expression(property, &expression);
        }
        let new = self.current_value(property);

        let change = PropertyChange { property, old, new };
        if change.is_effective() {
            property
                .metadata_for(self.inner.ty)
                .on_changed(self, &change);
        }
        self.invalidate_dependents(&change);
    }

    /// Registers a dependent of `source_property` on this object.
    ///
    /// When the property is invalidated, `expression` is notified and, unless
    /// it forwards invalidations, `dependent_property` is invalidated on
    /// `dependent_object`. Nothing is kept alive by the registration.
    pub fn add_dependent(
        &self,
        source_property: impl Into<DependencyProperty>,
        dependent_object: Option<&Self>,
        dependent_property: impl Into<DependencyProperty>,
        expression: &Expression,
    ) {
        let source_property = source_property.into();
        let dependent = Dependent::new(dependent_object, dependent_property.into(), expression);
        self.inner
            .dependents
            .borrow_mut()
            .entry(source_property.id())
            .or_default()
            .add(dependent);
    }

    /// Removes a dependent registered with [`add_dependent`](Self::add_dependent).
    ///
    /// Returns `false` if no matching live entry was registered.
    pub fn remove_dependent(
        &self,
        source_property: impl Into<DependencyProperty>,
        dependent_object: Option<&Self>,
        dependent_property: impl Into<DependencyProperty>,
        expression: &Expression,
    ) -> bool {
        let id = source_property.into().id();
        let dependent = Dependent::new(dependent_object, dependent_property.into(), expression);
        let mut dependents = self.inner.dependents.borrow_mut();
        let Some(list) = dependents.get_mut(&id) else {
            return false;
        };
        let removed = list.remove(&dependent);
        if list.is_empty() {
            dependents.remove(&id);
        }
        removed
    }

    /// Returns `true` if `property` has live dependents.
    #[must_use]
    pub fn has_dependents(&self, property: impl Into<DependencyProperty>) -> bool {
        self.inner
            .dependents
            .borrow()
            .get(&property.into().id())
            .is_some_and(|list| !list.is_empty())
    }

    fn notify_if_changed(&self, property: DependencyProperty, old: ChangedValue, new: ChangedValue) {
        let change = PropertyChange { property, old, new };
        if !change.is_effective() {
            return;
        }
        property
            .metadata_for(self.inner.ty)
            .on_changed(self, &change);
        self.invalidate_dependents(&change);
    }

    fn invalidate_dependents(&self, change: &PropertyChange) {
        let property = change.property;
        let id = property.id();
        let snapshot = match self.inner.dependents.borrow().get(&id) {
            Some(list) => list.snapshot(),
            None => return,
        };
        if snapshot.is_empty() {
            return;
        }

        {
            let mut propagating = self.inner.propagating.borrow_mut();
            if propagating.contains(&id) {
                tracing::warn!(
                    property = property.name(),
                    owner = self.inner.ty.name(),
                    "dependency cycle detected, stopping invalidation"
                );
                return;
            }
            propagating.push(id);
        }
        let _guard = PropagationGuard { object: self, id };

        tracing::trace!(
            property = property.name(),
            dependents = snapshot.len(),
            "invalidating dependents"
        );
        snapshot.invalidate(self, change);
    }
}

impl fmt::Debug for DependencyObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyObject")
            .field("type", &self.inner.ty.name())
            .field("context", &self.inner.context)
            .field("values", &self.inner.store.borrow().len())
            .finish_non_exhaustive()
    }
}

fn check_write_access(
    property: DependencyProperty,
    key: Option<&DependencyPropertyKey>,
) -> Result<()> {
    match key {
        Some(key) if !key.unlocks(property) => Err(Error::WriteKeyMismatch {
            property: property.name(),
            key: key.property().name(),
        }),
        None if property.is_read_only() => Err(Error::ReadOnly {
            property: property.name(),
        }),
        _ => Ok(()),
    }
}

enum BaseValue {
    Value(ErasedValue),
    Factory(Rc<DeferredMutableDefaultReference>),
}

struct PropagationGuard<'a> {
    object: &'a DependencyObject,
    id: PropertyId,
}

impl Drop for PropagationGuard<'_> {
    fn drop(&mut self) {
        let mut propagating = self.object.inner.propagating.borrow_mut();
        if let Some(index) = propagating.iter().rposition(|id| *id == self.id) {
            propagating.remove(index);
        }
    }
}

/// A weak handle to a [`DependencyObject`].
#[derive(Clone, Default)]
pub struct WeakDependencyObject {
    inner: Weak<ObjectInner>,
}

impl WeakDependencyObject {
    /// Returns the object, if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<DependencyObject> {
        self.inner.upgrade().map(|inner| DependencyObject { inner })
    }

    /// Returns `true` if the object is still alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    /// Returns `true` if both handles refer to the same allocation.
    #[must_use]
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.inner.ptr_eq(&other.inner)
    }
}

impl fmt::Debug for WeakDependencyObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(object) => f
                .debug_tuple("WeakDependencyObject")
                .field(&object.inner.ty.name())
                .finish(),
            None => f.write_str("WeakDependencyObject(<dropped>)"),
        }
    }
}

/// One side of a [`PropertyChange`].
///
/// Deferred values are only computed if somebody asks for them.
#[derive(Clone)]
pub enum ChangedValue {
    /// A concrete value.
    Value(ErasedValue),
    /// A value that has not been computed.
    Deferred {
        /// The deferred reference.
        reference: Rc<dyn DeferredReference>,
        /// The base value source of the slot.
        source: BaseValueSource,
    },
}

impl ChangedValue {
    /// Returns the value, computing it if it is deferred.
    #[must_use]
    pub fn resolve(&self) -> ErasedValue {
        match self {
            Self::Value(value) => value.clone(),
            Self::Deferred { reference, source } => reference.value(*source),
        }
    }

    /// Returns `true` if the value has not been computed.
    #[must_use]
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred { .. })
    }
}

impl fmt::Debug for ChangedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Deferred { source, .. } => f
                .debug_struct("Deferred")
                .field("source", source)
                .finish_non_exhaustive(),
        }
    }
}

/// Describes a change of a property's effective value.
///
/// Passed to changed callbacks and to
/// [`ExpressionBehavior::on_property_invalidation`](crate::ExpressionBehavior::on_property_invalidation).
/// For a forced [invalidation](DependencyObject::invalidate_property) the
/// old and new values may be equal.
#[derive(Clone, Debug)]
pub struct PropertyChange {
    property: DependencyProperty,
    old: ChangedValue,
    new: ChangedValue,
}

impl PropertyChange {
    /// Returns the property that changed.
    #[must_use]
    #[inline]
    pub fn property(&self) -> DependencyProperty {
        self.property
    }

    /// Returns the value before the change.
    #[must_use]
    pub fn before(&self) -> &ChangedValue {
        &self.old
    }

    /// Returns the value after the change.
    #[must_use]
    pub fn after(&self) -> &ChangedValue {
        &self.new
    }

    /// Returns the value before the change as a `T`.
    #[must_use]
    pub fn old_value<T: PropertyValue>(&self) -> Option<T> {
        self.old.resolve().get()
    }

    /// Returns the value after the change as a `T`.
    #[must_use]
    pub fn new_value<T: PropertyValue>(&self) -> Option<T> {
        self.new.resolve().get()
    }

    /// Returns `true` unless both sides are known to be equal.
    ///
    /// A deferred side always counts as a change.
    #[must_use]
    pub fn is_effective(&self) -> bool {
        match (&self.old, &self.new) {
            (ChangedValue::Value(old), ChangedValue::Value(new)) => old != new,
            _ => true,
        }
    }
}
