// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-object sparse effective-value storage.
//!
//! This module provides [`EffectiveValueStore`], the sparse map from
//! [`PropertyId`] to [`EffectiveValueEntry`] that every
//! [`DependencyObject`](crate::DependencyObject) owns.
//!
//! # Implementation
//!
//! Entries live in a `SmallVec` ordered by [`PropertyId`] and are found by a
//! linear scan. Objects rarely hold more than a dozen entries, and at that
//! size a scan over contiguous memory beats hashing. The scan stops at the
//! first larger id, so a miss also yields the insertion position; lookups
//! return it as an [`EntryIndex`] so a lookup can be turned into an insert or
//! an overwrite without searching twice.

use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::deferred::DeferredReference;
use crate::expression::Expression;
use crate::id::{DependencyProperty, PropertyId};
use crate::value::ErasedValue;

/// Inline capacity for effective value entries.
///
/// Most objects have fewer than 8 non-default properties set,
/// so this avoids heap allocation in the common case.
pub const INLINE_CAPACITY: usize = 8;

/// Result of probing an [`EffectiveValueStore`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EntryIndex {
    /// An entry for the property exists at this position.
    Found(usize),
    /// No entry exists; one would be inserted at this position.
    Vacant(usize),
}

impl EntryIndex {
    /// Returns `true` if the lookup found an entry.
    #[must_use]
    #[inline]
    pub fn is_found(self) -> bool {
        matches!(self, Self::Found(_))
    }

    /// Returns the position, whether found or not.
    #[must_use]
    #[inline]
    pub fn position(self) -> usize {
        match self {
            Self::Found(index) | Self::Vacant(index) => index,
        }
    }
}

/// Where the base of an effective value comes from.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum BaseValueSource {
    /// Not determined.
    #[default]
    Unknown,
    /// The property's default, from metadata.
    Default,
    /// Inherited from an ancestor object.
    Inherited,
    /// Set directly on the object.
    Local,
}

/// Full description of how a property's effective value was produced.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ValueSource {
    /// Where the base value comes from.
    pub base: BaseValueSource,
    /// The slot holds an expression.
    pub is_expression: bool,
    /// Coercion changed the value that was written.
    pub is_coerced: bool,
    /// The value is a deferred reference that has not been read yet.
    pub is_deferred: bool,
}

/// The payload of an [`EffectiveValueEntry`].
#[derive(Clone)]
pub enum EntryValue {
    /// A concrete value.
    Value(ErasedValue),
    /// A lazily computed value, replaced by its result on first read.
    Deferred(Rc<dyn DeferredReference>),
    /// An attached expression and the value it last produced.
    ///
    /// `None` means the expression had no value and the property resolves
    /// as if the slot were empty.
    Expression {
        /// The attached expression.
        expression: Expression,
        /// The last value the expression produced.
        value: Option<ErasedValue>,
    },
}

impl fmt::Debug for EntryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Deferred(reference) => f
                .debug_tuple("Deferred")
                .field(&reference.value_type())
                .finish(),
            Self::Expression { expression, value } => f
                .debug_struct("Expression")
                .field("expression", expression)
                .field("value", value)
                .finish(),
        }
    }
}

/// One stored property value on an object.
///
/// The property's metadata is reached through [`property`](Self::property).
#[derive(Clone, Debug)]
pub struct EffectiveValueEntry {
    property: DependencyProperty,
    value: EntryValue,
    source: BaseValueSource,
    is_coerced: bool,
}

impl EffectiveValueEntry {
    /// Creates an entry.
    #[must_use]
    pub fn new(property: DependencyProperty, value: EntryValue, source: BaseValueSource) -> Self {
        Self {
            property,
            value,
            source,
            is_coerced: false,
        }
    }

    /// Marks whether coercion changed the stored value.
    #[must_use]
    pub fn with_coerced(mut self, is_coerced: bool) -> Self {
        self.is_coerced = is_coerced;
        self
    }

    /// Returns the property this entry belongs to.
    #[must_use]
    #[inline]
    pub fn property(&self) -> DependencyProperty {
        self.property
    }

    /// Returns the stored payload.
    #[must_use]
    #[inline]
    pub fn value(&self) -> &EntryValue {
        &self.value
    }

    /// Returns the stored payload mutably.
    #[inline]
    pub fn value_mut(&mut self) -> &mut EntryValue {
        &mut self.value
    }

    /// Returns the base value source.
    #[must_use]
    #[inline]
    pub fn source(&self) -> BaseValueSource {
        self.source
    }

    /// Returns `true` if coercion changed the stored value.
    #[must_use]
    #[inline]
    pub fn is_coerced(&self) -> bool {
        self.is_coerced
    }

    /// Returns the expression held by this entry, if any.
    #[must_use]
    pub fn expression(&self) -> Option<&Expression> {
        match &self.value {
            EntryValue::Expression { expression, .. } => Some(expression),
            _ => None,
        }
    }

    /// Describes how this entry's value was produced.
    #[must_use]
    pub fn value_source(&self) -> ValueSource {
        ValueSource {
            base: self.source,
            is_expression: matches!(self.value, EntryValue::Expression { .. }),
            is_coerced: self.is_coerced,
            is_deferred: matches!(self.value, EntryValue::Deferred(_)),
        }
    }
}

/// Sparse per-object storage of effective values.
///
/// # Example
///
/// ```rust
/// use understory_dependency::{
///     BaseValueSource, DEPENDENCY_OBJECT, EffectiveValueEntry, EffectiveValueStore, EntryIndex,
///     EntryValue, ErasedValue, ObjectClass, PropertyMetadata, PropertyRegistry,
/// };
///
/// static SHAPE: ObjectClass = ObjectClass::new("Shape", Some(&DEPENDENCY_OBJECT));
/// let width = PropertyRegistry::global()
///     .register("Width", &SHAPE, PropertyMetadata::new(0.0_f64))
///     .unwrap();
///
/// let mut store = EffectiveValueStore::new();
/// let index = store.lookup(width.id());
/// assert_eq!(index, EntryIndex::Vacant(0));
///
/// let entry = EffectiveValueEntry::new(
///     width.untyped(),
///     EntryValue::Value(ErasedValue::new(5.0_f64)),
///     BaseValueSource::Local,
/// );
/// assert!(store.set_effective_value(index, entry).is_none());
/// assert_eq!(store.lookup(width.id()), EntryIndex::Found(0));
///
/// store.unset_effective_value(store.lookup(width.id()));
/// assert!(store.is_empty());
/// ```
#[derive(Clone, Debug, Default)]
pub struct EffectiveValueStore {
    /// Entries, ordered by [`PropertyId`].
    entries: SmallVec<[EffectiveValueEntry; INLINE_CAPACITY]>,
}

impl EffectiveValueStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entries.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the store holds no entries.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Probes for the entry of `id`.
    #[must_use]
    pub fn lookup(&self, id: PropertyId) -> EntryIndex {
        for (index, entry) in self.entries.iter().enumerate() {
            let current = entry.property.id();
            if current == id {
                return EntryIndex::Found(index);
            }
            if current > id {
                return EntryIndex::Vacant(index);
            }
        }
        EntryIndex::Vacant(self.entries.len())
    }

    /// Returns the entry of `id`, if present.
    #[must_use]
    pub fn get(&self, id: PropertyId) -> Option<&EffectiveValueEntry> {
        match self.lookup(id) {
            EntryIndex::Found(index) => self.entries.get(index),
            EntryIndex::Vacant(_) => None,
        }
    }

    /// Returns the entry of `id` mutably, if present.
    pub fn get_mut(&mut self, id: PropertyId) -> Option<&mut EffectiveValueEntry> {
        match self.lookup(id) {
            EntryIndex::Found(index) => self.entries.get_mut(index),
            EntryIndex::Vacant(_) => None,
        }
    }

    /// Stores `entry` at a position obtained from [`lookup`](Self::lookup).
    ///
    /// A found index is overwritten in place and the previous entry is
    /// returned; a vacant index inserts at the hinted position.
    ///
    /// The index must come from a `lookup` of `entry`'s property with no
    /// intervening mutation.
    pub fn set_effective_value(
        &mut self,
        index: EntryIndex,
        entry: EffectiveValueEntry,
    ) -> Option<EffectiveValueEntry> {
        debug_assert_eq!(
            index,
            self.lookup(entry.property.id()),
            "stale entry index for {}",
            entry.property.name()
        );
        match index {
            EntryIndex::Found(position) => {
                Some(std::mem::replace(&mut self.entries[position], entry))
            }
            EntryIndex::Vacant(position) => {
                self.entries.insert(position, entry);
                None
            }
        }
    }

    /// Removes the entry at `index`, returning it.
    ///
    /// A vacant index is a no-op.
    pub fn unset_effective_value(&mut self, index: EntryIndex) -> Option<EffectiveValueEntry> {
        match index {
            EntryIndex::Found(position) if position < self.entries.len() => {
                Some(self.entries.remove(position))
            }
            _ => None,
        }
    }

    /// Iterates over the stored entries in [`PropertyId`] order.
    pub fn iter(&self) -> impl Iterator<Item = &EffectiveValueEntry> + '_ {
        self.entries.iter()
    }

    /// Returns the ids of the stored properties in order.
    pub fn property_ids(&self) -> impl Iterator<Item = PropertyId> + '_ {
        self.entries.iter().map(|entry| entry.property.id())
    }
}
