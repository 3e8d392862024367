// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Weak dependent tracking and invalidation propagation.
//!
//! Every (object, property) pair that some expression reads keeps a
//! [`DependentList`]: the (dependent object, dependent property, expression)
//! triples to notify when the pair is invalidated. Entries hold their object
//! and expression weakly, so registering as a dependent never extends a
//! lifetime. An entry whose expression is gone is skipped; one whose object
//! is gone still notifies its expression. Expired entries are reclaimed
//! lazily when the list needs to grow.

use std::fmt;

use crate::expression::{Expression, WeakExpression};
use crate::id::DependencyProperty;
use crate::object::{DependencyObject, PropertyChange, WeakDependencyObject};

/// One entry of a [`DependentList`].
#[derive(Clone)]
pub struct Dependent {
    object: Option<WeakDependencyObject>,
    property: DependencyProperty,
    expression: WeakExpression,
}

impl Dependent {
    /// Creates an entry for `property` on `object`, driven by `expression`.
    ///
    /// With no object, only the expression is notified on invalidation.
    #[must_use]
    pub fn new(
        object: Option<&DependencyObject>,
        property: DependencyProperty,
        expression: &Expression,
    ) -> Self {
        Self {
            object: object.map(DependencyObject::downgrade),
            property,
            expression: expression.downgrade(),
        }
    }

    /// Returns `true` while the expression, and the object if there is one,
    /// are alive.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.expression.is_alive() && self.object.as_ref().is_none_or(|object| object.is_alive())
    }

    /// Returns the dependent object, if there is one and it is alive.
    #[must_use]
    pub fn object(&self) -> Option<DependencyObject> {
        self.object.as_ref().and_then(WeakDependencyObject::upgrade)
    }

    /// Returns the dependent property.
    #[must_use]
    #[inline]
    pub fn property(&self) -> DependencyProperty {
        self.property
    }

    /// Returns the expression, if it is alive.
    #[must_use]
    pub fn expression(&self) -> Option<Expression> {
        self.expression.upgrade()
    }
}

/// Entries compare equal only while both are valid.
impl PartialEq for Dependent {
    fn eq(&self, other: &Self) -> bool {
        if !self.is_valid() || !other.is_valid() {
            return false;
        }
        let same_object = match (&self.object, &other.object) {
            (Some(a), Some(b)) => a.ptr_eq(b),
            (None, None) => true,
            _ => false,
        };
        same_object && self.property == other.property && self.expression.ptr_eq(&other.expression)
    }
}

impl fmt::Debug for Dependent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependent")
            .field("object", &self.object)
            .field("property", &self.property.name())
            .field("expression", &self.expression)
            .finish()
    }
}

/// The dependents of one (object, property) source.
///
/// # Example
///
/// ```rust
/// use understory_dependency::{
///     DEPENDENCY_OBJECT, Dependent, DependentList, Expression, ExpressionBehavior,
///     ExpressionMode, ObjectClass, PropertyMetadata, PropertyRegistry,
/// };
///
/// struct Watch;
/// impl ExpressionBehavior for Watch {}
///
/// static NODE: ObjectClass = ObjectClass::new("Node", Some(&DEPENDENCY_OBJECT));
/// let value = PropertyRegistry::global()
///     .register("Value", &NODE, PropertyMetadata::new(0_i32))
///     .unwrap();
///
/// let expression = Expression::new(ExpressionMode::NonShareable, Watch);
/// let mut list = DependentList::new();
/// list.add(Dependent::new(None, value.untyped(), &expression));
/// assert!(!list.is_empty());
///
/// // The list does not keep the expression alive.
/// drop(expression);
/// assert!(list.is_empty());
/// ```
#[derive(Clone, Default)]
pub struct DependentList {
    entries: Vec<Dependent>,
}

impl DependentList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `dependent`.
    ///
    /// When the backing storage is full, expired entries are dropped first,
    /// so growth follows the number of live entries.
    pub fn add(&mut self, dependent: Dependent) {
        if self.entries.len() == self.entries.capacity() {
            self.compact();
        }
        self.entries.push(dependent);
    }

    /// Removes the first live entry equal to `dependent`.
    ///
    /// Returns `false` if there was none.
    pub fn remove(&mut self, dependent: &Dependent) -> bool {
        match self.entries.iter().position(|entry| entry == dependent) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Returns `true` if no entry is valid.
    ///
    /// Expired entries are not reclaimed by this check.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.entries.iter().any(Dependent::is_valid)
    }

    /// Returns the number of stored entries, including expired ones that have
    /// not been reclaimed yet.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drops expired entries.
    pub fn compact(&mut self) {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.is_valid());
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::trace!(removed, remaining = self.entries.len(), "compacted dependent list");
        }
    }

    /// Iterates over the stored entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Dependent> + '_ {
        self.entries.iter()
    }

    /// Copies the entries whose expression is alive, in insertion order.
    ///
    /// Invalidation walks a snapshot, so callbacks may add or remove entries
    /// of the live list without affecting the pass in progress.
    #[must_use]
    pub fn snapshot(&self) -> DependentSnapshot {
        DependentSnapshot {
            entries: self
                .entries
                .iter()
                .filter(|entry| entry.expression.is_alive())
                .cloned()
                .collect(),
        }
    }
}

impl fmt::Debug for DependentList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.entries).finish()
    }
}

/// A frozen copy of a [`DependentList`].
#[derive(Clone, Debug, Default)]
pub struct DependentSnapshot {
    entries: Vec<Dependent>,
}

impl DependentSnapshot {
    /// Returns the number of entries.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the snapshot has no entries.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Notifies every dependent that `source` changed.
    ///
    /// For each entry whose expression is still alive, the expression is told
    /// about the change. Unless the expression forwards invalidations itself,
    /// the dependent property is then invalidated on the dependent object if
    /// that object is still alive, which propagates further. Entries with a
    /// dead expression are skipped.
    pub fn invalidate(&self, source: &DependencyObject, change: &PropertyChange) {
        for dependent in &self.entries {
            let Some(expression) = dependent.expression() else {
                continue;
            };

            expression
                .behavior()
                .on_property_invalidation(source, change);

            if expression.mode().forwards_invalidations() {
                continue;
            }
            if let Some(object) = dependent.object() {
                object.invalidate_property(dependent.property);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{ExpressionBehavior, ExpressionMode};
    use crate::metadata::PropertyMetadata;
    use crate::registry::PropertyRegistry;
    use crate::type_identity::{DEPENDENCY_OBJECT, ObjectClass};

    static DEPENDENT_TESTS: ObjectClass =
        ObjectClass::new("DependentTests", Some(&DEPENDENCY_OBJECT));

    struct Inert;

    impl ExpressionBehavior for Inert {}

    fn property(name: &'static str) -> DependencyProperty {
        PropertyRegistry::global()
            .register(name, &DEPENDENT_TESTS, PropertyMetadata::new(0_i32))
            .unwrap()
            .untyped()
    }

    fn expression() -> Expression {
        Expression::new(ExpressionMode::NonShareable, Inert)
    }

    #[test]
    fn validity_follows_referents() {
        let prop = property("Validity");
        let object = DependencyObject::new(&DEPENDENT_TESTS).unwrap();
        let expr = expression();

        let with_object = Dependent::new(Some(&object), prop, &expr);
        let without_object = Dependent::new(None, prop, &expr);
        assert!(with_object.is_valid());
        assert!(without_object.is_valid());

        drop(object);
        assert!(!with_object.is_valid());
        assert!(without_object.is_valid());

        drop(expr);
        assert!(!without_object.is_valid());
    }

    #[test]
    fn equality_only_between_live_entries() {
        let prop = property("Equality");
        let object = DependencyObject::new(&DEPENDENT_TESTS).unwrap();
        let expr = expression();

        let a = Dependent::new(Some(&object), prop, &expr);
        let b = Dependent::new(Some(&object), prop, &expr);
        assert_eq!(a, b);
        assert_ne!(a, Dependent::new(None, prop, &expr));
        assert_ne!(a, Dependent::new(Some(&object), prop, &expression()));

        drop(object);
        // A dead entry is not even equal to itself.
        assert_ne!(a, a.clone());
    }

    #[test]
    fn remove_by_value() {
        let prop = property("Remove");
        let expr = expression();
        let other = expression();
        let mut list = DependentList::new();
        list.add(Dependent::new(None, prop, &expr));
        list.add(Dependent::new(None, prop, &other));

        assert!(list.remove(&Dependent::new(None, prop, &expr)));
        assert_eq!(list.len(), 1);
        assert!(!list.remove(&Dependent::new(None, prop, &expr)));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn add_compacts_when_full() {
        let prop = property("Compact");
        let keep = expression();
        let mut list = DependentList::new();
        list.add(Dependent::new(None, prop, &keep));

        let mut dropped = std::vec::Vec::new();
        while list.len() < list.entries.capacity() {
            let expr = expression();
            list.add(Dependent::new(None, prop, &expr));
            dropped.push(expr);
        }
        let full = list.len();
        drop(dropped);
        assert_eq!(list.len(), full);
        assert!(!list.is_empty());

        list.add(Dependent::new(None, prop, &keep));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn empty_once_all_expired() {
        let prop = property("Expired");
        let object = DependencyObject::new(&DEPENDENT_TESTS).unwrap();
        let expr = expression();
        let mut list = DependentList::new();
        list.add(Dependent::new(Some(&object), prop, &expr));

        assert!(!list.is_empty());
        drop(object);
        assert!(list.is_empty());
        assert_eq!(list.len(), 1);
        // The expression is still notified.
        assert_eq!(list.snapshot().len(), 1);

        drop(expr);
        assert!(list.snapshot().is_empty());
    }
}
