// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Expressions: live computations attached to property slots.
//!
//! An [`Expression`] supplies the effective value of the (object, property)
//! slot it is attached to, and declares the [`DependencySource`]s it reads.
//! Attaching registers the expression in each source's dependent list, so a
//! change of any source invalidates the target slot.
//!
//! ## Lifecycle
//!
//! ```text
//! Unattached --attach--> Attached --detach--> Detached
//! ```
//!
//! A [shareable](ExpressionMode::Shareable) expression may be attached to any
//! number of slots. Any other expression is consumed by its first attachment
//! and can never be attached again, even after it is detached.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::context;
use crate::error::{Error, Result};
use crate::id::DependencyProperty;
use crate::object::{DependencyObject, PropertyChange, WeakDependencyObject};
use crate::value::ErasedValue;

/// How an expression may be attached and how invalidations reach its target.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ExpressionMode {
    /// May be attached to many slots at once. Its sources are fixed.
    #[default]
    Shareable,
    /// Attached to at most one slot, ever.
    NonShareable,
    /// Non-shareable, and invalidates its target itself.
    ///
    /// The engine notifies the expression of source changes but does not
    /// invalidate the target slot on its behalf.
    ForwardsInvalidations,
    /// Forwards invalidations and accepts sources from any context.
    SupportsUnboundSources,
}

impl ExpressionMode {
    /// Returns `true` if expressions in this mode may be attached to many slots.
    #[must_use]
    #[inline]
    pub fn is_shareable(self) -> bool {
        matches!(self, Self::Shareable)
    }

    /// Returns `true` if the expression is responsible for invalidating its
    /// own target.
    #[must_use]
    #[inline]
    pub fn forwards_invalidations(self) -> bool {
        matches!(self, Self::ForwardsInvalidations | Self::SupportsUnboundSources)
    }

    /// Returns `true` if sources may live in another context.
    #[must_use]
    #[inline]
    pub fn supports_unbound_sources(self) -> bool {
        matches!(self, Self::SupportsUnboundSources)
    }
}

/// The behavior of an [`Expression`].
///
/// Every method has a default, so implementations only override what they
/// need.
pub trait ExpressionBehavior: 'static {
    /// The sources the expression initially depends on.
    fn sources(&self) -> Vec<DependencySource> {
        Vec::new()
    }

    /// Computes the value for `property` on `target`.
    ///
    /// `None` defers to normal resolution: inherited value or default.
    fn value(&self, target: &DependencyObject, property: DependencyProperty) -> Option<ErasedValue> {
        let _ = (target, property);
        None
    }

    /// Intercepts a write to the slot the expression is attached to.
    ///
    /// Returns `true` if the write was handled. Otherwise the expression is
    /// detached and replaced by the written value.
    fn set_value(
        &self,
        target: &DependencyObject,
        property: DependencyProperty,
        value: &ErasedValue,
    ) -> bool {
        let _ = (target, property, value);
        false
    }

    /// Called once the expression is attached to `property` on `target`.
    fn on_attach(&self, target: &DependencyObject, property: DependencyProperty) {
        let _ = (target, property);
    }

    /// Called once the expression is detached from `property` on `target`.
    fn on_detach(&self, target: &DependencyObject, property: DependencyProperty) {
        let _ = (target, property);
    }

    /// Called when one of the expression's sources is invalidated.
    fn on_property_invalidation(&self, source: &DependencyObject, change: &PropertyChange) {
        let _ = (source, change);
    }
}

/// A property of a specific object that an expression reads.
///
/// The object is held weakly; a source whose object is gone is ignored.
#[derive(Clone)]
pub struct DependencySource {
    object: WeakDependencyObject,
    property: DependencyProperty,
}

impl DependencySource {
    /// Creates a source for `property` on `object`.
    pub fn new(object: &DependencyObject, property: impl Into<DependencyProperty>) -> Self {
        Self {
            object: object.downgrade(),
            property: property.into(),
        }
    }

    /// Returns the source object, if it is still alive.
    #[must_use]
    pub fn object(&self) -> Option<DependencyObject> {
        self.object.upgrade()
    }

    /// Returns the source property.
    #[must_use]
    #[inline]
    pub fn property(&self) -> DependencyProperty {
        self.property
    }
}

impl PartialEq for DependencySource {
    fn eq(&self, other: &Self) -> bool {
        self.property == other.property && self.object.ptr_eq(&other.object)
    }
}

impl fmt::Debug for DependencySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencySource")
            .field("object", &self.object)
            .field("property", &self.property.name())
            .finish()
    }
}

const ATTACHED: u8 = 1 << 0;
const DETACHED: u8 = 1 << 1;

struct ExpressionInner {
    mode: ExpressionMode,
    /// One-way `ATTACHED`/`DETACHED` transitions.
    flags: Cell<u8>,
    sources: RefCell<Vec<DependencySource>>,
    behavior: Box<dyn ExpressionBehavior>,
}

/// A shared handle to an expression.
///
/// Cloning the handle does not clone the expression.
///
/// # Example
///
/// ```rust
/// use understory_dependency::{
///     DEPENDENCY_OBJECT, DependencyObject, DependencyProperty, ErasedValue, Expression,
///     ExpressionBehavior, ExpressionMode, ObjectClass, PropertyMetadata, PropertyRegistry,
/// };
///
/// struct Constant(f64);
///
/// impl ExpressionBehavior for Constant {
///     fn value(&self, _: &DependencyObject, _: DependencyProperty) -> Option<ErasedValue> {
///         Some(ErasedValue::new(self.0))
///     }
/// }
///
/// static LABEL: ObjectClass = ObjectClass::new("Label", Some(&DEPENDENCY_OBJECT));
/// let size = PropertyRegistry::global()
///     .register("FontSize", &LABEL, PropertyMetadata::new(12.0_f64))
///     .unwrap();
///
/// let label = DependencyObject::new(&LABEL).unwrap();
/// let expression = Expression::new(ExpressionMode::NonShareable, Constant(16.0));
/// label.set_expression(size, &expression).unwrap();
///
/// assert_eq!(label.get_value(size), 16.0);
/// assert!(!expression.is_attachable());
/// ```
#[derive(Clone)]
pub struct Expression {
    inner: Rc<ExpressionInner>,
}

impl Expression {
    /// Creates a free-standing expression.
    ///
    /// The initial sources are taken from [`ExpressionBehavior::sources`].
    pub fn new(mode: ExpressionMode, behavior: impl ExpressionBehavior) -> Self {
        let sources = behavior.sources();
        Self {
            inner: Rc::new(ExpressionInner {
                mode,
                flags: Cell::new(0),
                sources: RefCell::new(sources),
                behavior: Box::new(behavior),
            }),
        }
    }

    /// Returns the expression's mode.
    #[must_use]
    #[inline]
    pub fn mode(&self) -> ExpressionMode {
        self.inner.mode
    }

    /// Returns `true` if the expression may be attached to many slots.
    #[must_use]
    #[inline]
    pub fn is_shareable(&self) -> bool {
        self.inner.mode.is_shareable()
    }

    /// Returns `true` if the expression can be attached now.
    ///
    /// Shareable expressions always can; others only before their first
    /// attachment.
    #[must_use]
    pub fn is_attachable(&self) -> bool {
        self.is_shareable() || self.inner.flags.get() & ATTACHED == 0
    }

    /// Returns `true` if the expression has been attached and, unless it is
    /// shareable, not yet detached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        let flags = self.inner.flags.get();
        flags & ATTACHED != 0 && (self.is_shareable() || flags & DETACHED == 0)
    }

    /// Returns `true` once the expression has been detached from a slot.
    #[must_use]
    pub fn has_been_detached(&self) -> bool {
        self.inner.flags.get() & DETACHED != 0
    }

    /// Returns the sources the expression currently depends on.
    #[must_use]
    pub fn sources(&self) -> Vec<DependencySource> {
        self.inner.sources.borrow().clone()
    }

    /// Returns the expression's behavior.
    #[must_use]
    pub fn behavior(&self) -> &dyn ExpressionBehavior {
        &*self.inner.behavior
    }

    /// Returns `true` if both handles refer to the same expression.
    #[must_use]
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Creates a weak handle to this expression.
    #[must_use]
    pub fn downgrade(&self) -> WeakExpression {
        WeakExpression {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Replaces the sources of an attached expression.
    ///
    /// The expression is removed from the dependent lists of its old sources
    /// and added to those of `new_sources`. Nothing changes if an error is
    /// returned.
    ///
    /// # Errors
    ///
    /// - [`Error::SharedExpressionSources`] if the expression is shareable.
    /// - [`Error::ExpressionNotAttached`] if the expression is not attached
    ///   to `property` on `target`.
    /// - [`Error::CrossContextSource`] if a new source lives in a different
    ///   context than `target` and the mode does not support unbound sources.
    pub fn change_sources(
        &self,
        target: &DependencyObject,
        property: impl Into<DependencyProperty>,
        new_sources: Vec<DependencySource>,
    ) -> Result<()> {
        let property = property.into();
        if self.is_shareable() {
            return Err(Error::SharedExpressionSources);
        }
        let in_slot = target
            .expression(property)
            .is_some_and(|current| current.ptr_eq(self));
        if !self.is_attached() || (!self.mode().forwards_invalidations() && !in_slot) {
            return Err(Error::ExpressionNotAttached {
                property: property.name(),
            });
        }
        self.check_source_contexts(target, property, &new_sources)?;

        let old_sources = self.inner.sources.replace(Vec::new());
        for source in &old_sources {
            if let Some(object) = source.object() {
                object.remove_dependent(source.property, Some(target), property, self);
            }
        }
        for source in &new_sources {
            if let Some(object) = source.object() {
                object.add_dependent(source.property, Some(target), property, self);
            }
        }
        tracing::trace!(
            property = property.name(),
            old = old_sources.len(),
            new = new_sources.len(),
            "changed expression sources"
        );
        *self.inner.sources.borrow_mut() = new_sources;
        Ok(())
    }

    pub(crate) fn check_source_contexts(
        &self,
        target: &DependencyObject,
        property: DependencyProperty,
        sources: &[DependencySource],
    ) -> Result<()> {
        if self.mode().supports_unbound_sources() {
            return Ok(());
        }
        for source in sources {
            if let Some(object) = source.object()
                && !context::compatible(object.context(), target.context())
            {
                return Err(Error::CrossContextSource {
                    property: property.name(),
                    source_property: source.property.name(),
                });
            }
        }
        Ok(())
    }

    pub(crate) fn mark_attached(&self) {
        self.inner.flags.set(self.inner.flags.get() | ATTACHED);
    }

    pub(crate) fn mark_detached(&self) {
        self.inner.flags.set(self.inner.flags.get() | DETACHED);
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expression")
            .field("mode", &self.inner.mode)
            .field("attached", &self.is_attached())
            .field("detached", &self.has_been_detached())
            .field("sources", &self.inner.sources.borrow().len())
            .finish_non_exhaustive()
    }
}

/// A weak handle to an [`Expression`].
#[derive(Clone, Default)]
pub struct WeakExpression {
    inner: Weak<ExpressionInner>,
}

impl WeakExpression {
    /// Returns the expression, if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Expression> {
        self.inner.upgrade().map(|inner| Expression { inner })
    }

    /// Returns `true` if the expression is still alive.
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

impl fmt::Debug for WeakExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakExpression")
            .field("alive", &self.is_alive())
            .finish()
    }
}
