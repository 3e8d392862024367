// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Understory Dependency: sparse property storage with weak invalidation tracking.
//!
//! This crate provides the substrate of a dependency property system: objects
//! that store typed, registered properties sparsely, expressions that compute
//! property values from other properties, and synchronous, transitive
//! invalidation when a source changes.
//!
//! ## Core Concepts
//!
//! ### Types
//!
//! Participating classes are described by static [`ObjectClass`] values that
//! derive, directly or indirectly, from [`DEPENDENCY_OBJECT`]. Each class is
//! resolved once to a process-wide [`DependencyObjectType`] with a dense id;
//! base classes always receive smaller ids than their subclasses, and a
//! class's static initializer runs exactly once, after those of its bases.
//!
//! ### Properties
//!
//! Properties are registered on a class in the global [`PropertyRegistry`]
//! with [`PropertyMetadata`]: a default value, an inheritance flag and
//! optional callbacks. Registration hands back a typed [`Property<T>`]
//! handle, or for read-only properties a [`PropertyWriteKey<T>`], the only
//! credential that can write them.
//!
//! ### Storage
//!
//! Each [`DependencyObject`] keeps an [`EffectiveValueStore`] holding only the
//! properties that differ from their defaults.
//!
//! | Optimization | Description |
//! |--------------|-------------|
//! | **Sparse storage** | Only non-default values allocate an entry |
//! | **Shared defaults** | Default values live in the metadata, not per object |
//! | **Inline storage** | `SmallVec` keeps small property sets off the heap |
//! | **`PropertyId` as u16** | Compact property identification |
//! | **Deferred values** | Expensive values are computed on first read |
//!
//! ### Expressions and invalidation
//!
//! An [`Expression`] attached to a property slot supplies its value and
//! declares the [`DependencySource`]s it reads. Attaching registers the
//! expression in each source's [`DependentList`]. Those lists hold their
//! entries weakly: a dependent that is dropped simply stops being notified.
//! When a source property changes, its dependents are notified in
//! registration order, and their own dependents in turn.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! use understory_dependency::{
//!     DEPENDENCY_OBJECT, DependencyObject, DependencyProperty, DependencySource, ErasedValue,
//!     Expression, ExpressionBehavior, ExpressionMode, ObjectClass, Property, PropertyChange,
//!     PropertyMetadata, PropertyRegistry,
//! };
//!
//! static BOX: ObjectClass = ObjectClass::new("Box", Some(&DEPENDENCY_OBJECT));
//!
//! let registry = PropertyRegistry::global();
//! let width: Property<f64> = registry
//!     .register("Width", &BOX, PropertyMetadata::new(0.0))
//!     .unwrap();
//! let doubled: Property<f64> = registry
//!     .register("Doubled", &BOX, PropertyMetadata::new(0.0))
//!     .unwrap();
//!
//! // An expression computing `Doubled` from another box's `Width`.
//! struct Double {
//!     source: DependencyObject,
//!     width: Property<f64>,
//!     notified: Rc<Cell<u32>>,
//! }
//!
//! impl ExpressionBehavior for Double {
//!     fn sources(&self) -> Vec<DependencySource> {
//!         vec![DependencySource::new(&self.source, self.width)]
//!     }
//!
//!     fn value(&self, _: &DependencyObject, _: DependencyProperty) -> Option<ErasedValue> {
//!         Some(ErasedValue::new(self.source.get_value(self.width) * 2.0))
//!     }
//!
//!     fn on_property_invalidation(&self, _: &DependencyObject, _: &PropertyChange) {
//!         self.notified.set(self.notified.get() + 1);
//!     }
//! }
//!
//! let source = DependencyObject::new(&BOX).unwrap();
//! let target = DependencyObject::new(&BOX).unwrap();
//! let notified = Rc::new(Cell::new(0));
//!
//! let expression = Expression::new(
//!     ExpressionMode::NonShareable,
//!     Double { source: source.clone(), width, notified: notified.clone() },
//! );
//! target.set_expression(doubled, &expression).unwrap();
//!
//! source.set_value(width, 21.0).unwrap();
//! assert_eq!(target.get_value(doubled), 42.0);
//! assert_eq!(notified.get(), 1);
//!
//! // Writing the same value again does not notify anybody.
//! source.set_value(width, 21.0).unwrap();
//! assert_eq!(notified.get(), 1);
//! ```
//!
//! ## Threading
//!
//! Type identities and the property registry are process-wide and
//! thread-safe. Objects, expressions and dependent lists are not: each object
//! belongs to one [`ContextId`], and expressions may only read sources from
//! the context of their target unless their mode is
//! [`ExpressionMode::SupportsUnboundSources`].
//!
//! The crate requires `std` for the process-wide tables and the per-thread
//! context.
//!
//! ## Logging
//!
//! The crate emits [`tracing`] events: `debug` for type and property
//! registration, `trace` for expression attachment and invalidation passes,
//! and `warn` when invalidation detects a dependency cycle and stops.

mod context;
mod deferred;
mod dependent;
mod error;
mod expression;
mod id;
mod metadata;
mod object;
mod registry;
mod store;
mod type_identity;
mod value;

pub use context::ContextId;
pub use deferred::{DeferredMutableDefaultReference, DeferredReference, DeferredValue};
pub use dependent::{Dependent, DependentList, DependentSnapshot};
pub use error::{Error, ErrorKind, Result};
pub use expression::{
    DependencySource, Expression, ExpressionBehavior, ExpressionMode, WeakExpression,
};
pub use id::{DependencyProperty, DependencyPropertyKey, Property, PropertyId, PropertyWriteKey};
pub use metadata::{
    CoerceValueCallback, DefaultValueFactory, PropertyChangedCallback, PropertyMetadata,
    PropertyMetadataBuilder, ValidateValueCallback,
};
pub use object::{ChangedValue, DependencyObject, PropertyChange, WeakDependencyObject};
pub use registry::PropertyRegistry;
pub use store::{
    BaseValueSource, EffectiveValueEntry, EffectiveValueStore, EntryIndex, EntryValue,
    INLINE_CAPACITY, ValueSource,
};
pub use type_identity::{DEPENDENCY_OBJECT, DependencyObjectType, ObjectClass};
pub use value::{ErasedValue, PropertyValue};
