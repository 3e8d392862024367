// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Runtime class descriptors and their cached identities.
//!
//! Rust has no class hierarchy, so participating types describe themselves
//! with a `static` [`ObjectClass`] that names its base class. The first time
//! a class is used, [`DependencyObjectType::from_class`] assigns it a dense
//! id and caches the result for the lifetime of the process.
//!
//! Ids are handed out in first-use order, and a base class is always
//! resolved before its derived classes. A derived type therefore always has
//! a larger id than each of its ancestors.
//!
//! ```rust
//! use understory_dependency::{DEPENDENCY_OBJECT, DependencyObjectType, ObjectClass};
//!
//! static SHAPE: ObjectClass = ObjectClass::new("Shape", Some(&DEPENDENCY_OBJECT));
//! static RECT: ObjectClass = ObjectClass::new("Rect", Some(&SHAPE));
//!
//! let rect = DependencyObjectType::from_class(&RECT).unwrap();
//! let shape = DependencyObjectType::from_class(&SHAPE).unwrap();
//!
//! assert!(shape.id() < rect.id());
//! assert!(rect.is_subclass_of(shape));
//! assert!(!shape.is_subclass_of(rect));
//! assert!(!rect.is_subclass_of(rect));
//! ```

use std::cell::RefCell;
use std::fmt;
use std::sync::LazyLock;

use hashbrown::HashMap;
use parking_lot::ReentrantMutex;
use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::object::DependencyObject;

/// Descriptor of a runtime class taking part in the property system.
///
/// Descriptors must be declared as `static` items: a class is identified by
/// the address of its descriptor, not by its name.
#[derive(Debug)]
pub struct ObjectClass {
    name: &'static str,
    base: Option<&'static ObjectClass>,
    static_init: Option<fn()>,
}

/// The root class of every dependency object class.
pub static DEPENDENCY_OBJECT: ObjectClass = ObjectClass::new("DependencyObject", None);

impl ObjectClass {
    /// Creates a class descriptor with the given base class.
    ///
    /// A class whose base chain does not end at [`DEPENDENCY_OBJECT`] can be
    /// declared, but is rejected by [`DependencyObjectType::from_class`].
    #[must_use]
    pub const fn new(name: &'static str, base: Option<&'static Self>) -> Self {
        Self {
            name,
            base,
            static_init: None,
        }
    }

    /// Attaches a one-time initializer to this class.
    ///
    /// The initializer runs exactly once per process, right after the class's
    /// identity is created and after the initializers of all its base classes.
    /// It is the natural place to register the class's properties.
    #[must_use]
    pub const fn with_static_init(mut self, init: fn()) -> Self {
        self.static_init = Some(init);
        self
    }

    /// Returns the class name.
    #[must_use]
    #[inline]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the base class, if any.
    #[must_use]
    #[inline]
    pub const fn base(&self) -> Option<&'static Self> {
        self.base
    }

    /// Returns `true` if the base chain of this class ends at
    /// [`DEPENDENCY_OBJECT`].
    #[must_use]
    pub fn is_participant(&self) -> bool {
        let mut seen: SmallVec<[*const Self; 8]> = SmallVec::new();
        let mut current = self;
        loop {
            if std::ptr::eq(current, &DEPENDENCY_OBJECT) {
                return true;
            }
            let ptr: *const Self = current;
            if seen.contains(&ptr) {
                // Malformed chain that loops back on itself.
                return false;
            }
            seen.push(ptr);
            match current.base {
                Some(base) => current = base,
                None => return false,
            }
        }
    }

    fn key(&'static self) -> usize {
        let ptr: *const Self = self;
        ptr as usize
    }
}

/// The cached identity of a participating [`ObjectClass`].
///
/// Identities are created once and live for the whole process, so they are
/// handed out as `&'static` references and compared by id.
pub struct DependencyObjectType {
    id: u32,
    class: &'static ObjectClass,
    base: Option<&'static DependencyObjectType>,
}

#[derive(Default)]
struct TypeTable {
    by_class: HashMap<usize, &'static DependencyObjectType>,
    by_id: Vec<&'static DependencyObjectType>,
}

// Reentrant so that class initializers may resolve other classes.
static TYPES: LazyLock<ReentrantMutex<RefCell<TypeTable>>> =
    LazyLock::new(|| ReentrantMutex::new(RefCell::new(TypeTable::default())));

impl DependencyObjectType {
    /// Returns the identity of `class`, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotAParticipant`] if the class does not derive from
    /// [`DEPENDENCY_OBJECT`].
    pub fn from_class(class: &'static ObjectClass) -> Result<&'static Self> {
        if !class.is_participant() {
            return Err(Error::NotAParticipant { class: class.name });
        }
        let guard = TYPES.lock();
        Ok(Self::resolve(&guard, class))
    }

    /// Returns the identity with the given id, if it has been created.
    #[must_use]
    pub fn from_id(id: u32) -> Option<&'static Self> {
        let guard = TYPES.lock();
        let table = guard.borrow();
        table.by_id.get(id as usize).copied()
    }

    fn resolve(table: &RefCell<TypeTable>, class: &'static ObjectClass) -> &'static Self {
        if let Some(found) = table.borrow().by_class.get(&class.key()).copied() {
            return found;
        }

        // Bases first, so ids grow from ancestor to descendant.
        let base = class.base.map(|base| Self::resolve(table, base));

        let created = {
            let mut table = table.borrow_mut();
            // A base initializer may already have resolved this class.
            if let Some(found) = table.by_class.get(&class.key()).copied() {
                return found;
            }
            let id = u32::try_from(table.by_id.len()).expect("type identity space exhausted");
            let created: &'static Self = Box::leak(Box::new(Self { id, class, base }));
            table.by_class.insert(class.key(), created);
            table.by_id.push(created);
            created
        };
        tracing::debug!(class = class.name, id = created.id, "created type identity");

        if let Some(init) = class.static_init {
            init();
        }
        created
    }

    /// Returns the dense process-wide id of this type.
    #[must_use]
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Returns the class name.
    #[must_use]
    #[inline]
    pub fn name(&self) -> &'static str {
        self.class.name
    }

    /// Returns the class descriptor.
    #[must_use]
    #[inline]
    pub fn class(&self) -> &'static ObjectClass {
        self.class
    }

    /// Returns the identity of the base class, or `None` for the root.
    #[must_use]
    #[inline]
    pub fn base_type(&self) -> Option<&'static Self> {
        self.base
    }

    /// Returns the identity chain starting at this type and ending at the root.
    pub fn ancestors_and_self(&'static self) -> impl Iterator<Item = &'static Self> {
        std::iter::successors(Some(self), |ty| ty.base)
    }

    /// Returns `true` if `object` is of this type or of a type derived from it.
    #[must_use]
    pub fn is_instance_of(&self, object: &DependencyObject) -> bool {
        object
            .dependency_object_type()
            .ancestors_and_self()
            .any(|ty| ty.id == self.id)
    }

    /// Returns `true` if this type strictly derives from `other`.
    ///
    /// A type is never a subclass of itself.
    #[must_use]
    pub fn is_subclass_of(&self, other: &Self) -> bool {
        self.base
            .is_some_and(|base| base.ancestors_and_self().any(|ty| ty.id == other.id))
    }
}

impl PartialEq for DependencyObjectType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DependencyObjectType {}

impl fmt::Debug for DependencyObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyObjectType")
            .field("id", &self.id)
            .field("name", &self.class.name)
            .field("base", &self.base.map(|b| b.class.name))
            .finish()
    }
}
