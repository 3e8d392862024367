// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Logical affinity contexts.
//!
//! Dependency objects are not synchronized. Each one belongs to a single
//! [`ContextId`], and every object an expression reads from is expected to
//! live in the same context as the object the expression is attached to.

use std::cell::Cell;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

std::thread_local! {
    static CURRENT: Cell<Option<ContextId>> = const { Cell::new(None) };
}

/// Identifies a logical single-threaded execution context.
///
/// # Example
///
/// ```rust
/// use understory_dependency::ContextId;
///
/// assert_eq!(ContextId::current(), ContextId::current());
/// assert_ne!(ContextId::current(), ContextId::new_unique());
/// ```
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct ContextId(NonZeroU64);

impl ContextId {
    /// Allocates a context id that no other caller will ever receive.
    #[must_use]
    pub fn new_unique() -> Self {
        let raw = NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed);
        Self(NonZeroU64::new(raw).expect("context id counter overflowed"))
    }

    /// Returns the context of the calling thread, allocating it on first use.
    #[must_use]
    pub fn current() -> Self {
        CURRENT.with(|current| {
            if let Some(id) = current.get() {
                id
            } else {
                let id = Self::new_unique();
                current.set(Some(id));
                id
            }
        })
    }

    /// Returns the raw numeric value.
    #[must_use]
    #[inline]
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContextId").field(&self.0).finish()
    }
}

/// Returns `true` unless both objects are bound to different contexts.
///
/// Objects created without a context are compatible with every context.
pub(crate) fn compatible(a: Option<ContextId>, b: Option<ContextId>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}
