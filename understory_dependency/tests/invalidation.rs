// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tests for invalidation propagation in `understory_dependency`.
//!
//! These exercise how writes and forced invalidations reach dependents: weak
//! entries that expire, callbacks that mutate the list being walked, the
//! forwarding contract, transitive chains and cycles.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use understory_dependency::{
    DEPENDENCY_OBJECT, DependencyObject, DependencyProperty, DependencySource, ErasedValue,
    Expression, ExpressionBehavior, ExpressionMode, ObjectClass, Property, PropertyChange,
    PropertyMetadata, PropertyRegistry, PropertyValue,
};
use tracing_subscriber::filter::LevelFilter;

static BOX: ObjectClass = ObjectClass::new("Box", Some(&DEPENDENCY_OBJECT));

fn register<T: PropertyValue>(name: &'static str, default: T) -> Property<T> {
    PropertyRegistry::global()
        .register(name, &BOX, PropertyMetadata::new(default))
        .unwrap()
}

/// Routes trace output through the test harness.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::TRACE)
        .with_test_writer()
        .try_init();
}

fn new_box() -> DependencyObject {
    DependencyObject::new(&BOX).unwrap()
}

/// Records every invalidation it is notified of.
#[derive(Clone, Default)]
struct Recorder {
    calls: Rc<RefCell<Vec<(DependencyObject, DependencyProperty)>>>,
}

impl Recorder {
    fn count(&self) -> usize {
        self.calls.borrow().len()
    }
}

impl ExpressionBehavior for Recorder {
    fn on_property_invalidation(&self, source: &DependencyObject, change: &PropertyChange) {
        self.calls
            .borrow_mut()
            .push((source.clone(), change.property()));
    }
}

/// Mirrors a source property, counting notifications.
struct Mirror {
    source: DependencySource,
    notified: Rc<Cell<u32>>,
}

impl ExpressionBehavior for Mirror {
    fn sources(&self) -> Vec<DependencySource> {
        vec![self.source.clone()]
    }

    fn value(&self, _: &DependencyObject, _: DependencyProperty) -> Option<ErasedValue> {
        let object = self.source.object()?;
        Some(object.get_value_erased(self.source.property()))
    }

    fn on_property_invalidation(&self, _: &DependencyObject, _: &PropertyChange) {
        self.notified.set(self.notified.get() + 1);
    }
}

#[test]
fn box_width_scenario() {
    let width = register("ScenarioWidth", 0.0_f64);
    let instance = new_box();

    instance.set_value(width, 5.0).unwrap();
    assert_eq!(instance.get_value(width), 5.0);
    assert_eq!(instance.effective_value_count(), 1);

    instance.clear_value(width).unwrap();
    assert_eq!(instance.get_value(width), 0.0);
    assert_eq!(instance.effective_value_count(), 0);

    let recorder = Recorder::default();
    let expression = Expression::new(ExpressionMode::NonShareable, recorder.clone());
    instance.add_dependent(width, None, width, &expression);
    assert!(instance.has_dependents(width));

    instance.invalidate_property(width);

    let calls = recorder.calls.borrow();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].0.ptr_eq(&instance));
    assert_eq!(calls[0].1, width.untyped());
}

#[test]
fn unchanged_write_does_not_invalidate() {
    let width = register("IdempotentWidth", 0.0_f64);
    let instance = new_box();
    let recorder = Recorder::default();
    let expression = Expression::new(ExpressionMode::NonShareable, recorder.clone());
    instance.add_dependent(width, None, width, &expression);

    instance.set_value(width, 2.0).unwrap();
    instance.set_value(width, 2.0).unwrap();
    assert_eq!(recorder.count(), 1);
    assert_eq!(instance.effective_value_count(), 1);

    // Writing the default over an empty slot is not a change either.
    let fresh = new_box();
    fresh.add_dependent(width, None, width, &expression);
    fresh.set_value(width, 0.0).unwrap();
    assert_eq!(recorder.count(), 1);
}

#[test]
fn clearing_notifies_with_old_and_new_values() {
    let width = register("ClearNotify", 1.0_f64);
    let instance = new_box();
    let seen = Rc::new(RefCell::new(Vec::new()));

    struct Values(Rc<RefCell<Vec<(Option<f64>, Option<f64>)>>>);
    impl ExpressionBehavior for Values {
        fn on_property_invalidation(&self, _: &DependencyObject, change: &PropertyChange) {
            self.0
                .borrow_mut()
                .push((change.old_value(), change.new_value()));
        }
    }

    let expression = Expression::new(ExpressionMode::NonShareable, Values(seen.clone()));
    instance.add_dependent(width, None, width, &expression);

    instance.set_value(width, 3.0).unwrap();
    instance.clear_value(width).unwrap();
    instance.clear_value(width).unwrap();

    assert_eq!(
        *seen.borrow(),
        vec![(Some(1.0), Some(3.0)), (Some(3.0), Some(1.0))]
    );
}

#[test]
fn dropped_dependent_objects_still_notify_the_expression() {
    let width = register("WeakWidth", 0.0_f64);
    let height = register("WeakHeight", 0.0_f64);
    let source = new_box();
    let dependent = new_box();
    let recorder = Recorder::default();
    let expression = Expression::new(ExpressionMode::NonShareable, recorder.clone());

    source.add_dependent(width, Some(&dependent), height, &expression);
    assert!(source.has_dependents(width));

    drop(dependent);
    assert!(!source.has_dependents(width));
    source.invalidate_property(width);
    source.set_value(width, 4.0).unwrap();
    assert_eq!(recorder.count(), 2);
}

#[test]
fn dropped_expressions_are_skipped() {
    let width = register("WeakExpressionWidth", 0.0_f64);
    let source = new_box();
    let recorder = Recorder::default();
    let expression = Expression::new(ExpressionMode::NonShareable, recorder.clone());
    source.add_dependent(width, None, width, &expression);

    drop(expression);
    assert!(!source.has_dependents(width));
    source.invalidate_property(width);
    assert_eq!(recorder.count(), 0);
}

#[test]
fn dependents_are_notified_in_registration_order() {
    let width = register("OrderedWidth", 0.0_f64);
    let source = new_box();
    let order = Rc::new(RefCell::new(Vec::new()));

    struct Tag(u32, Rc<RefCell<Vec<u32>>>);
    impl ExpressionBehavior for Tag {
        fn on_property_invalidation(&self, _: &DependencyObject, _: &PropertyChange) {
            self.1.borrow_mut().push(self.0);
        }
    }

    let expressions: Vec<_> = (0..5)
        .map(|tag| Expression::new(ExpressionMode::NonShareable, Tag(tag, order.clone())))
        .collect();
    for expression in &expressions {
        source.add_dependent(width, None, width, expression);
    }

    source.invalidate_property(width);
    assert_eq!(*order.borrow(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn entries_added_during_a_pass_are_not_visited() {
    let width = register("ReentrantWidth", 0.0_f64);
    let source = new_box();
    let late = Recorder::default();
    let late_expression = Expression::new(ExpressionMode::NonShareable, late.clone());

    struct AddLate {
        source: DependencyObject,
        property: Property<f64>,
        late: Expression,
        calls: Rc<Cell<u32>>,
    }
    impl ExpressionBehavior for AddLate {
        fn on_property_invalidation(&self, _: &DependencyObject, _: &PropertyChange) {
            self.calls.set(self.calls.get() + 1);
            self.source
                .add_dependent(self.property, None, self.property, &self.late);
        }
    }

    let calls = Rc::new(Cell::new(0));
    let adder = Expression::new(
        ExpressionMode::NonShareable,
        AddLate {
            source: source.clone(),
            property: width,
            late: late_expression.clone(),
            calls: calls.clone(),
        },
    );
    source.add_dependent(width, None, width, &adder);

    source.invalidate_property(width);
    assert_eq!(calls.get(), 1);
    assert_eq!(late.count(), 0);

    // The entry added by the first pass is visited by the second.
    source.invalidate_property(width);
    assert_eq!(calls.get(), 2);
    assert_eq!(late.count(), 1);
}

#[test]
fn entries_removed_during_a_pass_are_still_visited() {
    let width = register("RemovalWidth", 0.0_f64);
    let source = new_box();
    let victim = Recorder::default();
    let victim_expression = Expression::new(ExpressionMode::NonShareable, victim.clone());

    struct RemoveOther {
        source: DependencyObject,
        property: Property<f64>,
        other: Expression,
    }
    impl ExpressionBehavior for RemoveOther {
        fn on_property_invalidation(&self, _: &DependencyObject, _: &PropertyChange) {
            self.source
                .remove_dependent(self.property, None, self.property, &self.other);
        }
    }

    let remover = Expression::new(
        ExpressionMode::NonShareable,
        RemoveOther {
            source: source.clone(),
            property: width,
            other: victim_expression.clone(),
        },
    );
    source.add_dependent(width, None, width, &remover);
    source.add_dependent(width, None, width, &victim_expression);

    source.invalidate_property(width);
    assert_eq!(victim.count(), 1);

    source.invalidate_property(width);
    assert_eq!(victim.count(), 1);
}

#[test]
fn forwarding_expressions_are_not_invalidated_by_the_engine() {
    let input = register("ForwardIn", 0_i32);
    let output = register("ForwardOut", 0_i32);
    let source = new_box();
    let target = new_box();
    let notified = Rc::new(Cell::new(0));

    let expression = Expression::new(
        ExpressionMode::ForwardsInvalidations,
        Mirror {
            source: DependencySource::new(&source, input),
            notified: notified.clone(),
        },
    );
    target.set_expression(output, &expression).unwrap();

    let downstream = Recorder::default();
    let downstream_expression = Expression::new(ExpressionMode::NonShareable, downstream.clone());
    target.add_dependent(output, None, output, &downstream_expression);

    source.set_value(input, 5).unwrap();
    assert_eq!(notified.get(), 1);
    // The expression did not invalidate its target, so the value is stale.
    assert_eq!(target.get_value(output), 0);
    assert_eq!(downstream.count(), 0);

    // Forwarding by hand refreshes it.
    target.invalidate_property(output);
    assert_eq!(target.get_value(output), 5);
    assert_eq!(downstream.count(), 1);
}

#[test]
fn non_forwarding_expressions_are_invalidated_by_the_engine() {
    let input = register("AutoIn", 0_i32);
    let output = register("AutoOut", 0_i32);
    let source = new_box();
    let target = new_box();
    let notified = Rc::new(Cell::new(0));

    let expression = Expression::new(
        ExpressionMode::NonShareable,
        Mirror {
            source: DependencySource::new(&source, input),
            notified: notified.clone(),
        },
    );
    target.set_expression(output, &expression).unwrap();

    let downstream = Recorder::default();
    let downstream_expression = Expression::new(ExpressionMode::NonShareable, downstream.clone());
    target.add_dependent(output, None, output, &downstream_expression);

    source.set_value(input, 5).unwrap();
    assert_eq!(notified.get(), 1);
    assert_eq!(target.get_value(output), 5);
    assert_eq!(downstream.count(), 1);
}

#[test]
fn invalidation_is_transitive() {
    init_tracing();
    let value = register("ChainValue", 0_i32);
    let a = new_box();
    let b = new_box();
    let c = new_box();

    let b_expression = Expression::new(
        ExpressionMode::NonShareable,
        Mirror {
            source: DependencySource::new(&a, value),
            notified: Rc::default(),
        },
    );
    b.set_expression(value, &b_expression).unwrap();
    let c_expression = Expression::new(
        ExpressionMode::NonShareable,
        Mirror {
            source: DependencySource::new(&b, value),
            notified: Rc::default(),
        },
    );
    c.set_expression(value, &c_expression).unwrap();

    a.set_value(value, 9).unwrap();
    assert_eq!(b.get_value(value), 9);
    assert_eq!(c.get_value(value), 9);

    a.clear_value(value).unwrap();
    assert_eq!(c.get_value(value), 0);
}

#[test]
fn cycles_stop_instead_of_recursing() {
    init_tracing();
    let value = register("CycleValue", 0_i32);
    let a = new_box();
    let b = new_box();
    let a_notified = Rc::new(Cell::new(0));
    let b_notified = Rc::new(Cell::new(0));

    let on_a = Expression::new(
        ExpressionMode::NonShareable,
        Mirror {
            source: DependencySource::new(&b, value),
            notified: a_notified.clone(),
        },
    );
    a.set_expression(value, &on_a).unwrap();
    let on_b = Expression::new(
        ExpressionMode::NonShareable,
        Mirror {
            source: DependencySource::new(&a, value),
            notified: b_notified.clone(),
        },
    );
    b.set_expression(value, &on_b).unwrap();

    let (a_before, b_before) = (a_notified.get(), b_notified.get());
    a.invalidate_property(value);
    assert_eq!(b_notified.get() - b_before, 1);
    assert_eq!(a_notified.get() - a_before, 1);
}

#[test]
fn changed_callbacks_may_write_other_properties() {
    let registry = PropertyRegistry::global();
    let mirror = register("CallbackMirror", 0_i32);
    let primary: Property<i32> = registry
        .register(
            "CallbackPrimary",
            &BOX,
            understory_dependency::PropertyMetadataBuilder::new(0)
                .on_changed(|owner, change| {
                    let mirror = PropertyRegistry::global()
                        .from_name(owner.dependency_object_type(), "CallbackMirror")
                        .unwrap();
                    owner
                        .set_value_erased(mirror, change.after().resolve(), None)
                        .unwrap();
                })
                .build(),
        )
        .unwrap();
    let instance = new_box();

    instance.set_value(primary, 8).unwrap();
    assert_eq!(instance.get_value(mirror), 8);
}

#[test]
fn rewrite_during_own_pass_is_stored_without_a_second_pass() {
    init_tracing();
    let value = register("ReentrantValue", 0_i32);
    let source = new_box();
    let seen = Rc::new(RefCell::new(Vec::new()));

    /// Resets the source to 100 the first time it sees another value.
    struct Resetter {
        seen: Rc<RefCell<Vec<i32>>>,
    }

    impl ExpressionBehavior for Resetter {
        fn on_property_invalidation(&self, source: &DependencyObject, change: &PropertyChange) {
            let now = change.new_value::<i32>().unwrap();
            self.seen.borrow_mut().push(now);
            if now != 100 {
                let property = change.property();
                source
                    .set_value_erased(property, ErasedValue::new(100_i32), None)
                    .unwrap();
            }
        }
    }

    let first = Expression::new(
        ExpressionMode::NonShareable,
        Resetter { seen: seen.clone() },
    );
    let later = Recorder::default();
    let later_expression = Expression::new(ExpressionMode::NonShareable, later.clone());
    source.add_dependent(value, None, value, &first);
    source.add_dependent(value, None, value, &later_expression);

    source.set_value(value, 1).unwrap();
    // The nested write lands, but the first dependent is not revisited.
    assert_eq!(source.get_value(value), 100);
    assert_eq!(*seen.borrow(), vec![1]);
    assert_eq!(later.count(), 1);

    // Once the pass is over, writes propagate again.
    source.set_value(value, 2).unwrap();
    assert_eq!(*seen.borrow(), vec![1, 2]);
    assert_eq!(later.count(), 2);
    assert_eq!(source.get_value(value), 100);
}
