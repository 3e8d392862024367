// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Benchmarks for `understory_dependency`.

use criterion::{BatchSize, BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::sync::Once;

use understory_dependency::{
    BaseValueSource, DEPENDENCY_OBJECT, DependencyObject, DependencyProperty, DependencySource,
    EffectiveValueEntry, EffectiveValueStore, EntryValue, ErasedValue, Expression,
    ExpressionBehavior, ExpressionMode, ObjectClass, Property, PropertyMetadataBuilder,
    PropertyRegistry,
};

static ELEMENT: ObjectClass = ObjectClass::new("BenchElement", Some(&DEPENDENCY_OBJECT));

/// Mirrors one source property into its target.
struct Mirror {
    source: DependencySource,
}

impl ExpressionBehavior for Mirror {
    fn sources(&self) -> Vec<DependencySource> {
        vec![self.source.clone()]
    }

    fn value(&self, _: &DependencyObject, _: DependencyProperty) -> Option<ErasedValue> {
        let object = self.source.object()?;
        Some(object.get_value_erased(self.source.property()))
    }
}

fn mirror(source: &DependencyObject, property: Property<f64>) -> Expression {
    Expression::new(
        ExpressionMode::NonShareable,
        Mirror {
            source: DependencySource::new(source, property),
        },
    )
}

fn element() -> DependencyObject {
    DependencyObject::new(&ELEMENT).unwrap()
}

fn bench_dependency(c: &mut Criterion) {
    static PRINT_SIZES: Once = Once::new();
    PRINT_SIZES.call_once(|| {
        eprintln!(
            "sizes: EffectiveValueStore={} EffectiveValueEntry={} ErasedValue={}",
            size_of::<EffectiveValueStore>(),
            size_of::<EffectiveValueEntry>(),
            size_of::<ErasedValue>(),
        );
    });

    let registry = PropertyRegistry::global();
    let width: Property<f64> = registry
        .register("Width", &ELEMENT, PropertyMetadataBuilder::new(0.0_f64).build())
        .unwrap();
    let font_size: Property<f64> = registry
        .register(
            "FontSize",
            &ELEMENT,
            PropertyMetadataBuilder::new(12.0_f64).inherits(true).build(),
        )
        .unwrap();
    let filler: Vec<Property<f64>> = (0..16)
        .map(|i| {
            let name: &'static str = Box::leak(format!("Filler{i}").into_boxed_str());
            registry
                .register(name, &ELEMENT, PropertyMetadataBuilder::new(0.0_f64).build())
                .unwrap()
        })
        .collect();

    // A small inheritance chain: 0 <- 1 <- ... <- N-1
    let chain_len: usize = 16;
    let nodes: Vec<DependencyObject> = (0..chain_len).map(|_| element()).collect();
    for pair in nodes.windows(2) {
        pair[1].set_parent(Some(&pair[0]));
    }
    nodes[0].set_value(font_size, 16.0).unwrap();
    let leaf = &nodes[chain_len - 1];

    let mut group = c.benchmark_group("dependency/resolve");

    group.bench_function("local", |b| {
        let object = element();
        object.set_value(width, 100.0).unwrap();
        b.iter(|| black_box(object.get_value(width)));
    });

    group.bench_function("default", |b| {
        let object = element();
        b.iter(|| black_box(object.get_value(width)));
    });

    group.bench_function(BenchmarkId::new("inherited", chain_len), |b| {
        b.iter(|| black_box(leaf.get_value(font_size)));
    });

    group.bench_function("expression", |b| {
        let source = element();
        let target = element();
        source.set_value(width, 10.0).unwrap();
        target.set_expression(width, &mirror(&source, width)).unwrap();
        b.iter(|| black_box(target.get_value(width)));
    });

    group.finish();

    let mut group = c.benchmark_group("dependency/store_lookup");

    for count in [1_usize, 4, 8, 16] {
        let mut store = EffectiveValueStore::new();
        for property in filler.iter().take(count) {
            let index = store.lookup(property.id());
            store.set_effective_value(
                index,
                EffectiveValueEntry::new(
                    property.untyped(),
                    EntryValue::Value(ErasedValue::new(1.0_f64)),
                    BaseValueSource::Local,
                ),
            );
        }
        let last = filler[count - 1].id();
        group.bench_with_input(BenchmarkId::new("last", count), &store, |b, store| {
            b.iter(|| black_box(store.lookup(black_box(last))));
        });
    }

    group.finish();

    let mut group = c.benchmark_group("dependency/mutate");

    group.bench_function("set_value/f64/no_dependents", |b| {
        b.iter_batched(
            element,
            |object| {
                object.set_value(width, 123.0).unwrap();
                black_box(object);
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("set_value/f64/unchanged", |b| {
        let object = element();
        object.set_value(width, 123.0).unwrap();
        b.iter(|| object.set_value(black_box(width), 123.0).unwrap());
    });

    group.finish();

    let mut group = c.benchmark_group("dependency/invalidate");

    for fan_out in [1_usize, 8, 64] {
        let source = element();
        let targets: Vec<DependencyObject> = (0..fan_out).map(|_| element()).collect();
        for target in &targets {
            target.set_expression(width, &mirror(&source, width)).unwrap();
        }
        group.bench_with_input(BenchmarkId::new("fan_out", fan_out), &source, |b, source| {
            let mut value = 0.0;
            b.iter(|| {
                value += 1.0;
                source.set_value(width, value).unwrap();
            });
        });
    }

    group.bench_function(BenchmarkId::new("chain", chain_len), |b| {
        let chain: Vec<DependencyObject> = (0..chain_len).map(|_| element()).collect();
        for pair in chain.windows(2) {
            pair[1].set_expression(width, &mirror(&pair[0], width)).unwrap();
        }
        let mut value = 0.0;
        b.iter(|| {
            value += 1.0;
            chain[0].set_value(width, value).unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_dependency);
criterion_main!(benches);
