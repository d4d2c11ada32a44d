use std::collections::BTreeMap;
use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use tensorlab::{Attribute, AttributeType, AttributeValues, Filter, Value, parse_expression};

const EXPRESSION: &str = "optimizer == \"sgd\" and lr < 0.01 or not (depth >= 12 and note != \"baseline\")";

fn definitions() -> BTreeMap<String, Attribute> {
    [
        Attribute::new("optimizer", AttributeType::Enum, false).with_options("adam;sgd;rmsprop"),
        Attribute::new("lr", AttributeType::Float, false),
        Attribute::new("depth", AttributeType::Integer, false).with_options("positive"),
        Attribute::new("note", AttributeType::String, false).nullable(true),
    ]
    .into_iter()
    .map(|attribute| (attribute.name.clone(), attribute))
    .collect()
}

fn values(n: usize) -> Vec<AttributeValues> {
    let optimizers = ["adam", "sgd", "rmsprop"];
    (0..n)
        .map(|i| {
            AttributeValues::from([
                ("optimizer".to_string(), Some(Value::from(optimizers[i % 3]))),
                ("lr".to_string(), Some(Value::Float(0.001 * (i % 20) as f64))),
                ("depth".to_string(), Some(Value::Integer((i % 32) as i64))),
                ("note".to_string(), (i % 4 == 0).then(|| Value::from("baseline"))),
            ])
        })
        .collect()
}

pub fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("parse expression", |b| b.iter(|| parse_expression(black_box(EXPRESSION))));

    let Some(expression) = parse_expression(EXPRESSION) else {
        panic!("benchmark expression does not parse");
    };
    c.bench_function("serialize expression", |b| b.iter(|| black_box(&expression).serialize()));

    let definitions = definitions();
    c.bench_function("compile filter", |b| {
        b.iter(|| Filter::compile(black_box(&expression), &definitions).is_ok())
    });

    let filter = match Filter::compile(&expression, &definitions) {
        Ok(filter) => filter,
        Err(e) => panic!("benchmark filter does not compile: {e}"),
    };
    for n in [1_000, 100_000] {
        let rows = values(n);
        c.bench_function(&format!("filter {}", n), |b| {
            b.iter(|| rows.iter().filter(|row| filter.matches(row)).count())
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
