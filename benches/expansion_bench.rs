// benches/expansion_bench.rs
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sim_orchestrator::expansion::{expand, index_width, parse_run_name, run_name};
use sim_orchestrator::model::{ConfigDocument, ParamValue, Scalar};

fn document() -> ConfigDocument {
    let ints = |n: i64| ParamValue::List((0..n).map(Scalar::Int).collect());
    let floats = |n: i64| ParamValue::List((0..n).map(|i| Scalar::Float(i as f64 * 0.25)).collect());

    ConfigDocument::new()
        .with("simulation", "time_step", ParamValue::Scalar(Scalar::Float(0.5)))
        .with("fungus", "init_num", ints(8))
        .with("fungus", "iron_min", ParamValue::Scalar(Scalar::Int(5)))
        .with("macrophage", "rec_rate", floats(6))
        .with("neutrophil", "count", ints(4))
        .with("epithelium", "active", ParamValue::List(vec![Scalar::Bool(true), Scalar::Bool(false)]))
}

fn expansion_benchmark(c: &mut Criterion) {
    let doc = document();

    c.bench_function("expand/384_configs", |b| {
        b.iter(|| expand(black_box(&doc)))
    });

    let expansion = expand(&doc);
    let width = index_width(10);

    c.bench_function("naming/run_name", |b| {
        b.iter(|| {
            for config in &expansion.configs {
                black_box(run_name("sweep", 7, width, &expansion.variables, config));
            }
        })
    });

    let names: Vec<String> = expansion
        .configs
        .iter()
        .map(|config| run_name("sweep", 7, width, &expansion.variables, config))
        .collect();

    c.bench_function("naming/parse_run_name", |b| {
        b.iter(|| {
            for name in &names {
                black_box(parse_run_name(name, &expansion.variables));
            }
        })
    });
}

criterion_group!(benches, expansion_benchmark);
criterion_main!(benches);
