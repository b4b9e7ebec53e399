//! Benchmarks for dependency extraction
//!
//! These benchmarks measure parsing plus graph building on large batches
//! of chained INSERT ... SELECT statements and deep CTE chains.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sqldeps_core::Config;
use sqldeps_sql::{extract_dependencies, CteRegistry, IdAllocator, LineageSession, SqlParser};

/// Generate N statements where each table is loaded from the previous two
fn generate_insert_chain(num_statements: usize) -> String {
    (0..num_statements)
        .map(|i| {
            let first = i.saturating_sub(1);
            let second = i.saturating_sub(2);
            format!(
                "INSERT INTO stage_{i} (id, amount) \
                 SELECT a.id, a.amount FROM stage_{first} a \
                 JOIN stage_{second} b ON a.id = b.id \
                 WHERE a.id IN (SELECT id FROM allowed_{i});"
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Generate one query over a chain of N CTEs, the last one recursive
fn generate_cte_chain(depth: usize) -> String {
    let mut ctes = vec!["c0 AS (SELECT * FROM base)".to_string()];
    for i in 1..depth {
        ctes.push(format!("c{} AS (SELECT * FROM c{})", i, i - 1));
    }
    ctes.push(format!(
        "loop_cte AS (SELECT * FROM c{} UNION ALL SELECT * FROM loop_cte)",
        depth - 1
    ));

    format!("WITH RECURSIVE {} SELECT * FROM loop_cte", ctes.join(", "))
}

/// Benchmark: parse plus build for growing batches
fn bench_insert_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_chain");

    for num_statements in [10, 100, 500].iter() {
        let sql = generate_insert_chain(*num_statements);

        group.bench_with_input(
            BenchmarkId::from_parameter(num_statements),
            &sql,
            |b, sql| {
                b.iter(|| {
                    let mut session = LineageSession::new(Config::default());
                    black_box(session.analyze_sql(black_box(sql)))
                });
            },
        );
    }

    group.finish();
}

/// Benchmark: graph building only, on pre-parsed statements
fn bench_graph_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_build");
    let parser = SqlParser::new();

    for num_statements in [100, 500].iter() {
        let sql = generate_insert_chain(*num_statements);
        let parsed = match parser.parse(&sql, None) {
            Ok(parsed) => parsed,
            Err(err) => panic!("benchmark SQL must parse: {}", err),
        };

        group.bench_with_input(
            BenchmarkId::from_parameter(num_statements),
            &parsed.statements,
            |b, statements| {
                b.iter(|| {
                    let mut ids = IdAllocator::new();
                    black_box(extract_dependencies(black_box(statements), &mut ids))
                });
            },
        );
    }

    group.finish();
}

/// Benchmark: recursion marking over deep CTE chains
fn bench_cte_recursion(c: &mut Criterion) {
    let mut group = c.benchmark_group("cte_recursion");
    let parser = SqlParser::new();

    for depth in [10, 50, 200].iter() {
        let sql = generate_cte_chain(*depth);
        let parsed = match parser.parse(&sql, None) {
            Ok(parsed) => parsed,
            Err(err) => panic!("benchmark SQL must parse: {}", err),
        };

        group.bench_with_input(
            BenchmarkId::from_parameter(depth),
            &parsed.statements,
            |b, statements| {
                b.iter(|| black_box(CteRegistry::analyze(black_box(statements))));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_insert_chain, bench_graph_build, bench_cte_recursion);
criterion_main!(benches);
