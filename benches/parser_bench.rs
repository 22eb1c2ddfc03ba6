use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use search_syntax::lexer::Lexer;
use search_syntax::sql_compiler::{CompilerConfig, OptimizationConfig, SqlCompiler};
use search_syntax::{parse_search, tree_transformer, LogicTree, Span};
use std::hint::black_box;

fn test_cases() -> Vec<(&'static str, String)> {
    vec![
        ("simple", "transaction.duration:<15m".to_string()),
        (
            "medium",
            "event.type:transaction transaction:/api/0/x is:unresolved !browser:firefox".to_string(),
        ),
        (
            "complex",
            r#"(browser:firefox OR os:[linux, mac]) AND times_seen:>=5k created:>2021-02-01 message:"connection reset" p95(transaction.duration):>1s timeout error"#
                .to_string(),
        ),
        ("nested", format!("{}a:1 b{}", "(".repeat(32), ")".repeat(32))),
    ]
}

// Lexing only
fn benchmark_lexer(c: &mut Criterion) {
    let mut group = c.benchmark_group("lexer_performance");

    for (name, query) in test_cases() {
        group.bench_with_input(BenchmarkId::new("tokenize", name), &query, |b, query| {
            b.iter(|| {
                let lexemes = Lexer::new(black_box(query)).tokenize().expect("lexing should succeed");
                black_box(lexemes)
            })
        });
    }

    group.finish();
}

// Lexing, grammar and tree building
fn benchmark_parser(c: &mut Criterion) {
    let mut group = c.benchmark_group("parser_performance");

    for (name, query) in test_cases() {
        group.bench_with_input(BenchmarkId::new("parse", name), &query, |b, query| {
            b.iter(|| match parse_search(black_box(query)) {
                Ok(tokens) => black_box(tokens),
                Err(e) => panic!("parse failed: {e}"),
            })
        });
    }

    group.finish();
}

fn benchmark_transform(c: &mut Criterion) {
    let mut group = c.benchmark_group("transform_performance");

    for (name, query) in test_cases() {
        let tokens = parse_search(&query).expect("parse should succeed");
        group.bench_with_input(BenchmarkId::new("strip_locations", name), &tokens, |b, tokens| {
            b.iter(|| {
                let stripped = tree_transformer(black_box(tokens), |mut token| {
                    token.location = Span::default();
                    token
                });
                black_box(stripped)
            })
        });
        group.bench_with_input(BenchmarkId::new("logic_tree", name), &tokens, |b, tokens| {
            b.iter(|| black_box(LogicTree::build(black_box(tokens))))
        });
    }

    group.finish();
}

fn benchmark_sql_compiler(c: &mut Criterion) {
    let mut cases = test_cases();
    cases.push((
        "or_optimization",
        "level:error OR level:fatal OR level:warning OR level:info OR level:debug".to_string(),
    ));
    // Aggregate keys have no column
    cases.retain(|(name, _)| *name != "complex");

    let compiler = SqlCompiler::from_config(CompilerConfig {
        optimization_config: OptimizationConfig {
            max_or_conditions_for_in: 5,
        },
        ..Default::default()
    });

    let mut group = c.benchmark_group("sql_compiler_performance");

    for (name, query) in cases {
        let tokens = parse_search(&query).expect("parse should succeed");
        group.bench_with_input(BenchmarkId::new("compile", name), &tokens, |b, tokens| {
            b.iter(|| match compiler.compile(black_box(tokens)) {
                Ok(result) => black_box(result),
                Err(e) => panic!("compile failed: {e}"),
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_lexer,
    benchmark_parser,
    benchmark_transform,
    benchmark_sql_compiler
);
criterion_main!(benches);
