use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use pql::compiler::QueryCompiler;
use pql::lexer::Lexer;
use pql::parser::Parser;
use pql::{CompilerConfig, EntityType, PqlEngine, Registry};
use std::hint::black_box;
use std::sync::Arc;

const TEST_CASES: [(&str, &str); 4] = [
    ("simple", "eq(id,'MU2')"),
    ("medium", "in(sequencingStrategyNested,'WGA','WGD'),gt(testedDonorCount,200),sort(-affectedDonorCount),limit(0,25)"),
    (
        "complex",
        "select(*),facets(*),and(or(eq(type,'single base substitution'),eq(type,'insertion')),not(eq(chromosome,'X'))),nested(observation,eq(sequencingStrategyNested,'WGS'),eq(platformNested,'Illumina HiSeq'))",
    ),
    ("gene_set", "facets(sequencingStrategyNested),eq(gene.geneSetId,'GS1'),in(gene.pathwayId,'R-1','R-2')"),
];

fn create_engine() -> PqlEngine {
    let registry = Registry::builtin().expect("内置注册表应该有效");
    PqlEngine::new(Arc::new(registry), CompilerConfig::default())
}

// 基准测试：词法分析性能
fn benchmark_lexer(c: &mut Criterion) {
    let mut group = c.benchmark_group("lexer_performance");

    for (name, pql) in TEST_CASES {
        group.bench_with_input(BenchmarkId::new("tokenize", name), &pql, |b, &pql| {
            b.iter(|| {
                let tokens: Vec<_> = Lexer::new(black_box(pql)).collect();
                black_box(tokens)
            })
        });
    }

    group.finish();
}

// 基准测试：语法分析性能
fn benchmark_parser(c: &mut Criterion) {
    let mut group = c.benchmark_group("parser_performance");

    for (name, pql) in TEST_CASES {
        // 预先词法分析
        let tokens: Vec<_> = Lexer::new(pql).collect();

        group.bench_with_input(BenchmarkId::new("parse", name), &tokens, |b, tokens| {
            b.iter(|| {
                let mut parser = Parser::new(pql, black_box(tokens));
                match parser.parse() {
                    Ok(calls) => black_box(calls.len()),
                    Err(_) => panic!("解析失败"),
                }
            })
        });
    }

    group.finish();
}

// 基准测试：改写与编译性能（不含解析）
fn benchmark_compiler(c: &mut Criterion) {
    let engine = create_engine();
    let model = engine.registry().model(EntityType::MutationCentric).expect("类型应该存在");
    let mut group = c.benchmark_group("compiler_performance");

    for (name, pql) in TEST_CASES {
        let ast = engine.prepare(EntityType::MutationCentric, pql).expect("改写应该成功");

        group.bench_with_input(BenchmarkId::new("compile", name), &ast, |b, ast| {
            b.iter(|| {
                let compiler = QueryCompiler::new(engine.registry().index(), model, engine.config());
                match compiler.compile(black_box(ast)) {
                    Ok(request) => black_box(request),
                    Err(_) => panic!("编译失败"),
                }
            })
        });
    }

    group.finish();
}

// 基准测试：完整的端到端处理
fn benchmark_end_to_end(c: &mut Criterion) {
    let engine = create_engine();
    let mut group = c.benchmark_group("end_to_end_performance");

    for (name, pql) in TEST_CASES {
        group.bench_with_input(BenchmarkId::new("full_pipeline", name), &pql, |b, &pql| {
            b.iter(|| {
                let request = engine
                    .compile(EntityType::MutationCentric, black_box(pql))
                    .expect("编译应该成功");
                black_box(request.to_json())
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_lexer,
    benchmark_parser,
    benchmark_compiler,
    benchmark_end_to_end
);
criterion_main!(benches);
