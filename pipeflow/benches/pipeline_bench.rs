//! Benchmarks for pipeline throughput.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use pipeflow::context::{InputStream, Session};
use pipeflow::filters::read_from;
use pipeflow::pipeline::{run_with, Line};
use pipeflow::process::exec;
use pipeflow::testing::{pattern_bytes, PatternCheck, UppercaseStage};
use pipeflow::StageRef;
use std::sync::Arc;

const PIPING_SIZE: usize = 100 << 20;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("tokio runtime")
}

fn pipe_through(rt: &tokio::runtime::Runtime, data: &Arc<Vec<u8>>, middle: StageRef) -> u64 {
    let check = PatternCheck::new();
    let stage = Line::new(vec![
        read_from(InputStream::from_bytes(data.as_ref().clone())),
        middle,
    ]);
    let session = Session::new().with_stdout(check.output());
    rt.block_on(run_with(&stage, session)).expect("pipeline run");
    check.seen()
}

fn piping_benchmark(c: &mut Criterion) {
    let rt = runtime();
    let data = Arc::new(pattern_bytes(PIPING_SIZE));

    let mut group = c.benchmark_group("piping");
    group.sample_size(10);
    group.throughput(Throughput::Bytes(PIPING_SIZE as u64));

    group.bench_function("in_process", |b| {
        b.iter(|| black_box(pipe_through(&rt, &data, Arc::new(UppercaseStage))));
    });
    group.bench_function("exec_cat", |b| {
        b.iter(|| black_box(pipe_through(&rt, &data, exec("cat", Vec::<String>::new()))));
    });
    group.bench_function("shell", |b| {
        b.iter(|| {
            let stage = exec("sh", ["-c", "head -c 104857600 /dev/zero | cat > /dev/null"]);
            rt.block_on(pipeflow::run(stage.as_ref())).expect("shell run");
        });
    });

    group.finish();
}

criterion_group!(benches, piping_benchmark);
criterion_main!(benches);
