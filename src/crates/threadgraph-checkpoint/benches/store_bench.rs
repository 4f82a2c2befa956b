use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use threadgraph_checkpoint::{CheckpointStore, InMemoryCheckpointStore, State};

fn sample_state(turns: usize) -> State {
    let messages: Vec<_> = (0..turns)
        .map(|i| json!({"role": if i % 2 == 0 { "human" } else { "assistant" }, "content": format!("turn {}", i)}))
        .collect();
    State::new().with("messages", json!(messages))
}

fn append_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryCheckpointStore::new();
    let state = sample_state(20);

    c.bench_function("memory append", |b| {
        b.iter(|| {
            runtime.block_on(async {
                store
                    .append("bench-thread", "chatbot", black_box(&state))
                    .await
                    .unwrap()
            })
        });
    });
}

fn latest_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryCheckpointStore::new();
    runtime.block_on(async {
        for _ in 0..100 {
            store.append("bench-thread", "chatbot", &sample_state(20)).await.unwrap();
        }
    });

    c.bench_function("memory latest", |b| {
        b.iter(|| runtime.block_on(async { store.latest(black_box("bench-thread")).await.unwrap() }));
    });
}

criterion_group!(benches, append_benchmark, latest_benchmark);
criterion_main!(benches);
