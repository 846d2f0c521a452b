use criterion::{criterion_group, criterion_main, Criterion};
use graphflow_checkpoint::{
    update_state, writes_from, AppenderChannel, Channels, Checkpoint, CheckpointConfig,
    CheckpointSaver, MemorySaver, StateData,
};
use serde_json::json;
use std::sync::Arc;

fn bench_memory_saver_put_get(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("memory_saver_put_get", |b| {
        b.iter(|| {
            rt.block_on(async {
                let saver = MemorySaver::new();
                let config = CheckpointConfig::new().with_thread_id("bench");
                for i in 0..10 {
                    let mut state = StateData::new();
                    state.insert("step".to_string(), json!(i));
                    saver
                        .put(&config, Checkpoint::new(state).with_node_id("n"))
                        .await
                        .unwrap();
                }
                saver.get(&config).await.unwrap()
            })
        })
    });
}

fn bench_appender_merge(c: &mut Criterion) {
    let mut channels: Channels = Channels::new();
    channels.insert("messages".to_string(), Arc::new(AppenderChannel::new()));

    c.bench_function("appender_merge_100", |b| {
        b.iter(|| {
            let mut state = StateData::new();
            for i in 0..100 {
                state = update_state(
                    state,
                    writes_from(json!({"messages": format!("m{i}")})),
                    &channels,
                )
                .unwrap();
            }
            state
        })
    });
}

criterion_group!(benches, bench_memory_saver_put_get, bench_appender_merge);
criterion_main!(benches);
