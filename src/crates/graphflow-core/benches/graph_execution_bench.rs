use criterion::{criterion_group, criterion_main, Criterion};
use graphflow_checkpoint::AppenderChannel;
use graphflow_core::{node_action, CompileConfig, RunnableConfig, StateGraph, END, START};
use serde_json::json;
use tokio::runtime::Runtime;

fn linear_invoke(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let graph = StateGraph::new()
        .add_channel("messages", AppenderChannel::new())
        .add_node("a", node_action(|_s| async { Ok(json!({"messages": "A"})) }))
        .unwrap()
        .add_node("b", node_action(|_s| async { Ok(json!({"messages": "B"})) }))
        .unwrap()
        .add_node("c", node_action(|_s| async { Ok(json!({"messages": "C"})) }))
        .unwrap()
        .add_edge(START, "a")
        .unwrap()
        .add_edge("a", "b")
        .unwrap()
        .add_edge("b", "c")
        .unwrap()
        .add_edge("c", END)
        .unwrap()
        .compile(CompileConfig::new())
        .unwrap();

    c.bench_function("linear_3_node_invoke", |b| {
        b.iter(|| {
            rt.block_on(async {
                graph
                    .invoke(json!({}), RunnableConfig::new())
                    .await
                    .unwrap()
            })
        })
    });
}

criterion_group!(benches, linear_invoke);
criterion_main!(benches);
