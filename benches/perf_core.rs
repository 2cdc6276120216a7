use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dattoham_ai::actions::{task_messages, Task, TaskContext};
use dattoham_ai::backend::select_model;
use dattoham_ai::catalog::select_best_model;
use dattoham_ai::message::{build_prompt, ChatMessage};
use dattoham_ai::{ConfigStore, ConfigUpdate, Provider, ProviderConfig};
use std::collections::BTreeSet;

fn synthetic_conversation(turns: usize) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(turns + 1);
    messages.push(ChatMessage::system("You are a coding assistant."));
    for i in 0..turns {
        let content = format!("turn {i}: fn f{i}() -> usize {{ {i} }}\n").repeat(8);
        if i % 2 == 0 {
            messages.push(ChatMessage::user(content));
        } else {
            messages.push(ChatMessage::assistant(content));
        }
    }
    messages
}

fn bench_build_prompt(c: &mut Criterion) {
    let short = synthetic_conversation(4);
    c.bench_function("build_prompt_short", |b| {
        b.iter(|| black_box(build_prompt(black_box(&short))));
    });

    let long = synthetic_conversation(400);
    c.bench_function("build_prompt_long", |b| {
        b.iter(|| black_box(build_prompt(black_box(&long))));
    });

    let context = TaskContext::new("rust", "pub fn add(a: u32, b: u32) -> u32 { a + b }\n".repeat(200));
    c.bench_function("task_messages_review", |b| {
        b.iter(|| black_box(task_messages(Task::Review, black_box(&context))));
    });
}

fn bench_model_selection(c: &mut Criterion) {
    let installed: BTreeSet<String> = (0..500).map(|i| format!("model-{i:03}:latest")).collect();
    let fallbacks: Vec<String> = (0..50)
        .map(|i| format!("missing-{i:02}:latest"))
        .chain(std::iter::once("model-499:latest".to_string()))
        .collect();

    c.bench_function("select_model_last_fallback", |b| {
        b.iter(|| {
            black_box(select_model(
                black_box(&installed),
                black_box("primary:latest"),
                black_box(&fallbacks),
            ))
        });
    });

    c.bench_function("select_best_model", |b| {
        b.iter(|| black_box(select_best_model(Task::Debug, black_box("go"), black_box(512))));
    });
}

fn bench_config_update(c: &mut Criterion) {
    let store = ConfigStore::in_memory(ProviderConfig::default());
    c.bench_function("config_update_in_memory", |b| {
        let mut cloud = false;
        b.iter(|| {
            cloud = !cloud;
            let provider = if cloud { Provider::Cloud } else { Provider::Local };
            black_box(store.update(ConfigUpdate::default().provider(provider)).is_ok());
        });
    });
}

criterion_group!(
    perf_core,
    bench_build_prompt,
    bench_model_selection,
    bench_config_update
);
criterion_main!(perf_core);
