//! Performance benchmarks for cascade archiving
//!
//! A single company owns `width` projects, each owning `depth` tasks, all tasks sharing a small
//! pool of tags. Measures:
//! - Building the archive plan (one fetch per owned record)
//! - Compiling and committing the plan against the in-memory store
//!
//! Run with: cargo bench --bench cascade

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use tether_core::{
    cascade::{ArchiveExecutor, CascadeBuilder},
    config::TetherConfig,
    properties::{Linkage, Record, ResourcePointer},
    schema::Registry,
    store::MemoryStore,
};

const TAGS: usize = 8;

const SCHEMA: &str = r#"
[tables.company.relationships.projects]
hasMany = "project"
inverse = "company"

[tables.project.relationships.company]
belongsTo = "company"
inverse = "projects"

[tables.project.relationships.tasks]
hasMany = "task"
inverse = "project"

[tables.task.relationships.project]
belongsTo = "project"
inverse = "tasks"

[tables.task.relationships.tags]
hasMany = "tag"
inverse = "tasks"

[tables.tag.relationships.tasks]
hasMany = "task"
inverse = "tags"
"#;

fn registry() -> Registry {
    SCHEMA
        .parse::<TetherConfig>()
        .and_then(|config| config.registry())
        .expect("benchmark schema is valid")
}

fn many(ids: impl Iterator<Item = String>) -> Linkage {
    Linkage::Many(ids.map(ResourcePointer::new).collect())
}

fn one(id: &str) -> Linkage {
    Linkage::One(Some(ResourcePointer::new(id)))
}

fn seed_store(width: usize, depth: usize) -> MemoryStore {
    let store = MemoryStore::new();
    store.seed(
        "company",
        Record::new("c").with_linkage("projects", many((0..width).map(|p| format!("p{p}")))),
    );
    let mut tag_tasks: Vec<Vec<String>> = vec![Vec::new(); TAGS];
    for p in 0..width {
        let project = format!("p{p}");
        store.seed(
            "project",
            Record::new(project.as_str())
                .with_linkage("company", one("c"))
                .with_linkage("tasks", many((0..depth).map(|t| format!("p{p}t{t}")))),
        );
        for t in 0..depth {
            let task = format!("p{p}t{t}");
            let tag = (p + t) % TAGS;
            tag_tasks[tag].push(task.clone());
            store.seed(
                "task",
                Record::new(task.as_str())
                    .with_linkage("project", one(&project))
                    .with_linkage("tags", many(std::iter::once(format!("g{tag}")))),
            );
        }
    }
    for (tag, tasks) in tag_tasks.into_iter().enumerate() {
        store.seed(
            "tag",
            Record::new(format!("g{tag}")).with_linkage("tasks", many(tasks.into_iter())),
        );
    }
    store
}

fn bench_plan_archive(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let registry = registry();
    let mut group = c.benchmark_group("plan_archive");
    for width in [10usize, 100] {
        let store = seed_store(width, 10);
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.to_async(&rt).iter(|| async {
                CascadeBuilder::new(&registry, &store)
                    .build("company", "c")
                    .await
                    .unwrap()
            });
        });
    }
    group.finish();
}

fn bench_execute_archive(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let registry = registry();
    let mut group = c.benchmark_group("execute_archive");
    for width in [10usize, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            b.to_async(&rt).iter(|| async {
                let store = seed_store(width, 10);
                let plan = CascadeBuilder::new(&registry, &store)
                    .build("company", "c")
                    .await
                    .unwrap();
                ArchiveExecutor::new(&registry, &store)
                    .execute(&plan)
                    .await
                    .unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_plan_archive, bench_execute_archive);
criterion_main!(benches);
