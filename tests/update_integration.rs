//! End-to-end update runs against temporary source trees.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use repodoc::error::GenerationError;
use repodoc::generation::{Generator, PromptContext};
use repodoc::hierarchy::{HierarchyStore, HIERARCHY_FILE, META_FILE};
use repodoc::{Config, Engine, RunSummary};
use serde_json::Value;
use tempfile::TempDir;

/// Returns "<label> <name>" and records every qualified path it was asked for.
struct Scripted {
    label: String,
    failing: BTreeSet<String>,
    calls: Mutex<Vec<String>>,
}

impl Scripted {
    fn new(label: &str) -> Arc<Self> {
        Self::failing(label, &[])
    }

    fn failing(label: &str, names: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            failing: names.iter().map(|n| (*n).to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
        let mut calls = self.calls.lock().clone();
        calls.sort();
        calls
    }
}

impl Generator for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn generate<'a>(
        &'a self,
        ctx: &'a PromptContext,
    ) -> BoxFuture<'a, Result<String, GenerationError>> {
        self.calls.lock().push(ctx.qualified_path.clone());
        let result = if self.failing.contains(&ctx.name) {
            Err(GenerationError::Backend("scripted failure".to_string()))
        } else {
            Ok(format!("{} {}", self.label, ctx.name))
        };
        async move { result }.boxed()
    }
}

fn write(root: &Path, path: &str, content: &str) {
    let full = root.join(path);
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(full, content).unwrap();
}

async fn update(root: &Path, generator: Arc<Scripted>) -> RunSummary {
    let config = Config {
        max_workers: 2,
        max_retries: 0,
        retry_backoff_ms: 1,
        ..Config::for_root(root)
    };
    Engine::new(config, generator)
        .unwrap()
        .with_change_lister(None)
        .scan_and_update()
        .await
        .unwrap()
}

fn store(root: &Path) -> HierarchyStore {
    HierarchyStore::new(Config::for_root(root).hierarchy_path())
}

fn document(root: &Path) -> Value {
    store(root).load_document().unwrap().unwrap()
}

fn record<'v>(doc: &'v Value, file: &str, name: &str) -> &'v Value {
    doc[file]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["name"] == name)
        .unwrap()
}

fn store_bytes(root: &Path) -> BTreeMap<&'static str, Vec<u8>> {
    let dir = Config::for_root(root).hierarchy_path();
    [HIERARCHY_FILE, META_FILE]
        .into_iter()
        .map(|name| (name, fs::read(dir.join(name)).unwrap()))
        .collect()
}

#[tokio::test]
async fn test_second_run_without_changes_is_a_no_op() {
    let tmp = TempDir::new().unwrap();
    write(
        tmp.path(),
        "pkg/a.py",
        "def foo():\n    return bar()\n\ndef bar():\n    return 1\n",
    );
    write(tmp.path(), "pkg/b.py", "class Widget:\n    def draw(self):\n        return foo()\n");

    let first = update(tmp.path(), Scripted::new("v1")).await;
    assert!(first.is_success());
    assert!(first.jobs > 0);
    let before = store_bytes(tmp.path());

    let generator = Scripted::new("v2");
    let second = update(tmp.path(), generator.clone()).await;
    assert_eq!(second.jobs, 0);
    assert_eq!(second.added, 0);
    assert!(generator.calls().is_empty());
    assert_eq!(store_bytes(tmp.path()), before);
}

#[tokio::test]
async fn test_changed_entity_regenerated_and_untouched_file_preserved() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "a.py", "def foo():\n    return 1\n");
    write(tmp.path(), "b.py", "def other():\n    return 2\n");

    update(tmp.path(), Scripted::new("old")).await;
    let before = document(tmp.path());
    let old_hash = record(&before, "a.py", "foo")["hash"].clone();
    assert_eq!(record(&before, "a.py", "foo")["doc"], serde_json::json!(["old foo"]));

    write(tmp.path(), "a.py", "def foo():\n    return 2\n");
    let generator = Scripted::new("new");
    let summary = update(tmp.path(), generator.clone()).await;
    assert!(summary.is_success());

    let after = document(tmp.path());
    let foo = record(&after, "a.py", "foo");
    assert_ne!(foo["hash"], old_hash);
    assert_eq!(foo["doc"], serde_json::json!(["old foo", "new foo"]));
    assert_eq!(foo["item_status"], "done");
    assert_eq!(foo["id"], record(&before, "a.py", "foo")["id"]);

    assert_eq!(
        serde_json::to_string(&after["b.py"]).unwrap(),
        serde_json::to_string(&before["b.py"]).unwrap()
    );
    assert!(!generator.calls().iter().any(|c| c.starts_with("b.py")));
}

#[tokio::test]
async fn test_callers_of_changed_entity_are_regenerated() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "lib.py", "def helper():\n    return 1\n");
    write(tmp.path(), "app.py", "def main():\n    return helper()\n\ndef unrelated():\n    return 0\n");

    update(tmp.path(), Scripted::new("v1")).await;
    let doc = document(tmp.path());
    let helper_id = record(&doc, "lib.py", "helper")["id"].clone();
    assert_eq!(record(&doc, "app.py", "main")["reference_who"], serde_json::json!([helper_id]));

    write(tmp.path(), "lib.py", "def helper():\n    return 42\n");
    let generator = Scripted::new("v2");
    update(tmp.path(), generator.clone()).await;

    let calls = generator.calls();
    assert!(calls.contains(&"lib.py::helper".to_string()));
    assert!(calls.contains(&"app.py::main".to_string()));
    assert!(!calls.contains(&"app.py::unrelated".to_string()));
}

#[tokio::test]
async fn test_deleted_file_prunes_entities_and_edges() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "a.py", "def foo():\n    return helper()\n");
    write(tmp.path(), "b.py", "def helper():\n    return 1\n");

    update(tmp.path(), Scripted::new("v1")).await;
    let before = document(tmp.path());
    let helper_id = record(&before, "b.py", "helper")["id"].clone();
    assert!(!record(&before, "a.py", "foo")["reference_who"]
        .as_array()
        .unwrap()
        .is_empty());

    fs::remove_file(tmp.path().join("b.py")).unwrap();
    let generator = Scripted::new("v2");
    let summary = update(tmp.path(), generator.clone()).await;
    assert_eq!(summary.deleted, 2);

    let after = document(tmp.path());
    assert!(after.get("b.py").is_none());
    assert_eq!(record(&after, "a.py", "foo")["reference_who"], serde_json::json!([]));
    assert!(!serde_json::to_string(&after).unwrap().contains(helper_id.as_str().unwrap()));
    assert!(generator.calls().contains(&"a.py::foo".to_string()));

    let (hierarchy, meta) = store(tmp.path()).load().unwrap();
    assert!(hierarchy.check_invariants().is_ok());
    assert!(meta
        .deleted_items_from_older_meta
        .iter()
        .any(|item| item.qualified_path == "b.py::helper"));
}

#[tokio::test]
async fn test_mutual_recursion_generated_once() {
    let tmp = TempDir::new().unwrap();
    write(
        tmp.path(),
        "cycle.py",
        "def ping(n):\n    return pong(n - 1)\n\ndef pong(n):\n    return ping(n - 1)\n",
    );

    let generator = Scripted::new("v1");
    let summary = update(tmp.path(), generator.clone()).await;
    assert!(summary.is_success());
    assert_eq!(
        generator.calls(),
        vec!["cycle.py", "cycle.py::ping", "cycle.py::pong"]
    );

    let doc = document(tmp.path());
    let ping = record(&doc, "cycle.py", "ping");
    let pong = record(&doc, "cycle.py", "pong");
    assert_eq!(ping["reference_who"], serde_json::json!([pong["id"].clone()]));
    assert_eq!(ping["who_reference_me"], serde_json::json!([pong["id"].clone()]));
}

#[tokio::test]
async fn test_failed_entities_retried_next_run() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "a.py", "def foo():\n    return 1\n\ndef bar():\n    return 2\n");

    let first = update(tmp.path(), Scripted::failing("v1", &["foo"])).await;
    assert_eq!(first.failed, 1);
    assert_eq!(first.exit_code(), 1);
    assert_eq!(first.failures[0].qualified_path, "a.py::foo");

    let doc = document(tmp.path());
    assert_eq!(record(&doc, "a.py", "foo")["item_status"], "failed");
    let (_, meta) = store(tmp.path()).load().unwrap();
    assert!(meta.in_generation_process);

    let generator = Scripted::new("v2");
    let second = update(tmp.path(), generator.clone()).await;
    assert!(second.is_success());
    assert_eq!(generator.calls(), vec!["a.py::foo"]);

    let (_, meta) = store(tmp.path()).load().unwrap();
    assert!(!meta.in_generation_process);
}

#[tokio::test]
async fn test_ignored_directories_are_not_documented() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), ".repodocignore", "# generated code\nbuild/\n*_test.py\n");
    write(tmp.path(), "src/app.py", "def run():\n    pass\n");
    write(tmp.path(), "src/app_test.py", "def test_run():\n    pass\n");
    write(tmp.path(), "build/gen.py", "def generated():\n    pass\n");

    update(tmp.path(), Scripted::new("v1")).await;
    let doc = document(tmp.path());
    let files: Vec<&String> = doc.as_object().unwrap().keys().collect();
    assert_eq!(files, vec!["src/app.py"]);
}
