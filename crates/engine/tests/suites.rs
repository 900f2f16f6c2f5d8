//! YAML suites end to end through the runner

mod common;

use common::FakeProvider;
use gauntlet_common::{ArtifactPolicy, Browser, Project, RunConfig};
use gauntlet_engine::report::{Report, EXIT_TEST_FAILURES};
use gauntlet_engine::{ErrorKind, Outcome, TestRunner};
use std::path::Path;

const CRUD: &str = r#"
suite: Todo CRUD
tags: [crud]
before_each:
  - action: navigate
    url: /
  - action: expect
    selector: '[data-testid="todo-input"]'
    visible: true
tests:
  - name: should add a new todo item @smoke
    steps:
      - action: fill
        selector: '[data-testid="todo-input"]'
        value: Buy groceries
      - action: press
        selector: '[data-testid="todo-input"]'
        key: Enter
      - action: expect
        selector: '[data-testid="todo-item"]'
        count: 1
        text: Buy groceries
      - action: expect
        selector: '[data-testid="todo-input"]'
        value: ''

  - name: should not add empty todo items
    skip_projects: [firefox]
    steps:
      - action: fill
        selector: '[data-testid="todo-input"]'
        value: '   '
      - action: press
        selector: '[data-testid="todo-input"]'
        key: Enter
      - action: expect
        selector: '[data-testid="todo-item"]'
        count: 0

  - name: should show completed count
    tags: [regression]
    steps:
      - action: expect
        selector: '[data-testid="todo-count"]'
        text_contains: 1 item left
        timeout_ms: 150
"#;

const FILTERS: &str = r#"
suite: Todo Filters
tests:
  - name: should navigate to active filter
    steps:
      - action: navigate
        url: /#/active
      - action: expect
        url_matches: '#/active$'
"#;

fn write_suites(dir: &Path) {
    let specs = dir.join("specs");
    std::fs::create_dir_all(&specs).unwrap();
    std::fs::write(specs.join("todo-crud.yaml"), CRUD).unwrap();
    std::fs::write(specs.join("todo-filters.yaml"), FILTERS).unwrap();
}

fn run_config(dir: &Path) -> RunConfig {
    RunConfig {
        parallelism: 2,
        max_retries: 1,
        base_url: Some("http://localhost:3000".into()),
        projects: vec![
            Project::new("chromium", Browser::Chromium),
            Project::new("firefox", Browser::Firefox),
        ],
        output_dir: dir.join("results"),
        artifacts: ArtifactPolicy::off(),
        ..RunConfig::default()
    }
}

#[tokio::test]
async fn test_yaml_suites_run_across_projects() {
    let dir = tempfile::tempdir().unwrap();
    write_suites(dir.path());

    let mut runner = TestRunner::new(run_config(dir.path()), FakeProvider::new());
    assert_eq!(runner.load_specs(&dir.path().join("specs")).unwrap(), 4);

    let report = runner.run().await.unwrap();
    assert_eq!(report.summary.total, 8);

    let add = report
        .item("todo-crud.yaml > Todo CRUD > should add a new todo item @smoke", "firefox")
        .unwrap();
    assert_eq!(add.outcome, Outcome::Passed);

    let empty = "todo-crud.yaml > Todo CRUD > should not add empty todo items";
    assert_eq!(report.item(empty, "chromium").unwrap().outcome, Outcome::Passed);
    assert_eq!(report.item(empty, "firefox").unwrap().outcome, Outcome::Skipped);

    let count = report
        .item("todo-crud.yaml > Todo CRUD > should show completed count", "chromium")
        .unwrap();
    assert_eq!(count.outcome, Outcome::Failed);
    assert_eq!(count.attempts.len(), 2);
    let error = count.attempts[1].error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::Expectation);
    assert!(error.message.contains("todo-count"), "{}", error.message);

    let filter = report
        .item("todo-filters.yaml > Todo Filters > should navigate to active filter", "chromium")
        .unwrap();
    assert_eq!(filter.outcome, Outcome::Passed);

    assert_eq!(report.summary.failed, 2);
    assert_eq!(report.summary.skipped, 1);
    assert_eq!(report.exit_code(), EXIT_TEST_FAILURES);

    let path = runner.write_results(&report).unwrap();
    let back = Report::from_json(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(back.items.len(), 8);
    assert_eq!(back.summary, report.summary);
}

#[tokio::test]
async fn test_tag_expression_selects_suites() {
    let dir = tempfile::tempdir().unwrap();
    write_suites(dir.path());

    let config = RunConfig {
        tag_expression: Some("@smoke or not crud".into()),
        ..run_config(dir.path())
    };
    let mut runner = TestRunner::new(config, FakeProvider::new())
        .only_projects(vec!["chromium".into()]);
    runner.load_specs(&dir.path().join("specs")).unwrap();

    let report = runner.run().await.unwrap();
    let ids: Vec<&str> = report.items.iter().map(|i| i.test_id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            "todo-crud.yaml > Todo CRUD > should add a new todo item @smoke",
            "todo-filters.yaml > Todo Filters > should navigate to active filter",
        ]
    );
    assert!(report.is_success());
}

#[tokio::test]
async fn test_same_titles_in_different_files_both_run() {
    let dir = tempfile::tempdir().unwrap();
    write_suites(dir.path());
    std::fs::write(dir.path().join("specs").join("zz-copy.yml"), FILTERS).unwrap();

    let mut runner = TestRunner::new(run_config(dir.path()), FakeProvider::new())
        .only_projects(vec!["chromium".into()]);
    assert_eq!(runner.load_specs(&dir.path().join("specs")).unwrap(), 5);

    let report = runner.run().await.unwrap();
    for file in ["todo-filters.yaml", "zz-copy.yml"] {
        let id = format!("{} > Todo Filters > should navigate to active filter", file);
        assert_eq!(report.item(&id, "chromium").unwrap().outcome, Outcome::Passed);
    }
}

#[test]
fn test_duplicate_tests_within_a_file_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let specs = dir.path().join("specs");
    std::fs::create_dir_all(&specs).unwrap();
    std::fs::write(
        specs.join("dup.yaml"),
        "suite: Dup\ntests:\n  - name: twice\n    steps: []\n  - name: twice\n    steps: []\n",
    )
    .unwrap();

    let mut runner = TestRunner::new(run_config(dir.path()), FakeProvider::new());
    let err = runner.load_specs(&specs).unwrap_err();
    assert!(err.is_config_error());
}

#[test]
fn test_demo_suites_parse() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos/specs");
    let suites = gauntlet_engine::SuiteSpec::load_dir(&dir).unwrap();
    let titles: Vec<&str> = suites.iter().map(|s| s.suite.as_str()).collect();
    assert_eq!(
        titles,
        vec!["Form Validation", "Login Flow", "Navigation Flow", "Todo CRUD", "Todo Filters"]
    );
    assert_eq!(suites.iter().map(|s| s.tests.len()).sum::<usize>(), 25);
    for suite in &suites {
        for test in suite.test_cases() {
            assert!(test.id().to_string().starts_with(suite.file.as_deref().unwrap()));
        }
    }

    let config = RunConfig::load(&dir.join("../gauntlet.toml")).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.projects.len(), 5);
    assert!(config.projects[4].is_mobile);
}
