#![expect(clippy::unwrap_used)] // test code OK

use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use sympl::stdlib::system_assembly;
use sympl::{Error, Runtime};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn member(module: &sympl::value::Expando, name: &str) -> String {
    module
        .get(name)
        .map(|value| value.to_string())
        .unwrap_or_else(|| panic!("{name} is not defined in {}", module.name()))
}

#[test]
fn test_execute_file_with_imports() {
    let rt = Runtime::builder().assembly(system_assembly()).build();
    let module = rt.execute_file(fixture("main.sympl")).unwrap();

    let expected = vec![
        ("sum", "5"),
        ("twice", "42"),
        ("biggest", "42"),
        ("counted", "10"),
        ("hi", "hello"),
        ("shout", "HELLO"),
        ("words", "(alpha beta gamma)"),
        ("second", "beta"),
    ];
    for (name, value) in expected {
        assert_eq!(member(&module, name), value, "value of {name}");
    }

    assert!(member(&module, "__file__").ends_with("main.sympl"));
    // both files are registered as modules under their stems
    assert!(rt.globals().contains("main"));
    assert!(rt.globals().contains("helpers"));
}

#[test]
fn test_execute_file_as_registers_under_name() {
    let rt = Runtime::new();
    let module = rt.execute_file_as(fixture("helpers.sympl"), "util").unwrap();
    assert_eq!(module.name(), "util");
    assert!(rt.globals().contains("util"));
    assert!(!rt.globals().contains("helpers"));

    let scratch = rt.create_scope("scratch");
    let result = rt
        .execute_string("(import util) (util.double util.greeting.length)", &scratch)
        .unwrap();
    assert_eq!(result.to_string(), "10");
}

#[test]
fn test_circular_import_is_an_error() {
    let rt = Runtime::new();
    match rt.execute_file(fixture("cycle_a.sympl")) {
        Err(Error::EvalError(msg)) => assert!(msg.contains("circular import"), "got: {msg}"),
        other => panic!("expected circular import error, got {other:?}"),
    }
    assert!(!rt.globals().contains("cycle_a"));
    assert!(!rt.globals().contains("cycle_b"));

    // a failed load does not poison later attempts
    assert!(matches!(
        rt.execute_file(fixture("cycle_a.sympl")),
        Err(Error::EvalError(_))
    ));
}

#[test]
fn test_failed_file_is_not_registered() {
    let rt = Runtime::new();
    match rt.execute_file(fixture("broken.sympl")) {
        Err(Error::MissingMember(msg)) => assert!(msg.contains("no_such_function"), "got: {msg}"),
        other => panic!("expected missing member error, got {other:?}"),
    }
    assert!(!rt.globals().contains("broken"));
}

static TICKS: AtomicUsize = AtomicUsize::new(0);

fn tick() -> i64 {
    TICKS.fetch_add(1, Ordering::SeqCst) as i64
}

#[test]
fn test_file_is_analyzed_before_it_runs() {
    let rt = Runtime::new();
    rt.register_function::<(), i64, _>("tick", tick);
    match rt.execute_file(fixture("unanalyzable.sympl")) {
        Err(Error::AnalysisError(msg)) => assert!(msg.contains("not inside loop"), "got: {msg}"),
        other => panic!("expected analysis error, got {other:?}"),
    }
    assert_eq!(TICKS.load(Ordering::SeqCst), 0);
}

#[test]
fn test_missing_file() {
    let rt = Runtime::new();
    assert!(matches!(
        rt.execute_file(fixture("does_not_exist.sympl")),
        Err(Error::IoError(_))
    ));
}
