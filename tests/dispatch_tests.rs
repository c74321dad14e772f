#![expect(clippy::unwrap_used)] // test code OK

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use sympl::binder::BinderKey;
use sympl::reflect::{
    BindingFlags, Constructor, DefaultReflector, Indexer, Member, Reflector, TypeDescriptor,
};
use sympl::stdlib::system_assembly;
use sympl::{Error, Runtime, Value};

/// Counts member lookups, delegating to the default reflector.
#[derive(Debug, Default)]
struct CountingReflector {
    lookups: AtomicUsize,
}

impl CountingReflector {
    fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl Reflector for CountingReflector {
    fn members(&self, ty: &TypeDescriptor, name: &str, flags: BindingFlags) -> Vec<Arc<Member>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        DefaultReflector.members(ty, name, flags)
    }

    fn constructors(&self, ty: &TypeDescriptor) -> Vec<Arc<Constructor>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        DefaultReflector.constructors(ty)
    }

    fn indexers(&self, ty: &TypeDescriptor) -> Vec<Arc<Indexer>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        DefaultReflector.indexers(ty)
    }
}

#[test]
fn test_rules_are_reused_while_guards_hold() {
    let reflector = Arc::new(CountingReflector::default());
    let rt = Runtime::builder().reflector(reflector.clone()).build();
    let module = rt.create_scope("test");
    rt.execute_expr("(defun len (s) s.length)", &module).unwrap();

    assert_eq!(rt.execute_expr("(len \"abc\")", &module).unwrap(), Value::Int(3));
    let after_first_bind = reflector.lookups();
    assert!(after_first_bind > 0);

    // same site, same receiver type: the site's own cache answers
    for _ in 0..50 {
        rt.execute_expr("(len \"hello\")", &module).unwrap();
    }
    assert_eq!(reflector.lookups(), after_first_bind);

    // a new site for the same operation finds the rule in the binder's cache
    rt.execute_expr("(set word \"four\")", &module).unwrap();
    assert_eq!(rt.execute_expr("word.length", &module).unwrap(), Value::Int(4));
    assert_eq!(reflector.lookups(), after_first_bind);

    // a new receiver type binds again, and its failure is cached too
    assert!(matches!(
        rt.execute_expr("(len 5)", &module),
        Err(Error::MissingMember(_))
    ));
    let after_failure = reflector.lookups();
    assert!(after_failure > after_first_bind);
    assert!(matches!(
        rt.execute_expr("(len 6)", &module),
        Err(Error::MissingMember(_))
    ));
    assert_eq!(reflector.lookups(), after_failure);

    // the original type still hits
    assert_eq!(rt.execute_expr("(len \"xy\")", &module).unwrap(), Value::Int(2));
    assert_eq!(reflector.lookups(), after_failure);
}

#[test]
fn test_type_handle_rules_are_per_type() {
    let reflector = Arc::new(CountingReflector::default());
    let rt = Runtime::builder()
        .reflector(reflector.clone())
        .assembly(system_assembly())
        .build();
    let module = rt.create_scope("test");
    rt.execute_string(
        "(import system.text) (import system.collections) (defun make (t) (new t))",
        &module,
    )
    .unwrap();

    let sb = rt.execute_expr("(make text.stringbuilder)", &module).unwrap();
    assert!(sb.type_name().ends_with("StringBuilder"));
    let list = rt.execute_expr("(make collections.arraylist)", &module).unwrap();
    assert!(list.type_name().ends_with("ArrayList"));

    let settled = reflector.lookups();
    rt.execute_expr("(make text.stringbuilder)", &module).unwrap();
    rt.execute_expr("(make collections.arraylist)", &module).unwrap();
    assert_eq!(reflector.lookups(), settled);
}

#[test]
fn test_deferred_type_handle_member_is_cached() {
    let reflector = Arc::new(CountingReflector::default());
    let rt = Runtime::builder()
        .reflector(reflector.clone())
        .assembly(system_assembly())
        .build();
    let module = rt.create_scope("test");
    rt.execute_string("(import system.math) (defun name () math.FullName)", &module)
        .unwrap();

    assert_eq!(rt.execute_expr("(name)", &module).unwrap().to_string(), "System.Math");
    let settled = reflector.lookups();
    assert!(settled > 0);
    assert_eq!(rt.execute_expr("(name)", &module).unwrap().to_string(), "System.Math");
    assert_eq!(reflector.lookups(), settled);
}

#[test]
fn test_site_cache_evicts_oldest_rule() {
    let rt = Runtime::builder()
        .config(sympl::RuntimeConfig {
            site_cache_size: 2,
            ..Default::default()
        })
        .build();
    let module = rt.create_scope("test");
    rt.execute_expr("(defun show (x) (x.ToString))", &module).unwrap();
    for input in ["(show 1)", "(show \"s\")", "(show true)", "(show 2)"] {
        rt.execute_expr(input, &module).unwrap();
    }
    assert_eq!(rt.execute_expr("(show false)", &module).unwrap().to_string(), "false");
}

#[test]
fn test_interning_tables_are_shared_across_threads() {
    let rt = Runtime::new();
    let (symbols, binders): (Vec<_>, Vec<_>) = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let rt = &rt;
                scope.spawn(move || {
                    let name = if i % 2 == 0 { "Shared" } else { "SHARED" };
                    let symbol = rt.make_symbol(name);
                    let binder = rt.binder(BinderKey::GetMember("count".to_string()));
                    (symbol, binder)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).unzip()
    });

    assert!(symbols.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert!(binders.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(rt.binder_count(), 1);
}

#[test]
fn test_concurrent_evaluation_shares_a_function() {
    let rt = Runtime::new();
    let module = rt.create_scope("shared");
    rt.execute_expr(
        "(defun fib (n) (if (< n 2) n (+ (fib (- n 1)) (fib (- n 2)))))",
        &module,
    )
    .unwrap();

    let results: Vec<Value> = thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| rt.execute_expr("(fib 15)", &module).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(results.iter().all(|v| *v == Value::Int(610)));
}
