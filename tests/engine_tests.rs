//! End-to-end scenarios: configuration files on disk, built and run
//! through the public entry points.

use std::{
    rc::Rc,
    sync::{Arc, Mutex},
};

use camino::Utf8PathBuf;
use indoc::indoc;

use rigging_expr::Expr;
use rigging_graph::{
    get_object_loader, get_runnable, init_builtin_library, library_table, Builder, ClassBuilder,
    DlSymbol, FactoryFn, Library, LitBinder, Param, Runnable,
};

fn err_text<T>(result: anyhow::Result<T>) -> String {
    match result {
        Ok(_) => panic!("expected an error"),
        Err(err) => format!("{err:#}"),
    }
}

fn write_config(test: &str, name: &str, text: &str) -> Utf8PathBuf {
    let dir = Utf8PathBuf::try_from(std::env::temp_dir())
        .unwrap()
        .join(format!("rigging-engine-{}-{test}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    path
}

struct Task {
    message: String,
    status: i64,
    log: Arc<Mutex<Vec<String>>>,
}

impl Runnable for Task {
    fn run(&self) -> i32 {
        self.log.lock().unwrap().push(self.message.clone());
        self.status as i32
    }
}

/// Registers a `Task(message, status)` runnable class under `alias`,
/// returning the log its instances report into
fn task_library(alias: &str) -> Arc<Mutex<Vec<String>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let captured = log.clone();
    let factory = FactoryFn(move |alias: &str, expr: &Expr| {
        let log = captured.clone();
        Rc::new(ClassBuilder::<
            Arc<dyn Runnable>,
            (Param<LitBinder<String>>, Param<LitBinder<i64>>),
        >::new(alias, expr, move |(message, status)| {
            Ok(Arc::new(Task {
                message,
                status,
                log: log.clone(),
            }) as Arc<dyn Runnable>)
        })) as Rc<dyn Builder>
    });
    library_table()
        .add_static_library(Library::with_static_symbols(
            alias,
            "builtin",
            [("Task".to_owned(), DlSymbol::Factory(Arc::new(factory)))],
        ))
        .unwrap();
    log
}

#[test]
fn sequential_run_from_file() {
    init_builtin_library().unwrap();
    let log = task_library("app.seq");
    let path = write_config(
        "sequential",
        "main.cfg",
        indoc! {r#"
            ! A minimal application configuration
            TaskClass = Class(app.seq, "Task");
            SeqClass = Class(IOC, "SequentialRunnableList");
            Greeting = "hello";
            Main = SeqClass([TaskClass(Greeting, 0), TaskClass("goodbye", 1)]);
        "#},
    );
    let runnable = get_runnable(&path, "Main").unwrap();
    assert_eq!(runnable.run(), 1);
    assert_eq!(*log.lock().unwrap(), ["hello", "goodbye"]);
}

#[test]
fn parallel_run_from_file() {
    init_builtin_library().unwrap();
    let log = task_library("app.par");
    let path = write_config(
        "parallel",
        "main.cfg",
        indoc! {r#"
            TaskClass = Class(app.par, "Task");
            ParClass = Class(IOC, "ParallelRunnableList");
            Main = ParClass([TaskClass("a", 0), TaskClass("b", 4)]);
        "#},
    );
    let runnable = get_runnable(&path, "Main").unwrap();
    assert_eq!(runnable.run(), 4);
    assert_eq!(log.lock().unwrap().len(), 2);
}

#[test]
fn shebang_include_and_macros() {
    init_builtin_library().unwrap();
    let log = task_library("app.inc");
    let common = indoc! {r#"
        #define Suffix "!"
        TaskClass = Class(app.inc, "Task");
    "#};
    let dir = write_config("include", "common.cfg", common)
        .parent()
        .unwrap()
        .to_owned();
    let main = indoc! {r#"
        #!/usr/bin/env rigging
        #include "common.cfg"
        Main = TaskClass(Concat("ran from ", CurrentDir(), "$(Suffix)"), 0);
    "#};
    let path = write_config("include", "main.cfg", main);
    let runnable = get_runnable(&path, "Main").unwrap();
    assert_eq!(runnable.run(), 0);
    assert_eq!(*log.lock().unwrap(), [format!("ran from {dir}/!")]);
}

#[test]
fn alternate_root_names() {
    init_builtin_library().unwrap();
    let log = task_library("app.roots");
    let path = write_config(
        "roots",
        "main.cfg",
        indoc! {r#"
            TaskClass = Class(app.roots, "Task");
            First = TaskClass("first", 0);
            Second = TaskClass("second", 2);
        "#},
    );
    let second = get_runnable(&path, "Second").unwrap();
    assert_eq!(second.run(), 2);
    assert_eq!(*log.lock().unwrap(), ["second"]);
}

#[test]
fn missing_configuration_file() {
    let err = err_text(get_runnable("/nonexistent/rigging.cfg", "Main"));
    assert!(err.contains("Failed to open config file"), "{err}");
}

#[test]
fn unresolvable_native_library() {
    let path = write_config(
        "native",
        "main.cfg",
        indoc! {r#"
            Lib = Library("/nonexistent/libx.so");
            C = Class(Lib, "factory_a");
            Main = C();
        "#},
    );
    let err = err_text(get_runnable(&path, "Main"));
    assert!(err.contains("Failed to open library Lib"), "{err}");
    assert!(err.contains("whilst loading symbol factory_a"), "{err}");
}

#[test]
fn roots_must_be_runnables() {
    let path = write_config(
        "nonrunnable",
        "main.cfg",
        "Main = \"just a string\";\n",
    );
    let err = err_text(get_runnable(&path, "Main"));
    assert!(err.contains("is not an object"), "{err}");
}

#[test]
fn object_loader_exposes_definitions() {
    let path = write_config(
        "loader",
        "main.cfg",
        indoc! {r#"
            Count = 3;
            Items = [1, 2, 3];
        "#},
    );
    let loader = get_object_loader(&path).unwrap();
    assert_eq!(loader.definitions().get("Count"), Some(&Expr::Int(3)));
    assert_eq!(
        loader.to_int(&Expr::Variable("Count".into())).unwrap(),
        3
    );
    assert_eq!(
        loader
            .to_list(&Expr::Variable("Items".into()))
            .unwrap()
            .len(),
        3
    );
}
