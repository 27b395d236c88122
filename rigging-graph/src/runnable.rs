use std::{
    rc::Rc,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::Result;

use rigging_expr::Expr;

use crate::{
    binders::{ListBinder, ObjBinder, Param},
    builder::{Builder, ClassBuilder, FactoryFn},
    library::{library_table, DlSymbol, Library},
};

/// The interface of root objects: `run` returns an integer status.
///
/// 0 means success, 1 means failure-but-continue, and any other value
/// means failure-and-abort. Building is single threaded, but a runnable
/// may be run from a worker thread.
pub trait Runnable: Send + Sync {
    /// Executes and reports a status
    fn run(&self) -> i32;
}

/// The alias of the static library carrying the built-in classes
pub const BUILTIN_LIBRARY: &str = "IOC";

/// Runs its children left to right, OR-ing their statuses and stopping
/// before the next child once the accumulated status leaves `{0, 1}`
pub struct SequentialRunnableList {
    children: Vec<Arc<dyn Runnable>>,
}

impl SequentialRunnableList {
    /// Wraps the children to be run in order
    pub fn new(children: Vec<Arc<dyn Runnable>>) -> Self {
        SequentialRunnableList { children }
    }
}

impl Runnable for SequentialRunnableList {
    fn run(&self) -> i32 {
        let mut status = 0;
        for child in &self.children {
            if status & !1 != 0 {
                break;
            }
            status |= child.run();
        }
        status
    }
}

/// Runs every child on its own thread, joins them all, then ORs their
/// final statuses. There is no abort; children decide for themselves
/// whether to keep going.
pub struct ParallelRunnableList {
    children: Vec<Arc<dyn Runnable>>,
}

impl ParallelRunnableList {
    /// Wraps the children to be run concurrently
    pub fn new(children: Vec<Arc<dyn Runnable>>) -> Self {
        ParallelRunnableList { children }
    }
}

impl Runnable for ParallelRunnableList {
    fn run(&self) -> i32 {
        std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .children
                .iter()
                .map(|child| scope.spawn(move || child.run()))
                .collect();
            handles
                .into_iter()
                .fold(0, |status, handle| {
                    status | handle.join().expect("runnable thread panicked")
                })
        })
    }
}

fn runnable_list_factory<R>(make: fn(Vec<Arc<dyn Runnable>>) -> R) -> DlSymbol
where
    R: Runnable + 'static,
{
    DlSymbol::Factory(Arc::new(FactoryFn(move |alias: &str, expr: &Expr| {
        Rc::new(ClassBuilder::<
            Arc<dyn Runnable>,
            (Param<ListBinder<ObjBinder<Arc<dyn Runnable>>>>,),
        >::new(alias, expr, move |(children,)| {
            Ok(Arc::new(make(children)) as Arc<dyn Runnable>)
        })) as Rc<dyn Builder>
    })))
}

/// Registers the built-in `SequentialRunnableList` and
/// `ParallelRunnableList` classes under the static library alias
/// [`BUILTIN_LIBRARY`]. Idempotent.
pub fn init_builtin_library() -> Result<()> {
    static INITIALISED: AtomicBool = AtomicBool::new(false);
    if INITIALISED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }
    let symbols = [
        (
            "SequentialRunnableList".to_owned(),
            runnable_list_factory(SequentialRunnableList::new),
        ),
        (
            "ParallelRunnableList".to_owned(),
            runnable_list_factory(ParallelRunnableList::new),
        ),
    ];
    library_table().add_static_library(Library::with_static_symbols(
        BUILTIN_LIBRARY,
        "builtin",
        symbols,
    ))?;
    Ok(())
}
