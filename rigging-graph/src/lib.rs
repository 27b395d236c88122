//! Object-graph resolution for rigging configurations.
//!
//! A loaded configuration (see `rigging-config`) is a table of named
//! expressions. This crate walks those expressions on demand: variables
//! resolve through the table, `Class` definitions load factory symbols
//! from libraries, and object expressions are handed to a per-class
//! [`Builder`] that binds each constructor parameter through a typed
//! binder and materialises the instance. Named objects are built exactly
//! once no matter how many references they have; construction is strictly
//! dependency-first; aliasing and construction cycles are detected and
//! reported.
//!
//! ```
//! use std::{rc::Rc, sync::Arc};
//!
//! use camino::Utf8Path;
//! use rigging_config::Definitions;
//! use rigging_expr::Expr;
//! use rigging_graph::{
//!     library_table, Builder, ClassBuilder, DlSymbol, FactoryFn, Library, LitBinder,
//!     ObjectGraph, Param,
//! };
//!
//! struct Greeter {
//!     text: String,
//!     count: i64,
//! }
//!
//! // Register a factory for the Greeter class in a static library
//! let factory = FactoryFn(|alias: &str, expr: &Expr| {
//!     Rc::new(ClassBuilder::<
//!         Arc<Greeter>,
//!         (Param<LitBinder<String>>, Param<LitBinder<i64>>),
//!     >::new(alias, expr, |(text, count)| {
//!         Ok(Arc::new(Greeter { text, count }))
//!     })) as Rc<dyn Builder>
//! });
//! library_table().add_static_library(Library::with_static_symbols(
//!     "docs.greeters",
//!     "builtin",
//!     [("Greeter".to_owned(), DlSymbol::Factory(Arc::new(factory)))],
//! ))?;
//!
//! // Wire an object graph from configuration text
//! let definitions = Definitions::load_str(
//!     r#"
//!     GreeterClass = Class(docs.greeters, "Greeter");
//!     Main = GreeterClass("hello", 3);
//!     "#,
//!     Utf8Path::new("/etc/app"),
//! )?;
//! let graph = ObjectGraph::new(definitions, library_table());
//! let main: Arc<Greeter> = graph.build_root("Main")?;
//! assert_eq!(main.text, "hello");
//! assert_eq!(main.count, 3);
//! # Ok::<(), anyhow::Error>(())
//! ```
#![warn(missing_docs)]

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    rc::Rc,
    sync::Arc,
};

use anyhow::{anyhow, bail, Result};
use camino::Utf8Path;

use rigging_config::Definitions;
use rigging_expr::Expr;

mod binders;
mod bits;
mod builder;
mod library;
mod runnable;

pub use binders::{
    Bind, BitsetBinder, EnumBinder, ListBinder, LitBinder, Literal, MapBinder, MultiMapBinder,
    ObjBinder, Param, ParamSet, ProxyBinder, RefBinder, SetBinder,
};
pub use bits::Bitset;
pub use builder::{
    builder_cast, builder_value, Builder, BuilderFactory, ClassBuilder, FactoryFn, Proxy,
    TypeMismatch,
};
pub use library::{library_table, DlSymbol, FactorySymbol, Library, LibraryTable};
pub use runnable::{
    init_builtin_library, ParallelRunnableList, Runnable, SequentialRunnableList, BUILTIN_LIBRARY,
};


/// Loads the configuration at `file_path` and returns the runnable
/// defined under `name`, fully constructed.
///
/// Call [`init_builtin_library`] first if the configuration uses the
/// built-in runnable list classes.
pub fn get_runnable(file_path: impl AsRef<Utf8Path>, name: &str) -> Result<Arc<dyn Runnable>> {
    get_object_loader(file_path)?.build_root::<Arc<dyn Runnable>>(name)
}

/// Loads the configuration at `file_path` into an [`ObjectGraph`] for
/// programmatic inspection and building
pub fn get_object_loader(file_path: impl AsRef<Utf8Path>) -> Result<ObjectGraph> {
    Ok(ObjectGraph::new(
        Definitions::load(file_path.as_ref())?,
        library_table(),
    ))
}

/// A class definition resolved to its factory, cached once per name
pub struct ClassRecord {
    name: String,
    factory: Arc<dyn BuilderFactory>,
}

impl ClassRecord {
    /// The configured class name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creates a fresh builder for one object expression of this class
    pub fn create_builder(&self, alias: &str, expr: &Expr) -> Rc<dyn Builder> {
        self.factory.create(alias, expr)
    }
}

/// A named (or anonymous) object expression with its class and builder
pub struct ObjectRecord {
    name: String,
    class: Rc<ClassRecord>,
    builder: Rc<dyn Builder>,
}

impl ObjectRecord {
    /// The object's configured name; empty for anonymous objects
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The class the object is built from
    pub fn class(&self) -> &ClassRecord {
        &self.class
    }

    /// The builder shared by every reference to this object
    pub fn builder(&self) -> &Rc<dyn Builder> {
        &self.builder
    }
}

/// Resolves expressions against a loaded configuration, owning the caches
/// of classes and of built objects.
///
/// All methods take `&self`; the caches use interior mutability because
/// resolution is lazy but the build phase is single threaded by contract.
/// Object records are retained for the life of the graph, so every
/// variable reference to a named object observes the same instance.
pub struct ObjectGraph {
    definitions: Definitions,
    libraries: &'static LibraryTable,
    classes: RefCell<HashMap<String, Rc<ClassRecord>>>,
    objects: RefCell<HashMap<String, Rc<ObjectRecord>>>,
}

impl ObjectGraph {
    /// Wraps loaded definitions and a library table into a resolver
    pub fn new(definitions: Definitions, libraries: &'static LibraryTable) -> Self {
        ObjectGraph {
            definitions,
            libraries,
            classes: RefCell::new(HashMap::new()),
            objects: RefCell::new(HashMap::new()),
        }
    }

    /// The definitions this graph resolves against
    pub fn definitions(&self) -> &Definitions {
        &self.definitions
    }

    /// Builds the object defined under `name` and extracts it as a `V`,
    /// which must be the value type its builder declares
    pub fn build_root<V: Clone + 'static>(&self, name: &str) -> Result<V> {
        let span = tracing::debug_span!("build", root = name);
        let _span = span.enter();
        let expr = Expr::Variable(name.to_owned());
        let builder = self.get_builder(&expr)?;
        builder_value::<V>(builder.as_ref())
    }

    /// Returns the builder for an expression that must resolve to an
    /// object, creating and binding it on first sight
    pub fn get_builder(&self, expr: &Expr) -> Result<Rc<dyn Builder>> {
        let name = match expr {
            Expr::Variable(name) => name.as_str(),
            _ => "",
        };
        Ok(self.object(expr, name)?.builder.clone())
    }

    fn lookup(&self, name: &str) -> Result<&Expr> {
        self.definitions
            .get(name)
            .ok_or_else(|| anyhow!("Undefined value or unexpected enum {name}"))
    }

    /// Follows `Variable` links until a non-variable expression, guarding
    /// against aliasing cycles. Returns the last variable name seen.
    fn follow<'a>(
        &'a self,
        start: &'a Expr,
        tolerate_missing: bool,
    ) -> Result<(&'a Expr, Option<&'a str>)> {
        let mut expr = start;
        let mut seen = HashSet::new();
        let mut last = None;
        while let Expr::Variable(name) = expr {
            if !seen.insert(name.as_str()) {
                bail!("Circular reference resolving {name}");
            }
            last = Some(name.as_str());
            match self.definitions.get(name) {
                Some(next) => expr = next,
                None if tolerate_missing => return Ok((expr, last)),
                None => bail!("Undefined value or unexpected enum {name}"),
            }
        }
        Ok((expr, last))
    }

    /// The expression behind any chain of variables
    pub fn underlying<'a>(&'a self, expr: &'a Expr) -> Result<&'a Expr> {
        Ok(self.follow(expr, false)?.0)
    }

    /// An integer; reals do not narrow
    pub fn to_int(&self, expr: &Expr) -> Result<i64> {
        match self.underlying(expr)? {
            Expr::Int(value) => Ok(*value),
            other => Err(TypeMismatch::err(format!(
                "expected int, got {} interpreted as {}",
                other.describe(),
                other.kind()
            ))),
        }
    }

    /// A non-negative integer
    pub fn to_uint(&self, expr: &Expr) -> Result<u64> {
        match self.underlying(expr)? {
            Expr::Int(value) if *value >= 0 => Ok(*value as u64),
            Expr::Int(value) => bail!(
                "Expected unsigned int, got {value} which did not convert (is it negative?)"
            ),
            other => Err(TypeMismatch::err(format!(
                "expected unsigned int, got {} interpreted as {}",
                other.describe(),
                other.kind()
            ))),
        }
    }

    /// A real number; integers upgrade
    pub fn to_real(&self, expr: &Expr) -> Result<f64> {
        match self.underlying(expr)? {
            Expr::Real(value) => Ok(*value),
            Expr::Int(value) => Ok(*value as f64),
            other => Err(TypeMismatch::err(format!(
                "expected a number, got {} interpreted as {}",
                other.describe(),
                other.kind()
            ))),
        }
    }

    /// A boolean; numbers do not coerce
    pub fn to_bool(&self, expr: &Expr) -> Result<bool> {
        match self.underlying(expr)? {
            Expr::Bool(value) => Ok(*value),
            other => Err(TypeMismatch::err(format!(
                "expected boolean, got {} interpreted as {} \
                 (note, numbers do not convert to booleans)",
                other.describe(),
                other.kind()
            ))),
        }
    }

    /// A string; `Concat` joins its children recursively
    pub fn to_text(&self, expr: &Expr) -> Result<String> {
        match self.underlying(expr)? {
            Expr::Str(text) => Ok(text.clone()),
            Expr::Concat(parts) => {
                let mut joined = String::new();
                for part in parts {
                    joined.push_str(&self.to_text(part)?);
                }
                Ok(joined)
            }
            other => Err(TypeMismatch::err(format!(
                "Could not interpret {} as a string: interpreted as {}",
                other.describe(),
                other.kind()
            ))),
        }
    }

    /// The name of the last variable in the chain, which must itself be
    /// undefined: that is what makes it an enumeration constant
    pub fn to_enum(&self, expr: &Expr) -> Result<String> {
        let (under, last) = self.follow(expr, true)?;
        match under {
            Expr::Variable(name) => Ok(name.clone()),
            other => {
                let last = last.unwrap_or_default();
                Err(TypeMismatch::err(format!(
                    "{last} has been defined to {} of type {} expecting an enumeration",
                    other.describe(),
                    other.kind()
                )))
            }
        }
    }

    /// The elements of a list expression
    pub fn to_list<'a>(&'a self, expr: &'a Expr) -> Result<&'a [Expr]> {
        match self.underlying(expr)? {
            Expr::List(items) => Ok(items),
            other => Err(TypeMismatch::err(format!(
                "expected a list, got {} interpreted as {}",
                other.describe(),
                other.kind()
            ))),
        }
    }

    /// The key/value pairs of a map expression
    pub fn to_map<'a>(&'a self, expr: &'a Expr) -> Result<&'a [(Expr, Expr)]> {
        match self.underlying(expr)? {
            Expr::Map(entries) => Ok(entries),
            other => Err(TypeMismatch::err(format!(
                "expected a map, got {} interpreted as {} \
                 (note: a List of Pair items is not a map)",
                other.describe(),
                other.kind()
            ))),
        }
    }

    /// The library behind `name`: already registered, or opened from its
    /// `Library` definition on first use
    fn library(&self, name: &str) -> Result<&'static Library> {
        if let Some(library) = self.libraries.get_or_none(name) {
            return Ok(library);
        }
        let Expr::Library(path) = self.lookup(name)? else {
            bail!("{name} is not a library");
        };
        let path = self.to_text(path)?;
        self.libraries.add_library(name, &path)
    }

    /// The class record behind `name`, resolving and caching the factory
    /// on first use. Classes cannot be re-aliased: the name must map
    /// directly to a `Class` expression.
    fn class(&self, name: &str) -> Result<Rc<ClassRecord>> {
        if let Some(record) = self.classes.borrow().get(name) {
            return Ok(record.clone());
        }
        let Expr::Class { library, symbol } = self.lookup(name)? else {
            bail!("{name} is not a class");
        };
        let symbol_name = self
            .to_text(symbol)
            .map_err(|err| anyhow!("{err:#}\n\tin 2nd parameter of class definition {name}"))?;
        let found = (|| self.library(library)?.lookup(&symbol_name, true))().map_err(|err| {
            anyhow!("{err:#}\n\twhilst loading symbol {symbol_name} from library {library} class {name}")
        })?;
        let factory = match found {
            Some(DlSymbol::Factory(factory)) => factory,
            _ => bail!(
                "Symbol {symbol_name} in library {library} is not a class factory, \
                 whilst loading class definition {name}"
            ),
        };
        let record = Rc::new(ClassRecord {
            name: name.to_owned(),
            factory,
        });
        self.classes
            .borrow_mut()
            .insert(name.to_owned(), record.clone());
        Ok(record)
    }

    /// The object record for an expression. Named objects are cached; the
    /// record is inserted *before* parameter binding so that re-entrant
    /// references share the builder and construction cycles can trip the
    /// builder's guard.
    fn object(&self, expr: &Expr, name: &str) -> Result<Rc<ObjectRecord>> {
        if !name.is_empty() {
            if let Some(record) = self.objects.borrow().get(name) {
                return Ok(record.clone());
            }
        }
        match expr {
            Expr::Object { class, .. } => {
                let class = self.class(class)?;
                let builder = class.create_builder(name, expr);
                let record = Rc::new(ObjectRecord {
                    name: name.to_owned(),
                    class,
                    builder,
                });
                if !name.is_empty() {
                    self.objects
                        .borrow_mut()
                        .insert(name.to_owned(), record.clone());
                }
                record.builder.bind_params(self)?;
                Ok(record)
            }
            Expr::Variable(_) => {
                let (resolved, last) = self.follow(expr, false)?;
                let last = last.unwrap_or_default().to_owned();
                self.object(resolved, &last)
            }
            other => bail!("{} is not an object", other.describe()),
        }
    }
}
