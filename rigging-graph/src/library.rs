use std::{
    any::Any,
    collections::HashMap,
    sync::{Arc, Mutex, OnceLock},
};

use anyhow::{bail, Result};

use crate::builder::BuilderFactory;

/// The value behind an exported library symbol.
///
/// Class symbols resolve to factories; other exports (output sinks,
/// shared data) ride the same mechanism as opaque values.
#[derive(Clone)]
pub enum DlSymbol {
    /// A class factory
    Factory(Arc<dyn BuilderFactory>),
    /// Any other shared export
    Data(Arc<dyn Any + Send + Sync>),
}

/// The convention for native exports: each factory symbol is a function
/// returning the symbol value
pub type FactorySymbol = extern "Rust" fn() -> DlSymbol;

enum Modules {
    /// A dynamically loaded module
    Native(libloading::Library),
    /// Symbols registered in-process at program start
    Static(HashMap<String, DlSymbol>),
}

/// A loadable module, keyed by its configured alias
pub struct Library {
    alias: String,
    path: String,
    modules: Modules,
}

impl Library {
    /// Opens the native module at `path`
    fn open(alias: &str, path: &str) -> Result<Self> {
        // Symbols looked up later must follow the FactorySymbol convention
        let native = unsafe { libloading::Library::new(path) };
        let native = match native {
            Ok(native) => native,
            Err(err) => bail!("Failed to open library {alias} at {path}\n\t{err}"),
        };
        Ok(Library {
            alias: alias.to_owned(),
            path: path.to_owned(),
            modules: Modules::Native(native),
        })
    }

    /// Builds a static library from in-process symbols. The path does not
    /// need to exist; it only identifies the registration.
    pub fn with_static_symbols(
        alias: &str,
        path: &str,
        symbols: impl IntoIterator<Item = (String, DlSymbol)>,
    ) -> Self {
        Library {
            alias: alias.to_owned(),
            path: path.to_owned(),
            modules: Modules::Static(symbols.into_iter().collect()),
        }
    }

    /// The alias this library is registered under
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// The path the library was opened from
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Resolves an exported symbol. With `required` set, a missing symbol
    /// is an error naming the library and path.
    pub fn lookup(&self, symbol: &str, required: bool) -> Result<Option<DlSymbol>> {
        let found = match &self.modules {
            Modules::Static(symbols) => symbols.get(symbol).cloned(),
            Modules::Native(native) => {
                // The cast is only as safe as the export convention; a
                // symbol of the wrong shape fails when first used
                let entry = unsafe { native.get::<FactorySymbol>(symbol.as_bytes()) };
                entry.ok().map(|entry| (*entry)())
            }
        };
        if found.is_none() && required {
            bail!(
                "Symbol {symbol} not found in library {} path {}",
                self.alias,
                self.path
            );
        }
        Ok(found)
    }
}

/// The process-wide registry of loaded libraries.
///
/// Mutation happens only during the single-threaded build phase. Entries
/// are leaked: handles must stay valid for the process lifetime because
/// built instances may hold symbols from them, and no safe tear-down
/// order across libraries exists.
pub struct LibraryTable {
    map: Mutex<HashMap<String, &'static Library>>,
}

/// The global library table, initialised on first use
pub fn library_table() -> &'static LibraryTable {
    static TABLE: OnceLock<LibraryTable> = OnceLock::new();
    TABLE.get_or_init(|| LibraryTable {
        map: Mutex::new(HashMap::new()),
    })
}

impl LibraryTable {
    /// Opens and registers the native library at `path` under `alias`.
    /// Re-registration is permitted only at the same path.
    pub fn add_library(&self, alias: &str, path: &str) -> Result<&'static Library> {
        let mut map = self.map.lock().expect("Lock poisoned");
        if let Some(existing) = map.get(alias) {
            if existing.path() != path {
                bail!(
                    "Library with alias {alias} previously defined at {}, now at {path}",
                    existing.path()
                );
            }
            return Ok(existing);
        }
        tracing::debug!("Opening library {alias} at {path}");
        let library: &'static Library = Box::leak(Box::new(Library::open(alias, path)?));
        map.insert(alias.to_owned(), library);
        Ok(library)
    }

    /// Registers an in-process library; same idempotency as
    /// [`LibraryTable::add_library`]
    pub fn add_static_library(&self, library: Library) -> Result<&'static Library> {
        let mut map = self.map.lock().expect("Lock poisoned");
        if let Some(existing) = map.get(library.alias()) {
            if existing.path() != library.path() {
                bail!(
                    "Library with alias {} previously defined at {}, now at {}",
                    library.alias(),
                    existing.path(),
                    library.path()
                );
            }
            return Ok(existing);
        }
        let library: &'static Library = Box::leak(Box::new(library));
        map.insert(library.alias().to_owned(), library);
        Ok(library)
    }

    /// The library registered under `alias`, or `None`
    pub fn get_or_none(&self, alias: &str) -> Option<&'static Library> {
        self.map.lock().expect("Lock poisoned").get(alias).copied()
    }

    /// The library registered under `alias`, or an error
    pub fn get(&self, alias: &str) -> Result<&'static Library> {
        match self.get_or_none(alias) {
            Some(library) => Ok(library),
            None => bail!("Library {alias} not defined"),
        }
    }
}
