//! Loading of rigging configuration files into a table of named
//! definitions.
//!
//! A configuration file is line oriented. Lines are trimmed of horizontal
//! whitespace and classified as one of:
//!
//! | Line                    | Meaning
//! |-------------------------|---------------------------
//! | `#!...`                 | Shebang; permitted on the first line only
//! | `#include "PATH"`       | Load another file into the same table
//! | `#define NAME "VALUE"`  | Add a macro for `$(NAME)` substitution
//! | `! anything`            | Comment
//! | `NAME = EXPR;`          | A definition (may span several lines)
//!
//! A definition accumulates lines until one ends with `;`; the collected
//! text is macro-expanded and handed to the expression parser. Every name
//! is defined at most once across the whole configuration, includes and
//! all, and must match `[A-Za-z][A-Za-z0-9._]*` without colliding with the
//! reserved words.
//!
//! `$(NAME)` occurrences in include paths, define values and definition
//! bodies are substituted from the define table; `$(CurrentDir)` expands
//! to the directory of the file being processed.
//!
//! ```
//! use camino::Utf8Path;
//! use rigging_config::Definitions;
//! use rigging_expr::Expr;
//!
//! let defs = Definitions::load_str(
//!     r#"
//!     ! A minimal configuration
//!     Greeting = "hello";
//!     Count = 3;
//!     "#,
//!     Utf8Path::new("/etc/app"),
//! )?;
//! assert_eq!(defs.get("Count"), Some(&Expr::Int(3)));
//! assert_eq!(defs.get("Missing"), None);
//! # Ok::<(), anyhow::Error>(())
//! ```
#![warn(missing_docs)]

use std::collections::{HashMap, HashSet};

use anyhow::{anyhow, bail, Context as _, Result};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;

use rigging_expr::{parse_expression, Expr};

/// Names that may not be used for definitions. Sorted, for binary search.
pub const RESERVED_WORDS: [&str; 10] = [
    "Class", "Concat", "CurrentDir", "Library", "List", "false", "newline", "quote", "tab", "true",
];

/// Whether `name` is reserved by the expression language
pub fn is_reserved(name: &str) -> bool {
    RESERVED_WORDS.binary_search(&name).is_ok()
}

/// The named expressions of a loaded configuration, immutable once loaded
#[derive(Debug, Default)]
pub struct Definitions {
    map: HashMap<String, Expr>,
}

impl Definitions {
    /// Loads the configuration file at `path`, following `#include`s
    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut loader = Loader::new();
        loader.files.insert(path.to_owned());
        loader.load_file(path)?;
        Ok(Definitions {
            map: loader.definitions,
        })
    }

    /// Loads a configuration from an in-memory string, treating `dir` as
    /// the directory the text notionally lives in (for `CurrentDir` and
    /// relative includes). Primarily used for tests and embedding.
    pub fn load_str(text: &str, dir: impl AsRef<Utf8Path>) -> Result<Self> {
        let mut loader = Loader::new();
        let dir = directory_prefix(dir.as_ref());
        loader.process_source(text, Utf8Path::new("<config>"), &dir)?;
        Ok(Definitions {
            map: loader.definitions,
        })
    }

    /// Returns the expression defined under `name`, if any
    pub fn get(&self, name: &str) -> Option<&Expr> {
        self.map.get(name)
    }

    /// The number of definitions in the table
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the configuration defined anything at all
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterates over all `(name, expression)` definitions, unordered
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Expr)> {
        self.map.iter().map(|(name, expr)| (name.as_str(), expr))
    }
}

struct Loader {
    definitions: HashMap<String, Expr>,
    files: HashSet<Utf8PathBuf>,
    defines: HashMap<String, String>,
    include_line: Regex,
    define_line: Regex,
    definition: Regex,
    macro_use: Regex,
}

impl Loader {
    fn new() -> Self {
        Loader {
            definitions: HashMap::new(),
            files: HashSet::new(),
            defines: HashMap::new(),
            include_line: Regex::new(r#"^#include\s+"([^"]+)"$"#).expect("include pattern"),
            define_line: Regex::new(r#"^#define\s+([A-Za-z]+)\s+"([^"]+)"$"#)
                .expect("define pattern"),
            definition: Regex::new(r"^([A-Za-z][A-Za-z0-9._]*)\s*=\s*(.+);$")
                .expect("definition pattern"),
            macro_use: Regex::new(r"\$\(([A-Za-z]+)\)").expect("macro pattern"),
        }
    }

    fn load_file(&mut self, path: &Utf8Path) -> Result<()> {
        tracing::info!("Loading config file {path}");
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to open config file {path}"))?;
        let dir = parent_directory(path)?;
        self.process_source(&text, path, &dir)
    }

    fn process_source(&mut self, text: &str, file: &Utf8Path, dir: &str) -> Result<()> {
        // A definition in progress, accumulated until a line ends with ';'
        let mut pending = String::new();

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim_matches(|c| c == ' ' || c == '\t' || c == '\r');
            if line.is_empty() || line.starts_with('!') {
                continue;
            }
            if line.starts_with('#') {
                if !pending.is_empty() {
                    bail!(
                        "Invalid {line} on line {lineno} after {pending}",
                        lineno = index + 1
                    );
                }
                self.directive(line, index, file, dir)?;
                continue;
            }
            pending.push_str(line);
            if pending.ends_with(';') {
                let statement = std::mem::take(&mut pending);
                self.add_definition(&statement, file, dir)?;
            }
        }
        if !pending.is_empty() {
            bail!("End of file found in {file} whilst processing {pending}");
        }
        Ok(())
    }

    fn directive(&mut self, line: &str, index: usize, file: &Utf8Path, dir: &str) -> Result<()> {
        if line.starts_with("#!") {
            // Lets UNIX systems "execute" a configuration by pointing at
            // the rigging binary; the line itself is not processed
            if index != 0 {
                bail!("#! (shebang) only valid on the first line of the file");
            }
            return Ok(());
        }
        if let Some(captures) = self.include_line.captures(line) {
            let include = self.expand_macros(&captures[1], file, dir)?;
            let include = Utf8PathBuf::from(include);
            let include = if include.is_relative() {
                Utf8PathBuf::from(dir).join(include)
            } else {
                include
            };
            // Best effort: the same file reached through differently
            // spelled paths is loaded twice
            if self.files.insert(include.clone()) {
                self.load_file(&include)?;
            }
            return Ok(());
        }
        if let Some(captures) = self.define_line.captures(line) {
            let name = captures[1].to_owned();
            let value = self.expand_macros(&captures[2], file, dir)?;
            if name == "CurrentDir" {
                bail!("Cannot redefine CurrentDir in {file}");
            }
            if let Some(previous) = self.defines.get(&name) {
                bail!("Cannot redefine {name} in {file} - previously defined as {previous}");
            }
            self.defines.insert(name, value);
            return Ok(());
        }
        bail!("Invalid syntax {line}");
    }

    fn add_definition(&mut self, statement: &str, file: &Utf8Path, dir: &str) -> Result<()> {
        let Some(captures) = self.definition.captures(statement) else {
            bail!("Invalid syntax: {statement}");
        };
        let name = &captures[1];
        let body = captures[2].trim_end();
        if is_reserved(name) {
            bail!("{name} is a reserved word");
        }
        if self.definitions.contains_key(name) {
            bail!("Redefinition of {name}");
        }
        let body = self.expand_macros(body, file, dir)?;
        let expr = parse_expression(&body, dir)
            .map_err(|e| anyhow!("{e}"))
            .with_context(|| format!("defining {name} in file {file}"))?;
        self.definitions.insert(name.to_owned(), expr);
        Ok(())
    }

    /// Substitutes `$(NAME)` occurrences until none remain. `CurrentDir`
    /// is implicit; everything else must have been `#define`d.
    fn expand_macros(&self, input: &str, file: &Utf8Path, dir: &str) -> Result<String> {
        let mut expanded = input.to_owned();
        loop {
            let Some(found) = self.macro_use.find(&expanded) else {
                break;
            };
            let range = found.range();
            let name = expanded[range.start + 2..range.end - 1].to_owned();
            let replacement = if name == "CurrentDir" {
                dir.to_owned()
            } else {
                self.defines
                    .get(&name)
                    .ok_or_else(|| anyhow!("Undefined macro {name} in {input} in file {file}"))?
                    .clone()
            };
            expanded.replace_range(range, &replacement);
        }
        Ok(expanded)
    }
}

/// The directory of `path` with a trailing `/`, falling back to the
/// process working directory for bare file names
fn parent_directory(path: &Utf8Path) -> Result<String> {
    match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => Ok(directory_prefix(parent)),
        _ => {
            let cwd = std::env::current_dir().context("Failed to read working directory")?;
            let cwd = Utf8PathBuf::try_from(cwd).context("Working directory is not UTF-8")?;
            Ok(directory_prefix(&cwd))
        }
    }
}

fn directory_prefix(dir: &Utf8Path) -> String {
    format!("{}/", dir.as_str().trim_end_matches('/'))
}

#[cfg(test)]
mod tests;
