//! This crate provides the expression language in which rigging
//! configurations describe objects, and the means to parse a single
//! expression into an [`Expr`] tree (see [`parse_expression`]).
//!
//! An expression is one of the following forms:
//!
//! | Syntax                    | Description
//! |---------------------------|---------------------------
//! | `"text"`                  | A string literal (no escape sequences)
//! | `true`, `false`           | Boolean literals
//! | `tab`, `newline`, `quote` | Single-character string literals
//! | `42`, `-7`                | Integer literals
//! | `3.5`                     | Real literals (decided by the `.`)
//! | _ident_                   | A variable, naming another definition
//! | `[a, b]`, `List(a, b)`    | A list (both spellings are equivalent)
//! | `{k: v, ...}`             | A map of key/value pairs
//! | `Concat(a, b, ...)`       | String concatenation
//! | `CurrentDir()`            | The directory of the file being loaded
//! | `Library("path")`         | A loadable module (root position only)
//! | `Class(lib, "symbol")`    | A factory symbol in a library (root only)
//! | _ident_`(a, b, ...)`      | An object built from the named class
//!
//! Identifiers begin with a letter and continue with letters, digits, `.`
//! and `_`. Any identifier directly followed by `(` that is not one of the
//! built-in heads above names a class and produces an [`Expr::Object`].
//!
//! # Parsing
//!
//! ```
//! use rigging_expr::{parse_expression, Expr};
//!
//! let expr = parse_expression(r#"Greeter("hello", 3)"#, "/etc/app/")?;
//! assert!(matches!(
//!     expr,
//!     Expr::Object { ref class, ref args } if class == "Greeter" && args.len() == 2
//! ));
//! # Ok::<(), rigging_expr::ParseError>(())
//! ```
//!
//! Parse failures are reported through [`ParseError`], which renders the
//! offending position within the source text:
//!
//! ```
//! use rigging_expr::parse_expression;
//!
//! let err = parse_expression(r#"Library("a.so", "b.so")"#, "/").unwrap_err();
//! assert!(err.to_string().contains("exactly one parameter"));
//! ```
#![warn(missing_docs)]

use std::fmt::Display;

mod text;
pub use text::{parse_expression, ParseError};

/// A node of a parsed configuration expression
///
/// Trees are immutable once parsed; children are owned by their parent
/// node. Structural equality is derived, identity is not significant.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A string literal, stored without its quotes
    Str(String),
    /// A boolean literal (`true` or `false`)
    Bool(bool),
    /// An integer literal
    Int(i64),
    /// A real literal, written with a decimal point
    Real(f64),
    /// A reference to another named definition
    Variable(String),
    /// An ordered sequence of elements
    List(Vec<Expr>),
    /// Key/value pairs; keys must evaluate to literals when bound
    Map(Vec<(Expr, Expr)>),
    /// String concatenation over any string-evaluating children
    Concat(Vec<Expr>),
    /// A loadable module, holding the path expression
    Library(Box<Expr>),
    /// A factory symbol: the alias of a library and a symbol-name expression
    Class {
        /// Name of the library variable the symbol is loaded from
        library: String,
        /// Expression evaluating to the exported symbol name
        symbol: Box<Expr>,
    },
    /// An object to be built from a named class with the given arguments
    Object {
        /// Name of the class definition
        class: String,
        /// Constructor arguments, in declaration order
        args: Vec<Expr>,
    },
}

/// The kind of an [`Expr`] node, used in diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ExprKind {
    String,
    Bool,
    Int,
    Real,
    Variable,
    List,
    Map,
    Concat,
    Library,
    Class,
    Object,
}

impl Display for ExprKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ExprKind::String => "String",
            ExprKind::Bool => "Bool",
            ExprKind::Int => "Int",
            ExprKind::Real => "Real",
            ExprKind::Variable => "Variable",
            ExprKind::List => "List",
            ExprKind::Map => "Map",
            ExprKind::Concat => "Concat",
            ExprKind::Library => "Library",
            ExprKind::Class => "Class",
            ExprKind::Object => "Object",
        })
    }
}

impl Expr {
    /// Returns the kind of this node
    pub fn kind(&self) -> ExprKind {
        match self {
            Expr::Str(_) => ExprKind::String,
            Expr::Bool(_) => ExprKind::Bool,
            Expr::Int(_) => ExprKind::Int,
            Expr::Real(_) => ExprKind::Real,
            Expr::Variable(_) => ExprKind::Variable,
            Expr::List(_) => ExprKind::List,
            Expr::Map(_) => ExprKind::Map,
            Expr::Concat(_) => ExprKind::Concat,
            Expr::Library(_) => ExprKind::Library,
            Expr::Class { .. } => ExprKind::Class,
            Expr::Object { .. } => ExprKind::Object,
        }
    }

    /// Returns a one-token description of this node for diagnostics: the
    /// literal text, the variable or class name, or the head of a
    /// composite form
    pub fn describe(&self) -> String {
        match self {
            Expr::Str(s) => s.clone(),
            Expr::Bool(b) => b.to_string(),
            Expr::Int(i) => i.to_string(),
            Expr::Real(r) => format_real(*r),
            Expr::Variable(name) => name.clone(),
            Expr::Object { class, .. } => class.clone(),
            other => other.kind().to_string(),
        }
    }
}

fn format_real(r: f64) -> String {
    if r.is_finite() && r.fract() == 0.0 {
        format!("{r:.1}")
    } else {
        format!("{r}")
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn comma_separated(f: &mut std::fmt::Formatter<'_>, items: &[Expr]) -> std::fmt::Result {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{item}")?;
            }
            Ok(())
        }
        match self {
            Expr::Str(s) => write!(f, "\"{s}\""),
            Expr::Bool(b) => write!(f, "{b}"),
            Expr::Int(i) => write!(f, "{i}"),
            Expr::Real(r) => write!(f, "{}", format_real(*r)),
            Expr::Variable(name) => write!(f, "{name}"),
            Expr::List(items) => {
                write!(f, "[")?;
                comma_separated(f, items)?;
                write!(f, "]")
            }
            Expr::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            Expr::Concat(items) => {
                write!(f, "Concat(")?;
                comma_separated(f, items)?;
                write!(f, ")")
            }
            Expr::Library(path) => write!(f, "Library({path})"),
            Expr::Class { library, symbol } => write!(f, "Class({library}, {symbol})"),
            Expr::Object { class, args } => {
                write!(f, "{class}(")?;
                comma_separated(f, args)?;
                write!(f, ")")
            }
        }
    }
}
