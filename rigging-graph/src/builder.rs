use std::{
    any::{Any, TypeId},
    cell::{Cell, OnceCell},
    fmt::Display,
    rc::Rc,
};

use anyhow::{bail, Result};

use rigging_expr::Expr;

use crate::{binders::ParamSet, ObjectGraph};

/// A slot-type mismatch discovered while binding a parameter.
///
/// This error kind is recoverable: the parameter combinator that observes
/// it retries the bind against a [`Proxy`] of the slot type. Everything
/// else treats it like any other argument error.
#[derive(Debug)]
pub struct TypeMismatch(String);

impl TypeMismatch {
    /// Wraps a message as an `anyhow::Error` carrying the mismatch kind
    pub fn err(message: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(TypeMismatch(message.into()))
    }
}

impl Display for TypeMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for TypeMismatch {}

/// Wrapper for values that are assembled by a dedicated setter class
/// rather than constructed in place.
///
/// A proxy class takes the constructor parameters, builds the inner value
/// and exposes it through [`Proxy::get`]; any slot of the inner type then
/// accepts an object of the proxy class through the fallback bind.
pub struct Proxy<T> {
    value: T,
}

impl<T: Clone> Proxy<T> {
    /// Wraps a fully assembled value
    pub fn new(value: T) -> Self {
        Proxy { value }
    }

    /// A copy of the wrapped value
    pub fn get(&self) -> T {
        self.value.clone()
    }
}

/// The per-instance build protocol: one builder binds the parameters of
/// one object expression and materialises one value, at most once.
///
/// Named objects share a single builder through the object cache, so every
/// reference to the name receives the same instance. The value is reached
/// through [`Builder::materialise`] and downcast against
/// [`Builder::value_type`]; see [`builder_value`].
pub trait Builder {
    /// The object's configured name, or empty for anonymous objects
    fn alias(&self) -> &str;

    /// The class name from the object expression, for diagnostics
    fn class_name(&self) -> &str;

    /// Validates the parameter count and binds each parameter in order.
    /// Binding may recurse into the graph to resolve dependencies.
    fn bind_params(&self, graph: &ObjectGraph) -> Result<()>;

    /// The `TypeId` of the produced value
    fn value_type(&self) -> TypeId;

    /// The name of the produced value's type, for diagnostics
    fn value_type_name(&self) -> &'static str;

    /// Builds the value on first call and returns it; later calls return
    /// the memoised value. Re-entry during construction is a circular
    /// reference error.
    fn materialise(&self) -> Result<&dyn Any>;
}

/// Checks that `builder` produces values of type `V`, raising a
/// recoverable [`TypeMismatch`] otherwise
pub fn builder_cast<V: 'static>(builder: &dyn Builder) -> Result<()> {
    if builder.value_type() == TypeId::of::<V>() {
        Ok(())
    } else {
        Err(TypeMismatch::err(format!(
            "Type mismatch: {} of type {} expected type {}",
            builder.alias(),
            builder.class_name(),
            std::any::type_name::<V>()
        )))
    }
}

/// Materialises the builder's value and extracts it as a `V`
pub fn builder_value<V: Clone + 'static>(builder: &dyn Builder) -> Result<V> {
    builder_cast::<V>(builder)?;
    let value = builder.materialise()?;
    match value.downcast_ref::<V>() {
        Some(value) => Ok(value.clone()),
        None => bail!(
            "builder for {} produced a value of an unexpected type",
            builder.class_name()
        ),
    }
}

/// A factory creates one fresh [`Builder`] per object expression of its
/// class. Factories are what libraries export.
pub trait BuilderFactory: Send + Sync {
    /// Creates a builder for the object expression `expr`, named `alias`
    /// if the object is a named definition
    fn create(&self, alias: &str, expr: &Expr) -> Rc<dyn Builder>;
}

/// Adapts a closure as a [`BuilderFactory`]
pub struct FactoryFn<F>(pub F);

impl<F> BuilderFactory for FactoryFn<F>
where
    F: Fn(&str, &Expr) -> Rc<dyn Builder> + Send + Sync,
{
    fn create(&self, alias: &str, expr: &Expr) -> Rc<dyn Builder> {
        (self.0)(alias, expr)
    }
}

/// The one generic [`Builder`] implementation.
///
/// `V` is the declared value type of the class (commonly an `Arc` of the
/// concrete type or of an interface trait object), `P` the tuple of
/// parameter slots. The construct function turns the bound parameter
/// values into the finished `V`.
pub struct ClassBuilder<V, P: ParamSet> {
    alias: String,
    class_name: String,
    args: Vec<Expr>,
    params: P,
    construct: Box<dyn Fn(P::Values) -> Result<V>>,
    value: OnceCell<V>,
    creating: Cell<bool>,
}

impl<V: 'static, P: ParamSet> ClassBuilder<V, P> {
    /// Creates a builder for the given object expression. The parameter
    /// set starts unbound; [`Builder::bind_params`] fills it.
    pub fn new(
        alias: &str,
        expr: &Expr,
        construct: impl Fn(P::Values) -> Result<V> + 'static,
    ) -> Self {
        let (class_name, args) = match expr {
            Expr::Object { class, args } => (class.clone(), args.clone()),
            other => (other.describe(), Vec::new()),
        };
        ClassBuilder {
            alias: alias.to_owned(),
            class_name,
            args,
            params: P::default(),
            construct: Box::new(construct),
            value: OnceCell::new(),
            creating: Cell::new(false),
        }
    }

    fn circular_check(&self) -> Result<()> {
        if self.creating.replace(true) {
            if self.alias.is_empty() {
                bail!("Circular reference detected");
            }
            bail!("Circular reference detected for {}", self.alias);
        }
        Ok(())
    }
}

impl<V: 'static, P: ParamSet> Builder for ClassBuilder<V, P> {
    fn alias(&self) -> &str {
        &self.alias
    }

    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn bind_params(&self, graph: &ObjectGraph) -> Result<()> {
        if !self.alias.is_empty() {
            tracing::debug!("Binding parameters for {}", self.alias);
        }
        self.circular_check()?;
        if self.args.len() != P::ARITY {
            bail!(
                "{} type {} expects {} parameters but has {}",
                self.alias,
                self.class_name,
                P::ARITY,
                self.args.len()
            );
        }
        self.params.bind_all(graph, &self.args)?;
        self.creating.set(false);
        Ok(())
    }

    fn value_type(&self) -> TypeId {
        TypeId::of::<V>()
    }

    fn value_type_name(&self) -> &'static str {
        std::any::type_name::<V>()
    }

    fn materialise(&self) -> Result<&dyn Any> {
        if let Some(value) = self.value.get() {
            return Ok(value as &dyn Any);
        }
        self.circular_check()?;
        if !self.alias.is_empty() {
            tracing::debug!("Creating {}", self.alias);
        }
        let values = self.params.values()?;
        let built = (self.construct)(values)?;
        if !self.alias.is_empty() {
            tracing::debug!("Finished creating {}", self.alias);
        }
        self.creating.set(false);
        Ok(self.value.get_or_init(|| built) as &dyn Any)
    }
}
