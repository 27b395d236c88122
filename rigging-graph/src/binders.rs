//! Typed parameter slots.
//!
//! Each binder accepts the expression kinds it understands and produces
//! one typed constructor argument. Binders resolve their expression during
//! [`Builder::bind_params`][crate::Builder::bind_params] and hand the
//! value out during materialisation; object-valued slots hold on to the
//! dependency's builder in between, which is what makes construction
//! strictly dependency-first.

use std::{
    cell::{Cell, OnceCell, RefCell},
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
    marker::PhantomData,
    rc::Rc,
    str::FromStr,
    sync::Arc,
};

use anyhow::{anyhow, bail, Result};

use rigging_expr::Expr;

use crate::{
    bits::Bitset,
    builder::{builder_cast, Builder, Proxy, TypeMismatch},
    ObjectGraph,
};

/// A typed parameter slot: resolves one expression to one value
pub trait Bind: Default {
    /// The constructor argument this slot produces
    type Value;

    /// Resolves the expression, recursing into the graph for
    /// dependencies. Called at most once per slot.
    fn bind(&self, graph: &ObjectGraph, expr: &Expr) -> Result<()>;

    /// Extracts the bound value, materialising dependencies on demand
    fn value(&self) -> Result<Self::Value>;
}

/// Appends parameter context to a bind-phase error. Type mismatches pass
/// through untouched so the proxy fallback can observe them.
fn bind_error(err: anyhow::Error, label: &str, index: usize) -> anyhow::Error {
    if err.is::<TypeMismatch>() {
        return err;
    }
    value_error(err, label, index)
}

/// Appends parameter context unconditionally (extraction phase)
fn value_error(err: anyhow::Error, label: &str, index: usize) -> anyhow::Error {
    if label.is_empty() {
        anyhow!("{err:#}, which is parameter {index}")
    } else {
        anyhow!("{err:#} evaluating {label}, which is parameter {index}")
    }
}

fn unbound() -> anyhow::Error {
    anyhow!("parameter accessed before it was bound")
}

/// The universal parameter slot.
///
/// Binds through the direct binder `B` first; a [`TypeMismatch`] retries
/// against a [`Proxy`] of the same value type, and a second mismatch
/// re-raises the original as a plain argument error so enclosing slots do
/// not ping-pong. Any error surfaced through this slot gains the 1-based
/// parameter index and the token being evaluated.
pub struct Param<B: Bind> {
    primary: B,
    proxy: ProxyBinder<B::Value>,
    using_proxy: Cell<bool>,
    index: Cell<usize>,
    label: RefCell<String>,
}

impl<B: Bind> Default for Param<B>
where
    B::Value: Clone + 'static,
{
    fn default() -> Self {
        Param {
            primary: B::default(),
            proxy: ProxyBinder::default(),
            using_proxy: Cell::new(false),
            index: Cell::new(0),
            label: RefCell::new(String::new()),
        }
    }
}

impl<B: Bind> Param<B>
where
    B::Value: Clone + 'static,
{
    /// Binds the slot as parameter number `index` (1-based)
    pub fn bind(&self, graph: &ObjectGraph, expr: &Expr, index: usize) -> Result<()> {
        self.index.set(index);
        *self.label.borrow_mut() = expr.describe();
        match self.primary.bind(graph, expr) {
            Ok(()) => Ok(()),
            Err(err) if err.is::<TypeMismatch>() => {
                self.using_proxy.set(true);
                match self.proxy.bind(graph, expr) {
                    Ok(()) => Ok(()),
                    Err(retry) if retry.is::<TypeMismatch>() => {
                        // Demote the original mismatch so it is final
                        Err(self.context(anyhow!("{err}")))
                    }
                    Err(retry) => Err(self.context(retry)),
                }
            }
            Err(err) => Err(self.context(err)),
        }
    }

    /// Extracts the value from whichever binder succeeded
    pub fn value(&self) -> Result<B::Value> {
        let result = if self.using_proxy.get() {
            self.proxy.value()
        } else {
            self.primary.value()
        };
        result.map_err(|err| value_error(err, &self.label.borrow(), self.index.get()))
    }

    fn context(&self, err: anyhow::Error) -> anyhow::Error {
        bind_error(err, &self.label.borrow(), self.index.get())
    }
}

/// The ordered parameter slots of a class: a tuple of [`Param`]s
pub trait ParamSet: Default {
    /// The tuple of extracted constructor arguments
    type Values;

    /// The declared parameter count
    const ARITY: usize;

    /// Binds every slot, left to right
    fn bind_all(&self, graph: &ObjectGraph, args: &[Expr]) -> Result<()>;

    /// Extracts every value, left to right
    fn values(&self) -> Result<Self::Values>;
}

impl ParamSet for () {
    type Values = ();
    const ARITY: usize = 0;

    fn bind_all(&self, _graph: &ObjectGraph, _args: &[Expr]) -> Result<()> {
        Ok(())
    }

    fn values(&self) -> Result<()> {
        Ok(())
    }
}

macro_rules! impl_param_set {
    ($arity:expr; $($index:tt $binder:ident),+) => {
        impl<$($binder: Bind),+> ParamSet for ($(Param<$binder>,)+)
        where
            $($binder::Value: Clone + 'static),+
        {
            type Values = ($($binder::Value,)+);
            const ARITY: usize = $arity;

            fn bind_all(&self, graph: &ObjectGraph, args: &[Expr]) -> Result<()> {
                $(self.$index.bind(graph, &args[$index], $index + 1)?;)+
                Ok(())
            }

            fn values(&self) -> Result<Self::Values> {
                Ok(($(self.$index.value()?,)+))
            }
        }
    };
}

impl_param_set!(1; 0 B0);
impl_param_set!(2; 0 B0, 1 B1);
impl_param_set!(3; 0 B0, 1 B1, 2 B2);
impl_param_set!(4; 0 B0, 1 B1, 2 B2, 3 B3);
impl_param_set!(5; 0 B0, 1 B1, 2 B2, 3 B3, 4 B4);
impl_param_set!(6; 0 B0, 1 B1, 2 B2, 3 B3, 4 B4, 5 B5);
impl_param_set!(7; 0 B0, 1 B1, 2 B2, 3 B3, 4 B4, 5 B5, 6 B6);
impl_param_set!(8; 0 B0, 1 B1, 2 B2, 3 B3, 4 B4, 5 B5, 6 B6, 7 B7);

/// A literal constructor argument; see [`Literal`] for the accepted types
pub struct LitBinder<T> {
    value: OnceCell<T>,
}

impl<T> Default for LitBinder<T> {
    fn default() -> Self {
        LitBinder {
            value: OnceCell::new(),
        }
    }
}

impl<T: Literal> Bind for LitBinder<T> {
    type Value = T;

    fn bind(&self, graph: &ObjectGraph, expr: &Expr) -> Result<()> {
        let value = T::convert(graph, expr)?;
        let _ = self.value.set(value);
        Ok(())
    }

    fn value(&self) -> Result<T> {
        self.value.get().cloned().ok_or_else(unbound)
    }
}

/// A type that can be bound from a literal expression, following variable
/// chains to the underlying literal
pub trait Literal: Clone + Display + 'static {
    /// Converts the expression, raising [`TypeMismatch`] when its resolved
    /// kind does not match
    fn convert(graph: &ObjectGraph, expr: &Expr) -> Result<Self>;
}

impl Literal for bool {
    fn convert(graph: &ObjectGraph, expr: &Expr) -> Result<Self> {
        graph.to_bool(expr)
    }
}

impl Literal for i64 {
    fn convert(graph: &ObjectGraph, expr: &Expr) -> Result<Self> {
        graph.to_int(expr)
    }
}

impl Literal for u64 {
    fn convert(graph: &ObjectGraph, expr: &Expr) -> Result<Self> {
        graph.to_uint(expr)
    }
}

impl Literal for f64 {
    fn convert(graph: &ObjectGraph, expr: &Expr) -> Result<Self> {
        graph.to_real(expr)
    }
}

impl Literal for String {
    fn convert(graph: &ObjectGraph, expr: &Expr) -> Result<Self> {
        graph.to_text(expr)
    }
}

/// An enumeration slot: accepts a terminal variable that is *not* defined
/// in the configuration and converts its name through [`FromStr`]
pub struct EnumBinder<E> {
    name: OnceCell<String>,
    marker: PhantomData<fn() -> E>,
}

impl<E> Default for EnumBinder<E> {
    fn default() -> Self {
        EnumBinder {
            name: OnceCell::new(),
            marker: PhantomData,
        }
    }
}

impl<E> Bind for EnumBinder<E>
where
    E: FromStr + Clone + 'static,
    E::Err: Display,
{
    type Value = E;

    fn bind(&self, graph: &ObjectGraph, expr: &Expr) -> Result<()> {
        let name = graph.to_enum(expr)?;
        let _ = self.name.set(name);
        Ok(())
    }

    fn value(&self) -> Result<E> {
        let name = self.name.get().ok_or_else(unbound)?;
        E::from_str(name).map_err(|err| anyhow!("Invalid enumeration value {name}: {err}"))
    }
}

/// An object slot of declared value type `V`.
///
/// Binding fetches (and transitively binds) the dependency's builder and
/// checks its value type; extraction materialises it.
pub struct ObjBinder<V> {
    builder: OnceCell<Rc<dyn Builder>>,
    marker: PhantomData<fn() -> V>,
}

impl<V> Default for ObjBinder<V> {
    fn default() -> Self {
        ObjBinder {
            builder: OnceCell::new(),
            marker: PhantomData,
        }
    }
}

impl<V: Clone + 'static> Bind for ObjBinder<V> {
    type Value = V;

    fn bind(&self, graph: &ObjectGraph, expr: &Expr) -> Result<()> {
        let builder = graph.get_builder(expr)?;
        builder_cast::<V>(builder.as_ref())?;
        let _ = self.builder.set(builder);
        Ok(())
    }

    fn value(&self) -> Result<V> {
        let builder = self.builder.get().ok_or_else(unbound)?;
        let value = builder.materialise()?;
        match value.downcast_ref::<V>() {
            Some(value) => Ok(value.clone()),
            None => bail!(
                "builder for {} produced a value of an unexpected type",
                builder.class_name()
            ),
        }
    }
}

/// A struct slot passed by value: bound as an object whose builder
/// produces `Arc<T>`, extracted by cloning the referenced value
pub struct RefBinder<T> {
    inner: ObjBinder<Arc<T>>,
}

impl<T> Default for RefBinder<T> {
    fn default() -> Self {
        RefBinder {
            inner: ObjBinder::default(),
        }
    }
}

impl<T: Clone + 'static> Bind for RefBinder<T> {
    type Value = T;

    fn bind(&self, graph: &ObjectGraph, expr: &Expr) -> Result<()> {
        self.inner.bind(graph, expr)
    }

    fn value(&self) -> Result<T> {
        Ok(self.inner.value()?.as_ref().clone())
    }
}

/// A slot of inner type `T` satisfied by an object of a [`Proxy`] class
pub struct ProxyBinder<T> {
    inner: ObjBinder<Arc<Proxy<T>>>,
}

impl<T> Default for ProxyBinder<T> {
    fn default() -> Self {
        ProxyBinder {
            inner: ObjBinder::default(),
        }
    }
}

impl<T: Clone + 'static> Bind for ProxyBinder<T> {
    type Value = T;

    fn bind(&self, graph: &ObjectGraph, expr: &Expr) -> Result<()> {
        self.inner.bind(graph, expr)
    }

    fn value(&self) -> Result<T> {
        Ok(self.inner.value()?.get())
    }
}

/// A list slot; each element is bound recursively as a full parameter,
/// fallback included
pub struct ListBinder<B: Bind> {
    elements: RefCell<Vec<Param<B>>>,
}

impl<B: Bind> Default for ListBinder<B>
where
    B::Value: Clone + 'static,
{
    fn default() -> Self {
        ListBinder {
            elements: RefCell::new(Vec::new()),
        }
    }
}

impl<B: Bind> Bind for ListBinder<B>
where
    B::Value: Clone + 'static,
{
    type Value = Vec<B::Value>;

    fn bind(&self, graph: &ObjectGraph, expr: &Expr) -> Result<()> {
        let items = graph.to_list(expr)?;
        let mut elements = self.elements.borrow_mut();
        for (index, item) in items.iter().enumerate() {
            let element = Param::<B>::default();
            element.bind(graph, item, index + 1)?;
            elements.push(element);
        }
        Ok(())
    }

    fn value(&self) -> Result<Vec<B::Value>> {
        self.elements.borrow().iter().map(Param::value).collect()
    }
}

/// A set of literal values; duplicates are rejected at bind time
pub struct SetBinder<T: Ord> {
    values: RefCell<BTreeSet<T>>,
}

impl<T: Ord> Default for SetBinder<T> {
    fn default() -> Self {
        SetBinder {
            values: RefCell::new(BTreeSet::new()),
        }
    }
}

impl<T: Literal + Ord> Bind for SetBinder<T> {
    type Value = BTreeSet<T>;

    fn bind(&self, graph: &ObjectGraph, expr: &Expr) -> Result<()> {
        let items = graph.to_list(expr)?;
        let mut values = self.values.borrow_mut();
        for (index, item) in items.iter().enumerate() {
            let value = T::convert(graph, item)
                .map_err(|err| bind_error(err, &item.describe(), index + 1))?;
            if !values.insert(value.clone()) {
                bail!("Duplicate value {value}");
            }
        }
        Ok(())
    }

    fn value(&self) -> Result<BTreeSet<T>> {
        Ok(self.values.borrow().clone())
    }
}

/// A map with literal keys; duplicate keys are rejected at bind time
pub struct MapBinder<K: Ord, B: Bind> {
    entries: RefCell<BTreeMap<K, Param<B>>>,
}

impl<K: Ord, B: Bind> Default for MapBinder<K, B>
where
    B::Value: Clone + 'static,
{
    fn default() -> Self {
        MapBinder {
            entries: RefCell::new(BTreeMap::new()),
        }
    }
}

impl<K: Literal + Ord, B: Bind> Bind for MapBinder<K, B>
where
    B::Value: Clone + 'static,
{
    type Value = BTreeMap<K, B::Value>;

    fn bind(&self, graph: &ObjectGraph, expr: &Expr) -> Result<()> {
        let pairs = graph.to_map(expr)?;
        let mut entries = self.entries.borrow_mut();
        for (index, (key_expr, value_expr)) in pairs.iter().enumerate() {
            let key = K::convert(graph, key_expr)
                .map_err(|err| bind_error(err, &key_expr.describe(), index + 1))?;
            let value = Param::<B>::default();
            value.bind(graph, value_expr, index + 1)?;
            if entries.insert(key.clone(), value).is_some() {
                bail!("Duplicate key {key}");
            }
        }
        Ok(())
    }

    fn value(&self) -> Result<BTreeMap<K, B::Value>> {
        self.entries
            .borrow()
            .iter()
            .map(|(key, value)| Ok((key.clone(), value.value()?)))
            .collect()
    }
}

/// Like [`MapBinder`] but duplicate keys accumulate, in order
pub struct MultiMapBinder<K: Ord, B: Bind> {
    entries: RefCell<BTreeMap<K, Vec<Param<B>>>>,
}

impl<K: Ord, B: Bind> Default for MultiMapBinder<K, B>
where
    B::Value: Clone + 'static,
{
    fn default() -> Self {
        MultiMapBinder {
            entries: RefCell::new(BTreeMap::new()),
        }
    }
}

impl<K: Literal + Ord, B: Bind> Bind for MultiMapBinder<K, B>
where
    B::Value: Clone + 'static,
{
    type Value = BTreeMap<K, Vec<B::Value>>;

    fn bind(&self, graph: &ObjectGraph, expr: &Expr) -> Result<()> {
        let pairs = graph.to_map(expr)?;
        let mut entries = self.entries.borrow_mut();
        for (index, (key_expr, value_expr)) in pairs.iter().enumerate() {
            let key = K::convert(graph, key_expr)
                .map_err(|err| bind_error(err, &key_expr.describe(), index + 1))?;
            let value = Param::<B>::default();
            value.bind(graph, value_expr, index + 1)?;
            entries.entry(key).or_default().push(value);
        }
        Ok(())
    }

    fn value(&self) -> Result<BTreeMap<K, Vec<B::Value>>> {
        self.entries
            .borrow()
            .iter()
            .map(|(key, values)| {
                let values: Result<Vec<_>> = values.iter().map(Param::value).collect();
                Ok((key.clone(), values?))
            })
            .collect()
    }
}

/// A fixed-width bitset slot: accepts an integer bit pattern, a `0`/`1`
/// string or `Concat`, a list of bit indices, or a proxy to a set of
/// indices. Pattern-matches on the underlying expression kind.
pub struct BitsetBinder<const N: usize> {
    bits: OnceCell<Bitset<N>>,
}

impl<const N: usize> Default for BitsetBinder<N> {
    fn default() -> Self {
        BitsetBinder {
            bits: OnceCell::new(),
        }
    }
}

impl<const N: usize> Bind for BitsetBinder<N> {
    type Value = Bitset<N>;

    fn bind(&self, graph: &ObjectGraph, expr: &Expr) -> Result<()> {
        let under = graph.underlying(expr)?;
        let bits = match under {
            Expr::Int(_) => Bitset::from_bits(graph.to_uint(under)?),
            Expr::Str(_) | Expr::Concat(_) => Bitset::from_pattern(&graph.to_text(under)?)?,
            Expr::List(_) => {
                let indices = SetBinder::<u64>::default();
                indices.bind(graph, under)?;
                Bitset::from_indices(indices.value()?)?
            }
            Expr::Object { .. } => {
                let proxy = ProxyBinder::<BTreeSet<u64>>::default();
                proxy.bind(graph, under)?;
                Bitset::from_indices(proxy.value()?)?
            }
            other => bail!("Invalid expression for bitset evaluating {}", other.describe()),
        };
        let _ = self.bits.set(bits);
        Ok(())
    }

    fn value(&self) -> Result<Bitset<N>> {
        self.bits.get().cloned().ok_or_else(unbound)
    }
}
