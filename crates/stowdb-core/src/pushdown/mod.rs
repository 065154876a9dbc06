//! Module: pushdown
//! Responsibility: negotiating which part of a filter a backend executes natively.
//! Does not own: native query execution or post-filtering (stores do both).
//! Boundary: a conversion is always a superset of the filter it came from;
//! `handled` promises exact equivalence.

pub mod sql;
pub mod wide;


use crate::{filter::SearchFilter, model::StorageMeta};

///
/// Conversion
///
/// Result of converting one filter node.
///
/// `condition: None` with `handled: true` means "no condition needed"
/// (the filter admits everything). `None` with `handled: false` means
/// nothing could be pushed down.
///

#[derive(Clone, Debug, PartialEq)]
pub struct Conversion<C> {
    pub condition: Option<C>,
    pub handled: bool,
}

impl<C> Conversion<C> {
    pub const fn exact(condition: C) -> Self {
        Self {
            condition: Some(condition),
            handled: true,
        }
    }

    pub const fn partial(condition: C) -> Self {
        Self {
            condition: Some(condition),
            handled: false,
        }
    }

    #[must_use]
    pub const fn unconverted() -> Self {
        Self {
            condition: None,
            handled: false,
        }
    }

    #[must_use]
    pub const fn unrestricted() -> Self {
        Self {
            condition: None,
            handled: true,
        }
    }

    #[must_use]
    pub const fn is_exact(&self) -> bool {
        self.handled && self.condition.is_some()
    }
}

///
/// NativeCondition
///
/// Boolean combinators every native condition tree supports.
///

pub trait NativeCondition: Sized {
    fn all(parts: Vec<Self>) -> Self;

    fn any(parts: Vec<Self>) -> Self;

    fn negate(self) -> Self;

    /// A condition with a fixed truth value, when the backend can express one.
    fn constant(value: bool) -> Option<Self>;
}

///
/// FilterConverter
///
/// One translation rule. Returning `None` declines the node so the next
/// converter in the chain gets a turn.
///

pub trait FilterConverter<Ctx, C>: Send + Sync {
    fn priority(&self) -> i32 {
        0
    }

    fn convert(
        &self,
        filter: &SearchFilter,
        meta: &StorageMeta,
        ctx: &Ctx,
        chain: &ConverterChain<Ctx, C>,
    ) -> Option<Conversion<C>>;
}

///
/// ConverterChain
///
/// Converters ordered by descending priority; registration order breaks ties.
///

pub struct ConverterChain<Ctx, C> {
    converters: Vec<Box<dyn FilterConverter<Ctx, C>>>,
}

impl<Ctx, C> ConverterChain<Ctx, C>
where
    C: NativeCondition + 'static,
    Ctx: 'static,
{
    /// Chain holding only the structural converters (constants, and, or, not).
    #[must_use]
    pub fn structural() -> Self {
        Self { converters: Vec::new() }
            .with(ConstantConverter)
            .with(AndConverter)
            .with(OrConverter)
            .with(NotConverter)
    }

    #[must_use]
    pub fn with(mut self, converter: impl FilterConverter<Ctx, C> + 'static) -> Self {
        let converter: Box<dyn FilterConverter<Ctx, C>> = Box::new(converter);
        let at = self
            .converters
            .iter()
            .position(|existing| existing.priority() < converter.priority())
            .unwrap_or(self.converters.len());
        self.converters.insert(at, converter);
        self
    }

    /// Convert `filter`; the first converter that does not decline wins.
    #[must_use]
    pub fn convert(&self, filter: &SearchFilter, meta: &StorageMeta, ctx: &Ctx) -> Conversion<C> {
        self.converters
            .iter()
            .find_map(|converter| converter.convert(filter, meta, ctx, self))
            .unwrap_or_else(Conversion::unconverted)
    }
}

impl<Ctx, C> std::fmt::Debug for ConverterChain<Ctx, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConverterChain")
            .field("converters", &self.converters.len())
            .finish()
    }
}

///
/// Structural converters
///

struct ConstantConverter;

impl<Ctx, C: NativeCondition> FilterConverter<Ctx, C> for ConstantConverter {
    fn convert(
        &self,
        filter: &SearchFilter,
        _: &StorageMeta,
        _: &Ctx,
        _: &ConverterChain<Ctx, C>,
    ) -> Option<Conversion<C>> {
        match filter {
            SearchFilter::IncludeAll => Some(Conversion::unrestricted()),
            SearchFilter::ExcludeAll => C::constant(false).map(Conversion::exact),
            _ => None,
        }
    }
}

// Keep whatever materialises; exact only when every child is exact.
struct AndConverter;

impl<Ctx, C> FilterConverter<Ctx, C> for AndConverter
where
    C: NativeCondition + 'static,
    Ctx: 'static,
{
    fn convert(
        &self,
        filter: &SearchFilter,
        meta: &StorageMeta,
        ctx: &Ctx,
        chain: &ConverterChain<Ctx, C>,
    ) -> Option<Conversion<C>> {
        let SearchFilter::And(and) = filter else {
            return None;
        };

        let mut parts = Vec::new();
        let mut handled = true;
        for child in and.filters() {
            let conversion = chain.convert(child, meta, ctx);
            handled &= conversion.handled;
            if let Some(condition) = conversion.condition {
                parts.push(condition);
            }
        }

        Some(match parts.len() {
            0 => Conversion::unconverted(),
            1 => Conversion {
                condition: parts.pop(),
                handled,
            },
            _ => Conversion {
                condition: Some(C::all(parts)),
                handled,
            },
        })
    }
}

// Dropping a disjunct would narrow the result, so every child must materialise.
struct OrConverter;

impl<Ctx, C> FilterConverter<Ctx, C> for OrConverter
where
    C: NativeCondition + 'static,
    Ctx: 'static,
{
    fn convert(
        &self,
        filter: &SearchFilter,
        meta: &StorageMeta,
        ctx: &Ctx,
        chain: &ConverterChain<Ctx, C>,
    ) -> Option<Conversion<C>> {
        let SearchFilter::Or(or) = filter else {
            return None;
        };

        let mut parts = Vec::with_capacity(or.filters().len());
        let mut handled = true;
        for child in or.filters() {
            let conversion = chain.convert(child, meta, ctx);
            handled &= conversion.handled;
            parts.push(conversion.condition?);
        }

        Some(Conversion {
            condition: Some(C::any(parts)),
            handled,
        })
    }
}

// Negating a superset is not a superset; only exact children can be negated.
struct NotConverter;

impl<Ctx, C> FilterConverter<Ctx, C> for NotConverter
where
    C: NativeCondition + 'static,
    Ctx: 'static,
{
    fn convert(
        &self,
        filter: &SearchFilter,
        meta: &StorageMeta,
        ctx: &Ctx,
        chain: &ConverterChain<Ctx, C>,
    ) -> Option<Conversion<C>> {
        let SearchFilter::Not(not) = filter else {
            return None;
        };

        let inner = chain.convert(not.inner(), meta, ctx);
        if !inner.handled {
            return None;
        }

        inner
            .condition
            .map(|condition| Conversion::exact(condition.negate()))
    }
}
