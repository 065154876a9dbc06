use crate::filter::{Conjunction, Disjunction, Negation, SearchFilter};

///
/// Build a normalized AND.
///
/// Rules (children are already normalized):
/// - AND()                 → IncludeAll
/// - AND(IncludeAll, x)    → x
/// - AND(ExcludeAll, x)    → ExcludeAll
/// - AND(AND(a, b), c)     → AND(a, b, c)
/// - AND(x, x)             → x
/// - AND(x, NOT x)         → ExcludeAll
/// - AND(x)                → x
///
/// Child order is preserved (first occurrence wins).
///
pub(super) fn and(children: impl IntoIterator<Item = SearchFilter>) -> SearchFilter {
    let mut out = Vec::new();

    for child in children {
        match child {
            SearchFilter::IncludeAll => {}
            SearchFilter::ExcludeAll => return SearchFilter::ExcludeAll,
            SearchFilter::And(Conjunction(grandchildren)) => {
                for grandchild in grandchildren {
                    push_unique(&mut out, grandchild);
                }
            }
            other => push_unique(&mut out, other),
        }
    }

    if has_complement(&out) {
        return SearchFilter::ExcludeAll;
    }

    match out.len() {
        0 => SearchFilter::IncludeAll,
        1 => out.swap_remove(0),
        _ => SearchFilter::And(Conjunction(out)),
    }
}

///
/// Build a normalized OR.
///
/// Rules mirror [`and`] with the neutral and absorbing elements swapped:
/// - OR()                  → ExcludeAll
/// - OR(IncludeAll, x)     → IncludeAll
/// - OR(ExcludeAll, x)     → x
/// - OR(x, NOT x)          → IncludeAll
///
pub(super) fn or(children: impl IntoIterator<Item = SearchFilter>) -> SearchFilter {
    let mut out = Vec::new();

    for child in children {
        match child {
            SearchFilter::ExcludeAll => {}
            SearchFilter::IncludeAll => return SearchFilter::IncludeAll,
            SearchFilter::Or(Disjunction(grandchildren)) => {
                for grandchild in grandchildren {
                    push_unique(&mut out, grandchild);
                }
            }
            other => push_unique(&mut out, other),
        }
    }

    if has_complement(&out) {
        return SearchFilter::IncludeAll;
    }

    match out.len() {
        0 => SearchFilter::ExcludeAll,
        1 => out.swap_remove(0),
        _ => SearchFilter::Or(Disjunction(out)),
    }
}

///
/// Build a normalized NOT.
///
/// - NOT(NOT x)        → x
/// - NOT(IncludeAll)   → ExcludeAll
/// - NOT(ExcludeAll)   → IncludeAll
///
pub(super) fn not(inner: SearchFilter) -> SearchFilter {
    match inner {
        SearchFilter::IncludeAll => SearchFilter::ExcludeAll,
        SearchFilter::ExcludeAll => SearchFilter::IncludeAll,
        SearchFilter::Not(Negation(double)) => *double,
        other => SearchFilter::Not(Negation(Box::new(other))),
    }
}

fn push_unique(out: &mut Vec<SearchFilter>, filter: SearchFilter) {
    if !out.contains(&filter) {
        out.push(filter);
    }
}

// A child and its own negation side by side.
fn has_complement(children: &[SearchFilter]) -> bool {
    children.iter().any(|child| match child {
        SearchFilter::Not(Negation(inner)) => children.contains(&**inner),
        _ => false,
    })
}
