use crate::{
    error::FilterError,
    filter::{FilterOp, SearchFilter},
    model::{Field, FieldKind},
    record::Record,
    value::Value,
};
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use sha2::{Digest, Sha256};

fn fields() -> Vec<Field> {
    vec![
        Field::new("a", FieldKind::Int),
        Field::new("b", FieldKind::Int),
        Field::new("t", FieldKind::Text),
        Field::new("secret", FieldKind::Text).hidden(),
    ]
}

fn a_eq(n: i64) -> SearchFilter {
    SearchFilter::eq("a", n)
}

fn b_eq(n: i64) -> SearchFilter {
    SearchFilter::eq("b", n)
}

//
// normal form
//

#[test]
fn empty_and_is_include_all_and_empty_or_is_exclude_all() {
    assert_eq!(SearchFilter::and([]), SearchFilter::IncludeAll);
    assert_eq!(SearchFilter::or([]), SearchFilter::ExcludeAll);
}

#[test]
fn singleton_composites_reduce_to_their_child() {
    assert_eq!(SearchFilter::and([a_eq(1)]), a_eq(1));
    assert_eq!(SearchFilter::or([a_eq(1)]), a_eq(1));
    assert_eq!(SearchFilter::or([SearchFilter::ExcludeAll, a_eq(1)]), a_eq(1));
    assert_eq!(SearchFilter::and([SearchFilter::IncludeAll, a_eq(1)]), a_eq(1));
}

#[test]
fn nested_composites_flatten() {
    let nested = SearchFilter::and([SearchFilter::and([a_eq(1), b_eq(2)]), a_eq(3)]);
    let flat = SearchFilter::and([a_eq(1), b_eq(2), a_eq(3)]);

    assert_eq!(nested, flat);
    let SearchFilter::And(and) = &flat else {
        panic!("expected a conjunction, got {flat:?}");
    };
    assert_eq!(and.filters(), &[a_eq(1), b_eq(2), a_eq(3)]);

    let nested_or = a_eq(1) | (b_eq(2) | a_eq(3));
    assert_eq!(nested_or, SearchFilter::or([a_eq(1), b_eq(2), a_eq(3)]));
}

#[test]
fn absorbing_elements_short_circuit() {
    assert_eq!(
        SearchFilter::and([a_eq(1), SearchFilter::ExcludeAll]),
        SearchFilter::ExcludeAll
    );
    assert_eq!(
        SearchFilter::or([a_eq(1), SearchFilter::IncludeAll]),
        SearchFilter::IncludeAll
    );
}

#[test]
fn and_containing_empty_or_reduces_to_exclude_all() {
    let filter = SearchFilter::and([a_eq(1), SearchFilter::or([]), b_eq(2)]);

    assert_eq!(filter, SearchFilter::ExcludeAll);
}

#[test]
fn double_negation_and_constant_negation() {
    assert_eq!(!!a_eq(1), a_eq(1));
    assert_eq!(!SearchFilter::IncludeAll, SearchFilter::ExcludeAll);
    assert_eq!(!SearchFilter::ExcludeAll, SearchFilter::IncludeAll);
}

#[test]
fn duplicates_collapse_and_complements_resolve() {
    assert_eq!(SearchFilter::and([a_eq(1), a_eq(1)]), a_eq(1));
    assert_eq!(a_eq(1) & !a_eq(1), SearchFilter::ExcludeAll);
    assert_eq!(a_eq(1) | !a_eq(1), SearchFilter::IncludeAll);
}

//
// evaluation
//

#[test]
fn type_mismatch_is_false_not_an_error() {
    let record = record! { "a" => 5 };

    assert!(!SearchFilter::eq("a", "5").matches(&record, &fields()));
    assert!(!SearchFilter::ne("a", "5").matches(&record, &fields()));
    assert!(!SearchFilter::gt("a", true).matches(&record, &fields()));
}

#[test]
fn null_comparisons() {
    let record = record! { "a" => 5 };
    let fields = fields();

    assert!(SearchFilter::eq("b", Value::Null).matches(&record, &fields));
    assert!(SearchFilter::ne("a", Value::Null).matches(&record, &fields));
    assert!(!SearchFilter::ne("b", 3).matches(&record, &fields));
    assert!(!SearchFilter::lt("b", 3).matches(&record, &fields));
    assert!(SearchFilter::not(SearchFilter::lt("b", 3)).matches(&record, &fields));
}

#[test]
fn text_operators_coerce_both_operands() {
    let record = record! { "a" => 1234, "t" => "Hello World" };
    let fields = fields();

    assert!(SearchFilter::contains("a", 23).matches(&record, &fields));
    assert!(SearchFilter::starts_with("a", "12").matches(&record, &fields));
    assert!(SearchFilter::ends_with("t", "World").matches(&record, &fields));
    assert!(!SearchFilter::contains("t", "world").matches(&record, &fields));
}

#[test]
fn one_of_checks_membership() {
    let record = record! { "a" => 2 };
    let fields = fields();

    assert!(SearchFilter::one_of("a", [1, 2, 3]).matches(&record, &fields));
    assert!(!SearchFilter::one_of("a", [4, 5]).matches(&record, &fields));
    assert!(!SearchFilter::one_of("a", Vec::<i64>::new()).matches(&record, &fields));
}

#[test]
fn query_matches_readable_text_fields_case_insensitively() {
    let fields = fields();
    let visible = record! { "t" => "Quarterly REPORT" };
    let hidden = record! { "secret" => "report" };

    assert!(SearchFilter::query("report").matches(&visible, &fields));
    assert!(!SearchFilter::query("report").matches(&hidden, &fields));
    assert!(SearchFilter::query("").matches(&Record::new(), &fields));
}

//
// validation
//

#[test]
fn validate_rejects_unknown_unreadable_and_unpermitted() {
    let fields = fields();

    assert_eq!(
        SearchFilter::eq("zzz", 1).validate_for_fields(&fields),
        Err(FilterError::UnknownField { field: "zzz".into() })
    );
    assert_eq!(
        (a_eq(1) & SearchFilter::eq("secret", "x")).validate_for_fields(&fields),
        Err(FilterError::UnreadableField {
            field: "secret".into()
        })
    );
    assert_eq!(
        SearchFilter::not(SearchFilter::contains("a", "1")).validate_for_fields(&fields),
        Err(FilterError::OperatorNotPermitted {
            field: "a".into(),
            op: "contains".into()
        })
    );
    assert_eq!(SearchFilter::query("x").validate_for_fields(&fields), Ok(()));
}

#[test]
fn referenced_fields_are_deduplicated() {
    let filter = a_eq(1) & (b_eq(2) | !a_eq(3));

    assert_eq!(filter.referenced_fields(), vec!["a", "b"]);
}

//
// properties
//

#[derive(Clone, Debug)]
enum RawFilter {
    IncludeAll,
    ExcludeAll,
    Leaf(String, FilterOp, Value),
    And(Vec<Self>),
    Or(Vec<Self>),
    Not(Box<Self>),
}

impl RawFilter {
    fn build(&self) -> SearchFilter {
        match self {
            Self::IncludeAll => SearchFilter::IncludeAll,
            Self::ExcludeAll => SearchFilter::ExcludeAll,
            Self::Leaf(name, op, value) => SearchFilter::field(name.clone(), *op, value.clone()),
            Self::And(children) => SearchFilter::and(children.iter().map(Self::build)),
            Self::Or(children) => SearchFilter::or(children.iter().map(Self::build)),
            Self::Not(inner) => SearchFilter::not(inner.build()),
        }
    }

    fn eval(&self, record: &Record) -> bool {
        match self {
            Self::IncludeAll => true,
            Self::ExcludeAll => false,
            Self::Leaf(name, op, value) => SearchFilter::field(name.clone(), *op, value.clone())
                .matches(record, &fields()),
            Self::And(children) => children.iter().all(|c| c.eval(record)),
            Self::Or(children) => children.iter().any(|c| c.eval(record)),
            Self::Not(inner) => !inner.eval(record),
        }
    }
}

fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        (0i64..5).prop_map(Value::Int),
        "[a-c]{0,2}".prop_map(Value::Text),
        Just(Value::Null),
    ]
}

fn arb_op() -> impl Strategy<Value = FilterOp> {
    proptest::sample::select(FilterOp::ALL.to_vec())
}

fn arb_raw() -> impl Strategy<Value = RawFilter> {
    let leaf = prop_oneof![
        Just(RawFilter::IncludeAll),
        Just(RawFilter::ExcludeAll),
        (
            prop_oneof![Just("a"), Just("b"), Just("t")],
            arb_op(),
            arb_value()
        )
            .prop_map(|(name, op, value)| {
                let value = if op == FilterOp::OneOf {
                    Value::List(vec![value])
                } else {
                    value
                };
                RawFilter::Leaf(name.to_string(), op, value)
            }),
    ];

    leaf.prop_recursive(4, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(RawFilter::And),
            prop::collection::vec(inner.clone(), 0..4).prop_map(RawFilter::Or),
            inner.prop_map(|f| RawFilter::Not(Box::new(f))),
        ]
    })
}

fn arb_record() -> impl Strategy<Value = Record> {
    (arb_value(), arb_value(), arb_value())
        .prop_map(|(a, b, t)| record! { "a" => a, "b" => b, "t" => t })
}

proptest! {
    #[test]
    fn normalization_preserves_meaning(raw in arb_raw(), record in arb_record()) {
        prop_assert_eq!(raw.build().matches(&record, &fields()), raw.eval(&record));
    }

    #[test]
    fn construction_is_idempotent(raw in arb_raw()) {
        let first = raw.build();
        let second = raw.build();
        prop_assert_eq!(&first, &second);

        // re-wrapping a normal form changes nothing
        prop_assert_eq!(SearchFilter::and([first.clone()]), first.clone());
        prop_assert_eq!(SearchFilter::or([first.clone(), first.clone()]), first.clone());
        prop_assert_eq!(!!first.clone(), first);
    }

    #[test]
    fn normal_form_has_no_nested_or_constant_children(raw in arb_raw()) {
        fn check(filter: &SearchFilter) -> bool {
            match filter {
                SearchFilter::And(and) => and.filters().len() >= 2 && and.filters().iter().all(|c| {
                    !matches!(c, SearchFilter::And(_) | SearchFilter::IncludeAll | SearchFilter::ExcludeAll) && check(c)
                }),
                SearchFilter::Or(or) => or.filters().len() >= 2 && or.filters().iter().all(|c| {
                    !matches!(c, SearchFilter::Or(_) | SearchFilter::IncludeAll | SearchFilter::ExcludeAll) && check(c)
                }),
                SearchFilter::Not(not) => !matches!(
                    not.inner(),
                    SearchFilter::Not(_) | SearchFilter::IncludeAll | SearchFilter::ExcludeAll
                ) && check(not.inner()),
                _ => true,
            }
        }

        prop_assert!(check(&raw.build()));
    }
}

//
// fingerprint
//

fn digest(filter: &SearchFilter) -> Vec<u8> {
    let mut hasher = Sha256::new();
    filter.fingerprint(&mut hasher);
    hasher.finalize().to_vec()
}

#[test]
fn fingerprint_follows_structure_not_construction_order() {
    let ab = SearchFilter::and([a_eq(1), b_eq(2)]);

    assert_eq!(digest(&ab), digest(&(a_eq(1) & b_eq(2))));
    assert_ne!(digest(&ab), digest(&SearchFilter::and([b_eq(2), a_eq(1)])));
    assert_ne!(digest(&a_eq(1)), digest(&SearchFilter::eq("a", 1.0)));
}

#[test]
fn fingerprint_keeps_sub_microsecond_timestamps_apart() {
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().expect("valid timestamp");
    let near = |nanos: i64| {
        SearchFilter::field(
            "at",
            FilterOp::Gte,
            Value::Timestamp(base + chrono::TimeDelta::nanoseconds(nanos)),
        )
    };

    assert_ne!(digest(&near(0)), digest(&near(500)));
    assert_eq!(digest(&near(500)), digest(&near(500)));
}
