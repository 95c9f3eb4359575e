use std::cmp::Ordering;
use std::str::FromStr;

use chrono::{NaiveDateTime, NaiveTime};
use mvrewrite_common::{Error, Result};
use ordered_float::OrderedFloat;
use rust_decimal::Decimal;
use sqlparser::ast::{BinaryOperator, DataType, DateTimeField, Expr, Value};

use crate::column::QualifiedColumn;
use crate::predicate::equivalence::EquivalenceClass;

/// The literal kinds range predicates are allowed to constrain. Comparing
/// values of different kinds is an internal inconsistency, never a reason
/// to merely skip a candidate predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiteralValue {
    Decimal(Decimal),
    Double(OrderedFloat<f64>),
    Integer(i64),
    Interval { year_month: bool, value: i64 },
    Str(String),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
}

impl LiteralValue {
    fn kind(&self) -> &'static str {
        match self {
            LiteralValue::Decimal(_) => "decimal",
            LiteralValue::Double(_) => "double",
            LiteralValue::Integer(_) => "integer",
            LiteralValue::Interval { .. } => "interval",
            LiteralValue::Str(_) => "string",
            LiteralValue::Time(_) => "time",
            LiteralValue::Timestamp(_) => "timestamp",
        }
    }

    pub fn compare(&self, other: &LiteralValue) -> Result<Ordering> {
        match (self, other) {
            (LiteralValue::Decimal(a), LiteralValue::Decimal(b)) => Ok(a.cmp(b)),
            (LiteralValue::Double(a), LiteralValue::Double(b)) => Ok(a.cmp(b)),
            (LiteralValue::Integer(a), LiteralValue::Integer(b)) => Ok(a.cmp(b)),
            (
                LiteralValue::Interval {
                    year_month: ya,
                    value: a,
                },
                LiteralValue::Interval {
                    year_month: yb,
                    value: b,
                },
            ) if ya == yb => Ok(a.cmp(b)),
            (LiteralValue::Str(a), LiteralValue::Str(b)) => Ok(a.cmp(b)),
            (LiteralValue::Time(a), LiteralValue::Time(b)) => Ok(a.cmp(b)),
            (LiteralValue::Timestamp(a), LiteralValue::Timestamp(b)) => Ok(a.cmp(b)),
            _ => Err(Error::internal(format!(
                "literal class mismatch: {} vs {}",
                self.kind(),
                other.kind()
            ))),
        }
    }
}

/// Parses an expression into a comparable literal. `None` means the
/// expression is not one of the supported literal kinds, which demotes the
/// enclosing comparison to an opaque predicate.
pub fn range_literal(expr: &Expr) -> Option<LiteralValue> {
    match expr {
        Expr::Value(v) => match &v.value {
            Value::Number(text, _) => parse_number(text),
            Value::SingleQuotedString(s) => Some(LiteralValue::Str(s.clone())),
            _ => None,
        },
        Expr::TypedString(typed) => {
            let text = match &typed.value.value {
                Value::SingleQuotedString(s) | Value::DoubleQuotedString(s) => s.as_str(),
                _ => return None,
            };
            match &typed.data_type {
                DataType::Time(_, _) => parse_time(text).map(LiteralValue::Time),
                DataType::Timestamp(_, _) | DataType::Datetime(_) => {
                    parse_timestamp(text).map(LiteralValue::Timestamp)
                }
                _ => None,
            }
        }
        Expr::Interval(interval) => parse_interval(interval),
        _ => None,
    }
}

fn parse_number(text: &str) -> Option<LiteralValue> {
    if text.contains(['e', 'E']) {
        return text
            .parse::<f64>()
            .ok()
            .map(|v| LiteralValue::Double(OrderedFloat(v)));
    }
    if text.contains('.') {
        return Decimal::from_str(text).ok().map(LiteralValue::Decimal);
    }
    text.parse::<i64>().ok().map(LiteralValue::Integer)
}

fn parse_time(text: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
        .ok()
}

fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(&format!("{} 00:00:00", text), "%Y-%m-%d %H:%M:%S")
        })
        .ok()
}

fn parse_interval(interval: &sqlparser::ast::Interval) -> Option<LiteralValue> {
    let magnitude = match interval.value.as_ref() {
        Expr::Value(v) => match &v.value {
            Value::Number(text, _) => text.parse::<i64>().ok()?,
            Value::SingleQuotedString(s) => s.trim().parse::<i64>().ok()?,
            _ => return None,
        },
        _ => return None,
    };
    const MICROS_PER_SECOND: i64 = 1_000_000;
    let (year_month, value) = match interval.leading_field {
        Some(DateTimeField::Year) | Some(DateTimeField::Years) => (true, magnitude * 12),
        Some(DateTimeField::Month) | Some(DateTimeField::Months) => (true, magnitude),
        Some(DateTimeField::Day) | Some(DateTimeField::Days) => {
            (false, magnitude * 86_400 * MICROS_PER_SECOND)
        }
        Some(DateTimeField::Hour) | Some(DateTimeField::Hours) => {
            (false, magnitude * 3_600 * MICROS_PER_SECOND)
        }
        Some(DateTimeField::Minute) | Some(DateTimeField::Minutes) => {
            (false, magnitude * 60 * MICROS_PER_SECOND)
        }
        Some(DateTimeField::Second) | Some(DateTimeField::Seconds) => {
            (false, magnitude * MICROS_PER_SECOND)
        }
        _ => return None,
    };
    Some(LiteralValue::Interval { year_month, value })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOp {
    Eq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl RangeOp {
    pub fn from_binary_operator(op: &BinaryOperator) -> Option<RangeOp> {
        match op {
            BinaryOperator::Eq => Some(RangeOp::Eq),
            BinaryOperator::Lt => Some(RangeOp::Lt),
            BinaryOperator::LtEq => Some(RangeOp::LtEq),
            BinaryOperator::Gt => Some(RangeOp::Gt),
            BinaryOperator::GtEq => Some(RangeOp::GtEq),
            _ => None,
        }
    }

    pub fn binary_operator(&self) -> BinaryOperator {
        match self {
            RangeOp::Eq => BinaryOperator::Eq,
            RangeOp::Lt => BinaryOperator::Lt,
            RangeOp::LtEq => BinaryOperator::LtEq,
            RangeOp::Gt => BinaryOperator::Gt,
            RangeOp::GtEq => BinaryOperator::GtEq,
        }
    }

    /// Swaps direction for a `literal op column` comparison rewritten as
    /// `column op literal`.
    pub fn flipped(&self) -> RangeOp {
        match self {
            RangeOp::Eq => RangeOp::Eq,
            RangeOp::Lt => RangeOp::Gt,
            RangeOp::LtEq => RangeOp::GtEq,
            RangeOp::Gt => RangeOp::Lt,
            RangeOp::GtEq => RangeOp::LtEq,
        }
    }
}

/// One side of a range constraint: an operator, the comparable value, and
/// the original literal expression kept for re-emission.
#[derive(Debug, Clone)]
pub struct RangeBound {
    pub op: RangeOp,
    pub value: LiteralValue,
    pub expr: Expr,
}

impl RangeBound {
    pub fn new(op: RangeOp, expr: &Expr) -> Option<Self> {
        let value = range_literal(expr)?;
        Some(Self {
            op,
            value,
            expr: expr.clone(),
        })
    }
}

impl PartialEq for RangeBound {
    fn eq(&self, other: &Self) -> bool {
        self.op == other.op && self.value == other.value
    }
}

fn merge_lower(a: Option<RangeBound>, b: Option<RangeBound>) -> Result<Option<RangeBound>> {
    match (a, b) {
        (None, b) => Ok(b),
        (a, None) => Ok(a),
        (Some(a), Some(b)) => match a.value.compare(&b.value)? {
            Ordering::Greater => Ok(Some(a)),
            Ordering::Less => Ok(Some(b)),
            // Same floor: the strict bound is tighter.
            Ordering::Equal => Ok(Some(if b.op == RangeOp::Gt { b } else { a })),
        },
    }
}

fn merge_upper(a: Option<RangeBound>, b: Option<RangeBound>) -> Result<Option<RangeBound>> {
    match (a, b) {
        (None, b) => Ok(b),
        (a, None) => Ok(a),
        (Some(a), Some(b)) => match a.value.compare(&b.value)? {
            Ordering::Less => Ok(Some(a)),
            Ordering::Greater => Ok(Some(b)),
            Ordering::Equal => Ok(Some(if b.op == RangeOp::Lt { b } else { a })),
        },
    }
}

fn merge_equal(a: Option<RangeBound>, b: Option<RangeBound>) -> Result<Option<RangeBound>> {
    match (a, b) {
        (None, b) => Ok(b),
        (a, None) => Ok(a),
        (Some(a), Some(b)) => {
            if a.value.compare(&b.value)? == Ordering::Equal {
                Ok(Some(a))
            } else {
                Err(Error::internal(
                    "conflicting equality bounds reached range intersection",
                ))
            }
        }
    }
}

/// Does a lower bound admit `point`?
fn lower_admits(bound: Option<&RangeBound>, point: &LiteralValue) -> Result<bool> {
    match bound {
        None => Ok(true),
        Some(b) => match point.compare(&b.value)? {
            Ordering::Greater => Ok(true),
            Ordering::Less => Ok(false),
            Ordering::Equal => Ok(b.op == RangeOp::GtEq),
        },
    }
}

fn upper_admits(bound: Option<&RangeBound>, point: &LiteralValue) -> Result<bool> {
    match bound {
        None => Ok(true),
        Some(b) => match point.compare(&b.value)? {
            Ordering::Less => Ok(true),
            Ordering::Greater => Ok(false),
            Ordering::Equal => Ok(b.op == RangeOp::LtEq),
        },
    }
}

fn lower_covers(wide: Option<&RangeBound>, narrow: Option<&RangeBound>) -> Result<bool> {
    match (wide, narrow) {
        (None, _) => Ok(true),
        (Some(_), None) => Ok(false),
        (Some(w), Some(n)) => match n.value.compare(&w.value)? {
            Ordering::Greater => Ok(true),
            Ordering::Less => Ok(false),
            Ordering::Equal => Ok(!(w.op == RangeOp::Gt && n.op == RangeOp::GtEq)),
        },
    }
}

fn upper_covers(wide: Option<&RangeBound>, narrow: Option<&RangeBound>) -> Result<bool> {
    match (wide, narrow) {
        (None, _) => Ok(true),
        (Some(_), None) => Ok(false),
        (Some(w), Some(n)) => match n.value.compare(&w.value)? {
            Ordering::Less => Ok(true),
            Ordering::Greater => Ok(false),
            Ordering::Equal => Ok(!(w.op == RangeOp::Lt && n.op == RangeOp::LtEq)),
        },
    }
}

fn same_bound(a: &Option<RangeBound>, b: &Option<RangeBound>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Constraints on one column within a conjunction: at most an equality, a
/// floor, and a ceiling. An absent side is unbounded.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRange {
    pub column: QualifiedColumn,
    pub equal: Option<RangeBound>,
    pub lower: Option<RangeBound>,
    pub upper: Option<RangeBound>,
    pub class: EquivalenceClass,
}

impl ColumnRange {
    pub fn unconstrained(column: QualifiedColumn) -> Self {
        Self {
            column,
            equal: None,
            lower: None,
            upper: None,
            class: EquivalenceClass::new(),
        }
    }

    /// Builds the range for a single `column op literal` comparison.
    pub fn from_comparison(column: QualifiedColumn, op: RangeOp, literal: &Expr) -> Option<Self> {
        let bound = RangeBound::new(op, literal)?;
        let mut range = Self::unconstrained(column);
        match op {
            RangeOp::Eq => range.equal = Some(bound),
            RangeOp::Gt | RangeOp::GtEq => range.lower = Some(bound),
            RangeOp::Lt | RangeOp::LtEq => range.upper = Some(bound),
        }
        Some(range)
    }

    /// Builds the range for `column BETWEEN low AND high`: an inclusive
    /// floor and ceiling.
    pub fn from_between(column: QualifiedColumn, low: &Expr, high: &Expr) -> Option<Self> {
        let lower = RangeBound::new(RangeOp::GtEq, low)?;
        let upper = RangeBound::new(RangeOp::LtEq, high)?;
        let mut range = Self::unconstrained(column);
        range.lower = Some(lower);
        range.upper = Some(upper);
        Some(range)
    }

    pub fn is_unconstrained(&self) -> bool {
        self.equal.is_none() && self.lower.is_none() && self.upper.is_none()
    }

    /// Fieldwise conjunction of two ranges over the same class: equalities
    /// must agree, the larger floor and the smaller ceiling win.
    pub fn intersection(&self, other: &ColumnRange) -> Result<ColumnRange> {
        Ok(ColumnRange {
            column: self.column.clone(),
            equal: merge_equal(self.equal.clone(), other.equal.clone())?,
            lower: merge_lower(self.lower.clone(), other.lower.clone())?,
            upper: merge_upper(self.upper.clone(), other.upper.clone())?,
            class: self.class.clone(),
        })
    }

    /// True when every row admitted by `other` is admitted by `self`.
    pub fn covers(&self, other: &ColumnRange) -> Result<bool> {
        if let Some(se) = &self.equal {
            // An equality only covers the identical equality.
            return match &other.equal {
                Some(oe) => Ok(se.value.compare(&oe.value)? == Ordering::Equal),
                None => Ok(false),
            };
        }
        if let Some(oe) = &other.equal {
            return Ok(lower_admits(self.lower.as_ref(), &oe.value)?
                && upper_admits(self.upper.as_ref(), &oe.value)?);
        }
        Ok(lower_covers(self.lower.as_ref(), other.lower.as_ref())?
            && upper_covers(self.upper.as_ref(), other.upper.as_ref())?)
    }

    /// The residual constraint to re-apply on top of `larger` so that
    /// `larger.intersection(residual)` admits exactly the rows of `self`.
    /// Sides already enforced by `larger` are dropped.
    pub fn base_on(&self, larger: &ColumnRange) -> ColumnRange {
        ColumnRange {
            column: self.column.clone(),
            equal: if same_bound(&self.equal, &larger.equal) {
                None
            } else {
                self.equal.clone()
            },
            lower: if same_bound(&self.lower, &larger.lower) {
                None
            } else {
                self.lower.clone()
            },
            upper: if same_bound(&self.upper, &larger.upper) {
                None
            } else {
                self.upper.clone()
            },
            class: self.class.clone(),
        }
    }

    /// The constraints as (op, literal expression) pairs, equality first.
    pub fn comparisons(&self) -> Vec<(RangeOp, &Expr)> {
        let mut out = Vec::new();
        if let Some(b) = &self.equal {
            out.push((RangeOp::Eq, &b.expr));
        }
        if let Some(b) = &self.lower {
            out.push((b.op, &b.expr));
        }
        if let Some(b) = &self.upper {
            out.push((b.op, &b.expr));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use sqlparser::ast::{Value, ValueWithSpan};

    use super::*;

    fn col() -> QualifiedColumn {
        QualifiedColumn::new("cat", "sch", "t", "x")
    }

    fn num(n: &str) -> Expr {
        Expr::Value(ValueWithSpan::from(Value::Number(n.to_string(), false)))
    }

    fn range(op: RangeOp, n: &str) -> ColumnRange {
        ColumnRange::from_comparison(col(), op, &num(n)).unwrap()
    }

    fn bounded(low_op: RangeOp, low: &str, high_op: RangeOp, high: &str) -> ColumnRange {
        let mut r = ColumnRange::unconstrained(col());
        r.lower = Some(RangeBound::new(low_op, &num(low)).unwrap());
        r.upper = Some(RangeBound::new(high_op, &num(high)).unwrap());
        r
    }

    #[test]
    fn literal_kinds_parse() {
        assert_eq!(range_literal(&num("42")), Some(LiteralValue::Integer(42)));
        assert_eq!(
            range_literal(&num("1.5")),
            Some(LiteralValue::Decimal(Decimal::from_str("1.5").unwrap()))
        );
        assert_eq!(
            range_literal(&num("1.5e2")),
            Some(LiteralValue::Double(OrderedFloat(150.0)))
        );
        let s = Expr::Value(ValueWithSpan::from(Value::SingleQuotedString(
            "abc".to_string(),
        )));
        assert_eq!(range_literal(&s), Some(LiteralValue::Str("abc".into())));
        assert_eq!(
            range_literal(&Expr::Value(ValueWithSpan::from(Value::Boolean(true)))),
            None
        );
    }

    #[test]
    fn cross_kind_comparison_is_internal_error() {
        let a = LiteralValue::Integer(1);
        let b = LiteralValue::Str("1".into());
        assert!(matches!(a.compare(&b), Err(Error::Internal(_))));
    }

    #[test]
    fn covers_lower_bound_table() {
        // x > 10 covers x > 10, x > 11, x = 12, x >= 11
        let wide = range(RangeOp::Gt, "10");
        assert!(wide.covers(&range(RangeOp::Gt, "10")).unwrap());
        assert!(wide.covers(&range(RangeOp::Gt, "11")).unwrap());
        assert!(wide.covers(&range(RangeOp::Eq, "12")).unwrap());
        assert!(wide.covers(&range(RangeOp::GtEq, "11")).unwrap());
        // but not x >= 10 or x > 9
        assert!(!wide.covers(&range(RangeOp::GtEq, "10")).unwrap());
        assert!(!wide.covers(&range(RangeOp::Gt, "9")).unwrap());
    }

    #[test]
    fn covers_upper_bound_table() {
        let wide = range(RangeOp::Lt, "10");
        assert!(wide.covers(&range(RangeOp::Lt, "10")).unwrap());
        assert!(wide.covers(&range(RangeOp::Lt, "9")).unwrap());
        assert!(wide.covers(&range(RangeOp::Eq, "5")).unwrap());
        assert!(wide.covers(&range(RangeOp::LtEq, "9")).unwrap());
        assert!(!wide.covers(&range(RangeOp::LtEq, "10")).unwrap());
        assert!(!wide.covers(&range(RangeOp::Lt, "11")).unwrap());
    }

    #[test]
    fn equality_covers_only_identical_equality() {
        let eq = range(RangeOp::Eq, "7");
        assert!(eq.covers(&range(RangeOp::Eq, "7")).unwrap());
        assert!(!eq.covers(&range(RangeOp::Eq, "8")).unwrap());
        assert!(!eq.covers(&range(RangeOp::Gt, "6")).unwrap());
        // unbounded covers everything
        let unbound = ColumnRange::unconstrained(col());
        assert!(unbound.covers(&eq).unwrap());
        assert!(!eq.covers(&unbound).unwrap());
    }

    #[test]
    fn equality_on_boundary_respects_strictness() {
        assert!(range(RangeOp::GtEq, "10").covers(&range(RangeOp::Eq, "10")).unwrap());
        assert!(!range(RangeOp::Gt, "10").covers(&range(RangeOp::Eq, "10")).unwrap());
        assert!(range(RangeOp::LtEq, "10").covers(&range(RangeOp::Eq, "10")).unwrap());
        assert!(!range(RangeOp::Lt, "10").covers(&range(RangeOp::Eq, "10")).unwrap());
    }

    #[test]
    fn intersection_is_fieldwise() {
        let a = bounded(RangeOp::Gt, "0", RangeOp::LtEq, "10");
        let b = bounded(RangeOp::GtEq, "5", RangeOp::Lt, "20");
        let both = a.intersection(&b).unwrap();
        assert_eq!(both.lower, Some(RangeBound::new(RangeOp::GtEq, &num("5")).unwrap()));
        assert_eq!(both.upper, Some(RangeBound::new(RangeOp::LtEq, &num("10")).unwrap()));
        assert!(both.equal.is_none());
    }

    #[test]
    fn intersection_tie_prefers_strict_bound() {
        let a = range(RangeOp::Gt, "5");
        let b = range(RangeOp::GtEq, "5");
        let both = a.intersection(&b).unwrap();
        assert_eq!(both.lower.unwrap().op, RangeOp::Gt);

        let a = range(RangeOp::Lt, "5");
        let b = range(RangeOp::LtEq, "5");
        let both = b.intersection(&a).unwrap();
        assert_eq!(both.upper.unwrap().op, RangeOp::Lt);
    }

    #[test]
    fn conflicting_equalities_are_internal_error() {
        let a = range(RangeOp::Eq, "1");
        let b = range(RangeOp::Eq, "2");
        assert!(matches!(a.intersection(&b), Err(Error::Internal(_))));
    }

    #[test]
    fn base_on_drops_shared_sides() {
        let narrow = bounded(RangeOp::Gt, "5", RangeOp::LtEq, "10");
        let wide = range(RangeOp::Gt, "5");
        let residual = narrow.base_on(&wide);
        assert!(residual.lower.is_none());
        assert_eq!(residual.upper, narrow.upper);

        // identical ranges leave nothing to re-apply
        let residual = narrow.base_on(&narrow);
        assert!(residual.is_unconstrained());
    }

    #[test]
    fn base_on_roundtrip_examples() {
        let narrow = bounded(RangeOp::GtEq, "3", RangeOp::Lt, "8");
        let wide = bounded(RangeOp::Gt, "0", RangeOp::Lt, "8");
        assert!(wide.covers(&narrow).unwrap());
        let residual = narrow.base_on(&wide);
        let rebuilt = wide.intersection(&residual).unwrap();
        assert_eq!(rebuilt.lower, narrow.lower);
        assert_eq!(rebuilt.upper, narrow.upper);
    }

    fn arb_bound(ops: [RangeOp; 2]) -> impl Strategy<Value = Option<RangeBound>> {
        (proptest::option::of((0i64..20, 0usize..2))).prop_map(move |opt| {
            opt.map(|(v, i)| RangeBound::new(ops[i], &num(&v.to_string())).unwrap())
        })
    }

    proptest! {
        // For any pair where `wide` covers `narrow`, intersecting the
        // residual back onto `wide` reproduces `narrow` exactly.
        #[test]
        fn residual_roundtrip(
            nl in arb_bound([RangeOp::Gt, RangeOp::GtEq]),
            nu in arb_bound([RangeOp::Lt, RangeOp::LtEq]),
            wl in arb_bound([RangeOp::Gt, RangeOp::GtEq]),
            wu in arb_bound([RangeOp::Lt, RangeOp::LtEq]),
        ) {
            let mut narrow = ColumnRange::unconstrained(col());
            narrow.lower = nl;
            narrow.upper = nu;
            let mut wide = ColumnRange::unconstrained(col());
            wide.lower = wl;
            wide.upper = wu;
            if wide.covers(&narrow).unwrap() {
                let residual = narrow.base_on(&wide);
                let rebuilt = wide.intersection(&residual).unwrap();
                prop_assert_eq!(rebuilt.lower, narrow.lower);
                prop_assert_eq!(rebuilt.upper, narrow.upper);
            }
        }
    }
}
