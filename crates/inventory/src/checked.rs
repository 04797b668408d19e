//! Overflow-checked decimal arithmetic.
//!
//! Quantities and costs come straight from storage, so products and running
//! totals can exceed `Decimal`'s range. Every valuation path goes through
//! these helpers and reports overflow as an invariant violation.

use rust_decimal::Decimal;

use stockledger_core::{DomainError, DomainResult};

fn overflow(op: &str, a: Decimal, b: Decimal) -> DomainError {
    DomainError::invariant(format!("decimal overflow: {a} {op} {b}"))
}

pub fn add(a: Decimal, b: Decimal) -> DomainResult<Decimal> {
    a.checked_add(b).ok_or_else(|| overflow("+", a, b))
}

pub fn sub(a: Decimal, b: Decimal) -> DomainResult<Decimal> {
    a.checked_sub(b).ok_or_else(|| overflow("-", a, b))
}

pub fn mul(a: Decimal, b: Decimal) -> DomainResult<Decimal> {
    a.checked_mul(b).ok_or_else(|| overflow("*", a, b))
}

/// `a / b`, with zero for a zero divisor.
pub fn div_or_zero(a: Decimal, b: Decimal) -> DomainResult<Decimal> {
    if b.is_zero() {
        return Ok(Decimal::ZERO);
    }
    a.checked_div(b).ok_or_else(|| overflow("/", a, b))
}

pub fn sum(values: impl IntoIterator<Item = Decimal>) -> DomainResult<Decimal> {
    values.into_iter().try_fold(Decimal::ZERO, add)
}

/// Sum of fallible terms, stopping at the first error.
pub fn try_sum(values: impl IntoIterator<Item = DomainResult<Decimal>>) -> DomainResult<Decimal> {
    values.into_iter().try_fold(Decimal::ZERO, |acc, v| add(acc, v?))
}
