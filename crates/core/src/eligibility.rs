//! Loan-eligibility arithmetic used mid-application.
//!
//! Every function here is deterministic and side-effect free. Amounts are
//! [`Decimal`] so the same inputs always produce the same cents.
//!
//! The monthly payment is a straight division of the amount over the term. No
//! interest or amortisation is applied.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::ErrorClass;

/// Share of the monthly surplus that may be committed to loan payments.
pub const DEFAULT_CAPACITY_RATIO: Decimal = Decimal::from_parts(33, 0, 0, false, 2);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityInput {
    pub monthly_income: Decimal,
    pub monthly_expenses: Decimal,
    pub requested_amount: Decimal,
    pub term_months: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityResult {
    pub debt_ratio_percent: Decimal,
    pub monthly_payment: Decimal,
    pub max_loan_capacity: Decimal,
    pub eligible_amount: Decimal,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EligibilityError {
    #[error("figures are too large to evaluate: {operation} overflowed")]
    Overflow { operation: &'static str },
}

impl EligibilityError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::Validation
    }
}

fn overflow(operation: &'static str) -> EligibilityError {
    EligibilityError::Overflow { operation }
}

/// `round((income - expenses) / income * 100)`, half-up.
///
/// Returns zero for a zero income so partially filled forms keep rendering.
pub fn compute_debt_ratio(
    income: Decimal,
    expenses: Decimal,
) -> Result<Decimal, EligibilityError> {
    if income.is_zero() {
        return Ok(Decimal::ZERO);
    }
    let ratio = income
        .checked_sub(expenses)
        .ok_or_else(|| overflow("surplus"))?
        .checked_div(income)
        .and_then(|share| share.checked_mul(Decimal::ONE_HUNDRED))
        .ok_or_else(|| overflow("debt ratio"))?;
    round_half_up(ratio)
}

/// `amount / term_months`, rounded to cents. A zero term yields zero.
pub fn compute_monthly_payment(amount: Decimal, term_months: u32) -> Decimal {
    if term_months == 0 {
        return Decimal::ZERO;
    }
    (amount / Decimal::from(term_months))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn compute_max_capacity(
    income: Decimal,
    expenses: Decimal,
    term_months: u32,
) -> Result<Decimal, EligibilityError> {
    EligibilityCalculator::default().max_capacity(income, expenses, term_months)
}

pub fn compute_eligibility(
    input: &EligibilityInput,
) -> Result<EligibilityResult, EligibilityError> {
    EligibilityCalculator::default().evaluate(input)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EligibilityCalculator {
    capacity_ratio: Decimal,
}

impl EligibilityCalculator {
    pub fn new(capacity_ratio: Decimal) -> Self {
        Self { capacity_ratio }
    }

    pub fn capacity_ratio(&self) -> Decimal {
        self.capacity_ratio
    }

    /// `(income - expenses) * ratio * term_months`, never below zero.
    pub fn max_capacity(
        &self,
        income: Decimal,
        expenses: Decimal,
        term_months: u32,
    ) -> Result<Decimal, EligibilityError> {
        let surplus = income.checked_sub(expenses).ok_or_else(|| overflow("surplus"))?;
        if surplus <= Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }
        let capacity = surplus
            .checked_mul(self.capacity_ratio)
            .and_then(|monthly| monthly.checked_mul(Decimal::from(term_months)))
            .ok_or_else(|| overflow("loan capacity"))?;
        Ok(capacity.normalize())
    }

    pub fn evaluate(
        &self,
        input: &EligibilityInput,
    ) -> Result<EligibilityResult, EligibilityError> {
        let max_loan_capacity =
            self.max_capacity(input.monthly_income, input.monthly_expenses, input.term_months)?;

        Ok(EligibilityResult {
            debt_ratio_percent: compute_debt_ratio(input.monthly_income, input.monthly_expenses)?,
            monthly_payment: compute_monthly_payment(input.requested_amount, input.term_months),
            max_loan_capacity,
            eligible_amount: input.requested_amount.min(max_loan_capacity),
        })
    }
}

impl Default for EligibilityCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY_RATIO)
    }
}

fn round_half_up(value: Decimal) -> Result<Decimal, EligibilityError> {
    value
        .checked_add(Decimal::new(5, 1))
        .map(|shifted| shifted.floor())
        .ok_or_else(|| overflow("rounding"))
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{
        compute_debt_ratio, compute_eligibility, compute_max_capacity, compute_monthly_payment,
        EligibilityCalculator, EligibilityError, EligibilityInput,
    };
    use crate::errors::ErrorClass;

    fn dec(value: i64) -> Decimal {
        Decimal::from(value)
    }

    fn ratio(income: Decimal, expenses: Decimal) -> Decimal {
        compute_debt_ratio(income, expenses).expect("ratio computes")
    }

    fn capacity(income: Decimal, expenses: Decimal, term_months: u32) -> Decimal {
        compute_max_capacity(income, expenses, term_months).expect("capacity computes")
    }

    #[test]
    fn debt_ratio_is_surplus_share_of_income() {
        assert_eq!(ratio(dec(3000), dec(1500)), dec(50));
        assert_eq!(ratio(dec(2000), dec(1800)), dec(10));
    }

    #[test]
    fn debt_ratio_guards_zero_income() {
        assert_eq!(ratio(dec(0), dec(500)), dec(0));
    }

    #[test]
    fn debt_ratio_rounds_half_up() {
        // 1 / 8 * 100 = 12.5
        assert_eq!(ratio(dec(8), dec(7)), dec(13));
        // (3 - 2) / 3 * 100 = 33.33..
        assert_eq!(ratio(dec(3), dec(2)), dec(33));
        // expenses above income: -12.5 rounds toward +inf
        assert_eq!(ratio(dec(8), dec(9)), dec(-12));
    }

    #[test]
    fn monthly_payment_divides_without_interest() {
        assert_eq!(compute_monthly_payment(dec(5000), 12), Decimal::new(41667, 2));
        assert_eq!(compute_monthly_payment(dec(5000), 12).round(), dec(417));
        assert_eq!(compute_monthly_payment(dec(1200), 12), dec(100));
        assert_eq!(compute_monthly_payment(dec(1200), 0), dec(0));
    }

    #[test]
    fn max_capacity_commits_a_third_of_surplus() {
        assert_eq!(capacity(dec(3000), dec(1500), 60), dec(29700));
        assert_eq!(capacity(dec(2000), dec(1800), 12), dec(792));
    }

    #[test]
    fn max_capacity_never_goes_negative() {
        assert_eq!(capacity(dec(1000), dec(1500), 12), dec(0));
    }

    #[test]
    fn eligible_amount_is_capped_by_capacity() {
        let result = compute_eligibility(&EligibilityInput {
            monthly_income: dec(3000),
            monthly_expenses: dec(2500),
            requested_amount: dec(50000),
            term_months: 24,
        })
        .expect("evaluates");

        assert_eq!(result.max_loan_capacity, dec(3960));
        assert_eq!(result.eligible_amount, result.max_loan_capacity);
        assert_ne!(result.eligible_amount, dec(50000));
    }

    #[test]
    fn eligible_amount_keeps_request_when_within_capacity() {
        let result = compute_eligibility(&EligibilityInput {
            monthly_income: dec(3000),
            monthly_expenses: dec(1500),
            requested_amount: dec(10000),
            term_months: 60,
        })
        .expect("evaluates");

        assert_eq!(result.eligible_amount, dec(10000));
    }

    #[test]
    fn small_business_scenario() {
        let result = compute_eligibility(&EligibilityInput {
            monthly_income: dec(2000),
            monthly_expenses: dec(1800),
            requested_amount: dec(5000),
            term_months: 12,
        })
        .expect("evaluates");

        assert_eq!(result.debt_ratio_percent, dec(10));
        assert_eq!(result.monthly_payment.round(), dec(417));
        assert_eq!(result.max_loan_capacity, dec(792));
        assert_eq!(result.eligible_amount, dec(792));
    }

    #[test]
    fn custom_ratio_scales_capacity() {
        let calculator = EligibilityCalculator::new(Decimal::new(5, 1));
        assert_eq!(calculator.max_capacity(dec(2000), dec(1800), 12), Ok(dec(1200)));
    }

    #[test]
    fn oversized_figures_are_rejected_instead_of_overflowing() {
        let huge_income = Decimal::from_i128_with_scale(10_i128.pow(27), 0);

        let error = compute_max_capacity(huge_income, dec(0), 600).expect_err("overflows");
        assert!(matches!(error, EligibilityError::Overflow { .. }));
        assert_eq!(error.class(), ErrorClass::Validation);

        let tiny_income = Decimal::new(1, 2);
        let huge_expenses = Decimal::from_i128_with_scale(10_i128.pow(28), 0);
        assert!(compute_debt_ratio(tiny_income, huge_expenses).is_err());

        let result = compute_eligibility(&EligibilityInput {
            monthly_income: Decimal::from_i128_with_scale(10_i128.pow(20), 0),
            monthly_expenses: dec(0),
            requested_amount: dec(1),
            term_months: u32::MAX,
        });
        assert!(result.is_err());
    }
}
