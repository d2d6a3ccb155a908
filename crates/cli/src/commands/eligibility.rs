use rust_decimal::Decimal;
use verifly_core::config::{AppConfig, LoadOptions};
use verifly_core::eligibility::{EligibilityCalculator, EligibilityInput};

use crate::commands::CommandResult;

pub fn run(income: Decimal, expenses: Decimal, amount: Decimal, term_months: u32) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return CommandResult::config_failure("eligibility", error),
    };

    if let Some(field) = [("income", income), ("expenses", expenses), ("amount", amount)]
        .into_iter()
        .find_map(|(field, value)| value.is_sign_negative().then_some(field))
    {
        return CommandResult::failure(
            "eligibility",
            "validation",
            format!("`{field}` must not be negative"),
            1,
        );
    }

    let calculator = EligibilityCalculator::new(config.eligibility.capacity_ratio);
    let evaluated = calculator.evaluate(&EligibilityInput {
        monthly_income: income,
        monthly_expenses: expenses,
        requested_amount: amount,
        term_months,
    });
    let result = match evaluated {
        Ok(result) => result,
        Err(error) => {
            return CommandResult::failure(
                "eligibility",
                error.class().as_str(),
                error.to_string(),
                1,
            );
        }
    };

    tracing::debug!(
        event_name = "kyc.eligibility.evaluated",
        eligible_amount = %result.eligible_amount,
        max_loan_capacity = %result.max_loan_capacity,
    );
    CommandResult::data("eligibility", result)
}
