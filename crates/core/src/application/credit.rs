use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::{Map, Value};

use crate::application::form::{ApplicationFormController, FieldDefinition, FormError, FormStep};
use crate::eligibility::{
    EligibilityCalculator, EligibilityError, EligibilityInput, EligibilityResult,
};
use crate::errors::EngineError;

pub const MONTHLY_INCOME: &str = "monthly_income";
pub const MONTHLY_EXPENSES: &str = "monthly_expenses";
pub const REQUESTED_AMOUNT: &str = "requested_amount";
pub const TERM_MONTHS: &str = "term_months";

/// The credit application flow: the multi-step form plus a live eligibility preview.
pub struct CreditApplication {
    form: ApplicationFormController,
    calculator: EligibilityCalculator,
}

impl CreditApplication {
    pub fn new(calculator: EligibilityCalculator) -> Result<Self, FormError> {
        Ok(Self { form: ApplicationFormController::new(Self::standard_steps())?, calculator })
    }

    pub fn with_form(form: ApplicationFormController, calculator: EligibilityCalculator) -> Self {
        Self { form, calculator }
    }

    pub fn standard_steps() -> Vec<FormStep> {
        vec![
            FormStep::new(
                "Business",
                vec![
                    FieldDefinition::text("company_name"),
                    FieldDefinition::text("tax_id"),
                    FieldDefinition::text("industry").optional(),
                ],
            ),
            FormStep::new(
                "Finances",
                vec![
                    FieldDefinition::text(MONTHLY_INCOME),
                    FieldDefinition::text(MONTHLY_EXPENSES),
                ],
            ),
            FormStep::new(
                "Loan",
                vec![
                    FieldDefinition::text(REQUESTED_AMOUNT),
                    FieldDefinition::text(TERM_MONTHS),
                    FieldDefinition::text("purpose").optional(),
                ],
            ),
            FormStep::new(
                "Consent",
                vec![
                    FieldDefinition::text("email"),
                    FieldDefinition::text("email_confirmation").confirming("email"),
                    FieldDefinition::boolean("accept_terms"),
                ],
            ),
        ]
    }

    pub fn form(&self) -> &ApplicationFormController {
        &self.form
    }

    pub fn form_mut(&mut self) -> &mut ApplicationFormController {
        &mut self.form
    }

    /// Eligibility for the figures entered so far, or `None` while any of them is missing
    /// or unparseable. Figures too large to evaluate are an error.
    pub fn eligibility_preview(&self) -> Result<Option<EligibilityResult>, EligibilityError> {
        let Some(input) = self.entered_figures() else {
            return Ok(None);
        };
        self.calculator.evaluate(&input).map(Some)
    }

    /// The finalized form payload with the eligibility result under `eligibility`.
    pub fn submission_payload(&self) -> Result<Map<String, Value>, EngineError> {
        let mut payload = self.form.finalize()?;
        if let Some(result) = self.eligibility_preview()? {
            if let Ok(value) = serde_json::to_value(result) {
                payload.insert("eligibility".to_string(), value);
            }
        }
        Ok(payload)
    }

    fn entered_figures(&self) -> Option<EligibilityInput> {
        Some(EligibilityInput {
            monthly_income: self.decimal(MONTHLY_INCOME)?,
            monthly_expenses: self.decimal(MONTHLY_EXPENSES)?,
            requested_amount: self.decimal(REQUESTED_AMOUNT)?,
            term_months: self.text(TERM_MONTHS)?.parse().ok()?,
        })
    }

    fn text(&self, field: &str) -> Option<&str> {
        let value = self.form.value(field)?.as_text()?.trim();
        (!value.is_empty()).then_some(value)
    }

    fn decimal(&self, field: &str) -> Option<Decimal> {
        Decimal::from_str(self.text(field)?).ok()
    }
}
