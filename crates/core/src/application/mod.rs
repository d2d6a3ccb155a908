pub mod credit;
pub mod form;

pub use credit::CreditApplication;
pub use form::{
    ApplicationFormController, FieldDefinition, FieldKind, FieldValue, FormError, FormStep,
};
