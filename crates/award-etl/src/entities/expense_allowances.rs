//! Expense allowances (reimbursements such as meal or travel allowances)

use super::{CanonicalRecord, EntityKind, PARENT_FIELD};
use crate::{
    context::RawRecord,
    load::schema::{Column, ColumnType::*, SqlValue, TableSpec},
    transform::Transformer,
};
use award_etl_common::{coerce::*, CoerceError};
use chrono::NaiveDateTime;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpenseAllowance {
    pub expense_allowance_fixed_id: i64,
    pub award_code: String,
    pub clause_fixed_id: Option<i64>,
    pub clauses: Option<String>,
    pub parent_allowance: Option<String>,
    pub allowance: Option<String>,
    pub is_all_purpose: Option<bool>,
    pub allowance_amount: Option<f64>,
    pub payment_frequency: Option<String>,
    pub last_adjusted_year: Option<i64>,
    pub cpi_quarter_last_adjusted: Option<String>,
    pub operative_from: NaiveDateTime,
    pub operative_to: Option<NaiveDateTime>,
    pub version_number: Option<i64>,
    pub last_modified_datetime: Option<NaiveDateTime>,
    pub published_year: Option<i64>,
}

impl CanonicalRecord for ExpenseAllowance {
    const TABLE: &'static TableSpec = &TableSpec {
        name: "expense_allowances",
        columns: &[
            Column::new("expense_allowance_fixed_id", Integer),
            Column::new("award_code", Text),
            Column::new("clause_fixed_id", Integer),
            Column::new("clauses", Text),
            Column::new("parent_allowance", Text),
            Column::new("allowance", Text),
            Column::new("is_all_purpose", Boolean),
            Column::new("allowance_amount", Float),
            Column::new("payment_frequency", Text),
            Column::new("last_adjusted_year", Integer),
            Column::new("cpi_quarter_last_adjusted", Text),
            Column::new("operative_from", Timestamp),
            Column::new("operative_to", Timestamp),
            Column::new("version_number", Integer),
            Column::new("last_modified_datetime", Timestamp),
            Column::new("published_year", Integer),
        ],
        key_columns: &["expense_allowance_fixed_id", "award_code", "operative_from"],
    };

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.expense_allowance_fixed_id.into(),
            self.award_code.as_str().into(),
            self.clause_fixed_id.into(),
            (&self.clauses).into(),
            (&self.parent_allowance).into(),
            (&self.allowance).into(),
            self.is_all_purpose.into(),
            self.allowance_amount.into(),
            (&self.payment_frequency).into(),
            self.last_adjusted_year.into(),
            (&self.cpi_quarter_last_adjusted).into(),
            self.operative_from.into(),
            self.operative_to.into(),
            self.version_number.into(),
            self.last_modified_datetime.into(),
            self.published_year.into(),
        ]
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ExpenseAllowancesTransformer;

impl Transformer for ExpenseAllowancesTransformer {
    type Output = ExpenseAllowance;

    fn entity(&self) -> EntityKind {
        EntityKind::ExpenseAllowances
    }

    fn transform_record(&self, raw: &RawRecord) -> Result<ExpenseAllowance, CoerceError> {
        let text = |name: &str, max: usize| clean_string(field(raw, name), Some(max));

        Ok(ExpenseAllowance {
            expense_allowance_fixed_id: require_int(raw, "expense_allowance_fixed_id")?,
            award_code: require_string(raw, PARENT_FIELD, Some(50))?,
            clause_fixed_id: to_int(field(raw, "clause_fixed_id")),
            clauses: text("clauses", 500),
            parent_allowance: text("parent_allowance", 500),
            allowance: text("allowance", 500),
            is_all_purpose: Some(to_bool(field(raw, "is_all_purpose")).unwrap_or(false)),
            allowance_amount: to_float(field(raw, "allowance_amount")),
            payment_frequency: text("payment_frequency", 100),
            last_adjusted_year: to_int(field(raw, "last_adjusted_year")),
            cpi_quarter_last_adjusted: text("cpi_quarter_last_adjusted", 50),
            operative_from: require_datetime(raw, "operative_from")?,
            operative_to: to_datetime(field(raw, "operative_to")),
            version_number: to_int(field(raw, "version_number")),
            last_modified_datetime: to_datetime(field(raw, "last_modified_datetime")),
            published_year: to_int(field(raw, "published_year")),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_all_purpose_defaults_to_false() {
        let raw = json!({
            "expense_allowance_fixed_id": 501,
            "award_code": "MA000020",
            "allowance": "Meal allowance",
            "allowance_amount": 16.73,
            "payment_frequency": "per meal",
            "operative_from": "2024-07-01",
        });
        let allowance = ExpenseAllowancesTransformer
            .transform_record(raw.as_object().unwrap())
            .unwrap();

        assert_eq!(allowance.is_all_purpose, Some(false));
        assert_eq!(allowance.allowance_amount, Some(16.73));
        assert_eq!(allowance.values().len(), ExpenseAllowance::TABLE.columns.len());
    }

    #[test]
    fn test_all_purpose_spellings() {
        let raw = json!({
            "expense_allowance_fixed_id": 501,
            "award_code": "MA000020",
            "is_all_purpose": "Yes",
            "operative_from": "2024-07-01",
        });
        let allowance = ExpenseAllowancesTransformer
            .transform_record(raw.as_object().unwrap())
            .unwrap();
        assert_eq!(allowance.is_all_purpose, Some(true));
    }
}
