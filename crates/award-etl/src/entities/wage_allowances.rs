//! Wage allowances (amounts paid as part of wages, often a rate of a base pay)

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
pub struct WageAllowance {
    pub wage_allowance_fixed_id: i64,
    pub award_code: String,
    pub clause_fixed_id: Option<i64>,
    pub clauses: Option<String>,
    pub parent_allowance: Option<String>,
    pub allowance: Option<String>,
    pub is_all_purpose: Option<bool>,
    pub rate: Option<f64>,
    pub rate_unit: Option<String>,
    pub base_pay_rate_id: Option<String>,
    pub allowance_amount: Option<f64>,
    pub payment_frequency: Option<String>,
    pub operative_from: NaiveDateTime,
    pub operative_to: Option<NaiveDateTime>,
    pub version_number: Option<i64>,
    pub last_modified_datetime: Option<NaiveDateTime>,
    pub published_year: Option<i64>,
}

impl CanonicalRecord for WageAllowance {
    const TABLE: &'static TableSpec = &TableSpec {
        name: "wage_allowances",
        columns: &[
            Column::new("wage_allowance_fixed_id", Integer),
            Column::new("award_code", Text),
            Column::new("clause_fixed_id", Integer),
            Column::new("clauses", Text),
            Column::new("parent_allowance", Text),
            Column::new("allowance", Text),
            Column::new("is_all_purpose", Boolean),
            Column::new("rate", Float),
            Column::new("rate_unit", Text),
            Column::new("base_pay_rate_id", Text),
            Column::new("allowance_amount", Float),
            Column::new("payment_frequency", Text),
            Column::new("operative_from", Timestamp),
            Column::new("operative_to", Timestamp),
            Column::new("version_number", Integer),
            Column::new("last_modified_datetime", Timestamp),
            Column::new("published_year", Integer),
        ],
        key_columns: &["wage_allowance_fixed_id", "award_code", "operative_from"],
    };

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.wage_allowance_fixed_id.into(),
            self.award_code.as_str().into(),
            self.clause_fixed_id.into(),
            (&self.clauses).into(),
            (&self.parent_allowance).into(),
            (&self.allowance).into(),
            self.is_all_purpose.into(),
            self.rate.into(),
            (&self.rate_unit).into(),
            (&self.base_pay_rate_id).into(),
            self.allowance_amount.into(),
            (&self.payment_frequency).into(),
            self.operative_from.into(),
            self.operative_to.into(),
            self.version_number.into(),
            self.last_modified_datetime.into(),
            self.published_year.into(),
        ]
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WageAllowancesTransformer;

impl Transformer for WageAllowancesTransformer {
    type Output = WageAllowance;

    fn entity(&self) -> EntityKind {
        EntityKind::WageAllowances
    }

    fn transform_record(&self, raw: &RawRecord) -> Result<WageAllowance, CoerceError> {
        let text = |name: &str, max: usize| clean_string(field(raw, name), Some(max));

        Ok(WageAllowance {
            wage_allowance_fixed_id: require_int(raw, "wage_allowance_fixed_id")?,
            award_code: require_string(raw, PARENT_FIELD, Some(50))?,
            clause_fixed_id: to_int(field(raw, "clause_fixed_id")),
            clauses: text("clauses", 500),
            parent_allowance: text("parent_allowance", 500),
            allowance: text("allowance", 500),
            is_all_purpose: Some(to_bool(field(raw, "is_all_purpose")).unwrap_or(false)),
            rate: to_float(field(raw, "rate")),
            rate_unit: text("rate_unit", 50),
            base_pay_rate_id: text("base_pay_rate_id", 50),
            allowance_amount: to_float(field(raw, "allowance_amount")),
            payment_frequency: text("payment_frequency", 100),
            operative_from: require_datetime(raw, "operative_from")?,
            operative_to: to_datetime(field(raw, "operative_to")),
            version_number: to_int(field(raw, "version_number")),
            last_modified_datetime: to_datetime(field(raw, "last_modified_datetime")),
            published_year: to_int(field(raw, "published_year")),
        })
    }
}
