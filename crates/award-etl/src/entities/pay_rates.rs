//! Base and calculated pay rates per classification

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
pub struct PayRate {
    pub classification_fixed_id: i64,
    pub award_code: String,
    pub base_pay_rate_id: Option<String>,
    pub base_rate_type: Option<String>,
    pub base_rate: Option<f64>,
    pub calculated_pay_rate_id: Option<String>,
    pub calculated_rate_type: Option<String>,
    pub calculated_rate: Option<f64>,
    pub parent_classification_name: Option<String>,
    pub classification: Option<String>,
    pub classification_level: Option<i64>,
    pub employee_rate_type_code: Option<String>,
    pub operative_from: NaiveDateTime,
    pub operative_to: Option<NaiveDateTime>,
    pub version_number: Option<i64>,
    pub published_year: Option<i64>,
    pub last_modified_datetime: Option<NaiveDateTime>,
}

impl CanonicalRecord for PayRate {
    const TABLE: &'static TableSpec = &TableSpec {
        name: "pay_rates",
        columns: &[
            Column::new("classification_fixed_id", Integer),
            Column::new("award_code", Text),
            Column::new("base_pay_rate_id", Text),
            Column::new("base_rate_type", Text),
            Column::new("base_rate", Float),
            Column::new("calculated_pay_rate_id", Text),
            Column::new("calculated_rate_type", Text),
            Column::new("calculated_rate", Float),
            Column::new("parent_classification_name", Text),
            Column::new("classification", Text),
            Column::new("classification_level", Integer),
            Column::new("employee_rate_type_code", Text),
            Column::new("operative_from", Timestamp),
            Column::new("operative_to", Timestamp),
            Column::new("version_number", Integer),
            Column::new("published_year", Integer),
            Column::new("last_modified_datetime", Timestamp),
        ],
        key_columns: &["classification_fixed_id", "award_code", "operative_from"],
    };

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.classification_fixed_id.into(),
            self.award_code.as_str().into(),
            (&self.base_pay_rate_id).into(),
            (&self.base_rate_type).into(),
            self.base_rate.into(),
            (&self.calculated_pay_rate_id).into(),
            (&self.calculated_rate_type).into(),
            self.calculated_rate.into(),
            (&self.parent_classification_name).into(),
            (&self.classification).into(),
            self.classification_level.into(),
            (&self.employee_rate_type_code).into(),
            self.operative_from.into(),
            self.operative_to.into(),
            self.version_number.into(),
            self.published_year.into(),
            self.last_modified_datetime.into(),
        ]
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PayRatesTransformer;

impl Transformer for PayRatesTransformer {
    type Output = PayRate;

    fn entity(&self) -> EntityKind {
        EntityKind::PayRates
    }

    fn transform_record(&self, raw: &RawRecord) -> Result<PayRate, CoerceError> {
        let text = |name: &str, max: usize| clean_string(field(raw, name), Some(max));

        Ok(PayRate {
            classification_fixed_id: require_int(raw, "classification_fixed_id")?,
            award_code: require_string(raw, PARENT_FIELD, Some(50))?,
            base_pay_rate_id: text("base_pay_rate_id", 50),
            base_rate_type: text("base_rate_type", 50),
            base_rate: to_float(field(raw, "base_rate")),
            calculated_pay_rate_id: text("calculated_pay_rate_id", 50),
            calculated_rate_type: text("calculated_rate_type", 50),
            calculated_rate: to_float(field(raw, "calculated_rate")),
            parent_classification_name: text("parent_classification_name", 500),
            classification: text("classification", 500),
            classification_level: to_int(field(raw, "classification_level")),
            employee_rate_type_code: text("employee_rate_type_code", 20),
            operative_from: require_datetime(raw, "operative_from")?,
            operative_to: to_datetime(field(raw, "operative_to")),
            version_number: to_int(field(raw, "version_number")),
            published_year: to_int(field(raw, "published_year")),
            last_modified_datetime: to_datetime(field(raw, "last_modified_datetime")),
        })
    }
}
