//! Penalty rates (weekend, overtime, shift loadings)

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
pub struct Penalty {
    pub penalty_fixed_id: i64,
    pub award_code: String,
    pub clause_fixed_id: Option<i64>,
    pub clause_description: Option<String>,
    pub classification_level: Option<i64>,
    pub penalty_description: Option<String>,
    pub rate: Option<f64>,
    pub employee_rate_type_code: Option<String>,
    pub penalty_calculated_value: Option<f64>,
    pub calculated_includes_all_purpose: Option<bool>,
    pub base_pay_rate_id: Option<String>,
    pub operative_from: NaiveDateTime,
    pub operative_to: Option<NaiveDateTime>,
    pub version_number: Option<i64>,
    pub last_modified_datetime: Option<NaiveDateTime>,
    pub published_year: Option<i64>,
}

impl CanonicalRecord for Penalty {
    const TABLE: &'static TableSpec = &TableSpec {
        name: "penalties",
        columns: &[
            Column::new("penalty_fixed_id", Integer),
            Column::new("award_code", Text),
            Column::new("clause_fixed_id", Integer),
            Column::new("clause_description", Text),
            Column::new("classification_level", Integer),
            Column::new("penalty_description", Text),
            Column::new("rate", Float),
            Column::new("employee_rate_type_code", Text),
            Column::new("penalty_calculated_value", Float),
            Column::new("calculated_includes_all_purpose", Boolean),
            Column::new("base_pay_rate_id", Text),
            Column::new("operative_from", Timestamp),
            Column::new("operative_to", Timestamp),
            Column::new("version_number", Integer),
            Column::new("last_modified_datetime", Timestamp),
            Column::new("published_year", Integer),
        ],
        key_columns: &["penalty_fixed_id", "award_code", "operative_from"],
    };

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.penalty_fixed_id.into(),
            self.award_code.as_str().into(),
            self.clause_fixed_id.into(),
            (&self.clause_description).into(),
            self.classification_level.into(),
            (&self.penalty_description).into(),
            self.rate.into(),
            (&self.employee_rate_type_code).into(),
            self.penalty_calculated_value.into(),
            self.calculated_includes_all_purpose.into(),
            (&self.base_pay_rate_id).into(),
            self.operative_from.into(),
            self.operative_to.into(),
            self.version_number.into(),
            self.last_modified_datetime.into(),
            self.published_year.into(),
        ]
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PenaltiesTransformer;

impl Transformer for PenaltiesTransformer {
    type Output = Penalty;

    fn entity(&self) -> EntityKind {
        EntityKind::Penalties
    }

    fn transform_record(&self, raw: &RawRecord) -> Result<Penalty, CoerceError> {
        let text = |name: &str, max: usize| clean_string(field(raw, name), Some(max));

        Ok(Penalty {
            penalty_fixed_id: require_int(raw, "penalty_fixed_id")?,
            award_code: require_string(raw, PARENT_FIELD, Some(50))?,
            clause_fixed_id: to_int(field(raw, "clause_fixed_id")),
            clause_description: text("clause_description", 2000),
            // older payloads only carry the classification's fixed id
            classification_level: to_int(first_present(
                raw,
                &["classification_level", "classification_fixed_id"],
            )),
            penalty_description: text("penalty_description", 1000),
            rate: to_float(first_present(raw, &["rate", "penalty_rate"])),
            employee_rate_type_code: text("employee_rate_type_code", 20),
            penalty_calculated_value: to_float(field(raw, "penalty_calculated_value")),
            calculated_includes_all_purpose: to_bool(field(raw, "calculated_includes_all_purpose")),
            base_pay_rate_id: text("base_pay_rate_id", 50),
            operative_from: require_datetime(raw, "operative_from")?,
            operative_to: to_datetime(field(raw, "operative_to")),
            version_number: to_int(field(raw, "version_number")),
            last_modified_datetime: to_datetime(field(raw, "last_modified_datetime")),
            published_year: to_int(field(raw, "published_year")),
        })
    }
}
