//! Classifications within an award

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
pub struct Classification {
    pub classification_fixed_id: i64,
    pub award_code: String,
    pub classification: Option<String>,
    pub classification_level: Option<i64>,
    pub parent_classification_name: Option<String>,
    pub employee_rate_type_code: Option<String>,
    pub operative_from: Option<NaiveDateTime>,
    pub operative_to: Option<NaiveDateTime>,
    pub version_number: Option<i64>,
    pub published_year: i64,
    pub last_modified_datetime: Option<NaiveDateTime>,
}

impl CanonicalRecord for Classification {
    const TABLE: &'static TableSpec = &TableSpec {
        name: "classifications",
        columns: &[
            Column::new("classification_fixed_id", Integer),
            Column::new("award_code", Text),
            Column::new("classification", Text),
            Column::new("classification_level", Integer),
            Column::new("parent_classification_name", Text),
            Column::new("employee_rate_type_code", Text),
            Column::new("operative_from", Timestamp),
            Column::new("operative_to", Timestamp),
            Column::new("version_number", Integer),
            Column::new("published_year", Integer),
            Column::new("last_modified_datetime", Timestamp),
        ],
        key_columns: &["classification_fixed_id", "award_code", "published_year"],
    };

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.classification_fixed_id.into(),
            self.award_code.as_str().into(),
            (&self.classification).into(),
            self.classification_level.into(),
            (&self.parent_classification_name).into(),
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
pub struct ClassificationsTransformer;

impl Transformer for ClassificationsTransformer {
    type Output = Classification;

    fn entity(&self) -> EntityKind {
        EntityKind::Classifications
    }

    fn transform_record(&self, raw: &RawRecord) -> Result<Classification, CoerceError> {
        Ok(Classification {
            classification_fixed_id: require_int(raw, "classification_fixed_id")?,
            award_code: require_string(raw, PARENT_FIELD, Some(50))?,
            classification: clean_string(field(raw, "classification"), Some(500)),
            classification_level: to_int(field(raw, "classification_level")),
            parent_classification_name: clean_string(
                field(raw, "parent_classification_name"),
                Some(500),
            ),
            employee_rate_type_code: clean_string(field(raw, "employee_rate_type_code"), Some(20)),
            operative_from: to_datetime(field(raw, "operative_from")),
            operative_to: to_datetime(field(raw, "operative_to")),
            version_number: to_int(field(raw, "version_number")),
            published_year: require_int(raw, "published_year")?,
            last_modified_datetime: to_datetime(field(raw, "last_modified_datetime")),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transform_record() {
        let raw = json!({
            "classification_fixed_id": "98",
            "award_code": "MA000002",
            "classification": "Level 1",
            "classification_level": 1.0,
            "employee_rate_type_code": "AD",
            "operative_from": "01/07/2024",
            "published_year": "2024",
        });
        let record = ClassificationsTransformer
            .transform_record(raw.as_object().unwrap())
            .unwrap();

        assert_eq!(record.classification_fixed_id, 98);
        assert_eq!(record.classification_level, Some(1));
        assert_eq!(record.parent_classification_name, None);
        assert_eq!(
            SqlValue::timestamp_text(&record.operative_from).as_deref(),
            Some("2024-07-01 00:00:00")
        );
        assert_eq!(record.values().len(), Classification::TABLE.columns.len());
    }

    #[test]
    fn test_missing_award_code() {
        let raw = json!({ "classification_fixed_id": 1, "published_year": 2024 });
        let err = ClassificationsTransformer
            .transform_record(raw.as_object().unwrap())
            .unwrap_err();
        assert_eq!(err.field(), "award_code");
    }
}
