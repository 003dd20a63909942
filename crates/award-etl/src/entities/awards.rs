//! Awards: the parent entity whose codes drive fan-out

use super::{CanonicalRecord, EntityKind};
use crate::{
    context::RawRecord,
    load::schema::{Column, ColumnType::*, SqlValue, TableSpec},
    transform::Transformer,
};
use award_etl_common::{coerce::*, CoerceError};
use chrono::NaiveDateTime;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Award {
    pub award_id: Option<i64>,
    pub award_fixed_id: i64,
    pub code: String,
    pub name: Option<String>,
    pub award_operative_from: Option<NaiveDateTime>,
    pub award_operative_to: Option<NaiveDateTime>,
    pub version_number: Option<i64>,
    pub last_modified_datetime: Option<NaiveDateTime>,
    pub published_year: i64,
}

impl CanonicalRecord for Award {
    const TABLE: &'static TableSpec = &TableSpec {
        name: "awards",
        columns: &[
            Column::new("award_id", Integer),
            Column::new("award_fixed_id", Integer),
            Column::new("code", Text),
            Column::new("name", Text),
            Column::new("award_operative_from", Timestamp),
            Column::new("award_operative_to", Timestamp),
            Column::new("version_number", Integer),
            Column::new("last_modified_datetime", Timestamp),
            Column::new("published_year", Integer),
        ],
        key_columns: &["award_fixed_id", "published_year"],
    };

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.award_id.into(),
            self.award_fixed_id.into(),
            self.code.as_str().into(),
            (&self.name).into(),
            self.award_operative_from.into(),
            self.award_operative_to.into(),
            self.version_number.into(),
            self.last_modified_datetime.into(),
            self.published_year.into(),
        ]
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AwardsTransformer;

impl Transformer for AwardsTransformer {
    type Output = Award;

    fn entity(&self) -> EntityKind {
        EntityKind::Awards
    }

    fn transform_record(&self, raw: &RawRecord) -> Result<Award, CoerceError> {
        Ok(Award {
            award_id: to_int(field(raw, "award_id")),
            award_fixed_id: require_int(raw, "award_fixed_id")?,
            code: require_string(raw, "code", Some(50))?,
            name: clean_string(field(raw, "name"), Some(500)),
            award_operative_from: to_datetime(field(raw, "award_operative_from")),
            award_operative_to: to_datetime(field(raw, "award_operative_to")),
            version_number: to_int(field(raw, "version_number")),
            last_modified_datetime: to_datetime(field(raw, "last_modified_datetime")),
            published_year: require_int(raw, "published_year")?,
        })
    }
}
