//! Entity catalogue
//!
//! Each entity module pairs a canonical record struct (the typed row written
//! to the destination) with its table description and transformer.

pub mod awards;
pub mod classifications;
pub mod expense_allowances;
pub mod pay_rates;
pub mod penalties;
pub mod wage_allowances;

use crate::{error::EtlError, load::schema::{SqlValue, TableSpec}};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use awards::{Award, AwardsTransformer};
pub use classifications::{Classification, ClassificationsTransformer};
pub use expense_allowances::{ExpenseAllowance, ExpenseAllowancesTransformer};
pub use pay_rates::{PayRate, PayRatesTransformer};
pub use penalties::{Penalty, PenaltiesTransformer};
pub use wage_allowances::{WageAllowance, WageAllowancesTransformer};

/// Field that tags child records with their parent award
pub const PARENT_FIELD: &str = "award_code";

/// Entity types known to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Awards,
    Classifications,
    PayRates,
    ExpenseAllowances,
    WageAllowances,
    Penalties,
}

impl EntityKind {
    /// Child entities in processing order
    pub const CHILDREN: [EntityKind; 5] = [
        EntityKind::Classifications,
        EntityKind::PayRates,
        EntityKind::ExpenseAllowances,
        EntityKind::WageAllowances,
        EntityKind::Penalties,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Awards => "awards",
            EntityKind::Classifications => "classifications",
            EntityKind::PayRates => "pay_rates",
            EntityKind::ExpenseAllowances => "expense_allowances",
            EntityKind::WageAllowances => "wage_allowances",
            EntityKind::Penalties => "penalties",
        }
    }

    /// Whether records of this kind are scoped to one award
    pub fn is_child(self) -> bool {
        self != EntityKind::Awards
    }

    /// Endpoint path relative to the API base URL
    pub fn path(self, award_code: Option<&str>) -> Result<String, EtlError> {
        let segment = match self {
            EntityKind::Awards => return Ok("/awards".to_string()),
            EntityKind::Classifications => "classifications",
            EntityKind::PayRates => "pay-rates",
            EntityKind::ExpenseAllowances => "expense-allowances",
            EntityKind::WageAllowances => "wage-allowances",
            EntityKind::Penalties => "penalties",
        };
        let code = award_code.ok_or(EtlError::MissingParameter(PARENT_FIELD))?;
        Ok(format!("/awards/{code}/{segment}"))
    }

    pub fn table(self) -> &'static TableSpec {
        match self {
            EntityKind::Awards => Award::TABLE,
            EntityKind::Classifications => Classification::TABLE,
            EntityKind::PayRates => PayRate::TABLE,
            EntityKind::ExpenseAllowances => ExpenseAllowance::TABLE,
            EntityKind::WageAllowances => WageAllowance::TABLE,
            EntityKind::Penalties => Penalty::TABLE,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "awards" => Ok(EntityKind::Awards),
            "classifications" => Ok(EntityKind::Classifications),
            "pay_rates" => Ok(EntityKind::PayRates),
            "expense_allowances" => Ok(EntityKind::ExpenseAllowances),
            "wage_allowances" => Ok(EntityKind::WageAllowances),
            "penalties" => Ok(EntityKind::Penalties),
            _ => Err(EtlError::UnknownEntity(s.to_string())),
        }
    }
}

/// A typed row ready for the loader
pub trait CanonicalRecord: Serialize + Send + Sync {
    const TABLE: &'static TableSpec;

    /// Values in [`TableSpec::columns`] order
    fn values(&self) -> Vec<SqlValue>;
}
