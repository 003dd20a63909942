//! Transformer role: untyped records in, canonical records out

use crate::{
    context::{PipelineContext, RawRecord, RecordError},
    entities::{CanonicalRecord, EntityKind},
};
use award_etl_common::CoerceError;
use tracing::{debug, warn};

/// Converts raw records of one entity type into its canonical form
///
/// Implementors only describe a single record. A record that fails is
/// recorded against its index in the context and left out of the output;
/// the rest of the batch carries on.
pub trait Transformer: Send + Sync {
    type Output: CanonicalRecord;

    fn entity(&self) -> EntityKind;

    fn transform_record(&self, raw: &RawRecord) -> Result<Self::Output, CoerceError>;

    fn transform(&self, raw: &[RawRecord], ctx: &mut PipelineContext) -> Vec<Self::Output> {
        let mut output = Vec::with_capacity(raw.len());

        for (index, record) in raw.iter().enumerate() {
            match self.transform_record(record) {
                Ok(canonical) => output.push(canonical),
                Err(e) => {
                    warn!(
                        job_id = %ctx.job_id,
                        entity = %self.entity(),
                        index,
                        error = %e,
                        "Dropping record that failed transformation"
                    );
                    ctx.record_error(RecordError::new(index, e));
                },
            }
        }

        debug!(
            entity = %self.entity(),
            input = raw.len(),
            output = output.len(),
            "Transformed batch"
        );
        output
    }
}
