//! Compact wire form of partial results
//!
//! A partial result crosses the job boundary as a JSON document:
//!
//! ```json
//! {"partition":3,"k":5,"entries":[[42,"120.50"],[7,"-3.10"]]}
//! ```
//!
//! Totals travel as decimal strings so scale and sign survive exactly.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::errors::MarshalError;
use super::types::{AggregationJob, KeyTotal, PartialResult};
use crate::storage::{EntityKey, PartitionId};

#[derive(Debug, Serialize, Deserialize)]
struct WirePartial {
    partition: PartitionId,
    k: usize,
    entries: Vec<(EntityKey, String)>,
}

/// Encodes and decodes partial results for transport
pub struct ResultMarshaler;

impl ResultMarshaler {
    /// Encode a partial result, preserving entry order
    pub fn encode(partial: &PartialResult) -> Result<Vec<u8>, MarshalError> {
        let wire = WirePartial {
            partition: partial.partition(),
            k: partial.k(),
            entries: partial
                .entries()
                .iter()
                .map(|e| (e.entity_key, e.total.to_string()))
                .collect(),
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    /// Decode a payload produced by [`ResultMarshaler::encode`]
    pub fn decode(bytes: &[u8]) -> Result<PartialResult, MarshalError> {
        let wire: WirePartial = serde_json::from_slice(bytes)?;

        if wire.entries.len() > wire.k {
            return Err(MarshalError::TooManyEntries {
                len: wire.entries.len(),
                k: wire.k,
            });
        }

        let mut seen = HashSet::with_capacity(wire.entries.len());
        let mut entries = Vec::with_capacity(wire.entries.len());
        for (entity_key, value) in wire.entries {
            if !seen.insert(entity_key) {
                return Err(MarshalError::DuplicateEntity(entity_key));
            }
            let total = Decimal::from_str_exact(&value)
                .map_err(|_| MarshalError::InvalidDecimal { entity_key, value })?;
            entries.push(KeyTotal::new(entity_key, total));
        }

        Ok(PartialResult::new(wire.partition, wire.k, entries))
    }

    /// Decode a payload and check it answers `job`
    pub fn decode_for(job: &AggregationJob, bytes: &[u8]) -> Result<PartialResult, MarshalError> {
        let partial = Self::decode(bytes)?;
        if partial.partition() != job.partition || partial.k() != job.k {
            return Err(MarshalError::UnexpectedJob {
                expected: job.partition,
                expected_k: job.k,
                found: partial.partition(),
                found_k: partial.k(),
            });
        }
        Ok(partial)
    }
}
