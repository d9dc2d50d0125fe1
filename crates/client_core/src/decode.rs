//! Decoding from contract-native candidate records to display rows.

use ethereum_integration::{
    abi::{parse_quantity, AbiError},
    CandidateRecord,
};
use shared::domain::Candidate;
use thiserror::Error;

/// Display placeholder for candidates the contract stored without a name.
pub const UNKNOWN_CANDIDATE_NAME: &str = "Unknown";

#[derive(Debug, Error)]
pub enum CandidateDecodeError {
    #[error("candidate {index} has an invalid vote count: {source}")]
    InvalidVoteCount {
        index: u64,
        #[source]
        source: AbiError,
    },
}

/// The single decoding step for the candidate board. Blank names get the
/// display placeholder; an undecodable vote count fails the whole batch
/// instead of being coerced to zero.
pub fn candidates_from_records(
    records: Vec<CandidateRecord>,
) -> Result<Vec<Candidate>, CandidateDecodeError> {
    records
        .into_iter()
        .enumerate()
        .map(|(index, record)| {
            let index = index as u64;
            let vote_count = parse_quantity(&record.vote_count)
                .map_err(|source| CandidateDecodeError::InvalidVoteCount { index, source })?;
            let name = if record.name.trim().is_empty() {
                UNKNOWN_CANDIDATE_NAME.to_string()
            } else {
                record.name
            };
            Ok(Candidate {
                index,
                name,
                vote_count,
            })
        })
        .collect()
}

#[cfg(test)]
#[path = "tests/decode_tests.rs"]
mod tests;
