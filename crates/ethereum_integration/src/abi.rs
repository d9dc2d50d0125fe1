//! Minimal ABI codec for the voting contract surface.
//!
//! Only the shapes this contract actually returns are supported: `bool`,
//! `uint256`, and the `(string,uint256)[]` candidate array. Decoding is
//! strict: unexpected layouts and out-of-range values are errors, never
//! silently coerced.

use sha3::{Digest, Keccak256};
use shared::domain::Address;
use thiserror::Error;

use crate::CandidateRecord;

const WORD: usize = 32;

#[derive(Debug, Error)]
pub enum AbiError {
    #[error("invalid hex payload: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("invalid hex quantity {0:?}")]
    Quantity(String),
    #[error("return data truncated: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("value at word {word} does not fit in u64")]
    Overflow { word: usize },
    #[error("malformed {what} in return data")]
    Malformed { what: &'static str },
    #[error("candidate name is not valid utf-8")]
    BadUtf8,
}

/// First four bytes of the keccak-256 hash of the function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = Keccak256::digest(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Parses a hex quantity such as `"0x3c"` (or bare `"3c"`) into a `u64`.
pub fn parse_quantity(raw: &str) -> Result<u64, AbiError> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    if digits.is_empty() {
        return Err(AbiError::Quantity(raw.to_string()));
    }
    u64::from_str_radix(digits, 16).map_err(|_| AbiError::Quantity(raw.to_string()))
}

pub fn encode_uint(value: u64) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 8..].copy_from_slice(&value.to_be_bytes());
    word
}

pub fn encode_address(address: &Address) -> Result<[u8; WORD], AbiError> {
    let digits = address.0.strip_prefix("0x").unwrap_or(&address.0);
    let bytes = hex::decode(digits)?;
    if bytes.len() != 20 {
        return Err(AbiError::Malformed { what: "address" });
    }
    let mut word = [0u8; WORD];
    word[WORD - 20..].copy_from_slice(&bytes);
    Ok(word)
}

/// Builds the `0x`-prefixed call data for `eth_call`/`eth_sendTransaction`.
pub fn call_data(signature: &str, args: &[[u8; WORD]]) -> String {
    let mut data = Vec::with_capacity(4 + args.len() * WORD);
    data.extend_from_slice(&selector(signature));
    for arg in args {
        data.extend_from_slice(arg);
    }
    format!("0x{}", hex::encode(data))
}

fn strip_hex(payload: &str) -> Result<Vec<u8>, AbiError> {
    let digits = payload.strip_prefix("0x").unwrap_or(payload);
    Ok(hex::decode(digits)?)
}

fn word_at(data: &[u8], word: usize) -> Result<&[u8], AbiError> {
    let start = word * WORD;
    let end = start + WORD;
    if data.len() < end {
        return Err(AbiError::Truncated {
            expected: end,
            actual: data.len(),
        });
    }
    Ok(&data[start..end])
}

fn decode_u64_word(data: &[u8], word: usize) -> Result<u64, AbiError> {
    let bytes = word_at(data, word)?;
    if bytes[..WORD - 8].iter().any(|b| *b != 0) {
        return Err(AbiError::Overflow { word });
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&bytes[WORD - 8..]);
    Ok(u64::from_be_bytes(tail))
}

fn decode_usize_word(data: &[u8], word: usize) -> Result<usize, AbiError> {
    Ok(decode_u64_word(data, word)? as usize)
}

/// Renders a 32-byte return word as a minimal `0x`-prefixed quantity string,
/// preserving values wider than `u64` for the caller's decode step to reject.
fn quantity_hex(word: &[u8]) -> String {
    let trimmed: Vec<u8> = word.iter().skip_while(|b| **b == 0).copied().collect();
    if trimmed.is_empty() {
        "0x0".to_string()
    } else {
        format!("0x{}", hex::encode(trimmed))
    }
}

pub fn decode_bool(payload: &str) -> Result<bool, AbiError> {
    let data = strip_hex(payload)?;
    Ok(decode_u64_word(&data, 0)? != 0)
}

/// Normalizes a single-word `uint256` return into a quantity string.
pub fn decode_quantity(payload: &str) -> Result<String, AbiError> {
    let data = strip_hex(payload)?;
    Ok(quantity_hex(word_at(&data, 0)?))
}

/// Decodes the `(string,uint256)[]` return of `getAllVotesOfCandiates`.
pub fn decode_candidate_records(payload: &str) -> Result<Vec<CandidateRecord>, AbiError> {
    let data = strip_hex(payload)?;
    let array_offset = decode_usize_word(&data, 0)?;
    let array = data.get(array_offset..).ok_or(AbiError::Malformed {
        what: "array offset",
    })?;
    let len = decode_usize_word(array, 0)?;
    let elements = &array[WORD..];

    let mut records = Vec::with_capacity(len);
    for position in 0..len {
        let element_offset = decode_usize_word(elements, position)?;
        let tuple = elements.get(element_offset..).ok_or(AbiError::Malformed {
            what: "tuple offset",
        })?;
        let name_offset = decode_usize_word(tuple, 0)?;
        let vote_word = word_at(tuple, 1)?;

        let name_region = tuple.get(name_offset..).ok_or(AbiError::Malformed {
            what: "string offset",
        })?;
        let name_len = decode_usize_word(name_region, 0)?;
        let name_end = WORD.checked_add(name_len).ok_or(AbiError::Malformed {
            what: "string length",
        })?;
        let name_bytes = name_region
            .get(WORD..name_end)
            .ok_or(AbiError::Malformed {
                what: "string length",
            })?;
        let name = std::str::from_utf8(name_bytes)
            .map_err(|_| AbiError::BadUtf8)?
            .to_string();

        records.push(CandidateRecord {
            name,
            vote_count: quantity_hex(vote_word),
        });
    }

    Ok(records)
}

#[cfg(test)]
#[path = "tests/abi_tests.rs"]
mod tests;
