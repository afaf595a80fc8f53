//! Decoding of the signed transactions attached to spent outputs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub hash: String,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub amount: String,
    pub keys: Vec<String>,
    pub script: String,
}

/// The threshold signature of the group, once enough members signed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedSignature {
    /// Index of the signers among the members
    pub signers: Vec<u16>,
    pub signature: String,
}

/// A version of a transaction, as exchanged between the members while gathering signatures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionVersion {
    pub version: u8,
    pub asset: String,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    /// Base64 of the JSON-encoded [ExtraMemo]
    pub extra: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregated_signature: Option<AggregatedSignature>,
}

impl TransactionVersion {
    /// Serialize this version in the format we got it in.
    pub fn marshal(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("Serializing to JSON a struct of strings and integers")
    }
}

/// What the group members attach to a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraMemo {
    /// The identifier of the transaction
    #[serde(rename = "t")]
    pub trace_id: String,
    #[serde(rename = "m", default)]
    pub memo: String,
}

impl ExtraMemo {
    pub fn encode(&self) -> String {
        base64::encode(
            serde_json::to_vec(self).expect("Serializing to JSON a struct of two strings"),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTransaction {
    pub version: TransactionVersion,
    pub extra: ExtraMemo,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Not a transaction version
    Version(String),
    /// A transaction without a (valid) memo, we can't tell which transaction it is
    Extra(String),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Version(e) => write!(f, "Invalid transaction version: {}", e),
            Self::Extra(e) => write!(f, "Invalid transaction memo: {}", e),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Turns a signed transaction payload into a transaction version and its memo.
pub trait TransactionDecoder: Send + Sync {
    fn decode(&self, raw: &[u8]) -> Result<DecodedTransaction, DecodeError>;
}

/// Decodes JSON-encoded transaction versions.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl TransactionDecoder for JsonDecoder {
    fn decode(&self, raw: &[u8]) -> Result<DecodedTransaction, DecodeError> {
        let version: TransactionVersion =
            serde_json::from_slice(raw).map_err(|e| DecodeError::Version(e.to_string()))?;

        let extra_bytes =
            base64::decode(&version.extra).map_err(|e| DecodeError::Extra(e.to_string()))?;
        let extra: ExtraMemo =
            serde_json::from_slice(&extra_bytes).map_err(|e| DecodeError::Extra(e.to_string()))?;
        if extra.trace_id.is_empty() {
            return Err(DecodeError::Extra("Empty trace id".to_string()));
        }

        Ok(DecodedTransaction { version, extra })
    }
}
