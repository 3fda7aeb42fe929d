//! Merkle proof provider
//!
//! Proofs come from the bridge's proof service; the manager treats a
//! malformed proof as a precondition failure and anything else as transient.

use alloy_primitives::B256;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use crate::types::NetworkId;

/// Depth of the exit trees
pub const TREE_DEPTH: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ProofError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("proof service returned {0}")]
    Status(u16),

    #[error("proof not found: {0}")]
    NotFound(String),

    #[error("malformed proof: {0}")]
    Malformed(String),
}

/// Everything the claim call needs besides the deposit itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimProof {
    pub smt_proof: [B256; TREE_DEPTH],
    pub rollup_proof: [B256; TREE_DEPTH],
    pub mainnet_exit_root: B256,
    pub rollup_exit_root: B256,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProofProvider: Send + Sync {
    async fn claim_proof(
        &self,
        deposit_count: u32,
        network: NetworkId,
    ) -> Result<ClaimProof, ProofError>;
}

#[derive(Debug, Deserialize)]
struct ProofEnvelope {
    proof: RawProof,
}

#[derive(Debug, Deserialize)]
struct RawProof {
    merkle_proof: Vec<String>,
    #[serde(default)]
    rollup_merkle_proof: Vec<String>,
    main_exit_root: String,
    rollup_exit_root: String,
}

fn parse_hash(raw: &str, what: &str) -> Result<B256, ProofError> {
    raw.parse::<B256>()
        .map_err(|e| ProofError::Malformed(format!("{}: {}", what, e)))
}

/// Parse a sibling path; an empty rollup path (mainnet deposits) is all zeros
fn parse_path(raw: &[String], what: &str) -> Result<[B256; TREE_DEPTH], ProofError> {
    let mut path = [B256::ZERO; TREE_DEPTH];
    if raw.is_empty() {
        return Ok(path);
    }
    if raw.len() != TREE_DEPTH {
        return Err(ProofError::Malformed(format!(
            "{}: expected {} siblings, got {}",
            what,
            TREE_DEPTH,
            raw.len()
        )));
    }
    for (slot, item) in path.iter_mut().zip(raw) {
        *slot = parse_hash(item, what)?;
    }
    Ok(path)
}

impl RawProof {
    fn into_proof(self) -> Result<ClaimProof, ProofError> {
        if self.merkle_proof.is_empty() {
            return Err(ProofError::Malformed("merkle_proof: empty".to_string()));
        }
        Ok(ClaimProof {
            smt_proof: parse_path(&self.merkle_proof, "merkle_proof")?,
            rollup_proof: parse_path(&self.rollup_merkle_proof, "rollup_merkle_proof")?,
            mainnet_exit_root: parse_hash(&self.main_exit_root, "main_exit_root")?,
            rollup_exit_root: parse_hash(&self.rollup_exit_root, "rollup_exit_root")?,
        })
    }
}

/// HTTP client for the proof service
#[derive(Debug, Clone)]
pub struct HttpProofProvider {
    client: Client,
    base_url: String,
}

impl HttpProofProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ProofError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ProofProvider for HttpProofProvider {
    async fn claim_proof(
        &self,
        deposit_count: u32,
        network: NetworkId,
    ) -> Result<ClaimProof, ProofError> {
        let url = format!("{}/merkle-proof", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("deposit_cnt", deposit_count), ("net_id", network)])
            .send()
            .await?;

        match resp.status() {
            StatusCode::NOT_FOUND => {
                return Err(ProofError::NotFound(format!("{}/{}", network, deposit_count)))
            }
            s if !s.is_success() => return Err(ProofError::Status(s.as_u16())),
            _ => {}
        }

        let envelope: ProofEnvelope = resp
            .json()
            .await
            .map_err(|e| ProofError::Malformed(e.to_string()))?;
        envelope.proof.into_proof()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex32(byte: u8) -> String {
        format!("0x{}", hex::encode([byte; 32]))
    }

    #[test]
    fn test_parse_mainnet_proof() {
        let raw = RawProof {
            merkle_proof: (0..32).map(|i| hex32(i as u8)).collect(),
            rollup_merkle_proof: Vec::new(),
            main_exit_root: hex32(0xaa),
            rollup_exit_root: hex32(0xbb),
        };
        let proof = raw.into_proof().unwrap();
        assert_eq!(proof.smt_proof[3], B256::repeat_byte(3));
        assert_eq!(proof.rollup_proof, [B256::ZERO; TREE_DEPTH]);
        assert_eq!(proof.mainnet_exit_root, B256::repeat_byte(0xaa));
    }

    #[test]
    fn test_short_path_is_malformed() {
        let raw = RawProof {
            merkle_proof: vec![hex32(1); 5],
            rollup_merkle_proof: Vec::new(),
            main_exit_root: hex32(0xaa),
            rollup_exit_root: hex32(0xbb),
        };
        assert!(matches!(raw.into_proof(), Err(ProofError::Malformed(_))));
    }

    #[test]
    fn test_bad_root_is_malformed() {
        let raw = RawProof {
            merkle_proof: vec![hex32(1); 32],
            rollup_merkle_proof: Vec::new(),
            main_exit_root: "0x1234".to_string(),
            rollup_exit_root: hex32(0xbb),
        };
        assert!(matches!(raw.into_proof(), Err(ProofError::Malformed(_))));
    }
}
