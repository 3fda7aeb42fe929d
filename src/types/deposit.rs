//! Deposit, exit root and block records
//!
//! A deposit moves through: observed → ready for claim → claimed.
//! Only `ready_for_claim` / `ready_time` ever change after ingestion.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// Bridge network id (0 is the base chain)
pub type NetworkId = u32;

/// Kind of leaf a deposit occupies in the exit tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeafType {
    Asset,
    Message,
}

impl LeafType {
    pub fn as_u8(&self) -> u8 {
        match self {
            LeafType::Asset => 0,
            LeafType::Message => 1,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(LeafType::Asset),
            1 => Some(LeafType::Message),
            _ => None,
        }
    }
}

/// Identity of a deposit: its index within the source network's exit tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DepositId {
    pub network_id: NetworkId,
    pub deposit_count: u32,
}

impl DepositId {
    pub fn new(network_id: NetworkId, deposit_count: u32) -> Self {
        Self {
            network_id,
            deposit_count,
        }
    }
}

impl std::fmt::Display for DepositId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network_id, self.deposit_count)
    }
}

/// User-facing lookup key for a deposit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DepositKey {
    pub dest_addr: Address,
    pub network_id: NetworkId,
    pub tx_hash: B256,
}

impl std::fmt::Display for DepositKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.network_id, self.tx_hash, self.dest_addr)
    }
}

/// A bridge deposit observed on its source network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub leaf_type: LeafType,
    pub orig_net: NetworkId,
    pub orig_addr: Address,
    pub amount: U256,
    pub dest_net: NetworkId,
    pub dest_addr: Address,
    /// Source network of the deposit
    pub network_id: NetworkId,
    pub deposit_count: u32,
    pub block_id: u64,
    pub block_number: u64,
    pub tx_hash: B256,
    pub metadata: Vec<u8>,
    /// Unix seconds of the deposit's block
    pub time: u64,
    pub ready_for_claim: bool,
    pub ready_time: Option<u64>,
}

impl Deposit {
    pub fn id(&self) -> DepositId {
        DepositId::new(self.network_id, self.deposit_count)
    }

    pub fn key(&self) -> DepositKey {
        DepositKey {
            dest_addr: self.dest_addr,
            network_id: self.network_id,
            tx_hash: self.tx_hash,
        }
    }

    /// Flip to ready; a deposit that is already ready keeps its original time
    pub fn mark_ready(&mut self, now: u64) -> bool {
        if self.ready_for_claim {
            return false;
        }
        self.ready_for_claim = true;
        self.ready_time = Some(now);
        true
    }

    /// Global index used by the bridge contract to locate the leaf
    ///
    /// Mainnet deposits set bit 64; rollup deposits carry the rollup index
    /// in bits 32..64.
    pub fn global_index(&self, l1_network: NetworkId, rollup_index: u32) -> U256 {
        let local = U256::from(self.deposit_count);
        if self.network_id == l1_network {
            (U256::from(1u8) << 64) | local
        } else {
            (U256::from(rollup_index) << 32) | local
        }
    }
}

/// A committed exit root and the highest deposit index it covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitRoot {
    pub root: B256,
    pub network: NetworkId,
    pub deposit_count: u32,
    pub block_id: u64,
}

/// A block recorded by chain sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Assigned by the store on insert
    pub id: u64,
    pub network_id: NetworkId,
    pub block_number: u64,
    pub block_hash: B256,
    pub parent_hash: B256,
    pub received_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_deposit(network_id: NetworkId, deposit_count: u32) -> Deposit {
        Deposit {
            leaf_type: LeafType::Asset,
            orig_net: 0,
            orig_addr: Address::ZERO,
            amount: U256::from(1_000_000_000_000_000_000u128),
            dest_net: 1,
            dest_addr: Address::repeat_byte(0xaa),
            network_id,
            deposit_count,
            block_id: 1,
            block_number: 100,
            tx_hash: B256::repeat_byte(deposit_count as u8),
            metadata: vec![],
            time: 1_700_000_000,
            ready_for_claim: false,
            ready_time: None,
        }
    }

    #[test]
    fn test_mark_ready_is_one_way() {
        let mut deposit = sample_deposit(0, 3);
        assert!(deposit.mark_ready(10));
        assert_eq!(deposit.ready_time, Some(10));

        assert!(!deposit.mark_ready(20));
        assert_eq!(deposit.ready_time, Some(10));
    }

    #[test]
    fn test_global_index() {
        let l1 = sample_deposit(0, 5);
        assert_eq!(
            l1.global_index(0, 0),
            U256::from(18_446_744_073_709_551_621u128)
        );

        let l2 = sample_deposit(1, 5);
        assert_eq!(l2.global_index(0, 2), U256::from((2u64 << 32) | 5));
    }

    #[test]
    fn test_leaf_type_codes() {
        assert_eq!(LeafType::from_u8(0), Some(LeafType::Asset));
        assert_eq!(LeafType::from_u8(LeafType::Message.as_u8()), Some(LeafType::Message));
        assert_eq!(LeafType::from_u8(7), None);
    }
}
