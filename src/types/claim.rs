//! Claim records written by chain sync
//!
//! The existence of a claim is the authoritative signal that a deposit was
//! consumed on its destination network.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use super::deposit::NetworkId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    /// Deposit count of the claimed leaf
    pub index: u32,
    pub orig_net: NetworkId,
    pub orig_addr: Address,
    pub amount: U256,
    pub dest_addr: Address,
    /// Network the claim was executed on
    pub network_id: NetworkId,
    pub tx_hash: B256,
    pub block_id: u64,
    pub time: u64,
}
