//! Test fixtures shared across modules

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::claimtx::chain::{
    BlockHeader, BlockTag, ChainClient, ChainError, ChainResult, TxReceipt, TxRequest,
};
use crate::types::{Claim, Deposit, DepositId, ExitRoot, LeafType, MonitoredTx, NetworkId};

fn tagged_hash(tag: u8, network: NetworkId, count: u64) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[0] = tag;
    bytes[1..5].copy_from_slice(&network.to_be_bytes());
    bytes[24..].copy_from_slice(&count.to_be_bytes());
    B256::from(bytes)
}

/// A not-yet-ready asset deposit; L1 deposits go to network 1, the rest to 0
pub fn deposit(network: NetworkId, count: u32) -> Deposit {
    Deposit {
        leaf_type: LeafType::Asset,
        orig_net: 0,
        orig_addr: Address::ZERO,
        amount: U256::from(1_000_000_000_000_000_000u128),
        dest_net: if network == 0 { 1 } else { 0 },
        dest_addr: Address::repeat_byte(0xaa),
        network_id: network,
        deposit_count: count,
        block_id: 1,
        block_number: 100,
        tx_hash: tagged_hash(0xde, network, count as u64),
        metadata: vec![],
        time: 1_000,
        ready_for_claim: false,
        ready_time: None,
    }
}

/// Exit root of `network` covering deposits up to `count`
pub fn exit_root(network: NetworkId, count: u32, byte: u8) -> ExitRoot {
    ExitRoot {
        root: B256::repeat_byte(byte),
        network,
        deposit_count: count,
        block_id: 1,
    }
}

/// Claim that consumes `deposit` on its destination network
pub fn claim_for(deposit: &Deposit) -> Claim {
    Claim {
        index: deposit.deposit_count,
        orig_net: deposit.orig_net,
        orig_addr: deposit.orig_addr,
        amount: deposit.amount,
        dest_addr: deposit.dest_addr,
        network_id: deposit.dest_net,
        tx_hash: tagged_hash(0xc1, deposit.network_id, deposit.deposit_count as u64),
        block_id: 2,
        time: deposit.time + 60,
    }
}

pub fn monitored_tx(id: DepositId, now: u64) -> MonitoredTx {
    MonitoredTx::new(
        id,
        Address::repeat_byte(0xcc),
        Address::repeat_byte(0xbb),
        0,
        vec![0x2c, 0xff, 0xd0, 0x2e],
        250_000,
        U256::from(1_000_000_000u64),
        now,
    )
}

#[derive(Debug)]
struct FakeChainState {
    block_number: u64,
    headers: HashMap<BlockTag, BlockHeader>,
    pending_nonce: u64,
    gas_price: U256,
    gas: u64,
    failing_broadcasts: u32,
    broadcasts: Vec<(B256, TxRequest)>,
    /// hash → (block number, reverted)
    mined: HashMap<B256, (u64, bool)>,
}

/// Scripted chain: tests set heights, prices and receipts directly
#[derive(Debug)]
pub struct FakeChain {
    state: Mutex<FakeChainState>,
}

impl Default for FakeChain {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeChain {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeChainState {
                block_number: 0,
                headers: HashMap::new(),
                pending_nonce: 0,
                gas_price: U256::from(1_000_000_000u64),
                gas: 250_000,
                failing_broadcasts: 0,
                broadcasts: Vec::new(),
                mined: HashMap::new(),
            }),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut FakeChainState) -> R) -> R {
        f(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn set_block_number(&self, number: u64) {
        self.with(|s| s.block_number = number);
    }

    pub fn set_header(&self, tag: BlockTag, number: u64, timestamp: u64) {
        self.with(|s| {
            s.headers.insert(tag, BlockHeader { number, timestamp });
        });
    }

    pub fn set_pending_nonce(&self, nonce: u64) {
        self.with(|s| s.pending_nonce = nonce);
    }

    pub fn set_gas_price(&self, price: U256) {
        self.with(|s| s.gas_price = price);
    }

    /// The next `n` broadcasts fail with a connection error
    pub fn fail_next_broadcasts(&self, n: u32) {
        self.with(|s| s.failing_broadcasts = n);
    }

    /// Give `hash` a receipt in `block`
    pub fn mine(&self, hash: B256, block: u64, reverted: bool) {
        self.with(|s| {
            s.mined.insert(hash, (block, reverted));
        });
    }

    /// Successful broadcasts, in order
    pub fn broadcasts(&self) -> Vec<(B256, TxRequest)> {
        self.with(|s| s.broadcasts.clone())
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn pending_nonce(&self, _from: Address) -> ChainResult<u64> {
        Ok(self.with(|s| s.pending_nonce))
    }

    async fn estimate_gas(&self, _tx: &TxRequest) -> ChainResult<u64> {
        Ok(self.with(|s| s.gas))
    }

    async fn gas_price(&self) -> ChainResult<U256> {
        Ok(self.with(|s| s.gas_price))
    }

    async fn broadcast(&self, tx: &TxRequest) -> ChainResult<B256> {
        self.with(|s| {
            if s.failing_broadcasts > 0 {
                s.failing_broadcasts -= 1;
                return Err(ChainError::Rpc {
                    code: -32000,
                    message: "connection refused".to_string(),
                });
            }
            let hash = tagged_hash(0xfe, 0, s.broadcasts.len() as u64 + 1);
            s.broadcasts.push((hash, tx.clone()));
            Ok(hash)
        })
    }

    async fn receipt(&self, hash: B256) -> ChainResult<Option<TxReceipt>> {
        Ok(self.with(|s| {
            s.mined.get(&hash).map(|&(block, reverted)| TxReceipt {
                block_number: block,
                confirmations: (s.block_number + 1).saturating_sub(block),
                reverted,
            })
        }))
    }

    async fn block_number(&self) -> ChainResult<u64> {
        Ok(self.with(|s| s.block_number))
    }

    async fn block_header(&self, tag: BlockTag) -> ChainResult<Option<BlockHeader>> {
        Ok(self.with(|s| match tag {
            BlockTag::Latest => s
                .headers
                .get(&tag)
                .copied()
                .or(Some(BlockHeader {
                    number: s.block_number,
                    timestamp: 0,
                })),
            _ => s.headers.get(&tag).copied(),
        }))
    }
}
