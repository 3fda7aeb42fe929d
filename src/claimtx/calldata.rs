//! Bridge contract claim calls

use alloy_primitives::{Bytes, U256};
use alloy_sol_types::{sol, SolCall};

use super::proof::ClaimProof;
use crate::types::{Deposit, LeafType, NetworkId};

sol! {
    /// Claim bridged tokens on the destination network
    function claimAsset(
        bytes32[32] smtProofLocalExitRoot,
        bytes32[32] smtProofRollupExitRoot,
        uint256 globalIndex,
        bytes32 mainnetExitRoot,
        bytes32 rollupExitRoot,
        uint32 originNetwork,
        address originTokenAddress,
        uint32 destinationNetwork,
        address destinationAddress,
        uint256 amount,
        bytes metadata
    ) external;

    /// Claim a bridged message on the destination network
    function claimMessage(
        bytes32[32] smtProofLocalExitRoot,
        bytes32[32] smtProofRollupExitRoot,
        uint256 globalIndex,
        bytes32 mainnetExitRoot,
        bytes32 rollupExitRoot,
        uint32 originNetwork,
        address originAddress,
        uint32 destinationNetwork,
        address destinationAddress,
        uint256 amount,
        bytes metadata
    ) external;
}

/// ABI-encode the claim call matching the deposit's leaf type
pub fn encode_claim(deposit: &Deposit, proof: &ClaimProof, global_index: U256) -> Vec<u8> {
    let metadata = Bytes::from(deposit.metadata.clone());
    match deposit.leaf_type {
        LeafType::Asset => claimAssetCall {
            smtProofLocalExitRoot: proof.smt_proof,
            smtProofRollupExitRoot: proof.rollup_proof,
            globalIndex: global_index,
            mainnetExitRoot: proof.mainnet_exit_root,
            rollupExitRoot: proof.rollup_exit_root,
            originNetwork: deposit.orig_net,
            originTokenAddress: deposit.orig_addr,
            destinationNetwork: deposit.dest_net,
            destinationAddress: deposit.dest_addr,
            amount: deposit.amount,
            metadata,
        }
        .abi_encode(),
        LeafType::Message => claimMessageCall {
            smtProofLocalExitRoot: proof.smt_proof,
            smtProofRollupExitRoot: proof.rollup_proof,
            globalIndex: global_index,
            mainnetExitRoot: proof.mainnet_exit_root,
            rollupExitRoot: proof.rollup_exit_root,
            originNetwork: deposit.orig_net,
            originAddress: deposit.orig_addr,
            destinationNetwork: deposit.dest_net,
            destinationAddress: deposit.dest_addr,
            amount: deposit.amount,
            metadata,
        }
        .abi_encode(),
    }
}

/// Build calldata for a deposit, computing the global index first
pub fn claim_calldata(
    deposit: &Deposit,
    proof: &ClaimProof,
    l1_network: NetworkId,
    rollup_index: u32,
) -> Vec<u8> {
    encode_claim(deposit, proof, deposit.global_index(l1_network, rollup_index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claimtx::proof::TREE_DEPTH;
    use crate::testing::deposit;
    use alloy_primitives::B256;

    fn proof() -> ClaimProof {
        ClaimProof {
            smt_proof: [B256::repeat_byte(1); TREE_DEPTH],
            rollup_proof: [B256::ZERO; TREE_DEPTH],
            mainnet_exit_root: B256::repeat_byte(2),
            rollup_exit_root: B256::repeat_byte(3),
        }
    }

    #[test]
    fn test_selector_follows_leaf_type() {
        let asset = deposit(0, 4);
        let data = claim_calldata(&asset, &proof(), 0, 0);
        assert_eq!(&data[..4], claimAssetCall::SELECTOR.as_slice());

        let mut message = deposit(0, 4);
        message.leaf_type = LeafType::Message;
        let data = claim_calldata(&message, &proof(), 0, 0);
        assert_eq!(&data[..4], claimMessageCall::SELECTOR.as_slice());
    }

    #[test]
    fn test_decodes_back_to_global_index() {
        let d = deposit(0, 9);
        let data = claim_calldata(&d, &proof(), 0, 0);
        let decoded = claimAssetCall::abi_decode(&data, true).unwrap();
        assert_eq!(decoded.globalIndex, (U256::from(1u8) << 64) | U256::from(9u8));
        assert_eq!(decoded.destinationAddress, d.dest_addr);
        assert_eq!(decoded.amount, d.amount);
    }
}
