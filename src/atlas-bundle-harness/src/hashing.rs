//! Canonical operation hashing (EIP-712).
//!
//! Struct hashes follow EIP-712 `hashStruct`: the type hash followed by one 32-byte word per member,
//! with `bytes` members replaced by their keccak-256 and the `signature` member left out. Payloads
//! are the typed-data digests `keccak256("\x19\x01" || domainSeparator || structHash)` that each
//! party signs.

use alloy_primitives::{keccak256, Address, B256, U256};
use alloy_sol_types::SolValue;
use atlas_operation_types::{DAppOperation, SolverOperation, UserOperation};

pub const DOMAIN_TYPE: &[u8] =
    b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
pub const DOMAIN_NAME: &[u8] = b"AtlasVerification";
pub const DOMAIN_VERSION: &[u8] = b"1.0";

pub const USER_OPERATION_TYPE: &[u8] = b"UserOperation(address from,address to,uint256 value,uint256 gas,uint256 maxFeePerGas,uint256 nonce,uint256 deadline,address dapp,address control,uint32 callConfig,address sessionKey,bytes data)";
pub const SOLVER_OPERATION_TYPE: &[u8] = b"SolverOperation(address from,address to,uint256 value,uint256 gas,uint256 maxFeePerGas,uint256 deadline,address solver,address control,bytes32 userOpHash,address bidToken,uint256 bidAmount,bytes data)";
pub const DAPP_OPERATION_TYPE: &[u8] = b"DAppOperation(address from,address to,uint256 nonce,uint256 deadline,address control,address bundler,bytes32 userOpHash,bytes32 callChainHash)";

/// EIP-712 domain of the verification registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Domain {
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl Domain {
    pub fn new(chain_id: u64, verifying_contract: Address) -> Self {
        Self {
            chain_id,
            verifying_contract,
        }
    }

    pub fn separator(&self) -> B256 {
        let mut buf = Vec::with_capacity(32 * 5);
        buf.extend_from_slice(keccak256(DOMAIN_TYPE).as_slice());
        buf.extend_from_slice(keccak256(DOMAIN_NAME).as_slice());
        buf.extend_from_slice(keccak256(DOMAIN_VERSION).as_slice());
        push_u256(&mut buf, U256::from(self.chain_id));
        push_address(&mut buf, self.verifying_contract);
        keccak256(buf)
    }

    /// `keccak256("\x19\x01" || domainSeparator || structHash)`.
    pub fn typed_digest(&self, struct_hash: B256) -> B256 {
        let mut buf = Vec::with_capacity(2 + 32 + 32);
        buf.extend_from_slice(b"\x19\x01");
        buf.extend_from_slice(self.separator().as_slice());
        buf.extend_from_slice(struct_hash.as_slice());
        keccak256(buf)
    }
}

fn push_address(buf: &mut Vec<u8>, address: Address) {
    let mut padded = [0u8; 32];
    padded[12..32].copy_from_slice(address.as_slice());
    buf.extend_from_slice(&padded);
}

fn push_u256(buf: &mut Vec<u8>, value: U256) {
    buf.extend_from_slice(&value.to_be_bytes::<32>());
}

fn push_u32(buf: &mut Vec<u8>, value: u32) {
    let mut padded = [0u8; 32];
    padded[28..32].copy_from_slice(&value.to_be_bytes());
    buf.extend_from_slice(&padded);
}

fn push_b256(buf: &mut Vec<u8>, value: B256) {
    buf.extend_from_slice(value.as_slice());
}

/// Struct hash of a user operation; this is the `userOpHash` solvers and governance commit to.
pub fn user_operation_hash(op: &UserOperation) -> B256 {
    let mut buf = Vec::with_capacity(32 * 13);
    push_b256(&mut buf, keccak256(USER_OPERATION_TYPE));
    push_address(&mut buf, op.from);
    push_address(&mut buf, op.to);
    push_u256(&mut buf, op.value);
    push_u256(&mut buf, op.gas);
    push_u256(&mut buf, op.maxFeePerGas);
    push_u256(&mut buf, op.nonce);
    push_u256(&mut buf, op.deadline);
    push_address(&mut buf, op.dapp);
    push_address(&mut buf, op.control);
    push_u32(&mut buf, op.callConfig);
    push_address(&mut buf, op.sessionKey);
    push_b256(&mut buf, keccak256(&op.data));
    keccak256(buf)
}

pub fn solver_operation_hash(op: &SolverOperation) -> B256 {
    let mut buf = Vec::with_capacity(32 * 13);
    push_b256(&mut buf, keccak256(SOLVER_OPERATION_TYPE));
    push_address(&mut buf, op.from);
    push_address(&mut buf, op.to);
    push_u256(&mut buf, op.value);
    push_u256(&mut buf, op.gas);
    push_u256(&mut buf, op.maxFeePerGas);
    push_u256(&mut buf, op.deadline);
    push_address(&mut buf, op.solver);
    push_address(&mut buf, op.control);
    push_b256(&mut buf, op.userOpHash);
    push_address(&mut buf, op.bidToken);
    push_u256(&mut buf, op.bidAmount);
    push_b256(&mut buf, keccak256(&op.data));
    keccak256(buf)
}

pub fn dapp_operation_hash(op: &DAppOperation) -> B256 {
    let mut buf = Vec::with_capacity(32 * 9);
    push_b256(&mut buf, keccak256(DAPP_OPERATION_TYPE));
    push_address(&mut buf, op.from);
    push_address(&mut buf, op.to);
    push_u256(&mut buf, op.nonce);
    push_u256(&mut buf, op.deadline);
    push_address(&mut buf, op.control);
    push_address(&mut buf, op.bundler);
    push_b256(&mut buf, op.userOpHash);
    push_b256(&mut buf, op.callChainHash);
    keccak256(buf)
}

pub fn user_operation_payload(domain: &Domain, op: &UserOperation) -> B256 {
    domain.typed_digest(user_operation_hash(op))
}

pub fn solver_operation_payload(domain: &Domain, op: &SolverOperation) -> B256 {
    domain.typed_digest(solver_operation_hash(op))
}

pub fn dapp_operation_payload(domain: &Domain, op: &DAppOperation) -> B256 {
    domain.typed_digest(dapp_operation_hash(op))
}

/// Chained hash binding the exact user operation and ordered solver set:
/// `h_0 = 0`, `h_{i+1} = keccak256(h_i || abi.encode(op_i))`.
pub fn call_chain_hash(user_op: &UserOperation, solver_ops: &[SolverOperation]) -> B256 {
    let mut chain = B256::ZERO;
    let mut step = |encoded: Vec<u8>| {
        let mut buf = Vec::with_capacity(32 + encoded.len());
        buf.extend_from_slice(chain.as_slice());
        buf.extend_from_slice(&encoded);
        chain = keccak256(buf);
    };
    step(user_op.abi_encode());
    for op in solver_ops {
        step(op.abi_encode());
    }
    chain
}
