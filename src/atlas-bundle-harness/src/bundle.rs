//! Signed records and the atomic bundle assembled from them.

use std::ops::Deref;

use alloy_primitives::{Address, Bytes, B256};
use atlas_operation_types::{DAppConfig, DAppOperation, SolverOperation, UserOperation};

use crate::{collaborators::VerificationRegistry, errors::SettlementError};

/// An intent record that is hashed and signed independently of the others.
pub trait Signable {
    const KIND: &'static str;

    /// Canonical payload digest, as computed by the verification registry.
    fn payload<R: VerificationRegistry + ?Sized>(&self, registry: &R) -> Result<B256, SettlementError>;

    fn signature_slot(&mut self) -> &mut Bytes;

    /// Party the record claims to be signed by.
    fn declared_signer(&self) -> Address;
}

impl Signable for UserOperation {
    const KIND: &'static str = "user";

    fn payload<R: VerificationRegistry + ?Sized>(&self, registry: &R) -> Result<B256, SettlementError> {
        registry.user_operation_payload(self)
    }

    fn signature_slot(&mut self) -> &mut Bytes {
        &mut self.signature
    }

    fn declared_signer(&self) -> Address {
        self.from
    }
}

impl Signable for SolverOperation {
    const KIND: &'static str = "solver";

    fn payload<R: VerificationRegistry + ?Sized>(&self, registry: &R) -> Result<B256, SettlementError> {
        registry.solver_payload(self)
    }

    fn signature_slot(&mut self) -> &mut Bytes {
        &mut self.signature
    }

    fn declared_signer(&self) -> Address {
        self.from
    }
}

impl Signable for DAppOperation {
    const KIND: &'static str = "dapp";

    fn payload<R: VerificationRegistry + ?Sized>(&self, registry: &R) -> Result<B256, SettlementError> {
        registry.dapp_operation_payload(self)
    }

    fn signature_slot(&mut self) -> &mut Bytes {
        &mut self.signature
    }

    fn declared_signer(&self) -> Address {
        self.from
    }
}

/// A record whose signature slot has been filled by an [`OperationSigner`](crate::OperationSigner).
///
/// Read-only after signing: there is no mutable access to the inner record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signed<T> {
    record: T,
}

impl<T> Signed<T> {
    pub(crate) fn new(record: T) -> Self {
        Self { record }
    }

    pub fn record(&self) -> &T {
        &self.record
    }

    pub fn into_inner(self) -> T {
        self.record
    }
}

impl<T> Deref for Signed<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.record
    }
}

/// Fully-signed operation bundle plus the policy configuration it is submitted with.
///
/// Only [`Signed`] parts are accepted, so a partially-signed bundle cannot be built.
#[derive(Clone, Debug)]
pub struct SignedBundle {
    user_op: Signed<UserOperation>,
    solver_ops: Vec<SolverOperation>,
    dapp_op: Signed<DAppOperation>,
    config: DAppConfig,
}

impl SignedBundle {
    pub fn new(
        user_op: Signed<UserOperation>,
        solver_ops: Vec<Signed<SolverOperation>>,
        dapp_op: Signed<DAppOperation>,
        config: DAppConfig,
    ) -> Self {
        Self {
            user_op,
            solver_ops: solver_ops.into_iter().map(Signed::into_inner).collect(),
            dapp_op,
            config,
        }
    }

    pub fn user_operation(&self) -> &UserOperation {
        self.user_op.record()
    }

    /// Solver operations in priority order (index 0 is tried first).
    pub fn solver_operations(&self) -> &[SolverOperation] {
        &self.solver_ops
    }

    pub fn solver_count(&self) -> usize {
        self.solver_ops.len()
    }

    pub fn dapp_operation(&self) -> &DAppOperation {
        self.dapp_op.record()
    }

    pub fn config(&self) -> &DAppConfig {
        &self.config
    }
}
