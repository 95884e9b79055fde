use alloy_primitives::{Address, B256, U256};
use atlas_operation_types::{CallConfig, DAppConfig, DAppOperation, SolverOperation, UserOperation};

use super::Sandbox;
use crate::{
    collaborators::{PolicyContract, TxContext, VerificationRegistry},
    errors::SettlementError,
    hashing,
};

impl VerificationRegistry for Sandbox {
    fn user_operation_payload(&self, op: &UserOperation) -> Result<B256, SettlementError> {
        Ok(hashing::user_operation_payload(&self.domain(), op))
    }

    fn solver_payload(&self, op: &SolverOperation) -> Result<B256, SettlementError> {
        Ok(hashing::solver_operation_payload(&self.domain(), op))
    }

    fn dapp_operation_payload(&self, op: &DAppOperation) -> Result<B256, SettlementError> {
        Ok(hashing::dapp_operation_payload(&self.domain(), op))
    }

    fn user_operation_hash(&self, op: &UserOperation) -> Result<B256, SettlementError> {
        Ok(hashing::user_operation_hash(op))
    }

    fn user_next_nonce(&self, user: Address, sequential: bool) -> Result<U256, SettlementError> {
        Ok(self.ledger.next_user_nonce(user, sequential))
    }

    fn initialize_governance(&mut self, tx: TxContext, control: Address) -> Result<(), SettlementError> {
        let signatory = self.control(control)?.signatory;
        if tx.from != signatory {
            return Err(SettlementError::NotControlSignatory {
                caller: tx.from,
                control,
            });
        }
        if self.ledger.governance(control).is_some() {
            return Err(SettlementError::GovernanceAlreadyInitialized(control));
        }
        self.ledger.set_governance(control, signatory);
        tracing::debug!(%control, governance = %signatory, "governance initialized");
        Ok(())
    }

    fn governance_of(&self, control: Address) -> Result<Option<Address>, SettlementError> {
        Ok(self.ledger.governance(control))
    }
}

impl PolicyContract for Sandbox {
    fn call_config(&self, control: Address) -> Result<CallConfig, SettlementError> {
        Ok(self.control(control)?.call_config)
    }

    fn bid_format(&self, control: Address, user_op: &UserOperation) -> Result<Address, SettlementError> {
        Ok(self.control(control)?.bid_format(user_op))
    }

    fn dapp_config(&self, control: Address, _user_op: &UserOperation) -> Result<DAppConfig, SettlementError> {
        Ok(self.control(control)?.dapp_config())
    }

    fn signatory(&self, control: Address) -> Result<Address, SettlementError> {
        Ok(self.control(control)?.signatory)
    }
}
