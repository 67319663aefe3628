//! Non-fungible ownable assets
//!
//! An asset is a single ownable state typed by `kind`. Moving it re-owns the
//! state without changing its kind; the current owner must sign.

use std::collections::BTreeSet;
use tally_model::{
    sha256, AssetStateData, Command, CommandData, Contract, ContractRejection, ContractStateData,
    ModelError, PubKey, SecureHash, StateRef, TransactionBuilder, TransactionForVerification,
    TransactionState,
};

/// Hash identifying the asset contract's code.
pub fn contract_hash() -> SecureHash {
    sha256(b"tally.contracts.asset")
}

/// Wrap asset data into a transaction state under this contract.
pub fn state(kind: impl Into<String>, owner: PubKey) -> TransactionState {
    TransactionState::new(
        contract_hash(),
        ContractStateData::Asset(AssetStateData { kind: kind.into(), owner }),
    )
}

pub struct AssetContract;

impl Contract for AssetContract {
    fn verify(&self, tx: &TransactionForVerification) -> Result<(), ContractRejection> {
        let in_assets: Vec<&AssetStateData> =
            tx.input_states().filter_map(|s| s.data.as_asset()).collect();
        let out_assets: Vec<&AssetStateData> =
            tx.outputs.iter().filter_map(|s| s.data.as_asset()).collect();

        let has_issue = tx
            .commands_where(|d| matches!(d, CommandData::Issue))
            .next()
            .is_some();

        if has_issue && in_assets.is_empty() {
            let issue_signers: BTreeSet<PubKey> = tx
                .commands_where(|d| matches!(d, CommandData::Issue))
                .flat_map(|c| c.signers.iter().copied())
                .collect();
            for out in &out_assets {
                if !issue_signers.contains(&out.owner) {
                    return Err(tx.reject(format!(
                        "issued asset owner {} did not sign the issuance",
                        out.owner
                    )));
                }
            }
            return Ok(());
        }

        if in_assets.is_empty() && out_assets.is_empty() {
            return Ok(());
        }

        // A move must keep the multiset of kinds intact.
        let mut in_kinds: Vec<&str> = in_assets.iter().map(|a| a.kind.as_str()).collect();
        let mut out_kinds: Vec<&str> = out_assets.iter().map(|a| a.kind.as_str()).collect();
        in_kinds.sort_unstable();
        out_kinds.sort_unstable();
        if in_kinds != out_kinds {
            return Err(tx.reject("asset kinds not preserved across the move"));
        }

        let move_signers: BTreeSet<PubKey> = tx
            .commands_where(|d| matches!(d, CommandData::Move))
            .flat_map(|c| c.signers.iter().copied())
            .collect();
        for a in &in_assets {
            if !move_signers.contains(&a.owner) {
                return Err(tx.reject(format!("asset owner {} did not sign the move", a.owner)));
            }
        }

        Ok(())
    }

    fn legal_reference(&self) -> SecureHash {
        sha256(b"tally.contracts.asset legal prose")
    }
}

/// Add an issuance of a fresh asset owned by `owner`.
pub fn generate_issue(
    builder: &mut TransactionBuilder,
    kind: impl Into<String>,
    owner: PubKey,
) -> Result<(), ModelError> {
    builder.add_output(state(kind, owner));
    builder.add_command(Command::new(CommandData::Issue, vec![owner])?);
    Ok(())
}

/// Add a move of an existing asset to `new_owner`. Returns the key that must
/// sign (the current owner).
pub fn generate_move(
    builder: &mut TransactionBuilder,
    asset: (StateRef, &AssetStateData),
    new_owner: PubKey,
) -> Result<PubKey, ModelError> {
    let (asset_ref, data) = asset;
    builder.add_input(asset_ref)?;
    builder.add_output(state(data.kind.clone(), new_owner));
    builder.add_command(Command::new(CommandData::Move, vec![data.owner])?);
    Ok(data.owner)
}
