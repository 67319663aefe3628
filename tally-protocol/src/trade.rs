//! Two-party trade: delivery versus payment
//!
//! The seller offers an ownable asset at a price; the buyer assembles a
//! single transaction that moves the asset to a fresh buyer key and pays the
//! price in cash to the seller's key, then signs only its own cash inputs.
//! That one signature is not binding on its own: the seller's counter-signature
//! and the timestamping authority's witness seal both halves of the swap at
//! once, so no party ever holds a transaction transferring only one side.
//!
//! Open issue, documented and unhandled here: after obtaining the timestamp
//! signature the seller can abandon the conversation, keeping a fully
//! signable transaction while the buyer waits. Recovery belongs to a higher
//! layer.

use crate::context::ServiceHub;
use crate::messages::{SellerTradeInfo, SignaturesResponse};
use crate::resolver::{ledger_from_store, ResolveTransactions};
use crate::ProtocolError;
use prost::Message;
use std::collections::BTreeSet;
use tally_contracts::{asset, cash};
use tally_ledger::TransactionGroup;
use tally_model::wire::WirePartySignature;
use tally_model::{
    Amount, Command, CommandData, DigitalSignature, LedgerTransaction, ModelError, PubKey,
    SecureHash, SigBytes, SignedTransaction, StateRef, TimestampCommand, TransactionBuilder,
};
use tally_net::{topics, MessagingService, NodeAddress};
use tally_oracle::messages::{SignRequest, SignResponse, ORACLE_LISTEN_SESSION};

/// Seller-side protocol states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SellerState {
    Init,
    AwaitingProposal,
    Verifying,
    Signing,
    Timestamping,
    SendingSigs,
    Done,
}

/// Buyer-side protocol states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuyerState {
    Init,
    Receiving,
    Verifying,
    Signing,
    SwappingSignatures,
    Done,
}

pub struct SellerParams {
    pub buyer: NodeAddress,
    /// The asset on offer; its producing transaction must be recorded locally.
    pub asset_ref: StateRef,
    /// The key currently owning the asset. We must hold it to sign the move.
    pub asset_key: PubKey,
    pub price: Amount,
    /// The key the cash outputs must be owned by.
    pub payment_key: PubKey,
    pub tsa: NodeAddress,
    pub tsa_name: String,
    pub tsa_key: PubKey,
    pub session_id: u64,
}

pub struct BuyerParams {
    pub seller: NodeAddress,
    /// The asset kind we are willing to buy.
    pub expected_kind: String,
    pub max_price: Amount,
    /// The window the timestamping authority must witness.
    pub timestamp_window: TimestampCommand,
    pub tsa_key: PubKey,
    pub session_id: u64,
}

/// A finished trade: both sides end holding the same fully signed bytes.
#[derive(Debug)]
pub struct TradeOutcome {
    pub final_tx: SignedTransaction,
    pub ledger: LedgerTransaction,
}

/// Run the selling half of a trade to completion.
#[tracing::instrument(skip(hub, params), fields(session = params.session_id, price = %params.price))]
pub async fn run_seller<M: MessagingService>(
    hub: &ServiceHub<M>,
    params: &SellerParams,
) -> Result<TradeOutcome, ProtocolError> {
    let mut state = SellerState::Init;
    tracing::debug!(?state, "selling {} for {}", params.asset_ref, params.price);

    let info = SellerTradeInfo {
        asset_ref: Some(params.asset_ref.into()),
        price: Some(params.price.into()),
        seller_owner_key: params.payment_key.to_vec(),
        session_id: params.session_id,
    };
    state = SellerState::AwaitingProposal;
    tracing::debug!(?state, "trade offered");
    let payload = hub
        .send_and_receive(
            &params.buyer,
            topics::TRADE_BUYER,
            topics::TRADE_SELLER,
            params.session_id,
            info.encode_to_vec(),
        )
        .await?;

    state = SellerState::Verifying;
    tracing::debug!(?state, "proposal received");
    let proposal = SignedTransaction::decode(&payload)?;
    let wire = proposal.wire_transaction()?;

    // Pull and verify the buyer's ancestry before looking at anything else.
    let seeds: Vec<SecureHash> = wire.inputs.iter().map(|r| r.txhash).collect();
    ResolveTransactions::new(seeds, params.buyer.clone())
        .run(hub)
        .await?;

    // The only signatures allowed to be outstanding are ours and the
    // authority's.
    let expected_missing: BTreeSet<PubKey> = [params.asset_key, params.tsa_key].into();
    let missing = proposal.missing_signers()?;
    if missing != expected_missing {
        return Err(ProtocolError::UnexpectedMissingSignatures {
            unexpected: missing
                .symmetric_difference(&expected_missing)
                .copied()
                .collect(),
        });
    }

    // Contract verification, tolerating exactly those two absences.
    let mut roots = Vec::new();
    for input in &wire.inputs {
        let parent = hub
            .tx_store
            .get(&input.txhash)?
            .ok_or(ProtocolError::PeerResponseIncomplete { missing: input.txhash })?;
        roots.push(ledger_from_store(hub, &parent)?);
    }
    TransactionGroup::new(vec![proposal.clone()], roots).verify_tolerating(
        &hub.registry,
        &hub.identities,
        &expected_missing,
    )?;

    // The proposal must actually pay us.
    let paid: u64 = wire
        .outputs
        .iter()
        .filter_map(|s| s.data.as_cash())
        .filter(|c| c.owner == params.payment_key && c.amount.currency == params.price.currency)
        .map(|c| c.amount.quantity)
        .sum();
    if paid != params.price.quantity {
        return Err(ProtocolError::WrongPaymentAmount {
            expected: params.price,
            got: paid,
        });
    }

    state = SellerState::Signing;
    tracing::debug!(?state, "proposal verified");
    let seller_sig = hub
        .keys
        .sign_with(&params.asset_key, proposal.wire_bytes())
        .expect("seller key store does not hold the asset key");

    state = SellerState::Timestamping;
    tracing::debug!(?state, "requesting timestamp witness");
    let tsa_sig =
        request_timestamp(hub, &params.tsa, &params.tsa_name, proposal.wire_bytes()).await?;

    state = SellerState::SendingSigs;
    tracing::debug!(?state, "sending signatures");
    let response = SignaturesResponse {
        tsa_sig: Some(WirePartySignature {
            party_name: tsa_sig.party().name.clone(),
            party_key: tsa_sig.party().owning_key.to_vec(),
            sig: tsa_sig.signature().bytes.to_vec(),
        }),
        seller_sig: Some(seller_sig.clone().into()),
    };
    hub.send(
        &params.buyer,
        topics::TRADE_BUYER,
        params.session_id,
        response.encode_to_vec(),
    )
    .await?;

    // Assemble our copy; signature order matches the buyer's assembly so the
    // final bytes are identical on both sides.
    let final_tx = proposal
        .with_signature(seller_sig)
        .with_signature(tsa_sig.signature().clone());
    final_tx
        .verify_signatures()
        .map_err(|e| ProtocolError::FinalVerify(e.to_string()))?;
    hub.tx_store.put_all(std::slice::from_ref(&final_tx))?;
    let ledger = ledger_from_store(hub, &final_tx)?;
    hub.wallet.apply(&ledger);

    state = SellerState::Done;
    tracing::info!(?state, tx = %final_tx.id(), "trade complete");
    Ok(TradeOutcome { final_tx, ledger })
}

/// Run the buying half of a trade to completion.
#[tracing::instrument(skip(hub, params), fields(session = params.session_id))]
pub async fn run_buyer<M: MessagingService>(
    hub: &ServiceHub<M>,
    params: &BuyerParams,
) -> Result<TradeOutcome, ProtocolError> {
    let mut state = BuyerState::Init;
    tracing::debug!(?state, "trade starting");

    state = BuyerState::Receiving;
    tracing::debug!(?state, "awaiting trade offer");
    let payload = hub.receive(topics::TRADE_BUYER, params.session_id).await?;
    let info = SellerTradeInfo::decode(&payload[..])?;
    if info.session_id != params.session_id {
        return Err(ProtocolError::UnexpectedMessage("trade info session mismatch"));
    }
    let asset_ref: StateRef = info
        .asset_ref
        .ok_or(ProtocolError::UnexpectedMessage("trade info without asset"))?
        .try_into()?;
    let price: Amount = info
        .price
        .ok_or(ProtocolError::UnexpectedMessage("trade info without price"))?
        .try_into()?;
    let seller_owner_key = PubKey::try_from(info.seller_owner_key)
        .map_err(|v| ModelError::BadKeyLength(v.len()))?;

    state = BuyerState::Verifying;
    tracing::debug!(?state, asset = %asset_ref, price = %price, "offer received");
    if price.currency != params.max_price.currency || price.quantity > params.max_price.quantity {
        return Err(ProtocolError::UnacceptablePrice {
            price,
            max: params.max_price,
        });
    }

    // Pull and verify the asset's ancestry from the seller.
    ResolveTransactions::new(vec![asset_ref.txhash], params.seller.clone())
        .run(hub)
        .await?;
    let producing = hub
        .tx_store
        .get(&asset_ref.txhash)?
        .ok_or(ProtocolError::UnexpectedMessage("asset transaction not resolved"))?;
    let offered = producing
        .wire_transaction()?
        .outputs
        .get(asset_ref.index as usize)
        .cloned()
        .ok_or(ProtocolError::UnexpectedMessage("asset reference out of range"))?;
    let offered_asset = match offered.data.as_asset() {
        Some(a) => a.clone(),
        None => {
            return Err(ProtocolError::AssetMismatch {
                expected: params.expected_kind.clone(),
                got: "<not an ownable asset>".into(),
            })
        }
    };
    if offered_asset.kind != params.expected_kind {
        return Err(ProtocolError::AssetMismatch {
            expected: params.expected_kind.clone(),
            got: offered_asset.kind,
        });
    }

    state = BuyerState::Signing;
    tracing::debug!(?state, "building proposal");
    // Fresh keys: one to own the asset, one for change.
    let new_asset_key = hub.keys.fresh_key();
    hub.wallet.track_key(new_asset_key);
    let change_key = hub.keys.fresh_key();
    hub.wallet.track_key(change_key);

    let mut builder = TransactionBuilder::new();
    asset::generate_move(&mut builder, (asset_ref, &offered_asset), new_asset_key)?;
    let coins = hub.wallet.snapshot().cash_in(price.currency);
    let cash_signers = cash::generate_spend(
        &mut builder,
        &coins,
        price,
        seller_owner_key,
        change_key,
    )?;
    builder.add_command(
        Command::new(
            CommandData::Timestamp(params.timestamp_window),
            vec![params.tsa_key],
        )
        .map_err(ModelError::from)?,
    );

    let mut proposal = SignedTransaction::new(builder.build().to_canonical_bytes(), vec![]);
    for signer in &cash_signers {
        let sig = hub
            .keys
            .sign_with(signer, proposal.wire_bytes())
            .expect("buyer key store does not hold a wallet coin key");
        proposal = proposal.with_signature(sig);
    }

    state = BuyerState::SwappingSignatures;
    tracing::debug!(?state, "proposal sent, awaiting signatures");
    let payload = hub
        .send_and_receive(
            &params.seller,
            topics::TRADE_SELLER,
            topics::TRADE_BUYER,
            params.session_id,
            proposal.encode_to_vec(),
        )
        .await?;
    let sigs = SignaturesResponse::decode(&payload[..])?;
    let seller_sig: DigitalSignature = sigs
        .seller_sig
        .ok_or(ProtocolError::UnexpectedMessage("no seller signature"))?
        .try_into()?;
    let tsa_wire = sigs
        .tsa_sig
        .ok_or(ProtocolError::UnexpectedMessage("no timestamp signature"))?;
    let tsa_key = PubKey::try_from(tsa_wire.party_key)
        .map_err(|v| ModelError::BadKeyLength(v.len()))?;
    if tsa_key != params.tsa_key {
        return Err(ProtocolError::UnexpectedMessage(
            "signature from an unexpected timestamping authority",
        ));
    }
    let tsa_sig = DigitalSignature {
        by: tsa_key,
        bytes: SigBytes::try_from(tsa_wire.sig).map_err(|v| ModelError::BadSigLength(v.len()))?,
    };

    // Same signature order as the seller: byte-identical final transactions.
    let final_tx = proposal.with_signature(seller_sig).with_signature(tsa_sig);
    final_tx
        .verify_signatures()
        .map_err(|e| ProtocolError::FinalVerify(e.to_string()))?;
    hub.tx_store.put_all(std::slice::from_ref(&final_tx))?;
    let ledger = ledger_from_store(hub, &final_tx)?;
    hub.wallet.apply(&ledger);

    state = BuyerState::Done;
    tracing::info!(?state, tx = %final_tx.id(), "trade complete");
    Ok(TradeOutcome { final_tx, ledger })
}

/// Sub-protocol: ask the timestamping authority to witness the transaction's
/// declared window and sign it.
async fn request_timestamp<M: MessagingService>(
    hub: &ServiceHub<M>,
    tsa: &NodeAddress,
    tsa_name: &str,
    wire_bytes: &[u8],
) -> Result<tally_model::PartySignature, ProtocolError> {
    let session = hub.fresh_session();
    let request = SignRequest {
        wire_bytes: wire_bytes.to_vec(),
        reply_to: hub.address().0.clone(),
        reply_session: session,
    };
    hub.send(
        tsa,
        &topics::oracle_sign(tsa_name, ORACLE_LISTEN_SESSION),
        ORACLE_LISTEN_SESSION,
        request.encode_to_vec(),
    )
    .await?;
    let payload = hub
        .receive(&topics::oracle_sign(tsa_name, session), session)
        .await?;
    let response = SignResponse::decode(&payload[..])?;
    if let Some(error) = response.error {
        return Err(ProtocolError::TimestampRefused(error));
    }
    let wire_sig = response
        .sig
        .ok_or(ProtocolError::UnexpectedMessage("empty sign response"))?;
    let key = PubKey::try_from(wire_sig.party_key)
        .map_err(|v| ModelError::BadKeyLength(v.len()))?;
    let sig = DigitalSignature {
        by: key,
        bytes: SigBytes::try_from(wire_sig.sig).map_err(|v| ModelError::BadSigLength(v.len()))?,
    };
    sig.verify(wire_bytes)
        .map_err(|_| ProtocolError::TimestampRefused("returned signature does not verify".into()))?;
    Ok(tally_model::PartySignature::new(
        tally_model::Party::new(wire_sig.party_name, key),
        sig,
    ))
}
