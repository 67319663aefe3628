//! Dependency resolution
//!
//! Given seed transaction hashes and a counterparty, walks the ancestry
//! breadth-first: already-recorded ancestors load from disk, missing ones are
//! fetched from the peer (attachments included), and the whole group is
//! re-verified before anything is recorded. Recording is atomic — a partial
//! write would leave a transaction on disk whose predecessors were never
//! validated.
//!
//! Known leakage, documented and not fixed here: the peer learns which
//! transactions we already hold from the hashes we do *not* request.
//! Mitigation is out of scope.

use crate::context::ServiceHub;
use crate::messages::{
    FetchAttachmentsRequest, FetchAttachmentsResponse, FetchTransactionsRequest,
    FetchTransactionsResponse, MaybeSignedTransaction, FETCH_LISTEN_SESSION,
};
use crate::ProtocolError;
use prost::Message;
use std::collections::HashSet;
use std::io::Cursor;
use tally_ledger::TransactionGroup;
use tally_model::{LedgerTransaction, SecureHash, SignedTransaction};
use tally_net::{topics, MessagingService, NodeAddress};

/// DoS ceiling: resolution visiting more transactions than this aborts.
pub const MAX_GRAPH_SIZE: usize = 5_000;

/// What a resolution run did.
#[derive(Debug)]
pub struct ResolutionOutcome {
    /// Transactions downloaded from the peer (now recorded locally).
    pub downloaded: usize,
    /// Ledger form of every downloaded transaction, in id order.
    pub validated: Vec<LedgerTransaction>,
}

/// One resolution conversation with one peer.
pub struct ResolveTransactions {
    seeds: Vec<SecureHash>,
    peer: NodeAddress,
    max_graph: usize,
}

impl ResolveTransactions {
    pub fn new(seeds: Vec<SecureHash>, peer: NodeAddress) -> Self {
        Self {
            seeds,
            peer,
            max_graph: MAX_GRAPH_SIZE,
        }
    }

    /// Override the graph-size ceiling (tests, constrained deployments).
    pub fn with_graph_bound(mut self, max_graph: usize) -> Self {
        Self { max_graph, ..self }
    }

    /// Ensure every transitive ancestor of the seeds is present locally and
    /// verified. Idempotent: a second run over the same seeds fetches
    /// nothing and changes nothing.
    #[tracing::instrument(skip(self, hub), fields(peer = %self.peer, seeds = self.seeds.len()))]
    pub async fn run<M: MessagingService>(
        &self,
        hub: &ServiceHub<M>,
    ) -> Result<ResolutionOutcome, ProtocolError> {
        // Insertion-ordered worklist: determinism of the walk must not depend
        // on peer latency or map iteration order.
        let mut next: Vec<SecureHash> = Vec::new();
        let mut seen: HashSet<SecureHash> = HashSet::new();
        for seed in &self.seeds {
            if seen.insert(*seed) {
                next.push(*seed);
            }
        }

        let mut to_verify: Vec<SignedTransaction> = Vec::new();
        let mut already_verified: Vec<LedgerTransaction> = Vec::new();
        let mut visited = 0usize;

        while !next.is_empty() {
            // Partition this round into disk hits and fetches.
            let mut to_fetch: Vec<SecureHash> = Vec::new();
            for hash in next.drain(..) {
                visited += 1;
                if visited > self.max_graph {
                    return Err(ProtocolError::GraphTooLarge { limit: self.max_graph });
                }
                match hub.tx_store.get(&hash)? {
                    Some(signed) => already_verified.push(ledger_from_store(hub, &signed)?),
                    None => to_fetch.push(hash),
                }
            }
            if to_fetch.is_empty() {
                continue;
            }

            let downloaded = self.fetch_transactions(hub, &to_fetch).await?;
            for signed in downloaded {
                let wire = signed.wire_transaction()?;

                // Pull attachments we don't hold yet, with import-time hash
                // validation.
                let missing: Vec<SecureHash> = wire
                    .attachments
                    .iter()
                    .filter(|a| !hub.attachments.contains(a))
                    .copied()
                    .collect();
                if !missing.is_empty() {
                    self.fetch_attachments(hub, &missing).await?;
                }

                // Inputs we haven't walked yet drive the next round.
                for input in &wire.inputs {
                    if seen.insert(input.txhash) {
                        next.push(input.txhash);
                    }
                }
                to_verify.push(signed);
            }
        }

        tracing::debug!(
            downloaded = to_verify.len(),
            from_disk = already_verified.len(),
            "ancestry walk complete"
        );

        let group = TransactionGroup::new(to_verify.clone(), already_verified);
        let validated = group.verify(&hub.registry, &hub.identities)?;

        // The whole downloaded set or nothing.
        hub.tx_store.put_all(&to_verify)?;

        Ok(ResolutionOutcome {
            downloaded: to_verify.len(),
            validated,
        })
    }

    async fn fetch_transactions<M: MessagingService>(
        &self,
        hub: &ServiceHub<M>,
        wanted: &[SecureHash],
    ) -> Result<Vec<SignedTransaction>, ProtocolError> {
        let session = hub.fresh_session();
        let request = FetchTransactionsRequest {
            tx_ids: wanted.iter().map(|h| (*h).into()).collect(),
            reply_to: hub.address().0.clone(),
            reply_session: session,
        };
        hub.send(
            &self.peer,
            topics::FETCH_TRANSACTION,
            FETCH_LISTEN_SESSION,
            request.encode_to_vec(),
        )
        .await?;
        let payload = hub.receive(topics::FETCH_TRANSACTION, session).await?;
        let response = FetchTransactionsResponse::decode(&payload[..])?;

        let mut results = Vec::with_capacity(wanted.len());
        let mut returned = response.transactions.into_iter();
        for requested in wanted {
            let element: MaybeSignedTransaction = returned
                .next()
                .ok_or(ProtocolError::PeerResponseIncomplete { missing: *requested })?;
            let wire_tx = element
                .tx
                .ok_or(ProtocolError::PeerResponseIncomplete { missing: *requested })?;
            let signed = SignedTransaction::try_from(wire_tx)?;
            if signed.id() != *requested {
                return Err(ProtocolError::WrongTransactionReturned {
                    requested: *requested,
                    got: signed.id(),
                });
            }
            results.push(signed);
        }
        Ok(results)
    }

    async fn fetch_attachments<M: MessagingService>(
        &self,
        hub: &ServiceHub<M>,
        wanted: &[SecureHash],
    ) -> Result<(), ProtocolError> {
        let session = hub.fresh_session();
        let request = FetchAttachmentsRequest {
            ids: wanted.iter().map(|h| (*h).into()).collect(),
            reply_to: hub.address().0.clone(),
            reply_session: session,
        };
        hub.send(
            &self.peer,
            topics::FETCH_ATTACHMENT,
            FETCH_LISTEN_SESSION,
            request.encode_to_vec(),
        )
        .await?;
        let payload = hub.receive(topics::FETCH_ATTACHMENT, session).await?;
        let response = FetchAttachmentsResponse::decode(&payload[..])?;

        let mut returned = response.attachments.into_iter();
        for requested in wanted {
            let data = returned
                .next()
                .and_then(|m| m.data)
                .ok_or(ProtocolError::PeerResponseIncomplete { missing: *requested })?;
            let got = hub.attachments.import(&mut Cursor::new(data))?;
            if got != *requested {
                return Err(ProtocolError::AttachmentCorrupt {
                    requested: *requested,
                    got,
                });
            }
        }
        Ok(())
    }
}

/// Rebuild the ledger form of a transaction whose ancestry is already on
/// disk. Recording is atomic over dependency closures, so a stored
/// transaction's parents are always resolvable from the store.
pub fn ledger_from_store<M: MessagingService>(
    hub: &ServiceHub<M>,
    signed: &SignedTransaction,
) -> Result<LedgerTransaction, ProtocolError> {
    let wire = signed.wire_transaction()?;
    let ledger = LedgerTransaction::resolve(&wire, &hub.identities, |r| {
        hub.tx_store
            .get(&r.txhash)
            .ok()
            .flatten()
            .and_then(|parent| parent.wire_transaction().ok())
            .and_then(|w| w.outputs.get(r.index as usize).cloned())
    })?;
    Ok(ledger)
}
