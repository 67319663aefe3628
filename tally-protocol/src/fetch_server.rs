//! Fetch responder
//!
//! The serving half of dependency resolution: answers transaction and
//! attachment fetch requests from the local stores, one response element per
//! requested id, in request order. Unknown ids come back empty — the
//! requester decides whether that is fatal. An attachment that fails its
//! on-disk hash check is quarantined and never served.

use crate::messages::{
    FetchAttachmentsRequest, FetchAttachmentsResponse, FetchTransactionsRequest,
    FetchTransactionsResponse, MaybeAttachment, MaybeSignedTransaction, FETCH_LISTEN_SESSION,
};
use prost::Message;
use std::io::Read;
use std::sync::Arc;
use tally_model::SecureHash;
use tally_net::{topics, MessagingService, NetError, NodeAddress};
use tally_store::{AttachmentStore, TransactionStore};

pub struct FetchResponder {
    tx_store: Arc<TransactionStore>,
    attachments: Arc<AttachmentStore>,
}

impl FetchResponder {
    pub fn new(tx_store: Arc<TransactionStore>, attachments: Arc<AttachmentStore>) -> Self {
        Self { tx_store, attachments }
    }

    /// Serve fetch requests until the fabric shuts down.
    pub async fn serve(self, endpoint: impl MessagingService) -> Result<(), NetError> {
        loop {
            tokio::select! {
                payload = endpoint.receive(topics::FETCH_TRANSACTION, FETCH_LISTEN_SESSION) => {
                    match payload {
                        Ok(p) => self.answer_transactions(&endpoint, &p).await?,
                        Err(NetError::Disconnected) => return Ok(()),
                        Err(e) => return Err(e),
                    }
                }
                payload = endpoint.receive(topics::FETCH_ATTACHMENT, FETCH_LISTEN_SESSION) => {
                    match payload {
                        Ok(p) => self.answer_attachments(&endpoint, &p).await?,
                        Err(NetError::Disconnected) => return Ok(()),
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    async fn answer_transactions(
        &self,
        endpoint: &impl MessagingService,
        payload: &[u8],
    ) -> Result<(), NetError> {
        let request = match FetchTransactionsRequest::decode(payload) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable transaction fetch");
                return Ok(());
            }
        };
        let transactions = request
            .tx_ids
            .iter()
            .map(|wire_hash| {
                let tx = SecureHash::try_from(wire_hash.clone())
                    .ok()
                    .and_then(|id| self.tx_store.get(&id).ok().flatten())
                    .map(|signed| signed.to_wire());
                MaybeSignedTransaction { tx }
            })
            .collect();
        endpoint
            .send(
                &NodeAddress::new(request.reply_to),
                topics::FETCH_TRANSACTION,
                request.reply_session,
                FetchTransactionsResponse { transactions }.encode_to_vec(),
            )
            .await
    }

    async fn answer_attachments(
        &self,
        endpoint: &impl MessagingService,
        payload: &[u8],
    ) -> Result<(), NetError> {
        let request = match FetchAttachmentsRequest::decode(payload) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable attachment fetch");
                return Ok(());
            }
        };
        let attachments = request
            .ids
            .iter()
            .map(|wire_hash| MaybeAttachment {
                data: SecureHash::try_from(wire_hash.clone())
                    .ok()
                    .and_then(|id| self.read_blob(&id)),
            })
            .collect();
        endpoint
            .send(
                &NodeAddress::new(request.reply_to),
                topics::FETCH_ATTACHMENT,
                request.reply_session,
                FetchAttachmentsResponse { attachments }.encode_to_vec(),
            )
            .await
    }

    /// Read an attachment end to end through the hash check. A blob that no
    /// longer matches its name is quarantined and reported absent.
    fn read_blob(&self, id: &SecureHash) -> Option<Vec<u8>> {
        let mut reader = self.attachments.open_attachment(id).ok().flatten()?;
        let mut bytes = Vec::new();
        match reader.read_to_end(&mut bytes) {
            Ok(_) => Some(bytes),
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "stored attachment failed its hash check");
                let _ = self.attachments.quarantine(id);
                None
            }
        }
    }
}
