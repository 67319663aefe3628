//! Timestamping authority
//!
//! Signs a transaction iff the timestamp command it carries brackets true
//! time, treating a missing bound as unbounded. The signature is
//! legally-identifiable: counterparties accept it because of *who* witnessed
//! the time, not just which key.

use crate::messages::{SignRequest, SignResponse, ORACLE_LISTEN_SESSION};
use crate::OracleError;
use prost::Message;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tally_model::wire::WirePartySignature;
use tally_model::{sha256, KeyPair, Party, PartySignature, WireTransaction};
use tally_net::{topics, MessagingService, NetError, NodeAddress};

/// Where the authority reads true time from.
///
/// The deployment contract is a UTC source (GPS-disciplined in production)
/// whose skew stays well inside the windows parties declare; the authority
/// itself applies no slop, so any tolerance must already be in the window.
pub trait TimeSource: Send + Sync {
    /// True time in milliseconds since the Unix epoch.
    fn true_time_ms(&self) -> u64;
}

/// The operating system's UTC clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct UtcClock;

impl TimeSource for UtcClock {
    fn true_time_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock set before the Unix epoch")
            .as_millis() as u64
    }
}

/// A pinned instant, for driving window checks in tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub u64);

impl TimeSource for FixedClock {
    fn true_time_ms(&self) -> u64 {
        self.0
    }
}

pub struct TimestampingAuthority {
    party: Party,
    keypair: KeyPair,
    clock: Arc<dyn TimeSource>,
}

impl TimestampingAuthority {
    pub fn new(name: impl Into<String>, keypair: KeyPair, clock: Arc<dyn TimeSource>) -> Self {
        let party = Party::new(name, keypair.public_key());
        Self { party, keypair, clock }
    }

    pub fn party(&self) -> &Party {
        &self.party
    }

    /// Witness the transaction's declared window against true time and sign
    /// its canonical bytes.
    pub fn sign_wire_bytes(&self, wire_bytes: &[u8]) -> Result<PartySignature, OracleError> {
        let tx_id = sha256(wire_bytes);
        let wire = WireTransaction::from_canonical_bytes(wire_bytes)?;

        let window = wire
            .timestamp_command()
            .ok_or(OracleError::TimestampMissing { tx: tx_id })?;

        let addressed_to_us = wire.commands.iter().any(|c| {
            matches!(c.data, tally_model::CommandData::Timestamp(_))
                && c.signers.contains(&self.keypair.public_key())
        });
        if !addressed_to_us {
            return Err(OracleError::NotAddressedToUs { tx: tx_id });
        }

        let now_ms = self.clock.true_time_ms();
        if !window.brackets(now_ms) {
            let fmt = |b: Option<u64>, inf: &str| {
                b.map_or_else(|| inf.to_string(), |v| v.to_string())
            };
            return Err(OracleError::TimestampOutsideWindow {
                tx: tx_id,
                now_ms,
                after: fmt(window.after_ms(), "-inf"),
                before: fmt(window.before_ms(), "+inf"),
            });
        }

        let sig = self.keypair.sign(wire_bytes);
        tracing::info!(tx = %tx_id, now_ms, "timestamp witnessed");
        Ok(PartySignature::new(self.party.clone(), sig))
    }

    /// Answer signing requests arriving on our well-known topic until the
    /// fabric shuts down.
    pub async fn serve(
        self: Arc<Self>,
        endpoint: impl MessagingService,
        oracle_name: &str,
    ) -> Result<(), NetError> {
        let listen_topic = topics::oracle_sign(oracle_name, ORACLE_LISTEN_SESSION);
        loop {
            let payload = match endpoint.receive(&listen_topic, ORACLE_LISTEN_SESSION).await {
                Ok(p) => p,
                Err(NetError::Disconnected) => return Ok(()),
                Err(e) => return Err(e),
            };
            let request = match SignRequest::decode(&payload[..]) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping undecodable sign request");
                    continue;
                }
            };
            let response = match self.sign_wire_bytes(&request.wire_bytes) {
                Ok(party_sig) => SignResponse {
                    sig: Some(WirePartySignature {
                        party_name: party_sig.party().name.clone(),
                        party_key: party_sig.party().owning_key.to_vec(),
                        sig: party_sig.signature().bytes.to_vec(),
                    }),
                    error: None,
                },
                Err(e) => SignResponse {
                    sig: None,
                    error: Some(e.to_string()),
                },
            };
            endpoint
                .send(
                    &NodeAddress::new(request.reply_to),
                    &topics::oracle_sign(oracle_name, request.reply_session),
                    request.reply_session,
                    response.encode_to_vec(),
                )
                .await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_model::{Command, CommandData, TimestampCommand, TransactionBuilder};

    fn tx_with_window(
        tsa_key: tally_model::PubKey,
        after: Option<u64>,
        before: Option<u64>,
    ) -> Vec<u8> {
        let mut b = TransactionBuilder::new();
        b.add_command(
            Command::new(
                CommandData::Timestamp(TimestampCommand::new(after, before).unwrap()),
                vec![tsa_key],
            )
            .unwrap(),
        );
        b.build().to_canonical_bytes()
    }

    fn tsa_at(time_ms: u64) -> TimestampingAuthority {
        TimestampingAuthority::new(
            "Timestamping Witness",
            KeyPair::generate(),
            Arc::new(FixedClock(time_ms)),
        )
    }

    #[test]
    fn utc_clock_runs_and_never_steps_backwards() {
        let clock = UtcClock;
        let first = clock.true_time_ms();
        let second = clock.true_time_ms();
        assert!(first > 0);
        assert!(second >= first);
    }

    #[test]
    fn signs_inside_window() {
        let tsa = tsa_at(1_000);
        let bytes = tx_with_window(tsa.party().owning_key, Some(900), Some(1_100));
        let sig = tsa.sign_wire_bytes(&bytes).unwrap();
        assert_eq!(sig.party().name, "Timestamping Witness");
        sig.verify(&bytes).unwrap();
    }

    #[test]
    fn missing_bounds_are_unbounded() {
        let tsa = tsa_at(1_000);
        let after_only = tx_with_window(tsa.party().owning_key, Some(900), None);
        tsa.sign_wire_bytes(&after_only).unwrap();
        let before_only = tx_with_window(tsa.party().owning_key, None, Some(1_100));
        tsa.sign_wire_bytes(&before_only).unwrap();
    }

    #[test]
    fn refuses_outside_window() {
        let tsa = tsa_at(2_000);
        let bytes = tx_with_window(tsa.party().owning_key, Some(900), Some(1_100));
        let err = tsa.sign_wire_bytes(&bytes).unwrap_err();
        assert!(matches!(err, OracleError::TimestampOutsideWindow { now_ms: 2_000, .. }));
    }

    #[test]
    fn refuses_without_timestamp_command() {
        let tsa = tsa_at(1_000);
        let bytes = TransactionBuilder::new().build().to_canonical_bytes();
        let err = tsa.sign_wire_bytes(&bytes).unwrap_err();
        assert!(matches!(err, OracleError::TimestampMissing { .. }));
    }

    #[test]
    fn refuses_when_not_the_required_signer() {
        let tsa = tsa_at(1_000);
        let someone_else = KeyPair::generate();
        let bytes = tx_with_window(someone_else.public_key(), Some(900), Some(1_100));
        let err = tsa.sign_wire_bytes(&bytes).unwrap_err();
        assert!(matches!(err, OracleError::NotAddressedToUs { .. }));
    }
}
