//! Rate-fix oracle
//!
//! Holds an in-memory table of interest-rate observations keyed by
//! `(index, tenor)`, each a date-sorted map. Queries use floor lookup: the
//! greatest recorded date at or before the asked date. Signing attests that
//! every fix command addressed to the oracle matches a known observation —
//! nothing else about the transaction is checked.

use crate::messages::{
    FixQuery, FixResult, QueryRequest, QueryResponse, SignRequest, SignResponse,
    ORACLE_LISTEN_SESSION,
};
use crate::OracleError;
use chrono::NaiveDate;
use prost::Message;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tally_model::wire::{WireFix, WirePartySignature};
use tally_model::{
    sha256, CommandData, FixCommand, FixId, KeyPair, Party, PartySignature, RateDecimal, Tenor,
    WireTransaction,
};
use tally_net::{topics, MessagingService, NetError, NodeAddress};

type FixTable = HashMap<(String, Tenor), BTreeMap<NaiveDate, RateDecimal>>;

pub struct RateOracle {
    party: Party,
    keypair: KeyPair,
    table: Mutex<FixTable>,
}

impl RateOracle {
    pub fn new(name: impl Into<String>, keypair: KeyPair) -> Self {
        let party = Party::new(name, keypair.public_key());
        Self {
            party,
            keypair,
            table: Mutex::new(HashMap::new()),
        }
    }

    pub fn party(&self) -> &Party {
        &self.party
    }

    /// Record observations; later uploads overwrite same-day entries.
    pub fn upload_fixes(&self, fixes: impl IntoIterator<Item = (FixId, RateDecimal)>) {
        let mut table = self.table.lock().expect("fix table lock poisoned");
        for (id, rate) in fixes {
            table
                .entry((id.index, id.tenor))
                .or_default()
                .insert(id.date, rate);
        }
    }

    /// Parse and record a rate file. One fix per line,
    /// `<index> <DD-MonthName-YYYY> <tenor> = <rate>`; `#` comments and blank
    /// lines are skipped. Errors carry the 1-based line number.
    pub fn upload_fix_file(&self, contents: &str) -> Result<usize, OracleError> {
        let fixes = parse_fix_file(contents)?;
        let count = fixes.len();
        self.upload_fixes(fixes);
        Ok(count)
    }

    /// Floor-lookup: the fix at the greatest recorded date `<=` the asked
    /// date, or `None` if nothing that old is known.
    pub fn query(&self, asked: &[FixId]) -> Vec<Option<FixCommand>> {
        let table = self.table.lock().expect("fix table lock poisoned");
        asked
            .iter()
            .map(|id| {
                let by_date = table.get(&(id.index.clone(), id.tenor))?;
                let (date, rate) = by_date.range(..=id.date).next_back()?;
                Some(FixCommand {
                    id: FixId {
                        index: id.index.clone(),
                        tenor: id.tenor,
                        date: *date,
                    },
                    rate: *rate,
                })
            })
            .collect()
    }

    /// Sign the transaction iff every command requiring our key is a fix
    /// command whose data matches a known observation exactly. The rest of
    /// the transaction is none of our business.
    pub fn sign_wire_bytes(&self, wire_bytes: &[u8]) -> Result<PartySignature, OracleError> {
        let tx_id = sha256(wire_bytes);
        let wire = WireTransaction::from_canonical_bytes(wire_bytes)?;
        let our_key = self.keypair.public_key();

        let table = self.table.lock().expect("fix table lock poisoned");
        let mut attested = 0usize;
        for command in wire.commands.iter().filter(|c| c.signers.contains(&our_key)) {
            let fix = match &command.data {
                CommandData::Fix(f) => f,
                _ => return Err(OracleError::NothingToAttest { tx: tx_id }),
            };
            let known = table
                .get(&(fix.id.index.clone(), fix.id.tenor))
                .and_then(|by_date| by_date.get(&fix.id.date));
            match known {
                Some(rate) if *rate == fix.rate => attested += 1,
                _ => return Err(OracleError::UnknownFix(fix.id.clone())),
            }
        }
        drop(table);

        if attested == 0 {
            return Err(OracleError::NothingToAttest { tx: tx_id });
        }

        let sig = self.keypair.sign(wire_bytes);
        tracing::info!(tx = %tx_id, fixes = attested, "fixes attested");
        Ok(PartySignature::new(self.party.clone(), sig))
    }

    /// Answer query and sign requests until the fabric shuts down.
    pub async fn serve(
        self: Arc<Self>,
        endpoint: impl MessagingService,
        oracle_name: &str,
    ) -> Result<(), NetError> {
        let query_topic = topics::oracle_query(oracle_name, ORACLE_LISTEN_SESSION);
        let sign_topic = topics::oracle_sign(oracle_name, ORACLE_LISTEN_SESSION);
        loop {
            tokio::select! {
                payload = endpoint.receive(&query_topic, ORACLE_LISTEN_SESSION) => {
                    match payload {
                        Ok(p) => self.answer_query(&endpoint, oracle_name, &p).await?,
                        Err(NetError::Disconnected) => return Ok(()),
                        Err(e) => return Err(e),
                    }
                }
                payload = endpoint.receive(&sign_topic, ORACLE_LISTEN_SESSION) => {
                    match payload {
                        Ok(p) => self.answer_sign(&endpoint, oracle_name, &p).await?,
                        Err(NetError::Disconnected) => return Ok(()),
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    async fn answer_query(
        &self,
        endpoint: &impl MessagingService,
        oracle_name: &str,
        payload: &[u8],
    ) -> Result<(), NetError> {
        let request = match QueryRequest::decode(payload) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable fix query");
                return Ok(());
            }
        };
        // One result per query in request order; a malformed query is simply
        // an unknown fix.
        let results = request
            .queries
            .iter()
            .map(|q| {
                let fix = fix_id_from_query(q)
                    .and_then(|id| self.query(std::slice::from_ref(&id)).pop().flatten());
                FixResult { fix: fix.map(WireFix::from) }
            })
            .collect();
        endpoint
            .send(
                &NodeAddress::new(request.reply_to),
                &topics::oracle_query(oracle_name, request.reply_session),
                request.reply_session,
                QueryResponse { results }.encode_to_vec(),
            )
            .await
    }

    async fn answer_sign(
        &self,
        endpoint: &impl MessagingService,
        oracle_name: &str,
        payload: &[u8],
    ) -> Result<(), NetError> {
        let request = match SignRequest::decode(payload) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable sign request");
                return Ok(());
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
            .await
    }
}

fn fix_id_from_query(q: &FixQuery) -> Option<FixId> {
    Some(FixId {
        index: q.index.clone(),
        tenor: q.tenor.parse().ok()?,
        date: NaiveDate::from_num_days_from_ce_opt(q.date_days)?,
    })
}

/// Parse a rate file into `(id, rate)` pairs. Lines starting with `#` and
/// blank lines are ignored; anything else must match
/// `<index name with spaces> <DD-MonthName-YYYY> <tenor> = <decimal rate>`.
pub fn parse_fix_file(contents: &str) -> Result<Vec<(FixId, RateDecimal)>, OracleError> {
    let mut fixes = Vec::new();
    for (lineno, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let err = |reason: &str| OracleError::MalformedFixLine {
            line: lineno + 1,
            reason: reason.to_string(),
        };

        let (lhs, rhs) = line.split_once('=').ok_or_else(|| err("missing '='"))?;
        let rate: RateDecimal = rhs
            .trim()
            .parse()
            .map_err(|_| err("unparseable rate"))?;

        let tokens: Vec<&str> = lhs.split_whitespace().collect();
        if tokens.len() < 3 {
            return Err(err("expected '<index> <date> <tenor> = <rate>'"));
        }
        let tenor: Tenor = tokens[tokens.len() - 1]
            .parse()
            .map_err(|_| err("unparseable tenor"))?;
        let date = NaiveDate::parse_from_str(tokens[tokens.len() - 2], "%d-%B-%Y")
            .map_err(|_| err("unparseable date, expected DD-MonthName-YYYY"))?;
        let index = tokens[..tokens.len() - 2].join(" ");

        fixes.push((FixId { index, tenor, date }, rate));
    }
    Ok(fixes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_model::{Command, TransactionBuilder};

    fn libor_1m(day: u32) -> FixId {
        FixId {
            index: "LIBOR".into(),
            tenor: Tenor::Months(1),
            date: NaiveDate::from_ymd_opt(2016, 3, day).unwrap(),
        }
    }

    fn oracle_with_fixes() -> RateOracle {
        let oracle = RateOracle::new("rates.oracle", KeyPair::generate());
        oracle.upload_fixes([
            (libor_1m(14), RateDecimal::new(665, 3)),
            (libor_1m(16), RateDecimal::new(678, 3)),
        ]);
        oracle
    }

    #[test]
    fn floor_lookup_takes_greatest_date_at_or_before() {
        let oracle = oracle_with_fixes();

        // Exact hit.
        let hit = &oracle.query(&[libor_1m(16)])[0];
        assert_eq!(hit.as_ref().unwrap().rate, RateDecimal::new(678, 3));

        // Between two observations: floor to the 14th.
        let floored = &oracle.query(&[libor_1m(15)])[0];
        let floored = floored.as_ref().unwrap();
        assert_eq!(floored.id.date, NaiveDate::from_ymd_opt(2016, 3, 14).unwrap());
        assert_eq!(floored.rate, RateDecimal::new(665, 3));

        // Before everything: unknown.
        assert!(oracle.query(&[libor_1m(1)])[0].is_none());

        // Unknown tenor: unknown.
        let other = FixId {
            index: "LIBOR".into(),
            tenor: Tenor::Months(3),
            date: NaiveDate::from_ymd_opt(2016, 3, 16).unwrap(),
        };
        assert!(oracle.query(&[other])[0].is_none());
    }

    #[test]
    fn parse_fix_file_format() {
        let text = "\
# Example rates
LIBOR 16-March-2016 1M = 0.678

ICE LIBOR 16-March-2016 3M = 0.0123
";
        let fixes = parse_fix_file(text).unwrap();
        assert_eq!(fixes.len(), 2);
        assert_eq!(fixes[0].0.index, "LIBOR");
        assert_eq!(fixes[0].0.tenor, Tenor::Months(1));
        assert_eq!(fixes[0].1, RateDecimal::new(678, 3));
        assert_eq!(fixes[1].0.index, "ICE LIBOR");
        assert_eq!(fixes[1].1, RateDecimal::new(123, 4));
    }

    #[test]
    fn parse_errors_carry_line_numbers() {
        let cases = [
            ("LIBOR 16-March-2016 1M 0.678", 1, "missing '='"),
            ("# ok\nLIBOR 16-Mars-2016 1M = 0.678", 2, "unparseable date"),
            ("LIBOR 16-March-2016 1W = 0.678", 1, "unparseable tenor"),
            ("LIBOR 16-March-2016 1M = zero", 1, "unparseable rate"),
            ("16-March-2016 = 0.678", 1, "expected"),
        ];
        for (text, want_line, want_reason) in cases {
            match parse_fix_file(text).unwrap_err() {
                OracleError::MalformedFixLine { line, reason } => {
                    assert_eq!(line, want_line, "{text:?}");
                    assert!(reason.contains(want_reason), "{text:?}: {reason}");
                }
                other => panic!("expected MalformedFixLine, got {other}"),
            }
        }
    }

    #[test]
    fn sign_attests_matching_fix_commands() {
        let oracle = oracle_with_fixes();
        let known = oracle.query(&[libor_1m(16)])[0].clone().unwrap();

        let mut b = TransactionBuilder::new();
        b.add_command(
            Command::new(
                CommandData::Fix(known),
                vec![oracle.party().owning_key],
            )
            .unwrap(),
        );
        let bytes = b.build().to_canonical_bytes();
        let sig = oracle.sign_wire_bytes(&bytes).unwrap();
        sig.verify(&bytes).unwrap();
    }

    #[test]
    fn sign_rejects_wrong_rate() {
        let oracle = oracle_with_fixes();

        let mut b = TransactionBuilder::new();
        b.add_command(
            Command::new(
                CommandData::Fix(FixCommand {
                    id: libor_1m(16),
                    rate: RateDecimal::new(999, 3),
                }),
                vec![oracle.party().owning_key],
            )
            .unwrap(),
        );
        let err = oracle.sign_wire_bytes(&b.build().to_canonical_bytes()).unwrap_err();
        assert!(matches!(err, OracleError::UnknownFix(_)));
    }

    #[test]
    fn sign_rejects_transactions_with_nothing_to_attest() {
        let oracle = oracle_with_fixes();
        let bytes = TransactionBuilder::new().build().to_canonical_bytes();
        let err = oracle.sign_wire_bytes(&bytes).unwrap_err();
        assert!(matches!(err, OracleError::NothingToAttest { .. }));
    }
}
