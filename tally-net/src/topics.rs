//! Topic strings
//!
//! Every conversation in the system runs on one of these topics. Fetch and
//! trade topics are fixed; oracle topics embed the oracle's name and the
//! session, since one oracle serves many conversations at once.

pub const TRADE_SELLER: &str = "platform.trade.seller";
pub const TRADE_BUYER: &str = "platform.trade.buyer";
pub const FETCH_TRANSACTION: &str = "platform.fetch.transaction";
pub const FETCH_ATTACHMENT: &str = "platform.fetch.attachment";

/// `<oracle>.query.<session>`
pub fn oracle_query(oracle: &str, session_id: u64) -> String {
    format!("{oracle}.query.{session_id}")
}

/// `<oracle>.sign.<session>`
pub fn oracle_sign(oracle: &str, session_id: u64) -> String {
    format!("{oracle}.sign.{session_id}")
}
