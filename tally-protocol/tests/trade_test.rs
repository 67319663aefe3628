//! The two-party trade end to end over the in-memory network, with a live
//! timestamping authority.

mod common;

use common::{asset_issue, cash_issue, TestNode};
use std::sync::Arc;
use std::time::Duration;
use tally_model::{Amount, Currency, StateRef, TimestampCommand};
use tally_net::{InMemoryNetwork, NodeAddress};
use tally_oracle::{FixedClock, TimestampingAuthority};
use tally_protocol::{run_buyer, run_seller, BuyerParams, ProtocolError, SellerParams};

const TRUE_TIME_MS: u64 = 1_700_000_000_000;
const TSA_NAME: &str = "timestamping.authority";

struct TradeFixture {
    seller: TestNode,
    buyer: TestNode,
    tsa_key: tally_model::PubKey,
    asset_ref: StateRef,
    _tsa_task: tokio::task::JoinHandle<()>,
}

/// Seller holds one asset; buyer holds three 400 USD notes; TSA witnesses
/// `true_time_ms`.
fn fixture(net: &InMemoryNetwork, true_time_ms: u64) -> TradeFixture {
    let seller = TestNode::new(net, "seller");
    let buyer = TestNode::new(net, "buyer");

    let tsa = Arc::new(TimestampingAuthority::new(
        TSA_NAME,
        tally_model::KeyPair::generate(),
        Arc::new(FixedClock(true_time_ms)),
    ));
    let tsa_key = tsa.party().owning_key;
    let tsa_endpoint = net.endpoint(NodeAddress::new("tsa"));
    let tsa_task = tokio::spawn({
        let tsa = tsa.clone();
        async move {
            let _ = tsa.serve(tsa_endpoint, TSA_NAME).await;
        }
    });

    let paper = asset_issue(&seller.identity, "commercial paper");
    let asset_ref = StateRef::new(paper.id(), 0);
    seller.record(&paper);

    for _ in 0..3 {
        let note = cash_issue(&buyer.identity, 400, Currency::USD);
        buyer.record(&note);
    }

    TradeFixture {
        seller,
        buyer,
        tsa_key,
        asset_ref,
        _tsa_task: tsa_task,
    }
}

fn seller_params(fx: &TradeFixture, session_id: u64, payment_key: tally_model::PubKey) -> SellerParams {
    SellerParams {
        buyer: fx.buyer.address(),
        asset_ref: fx.asset_ref,
        asset_key: fx.seller.key(),
        price: Amount::new(1000, Currency::USD),
        payment_key,
        tsa: NodeAddress::new("tsa"),
        tsa_name: TSA_NAME.into(),
        tsa_key: fx.tsa_key,
        session_id,
    }
}

fn buyer_params(fx: &TradeFixture, session_id: u64, window: TimestampCommand) -> BuyerParams {
    BuyerParams {
        seller: fx.seller.address(),
        expected_kind: "commercial paper".into(),
        max_price: Amount::new(1000, Currency::USD),
        timestamp_window: window,
        tsa_key: fx.tsa_key,
        session_id,
    }
}

#[tokio::test]
async fn successful_trade_ends_with_identical_transactions() {
    let net = InMemoryNetwork::new();
    let fx = fixture(&net, TRUE_TIME_MS);
    let session_id = 77;

    // Payment goes to a fresh seller key, tracked by the seller's wallet.
    let payment_key = fx.seller.hub.keys.fresh_key();
    fx.seller.hub.wallet.track_key(payment_key);

    let seller_p = seller_params(&fx, session_id, payment_key);
    let seller_run = run_seller(&fx.seller.hub, &seller_p);
    let buyer_p = buyer_params(&fx, session_id, TimestampCommand::around(TRUE_TIME_MS, 30_000));
    let buyer_run = run_buyer(&fx.buyer.hub, &buyer_p);
    let (seller_out, buyer_out) = tokio::join!(seller_run, buyer_run);
    let seller_out = seller_out.unwrap();
    let buyer_out = buyer_out.unwrap();

    // Byte-identical fully signed transactions on both sides.
    assert_eq!(
        seller_out.final_tx.encode_to_vec(),
        buyer_out.final_tx.encode_to_vec()
    );
    seller_out.final_tx.verify_signatures().unwrap();

    // Both recorded it.
    let id = seller_out.final_tx.id();
    assert!(fx.seller.hub.tx_store.contains(&id).unwrap());
    assert!(fx.buyer.hub.tx_store.contains(&id).unwrap());

    // The money moved: seller holds the price, buyer holds the change and
    // the asset under its fresh key.
    let seller_snap = fx.seller.hub.wallet.snapshot();
    assert_eq!(seller_snap.balance(Currency::USD).quantity, 1000);
    let buyer_snap = fx.buyer.hub.wallet.snapshot();
    assert_eq!(buyer_snap.balance(Currency::USD).quantity, 200);
    let buyer_has_asset = buyer_snap
        .states()
        .values()
        .any(|s| s.data.as_asset().is_some_and(|a| a.kind == "commercial paper"));
    assert!(buyer_has_asset);
}

#[tokio::test]
async fn late_timestamp_aborts_the_seller_and_starves_the_buyer() {
    let net = InMemoryNetwork::new();
    // True time is far beyond the window the buyer will declare.
    let fx = fixture(&net, TRUE_TIME_MS + 3_600_000);
    let session_id = 78;

    let payment_key = fx.seller.hub.keys.fresh_key();
    fx.seller.hub.wallet.track_key(payment_key);

    let seller_p = seller_params(&fx, session_id, payment_key);
    let seller_run = run_seller(&fx.seller.hub, &seller_p);
    let buyer_p = buyer_params(&fx, session_id, TimestampCommand::around(TRUE_TIME_MS, 30_000));
    let buyer_run = run_buyer(&fx.buyer.hub, &buyer_p);

    // The buyer never gets its signatures; its deadline lives at a higher
    // layer, modelled here by the test timeout.
    let (seller_out, buyer_out) = tokio::join!(
        seller_run,
        tokio::time::timeout(Duration::from_millis(500), buyer_run)
    );

    let err = seller_out.unwrap_err();
    assert!(
        matches!(&err, ProtocolError::TimestampRefused(msg) if msg.contains("outside declared window")),
        "unexpected error: {err}"
    );
    assert!(buyer_out.is_err(), "buyer should still be waiting");
}

#[tokio::test]
async fn overpriced_offer_is_refused_by_the_buyer() {
    let net = InMemoryNetwork::new();
    let fx = fixture(&net, TRUE_TIME_MS);
    let session_id = 79;

    let payment_key = fx.seller.hub.keys.fresh_key();
    let mut params = seller_params(&fx, session_id, payment_key);
    params.price = Amount::new(5000, Currency::USD);

    let seller_run = run_seller(&fx.seller.hub, &params);
    let buyer_p = buyer_params(&fx, session_id, TimestampCommand::around(TRUE_TIME_MS, 30_000));
    let buyer_run = run_buyer(&fx.buyer.hub, &buyer_p);
    let (seller_out, buyer_out) = tokio::join!(
        tokio::time::timeout(Duration::from_millis(500), seller_run),
        buyer_run
    );

    let err = buyer_out.unwrap_err();
    assert!(matches!(err, ProtocolError::UnacceptablePrice { .. }));
    // The buyer walked away, so the seller never hears back.
    assert!(seller_out.is_err(), "seller should still be waiting");
}

#[tokio::test]
async fn wrong_asset_kind_is_refused_by_the_buyer() {
    let net = InMemoryNetwork::new();
    let fx = fixture(&net, TRUE_TIME_MS);
    let session_id = 80;

    let payment_key = fx.seller.hub.keys.fresh_key();
    let seller_p = seller_params(&fx, session_id, payment_key);
    let seller_run = run_seller(&fx.seller.hub, &seller_p);

    let mut bp = buyer_params(&fx, session_id, TimestampCommand::around(TRUE_TIME_MS, 30_000));
    bp.expected_kind = "corporate bond".into();
    let buyer_run = run_buyer(&fx.buyer.hub, &bp);

    let (seller_out, buyer_out) = tokio::join!(
        tokio::time::timeout(Duration::from_millis(500), seller_run),
        buyer_run
    );

    let err = buyer_out.unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::AssetMismatch { expected, got }
            if expected == "corporate bond" && got == "commercial paper"
    ));
    assert!(seller_out.is_err(), "seller should still be waiting");
}
