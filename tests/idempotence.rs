mod common;

use std::sync::Arc;

use common::*;
use relaycall_lib::channel::Channel;
use relaycall_lib::peer::state::ANSWER_CANDIDATES;
use relaycall_lib::{CallState, Candidate, MemoryStore, Role, SessionDescription, SignalingStore};

fn remote_candidate(n: u16) -> Candidate {
    Candidate {
        candidate: format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 6000 typ host"),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

#[tokio::test]
async fn redelivered_answer_snapshot_is_applied_once() {
    let store = Arc::new(MemoryStore::new());
    let (mut caller, caller_t) = call(&store, "caller", 1);
    let (mut callee, _callee_t) = call(&store, "callee", 1);

    let channel_id = caller.start_call().await.unwrap();
    callee.join_call(&channel_id).await.unwrap();
    reach(&caller, CallState::Connected).await;

    store.redeliver_document(COLLECTION, &channel_id);
    store.redeliver_document(COLLECTION, &channel_id);
    settle().await;

    assert_eq!(caller_t.remote_description_calls().len(), 1);
    assert_eq!(caller.status().failure, None);
}

#[tokio::test]
async fn replayed_candidate_entries_are_ingested_once() {
    let store = Arc::new(MemoryStore::new());
    let (mut caller, caller_t) = call(&store, "caller", 1);
    let (mut callee, callee_t) = call(&store, "callee", 2);

    let channel_id = caller.start_call().await.unwrap();
    callee.join_call(&channel_id).await.unwrap();
    reach(&caller, CallState::Connected).await;
    reach(&callee, CallState::Connected).await;

    store.redeliver_queue(COLLECTION, &channel_id, ANSWER_CANDIDATES);
    store.redeliver_queue(COLLECTION, &channel_id, relaycall_lib::peer::state::OFFER_CANDIDATES);
    settle().await;

    assert_eq!(caller_t.received_candidates().len(), 2);
    assert_eq!(callee_t.received_candidates().len(), 1);
}

#[tokio::test]
async fn modified_entries_are_not_ingested() {
    let store = Arc::new(MemoryStore::new());
    let (mut caller, caller_t) = call(&store, "caller", 0);
    let channel_id = caller.start_call().await.unwrap();

    let entry = store
        .append_to_queue(
            COLLECTION,
            &channel_id,
            ANSWER_CANDIDATES,
            serde_json::to_value(remote_candidate(1)).unwrap(),
        )
        .await
        .unwrap();
    eventually("first ingest", || caller_t.received_candidates().len() == 1).await;

    store.mark_modified(COLLECTION, &channel_id, ANSWER_CANDIDATES, &entry);
    settle().await;
    assert_eq!(caller_t.received_candidates().len(), 1);
}

#[tokio::test]
async fn malformed_entries_are_skipped() {
    let store = Arc::new(MemoryStore::new());
    let (mut caller, caller_t) = call(&store, "caller", 0);
    let channel_id = caller.start_call().await.unwrap();

    store
        .append_to_queue(COLLECTION, &channel_id, ANSWER_CANDIDATES, serde_json::json!({ "bogus": true }))
        .await
        .unwrap();
    store
        .append_to_queue(
            COLLECTION,
            &channel_id,
            ANSWER_CANDIDATES,
            serde_json::to_value(remote_candidate(2)).unwrap(),
        )
        .await
        .unwrap();

    eventually("valid candidate", || caller_t.received_candidates().len() == 1).await;
    assert_eq!(caller.call_state(), CallState::DescriptionPublished);
}

#[tokio::test]
async fn candidates_before_answer_are_all_ingested_once() {
    let store = Arc::new(MemoryStore::new());
    let (mut caller, caller_t) = call(&store, "caller", 0);
    let channel_id = caller.start_call().await.unwrap();
    let (peer, _) = Channel::open(store.clone(), COLLECTION, &channel_id).await.unwrap();

    for n in 1..=3 {
        peer.append_candidate(Role::Answerer, &remote_candidate(n)).await.unwrap();
    }
    eventually("candidates delivered", || caller_t.received_candidates().len() == 3).await;
    assert!(caller_t.applied_candidates().is_empty());

    peer.publish_answer(&SessionDescription::answer("v=0\r\n")).await.unwrap();
    reach(&caller, CallState::Connected).await;

    assert_eq!(caller_t.applied_candidates(), (1..=3).map(remote_candidate).collect::<Vec<_>>());
    assert_eq!(caller_t.remote_description_calls().len(), 1);
}

#[tokio::test]
async fn candidates_after_answer_are_all_ingested_once() {
    let store = Arc::new(MemoryStore::new());
    let (mut caller, caller_t) = call(&store, "caller", 0);
    let channel_id = caller.start_call().await.unwrap();
    let (peer, _) = Channel::open(store.clone(), COLLECTION, &channel_id).await.unwrap();

    peer.publish_answer(&SessionDescription::answer("v=0\r\n")).await.unwrap();
    reach(&caller, CallState::RemoteDescriptionApplied).await;

    for n in 1..=3 {
        peer.append_candidate(Role::Answerer, &remote_candidate(n)).await.unwrap();
    }
    reach(&caller, CallState::Connected).await;
    eventually("all candidates", || caller_t.applied_candidates().len() == 3).await;

    assert_eq!(caller_t.applied_candidates(), (1..=3).map(remote_candidate).collect::<Vec<_>>());
    assert_eq!(caller_t.received_candidates().len(), 3);
}

#[tokio::test]
async fn existing_queue_entries_are_ingested_by_a_late_joiner() {
    let store = Arc::new(MemoryStore::new());
    let (mut caller, _caller_t) = call(&store, "caller", 3);
    let (mut callee, callee_t) = call(&store, "callee", 1);

    let channel_id = caller.start_call().await.unwrap();
    eventually("offer candidates published", || offer_queue(&store, &channel_id).len() == 3).await;

    callee.join_call(&channel_id).await.unwrap();
    reach(&callee, CallState::Connected).await;
    eventually("all offer candidates", || callee_t.applied_candidates().len() == 3).await;
    assert_eq!(sorted(callee_t.applied_candidates()), sorted(offer_queue(&store, &channel_id)));
}
