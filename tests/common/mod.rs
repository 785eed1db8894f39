#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use relaycall_lib::peer::state::{ANSWER_CANDIDATES, OFFER_CANDIDATES};
use relaycall_lib::{CallState, CallStatus, Candidate, Coordinator, LoopbackTransport, MemoryStore};
use tokio::time::{sleep, timeout, Instant};

pub const COLLECTION: &str = "channels";
pub const WAIT: Duration = Duration::from_secs(2);

pub type LoopbackCall = Coordinator<LoopbackTransport, MemoryStore>;

pub fn call(store: &Arc<MemoryStore>, name: &str, candidates: usize) -> (LoopbackCall, Arc<LoopbackTransport>) {
    let transport = Arc::new(LoopbackTransport::new(name, candidates));
    (Coordinator::new(transport.clone(), store.clone()), transport)
}

pub async fn reach(call: &LoopbackCall, state: CallState) -> CallStatus {
    let status = timeout(WAIT, call.wait_for_state(state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state}, at {}", call.call_state()));
    assert_eq!(status.state, state, "unexpected status {status:?}");
    status
}

pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !check() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        sleep(Duration::from_millis(5)).await;
    }
}

/// Даёт драйверам разобрать всё, что уже лежит в подписках
pub async fn settle() {
    sleep(Duration::from_millis(50)).await;
}

pub fn offer_queue(store: &MemoryStore, channel_id: &str) -> Vec<Candidate> {
    parse(store.queue(COLLECTION, channel_id, OFFER_CANDIDATES))
}

pub fn answer_queue(store: &MemoryStore, channel_id: &str) -> Vec<Candidate> {
    parse(store.queue(COLLECTION, channel_id, ANSWER_CANDIDATES))
}

fn parse(records: Vec<serde_json::Value>) -> Vec<Candidate> {
    records
        .into_iter()
        .map(|r| serde_json::from_value(r).expect("candidate record"))
        .collect()
}

pub fn sorted(mut candidates: Vec<Candidate>) -> Vec<String> {
    let mut out: Vec<String> = candidates.drain(..).map(|c| c.candidate).collect();
    out.sort();
    out
}
