use std::collections::HashSet;

use serde_json::Value;
use tracing::{info, warn};

use crate::error::CallError;
use crate::peer::types::Candidate;
use crate::store::{ChangeKind, QueueChange};

/// Тип кандидата по полю `typ`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    Host,
    Srflx,
    Prflx,
    Relay,
    Unknown,
}

pub fn candidate_kind(candidate: &Candidate) -> CandidateKind {
    let mut parts = candidate.candidate.split_whitespace();
    while let Some(part) = parts.next() {
        if part == "typ" {
            return match parts.next() {
                Some("host") => CandidateKind::Host,
                Some("srflx") => CandidateKind::Srflx,
                Some("prflx") => CandidateKind::Prflx,
                Some("relay") => CandidateKind::Relay,
                _ => CandidateKind::Unknown,
            };
        }
    }
    CandidateKind::Unknown
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
    pub other: usize,
}

pub fn analyze_candidates(candidates: &[Candidate]) -> CandidateSummary {
    let mut summary = CandidateSummary::default();
    for candidate in candidates {
        match candidate_kind(candidate) {
            CandidateKind::Host => summary.host += 1,
            CandidateKind::Srflx => summary.srflx += 1,
            CandidateKind::Relay => summary.relay += 1,
            CandidateKind::Prflx | CandidateKind::Unknown => summary.other += 1,
        }
    }

    info!(
        host = summary.host,
        srflx = summary.srflx,
        relay = summary.relay,
        other = summary.other,
        "candidate analysis"
    );
    if summary.relay == 0 {
        warn!("no TURN relay candidates found, connection through NAT may fail");
    }
    summary
}

/// Запись кандидата для очереди канала
pub fn candidate_record(candidate: &Candidate) -> Result<Value, CallError> {
    serde_json::to_value(candidate).map_err(|e| CallError::InvalidRecord {
        what: "candidate",
        reason: e.to_string(),
    })
}

pub fn parse_candidate(record: &Value) -> Result<Candidate, CallError> {
    serde_json::from_value(record.clone()).map_err(|e| CallError::InvalidRecord {
        what: "candidate",
        reason: e.to_string(),
    })
}

/// Учёт уже принятых записей очереди собеседника.
///
/// Хранилище доставляет записи at-least-once, поэтому повтор отсекается по id
/// записи в хранилище, а не по содержимому.
#[derive(Debug, Default)]
pub struct CandidateLedger {
    seen: HashSet<String>,
}

impl CandidateLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Кандидат, который нужно передать транспорту, если изменение новое.
    /// Не-`Added` изменения и повторы дают `Ok(None)`.
    pub fn admit(&mut self, change: &QueueChange) -> Result<Option<Candidate>, CallError> {
        if change.kind != ChangeKind::Added {
            return Ok(None);
        }
        if self.seen.contains(&change.entry_id) {
            return Ok(None);
        }
        let candidate = parse_candidate(&change.record)?;
        self.seen.insert(change.entry_id.clone());
        Ok(Some(candidate))
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn change(kind: ChangeKind, id: &str, candidate: &str) -> QueueChange {
        QueueChange {
            kind,
            entry_id: id.into(),
            record: json!({ "candidate": candidate, "sdpMid": "0", "sdpMLineIndex": 0 }),
        }
    }

    #[test]
    fn replayed_entry_is_admitted_once() {
        let mut ledger = CandidateLedger::new();
        let c = change(ChangeKind::Added, "e1", "candidate:1 1 udp 1 10.0.0.1 5000 typ host");

        assert!(ledger.admit(&c).unwrap().is_some());
        assert!(ledger.admit(&c).unwrap().is_none());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn identical_content_under_new_entry_id_is_admitted() {
        let mut ledger = CandidateLedger::new();
        let text = "candidate:1 1 udp 1 10.0.0.1 5000 typ host";
        assert!(ledger.admit(&change(ChangeKind::Added, "e1", text)).unwrap().is_some());
        assert!(ledger.admit(&change(ChangeKind::Added, "e2", text)).unwrap().is_some());
    }

    #[test]
    fn modified_and_removed_changes_are_ignored() {
        let mut ledger = CandidateLedger::new();
        let text = "candidate:1 1 udp 1 10.0.0.1 5000 typ host";
        assert!(ledger.admit(&change(ChangeKind::Modified, "e1", text)).unwrap().is_none());
        assert!(ledger.admit(&change(ChangeKind::Removed, "e1", text)).unwrap().is_none());
        assert!(ledger.is_empty());
    }

    #[test]
    fn malformed_record_is_reported_and_not_marked() {
        let mut ledger = CandidateLedger::new();
        let bad = QueueChange {
            kind: ChangeKind::Added,
            entry_id: "e1".into(),
            record: json!({ "sdpMid": "0" }),
        };
        assert!(matches!(ledger.admit(&bad), Err(CallError::InvalidRecord { .. })));
        assert!(ledger.is_empty());
    }

    #[test]
    fn candidate_types_are_counted() {
        let candidates = vec![
            Candidate::new("candidate:1 1 udp 2122260223 192.0.2.1 54400 typ host"),
            Candidate::new("candidate:2 1 udp 1686052607 203.0.113.5 54400 typ srflx raddr 192.0.2.1 rport 54400"),
            Candidate::new("candidate:3 1 udp 41885439 3.208.30.246 3478 typ relay raddr 0.0.0.0 rport 0"),
            Candidate::new("garbage"),
        ];
        let summary = analyze_candidates(&candidates);
        assert_eq!(
            summary,
            CandidateSummary {
                host: 1,
                srflx: 1,
                relay: 1,
                other: 1
            }
        );
    }
}
