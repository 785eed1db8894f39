use tokio::sync::watch;
use tracing::{debug, error};

use crate::error::CallError;
use crate::logger::emit_state;
use crate::peer::ice::CandidateLedger;
use crate::peer::state::{CallState, Role};

/// Наблюдаемое состояние звонка для UI
#[derive(Debug, Clone, PartialEq)]
pub struct CallStatus {
    pub channel_id: Option<String>,
    pub state: CallState,
    pub failure: Option<CallError>,
}

impl Default for CallStatus {
    fn default() -> Self {
        Self {
            channel_id: None,
            state: CallState::Idle,
            failure: None,
        }
    }
}

/// Изменяемое состояние одного звонка. Владелец ровно один: сначала
/// `start_call`/`join_call`, затем задача-драйвер.
pub struct Session {
    role: Role,
    channel_id: Option<String>,
    state: CallState,
    remote_applied: bool,
    candidates: CandidateLedger,
    status: watch::Sender<CallStatus>,
}

impl Session {
    pub fn new(role: Role, status: watch::Sender<CallStatus>) -> Self {
        // след прошлой отклонённой попытки
        status.send_modify(|s| *s = CallStatus::default());
        Self {
            role,
            channel_id: None,
            state: CallState::Idle,
            remote_applied: false,
            candidates: CandidateLedger::new(),
            status,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn channel_id(&self) -> Option<&str> {
        self.channel_id.as_deref()
    }

    pub fn set_channel(&mut self, id: &str) {
        self.channel_id = Some(id.to_string());
        self.status.send_modify(|s| s.channel_id = Some(id.to_string()));
    }

    /// Переход вперёд; недопустимый переход игнорируется
    pub fn advance(&mut self, next: CallState) -> bool {
        self.transition(next, None)
    }

    pub fn fail(&mut self, err: CallError) {
        if self.state.is_terminal() {
            debug!(error = %err, "failure after terminal state ignored");
            return;
        }
        error!(role = self.role.as_str(), error = %err, "call failed");
        self.transition(CallState::Failed, Some(err));
    }

    /// Состояние и ошибка публикуются одной записью: наблюдатель не видит
    /// `Failed` без причины.
    fn transition(&mut self, next: CallState, failure: Option<CallError>) -> bool {
        if !self.state.can_advance_to(next) {
            debug!(from = %self.state, to = %next, "ignoring state transition");
            return false;
        }
        emit_state(self.role, self.channel_id(), self.state, next);
        self.state = next;
        self.status.send_modify(|s| {
            s.state = next;
            if failure.is_some() {
                s.failure = failure;
            }
        });
        true
    }

    /// Нарушение предусловия (нет канала, нет offer): звонок не начат,
    /// состояние остаётся `Idle`, ошибка видна в статусе.
    pub fn reject(self, err: CallError) -> watch::Sender<CallStatus> {
        debug!(role = self.role.as_str(), error = %err, "call rejected");
        self.status.send_modify(|s| {
            s.channel_id = None;
            s.failure = Some(err);
        });
        self.status
    }

    pub fn remote_applied(&self) -> bool {
        self.remote_applied
    }

    /// Отмечает принятие описания собеседника. Повторная отметка возвращает `false`.
    pub fn mark_remote_applied(&mut self) -> bool {
        if self.remote_applied {
            return false;
        }
        self.remote_applied = true;
        if self.state == CallState::DescriptionPublished {
            self.advance(CallState::RemoteDescriptionApplied);
        }
        true
    }

    pub fn candidates(&mut self) -> &mut CandidateLedger {
        &mut self.candidates
    }
}
