use serde::{Deserialize, Serialize};

/// Имя очереди кандидатов, которую пишет offerer
pub const OFFER_CANDIDATES: &str = "offerCandidates";

/// Имя очереди кандидатов, которую пишет answerer
pub const ANSWER_CANDIDATES: &str = "answerCandidates";

/// Сторона звонка
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Offerer,
    Answerer,
}

impl Role {
    /// Очередь, в которую эта сторона только дописывает
    pub fn local_queue(&self) -> &'static str {
        match self {
            Role::Offerer => OFFER_CANDIDATES,
            Role::Answerer => ANSWER_CANDIDATES,
        }
    }

    /// Очередь собеседника, на которую эта сторона только подписывается
    pub fn remote_queue(&self) -> &'static str {
        match self {
            Role::Offerer => ANSWER_CANDIDATES,
            Role::Answerer => OFFER_CANDIDATES,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Offerer => "offerer",
            Role::Answerer => "answerer",
        }
    }
}

/// Состояние звонка. Переходы только вперёд; `Connected` и `Failed` терминальны.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CallState {
    Idle,
    DescriptionPublished,
    RemoteDescriptionApplied,
    Connected,
    Failed,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Idle => "IDLE",
            CallState::DescriptionPublished => "PUBLISHED",
            CallState::RemoteDescriptionApplied => "NEGOTIATING",
            CallState::Connected => "CONNECTED",
            CallState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Connected | CallState::Failed)
    }

    /// Допустим ли переход `self -> next`
    pub fn can_advance_to(&self, next: CallState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            CallState::Failed => true,
            _ => next > *self,
        }
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queues_are_unidirectional_per_role() {
        assert_eq!(Role::Offerer.local_queue(), Role::Answerer.remote_queue());
        assert_eq!(Role::Answerer.local_queue(), Role::Offerer.remote_queue());
        assert_ne!(Role::Offerer.local_queue(), Role::Offerer.remote_queue());
    }

    #[test]
    fn states_only_move_forward() {
        assert!(CallState::Idle.can_advance_to(CallState::DescriptionPublished));
        assert!(CallState::DescriptionPublished.can_advance_to(CallState::RemoteDescriptionApplied));
        assert!(!CallState::RemoteDescriptionApplied.can_advance_to(CallState::DescriptionPublished));
        assert!(CallState::Idle.can_advance_to(CallState::Failed));
        assert!(!CallState::Connected.can_advance_to(CallState::Failed));
        assert!(!CallState::Failed.can_advance_to(CallState::Connected));
    }

    #[test]
    fn ui_names() {
        assert_eq!(CallState::RemoteDescriptionApplied.to_string(), "NEGOTIATING");
        assert_eq!(CallState::DescriptionPublished.as_str(), "PUBLISHED");
    }
}
