use once_cell::sync::OnceCell;
use tracing::{debug, info};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;
use crate::peer::state::{CallState, Role};
use crate::peer::types::Candidate;

static INIT: OnceCell<()> = OnceCell::new();

/// Установка подписчика tracing с временными метками; повторные вызовы ничего не делают.
/// `RUST_LOG` имеет приоритет над фильтром из конфига.
pub fn init(config: &LogConfig) {
    INIT.get_or_init(|| {
        if !enabled(config) {
            return;
        }
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.filter))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        // подписчик мог быть установлен хостом, это не ошибка
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".into()))
            .with_target(true)
            .try_init();
    });
}

fn enabled(config: &LogConfig) -> bool {
    if cfg!(debug_assertions) && !crate::config::dev::ENABLE_LOGGING {
        return false;
    }
    crate::config::LOGGING_ENABLED || config.enabled
}

/// Печать ICE-candidate при появлении (Trickle-ICE)
pub fn dump_candidate(label: &str, cand: &Candidate) {
    debug!(
        label,
        candidate = %cand.candidate,
        sdp_mid = ?cand.sdp_mid,
        sdp_mline_index = ?cand.sdp_mline_index,
        "trickle candidate"
    );
}

/// Переход состояния звонка
pub fn emit_state(role: Role, channel_id: Option<&str>, from: CallState, to: CallState) {
    info!(
        role = role.as_str(),
        channel_id = channel_id.unwrap_or("-"),
        from = from.as_str(),
        to = to.as_str(),
        "call state changed"
    );
}
