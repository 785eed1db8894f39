use crate::peer::types::ServerConfig;
use rand::Rng;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 10]>())
}

// Добавляет схему протокола к URL ICE сервера, если она отсутствует
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    if config.url.starts_with("turn:")
        || config.url.starts_with("turns:")
        || config.url.starts_with("stun:")
        || config.url.starts_with("stuns:")
    {
        config.url.clone()
    } else {
        let scheme = if config.is_turn() { "turn:" } else { "stun:" };
        format!("{}{}", scheme, config.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_is_added_from_server_type() {
        let mut cfg = ServerConfig::stun("s", "stun.example.org:3478");
        assert_eq!(add_ice_url_scheme(&cfg), "stun:stun.example.org:3478");

        cfg.r#type = "turn".into();
        assert_eq!(add_ice_url_scheme(&cfg), "turn:stun.example.org:3478");
    }

    #[test]
    fn existing_scheme_is_kept() {
        let cfg = ServerConfig {
            id: "t".into(),
            r#type: "stun".into(),
            url: "turn:3.208.30.246:3478".into(),
            username: None,
            credential: None,
        };
        assert_eq!(add_ice_url_scheme(&cfg), "turn:3.208.30.246:3478");
    }

    #[test]
    fn ids_are_unique_hex() {
        let a = random_id();
        let b = random_id();
        assert_eq!(a.len(), 20);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
