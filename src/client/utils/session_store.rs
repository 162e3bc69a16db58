use keyring::Entry;
use log::{info, warn};
use serde::{Deserialize, Serialize};

const SERVICE: &str = "social_realtime";
const USER: &str = "web_session";
const FALLBACK_FILE: &str = "session.json";

/// What the web application needs to accept our requests and sockets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionCredentials {
    pub session_cookie: Option<String>,
    pub csrf_token: Option<String>,
}

impl SessionCredentials {
    pub fn is_empty(&self) -> bool {
        self.session_cookie.is_none() && self.csrf_token.is_none()
    }

    /// Fill missing values from `stored`; values already present win.
    pub fn or(self, stored: SessionCredentials) -> SessionCredentials {
        SessionCredentials {
            session_cookie: self.session_cookie.or(stored.session_cookie),
            csrf_token: self.csrf_token.or(stored.csrf_token),
        }
    }
}

fn fallback_allowed() -> bool {
    std::env::var("KEYRING_FALLBACK").unwrap_or_default() == "true"
}

fn fallback_path() -> std::path::PathBuf {
    std::path::Path::new("data").join(FALLBACK_FILE)
}

pub fn save_session(credentials: &SessionCredentials) -> anyhow::Result<()> {
    let json = serde_json::to_string(credentials)?;
    let entry = Entry::new(SERVICE, USER);
    match entry.set_password(&json) {
        Ok(()) => Ok(()),
        Err(e) => {
            if !fallback_allowed() {
                return Err(anyhow::anyhow!("keyring unavailable ({}) and file fallback disabled", e));
            }
            let path = fallback_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, json)?;
            // never log the values themselves
            warn!("[SESSION_STORE] Keyring unavailable, persisted session to {}", path.display());
            Ok(())
        }
    }
}

pub fn load_session() -> Option<SessionCredentials> {
    let raw = match Entry::new(SERVICE, USER).get_password() {
        Ok(raw) => raw,
        Err(_) if fallback_allowed() => std::fs::read_to_string(fallback_path()).ok()?,
        Err(_) => return None,
    };
    parse_stored(&raw)
}

fn parse_stored(raw: &str) -> Option<SessionCredentials> {
    match serde_json::from_str::<SessionCredentials>(raw.trim()) {
        Ok(credentials) if !credentials.is_empty() => Some(credentials),
        Ok(_) => None,
        Err(e) => {
            warn!("[SESSION_STORE] Ignoring unreadable stored session: {}", e);
            None
        }
    }
}

pub fn clear_session() -> anyhow::Result<()> {
    let _ = Entry::new(SERVICE, USER).delete_password();
    if fallback_allowed() {
        let path = fallback_path();
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
    }
    info!("[SESSION_STORE] Session cleared");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_values_take_precedence_over_stored() {
        let env = SessionCredentials { session_cookie: Some("env".into()), csrf_token: None };
        let stored = SessionCredentials { session_cookie: Some("old".into()), csrf_token: Some("tok".into()) };
        let merged = env.or(stored);
        assert_eq!(merged.session_cookie.as_deref(), Some("env"));
        assert_eq!(merged.csrf_token.as_deref(), Some("tok"));
    }

    #[test]
    fn stored_blob_parsing() {
        assert_eq!(parse_stored("not json"), None);
        assert_eq!(parse_stored("{}"), None);
        let parsed = parse_stored(r#" {"session_cookie":"abc","csrf_token":null} "#).unwrap();
        assert_eq!(parsed.session_cookie.as_deref(), Some("abc"));
    }
}
