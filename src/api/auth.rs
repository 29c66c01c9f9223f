//! Session-cookie authentication
//!
//! Sessions live in memory only; restarting the daemon logs everyone out.

use parking_lot::Mutex;
use rand::RngCore;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const SESSION_COOKIE: &str = "auth-session";

/// Sessions expire after seven days
pub const SESSION_TTL: Duration = Duration::from_secs(86400 * 7);

/// Paths reachable without a session
pub const PUBLIC_PATHS: &[&str] = &[
    "/login",
    "/logout",
    "/styles.css",
    "/script.js",
    "/friendly-names.json",
];

pub fn is_public(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path)
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn matches(&self, username: &str, password: &str) -> bool {
        constant_time_eq(self.username.as_bytes(), username.as_bytes())
            & constant_time_eq(self.password.as_bytes(), password.as_bytes())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub struct SessionStore {
    ttl: Duration,
    sessions: Mutex<HashMap<String, Instant>>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Start a session and return its token
    pub fn create(&self) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        sessions.retain(|_, expires| *expires > now);
        sessions.insert(token.clone(), now + self.ttl);
        token
    }

    pub fn is_valid(&self, token: &str) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get(token) {
            Some(expires) if *expires > Instant::now() => true,
            Some(_) => {
                sessions.remove(token);
                false
            }
            None => false,
        }
    }

    pub fn remove(&self, token: &str) {
        self.sessions.lock().remove(token);
    }

    /// `Set-Cookie` value for a new session
    pub fn cookie_for(&self, token: &str) -> String {
        format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
            SESSION_COOKIE,
            token,
            self.ttl.as_secs()
        )
    }

    /// `Set-Cookie` value that clears the session cookie
    pub fn expired_cookie() -> String {
        format!("{}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax", SESSION_COOKIE)
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SESSION_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_paths() {
        assert!(is_public("/login"));
        assert!(is_public("/script.js"));
        assert!(!is_public("/"));
        assert!(!is_public("/status"));
        assert!(!is_public("/set-mode"));
    }

    #[test]
    fn test_credentials() {
        let creds = Credentials::new("admin", "hunter2");
        assert!(creds.matches("admin", "hunter2"));
        assert!(!creds.matches("admin", "hunter3"));
        assert!(!creds.matches("root", "hunter2"));
        assert!(!creds.matches("admin", ""));
    }

    #[test]
    fn test_session_lifecycle() {
        let store = SessionStore::default();
        let token = store.create();
        assert_eq!(token.len(), 64);
        assert!(store.is_valid(&token));
        assert!(!store.is_valid("not-a-token"));

        store.remove(&token);
        assert!(!store.is_valid(&token));
    }

    #[test]
    fn test_tokens_unique() {
        let store = SessionStore::default();
        assert_ne!(store.create(), store.create());
    }

    #[test]
    fn test_expired_session_rejected() {
        let store = SessionStore::new(Duration::ZERO);
        let token = store.create();
        assert!(!store.is_valid(&token));
    }

    #[test]
    fn test_cookie_format() {
        let store = SessionStore::default();
        let cookie = store.cookie_for("abc");
        assert!(cookie.starts_with("auth-session=abc;"));
        assert!(cookie.contains("Max-Age=604800"));
        assert!(cookie.contains("HttpOnly"));
        assert!(SessionStore::expired_cookie().contains("Max-Age=0"));
    }
}
