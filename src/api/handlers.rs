//! Request routing for the control API

use super::auth::{is_public, Credentials, SessionStore, SESSION_COOKIE};
use super::http::{Request, Response};
use crate::vpn::RouterState;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

const LOGIN_FORM: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Tailscale Router Login</title></head>
<body>
<form method="POST" action="/login">
<input type="text" name="username" placeholder="Username" required>
<input type="password" name="password" placeholder="Password" required>
<button type="submit">Log in</button>
</form>
</body>
</html>
"#;

/// Shared state for every connection
pub struct App {
    state: Arc<RouterState>,
    sessions: SessionStore,
    credentials: Credentials,
    web_root: PathBuf,
}

impl App {
    pub fn new(state: Arc<RouterState>, credentials: Credentials, web_root: impl Into<PathBuf>) -> Self {
        Self {
            state,
            sessions: SessionStore::default(),
            credentials,
            web_root: web_root.into(),
        }
    }

    pub fn state(&self) -> &RouterState {
        &self.state
    }

    pub async fn handle(&self, req: Request) -> Response {
        let method = req.method.as_str();

        if is_public(&req.path) {
            return match (method, req.path.as_str()) {
                ("GET", "/login") => self.login_page().await,
                ("POST", "/login") => self.login(&req),
                ("GET" | "POST", "/logout") => self.logout(&req),
                ("GET", path) => self.static_file(path).await,
                _ => method_not_allowed(),
            };
        }

        if !self.is_authenticated(&req) {
            return Response::redirect("/login");
        }

        match (method, req.path.as_str()) {
            ("GET", "/") => self.static_file("/index.html").await,
            ("GET", "/status") => self.status().await,
            ("POST", "/set-mode") => self.set_mode(&req).await,
            (_, "/" | "/status" | "/set-mode") => method_not_allowed(),
            _ => Response::text(404, "Not found\n"),
        }
    }

    fn is_authenticated(&self, req: &Request) -> bool {
        req.cookie(SESSION_COOKIE)
            .is_some_and(|token| self.sessions.is_valid(token))
    }

    async fn login_page(&self) -> Response {
        match tokio::fs::read(self.web_root.join("login.html")).await {
            Ok(body) => Response::new(200, "text/html; charset=utf-8", body),
            Err(_) => Response::new(200, "text/html; charset=utf-8", LOGIN_FORM),
        }
    }

    fn login(&self, req: &Request) -> Response {
        let form = req.form();
        let username = form.get("username").map(String::as_str).unwrap_or("");
        let password = form.get("password").map(String::as_str).unwrap_or("");

        if !self.credentials.matches(username, password) {
            warn!("Failed login for user {:?}", username);
            return Response::text(401, "Invalid username or password\n");
        }

        let token = self.sessions.create();
        info!("User {} logged in", username);
        Response::redirect("/").with_header("Set-Cookie", self.sessions.cookie_for(&token))
    }

    fn logout(&self, req: &Request) -> Response {
        if let Some(token) = req.cookie(SESSION_COOKIE) {
            self.sessions.remove(token);
        }
        Response::redirect("/login").with_header("Set-Cookie", SessionStore::expired_cookie())
    }

    /// Serve one of the fixed web root files; `path` is never joined unchecked
    async fn static_file(&self, path: &str) -> Response {
        let (name, content_type) = match path {
            "/index.html" => ("index.html", "text/html; charset=utf-8"),
            "/styles.css" => ("styles.css", "text/css"),
            "/script.js" => ("script.js", "application/javascript"),
            "/friendly-names.json" => ("friendly-names.json", "application/json"),
            _ => return Response::text(404, "Not found\n"),
        };

        match tokio::fs::read(self.web_root.join(name)).await {
            Ok(body) => Response::new(200, content_type, body),
            Err(e) => {
                warn!("Cannot read {}: {}", name, e);
                Response::text(404, "Not found\n")
            }
        }
    }

    async fn status(&self) -> Response {
        if !self.state.directory().is_running().await {
            return Response::text(503, "Tailscale is not running or not installed\n");
        }
        let snapshot = self.state.status().await;
        Response::json(&snapshot).unwrap_or_else(|e| e.to_response())
    }

    async fn set_mode(&self, req: &Request) -> Response {
        let result = match req.query_param("mode") {
            Some("direct") => self.state.set_direct().await,
            Some("tailscale") => match req.query_param("node").filter(|n| !n.is_empty()) {
                Some(node) => self.state.set_exit_node(node).await,
                None => return Response::text(400, "Missing node parameter\n"),
            },
            _ => return Response::text(400, "Invalid mode\n"),
        };

        match result {
            Ok(mode) => Response::text(200, format!("Switched to mode: {}\n", mode)),
            Err(e) => Response::text(e.http_status(), format!("{}\n", e)),
        }
    }
}

fn method_not_allowed() -> Response {
    Response::text(405, "Method not allowed\n")
}
