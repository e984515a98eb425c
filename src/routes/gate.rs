// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Navigation gate for the app's client routes.
//!
//! Protected pages need a signed-in user; the login page is for guests only.
//! The gate waits a bounded time for the session to resolve and then decides
//! with the best-known identity, so a slow identity provider never blocks
//! navigation forever.

use crate::auth::SessionTracker;
use std::time::Duration;

pub const LOGIN_PATH: &str = "/login";
pub const HOME_PATH: &str = "/";

/// Who may visit a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Requires an identity.
    Protected,
    /// Only without an identity.
    GuestOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub name: &'static str,
    /// Path pattern; `:param` segments match any single segment.
    pub pattern: &'static str,
    pub access: Access,
}

pub const ROUTES: &[Route] = &[
    Route {
        name: "home",
        pattern: "/",
        access: Access::Protected,
    },
    Route {
        name: "add-recipe",
        pattern: "/add-recipe",
        access: Access::Protected,
    },
    Route {
        name: "recipe-detail",
        pattern: "/recipe/:id",
        access: Access::Protected,
    },
    Route {
        name: "edit-recipe",
        pattern: "/edit/:id",
        access: Access::Protected,
    },
    Route {
        name: "login",
        pattern: LOGIN_PATH,
        access: Access::GuestOnly,
    },
];

impl Route {
    fn matches(&self, path: &str) -> bool {
        let mut pattern = self.pattern.split('/').filter(|s| !s.is_empty());
        let mut actual = path.split('/').filter(|s| !s.is_empty());
        loop {
            match (pattern.next(), actual.next()) {
                (None, None) => return true,
                (Some(p), Some(a)) if p.starts_with(':') || p == a => {}
                _ => return false,
            }
        }
    }
}

/// Look up the route for a path (query string and fragment ignored).
pub fn resolve(path: &str) -> Option<&'static Route> {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    ROUTES.iter().find(|route| route.matches(path))
}

/// Gate decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    Proceed,
    Redirect(&'static str),
}

#[derive(Clone)]
pub struct NavigationGate {
    tracker: SessionTracker,
    ready_timeout: Duration,
}

impl NavigationGate {
    pub fn new(tracker: SessionTracker, ready_timeout: Duration) -> Self {
        Self {
            tracker,
            ready_timeout,
        }
    }

    /// Decide whether navigating to `path` may proceed.
    pub async fn check(&self, path: &str) -> Navigation {
        let Some(route) = resolve(path) else {
            return Navigation::Proceed;
        };

        let signed_in = if self.tracker.ready_now() {
            self.tracker.current().is_some()
        } else {
            match tokio::time::timeout(self.ready_timeout, self.tracker.wait_ready()).await {
                Ok(_) => self.tracker.current().is_some(),
                Err(_) => {
                    tracing::warn!(
                        route = route.name,
                        timeout_ms = self.ready_timeout.as_millis() as u64,
                        "Session not resolved in time, using best-known identity"
                    );
                    self.tracker.current().is_some()
                }
            }
        };

        match (route.access, signed_in) {
            (Access::Protected, false) => {
                tracing::debug!(route = route.name, "Redirecting guest to login");
                Navigation::Redirect(LOGIN_PATH)
            }
            (Access::GuestOnly, true) => Navigation::Redirect(HOME_PATH),
            _ => Navigation::Proceed,
        }
    }
}
