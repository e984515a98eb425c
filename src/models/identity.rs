//! Signed-in principal.

use serde::{Deserialize, Serialize};

/// How the identity signed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    Anonymous,
    Google,
}

/// Authenticated identity. Owner of every recipe it creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable user ID (document owner key)
    pub uid: String,
    pub provider: AuthProvider,
    /// Email address (federated sign-in only)
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl Identity {
    pub fn anonymous(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            provider: AuthProvider::Anonymous,
            email: None,
            display_name: None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.provider == AuthProvider::Anonymous
    }
}
