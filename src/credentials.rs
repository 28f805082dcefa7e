//! Bearer token and user id supplied by the surrounding application.

/// Read-only source of the current credentials.
///
/// Both values are read at `connect()` time only; a token refreshed later is
/// picked up by the next connection attempt.
pub trait CredentialStore: Send + Sync {
    fn token(&self) -> Option<String>;
    fn user_id(&self) -> Option<String>;
}

/// Fixed credentials, as handed over by a login screen or the command line.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    token: Option<String>,
    user_id: Option<String>,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            user_id: Some(user_id.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl CredentialStore for StaticCredentials {
    fn token(&self) -> Option<String> {
        self.token.clone()
    }

    fn user_id(&self) -> Option<String> {
        self.user_id.clone()
    }
}

/// Both values, if both are present and non-empty.
pub(crate) fn usable(store: &dyn CredentialStore) -> Option<(String, String)> {
    let token = store.token().filter(|t| !t.trim().is_empty())?;
    let user_id = store.user_id().filter(|u| !u.trim().is_empty())?;
    Some((token, user_id))
}
