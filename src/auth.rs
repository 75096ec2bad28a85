//! Bearer token source.
//!
//! The client never creates or caches credentials: it asks a
//! [`TokenProvider`] each time a connection is opened. Credential storage
//! lives elsewhere in the application.

/// Supplies the current bearer token, if the user is signed in.
pub trait TokenProvider: Send {
    /// Current token, or `None` when unauthenticated.
    fn auth_token(&self) -> Option<String>;
}

impl<F> TokenProvider for F
where
    F: Fn() -> Option<String> + Send,
{
    fn auth_token(&self) -> Option<String> {
        self()
    }
}

/// A fixed token, mostly for tests and one-shot tools.
#[derive(Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    /// Provider that always returns `token`.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    /// Provider that never has a token.
    #[must_use]
    pub fn none() -> Self {
        Self(None)
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StaticToken")
            .field(&self.0.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl TokenProvider for StaticToken {
    fn auth_token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Reads the token from an environment variable on every call.
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    /// Environment variable read by default.
    pub const DEFAULT_VAR: &'static str = "MANGO_CHAT_TOKEN";

    /// Provider reading `var`.
    #[must_use]
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvToken {
    fn default() -> Self {
        Self::new(Self::DEFAULT_VAR)
    }
}

impl TokenProvider for EnvToken {
    fn auth_token(&self) -> Option<String> {
        std::env::var(&self.var).ok().filter(|t| !t.trim().is_empty())
    }
}
