//! Authentication capability.
//!
//! The sync engine only needs an opaque [`Identity`] and a way to learn when
//! it appears or disappears. Issuing and verifying sign-in links is left to
//! an external service; [`TrustedEmailAuth`] covers self-hosted setups where
//! the email address itself is trusted as the identity.

use std::fmt;
use std::future::Future;

use tokio::sync::watch;

/// Opaque authenticated-user reference gating remote sync.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    /// Wraps an identity string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors from the auth capability.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Sign-in was attempted without an address.
    #[error("Please enter an email address.")]
    EmailEmpty,

    /// The address is not usable for sign-in.
    #[error("invalid email address: {0}")]
    InvalidEmail(String),
}

/// Trims an email address and rejects blank or obviously invalid input.
///
/// # Errors
///
/// Returns [`AuthError::EmailEmpty`] for blank input and
/// [`AuthError::InvalidEmail`] when there is no `@` with text on both sides.
pub fn normalize_email(raw: &str) -> Result<String, AuthError> {
    let email = raw.trim();
    if email.is_empty() {
        return Err(AuthError::EmailEmpty);
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email.to_string()),
        _ => Err(AuthError::InvalidEmail(email.to_string())),
    }
}

/// Something that establishes and clears user sessions.
pub trait AuthProvider: Send + Sync {
    /// Starts a sign-in for `email`.
    ///
    /// Providers backed by an email-link service return once the link has
    /// been sent; the identity appears on [`AuthProvider::identity`] later.
    fn sign_in_with_email(
        &self,
        email: &str,
    ) -> impl Future<Output = Result<(), AuthError>> + Send;

    /// Ends the current session, if any.
    fn sign_out(&self) -> impl Future<Output = Result<(), AuthError>> + Send;

    /// Watches the current identity. `None` means signed out.
    fn identity(&self) -> watch::Receiver<Option<Identity>>;
}

/// Provider that trusts the entered address: the lower-cased email becomes
/// the identity immediately.
#[derive(Debug)]
pub struct TrustedEmailAuth {
    current: watch::Sender<Option<Identity>>,
}

impl TrustedEmailAuth {
    /// Creates a signed-out provider.
    #[must_use]
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self { current }
    }

    /// The identity right now.
    #[must_use]
    pub fn current(&self) -> Option<Identity> {
        self.current.borrow().clone()
    }
}

impl Default for TrustedEmailAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthProvider for TrustedEmailAuth {
    async fn sign_in_with_email(&self, email: &str) -> Result<(), AuthError> {
        let email = normalize_email(email)?.to_lowercase();
        tracing::info!(identity = %email, "signed in");
        self.current.send_replace(Some(Identity::new(email)));
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        if self.current.send_replace(None).is_some() {
            tracing::info!("signed out");
        }
        Ok(())
    }

    fn identity(&self) -> watch::Receiver<Option<Identity>> {
        self.current.subscribe()
    }
}
