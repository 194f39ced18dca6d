// Bearer credential holder.
//
// One slot per process (or per test), shared by cloning the handle. Reads are
// lock-free so concurrent exchanges never contend on the credential.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use secrecy::{ExposeSecret, SecretString};

/// An opaque bearer token.
///
/// Wraps a [`SecretString`] so the token never shows up in `Debug` output or
/// structured log fields.
#[derive(Debug, Clone)]
pub struct Credential(SecretString);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    /// Value for an `Authorization` header.
    pub(crate) fn bearer_header(&self) -> String {
        format!("Bearer {}", self.0.expose_secret())
    }

    pub(crate) fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl From<SecretString> for Credential {
    fn from(secret: SecretString) -> Self {
        Self(secret)
    }
}

/// Injectable credential context with an explicit set/get/clear lifecycle.
///
/// Cloning yields another handle onto the same slot: a token set through one
/// clone is visible to every executor and connector holding another. The
/// store never persists anything.
#[derive(Clone, Default)]
pub struct CredentialStore {
    slot: Arc<ArcSwapOption<Credential>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds `credential`.
    pub fn with_credential(credential: Credential) -> Self {
        let store = Self::new();
        store.set(credential);
        store
    }

    /// Current credential, if signed in.
    pub fn get(&self) -> Option<Arc<Credential>> {
        self.slot.load_full()
    }

    /// Replace the held credential (sign-in or token refresh).
    pub fn set(&self, credential: Credential) {
        self.slot.store(Some(Arc::new(credential)));
        tracing::debug!("credential set");
    }

    /// Drop the held credential (sign-out or explicit invalidation).
    pub fn clear(&self) {
        if self.slot.swap(None).is_some() {
            tracing::debug!("credential cleared");
        }
    }

    pub fn is_set(&self) -> bool {
        self.slot.load().is_some()
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("is_set", &self.is_set())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn set_get_clear_lifecycle() {
        let store = CredentialStore::new();
        assert!(store.get().is_none());

        store.set(Credential::new("tok-1"));
        assert_eq!(store.get().unwrap().expose(), "tok-1");

        store.set(Credential::new("tok-2"));
        assert_eq!(store.get().unwrap().expose(), "tok-2");

        store.clear();
        assert!(!store.is_set());
    }

    #[test]
    fn clones_share_one_slot() {
        let a = CredentialStore::new();
        let b = a.clone();

        a.set(Credential::new("shared"));
        assert_eq!(b.get().unwrap().expose(), "shared");

        b.clear();
        assert!(a.get().is_none());
    }

    #[test]
    fn debug_output_never_contains_token() {
        let store = CredentialStore::with_credential(Credential::new("super-secret"));
        let rendered = format!("{store:?} {:?}", store.get().unwrap());
        assert!(!rendered.contains("super-secret"), "leaked: {rendered}");
    }

    #[test]
    fn bearer_header_format() {
        assert_eq!(Credential::new("abc").bearer_header(), "Bearer abc");
    }
}
