//! Verified identity attached to a connection.

use crate::error::ConnectionError;

/// A verified user reference and the anonymous name shown to partners.
///
/// Produced by an upstream verification step and trusted as delivered. The
/// external id is never shown to other users.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    external_user_id: String,
    display_name: String,
}

impl Identity {
    /// Validate and build an identity.
    ///
    /// Surrounding whitespace is trimmed from both fields before checking.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidIdentity` if either field is empty after
    ///   trimming
    pub fn new(external_user_id: &str, display_name: &str) -> Result<Self, ConnectionError> {
        let external_user_id = external_user_id.trim();
        let display_name = display_name.trim();

        if external_user_id.is_empty() {
            return Err(ConnectionError::InvalidIdentity("external user id is empty".into()));
        }

        if display_name.is_empty() {
            return Err(ConnectionError::InvalidIdentity("display name is empty".into()));
        }

        Ok(Self {
            external_user_id: external_user_id.to_owned(),
            display_name: display_name.to_owned(),
        })
    }

    /// Opaque user reference from the verification step.
    #[must_use]
    pub fn external_user_id(&self) -> &str {
        &self.external_user_id
    }

    /// Name shown to the partner.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}
