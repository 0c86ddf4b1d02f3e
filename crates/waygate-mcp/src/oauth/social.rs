//! Social Identity Providers
//!
//! Google, LinkedIn, and GitHub sign-in are external collaborators: the
//! core only defines the trait they implement and the callback entry point
//! that resumes the consent flow. A provider exchanges its authorization
//! code for a profile; the callback maps that profile onto the user-agent
//! session and the flow continues exactly as if the host login had run.

// Layer 2: Third-party crate imports
use async_trait::async_trait;

// Layer 3: Internal module imports
use crate::oauth::error::OAuthError;

/// The profile a provider resolves a callback code into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocialProfile {
    /// Stable user id in the provider's namespace
    pub provider_user_id: String,
    /// Verified email address used to map onto a local user
    pub email: String,
    /// Display name, when the provider shares one
    pub name: Option<String>,
}

/// One social identity provider.
#[async_trait]
pub trait SocialProvider: Send + Sync {
    /// Provider name as it appears in the callback path
    /// (`/oauth/{name}/callback`)
    fn name(&self) -> &'static str;

    /// Exchange the provider's authorization code for a profile.
    ///
    /// # Errors
    ///
    /// Returns `OAuthError::AccessDenied` when the provider rejects the
    /// code, `OAuthError::ServerError` for transport trouble.
    async fn exchange_code(&self, code: &str) -> Result<SocialProfile, OAuthError>;

    /// Map a provider profile onto a local user id. The default derives a
    /// deterministic id from the email; hosts with a user directory
    /// override this to look the user up (or create one).
    fn resolve_user(&self, profile: &SocialProfile) -> String {
        format!("{}:{}", self.name(), profile.email.to_lowercase())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A provider that accepts exactly one code
    pub struct StaticProvider {
        pub accepted_code: String,
        pub profile: SocialProfile,
    }

    #[async_trait]
    impl SocialProvider for StaticProvider {
        fn name(&self) -> &'static str {
            "github"
        }

        async fn exchange_code(&self, code: &str) -> Result<SocialProfile, OAuthError> {
            if code == self.accepted_code {
                Ok(self.profile.clone())
            } else {
                Err(OAuthError::AccessDenied("provider rejected the code".to_string()))
            }
        }
    }
}
