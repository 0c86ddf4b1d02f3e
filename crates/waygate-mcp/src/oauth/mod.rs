//! Embedded OAuth 2.1 Authorization Server
//!
//! The authorization-server half of the deployment: authorization-code flow
//! with mandatory S256 PKCE, strict redirect-URI matching, refresh-token
//! rotation, token revocation, dynamic client registration, and RFC 8707
//! resource-indicator binding. Social identity providers plug in through a
//! trait and share the same consent-session shape.

pub mod endpoints;
pub mod error;
pub mod pkce;
pub mod session;
pub mod social;

pub use endpoints::{OAuthState, OOB_REDIRECT_URI};
pub use error::{OAuthError, OAuthErrorBody};
pub use pkce::{constant_time_eq, s256_challenge, verify_s256, CHALLENGE_METHOD_S256};
pub use session::{PendingAuthorization, UaSession, UserAgentSessionStore, UA_COOKIE};
pub use social::{SocialProfile, SocialProvider};
