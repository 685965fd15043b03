//! stammtisch-auth – Auth-, Berechtigungs- und Moderations-Service
//!
//! Dieses Crate implementiert:
//! - Passwort-Hashing mit Argon2id
//! - Session-Management (in-memory mit TTL)
//! - AuthService (Registrierung mit E-Mail-Bestaetigung, Login, 2FA, Passwort-Reset)
//! - PermissionService (Besitzer, Rollen, Legacy-Flags)
//! - ModerationService (Kick, Ban, Timeout)
//! - InviteService (Einladungscodes)
//! - Sliding-Window Rate-Limiter

pub mod error;
pub mod invite_service;
pub mod mail;
pub mod moderation_service;
pub mod password;
pub mod pending;
pub mod permission_service;
pub mod rate_limit;
pub mod service;
pub mod session;
pub mod zwei_faktor;

// Bequeme Re-Exporte
pub use error::{AuthError, AuthResult};
pub use invite_service::InviteService;
pub use mail::MailVersand;
pub use moderation_service::{massnahme_aktiv, Massnahme, ModerationService};
pub use password::{passwort_hashen, passwort_verifizieren};
pub use pending::{PendingSignup, PendingSignups};
pub use permission_service::{PermissionService, LEGACY_BERECHTIGUNGEN};
pub use rate_limit::{RateLimitKonfig, RateLimiter};
pub use service::{AuthKonfig, AuthService, Registrierung, SignupErgebnis, RESET_ANTWORT};
pub use session::{Session, SessionStore};
pub use zwei_faktor::ZweiFaktorEinrichtung;
