//! Repository-Trait-Definitionen
//!
//! Das Repository-Pattern entkoppelt die Geschaeftslogik von der konkreten
//! Speicherung. Die Traits nutzen `async fn` ohne `Send`-Garantie; Aufrufer
//! laufen deshalb in einer `tokio::task::LocalSet`.

use chrono::{DateTime, Utc};
use stammtisch_core::types::{DmId, ServerId, UserName};

use crate::error::DbResult;
use crate::models::{
    BenutzerRecord, BenutzerUpdate, CodeZweck, EinladungRecord, MitgliedRecord,
    ModerationsRecord, ModerationsTyp, NeueModeration, NeuerBenutzer, RolleRecord, ServerRecord,
    VerifikationsCode,
};

/// Benutzer (Identitaeten)
#[allow(async_fn_in_trait)]
pub trait UserRepository: Send + Sync {
    async fn create(&self, data: NeuerBenutzer<'_>) -> DbResult<BenutzerRecord>;
    async fn get_by_name(&self, username: &str) -> DbResult<Option<BenutzerRecord>>;
    async fn get_by_email(&self, email: &str) -> DbResult<Option<BenutzerRecord>>;
    async fn update(&self, username: &UserName, data: BenutzerUpdate) -> DbResult<BenutzerRecord>;
}

/// Server (Mandanten) und ihre Mitglieder
#[allow(async_fn_in_trait)]
pub trait ServerRepository: Send + Sync {
    async fn get_server(&self, id: ServerId) -> DbResult<Option<ServerRecord>>;
    async fn get_members(&self, id: ServerId) -> DbResult<Vec<UserName>>;
    async fn get_member(
        &self,
        id: ServerId,
        username: &UserName,
    ) -> DbResult<Option<MitgliedRecord>>;
}

/// Rollen und deren Zuweisung
#[allow(async_fn_in_trait)]
pub trait RoleRepository: Send + Sync {
    /// Alle Rollen die `username` im Server zugewiesen sind
    async fn get_roles_for_user(
        &self,
        server_id: ServerId,
        username: &UserName,
    ) -> DbResult<Vec<RolleRecord>>;
}

/// Moderationsmassnahmen (Kick, Ban, Timeout)
#[allow(async_fn_in_trait)]
pub trait ModerationRepository: Send + Sync {
    async fn list_actions(
        &self,
        server_id: ServerId,
        target: &UserName,
        typ: ModerationsTyp,
    ) -> DbResult<Vec<ModerationsRecord>>;

    async fn create_action(&self, data: NeueModeration<'_>) -> DbResult<ModerationsRecord>;

    /// Markiert alle aktiven Massnahmen des Typs als aufgehoben
    ///
    /// Bei Timeouts wird zusaetzlich `expires_at` auf `jetzt` gekuerzt.
    /// Gibt die Anzahl der geaenderten Datensaetze zurueck.
    async fn deactivate_actions(
        &self,
        server_id: ServerId,
        target: &UserName,
        typ: ModerationsTyp,
        jetzt: DateTime<Utc>,
    ) -> DbResult<u64>;
}

/// Direktnachrichten-Unterhaltungen
#[allow(async_fn_in_trait)]
pub trait DmRepository: Send + Sync {
    async fn get_participants(&self, id: DmId) -> DbResult<Option<(UserName, UserName)>>;
}

/// Einladungscodes
#[allow(async_fn_in_trait)]
pub trait InviteRepository: Send + Sync {
    async fn create_invite(&self, code: &str, inviter: &UserName) -> DbResult<EinladungRecord>;
    async fn get_invite(&self, code: &str) -> DbResult<Option<EinladungRecord>>;
    /// Loescht den Code und gibt ihn zurueck; `None` wenn er nicht (mehr) existiert
    async fn consume_invite(&self, code: &str) -> DbResult<Option<EinladungRecord>>;
}

/// Freundschaften
#[allow(async_fn_in_trait)]
pub trait FriendRepository: Send + Sync {
    /// Legt eine gegenseitige Freundschaft an (idempotent)
    async fn add_friendship(&self, a: &UserName, b: &UserName) -> DbResult<()>;
    async fn are_friends(&self, a: &UserName, b: &UserName) -> DbResult<bool>;
}

/// Einmal-Codes fuer E-Mail-Verifikation und Passwort-Reset
#[allow(async_fn_in_trait)]
pub trait VerificationRepository: Send + Sync {
    async fn create_code(&self, code: VerifikationsCode) -> DbResult<()>;
    async fn get_code(&self, zweck: CodeZweck, code: &str) -> DbResult<Option<VerifikationsCode>>;
    async fn delete_code(&self, zweck: CodeZweck, code: &str) -> DbResult<bool>;
    /// Entfernt alle Codes eines Benutzers fuer einen Zweck
    async fn delete_codes_for_user(&self, zweck: CodeZweck, username: &UserName) -> DbResult<u64>;
}

/// Vollstaendiger Persistenz-Zugriff des Kerns
///
/// Automatisch implementiert fuer jeden Typ der alle Einzel-Repositories bereitstellt.
pub trait Persistenz:
    UserRepository
    + ServerRepository
    + RoleRepository
    + ModerationRepository
    + DmRepository
    + InviteRepository
    + FriendRepository
    + VerificationRepository
{
}

impl<T> Persistenz for T where
    T: UserRepository
        + ServerRepository
        + RoleRepository
        + ModerationRepository
        + DmRepository
        + InviteRepository
        + FriendRepository
        + VerificationRepository
{
}
