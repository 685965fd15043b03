//! Berechtigungspruefung pro Server
//!
//! Reihenfolge:
//! 1. Besitzer des Servers hat jede Berechtigung
//! 2. irgendeine Rolle des Benutzers erteilt sie
//! 3. Legacy-Flag am Mitglied, aber nur fuer [`LEGACY_BERECHTIGUNGEN`]
//! 4. sonst verweigert
//!
//! Rollen-Positionen spielen keine Rolle. Es gibt keinen Cache, damit
//! Rollenaenderungen sofort wirken.

use std::sync::Arc;

use stammtisch_core::types::{ServerId, UserName};
use stammtisch_db::repository::{RoleRepository, ServerRepository};

use crate::error::{AuthError, AuthResult};

/// Berechtigungen, die auch ueber alte Mitglieds-Flags erteilt werden koennen
pub const LEGACY_BERECHTIGUNGEN: &[&str] =
    &["manage_server", "manage_channels", "kick_members", "ban_members"];

pub struct PermissionService<D: ServerRepository + RoleRepository> {
    db: Arc<D>,
}

impl<D: ServerRepository + RoleRepository> PermissionService<D> {
    pub fn neu(db: Arc<D>) -> Self {
        Self { db }
    }

    /// `false` auch fuer unbekannte Server
    pub async fn berechtigung_pruefen(
        &self,
        server_id: ServerId,
        username: &UserName,
        berechtigung: &str,
    ) -> AuthResult<bool> {
        let Some(server) = self.db.get_server(server_id).await? else {
            return Ok(false);
        };
        if &server.owner == username {
            return Ok(true);
        }

        let rollen = self.db.get_roles_for_user(server_id, username).await?;
        if rollen.iter().any(|r| r.erteilt(berechtigung)) {
            return Ok(true);
        }

        if LEGACY_BERECHTIGUNGEN.contains(&berechtigung) {
            if let Some(mitglied) = self.db.get_member(server_id, username).await? {
                if mitglied.legacy_flags.get(berechtigung).copied().unwrap_or(false) {
                    return Ok(true);
                }
            }
        }

        tracing::trace!(
            server_id = %server_id,
            username = %username,
            berechtigung,
            "Berechtigung nicht erteilt"
        );
        Ok(false)
    }

    /// Wie [`Self::berechtigung_pruefen`], aber `ZugriffVerweigert` statt `false`
    pub async fn berechtigung_erfordern(
        &self,
        server_id: ServerId,
        username: &UserName,
        berechtigung: &str,
    ) -> AuthResult<()> {
        if self.berechtigung_pruefen(server_id, username, berechtigung).await? {
            Ok(())
        } else {
            Err(AuthError::ZugriffVerweigert(berechtigung.to_string()))
        }
    }

    pub async fn ist_mitglied(&self, server_id: ServerId, username: &UserName) -> AuthResult<bool> {
        Ok(self.db.get_member(server_id, username).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use stammtisch_db::{models::NeueRolle, MemoryDb};

    fn name(s: &str) -> UserName {
        UserName::from(s)
    }

    fn setup() -> (Arc<MemoryDb>, PermissionService<MemoryDb>, ServerId) {
        let db = Arc::new(MemoryDb::neu());
        let server = db.server_anlegen("Gilde", &name("owner"));
        db.mitglied_hinzufuegen(server.id, &name("carol"));
        let service = PermissionService::neu(Arc::clone(&db));
        (db, service, server.id)
    }

    #[tokio::test]
    async fn besitzer_hat_alles() {
        let (_db, service, server) = setup();
        assert!(service
            .berechtigung_pruefen(server, &name("owner"), "irgendwas_neues")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn rolle_erteilt_sofort() {
        let (db, service, server) = setup();
        let carol = name("carol");
        assert!(!service.berechtigung_pruefen(server, &carol, "connect").await.unwrap());

        let rolle = db.rolle_anlegen(NeueRolle {
            server_id: server,
            name: "Mitglied",
            color: None,
            position: 0,
            permissions: HashMap::from([("connect".to_string(), true)]),
        });
        db.rolle_zuweisen(&carol, rolle.id).unwrap();
        assert!(service.berechtigung_pruefen(server, &carol, "connect").await.unwrap());
    }

    #[tokio::test]
    async fn legacy_flag_nur_fuer_teilmenge() {
        let (db, service, server) = setup();
        let carol = name("carol");
        db.legacy_flag_setzen(server, &carol, "kick_members", true).unwrap();
        db.legacy_flag_setzen(server, &carol, "send_messages", true).unwrap();

        assert!(service.berechtigung_pruefen(server, &carol, "kick_members").await.unwrap());
        assert!(!service.berechtigung_pruefen(server, &carol, "send_messages").await.unwrap());
    }

    #[tokio::test]
    async fn rolle_mit_false_verbietet_legacy_nicht() {
        let (db, service, server) = setup();
        let carol = name("carol");
        let rolle = db.rolle_anlegen(NeueRolle {
            server_id: server,
            name: "Stumm",
            color: None,
            position: 5,
            permissions: HashMap::from([("ban_members".to_string(), false)]),
        });
        db.rolle_zuweisen(&carol, rolle.id).unwrap();
        db.legacy_flag_setzen(server, &carol, "ban_members", true).unwrap();

        assert!(service.berechtigung_pruefen(server, &carol, "ban_members").await.unwrap());
    }

    #[tokio::test]
    async fn erfordern_und_unbekannter_server() {
        let (_db, service, server) = setup();
        let err = service
            .berechtigung_erfordern(server, &name("carol"), "manage_server")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ZugriffVerweigert(ref b) if b == "manage_server"));

        assert!(!service
            .berechtigung_pruefen(ServerId::new(), &name("owner"), "connect")
            .await
            .unwrap());
    }
}
