//! Invite-Service
//!
//! Einladungscodes sind einmalig. Wer sich mit einem Code registriert, wird
//! automatisch mit dem Einladenden befreundet.

use std::sync::Arc;

use rand::RngCore;
use stammtisch_core::types::UserName;
use stammtisch_db::{
    models::EinladungRecord,
    repository::{FriendRepository, InviteRepository},
};

use crate::error::{AuthError, AuthResult};

pub const INVITE_CODE_LAENGE: usize = 8;
const INVITE_CODE_ZEICHEN: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
/// Neue Codes bei Kollision
const MAX_VERSUCHE: usize = 5;

pub struct InviteService<D: InviteRepository + FriendRepository> {
    db: Arc<D>,
}

impl<D: InviteRepository + FriendRepository> InviteService<D> {
    pub fn neu(db: Arc<D>) -> Self {
        Self { db }
    }

    pub async fn einladung_erstellen(&self, inviter: &UserName) -> AuthResult<EinladungRecord> {
        for _ in 0..MAX_VERSUCHE {
            let code = invite_code_generieren();
            match self.db.create_invite(&code, inviter).await {
                Ok(einladung) => {
                    tracing::info!(inviter = %inviter, code = %code, "Einladung erstellt");
                    return Ok(einladung);
                }
                Err(e) if e.ist_eindeutigkeit() => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(AuthError::intern("Kein freier Einladungscode gefunden"))
    }

    /// Prueft ob ein Code existiert, ohne ihn zu verbrauchen
    pub async fn einladung_pruefen(&self, code: &str) -> AuthResult<Option<EinladungRecord>> {
        Ok(self.db.get_invite(&code.trim().to_ascii_uppercase()).await?)
    }

    /// Verbraucht den Code und befreundet den neuen Benutzer mit dem Einladenden
    ///
    /// `None` wenn der Code unbekannt oder schon verbraucht ist.
    pub async fn einladung_einloesen(
        &self,
        code: &str,
        neuer_benutzer: &UserName,
    ) -> AuthResult<Option<UserName>> {
        let code = code.trim().to_ascii_uppercase();
        let Some(einladung) = self.db.consume_invite(&code).await? else {
            tracing::warn!(code = %code, username = %neuer_benutzer, "Einladungscode ungueltig");
            return Ok(None);
        };

        if &einladung.inviter != neuer_benutzer {
            self.db.add_friendship(&einladung.inviter, neuer_benutzer).await?;
        }
        tracing::info!(
            inviter = %einladung.inviter,
            username = %neuer_benutzer,
            "Einladung eingeloest"
        );
        Ok(Some(einladung.inviter))
    }
}

/// Zufaelliger Code ohne verwechselbare Zeichen (0, 1, I, O)
pub fn invite_code_generieren() -> String {
    let mut bytes = [0u8; INVITE_CODE_LAENGE];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
        .iter()
        .map(|b| INVITE_CODE_ZEICHEN[(*b as usize) % INVITE_CODE_ZEICHEN.len()] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use stammtisch_db::MemoryDb;

    #[test]
    fn code_format() {
        let code = invite_code_generieren();
        assert_eq!(code.len(), INVITE_CODE_LAENGE);
        assert!(code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() && !matches!(c, '0' | '1' | 'I' | 'O')));
    }

    #[tokio::test]
    async fn einloesen_befreundet_genau_einmal() {
        let db = Arc::new(MemoryDb::neu());
        let service = InviteService::neu(Arc::clone(&db));
        let alice = UserName::from("alice");
        let bob = UserName::from("bob");

        let einladung = service.einladung_erstellen(&alice).await.unwrap();
        let inviter = service
            .einladung_einloesen(&einladung.code.to_lowercase(), &bob)
            .await
            .unwrap();
        assert_eq!(inviter, Some(alice.clone()));
        assert!(db.are_friends(&alice, &bob).await.unwrap());

        let zweites = service
            .einladung_einloesen(&einladung.code, &UserName::from("carol"))
            .await
            .unwrap();
        assert!(zweites.is_none());
    }

    #[tokio::test]
    async fn pruefen_verbraucht_nicht() {
        let db = Arc::new(MemoryDb::neu());
        let service = InviteService::neu(Arc::clone(&db));
        let einladung = service.einladung_erstellen(&UserName::from("alice")).await.unwrap();

        assert!(service.einladung_pruefen(&einladung.code).await.unwrap().is_some());
        assert!(service.einladung_pruefen(&einladung.code).await.unwrap().is_some());
        assert!(service.einladung_pruefen("XXXXXXXX").await.unwrap().is_none());
    }
}
