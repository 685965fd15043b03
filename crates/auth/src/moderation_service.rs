//! Moderations-Service: Kick, Ban und Timeout pro Server
//!
//! Kick und Ban bleiben aktiv, bis sie ausdruecklich aufgehoben werden.
//! Ein Timeout ist nur aktiv, solange `expires_at` in der Zukunft liegt.
//!
//! Pruefen und Anlegen einer Massnahme sind pro (Server, Ziel, Typ)
//! exklusiv. Ein zweiter Versuch, waehrend der erste noch laeuft, ist ein
//! `Konflikt`.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use stammtisch_core::types::{ServerId, UserName};
use stammtisch_db::{
    models::{ModerationsRecord, ModerationsTyp, NeueModeration},
    repository::ModerationRepository,
};

use crate::error::{AuthError, AuthResult};

/// Laengster erlaubter Timeout: 28 Tage
pub const MAX_TIMEOUT_SEKUNDEN: i64 = 28 * 24 * 60 * 60;

/// Ob eine einzelne Massnahme zum Zeitpunkt `jetzt` wirkt
pub fn massnahme_aktiv(record: &ModerationsRecord, jetzt: DateTime<Utc>) -> bool {
    match record.typ {
        ModerationsTyp::Kick | ModerationsTyp::Ban => record.active,
        ModerationsTyp::Timeout => record.expires_at.is_some_and(|ablauf| ablauf > jetzt),
    }
}

/// Anfrage fuer eine neue Massnahme
#[derive(Debug, Clone)]
pub struct Massnahme<'a> {
    pub server_id: ServerId,
    pub typ: ModerationsTyp,
    pub target: &'a UserName,
    pub actor: &'a UserName,
    pub reason: Option<&'a str>,
    /// Nur fuer Timeouts, dort Pflicht
    pub dauer: Option<Duration>,
}

type MassnahmenSchluessel = (ServerId, UserName, ModerationsTyp);

/// Haelt einen Schluessel in `in_bearbeitung`, bis er gedroppt wird
struct Reservierung<'a> {
    menge: &'a Mutex<HashSet<MassnahmenSchluessel>>,
    schluessel: MassnahmenSchluessel,
}

impl Drop for Reservierung<'_> {
    fn drop(&mut self) {
        self.menge.lock().remove(&self.schluessel);
    }
}

pub struct ModerationService<D: ModerationRepository> {
    db: Arc<D>,
    in_bearbeitung: Mutex<HashSet<MassnahmenSchluessel>>,
}

impl<D: ModerationRepository> ModerationService<D> {
    pub fn neu(db: Arc<D>) -> Self {
        Self {
            db,
            in_bearbeitung: Mutex::new(HashSet::new()),
        }
    }

    fn reservieren(
        &self,
        server_id: ServerId,
        target: &UserName,
        typ: ModerationsTyp,
    ) -> Option<Reservierung<'_>> {
        let schluessel = (server_id, target.clone(), typ);
        if !self.in_bearbeitung.lock().insert(schluessel.clone()) {
            return None;
        }
        Some(Reservierung {
            menge: &self.in_bearbeitung,
            schluessel,
        })
    }

    pub async fn ist_eingeschraenkt(
        &self,
        server_id: ServerId,
        username: &UserName,
        typ: ModerationsTyp,
    ) -> AuthResult<bool> {
        self.ist_eingeschraenkt_zum(server_id, username, typ, Utc::now())
            .await
    }

    pub async fn ist_eingeschraenkt_zum(
        &self,
        server_id: ServerId,
        username: &UserName,
        typ: ModerationsTyp,
        jetzt: DateTime<Utc>,
    ) -> AuthResult<bool> {
        Ok(self
            .aktive_massnahme(server_id, username, typ, jetzt)
            .await?
            .is_some())
    }

    /// Die zuletzt verhaengte, noch wirksame Massnahme
    pub async fn aktive_massnahme(
        &self,
        server_id: ServerId,
        username: &UserName,
        typ: ModerationsTyp,
        jetzt: DateTime<Utc>,
    ) -> AuthResult<Option<ModerationsRecord>> {
        let liste = self.db.list_actions(server_id, username, typ).await?;
        Ok(liste
            .into_iter()
            .filter(|m| massnahme_aktiv(m, jetzt))
            .max_by_key(|m| m.created_at))
    }

    pub async fn verhaengen(&self, massnahme: Massnahme<'_>) -> AuthResult<ModerationsRecord> {
        self.verhaengen_zum(massnahme, Utc::now()).await
    }

    /// `Konflikt` wenn bereits eine wirksame Massnahme gleichen Typs besteht
    pub async fn verhaengen_zum(
        &self,
        massnahme: Massnahme<'_>,
        jetzt: DateTime<Utc>,
    ) -> AuthResult<ModerationsRecord> {
        if massnahme.target == massnahme.actor {
            return Err(AuthError::validierung("Man kann sich nicht selbst moderieren"));
        }

        let expires_at = match (massnahme.typ, massnahme.dauer) {
            (ModerationsTyp::Timeout, Some(dauer)) => {
                if dauer <= Duration::zero() || dauer > Duration::seconds(MAX_TIMEOUT_SEKUNDEN) {
                    return Err(AuthError::validierung(
                        "Timeout-Dauer muss zwischen 1 Sekunde und 28 Tagen liegen",
                    ));
                }
                Some(jetzt + dauer)
            }
            (ModerationsTyp::Timeout, None) => {
                return Err(AuthError::validierung("Timeout braucht eine Dauer"));
            }
            (_, Some(_)) => {
                return Err(AuthError::validierung(format!(
                    "{} hat keine Dauer, Aufhebung nur ausdruecklich",
                    massnahme.typ
                )));
            }
            (_, None) => None,
        };

        let konflikt = || {
            AuthError::Konflikt(format!(
                "{} gegen {} ist bereits aktiv",
                massnahme.typ, massnahme.target
            ))
        };
        let _reservierung = self
            .reservieren(massnahme.server_id, massnahme.target, massnahme.typ)
            .ok_or_else(konflikt)?;

        if self
            .ist_eingeschraenkt_zum(massnahme.server_id, massnahme.target, massnahme.typ, jetzt)
            .await?
        {
            return Err(konflikt());
        }

        let record = self
            .db
            .create_action(NeueModeration {
                server_id: massnahme.server_id,
                typ: massnahme.typ,
                target: massnahme.target,
                actor: massnahme.actor,
                reason: massnahme.reason,
                expires_at,
            })
            .await?;

        tracing::info!(
            server_id = %massnahme.server_id,
            typ = %massnahme.typ,
            target = %massnahme.target,
            actor = %massnahme.actor,
            "Moderationsmassnahme verhaengt"
        );
        Ok(record)
    }

    pub async fn aufheben(
        &self,
        server_id: ServerId,
        target: &UserName,
        typ: ModerationsTyp,
    ) -> AuthResult<u64> {
        self.aufheben_zum(server_id, target, typ, Utc::now()).await
    }

    /// Hebt alle Massnahmen des Typs auf. Timeouts enden dabei sofort.
    ///
    /// `NichtGefunden`, wenn keine wirksame Massnahme bestand.
    pub async fn aufheben_zum(
        &self,
        server_id: ServerId,
        target: &UserName,
        typ: ModerationsTyp,
        jetzt: DateTime<Utc>,
    ) -> AuthResult<u64> {
        if !self.ist_eingeschraenkt_zum(server_id, target, typ, jetzt).await? {
            return Err(AuthError::NichtGefunden(format!(
                "Keine aktive Massnahme {typ} gegen {target}"
            )));
        }
        let anzahl = self
            .db
            .deactivate_actions(server_id, target, typ, jetzt)
            .await?;
        tracing::info!(server_id = %server_id, typ = %typ, target = %target, anzahl, "Moderationsmassnahme aufgehoben");
        Ok(anzahl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stammtisch_db::MemoryDb;

    fn name(s: &str) -> UserName {
        UserName::from(s)
    }

    fn setup() -> (ModerationService<MemoryDb>, ServerId) {
        let db = Arc::new(MemoryDb::neu());
        let server = db.server_anlegen("Gilde", &name("owner"));
        (ModerationService::neu(db), server.id)
    }

    fn massnahme<'a>(
        server_id: ServerId,
        typ: ModerationsTyp,
        target: &'a UserName,
        actor: &'a UserName,
        dauer: Option<Duration>,
    ) -> Massnahme<'a> {
        Massnahme {
            server_id,
            typ,
            target,
            actor,
            reason: None,
            dauer,
        }
    }

    #[tokio::test]
    async fn timeout_laeuft_ab() {
        let (service, server) = setup();
        let (dave, owner) = (name("dave"), name("owner"));
        let t0 = Utc::now();

        service
            .verhaengen_zum(
                massnahme(server, ModerationsTyp::Timeout, &dave, &owner, Some(Duration::minutes(10))),
                t0,
            )
            .await
            .unwrap();

        let vorher = t0 + Duration::minutes(9);
        let nachher = t0 + Duration::minutes(11);
        assert!(service
            .ist_eingeschraenkt_zum(server, &dave, ModerationsTyp::Timeout, vorher)
            .await
            .unwrap());
        assert!(!service
            .ist_eingeschraenkt_zum(server, &dave, ModerationsTyp::Timeout, nachher)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn ban_bleibt_bis_zur_aufhebung() {
        let (service, server) = setup();
        let (erin, owner) = (name("erin"), name("owner"));
        let t0 = Utc::now();

        service
            .verhaengen_zum(massnahme(server, ModerationsTyp::Ban, &erin, &owner, None), t0)
            .await
            .unwrap();

        let viel_spaeter = t0 + Duration::days(3650);
        assert!(service
            .ist_eingeschraenkt_zum(server, &erin, ModerationsTyp::Ban, viel_spaeter)
            .await
            .unwrap());

        service
            .aufheben_zum(server, &erin, ModerationsTyp::Ban, viel_spaeter)
            .await
            .unwrap();
        assert!(!service
            .ist_eingeschraenkt_zum(server, &erin, ModerationsTyp::Ban, viel_spaeter)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn doppelte_massnahme_ist_konflikt() {
        let (service, server) = setup();
        let (frank, owner) = (name("frank"), name("owner"));
        service
            .verhaengen(massnahme(server, ModerationsTyp::Kick, &frank, &owner, None))
            .await
            .unwrap();
        let err = service
            .verhaengen(massnahme(server, ModerationsTyp::Kick, &frank, &owner, None))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Konflikt(_)));
    }

    #[tokio::test]
    async fn laufende_massnahme_sperrt_gleichen_schluessel() {
        let (service, server) = setup();
        let (ida, owner) = (name("ida"), name("owner"));

        let laufend = service.reservieren(server, &ida, ModerationsTyp::Ban).unwrap();
        let err = service
            .verhaengen(massnahme(server, ModerationsTyp::Ban, &ida, &owner, None))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Konflikt(_)));

        // Anderer Typ ist unabhaengig
        service
            .verhaengen(massnahme(server, ModerationsTyp::Kick, &ida, &owner, None))
            .await
            .unwrap();

        drop(laufend);
        service
            .verhaengen(massnahme(server, ModerationsTyp::Ban, &ida, &owner, None))
            .await
            .unwrap();
        assert!(service.in_bearbeitung.lock().is_empty());
    }

    #[tokio::test]
    async fn timeout_aufheben_endet_sofort() {
        let (service, server) = setup();
        let (gina, owner) = (name("gina"), name("owner"));
        let t0 = Utc::now();
        service
            .verhaengen_zum(
                massnahme(server, ModerationsTyp::Timeout, &gina, &owner, Some(Duration::hours(1))),
                t0,
            )
            .await
            .unwrap();

        let aufgehoben = t0 + Duration::minutes(5);
        service
            .aufheben_zum(server, &gina, ModerationsTyp::Timeout, aufgehoben)
            .await
            .unwrap();
        assert!(!service
            .ist_eingeschraenkt_zum(server, &gina, ModerationsTyp::Timeout, aufgehoben)
            .await
            .unwrap());

        let err = service
            .aufheben_zum(server, &gina, ModerationsTyp::Timeout, aufgehoben)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NichtGefunden(_)));
    }

    #[tokio::test]
    async fn dauer_regeln() {
        let (service, server) = setup();
        let (hans, owner) = (name("hans"), name("owner"));
        let ohne_dauer = service
            .verhaengen(massnahme(server, ModerationsTyp::Timeout, &hans, &owner, None))
            .await;
        assert!(matches!(ohne_dauer, Err(AuthError::Validierung(_))));

        let ban_mit_dauer = service
            .verhaengen(massnahme(server, ModerationsTyp::Ban, &hans, &owner, Some(Duration::hours(1))))
            .await;
        assert!(matches!(ban_mit_dauer, Err(AuthError::Validierung(_))));

        let selbst = service
            .verhaengen(massnahme(server, ModerationsTyp::Kick, &owner, &owner, None))
            .await;
        assert!(matches!(selbst, Err(AuthError::Validierung(_))));
    }
}
