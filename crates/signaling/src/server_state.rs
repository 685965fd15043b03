//! Gemeinsamer Server-Zustand fuer den Signaling-Service
//!
//! Haelt alle geteilten Services und Zustands-Manager. Es gibt keine
//! globalen Tabellen: wer einen `SignalingState` baut, bekommt frischen
//! Presence- und Verbindungszustand.

use std::sync::Arc;

use stammtisch_auth::{AuthKonfig, AuthService, MailVersand, ModerationService, PermissionService};
use stammtisch_core::types::{ConnectionId, DmId, ServerId, UserName};
use stammtisch_db::Persistenz;
use stammtisch_protocol::control::{
    CallEndedEvent, CallPeerEvent, ControlMessage, ControlPayload, PresenceEvent,
};

use crate::broadcast::{EventBroadcaster, ZustellBericht, SEND_QUEUE_GROESSE};
use crate::error::{SignalingError, SignalingResult};
use crate::presence::{PresenceManager, VoiceBenachrichtigung};

/// Konfiguration fuer den Signaling-Service
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Anzeigename des Servers
    pub server_name: String,
    /// Maximale gleichzeitige Verbindungen
    pub max_verbindungen: usize,
    /// Groesse der Send-Queue pro Verbindung
    pub send_queue_groesse: usize,
    /// Verbindung wird getrennt, wenn so lange kein Frame kam
    pub verbindungs_timeout_sek: u64,
    /// Maximale Frame-Groesse in Bytes
    pub max_frame_groesse: usize,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            server_name: "Stammtisch".to_string(),
            max_verbindungen: 512,
            send_queue_groesse: SEND_QUEUE_GROESSE,
            verbindungs_timeout_sek: 90,
            max_frame_groesse: stammtisch_protocol::wire::DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Gemeinsamer Server-Zustand
pub struct SignalingState<D: Persistenz, M: MailVersand> {
    pub config: SignalingConfig,
    pub db: Arc<D>,
    /// Registrierung, Login, Sessions, Passwort-Reset, 2FA
    pub auth_service: AuthService<D, M>,
    pub permission_service: PermissionService<D>,
    pub moderation_service: ModerationService<D>,
    /// Wer ist online, wer ist in welchem Voice-Kontext
    pub presence: PresenceManager,
    /// Send-Queues aller offenen Verbindungen
    pub broadcaster: EventBroadcaster,
}

impl<D: Persistenz, M: MailVersand> SignalingState<D, M> {
    /// Ohne `mail` werden Konten bei der Registrierung sofort angelegt
    pub fn neu(
        config: SignalingConfig,
        db: Arc<D>,
        mail: Option<Arc<M>>,
        auth_konfig: AuthKonfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            auth_service: AuthService::neu(Arc::clone(&db), mail, auth_konfig),
            permission_service: PermissionService::neu(Arc::clone(&db)),
            moderation_service: ModerationService::neu(Arc::clone(&db)),
            presence: PresenceManager::neu(),
            broadcaster: EventBroadcaster::mit_queue_groesse(config.send_queue_groesse),
            config,
            db,
        })
    }

    /// Periodische Aufraeumarbeiten, laeuft aus der Accept-Schleife
    pub async fn wartung(&self) {
        if let Err(e) = self.auth_service.aufraeumen().await {
            tracing::warn!(fehler = %e, "Auth-Wartung fehlgeschlagen");
        }
    }

    // -----------------------------------------------------------------------
    // Zustellung mit Empfaengerauflosung
    // -----------------------------------------------------------------------

    /// Sendet an jede Verbindung eines Mitglieds von `server_id`
    pub async fn an_server_mitglieder_senden(
        &self,
        server_id: ServerId,
        nachricht: &ControlMessage,
        ausser: Option<ConnectionId>,
    ) -> SignalingResult<ZustellBericht> {
        let mitglieder = self.db.get_members(server_id).await?;
        Ok(self
            .broadcaster
            .an_mitglieder_senden(&mitglieder, nachricht, ausser))
    }

    /// Sendet an beide Teilnehmer einer DM-Unterhaltung
    ///
    /// `absender` muss selbst Teilnehmer sein.
    pub async fn an_dm_paar_senden(
        &self,
        dm_id: DmId,
        absender: &UserName,
        nachricht: &ControlMessage,
        ausser: Option<ConnectionId>,
    ) -> SignalingResult<ZustellBericht> {
        let (a, b) = self
            .db
            .get_participants(dm_id)
            .await?
            .ok_or_else(|| SignalingError::nicht_gefunden(format!("Unterhaltung {dm_id}")))?;
        if absender != &a && absender != &b {
            return Err(SignalingError::ZugriffVerweigert(format!(
                "kein Teilnehmer von {dm_id}"
            )));
        }
        Ok(self.broadcaster.an_mitglieder_senden(&[a, b], nachricht, ausser))
    }

    /// Verteilt die Ergebnisse einer Presence-Operation
    ///
    /// Roster gehen an alle Mitglieder des Servers ausser `ausser`,
    /// Anruf-Events an die erste Verbindung der Zielidentitaet. Ein Fehler
    /// bei einem Roster wird geloggt und haelt die uebrigen Zustellungen
    /// nicht auf.
    pub async fn voice_verteilen(
        &self,
        benachrichtigungen: Vec<VoiceBenachrichtigung>,
        ausser: Option<ConnectionId>,
    ) {
        for benachrichtigung in benachrichtigungen {
            match benachrichtigung {
                VoiceBenachrichtigung::Roster(event) => {
                    let server_id = event.server_id;
                    let nachricht = ControlMessage::event(ControlPayload::VoiceRoster(event));
                    if let Err(e) = self
                        .an_server_mitglieder_senden(server_id, &nachricht, ausser)
                        .await
                    {
                        tracing::error!(server_id = %server_id, fehler = %e, "Roster konnte nicht verteilt werden");
                    }
                }
                VoiceBenachrichtigung::AnrufBeendet { an, peer, grund } => {
                    self.broadcaster.an_user_senden(
                        &an,
                        ControlMessage::event(ControlPayload::CallEnded(CallEndedEvent {
                            peer,
                            reason: grund,
                        })),
                    );
                }
                VoiceBenachrichtigung::EingehenderAnruf { an, von } => {
                    self.broadcaster.an_user_senden(
                        &an,
                        ControlMessage::event(ControlPayload::IncomingCall(CallPeerEvent {
                            peer: von,
                        })),
                    );
                }
                VoiceBenachrichtigung::AnrufAngenommen { an, von } => {
                    self.broadcaster.an_user_senden(
                        &an,
                        ControlMessage::event(ControlPayload::CallAccepted(CallPeerEvent {
                            peer: von,
                        })),
                    );
                }
                VoiceBenachrichtigung::AnrufAbgelehnt { an, von } => {
                    self.broadcaster.an_user_senden(
                        &an,
                        ControlMessage::event(ControlPayload::CallRejected(CallPeerEvent {
                            peer: von,
                        })),
                    );
                }
                VoiceBenachrichtigung::MedienGeaendert { an, event } => {
                    self.broadcaster.an_user_senden(
                        &an,
                        ControlMessage::event(ControlPayload::MediaFlagsChanged(event)),
                    );
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Lebenszyklus einer Verbindung
    // -----------------------------------------------------------------------

    /// Bindet die Identitaet nach erfolgreicher Anmeldung an die Verbindung
    ///
    /// Bei der ersten Verbindung der Identitaet geht `user_online` an alle
    /// anderen Verbindungen.
    pub fn anmeldung_binden(&self, verbindung: ConnectionId, username: &UserName) {
        if !self.broadcaster.binden(verbindung, username) {
            tracing::debug!(connection_id = %verbindung, "Verbindung vor Bindung geschlossen");
            return;
        }
        if self.presence.online_melden(username) {
            let nachricht = ControlMessage::event(ControlPayload::UserOnline(PresenceEvent {
                username: username.clone(),
            }));
            self.broadcaster.an_alle_senden(&nachricht, Some(verbindung));
        }
        tracing::info!(connection_id = %verbindung, username = %username, "Verbindung authentifiziert");
    }

    /// Raeumt eine beendete Verbindung auf
    ///
    /// Laeuft pro Verbindung hoechstens einmal, egal wie oft und von wo es
    /// aufgerufen wird. Gibt `false` zurueck, wenn bereits aufgeraeumt war.
    /// Voice-Session und `user_offline` betreffen nur die letzte Verbindung
    /// einer Identitaet.
    pub async fn verbindung_beenden(&self, verbindung: ConnectionId) -> bool {
        let Some(gebunden) = self.broadcaster.entfernen(verbindung) else {
            return false;
        };

        if let Some(username) = gebunden {
            if self.presence.offline_melden(&username) {
                let benachrichtigungen = self.presence.trennung_aufraeumen(&username);
                self.voice_verteilen(benachrichtigungen, None).await;

                let nachricht = ControlMessage::event(ControlPayload::UserOffline(PresenceEvent {
                    username: username.clone(),
                }));
                self.broadcaster.an_alle_senden(&nachricht, None);
                tracing::info!(username = %username, "Benutzer offline");
            }
        }

        tracing::debug!(connection_id = %verbindung, "Verbindung aufgeraeumt");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{test_state, TestState};
    use stammtisch_db::models::KanalTyp;

    fn name(s: &str) -> UserName {
        UserName::from(s)
    }

    #[tokio::test]
    async fn aufraeumen_genau_einmal() {
        let (state, db): TestState = test_state();
        let server = db.server_anlegen("Gilde", &name("alice"));
        let kanal = db.kanal_anlegen(server.id, "Lounge", KanalTyp::Voice).unwrap();
        db.mitglied_hinzufuegen(server.id, &name("bob"));

        let (a, _rx_a) = state.broadcaster.verbindung_registrieren();
        let (b, mut rx_b) = state.broadcaster.verbindung_registrieren();
        state.anmeldung_binden(a, &name("alice"));
        state.anmeldung_binden(b, &name("bob"));
        while rx_b.try_recv().is_ok() {}

        let aus = state.presence.kanal_beitreten(&name("alice"), server.id, kanal);
        state.voice_verteilen(aus, None).await;
        while rx_b.try_recv().is_ok() {}

        let (erster, zweiter) = tokio::join!(
            state.verbindung_beenden(a),
            state.verbindung_beenden(a)
        );
        assert!(erster ^ zweiter);

        let mut empfangen = Vec::new();
        while let Ok(msg) = rx_b.try_recv() {
            empfangen.push(msg.payload.typ_name());
        }
        assert_eq!(empfangen, vec!["voice_roster", "user_offline"]);
        assert!(state.presence.session(&name("alice")).is_none());
        assert!(!state.presence.ist_online(&name("alice")));
    }

    #[tokio::test]
    async fn zweite_verbindung_haelt_online() {
        let (state, _db) = test_state();
        let alice = name("alice");
        let (a1, _rx1) = state.broadcaster.verbindung_registrieren();
        let (a2, _rx2) = state.broadcaster.verbindung_registrieren();
        let (beob, mut rx_beob) = state.broadcaster.verbindung_registrieren();
        state.anmeldung_binden(beob, &name("carol"));
        state.anmeldung_binden(a1, &alice);
        state.anmeldung_binden(a2, &alice);

        let online: Vec<_> = std::iter::from_fn(|| rx_beob.try_recv().ok())
            .map(|m| m.payload.typ_name())
            .collect();
        assert_eq!(online, vec!["user_online"]);

        assert!(state.verbindung_beenden(a1).await);
        assert!(state.presence.ist_online(&alice));
        assert!(rx_beob.try_recv().is_err());

        assert!(state.verbindung_beenden(a2).await);
        assert!(!state.presence.ist_online(&alice));
        assert_eq!(rx_beob.try_recv().unwrap().payload.typ_name(), "user_offline");
    }

    #[tokio::test]
    async fn dm_nur_fuer_teilnehmer() {
        let (state, db) = test_state();
        let dm = db.dm_anlegen(&name("alice"), &name("bob"));
        let (a, _rx_a) = state.broadcaster.verbindung_registrieren();
        let (b, mut rx_b) = state.broadcaster.verbindung_registrieren();
        state.anmeldung_binden(a, &name("alice"));
        state.anmeldung_binden(b, &name("bob"));
        while rx_b.try_recv().is_ok() {}

        let nachricht = ControlMessage::event(ControlPayload::Goodbye);
        let bericht = state
            .an_dm_paar_senden(dm, &name("alice"), &nachricht, None)
            .await
            .unwrap();
        assert_eq!(bericht.zugestellt(), 2);
        assert!(rx_b.try_recv().is_ok());

        let err = state
            .an_dm_paar_senden(dm, &name("mallory"), &nachricht, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SignalingError::ZugriffVerweigert(_)));
        let err = state
            .an_dm_paar_senden(DmId::new(), &name("alice"), &nachricht, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SignalingError::NichtGefunden(_)));
    }
}
