//! Presence-Manager – Online-Status, Voice-Sessions und Kanal-Roster
//!
//! Jede Identitaet hat hoechstens eine Voice-Session: entweder in einem
//! Voice-Kanal eines Servers oder in einem Direktanruf. Jede Operation
//! baut zuerst die alte Session ab und richtet danach die neue ein.
//!
//! Der Manager verschickt selbst nichts. Jede Operation liefert die
//! faelligen [`VoiceBenachrichtigung`]en zurueck; der Aufrufer verteilt sie
//! ueber den Broadcaster. Roster werden immer als vollstaendiger Snapshot
//! verschickt.
//!
//! Alle drei Tabellen liegen hinter einem Mutex, damit Roster und
//! Sessions nie auseinanderlaufen.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use stammtisch_core::types::{ChannelId, ServerId, UserName};
use stammtisch_protocol::control::{
    CallEndReason, MediaFlag, MediaFlags, MediaFlagsEvent, RosterMember, VoiceRosterEvent,
};

use crate::error::{SignalingError, SignalingResult};

// ---------------------------------------------------------------------------
// Voice-Sessions
// ---------------------------------------------------------------------------

/// Wo eine Voice-Session stattfindet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceKontext {
    Kanal {
        server_id: ServerId,
        channel_id: ChannelId,
    },
    /// Direktanruf; beim Anrufer schon vor der Annahme gesetzt
    Direkt { peer: UserName },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceSession {
    pub kontext: VoiceKontext,
    pub flags: MediaFlags,
}

impl VoiceSession {
    fn neu(kontext: VoiceKontext) -> Self {
        Self {
            kontext,
            flags: MediaFlags::default(),
        }
    }

    fn ist_anruf_mit(&self, peer: &UserName) -> bool {
        matches!(&self.kontext, VoiceKontext::Direkt { peer: p } if p == peer)
    }
}

/// Nachricht die nach einer Zustandsaenderung verschickt werden muss
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceBenachrichtigung {
    /// Snapshot an alle Mitglieder des Servers
    Roster(VoiceRosterEvent),
    AnrufBeendet {
        an: UserName,
        peer: UserName,
        grund: CallEndReason,
    },
    EingehenderAnruf { an: UserName, von: UserName },
    AnrufAngenommen { an: UserName, von: UserName },
    AnrufAbgelehnt { an: UserName, von: UserName },
    /// Medien-Flags des Gespraechspartners im Direktanruf
    MedienGeaendert { an: UserName, event: MediaFlagsEvent },
}

// ---------------------------------------------------------------------------
// PresenceManager
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PresenceInner {
    /// Anzahl offener, angemeldeter Verbindungen pro Identitaet
    online: HashMap<UserName, usize>,
    sessions: HashMap<UserName, VoiceSession>,
    rosters: HashMap<(ServerId, ChannelId), BTreeSet<UserName>>,
}

impl PresenceInner {
    fn roster_snapshot(&self, server_id: ServerId, channel_id: ChannelId) -> VoiceRosterEvent {
        let members = self
            .rosters
            .get(&(server_id, channel_id))
            .map(|mitglieder| {
                mitglieder
                    .iter()
                    .map(|username| RosterMember {
                        username: username.clone(),
                        flags: self
                            .sessions
                            .get(username)
                            .map(|s| s.flags)
                            .unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        VoiceRosterEvent {
            server_id,
            channel_id,
            members,
        }
    }

    /// Baut die Session von `username` ab, falls vorhanden
    ///
    /// Kanal: Roster-Eintrag entfernen und neuen Snapshot melden.
    /// Direkt: Gegenstelle benachrichtigen und deren Session entfernen,
    /// wenn sie auf `username` zeigt.
    fn abbauen(
        &mut self,
        username: &UserName,
        grund: CallEndReason,
        aus: &mut Vec<VoiceBenachrichtigung>,
    ) -> Option<VoiceSession> {
        let session = self.sessions.remove(username)?;
        match &session.kontext {
            VoiceKontext::Kanal {
                server_id,
                channel_id,
            } => {
                let schluessel = (*server_id, *channel_id);
                if let Some(roster) = self.rosters.get_mut(&schluessel) {
                    roster.remove(username);
                    if roster.is_empty() {
                        self.rosters.remove(&schluessel);
                    }
                }
                aus.push(VoiceBenachrichtigung::Roster(
                    self.roster_snapshot(*server_id, *channel_id),
                ));
                tracing::debug!(
                    username = %username,
                    server_id = %server_id,
                    channel_id = %channel_id,
                    "Voice-Kanal verlassen"
                );
            }
            VoiceKontext::Direkt { peer } => {
                if self
                    .sessions
                    .get(peer)
                    .is_some_and(|s| s.ist_anruf_mit(username))
                {
                    self.sessions.remove(peer);
                }
                aus.push(VoiceBenachrichtigung::AnrufBeendet {
                    an: peer.clone(),
                    peer: username.clone(),
                    grund,
                });
                tracing::debug!(username = %username, peer = %peer, "Direktanruf beendet");
            }
        }
        Some(session)
    }

    /// Verbindet `angerufener` mit dem klingelnden `anrufer`
    ///
    /// Nur die Session des Angerufenen wird abgebaut; die des Anrufers
    /// zeigt schon auf ihn und bleibt stehen.
    fn annehmen(
        &mut self,
        angerufener: &UserName,
        anrufer: &UserName,
        aus: &mut Vec<VoiceBenachrichtigung>,
    ) {
        self.abbauen(angerufener, CallEndReason::HungUp, aus);
        self.sessions.insert(
            angerufener.clone(),
            VoiceSession::neu(VoiceKontext::Direkt {
                peer: anrufer.clone(),
            }),
        );
        aus.push(VoiceBenachrichtigung::AnrufAngenommen {
            an: anrufer.clone(),
            von: angerufener.clone(),
        });
        tracing::info!(anrufer = %anrufer, angerufener = %angerufener, "Direktanruf angenommen");
    }
}

/// Ephemerer Presence- und Voice-Zustand des Prozesses
///
/// Clone teilt den inneren Zustand.
#[derive(Clone, Default)]
pub struct PresenceManager {
    inner: Arc<Mutex<PresenceInner>>,
}

impl PresenceManager {
    pub fn neu() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Online-Status
    // -----------------------------------------------------------------------

    /// Zaehlt eine angemeldete Verbindung; `true` bei der ersten
    pub fn online_melden(&self, username: &UserName) -> bool {
        let mut inner = self.inner.lock();
        let anzahl = inner.online.entry(username.clone()).or_insert(0);
        *anzahl += 1;
        *anzahl == 1
    }

    /// Zaehlt eine Verbindung ab; `true` wenn es die letzte war
    pub fn offline_melden(&self, username: &UserName) -> bool {
        let mut inner = self.inner.lock();
        match inner.online.get_mut(username) {
            Some(anzahl) if *anzahl > 1 => {
                *anzahl -= 1;
                false
            }
            Some(_) => {
                inner.online.remove(username);
                true
            }
            None => false,
        }
    }

    pub fn ist_online(&self, username: &UserName) -> bool {
        self.inner.lock().online.contains_key(username)
    }

    // -----------------------------------------------------------------------
    // Abfragen
    // -----------------------------------------------------------------------

    pub fn session(&self, username: &UserName) -> Option<VoiceSession> {
        self.inner.lock().sessions.get(username).cloned()
    }

    pub fn roster(&self, server_id: ServerId, channel_id: ChannelId) -> VoiceRosterEvent {
        self.inner.lock().roster_snapshot(server_id, channel_id)
    }

    // -----------------------------------------------------------------------
    // Voice-Kanaele
    // -----------------------------------------------------------------------

    /// Betritt einen Voice-Kanal
    ///
    /// Eine bestehende Session (Kanal oder Anruf) wird vorher abgebaut. Ist
    /// der Benutzer schon in genau diesem Kanal, wird nur der aktuelle
    /// Roster gemeldet.
    pub fn kanal_beitreten(
        &self,
        username: &UserName,
        server_id: ServerId,
        channel_id: ChannelId,
    ) -> Vec<VoiceBenachrichtigung> {
        let mut inner = self.inner.lock();
        let mut aus = Vec::new();
        let ziel = VoiceKontext::Kanal {
            server_id,
            channel_id,
        };

        if inner.sessions.get(username).is_some_and(|s| s.kontext == ziel) {
            aus.push(VoiceBenachrichtigung::Roster(
                inner.roster_snapshot(server_id, channel_id),
            ));
            return aus;
        }

        inner.abbauen(username, CallEndReason::HungUp, &mut aus);
        inner
            .sessions
            .insert(username.clone(), VoiceSession::neu(ziel));
        inner
            .rosters
            .entry((server_id, channel_id))
            .or_default()
            .insert(username.clone());
        aus.push(VoiceBenachrichtigung::Roster(
            inner.roster_snapshot(server_id, channel_id),
        ));

        tracing::info!(
            username = %username,
            server_id = %server_id,
            channel_id = %channel_id,
            "Voice-Kanal betreten"
        );
        aus
    }

    /// Verlaesst Kanal oder Anruf; ohne Session passiert nichts
    pub fn verlassen(&self, username: &UserName) -> Vec<VoiceBenachrichtigung> {
        let mut aus = Vec::new();
        self.inner
            .lock()
            .abbauen(username, CallEndReason::HungUp, &mut aus);
        aus
    }

    /// Entfernt die Session nur, wenn sie in einem Kanal von `server_id` liegt
    pub fn aus_server_entfernen(
        &self,
        username: &UserName,
        server_id: ServerId,
    ) -> Vec<VoiceBenachrichtigung> {
        let mut inner = self.inner.lock();
        let mut aus = Vec::new();
        let im_server = inner.sessions.get(username).is_some_and(|s| {
            matches!(s.kontext, VoiceKontext::Kanal { server_id: sid, .. } if sid == server_id)
        });
        if im_server {
            inner.abbauen(username, CallEndReason::HungUp, &mut aus);
        }
        aus
    }

    // -----------------------------------------------------------------------
    // Direktanrufe
    // -----------------------------------------------------------------------

    /// Startet einen Anruf bei `peer`
    ///
    /// Der Anrufer verlaesst dabei seine bisherige Session. Seine neue
    /// Session zeigt sofort auf `peer`; die Gegenstelle bekommt nur die
    /// Anruf-Benachrichtigung und behaelt ihre Session bis zur Annahme.
    ///
    /// Klingelt `peer` gerade selbst beim Anrufer, gilt der Anruf als
    /// Annahme. Die Benachrichtigungen enthalten dann `AnrufAngenommen`
    /// an `peer` statt `EingehenderAnruf`.
    pub fn anruf_starten(
        &self,
        anrufer: &UserName,
        peer: &UserName,
    ) -> SignalingResult<Vec<VoiceBenachrichtigung>> {
        if anrufer == peer {
            return Err(SignalingError::validierung("Man kann sich nicht selbst anrufen"));
        }
        let mut inner = self.inner.lock();
        if !inner.online.contains_key(peer) {
            return Err(SignalingError::nicht_gefunden(format!("{peer} ist nicht online")));
        }

        let peer_klingelt = inner
            .sessions
            .get(peer)
            .is_some_and(|s| s.ist_anruf_mit(anrufer));
        let mut aus = Vec::new();
        if peer_klingelt {
            if inner
                .sessions
                .get(anrufer)
                .is_some_and(|s| s.ist_anruf_mit(peer))
            {
                return Err(SignalingError::Konflikt(format!(
                    "Anruf mit {peer} laeuft bereits"
                )));
            }
            inner.annehmen(anrufer, peer, &mut aus);
            return Ok(aus);
        }

        inner.abbauen(anrufer, CallEndReason::HungUp, &mut aus);
        inner.sessions.insert(
            anrufer.clone(),
            VoiceSession::neu(VoiceKontext::Direkt { peer: peer.clone() }),
        );
        aus.push(VoiceBenachrichtigung::EingehenderAnruf {
            an: peer.clone(),
            von: anrufer.clone(),
        });

        tracing::info!(anrufer = %anrufer, peer = %peer, "Direktanruf gestartet");
        Ok(aus)
    }

    /// Nimmt den Anruf von `anrufer` an
    ///
    /// Die bisherige Session des Angerufenen wird normal abgebaut. Die
    /// Session des Anrufers bleibt unveraendert erhalten.
    pub fn anruf_annehmen(
        &self,
        angerufener: &UserName,
        anrufer: &UserName,
    ) -> SignalingResult<Vec<VoiceBenachrichtigung>> {
        let mut inner = self.inner.lock();
        if !inner
            .sessions
            .get(anrufer)
            .is_some_and(|s| s.ist_anruf_mit(angerufener))
        {
            return Err(SignalingError::nicht_gefunden(format!(
                "Kein Anruf von {anrufer}"
            )));
        }
        if inner
            .sessions
            .get(angerufener)
            .is_some_and(|s| s.ist_anruf_mit(anrufer))
        {
            return Err(SignalingError::Konflikt(format!(
                "Anruf mit {anrufer} laeuft bereits"
            )));
        }

        let mut aus = Vec::new();
        inner.annehmen(angerufener, anrufer, &mut aus);
        Ok(aus)
    }

    /// Lehnt einen noch nicht angenommenen Anruf ab
    pub fn anruf_ablehnen(
        &self,
        angerufener: &UserName,
        anrufer: &UserName,
    ) -> SignalingResult<Vec<VoiceBenachrichtigung>> {
        let mut inner = self.inner.lock();
        let klingelt = inner
            .sessions
            .get(anrufer)
            .is_some_and(|s| s.ist_anruf_mit(angerufener))
            && !inner
                .sessions
                .get(angerufener)
                .is_some_and(|s| s.ist_anruf_mit(anrufer));
        if !klingelt {
            return Err(SignalingError::nicht_gefunden(format!(
                "Kein offener Anruf von {anrufer}"
            )));
        }

        inner.sessions.remove(anrufer);
        tracing::info!(anrufer = %anrufer, angerufener = %angerufener, "Direktanruf abgelehnt");
        Ok(vec![VoiceBenachrichtigung::AnrufAbgelehnt {
            an: anrufer.clone(),
            von: angerufener.clone(),
        }])
    }

    // -----------------------------------------------------------------------
    // Medien-Flags
    // -----------------------------------------------------------------------

    /// Setzt ein Flag der aktuellen Session
    ///
    /// Gibt die neuen Flags und die faelligen Benachrichtigungen zurueck:
    /// im Kanal einen Roster-Snapshot, im Anruf eine Nachricht an die
    /// Gegenstelle.
    pub fn medien_flag_setzen(
        &self,
        username: &UserName,
        flag: MediaFlag,
        wert: bool,
    ) -> SignalingResult<(MediaFlags, Vec<VoiceBenachrichtigung>)> {
        let mut inner = self.inner.lock();
        let session = inner
            .sessions
            .get_mut(username)
            .ok_or_else(|| SignalingError::nicht_gefunden("Keine aktive Voice-Session"))?;
        session.flags.setzen(flag, wert);
        let flags = session.flags;
        let kontext = session.kontext.clone();

        let benachrichtigung = match kontext {
            VoiceKontext::Kanal {
                server_id,
                channel_id,
            } => VoiceBenachrichtigung::Roster(inner.roster_snapshot(server_id, channel_id)),
            VoiceKontext::Direkt { peer } => VoiceBenachrichtigung::MedienGeaendert {
                an: peer,
                event: MediaFlagsEvent {
                    username: username.clone(),
                    flags,
                },
            },
        };
        Ok((flags, vec![benachrichtigung]))
    }

    // -----------------------------------------------------------------------
    // Verbindungsende
    // -----------------------------------------------------------------------

    /// Baut die Session beim Verbindungsende ab
    ///
    /// Klingelnde Anrufe anderer an `username` enden ebenfalls.
    pub fn trennung_aufraeumen(&self, username: &UserName) -> Vec<VoiceBenachrichtigung> {
        let mut aus = Vec::new();
        let mut inner = self.inner.lock();
        inner.abbauen(username, CallEndReason::Disconnected, &mut aus);

        let mut anrufer: Vec<UserName> = inner
            .sessions
            .iter()
            .filter(|(_, s)| s.ist_anruf_mit(username))
            .map(|(name, _)| name.clone())
            .collect();
        anrufer.sort();
        for name in anrufer {
            inner.sessions.remove(&name);
            aus.push(VoiceBenachrichtigung::AnrufBeendet {
                an: name,
                peer: username.clone(),
                grund: CallEndReason::Disconnected,
            });
        }
        aus
    }
}
