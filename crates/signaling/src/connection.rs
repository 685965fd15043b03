//! Client-Connection – Verwaltet eine einzelne Transport-Verbindung
//!
//! Jede Verbindung laeuft in einem eigenen lokalen Task. Eingehende Frames
//! werden strikt nacheinander an den Dispatcher gereicht; Events anderer
//! Verbindungen kommen ueber die Send-Queue aus dem Broadcaster.
//!
//! Die Schleife hat genau einen Ausgang. Danach laeuft das Aufraeumen
//! ueber [`SignalingState::verbindung_beenden`], egal ob der Client
//! `quit` geschickt hat, der Transport abgerissen ist, der Leerlauf-Timeout
//! gegriffen hat oder der Server herunterfaehrt.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use stammtisch_auth::MailVersand;
use stammtisch_db::Persistenz;
use stammtisch_protocol::{
    control::{ControlMessage, ControlPayload},
    wire::FrameCodec,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::codec::Framed;

use crate::dispatcher::{MessageDispatcher, VerbindungsZustand};
use crate::server_state::SignalingState;

/// Warum die Verarbeitungsschleife endete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrennGrund {
    /// Client hat `quit` geschickt
    Quit,
    /// Transport vom Client geschlossen
    Geschlossen,
    /// Frame-Fehler oder Schreibfehler
    Transportfehler,
    /// Zu lange kein Frame empfangen
    Leerlauf,
    /// Server faehrt herunter
    Shutdown,
}

/// Verarbeitet eine einzelne Verbindung
pub struct ClientConnection<D: Persistenz, M: MailVersand> {
    state: Arc<SignalingState<D, M>>,
    /// Gegenstelle fuer Logs (z.B. Socket-Adresse)
    peer: String,
}

impl<D: Persistenz, M: MailVersand> ClientConnection<D, M> {
    pub fn neu(state: Arc<SignalingState<D, M>>, peer: impl Into<String>) -> Self {
        Self {
            state,
            peer: peer.into(),
        }
    }

    /// Startet die Verarbeitungsschleife
    ///
    /// Laeuft bis die Verbindung endet und ist erst zurueck, wenn das
    /// Aufraeumen abgeschlossen ist.
    pub async fn verarbeiten<T>(self, stream: T, mut shutdown_rx: watch::Receiver<bool>) -> TrennGrund
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let peer = self.peer.as_str();
        let config = &self.state.config;
        let timeout_dauer = Duration::from_secs(config.verbindungs_timeout_sek.max(1));

        let (verbindung, mut sende_rx) = self.state.broadcaster.verbindung_registrieren();
        let mut zustand = VerbindungsZustand::Unauthentifiziert;
        tracing::info!(peer = %peer, connection_id = %verbindung, "Neue Verbindung");

        let dispatcher = MessageDispatcher::neu(Arc::clone(&self.state), verbindung);
        let mut framed = Framed::new(stream, FrameCodec::with_max_size(config.max_frame_groesse));
        let mut letzter_empfang = Instant::now();

        let grund = loop {
            tokio::select! {
                // Eingehender Frame vom Client
                frame = framed.next() => {
                    match frame {
                        Some(Ok(frame)) => {
                            letzter_empfang = Instant::now();
                            let uebergang = dispatcher.verarbeiten(zustand, frame).await;
                            zustand = uebergang.zustand;

                            if let Some(antwort) = uebergang.antwort {
                                if let Err(e) = framed.send(antwort).await {
                                    tracing::warn!(connection_id = %verbindung, fehler = %e, "Senden fehlgeschlagen");
                                    break TrennGrund::Transportfehler;
                                }
                            }
                            if zustand.ist_beendet() {
                                break TrennGrund::Quit;
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(connection_id = %verbindung, fehler = %e, "Frame-Lesefehler");
                            break TrennGrund::Transportfehler;
                        }
                        None => {
                            tracing::info!(connection_id = %verbindung, "Verbindung vom Client getrennt");
                            break TrennGrund::Geschlossen;
                        }
                    }
                }

                // Event aus dem Broadcaster
                Some(ausgehend) = sende_rx.recv() => {
                    if let Err(e) = framed.send(ausgehend).await {
                        tracing::warn!(connection_id = %verbindung, fehler = %e, "Event-Senden fehlgeschlagen");
                        break TrennGrund::Transportfehler;
                    }
                }

                // Leerlauf-Timeout
                _ = tokio::time::sleep_until(letzter_empfang + timeout_dauer) => {
                    tracing::warn!(connection_id = %verbindung, "Verbindungs-Timeout");
                    break TrennGrund::Leerlauf;
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!(connection_id = %verbindung, "Shutdown-Signal – Verbindung wird getrennt");
                        let _ = framed
                            .send(ControlMessage::event(ControlPayload::Goodbye))
                            .await;
                        break TrennGrund::Shutdown;
                    }
                }
            }
        };

        self.state.verbindung_beenden(verbindung).await;
        tracing::info!(
            peer = %peer,
            connection_id = %verbindung,
            grund = ?grund,
            "Verbindung beendet"
        );
        grund
    }
}
