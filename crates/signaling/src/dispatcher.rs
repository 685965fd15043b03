//! Message-Dispatcher – Zustandsautomat einer Verbindung
//!
//! Der Dispatcher bekommt den aktuellen Verbindungszustand und einen
//! dekodierten Frame und liefert den Folgezustand samt Antwort. Er haelt
//! selbst keinen Verbindungszustand.
//!
//! ## Zustaende
//! ```text
//! (Verbindend) -> Unauthentifiziert -> Authentifiziert
//!                       |                    |
//!                       +------ quit --------+--> Beendet
//! ```
//!
//! Verbindend ist die Zeit zwischen Accept und Registrierung beim
//! Broadcaster. In diesem Abschnitt werden keine Frames gelesen, der
//! Zustand hat daher keinen eigenen Wert.
//!
//! ## Zustandspruefung
//! - Auth-Nachrichten nur im Zustand `Unauthentifiziert`, danach `AlreadyLoggedIn`
//! - Alle anderen Anfragen nur im Zustand `Authentifiziert`, davor `NotAuthenticated`
//! - `ping` und `quit` in jedem Zustand
//! - Server-Nachrichten vom Client sind `InvalidRequest`

use std::sync::Arc;

use stammtisch_auth::MailVersand;
use stammtisch_core::types::{ConnectionId, UserName};
use stammtisch_db::Persistenz;
use stammtisch_protocol::control::{ControlMessage, ControlPayload, ErrorCode, FehlerKategorie};
use stammtisch_protocol::wire::EingehenderFrame;

use crate::error::{SignalingError, SignalingResult};
use crate::handlers::auth_handler::AuthSchritt;
use crate::handlers::{
    account_handler, auth_handler, message_handler, moderation_handler, permission_handler,
    voice_handler,
};
use crate::server_state::SignalingState;

/// Zustand einer Verbindung
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerbindungsZustand {
    /// Registriert, noch ohne Anmeldung
    Unauthentifiziert,
    Authentifiziert { username: UserName },
    /// Endzustand; danach wird nur noch aufgeraeumt
    Beendet,
}

impl VerbindungsZustand {
    pub fn username(&self) -> Option<&UserName> {
        match self {
            Self::Authentifiziert { username } => Some(username),
            _ => None,
        }
    }

    pub fn ist_beendet(&self) -> bool {
        matches!(self, Self::Beendet)
    }
}

/// Ergebnis eines Dispatch-Schritts
#[derive(Debug)]
pub struct Uebergang {
    pub zustand: VerbindungsZustand,
    pub antwort: Option<ControlMessage>,
}

impl Uebergang {
    fn bleiben(zustand: VerbindungsZustand, antwort: ControlMessage) -> Self {
        Self {
            zustand,
            antwort: Some(antwort),
        }
    }
}

/// Auth-Anfragen, die nur vor der Anmeldung erlaubt sind
fn ist_auth_anfrage(payload: &ControlPayload) -> bool {
    matches!(
        payload,
        ControlPayload::Signup(_)
            | ControlPayload::VerifyEmail(_)
            | ControlPayload::Login(_)
            | ControlPayload::Token(_)
            | ControlPayload::PasswordResetRequest(_)
            | ControlPayload::PasswordResetValidate(_)
            | ControlPayload::PasswordResetComplete(_)
    )
}

/// Anfragen, die eine angemeldete Verbindung voraussetzen
fn ist_sitzungs_anfrage(payload: &ControlPayload) -> bool {
    matches!(
        payload,
        ControlPayload::TwoFactorEnable
            | ControlPayload::TwoFactorDisable(_)
            | ControlPayload::InviteCreate
            | ControlPayload::VoiceJoin(_)
            | ControlPayload::VoiceLeave
            | ControlPayload::MediaFlagSet(_)
            | ControlPayload::CallStart(_)
            | ControlPayload::CallAccept(_)
            | ControlPayload::CallReject(_)
            | ControlPayload::PermissionCheck(_)
            | ControlPayload::Moderate(_)
            | ControlPayload::ModerationRevoke(_)
            | ControlPayload::ChannelMessage(_)
            | ControlPayload::DirectMessage(_)
    )
}

fn zeitstempel_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}

/// Zentraler Message-Dispatcher einer Verbindung
pub struct MessageDispatcher<D: Persistenz, M: MailVersand> {
    state: Arc<SignalingState<D, M>>,
    verbindung: ConnectionId,
}

impl<D: Persistenz, M: MailVersand> MessageDispatcher<D, M> {
    pub fn neu(state: Arc<SignalingState<D, M>>, verbindung: ConnectionId) -> Self {
        Self { state, verbindung }
    }

    pub fn verbindung(&self) -> ConnectionId {
        self.verbindung
    }

    /// Verarbeitet einen Frame und liefert Folgezustand und Antwort
    ///
    /// Fehler werden hier zu Error-Frames; kein Fehler beendet die
    /// Verbindung.
    pub async fn verarbeiten(
        &self,
        zustand: VerbindungsZustand,
        frame: EingehenderFrame,
    ) -> Uebergang {
        match frame {
            EingehenderFrame::Nachricht(nachricht) => self.nachricht(zustand, nachricht).await,
            EingehenderFrame::Ungueltig {
                request_id,
                typ,
                code,
                grund,
            } => {
                tracing::debug!(
                    connection_id = %self.verbindung,
                    typ = ?typ,
                    grund = %grund,
                    "Ungueltiger Frame"
                );
                let meldung = match (code, typ) {
                    (ErrorCode::UnknownType, Some(typ)) => {
                        format!("Unbekannter Nachrichtentyp '{typ}'")
                    }
                    _ => format!("Ungueltiger Frame: {grund}"),
                };
                Uebergang::bleiben(zustand, ControlMessage::error(request_id, code, meldung))
            }
        }
    }

    async fn nachricht(&self, zustand: VerbindungsZustand, nachricht: ControlMessage) -> Uebergang {
        let ControlMessage {
            request_id,
            payload,
        } = nachricht;
        let typ = payload.typ_name();

        tracing::trace!(
            connection_id = %self.verbindung,
            request_id,
            typ,
            "Nachricht empfangen"
        );

        // In jedem Zustand erlaubt
        match &payload {
            ControlPayload::Ping(ping) => {
                let pong = ControlMessage::pong(request_id, ping.timestamp_ms, zeitstempel_ms());
                return Uebergang::bleiben(zustand, pong);
            }
            ControlPayload::Quit => {
                tracing::debug!(connection_id = %self.verbindung, "Client beendet Verbindung");
                return Uebergang::bleiben(
                    VerbindungsZustand::Beendet,
                    ControlMessage::new(request_id, ControlPayload::Goodbye),
                );
            }
            _ => {}
        }

        match zustand {
            VerbindungsZustand::Unauthentifiziert => {
                match self.unauthentifiziert(payload).await {
                    Ok(AuthSchritt {
                        antwort,
                        angemeldet: Some(username),
                    }) => {
                        self.state.anmeldung_binden(self.verbindung, &username);
                        Uebergang::bleiben(
                            VerbindungsZustand::Authentifiziert { username },
                            ControlMessage::new(request_id, antwort),
                        )
                    }
                    Ok(AuthSchritt { antwort, .. }) => Uebergang::bleiben(
                        VerbindungsZustand::Unauthentifiziert,
                        ControlMessage::new(request_id, antwort),
                    ),
                    Err(e) => {
                        let antwort = self.fehler_antwort(&e, request_id, typ, None);
                        Uebergang::bleiben(VerbindungsZustand::Unauthentifiziert, antwort)
                    }
                }
            }
            VerbindungsZustand::Authentifiziert { username } => {
                let antwort = match self.authentifiziert(&username, payload).await {
                    Ok(antwort) => ControlMessage::new(request_id, antwort),
                    Err(e) => self.fehler_antwort(&e, request_id, typ, Some(&username)),
                };
                Uebergang::bleiben(VerbindungsZustand::Authentifiziert { username }, antwort)
            }
            andere @ VerbindungsZustand::Beendet => {
                Uebergang::bleiben(
                    andere,
                    ControlMessage::error(
                        request_id,
                        ErrorCode::InvalidRequest,
                        "Verbindung ist nicht bereit",
                    ),
                )
            }
        }
    }

    async fn unauthentifiziert(&self, payload: ControlPayload) -> SignalingResult<AuthSchritt> {
        let state = &*self.state;
        match payload {
            ControlPayload::Signup(req) => auth_handler::handle_signup(req, state).await,
            ControlPayload::VerifyEmail(req) => auth_handler::handle_verify_email(req, state).await,
            ControlPayload::Login(req) => auth_handler::handle_login(req, state).await,
            ControlPayload::Token(req) => auth_handler::handle_token(req, state).await,
            ControlPayload::PasswordResetRequest(req) => {
                auth_handler::handle_password_reset_request(req, state).await
            }
            ControlPayload::PasswordResetValidate(req) => {
                auth_handler::handle_password_reset_validate(req, state).await
            }
            ControlPayload::PasswordResetComplete(req) => {
                auth_handler::handle_password_reset_complete(req, state).await
            }
            andere if ist_sitzungs_anfrage(&andere) => Err(SignalingError::NichtAngemeldet),
            andere => Err(nur_vom_server(&andere)),
        }
    }

    async fn authentifiziert(
        &self,
        username: &UserName,
        payload: ControlPayload,
    ) -> SignalingResult<ControlPayload> {
        let state = &*self.state;
        let verbindung = self.verbindung;
        match payload {
            andere if ist_auth_anfrage(&andere) => Err(SignalingError::BereitsAngemeldet),

            // Account
            ControlPayload::TwoFactorEnable => {
                account_handler::handle_two_factor_enable(username, state).await
            }
            ControlPayload::TwoFactorDisable(req) => {
                account_handler::handle_two_factor_disable(req, username, state).await
            }
            ControlPayload::InviteCreate => {
                account_handler::handle_invite_create(username, state).await
            }

            // Voice
            ControlPayload::VoiceJoin(req) => {
                voice_handler::handle_voice_join(req, username, verbindung, state).await
            }
            ControlPayload::VoiceLeave => {
                voice_handler::handle_voice_leave(username, verbindung, state).await
            }
            ControlPayload::MediaFlagSet(req) => {
                voice_handler::handle_media_flag(req, username, verbindung, state).await
            }
            ControlPayload::CallStart(req) => {
                voice_handler::handle_call_start(req, username, verbindung, state).await
            }
            ControlPayload::CallAccept(req) => {
                voice_handler::handle_call_accept(req, username, verbindung, state).await
            }
            ControlPayload::CallReject(req) => {
                voice_handler::handle_call_reject(req, username, verbindung, state).await
            }

            // Berechtigungen und Moderation
            ControlPayload::PermissionCheck(req) => {
                permission_handler::handle_permission_check(req, username, state).await
            }
            ControlPayload::Moderate(req) => {
                moderation_handler::handle_moderate(req, username, verbindung, state).await
            }
            ControlPayload::ModerationRevoke(req) => {
                moderation_handler::handle_moderation_revoke(req, username, verbindung, state)
                    .await
            }

            // Nachrichten
            ControlPayload::ChannelMessage(req) => {
                message_handler::handle_channel_message(req, username, verbindung, state).await
            }
            ControlPayload::DirectMessage(req) => {
                message_handler::handle_direct_message(req, username, verbindung, state).await
            }

            andere => Err(nur_vom_server(&andere)),
        }
    }

    fn fehler_antwort(
        &self,
        fehler: &SignalingError,
        request_id: u32,
        typ: &str,
        username: Option<&UserName>,
    ) -> ControlMessage {
        match fehler.kategorie() {
            FehlerKategorie::Autorisierung => tracing::warn!(
                connection_id = %self.verbindung,
                username = ?username,
                typ,
                fehler = %fehler,
                "Anfrage abgelehnt"
            ),
            FehlerKategorie::Infrastruktur => {}
            _ => tracing::debug!(
                connection_id = %self.verbindung,
                typ,
                fehler = %fehler,
                "Anfrage fehlgeschlagen"
            ),
        }
        fehler.als_antwort(request_id)
    }
}

fn nur_vom_server(payload: &ControlPayload) -> SignalingError {
    SignalingError::validierung(format!(
        "'{}' wird nur vom Server gesendet",
        payload.typ_name()
    ))
}
