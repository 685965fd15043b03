//! Voice-Handler – Kanaele, Direktanrufe und Medien-Flags
//!
//! Die Zugangspruefung (Server, Kanal, Mitgliedschaft, Sperren,
//! `connect`-Recht) laeuft vor der Zustandsaenderung. Die Aenderung selbst
//! und das Einsammeln der Benachrichtigungen erledigt der
//! `PresenceManager` in einem Schritt.

use stammtisch_auth::MailVersand;
use stammtisch_core::types::{ChannelId, ConnectionId, ServerId, UserName};
use stammtisch_db::{
    models::{KanalTyp, ModerationsTyp},
    Persistenz,
};
use stammtisch_protocol::control::{
    CallAnswerRequest, CallPeerEvent, CallStartRequest, ControlPayload, MediaFlagRequest,
    MediaFlagsEvent, VoiceJoinRequest,
};

use crate::error::{SignalingError, SignalingResult};
use crate::presence::VoiceBenachrichtigung;
use crate::server_state::SignalingState;

/// Berechtigung fuer das Betreten von Voice-Kanaelen
pub const CONNECT: &str = "connect";

/// Prueft ob `username` den Voice-Kanal betreten darf
pub async fn voice_zugang_pruefen<D: Persistenz, M: MailVersand>(
    server_id: ServerId,
    channel_id: ChannelId,
    username: &UserName,
    state: &SignalingState<D, M>,
) -> SignalingResult<()> {
    let server = state
        .db
        .get_server(server_id)
        .await?
        .ok_or_else(|| SignalingError::nicht_gefunden(format!("Server {server_id}")))?;
    let kanal = server
        .kanal(channel_id)
        .ok_or_else(|| SignalingError::nicht_gefunden(format!("Kanal {channel_id}")))?;
    if kanal.typ != KanalTyp::Voice {
        return Err(SignalingError::validierung(format!(
            "'{}' ist kein Voice-Kanal",
            kanal.name
        )));
    }

    if !state
        .permission_service
        .ist_mitglied(server_id, username)
        .await?
    {
        return Err(SignalingError::ZugriffVerweigert(format!(
            "kein Mitglied von '{}'",
            server.name
        )));
    }
    sperren_pruefen(server_id, &server.name, username, state).await?;
    state
        .permission_service
        .berechtigung_erfordern(server_id, username, CONNECT)
        .await?;
    Ok(())
}

/// `Gebannt` bei aktivem Ban, `ZugriffVerweigert` bei aktivem Kick
pub(crate) async fn sperren_pruefen<D: Persistenz, M: MailVersand>(
    server_id: ServerId,
    server_name: &str,
    username: &UserName,
    state: &SignalingState<D, M>,
) -> SignalingResult<()> {
    let moderation = &state.moderation_service;
    if moderation
        .ist_eingeschraenkt(server_id, username, ModerationsTyp::Ban)
        .await?
    {
        return Err(SignalingError::Gebannt(server_name.to_string()));
    }
    if moderation
        .ist_eingeschraenkt(server_id, username, ModerationsTyp::Kick)
        .await?
    {
        return Err(SignalingError::ZugriffVerweigert(format!(
            "aus '{server_name}' entfernt"
        )));
    }
    Ok(())
}

/// Antwort ist der neue Roster des Kanals
pub async fn handle_voice_join<D: Persistenz, M: MailVersand>(
    request: VoiceJoinRequest,
    username: &UserName,
    verbindung: ConnectionId,
    state: &SignalingState<D, M>,
) -> SignalingResult<ControlPayload> {
    voice_zugang_pruefen(request.server_id, request.channel_id, username, state).await?;

    let benachrichtigungen =
        state
            .presence
            .kanal_beitreten(username, request.server_id, request.channel_id);

    // Der letzte Snapshot ist der des neuen Kanals
    let eigener = match benachrichtigungen.last() {
        Some(VoiceBenachrichtigung::Roster(event)) => event.clone(),
        _ => state.presence.roster(request.server_id, request.channel_id),
    };
    state.voice_verteilen(benachrichtigungen, Some(verbindung)).await;

    Ok(ControlPayload::VoiceRoster(eigener))
}

/// Verlaesst Kanal oder Anruf; ohne Session ebenfalls `voice_left`
pub async fn handle_voice_leave<D: Persistenz, M: MailVersand>(
    username: &UserName,
    verbindung: ConnectionId,
    state: &SignalingState<D, M>,
) -> SignalingResult<ControlPayload> {
    let benachrichtigungen = state.presence.verlassen(username);
    state.voice_verteilen(benachrichtigungen, Some(verbindung)).await;
    Ok(ControlPayload::VoiceLeft)
}

pub async fn handle_media_flag<D: Persistenz, M: MailVersand>(
    request: MediaFlagRequest,
    username: &UserName,
    verbindung: ConnectionId,
    state: &SignalingState<D, M>,
) -> SignalingResult<ControlPayload> {
    let (flags, benachrichtigungen) =
        state
            .presence
            .medien_flag_setzen(username, request.flag, request.value)?;
    state.voice_verteilen(benachrichtigungen, Some(verbindung)).await;
    Ok(ControlPayload::MediaFlagsChanged(MediaFlagsEvent {
        username: username.clone(),
        flags,
    }))
}

/// Antwort `call_ringing`; die Gegenstelle bekommt `incoming_call`
///
/// Klingelt die Gegenstelle bereits beim Aufrufer, ist das Gespraech
/// damit verbunden und die Antwort lautet `call_accepted`.
pub async fn handle_call_start<D: Persistenz, M: MailVersand>(
    request: CallStartRequest,
    username: &UserName,
    verbindung: ConnectionId,
    state: &SignalingState<D, M>,
) -> SignalingResult<ControlPayload> {
    let benachrichtigungen = state.presence.anruf_starten(username, &request.peer)?;
    let angenommen = benachrichtigungen.iter().any(|b| {
        matches!(b, VoiceBenachrichtigung::AnrufAngenommen { an, .. } if an == &request.peer)
    });
    state.voice_verteilen(benachrichtigungen, Some(verbindung)).await;

    let event = CallPeerEvent { peer: request.peer };
    if angenommen {
        Ok(ControlPayload::CallAccepted(event))
    } else {
        Ok(ControlPayload::CallRinging(event))
    }
}

pub async fn handle_call_accept<D: Persistenz, M: MailVersand>(
    request: CallAnswerRequest,
    username: &UserName,
    verbindung: ConnectionId,
    state: &SignalingState<D, M>,
) -> SignalingResult<ControlPayload> {
    let benachrichtigungen = state.presence.anruf_annehmen(username, &request.caller)?;
    state.voice_verteilen(benachrichtigungen, Some(verbindung)).await;
    Ok(ControlPayload::CallAccepted(CallPeerEvent {
        peer: request.caller,
    }))
}

pub async fn handle_call_reject<D: Persistenz, M: MailVersand>(
    request: CallAnswerRequest,
    username: &UserName,
    verbindung: ConnectionId,
    state: &SignalingState<D, M>,
) -> SignalingResult<ControlPayload> {
    let benachrichtigungen = state.presence.anruf_ablehnen(username, &request.caller)?;
    state.voice_verteilen(benachrichtigungen, Some(verbindung)).await;
    Ok(ControlPayload::CallRejected(CallPeerEvent {
        peer: request.caller,
    }))
}
