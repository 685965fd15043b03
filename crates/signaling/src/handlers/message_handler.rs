//! Nachrichten-Handler – Kanal- und Direktnachrichten
//!
//! Nachrichten werden nicht gespeichert, nur an die gerade verbundenen
//! Empfaenger verteilt. Die Antwort meldet, wie viele Verbindungen die
//! Nachricht bekommen haben.

use chrono::Utc;
use stammtisch_auth::MailVersand;
use stammtisch_core::types::{ConnectionId, UserName};
use stammtisch_db::{models::ModerationsTyp, Persistenz};
use stammtisch_protocol::control::{
    ChannelMessageEvent, ChannelMessageRequest, ControlMessage, ControlPayload,
    DirectMessageEvent, DirectMessageRequest, MessageSentResponse,
};

use crate::broadcast::ZustellBericht;
use crate::error::{SignalingError, SignalingResult};
use crate::handlers::voice_handler::sperren_pruefen;
use crate::server_state::SignalingState;

/// Maximale Laenge einer Nachricht in Zeichen
pub const MAX_NACHRICHT_LAENGE: usize = 4000;

/// Berechtigung fuer Kanalnachrichten
pub const SEND_MESSAGES: &str = "send_messages";

fn inhalt_pruefen(content: &str) -> SignalingResult<()> {
    if content.trim().is_empty() {
        return Err(SignalingError::validierung("Nachricht ist leer"));
    }
    if content.chars().count() > MAX_NACHRICHT_LAENGE {
        return Err(SignalingError::validierung(format!(
            "Nachricht ist laenger als {MAX_NACHRICHT_LAENGE} Zeichen"
        )));
    }
    Ok(())
}

fn gesendet(bericht: &ZustellBericht) -> ControlPayload {
    ControlPayload::MessageSent(MessageSentResponse {
        delivered: bericht.zugestellt(),
        failed: bericht.fehlgeschlagen(),
    })
}

pub async fn handle_channel_message<D: Persistenz, M: MailVersand>(
    request: ChannelMessageRequest,
    author: &UserName,
    verbindung: ConnectionId,
    state: &SignalingState<D, M>,
) -> SignalingResult<ControlPayload> {
    inhalt_pruefen(&request.content)?;
    let server_id = request.server_id;

    let server = state
        .db
        .get_server(server_id)
        .await?
        .ok_or_else(|| SignalingError::nicht_gefunden(format!("Server {server_id}")))?;
    if server.kanal(request.channel_id).is_none() {
        return Err(SignalingError::nicht_gefunden(format!(
            "Kanal {}",
            request.channel_id
        )));
    }
    if !state.permission_service.ist_mitglied(server_id, author).await? {
        return Err(SignalingError::ZugriffVerweigert(format!(
            "kein Mitglied von '{}'",
            server.name
        )));
    }
    sperren_pruefen(server_id, &server.name, author, state).await?;
    if state
        .moderation_service
        .ist_eingeschraenkt(server_id, author, ModerationsTyp::Timeout)
        .await?
    {
        return Err(SignalingError::ImTimeout(server.name));
    }
    state
        .permission_service
        .berechtigung_erfordern(server_id, author, SEND_MESSAGES)
        .await?;

    let event = ControlMessage::event(ControlPayload::ChannelMessageReceived(
        ChannelMessageEvent {
            server_id,
            channel_id: request.channel_id,
            author: author.clone(),
            content: request.content,
            sent_at: Utc::now(),
        },
    ));
    let bericht = state
        .an_server_mitglieder_senden(server_id, &event, Some(verbindung))
        .await?;
    tracing::debug!(
        server_id = %server_id,
        username = %author,
        zugestellt = bericht.zugestellt(),
        "Kanalnachricht verteilt"
    );
    Ok(gesendet(&bericht))
}

pub async fn handle_direct_message<D: Persistenz, M: MailVersand>(
    request: DirectMessageRequest,
    author: &UserName,
    verbindung: ConnectionId,
    state: &SignalingState<D, M>,
) -> SignalingResult<ControlPayload> {
    inhalt_pruefen(&request.content)?;

    let event = ControlMessage::event(ControlPayload::DirectMessageReceived(DirectMessageEvent {
        dm_id: request.dm_id,
        author: author.clone(),
        content: request.content,
        sent_at: Utc::now(),
    }));
    let bericht = state
        .an_dm_paar_senden(request.dm_id, author, &event, Some(verbindung))
        .await?;
    Ok(gesendet(&bericht))
}
