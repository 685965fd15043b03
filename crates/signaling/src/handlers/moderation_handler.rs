//! Moderations-Handler – Kick, Ban, Timeout und deren Aufhebung
//!
//! | Aktion    | Berechtigung       |
//! |-----------|--------------------|
//! | `kick`    | `kick_members`     |
//! | `ban`     | `ban_members`      |
//! | `timeout` | `moderate_members` |
//!
//! Ergebnisse gehen als Event an alle Mitglieder des Servers.

use chrono::Duration;
use stammtisch_auth::{moderation_service::MAX_TIMEOUT_SEKUNDEN, Massnahme, MailVersand};
use stammtisch_core::types::{ConnectionId, ServerId, UserName};
use stammtisch_db::{
    models::{ModerationsTyp, ServerRecord},
    Persistenz,
};
use stammtisch_protocol::control::{
    ControlMessage, ControlPayload, ModerateRequest, ModerationEvent, ModerationRevokeRequest,
    ModerationRevokedEvent, ModerationType,
};

use crate::error::{SignalingError, SignalingResult};
use crate::server_state::SignalingState;

pub fn moderations_typ(action: ModerationType) -> ModerationsTyp {
    match action {
        ModerationType::Kick => ModerationsTyp::Kick,
        ModerationType::Ban => ModerationsTyp::Ban,
        ModerationType::Timeout => ModerationsTyp::Timeout,
    }
}

/// Berechtigung die eine Aktion verlangt
pub fn erforderliche_berechtigung(action: ModerationType) -> &'static str {
    match action {
        ModerationType::Kick => "kick_members",
        ModerationType::Ban => "ban_members",
        ModerationType::Timeout => "moderate_members",
    }
}

async fn vorpruefen<D: Persistenz, M: MailVersand>(
    server_id: ServerId,
    actor: &UserName,
    target: &UserName,
    action: ModerationType,
    state: &SignalingState<D, M>,
) -> SignalingResult<ServerRecord> {
    let server = state
        .db
        .get_server(server_id)
        .await?
        .ok_or_else(|| SignalingError::nicht_gefunden(format!("Server {server_id}")))?;

    if let Err(e) = state
        .permission_service
        .berechtigung_erfordern(server_id, actor, erforderliche_berechtigung(action))
        .await
    {
        tracing::warn!(
            server_id = %server_id,
            username = %actor,
            aktion = ?action,
            "Moderation ohne Berechtigung abgelehnt"
        );
        return Err(e.into());
    }

    if target == &server.owner {
        return Err(SignalingError::ZugriffVerweigert(
            "der Besitzer kann nicht moderiert werden".into(),
        ));
    }
    if !state.permission_service.ist_mitglied(server_id, target).await? {
        return Err(SignalingError::nicht_gefunden(format!(
            "{target} ist kein Mitglied"
        )));
    }
    Ok(server)
}

fn dauer_umrechnen(sekunden: Option<u64>) -> SignalingResult<Option<Duration>> {
    sekunden
        .map(|s| {
            i64::try_from(s)
                .ok()
                .filter(|s| *s <= MAX_TIMEOUT_SEKUNDEN)
                .map(Duration::seconds)
                .ok_or_else(|| {
                    SignalingError::validierung("Timeout-Dauer darf 28 Tage nicht ueberschreiten")
                })
        })
        .transpose()
}

pub async fn handle_moderate<D: Persistenz, M: MailVersand>(
    request: ModerateRequest,
    actor: &UserName,
    verbindung: ConnectionId,
    state: &SignalingState<D, M>,
) -> SignalingResult<ControlPayload> {
    let server_id = request.server_id;
    vorpruefen(server_id, actor, &request.target, request.action, state).await?;

    let typ = moderations_typ(request.action);
    let record = state
        .moderation_service
        .verhaengen(Massnahme {
            server_id,
            typ,
            target: &request.target,
            actor,
            reason: request.reason.as_deref(),
            dauer: dauer_umrechnen(request.duration_secs)?,
        })
        .await?;

    if matches!(typ, ModerationsTyp::Kick | ModerationsTyp::Ban) {
        let benachrichtigungen = state
            .presence
            .aus_server_entfernen(&request.target, server_id);
        state.voice_verteilen(benachrichtigungen, None).await;
    }

    let event = ModerationEvent {
        server_id,
        target: request.target,
        actor: actor.clone(),
        action: request.action,
        reason: record.reason,
        expires_at: record.expires_at,
    };
    let nachricht = ControlMessage::event(ControlPayload::ModerationApplied(event.clone()));
    if let Err(e) = state
        .an_server_mitglieder_senden(server_id, &nachricht, Some(verbindung))
        .await
    {
        tracing::error!(server_id = %server_id, fehler = %e, "Moderations-Event nicht verteilt");
    }
    Ok(ControlPayload::ModerationApplied(event))
}

pub async fn handle_moderation_revoke<D: Persistenz, M: MailVersand>(
    request: ModerationRevokeRequest,
    actor: &UserName,
    verbindung: ConnectionId,
    state: &SignalingState<D, M>,
) -> SignalingResult<ControlPayload> {
    let server_id = request.server_id;
    vorpruefen(server_id, actor, &request.target, request.action, state).await?;

    state
        .moderation_service
        .aufheben(server_id, &request.target, moderations_typ(request.action))
        .await?;

    let event = ModerationRevokedEvent {
        server_id,
        target: request.target,
        actor: actor.clone(),
        action: request.action,
    };
    let nachricht = ControlMessage::event(ControlPayload::ModerationRevoked(event.clone()));
    if let Err(e) = state
        .an_server_mitglieder_senden(server_id, &nachricht, Some(verbindung))
        .await
    {
        tracing::error!(server_id = %server_id, fehler = %e, "Moderations-Event nicht verteilt");
    }
    Ok(ControlPayload::ModerationRevoked(event))
}
