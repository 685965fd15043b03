//! Account-Handler – Zweiter Faktor und Einladungscodes

use stammtisch_auth::MailVersand;
use stammtisch_core::types::UserName;
use stammtisch_db::Persistenz;
use stammtisch_protocol::control::{
    ControlPayload, InviteCreatedResponse, TwoFactorDisableRequest, TwoFactorSetupResponse,
};

use crate::error::SignalingResult;
use crate::server_state::SignalingState;

/// Secret und Backup-Codes werden nur in dieser Antwort im Klartext gezeigt
pub async fn handle_two_factor_enable<D: Persistenz, M: MailVersand>(
    username: &UserName,
    state: &SignalingState<D, M>,
) -> SignalingResult<ControlPayload> {
    let einrichtung = state.auth_service.zwei_faktor_einrichten(username).await?;
    Ok(ControlPayload::TwoFactorEnabled(TwoFactorSetupResponse {
        secret: einrichtung.secret,
        otpauth_url: einrichtung.otpauth_url,
        backup_codes: einrichtung.backup_codes,
    }))
}

pub async fn handle_two_factor_disable<D: Persistenz, M: MailVersand>(
    request: TwoFactorDisableRequest,
    username: &UserName,
    state: &SignalingState<D, M>,
) -> SignalingResult<ControlPayload> {
    state
        .auth_service
        .zwei_faktor_deaktivieren(username, &request.code)
        .await?;
    Ok(ControlPayload::TwoFactorDisabled)
}

pub async fn handle_invite_create<D: Persistenz, M: MailVersand>(
    username: &UserName,
    state: &SignalingState<D, M>,
) -> SignalingResult<ControlPayload> {
    let code = state.auth_service.einladung_erstellen(username).await?;
    tracing::info!(username = %username, "Einladungscode erstellt");
    Ok(ControlPayload::InviteCreated(InviteCreatedResponse { code }))
}
