//! Permission-Handler – Beantwortet `hasPermission` fuer den Aufrufer

use stammtisch_auth::MailVersand;
use stammtisch_core::types::UserName;
use stammtisch_db::Persistenz;
use stammtisch_protocol::control::{
    ControlPayload, PermissionCheckRequest, PermissionResultResponse,
};

use crate::error::{SignalingError, SignalingResult};
use crate::server_state::SignalingState;

/// Unbekannte Server ergeben `allowed: false`, keinen Fehler
pub async fn handle_permission_check<D: Persistenz, M: MailVersand>(
    request: PermissionCheckRequest,
    username: &UserName,
    state: &SignalingState<D, M>,
) -> SignalingResult<ControlPayload> {
    let permission = request.permission.trim();
    if permission.is_empty() {
        return Err(SignalingError::validierung("Berechtigungsname fehlt"));
    }

    let allowed = state
        .permission_service
        .berechtigung_pruefen(request.server_id, username, permission)
        .await?;
    tracing::debug!(
        server_id = %request.server_id,
        username = %username,
        permission,
        allowed,
        "Berechtigung abgefragt"
    );
    Ok(ControlPayload::PermissionResult(PermissionResultResponse {
        server_id: request.server_id,
        permission: permission.to_string(),
        allowed,
    }))
}
