//! Auth-Handler – Registrierung, Bestaetigung, Login, Token, Passwort-Reset
//!
//! Laeuft nur im Zustand `Unauthentifiziert`. Ein Handler meldet ueber
//! [`AuthSchritt::angemeldet`], ob die Verbindung jetzt authentifiziert ist;
//! die Bindung an die Verbindung uebernimmt der Dispatcher.

use stammtisch_auth::{AuthError, MailVersand, Registrierung, Session, SignupErgebnis};
use stammtisch_core::types::UserName;
use stammtisch_db::Persistenz;
use stammtisch_protocol::control::{
    AuthOkResponse, ControlPayload, LoginRequest, PasswordResetCompleteRequest,
    PasswordResetRequest, PasswordResetRequestedResponse, PasswordResetValidResponse,
    PasswordResetValidateRequest, SignupRequest, TokenRequest, VerificationRequiredResponse,
    VerifyEmailRequest,
};

use crate::error::SignalingResult;
use crate::server_state::SignalingState;

/// Antwort eines Auth-Handlers
#[derive(Debug)]
pub struct AuthSchritt {
    pub antwort: ControlPayload,
    /// Gesetzt, wenn die Verbindung ab jetzt als diese Identitaet gilt
    pub angemeldet: Option<UserName>,
}

impl AuthSchritt {
    fn angemeldet(session: Session) -> Self {
        let username = session.username.clone();
        Self {
            antwort: ControlPayload::AuthOk(AuthOkResponse {
                username: session.username,
                session_token: session.token,
                expires_at: session.laeuft_ab_am.timestamp(),
            }),
            angemeldet: Some(username),
        }
    }

    fn nur_antwort(antwort: ControlPayload) -> Self {
        Self {
            antwort,
            angemeldet: None,
        }
    }
}

/// Legt ein Konto an oder startet die E-Mail-Bestaetigung
pub async fn handle_signup<D: Persistenz, M: MailVersand>(
    request: SignupRequest,
    state: &SignalingState<D, M>,
) -> SignalingResult<AuthSchritt> {
    let ergebnis = state
        .auth_service
        .registrieren(Registrierung {
            username: &request.username,
            passwort: &request.password,
            email: &request.email,
            invite_code: request.invite_code.as_deref(),
        })
        .await?;

    Ok(match ergebnis {
        SignupErgebnis::Angemeldet { session, .. } => AuthSchritt::angemeldet(session),
        SignupErgebnis::VerifikationAusstehend {
            username,
            laeuft_ab_am,
        } => AuthSchritt::nur_antwort(ControlPayload::VerificationRequired(
            VerificationRequiredResponse {
                username,
                expires_at: laeuft_ab_am.timestamp(),
            },
        )),
    })
}

pub async fn handle_verify_email<D: Persistenz, M: MailVersand>(
    request: VerifyEmailRequest,
    state: &SignalingState<D, M>,
) -> SignalingResult<AuthSchritt> {
    let (_, session) = state
        .auth_service
        .email_bestaetigen(&request.username, &request.code)
        .await?;
    Ok(AuthSchritt::angemeldet(session))
}

pub async fn handle_login<D: Persistenz, M: MailVersand>(
    request: LoginRequest,
    state: &SignalingState<D, M>,
) -> SignalingResult<AuthSchritt> {
    let (_, session) = state
        .auth_service
        .anmelden(
            &request.username,
            &request.password,
            request.two_factor_code.as_deref(),
        )
        .await?;
    Ok(AuthSchritt::angemeldet(session))
}

/// Setzt eine Session mit ihrem Token fort
pub async fn handle_token<D: Persistenz, M: MailVersand>(
    request: TokenRequest,
    state: &SignalingState<D, M>,
) -> SignalingResult<AuthSchritt> {
    let (_, session) = state.auth_service.token_anmelden(&request.token).await?;
    Ok(AuthSchritt::angemeldet(session))
}

/// Antwortet fuer jede Kennung gleich
pub async fn handle_password_reset_request<D: Persistenz, M: MailVersand>(
    request: PasswordResetRequest,
    state: &SignalingState<D, M>,
) -> SignalingResult<AuthSchritt> {
    let message = state
        .auth_service
        .passwort_reset_anfordern(&request.identifier)
        .await?;
    Ok(AuthSchritt::nur_antwort(
        ControlPayload::PasswordResetRequested(PasswordResetRequestedResponse {
            message: message.to_string(),
        }),
    ))
}

/// Unbekannte und abgelaufene Tokens sind `valid: false`, kein Fehler
pub async fn handle_password_reset_validate<D: Persistenz, M: MailVersand>(
    request: PasswordResetValidateRequest,
    state: &SignalingState<D, M>,
) -> SignalingResult<AuthSchritt> {
    let valid = match state.auth_service.reset_token_pruefen(&request.token).await {
        Ok(_) => true,
        Err(AuthError::CodeUngueltig | AuthError::CodeAbgelaufen) => false,
        Err(e) => return Err(e.into()),
    };
    Ok(AuthSchritt::nur_antwort(ControlPayload::PasswordResetValid(
        PasswordResetValidResponse { valid },
    )))
}

pub async fn handle_password_reset_complete<D: Persistenz, M: MailVersand>(
    request: PasswordResetCompleteRequest,
    state: &SignalingState<D, M>,
) -> SignalingResult<AuthSchritt> {
    state
        .auth_service
        .passwort_reset_abschliessen(&request.token, &request.new_password)
        .await?;
    Ok(AuthSchritt::nur_antwort(ControlPayload::PasswordResetCompleted))
}
