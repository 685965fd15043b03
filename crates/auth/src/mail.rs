//! Schnittstelle fuer ausgehende E-Mails
//!
//! Der Auth-Service verschickt Verifikationscodes und Reset-Tokens. Die
//! konkrete Zustellung (SMTP) steckt im Server-Binary.

use stammtisch_core::types::UserName;

use crate::error::AuthResult;

#[allow(async_fn_in_trait)]
pub trait MailVersand: Send + Sync {
    async fn verifikationscode_senden(
        &self,
        empfaenger: &str,
        username: &UserName,
        code: &str,
    ) -> AuthResult<()>;

    async fn reset_token_senden(
        &self,
        empfaenger: &str,
        username: &UserName,
        token: &str,
    ) -> AuthResult<()>;
}
