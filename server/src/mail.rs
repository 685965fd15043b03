//! SMTP-Versand fuer Verifikationscodes und Reset-Tokens

use anyhow::Context;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use stammtisch_auth::{AuthError, AuthResult, MailVersand};
use stammtisch_core::types::UserName;

use crate::config::SmtpEinstellungen;

/// Verschickt Mails ueber einen SMTP-Relay
#[derive(Clone)]
pub struct SmtpMail {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    absender: Mailbox,
}

impl SmtpMail {
    pub fn neu(config: &SmtpEinstellungen) -> anyhow::Result<Self> {
        let absender: Mailbox = config
            .absender
            .parse()
            .context("smtp.absender ist keine gueltige Adresse")?;
        let zugang = Credentials::new(config.benutzer.clone(), config.passwort.clone());

        let mailer = match config.tls.as_str() {
            "tls" => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .context("SMTP-TLS-Transport nicht erstellbar")?
                .port(config.port)
                .credentials(zugang)
                .build(),
            "none" => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .port(config.port)
                .credentials(zugang)
                .build(),
            _ => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .context("SMTP-STARTTLS-Transport nicht erstellbar")?
                .port(config.port)
                .credentials(zugang)
                .build(),
        };

        Ok(Self { mailer, absender })
    }

    async fn senden(&self, empfaenger: &str, betreff: &str, text: String) -> AuthResult<()> {
        let an: Mailbox = empfaenger
            .parse()
            .map_err(|e| AuthError::Mail(format!("Empfaenger ungueltig: {e}")))?;
        let mail = Message::builder()
            .from(self.absender.clone())
            .to(an)
            .subject(betreff)
            .body(text)
            .map_err(|e| AuthError::Mail(e.to_string()))?;

        self.mailer
            .send(mail)
            .await
            .map_err(|e| AuthError::Mail(e.to_string()))?;
        Ok(())
    }
}

impl MailVersand for SmtpMail {
    async fn verifikationscode_senden(
        &self,
        empfaenger: &str,
        username: &UserName,
        code: &str,
    ) -> AuthResult<()> {
        let text = format!(
            "Hallo {username},\n\
             \n\
             dein Bestaetigungscode lautet: {code}\n\
             \n\
             Der Code ist 15 Minuten gueltig.\n"
        );
        self.senden(empfaenger, "Stammtisch: E-Mail bestaetigen", text)
            .await?;
        tracing::info!(username = %username, "Verifikationscode verschickt");
        Ok(())
    }

    async fn reset_token_senden(
        &self,
        empfaenger: &str,
        username: &UserName,
        token: &str,
    ) -> AuthResult<()> {
        let text = format!(
            "Hallo {username},\n\
             \n\
             fuer dein Konto wurde ein neues Passwort angefordert.\n\
             \n\
             Reset-Code: {token}\n\
             \n\
             Der Code ist eine Stunde gueltig. Wenn du das nicht warst,\n\
             kannst du diese Nachricht ignorieren.\n"
        );
        self.senden(empfaenger, "Stammtisch: Passwort zuruecksetzen", text)
            .await?;
        tracing::info!(username = %username, "Reset-Token verschickt");
        Ok(())
    }
}
