use anyhow::Result;
use tracing::info;

/// Outbound email is an external collaborator: this subsystem only needs
/// the send call. The real provider client is wired in by the host
/// application.
pub trait Mailer: Send + Sync {
    fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

/// Default wiring for environments without an email provider: log the send
/// and report success.
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send_email(&self, to: &str, subject: &str, _body: &str) -> Result<()> {
        info!("email to {}: {}", to, subject);
        Ok(())
    }
}
