//! SMTP mailer for contact-form forwarding and claim status notifications.
//!
//! Sending is best-effort: when SMTP is not configured the mailer logs a
//! warning and reports success, so email never blocks the request that
//! triggered it.

use anyhow::Result;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::EmailConfig;

pub struct Mailer {
    config: EmailConfig,
}

impl Mailer {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    /// Check if email sending is configured and enabled
    pub fn is_enabled(&self) -> bool {
        self.config.is_configured()
    }

    /// Forward a contact-form submission to the support inbox.
    pub async fn send_contact_message(
        &self,
        name: &str,
        reply_to: &str,
        subject: &str,
        message: &str,
    ) -> Result<()> {
        if !self.is_enabled() {
            tracing::warn!("Email not configured, skipping contact message from {}", reply_to);
            return Ok(());
        }

        let recipient = self
            .config
            .contact_recipient
            .clone()
            .or_else(|| self.config.from_address.clone())
            .ok_or_else(|| anyhow::anyhow!("No contact recipient configured"))?;

        let full_subject = format!("[Contact] {}", subject);
        let html_body = render_contact_html(name, reply_to, message);
        let text_body = render_contact_text(name, reply_to, message);

        self.send_email(&recipient, &full_subject, &html_body, &text_body)
            .await
    }

    /// Notify a claimant that the status of their claim changed.
    pub async fn send_status_notification(
        &self,
        to_email: &str,
        user_name: &str,
        reference_number: &str,
        new_status: &str,
    ) -> Result<()> {
        if !self.is_enabled() {
            tracing::warn!(
                "Email not configured, skipping status notification to {}",
                to_email
            );
            return Ok(());
        }

        let subject = format!("Your refund claim {} is now {}", reference_number, new_status);
        let html_body = render_status_html(user_name, reference_number, new_status);
        let text_body = render_status_text(user_name, reference_number, new_status);

        self.send_email(to_email, &subject, &html_body, &text_body)
            .await
    }

    /// Send an email with HTML and plain text versions
    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        html_body: &str,
        text_body: &str,
    ) -> Result<()> {
        let smtp_host = self
            .config
            .smtp_host
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("SMTP host not configured"))?;
        let from_address = self
            .config
            .from_address
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("From address not configured"))?;

        let from_mailbox = format!("{} <{}>", self.config.from_name, from_address);
        let from: Mailbox = from_mailbox.parse()?;
        let to: Mailbox = to_email.parse()?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text_body.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body.to_string()),
                    ),
            )?;

        let mailer = if self.config.smtp_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host)
        }
        .port(self.config.smtp_port);

        let mailer = if let (Some(username), Some(password)) =
            (&self.config.smtp_username, &self.config.smtp_password)
        {
            mailer.credentials(Credentials::new(username.clone(), password.clone()))
        } else {
            mailer
        };

        mailer.build().send(email).await?;

        tracing::info!(to = %to_email, subject = %subject, "Email sent successfully");

        Ok(())
    }
}

fn render_contact_html(name: &str, reply_to: &str, message: &str) -> String {
    format!(
        r#"<html>
<body style="font-family: sans-serif; color: #374151;">
    <h2>New contact message</h2>
    <p><strong>From:</strong> {name} &lt;{reply_to}&gt;</p>
    <hr>
    <p style="white-space: pre-wrap;">{message}</p>
</body>
</html>"#,
        name = html_escape(name),
        reply_to = html_escape(reply_to),
        message = html_escape(message),
    )
}

fn render_contact_text(name: &str, reply_to: &str, message: &str) -> String {
    format!(
        "New contact message\n\nFrom: {} <{}>\n\n{}",
        name, reply_to, message
    )
}

fn render_status_html(user_name: &str, reference_number: &str, new_status: &str) -> String {
    format!(
        r#"<html>
<body style="font-family: sans-serif; color: #374151;">
    <p>Hi {user_name},</p>
    <p>Your refund claim <strong>{reference_number}</strong> has been updated to
    <strong>{new_status}</strong>.</p>
    <p>Log in to your dashboard to see the full history of this claim.</p>
</body>
</html>"#,
        user_name = html_escape(user_name),
        reference_number = html_escape(reference_number),
        new_status = html_escape(new_status),
    )
}

fn render_status_text(user_name: &str, reference_number: &str, new_status: &str) -> String {
    format!(
        "Hi {},\n\nYour refund claim {} has been updated to {}.\n\nLog in to your dashboard to see the full history of this claim.",
        user_name, reference_number, new_status
    )
}

/// Escape HTML special characters
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("<script>"), "&lt;script&gt;");
        assert_eq!(html_escape("Tom & Jerry"), "Tom &amp; Jerry");
        assert_eq!(html_escape("\"quoted\""), "&quot;quoted&quot;");
    }

    #[test]
    fn test_render_contact_bodies() {
        let html = render_contact_html("Jane", "jane@example.com", "Where is my refund?");
        assert!(html.contains("Jane"));
        assert!(html.contains("jane@example.com"));
        assert!(html.contains("Where is my refund?"));

        let text = render_contact_text("Jane", "jane@example.com", "Where is my refund?");
        assert!(text.contains("Jane <jane@example.com>"));
    }

    #[test]
    fn test_render_status_bodies() {
        let html = render_status_html("Jane", "REF-1001", "Approved");
        assert!(html.contains("REF-1001"));
        assert!(html.contains("Approved"));

        let text = render_status_text("Jane", "REF-1001", "Approved");
        assert!(text.contains("REF-1001"));
        assert!(text.contains("Approved"));
    }

    #[test]
    fn test_contact_html_escapes_input() {
        let html = render_contact_html("<b>Jane</b>", "jane@example.com", "a & b");
        assert!(html.contains("&lt;b&gt;Jane&lt;/b&gt;"));
        assert!(html.contains("a &amp; b"));
    }
}
