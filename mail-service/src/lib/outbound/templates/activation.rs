use crate::domain::delivery::errors::TemplateError;
use crate::domain::delivery::models::ActivationEmail;
use crate::domain::delivery::models::RenderedEmail;
use crate::domain::delivery::ports::TemplateRenderer;

const SUBJECT: &str = "Activate your account";
const LINK_NAME: &str = "Activate Account";

/// Activation email with a link to `activation_url?token=<token>`.
#[derive(Debug, Clone)]
pub struct ActivationTemplate {
    activation_url: String,
}

impl ActivationTemplate {
    pub fn new(activation_url: impl Into<String>) -> Self {
        Self {
            activation_url: activation_url.into(),
        }
    }

    fn link(&self, token: &str) -> Result<String, TemplateError> {
        let base = self.activation_url.trim();
        if base.is_empty() {
            return Err(TemplateError::MissingActivationUrl);
        }

        let separator = if base.contains('?') { '&' } else { '?' };
        Ok(format!("{base}{separator}token={token}"))
    }
}

impl TemplateRenderer for ActivationTemplate {
    fn render_activation(&self, email: &ActivationEmail) -> Result<RenderedEmail, TemplateError> {
        let token = email.token.as_str();
        let link = self.link(token)?;

        let plain_body = format!(
            "Hi,\n\n\
            Thanks for signing up. Please activate your account by visiting:\n\
            {link}\n\n\
            Or send the following token to the activation endpoint:\n\
            {token}\n\n\
            The link expires in 3 days. If you did not sign up, ignore this email.\n"
        );

        let html_body = format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
</head>
<body style="font-family: sans-serif; padding: 20px; color: #333;">
    <p>Hi,</p>
    <p>Thanks for signing up. Please activate your account:</p>
    <p style="margin: 30px 0;"><a href="{href}">{name}</a></p>
    <p>Or send the following token to the activation endpoint:</p>
    <pre>{token}</pre>
    <p style="color: #999; font-size: 12px;">The link expires in 3 days. If you did not sign up, ignore this email.</p>
</body>
</html>"#,
            href = escape_html(&link),
            name = LINK_NAME,
            token = escape_html(token),
        );

        Ok(RenderedEmail {
            subject: SUBJECT.to_string(),
            plain_body,
            html_body,
        })
    }
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
