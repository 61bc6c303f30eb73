//! Operator commands: one-off sends and token checks

use anyhow::{Context, bail};
use care_whatsapp::WhatsAppClient;

const DEFAULT_TEMPLATE: &str = "hello_world";
const DEFAULT_LANGUAGE: &str = "en_US";

/// What `send` delivers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Template { name: String, language: String },
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendCommand {
    pub to: String,
    pub message: Outgoing,
}

/// Parse `<phone> [template [name [language]] | text <message>]`
pub fn parse_send(args: &[String]) -> anyhow::Result<SendCommand> {
    let Some((to, rest)) = args.split_first() else {
        bail!("Usage: care-bot send <phone> [template [name] | text <message>]");
    };

    let message = match rest.split_first() {
        None => Outgoing::Template {
            name: DEFAULT_TEMPLATE.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
        },
        Some((kind, rest)) if kind == "template" => Outgoing::Template {
            name: rest.first().cloned().unwrap_or_else(|| DEFAULT_TEMPLATE.to_string()),
            language: rest.get(1).cloned().unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
        },
        Some((kind, rest)) if kind == "text" => {
            let text = rest.join(" ");
            if text.trim().is_empty() {
                bail!("Usage: care-bot send <phone> text <message>");
            }
            Outgoing::Text(text)
        }
        Some((kind, _)) => bail!("Unknown message kind '{}', expected 'template' or 'text'", kind),
    };

    Ok(SendCommand {
        to: to.clone(),
        message,
    })
}

/// Send one message and print the resulting message ids
pub async fn send(client: &WhatsAppClient, command: &SendCommand) -> anyhow::Result<()> {
    let ids = match &command.message {
        Outgoing::Template { name, language } => client
            .send_template(&command.to, name, language)
            .await
            .with_context(|| format!("Failed to send template '{}'", name))?
            .message_id()
            .map(str::to_string)
            .into_iter()
            .collect::<Vec<_>>(),
        Outgoing::Text(text) => client
            .send_text(&command.to, text)
            .await
            .context("Failed to send text message")?,
    };

    println!("✅ Message sent to {}", command.to);
    for id in ids {
        println!("   id: {}", id);
    }
    Ok(())
}

/// Query the phone number resource to confirm the access token works
pub async fn check_token(client: &WhatsAppClient) -> anyhow::Result<()> {
    match client.phone_number_info().await {
        Ok(info) => {
            println!("✅ Access token is valid");
            println!("   Phone number:  {}", info.display_phone_number);
            println!("   Verified name: {}", info.verified_name);
            if !info.quality_rating.is_empty() {
                println!("   Quality:       {}", info.quality_rating);
            }
            Ok(())
        }
        Err(e) => {
            println!("❌ Access token check failed");
            Err(e).context("WhatsApp access token is invalid or expired")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_parse_send_defaults_to_hello_world() {
        let command = parse_send(&args(&["+919876543210"])).unwrap();
        assert_eq!(command.to, "+919876543210");
        assert_eq!(
            command.message,
            Outgoing::Template {
                name: "hello_world".to_string(),
                language: "en_US".to_string()
            }
        );
    }

    #[test]
    fn test_parse_send_template_and_text() {
        let command = parse_send(&args(&["123", "template", "appointment_reminder"])).unwrap();
        assert_eq!(
            command.message,
            Outgoing::Template {
                name: "appointment_reminder".to_string(),
                language: "en_US".to_string()
            }
        );

        let command = parse_send(&args(&["123", "text", "Your", "report", "is", "ready"])).unwrap();
        assert_eq!(command.message, Outgoing::Text("Your report is ready".to_string()));
    }

    #[test]
    fn test_parse_send_errors() {
        assert!(parse_send(&[]).is_err());
        assert!(parse_send(&args(&["123", "text"])).is_err());
        assert!(parse_send(&args(&["123", "image"])).is_err());
    }
}
