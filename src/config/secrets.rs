//! Secret handling utilities.
//!
//! Re-exports secrecy types and redacts credentials embedded in
//! connection URLs before they reach a log line.

pub use secrecy::{ExposeSecret, SecretString};

/// Render a connection URL with its password replaced by `***`.
pub fn redacted_url(secret: &SecretString) -> String {
    let raw = secret.expose_secret();
    match url::Url::parse(raw) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        Ok(parsed) => parsed.to_string(),
        Err(_) => "<unparseable url>".to_string(),
    }
}
