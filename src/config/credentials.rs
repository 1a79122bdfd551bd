use tracing::debug;

pub const WEBHOOK_URL_ENV: &str = "SCANLINE_WEBHOOK_URL";

/// Resolve a credential value. If the value starts with '$', treat it as an
/// environment variable reference and resolve from the environment.
pub fn resolve_credential(value: &str) -> String {
    if let Some(var_name) = value.strip_prefix('$') {
        match std::env::var(var_name) {
            Ok(resolved) => {
                debug!(var = %var_name, "Resolved credential from environment");
                resolved
            }
            Err(_) => {
                debug!(var = %var_name, "Environment variable not set, using literal");
                value.to_string()
            }
        }
    } else {
        value.to_string()
    }
}

/// Webhook URL from config (literal or `$VAR`), else from `SCANLINE_WEBHOOK_URL`.
pub fn resolve_webhook_url(configured: Option<&str>) -> Option<String> {
    configured
        .map(resolve_credential)
        .filter(|url| !url.is_empty() && !url.starts_with('$'))
        .or_else(|| std::env::var(WEBHOOK_URL_ENV).ok().filter(|url| !url.is_empty()))
}

/// Strip the query string and userinfo from a URL before it is logged.
/// Chat webhooks carry their secret in the path, so only the host is kept.
pub fn redact_url(url: &str) -> String {
    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => return "[REDACTED]".to_string(),
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    let host = authority.rsplit('@').next().unwrap_or(authority);
    format!("{}://{}/[REDACTED]", scheme, host)
}
