// =============================================================================
// ServerConfig — process-level environment configuration
// =============================================================================
//
// Read once at startup (see `main.rs`). Grounded on the teacher's
// `RuntimeConfig::load`/`save` pattern, but this config is environment-only
// and has no on-disk form: ports, secrets, and admin credentials are not the
// kind of thing you want surviving in a JSON file next to the binary.
// =============================================================================

use anyhow::{bail, Context, Result};

/// Minimum byte length required for `JWT_SECRET` (spec.md §6).
const MIN_JWT_SECRET_LEN: usize = 32;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Candidate ports to bind, tried in order until one succeeds.
    pub bind_ports: Vec<u16>,
    /// HMAC signing secret for issued bearer credentials.
    pub jwt_secret: String,
    pub log_level: String,
    pub admin_identifier: Option<String>,
    pub admin_password: Option<String>,
    pub tester_identifier: Option<String>,
    pub tester_password: Option<String>,
}

impl ServerConfig {
    /// Load from process environment, applying the validation spec.md §6
    /// requires before the server is allowed to bind.
    pub fn from_env() -> Result<Self> {
        let bind_ports_raw =
            std::env::var("BIND_PORTS").unwrap_or_else(|_| "8080".to_string());
        let bind_ports: Vec<u16> = bind_ports_raw
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<u16>().with_context(|| format!("invalid port '{s}' in BIND_PORTS")))
            .collect::<Result<Vec<_>>>()?;
        if bind_ports.is_empty() {
            bail!("BIND_PORTS must list at least one port");
        }

        let jwt_secret = std::env::var("JWT_SECRET").context("JWT_SECRET is required")?;
        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            bail!(
                "JWT_SECRET must be at least {} bytes, got {}",
                MIN_JWT_SECRET_LEN,
                jwt_secret.len()
            );
        }

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            bind_ports,
            jwt_secret,
            log_level,
            admin_identifier: std::env::var("ADMIN_IDENTIFIER").ok(),
            admin_password: std::env::var("ADMIN_PASSWORD").ok(),
            tester_identifier: std::env::var("TESTER_IDENTIFIER").ok(),
            tester_password: std::env::var("TESTER_PASSWORD").ok(),
        })
    }
}
