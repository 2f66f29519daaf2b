//! Developer-token resolution.
//!
//! The bearer token comes from the environment (`APPLE_DEV_TOKEN`, then
//! `DEV_TOKEN`) or from the configured `authorization-token` value. Tokens
//! must be JWT-shaped; a `Bearer ` prefix on the configured value is
//! stripped. Scraping the token out of the web player's assets is the job
//! of an external helper, not this crate.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::error::CatalogError;

static JWT_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^eyJ[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]+$")
        .expect("static regex compiles")
});

const TOKEN_ENV_VARS: &[&str] = &["APPLE_DEV_TOKEN", "DEV_TOKEN"];

/// Placeholder shipped in the sample configuration.
const CONFIG_PLACEHOLDER: &str = "your-authorization-token";

pub fn developer_token(configured: Option<&str>) -> Result<String, CatalogError> {
    for var in TOKEN_ENV_VARS {
        if let Ok(value) = std::env::var(var)
            && JWT_SHAPE.is_match(&value)
        {
            debug!(source = var, "using developer token from environment");
            return Ok(value);
        }
    }

    if let Some(configured) = configured {
        let token = configured.trim().trim_start_matches("Bearer ").to_string();
        if !token.is_empty() && token != CONFIG_PLACEHOLDER {
            debug!("using developer token from configuration");
            return Ok(token);
        }
    }

    Err(CatalogError::MissingToken)
}
