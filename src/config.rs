use std::net::IpAddr;

use chrono::Duration;
use ipnet::IpNet;

use crate::recovery::AccountKind;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: IpAddr,
    pub port: u16,
    pub base_url: String,
    pub max_body_size: usize,
    pub trusted_proxies: Vec<IpNet>,
    pub worker_count: usize,
    pub log_level: String,
    pub smtp: Option<SmtpConfig>,
    pub recovery: RecoveryConfig,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub from: String,
}

/// Settings for the password recovery flow.
///
/// `token_ttl` is the single source for token lifetime: expiry checks and the
/// "link expires in ..." email copy both read it.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub token_ttl: Duration,
    pub account_kind: AccountKind,
    pub retention_grace: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            token_ttl: Duration::minutes(5),
            account_kind: AccountKind::Candidate,
            retention_grace: Duration::hours(24),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = env_required("DATABASE_URL")?;

        let host: IpAddr = env_or("JOBBOARD_HOST", "0.0.0.0")
            .parse()
            .map_err(|e| format!("Invalid JOBBOARD_HOST: {e}"))?;

        let port: u16 = env_or("JOBBOARD_PORT", "3000")
            .parse()
            .map_err(|e| format!("Invalid JOBBOARD_PORT: {e}"))?;

        let base_url = env_or("JOBBOARD_BASE_URL", &format!("http://{host}:{port}"))
            .trim_end_matches('/')
            .to_string();

        let max_body_size: usize = env_or("JOBBOARD_MAX_BODY_SIZE", "65536")
            .parse()
            .map_err(|e| format!("Invalid JOBBOARD_MAX_BODY_SIZE: {e}"))?;

        let trusted_proxies: Vec<IpNet> = env_or("JOBBOARD_TRUSTED_PROXIES", "")
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                s.trim()
                    .parse()
                    .map_err(|e| format!("Invalid JOBBOARD_TRUSTED_PROXIES entry '{s}': {e}"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let worker_count: usize = env_or("JOBBOARD_WORKER_COUNT", "2")
            .parse()
            .map_err(|e| format!("Invalid JOBBOARD_WORKER_COUNT: {e}"))?;

        let log_level = env_or("JOBBOARD_LOG_LEVEL", "info");

        let smtp = match (
            std::env::var("JOBBOARD_SMTP_HOST").ok(),
            std::env::var("JOBBOARD_SMTP_PORT").ok(),
            std::env::var("JOBBOARD_SMTP_USER").ok(),
            std::env::var("JOBBOARD_SMTP_PASS").ok(),
            std::env::var("JOBBOARD_SMTP_FROM").ok(),
        ) {
            (Some(host), Some(port), Some(user), Some(pass), Some(from)) => Some(SmtpConfig {
                host,
                port: port
                    .parse()
                    .map_err(|e| format!("Invalid JOBBOARD_SMTP_PORT: {e}"))?,
                user,
                pass,
                from,
            }),
            _ => None,
        };

        let recovery = RecoveryConfig {
            token_ttl: Duration::minutes(parse_positive(
                "JOBBOARD_RESET_TOKEN_TTL_MINUTES",
                &env_or("JOBBOARD_RESET_TOKEN_TTL_MINUTES", "5"),
            )?),
            account_kind: env_or("JOBBOARD_RESET_ACCOUNT_KIND", "candidate")
                .parse()
                .map_err(|e| format!("Invalid JOBBOARD_RESET_ACCOUNT_KIND: {e}"))?,
            retention_grace: Duration::hours(parse_positive(
                "JOBBOARD_RESET_RETENTION_GRACE_HOURS",
                &env_or("JOBBOARD_RESET_RETENTION_GRACE_HOURS", "24"),
            )?),
        };

        Ok(Config {
            database_url,
            host,
            port,
            base_url,
            max_body_size,
            trusted_proxies,
            worker_count: worker_count.max(1),
            log_level,
            smtp,
            recovery,
        })
    }
}

fn parse_positive(key: &str, raw: &str) -> Result<i64, String> {
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|e| format!("Invalid {key}: {e}"))?;
    if value <= 0 {
        return Err(format!("Invalid {key}: must be greater than zero"));
    }
    Ok(value)
}

fn env_required(key: &str) -> Result<String, String> {
    std::env::var(key).map_err(|_| format!("Missing required environment variable: {key}"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_values_parse() {
        assert_eq!(parse_positive("K", " 15 ").unwrap(), 15);
    }

    #[test]
    fn zero_and_negative_values_are_rejected() {
        assert!(parse_positive("K", "0").is_err());
        assert!(parse_positive("K", "-3").is_err());
        assert!(parse_positive("K", "soon").is_err());
    }
}
