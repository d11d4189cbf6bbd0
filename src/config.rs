use std::env;

/// Per-tier request budgets for public endpoints, in requests per minute.
#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    pub strict_rpm: u32,
    pub standard_rpm: u32,
    pub relaxed_rpm: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            strict_rpm: 10,
            standard_rpm: 30,
            relaxed_rpm: 60,
        }
    }
}

impl RateLimits {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            strict_rpm: env_u32("RATE_LIMIT_STRICT_RPM", defaults.strict_rpm),
            standard_rpm: env_u32("RATE_LIMIT_STANDARD_RPM", defaults.standard_rpm),
            relaxed_rpm: env_u32("RATE_LIMIT_RELAXED_RPM", defaults.relaxed_rpm),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub mp_webhook_secret: Option<String>,
    pub mp_access_token: Option<String>,
    pub mp_api_base: String,
    pub montink_api_base: String,
    pub montink_api_key: Option<String>,
    pub resend_api_key: Option<String>,
    pub email_from: String,
    pub admin_token: Option<String>,
    pub rate_limit: RateLimits,
    pub sse_heartbeat_secs: u32,
    pub dev_mode: bool,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("BRAVOS_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "bravos.db".to_string()),
            mp_webhook_secret: non_empty(env::var("MP_WEBHOOK_SECRET").ok()),
            mp_access_token: non_empty(env::var("MP_ACCESS_TOKEN").ok()),
            mp_api_base: env::var("MP_API_BASE")
                .unwrap_or_else(|_| "https://api.mercadopago.com".to_string()),
            montink_api_base: env::var("MONTINK_API_BASE")
                .unwrap_or_else(|_| "https://api.montink.com".to_string()),
            montink_api_key: non_empty(env::var("MONTINK_API_KEY").ok()),
            resend_api_key: non_empty(env::var("RESEND_API_KEY").ok()),
            email_from: env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Bravos <onboarding@resend.dev>".to_string()),
            admin_token: non_empty(env::var("ADMIN_TOKEN").ok()),
            rate_limit: RateLimits::from_env(),
            sse_heartbeat_secs: env_u32("SSE_HEARTBEAT_SECS", 30),
            dev_mode,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Treat unset and blank environment variables the same way.
fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_values_are_treated_as_unset() {
        assert_eq!(non_empty(Some("".to_string())), None);
        assert_eq!(non_empty(Some("   ".to_string())), None);
        assert_eq!(non_empty(None), None);
        assert_eq!(non_empty(Some(" tok ".to_string())), Some("tok".to_string()));
    }
}
