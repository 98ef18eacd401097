//! API server configuration.

use thiserror::Error;
use tollgate_core::auth::users::SignupPolicy;
use tollgate_core::external::{ExternalConfig, ProviderConfig};
use tollgate_core::keys::KeyConfig;

/// Configuration errors. Each names the offending variable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{var} is invalid: {message}")]
    Invalid { var: &'static str, message: String },

    #[error(transparent)]
    Keys(#[from] tollgate_core::keys::KeyError),

    #[error(transparent)]
    Redirect(#[from] tollgate_core::redirect::RedirectError),

    #[error(transparent)]
    Provider(#[from] tollgate_core::external::ProviderError),
}

/// Access-token settings.
#[derive(Clone, Debug)]
pub struct JwtConfig {
    pub keys: KeyConfig,
    /// Access-token lifetime in seconds.
    pub expires_after: i64,
}

/// Sign-up and sign-in rules.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    pub signup: SignupPolicy,
    pub disable_email_auth: bool,
    pub disable_username_auth: bool,
    pub disable_phone_auth: bool,
    pub auto_link_same_email: bool,
}

/// Session cookie settings.
#[derive(Clone, Debug)]
pub struct CookieConfig {
    /// Name prefix: cookies are `<key>-access-token` and `<key>-refresh-token`.
    pub key: String,
    pub domain: Option<String>,
    /// Max-age of persistent cookies in seconds.
    pub duration: i64,
}

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "0.0.0.0:3000").
    pub bind_addr: String,
    /// PostgreSQL connection URL.
    pub database_url: Option<String>,
    /// Canonical public URL; the fallback redirect target.
    pub service_url: String,
    /// Extra redirect targets, as globs.
    pub uri_allow_list: Vec<String>,
    pub jwt: JwtConfig,
    pub auth: AuthConfig,
    pub cookie: CookieConfig,
    pub external: ExternalConfig,
    /// Upper bound on graceful shutdown, in seconds.
    pub shutdown_timeout_secs: u64,
}

/// Typed access to a variable source.
struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn string(&self, var: &'static str) -> Option<String> {
        (self.lookup)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, var: &'static str) -> Result<String, ConfigError> {
        self.string(var).ok_or(ConfigError::Missing(var))
    }

    fn flag(&self, var: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.string(var).map(|v| v.to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) => match v.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Invalid {
                    var,
                    message: format!("expected a boolean, got {v:?}"),
                }),
            },
        }
    }

    fn number<T: std::str::FromStr>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T::Err: std::fmt::Display,
    {
        match self.string(var) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                message: e.to_string(),
            }),
        }
    }

    fn list(&self, var: &'static str) -> Vec<String> {
        self.string(var)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl ApiConfig {
    /// Reads configuration from `TOLLGATE_*` environment variables.
    ///
    /// | Variable                                   | Default            |
    /// |--------------------------------------------|--------------------|
    /// | `TOLLGATE_BIND_ADDR`                       | `0.0.0.0:3000`     |
    /// | `TOLLGATE_DATABASE_URL` / `DATABASE_URL`   | none               |
    /// | `TOLLGATE_SERVICE_URL`                     | required           |
    /// | `TOLLGATE_URI_ALLOW_LIST`                  | empty              |
    /// | `TOLLGATE_JWT_SECRET`                      | required           |
    /// | `TOLLGATE_JWT_KEYS`                        | derived from secret|
    /// | `TOLLGATE_JWT_KEY_ID`                      | none               |
    /// | `TOLLGATE_JWT_EXPIRES_AFTER`               | `3600`             |
    /// | `TOLLGATE_JWT_LEGACY_ALGORITHM_FALLBACK`   | `true`             |
    /// | `TOLLGATE_AUTH_*`                          | `false`            |
    /// | `TOLLGATE_COOKIE_KEY` / `_DOMAIN` / `_DURATION` | `tollgate`, none, `86400` |
    /// | `TOLLGATE_EXTERNAL_GOOGLE_*`               | disabled           |
    /// | `TOLLGATE_SHUTDOWN_TIMEOUT`                | `60`               |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`ApiConfig::from_env`] over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars { lookup };

        let expires_after: i64 = vars.number("TOLLGATE_JWT_EXPIRES_AFTER", 3600)?;
        if expires_after <= 0 {
            return Err(ConfigError::Invalid {
                var: "TOLLGATE_JWT_EXPIRES_AFTER",
                message: "must be positive".into(),
            });
        }

        Ok(Self {
            bind_addr: vars
                .string("TOLLGATE_BIND_ADDR")
                .unwrap_or_else(|| "0.0.0.0:3000".into()),
            database_url: vars
                .string("TOLLGATE_DATABASE_URL")
                .or_else(|| vars.string("DATABASE_URL")),
            service_url: vars.required("TOLLGATE_SERVICE_URL")?,
            uri_allow_list: vars.list("TOLLGATE_URI_ALLOW_LIST"),
            jwt: JwtConfig {
                keys: KeyConfig {
                    secret: vars.required("TOLLGATE_JWT_SECRET")?,
                    keys: vars.string("TOLLGATE_JWT_KEYS"),
                    key_id: vars.string("TOLLGATE_JWT_KEY_ID"),
                    legacy_algorithm_fallback: vars
                        .flag("TOLLGATE_JWT_LEGACY_ALGORITHM_FALLBACK", true)?,
                },
                expires_after,
            },
            auth: AuthConfig {
                signup: SignupPolicy {
                    require_email: vars.flag("TOLLGATE_AUTH_CREDENTIALS_REQUIRE_EMAIL", false)?,
                    require_username: vars
                        .flag("TOLLGATE_AUTH_CREDENTIALS_REQUIRE_USERNAME", false)?,
                    require_phone: vars.flag("TOLLGATE_AUTH_CREDENTIALS_REQUIRE_PHONE", false)?,
                },
                disable_email_auth: vars.flag("TOLLGATE_AUTH_DISABLE_EMAIL_AUTH", false)?,
                disable_username_auth: vars.flag("TOLLGATE_AUTH_DISABLE_USERNAME_AUTH", false)?,
                disable_phone_auth: vars.flag("TOLLGATE_AUTH_DISABLE_PHONE_AUTH", false)?,
                auto_link_same_email: vars.flag("TOLLGATE_AUTH_AUTO_LINK_SAME_EMAIL", false)?,
            },
            cookie: CookieConfig {
                key: vars
                    .string("TOLLGATE_COOKIE_KEY")
                    .unwrap_or_else(|| "tollgate".into()),
                domain: vars.string("TOLLGATE_COOKIE_DOMAIN"),
                duration: vars.number("TOLLGATE_COOKIE_DURATION", 86_400)?,
            },
            external: ExternalConfig {
                google: ProviderConfig {
                    client_id: vars.list("TOLLGATE_EXTERNAL_GOOGLE_CLIENT_ID"),
                    client_secret: vars
                        .string("TOLLGATE_EXTERNAL_GOOGLE_CLIENT_SECRET")
                        .unwrap_or_default(),
                    redirect_uri: vars
                        .string("TOLLGATE_EXTERNAL_GOOGLE_REDIRECT_URI")
                        .unwrap_or_default(),
                    url: vars.string("TOLLGATE_EXTERNAL_GOOGLE_URL"),
                    api_url: vars.string("TOLLGATE_EXTERNAL_GOOGLE_API_URL"),
                    enabled: vars.flag("TOLLGATE_EXTERNAL_GOOGLE_ENABLED", false)?,
                },
            },
            shutdown_timeout_secs: vars.number("TOLLGATE_SHUTDOWN_TIMEOUT", 60)?,
        })
    }
}
