use std::path::Path;

use secrecy::{ExposeSecret, Secret};

pub const DEFAULT_PORT: u16 = 3000;

#[derive(serde::Deserialize, Debug)]
pub struct ApplicationSettings {
    pub port: u16,
    pub host: String,
}

/// Connection parameters for the XAPI pool master.
#[derive(serde::Deserialize, Debug)]
pub struct HypervisorSettings {
    pub host: String,
    pub username: String,
    pub password: Secret<String>,
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Sessions kept open between requests. 0 logs in and out around every operation.
    #[serde(default)]
    pub max_idle_sessions: usize,
    /// Idle sessions older than this are logged out instead of reused.
    #[serde(default = "default_idle_session_ttl")]
    pub idle_session_ttl_seconds: u64,
}

fn default_verify_tls() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    60
}

fn default_idle_session_ttl() -> u64 {
    300
}

impl HypervisorSettings {
    /// First required connection field that is absent or blank.
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.host.trim().is_empty() {
            Some("host")
        } else if self.username.trim().is_empty() {
            Some("username")
        } else if self.password.expose_secret().is_empty() {
            Some("password")
        } else {
            None
        }
    }
}

#[derive(serde::Deserialize, Debug)]
pub struct AuthSettings {
    /// Password of the `admin` basic-auth user. Empty rejects every credential.
    pub admin_password: Secret<String>,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window_seconds: u64,
}

#[derive(serde::Deserialize, Debug)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub hypervisor: HypervisorSettings,
    pub auth: AuthSettings,
    pub rate_limit: RateLimitSettings,
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    // Get our base path which is one level up from the crate directory
    let base_path = Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/.."));
    let configuration_directory = base_path.join("configuration");
    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;
    let environment_filename = format!("{}.yaml", environment.as_str());
    let settings = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(configuration_directory.join(environment_filename)).required(false),
        )
        .set_override_option("hypervisor.host", non_empty_var("XAPI_HOST"))?
        .set_override_option("hypervisor.username", non_empty_var("XAPI_USERNAME"))?
        .set_override_option("hypervisor.password", non_empty_var("XAPI_PASSWORD"))?
        .set_override_option("auth.admin_password", non_empty_var("ADMIN_PASSWORD"))?
        .build()?;
    let mut settings = settings.try_deserialize::<Settings>()?;

    if let Ok(raw) = std::env::var("PORT") {
        settings.application.port = resolve_port(&raw);
    }

    Ok(settings)
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

/// Parses a `PORT` value, falling back to [`DEFAULT_PORT`] with a warning when it
/// is not an integer in 1..=65535.
pub fn resolve_port(raw: &str) -> u16 {
    match raw.trim().parse::<u16>() {
        Ok(port) if port > 0 => port,
        _ => {
            tracing::warn!(
                port = %raw,
                "Invalid PORT. Using default port {}.",
                DEFAULT_PORT
            );
            DEFAULT_PORT
        }
    }
}

pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}
