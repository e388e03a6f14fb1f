use config::ConfigError;

#[derive(serde::Deserialize, Clone, Debug)]
pub struct Settings {
    pub database: DatabaseSettings,
    #[serde(default)]
    pub refresh_token: RefreshTokenSettings,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }

    pub fn connection_string_without_db(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port
        )
    }
}

fn default_max_connections() -> u32 {
    5
}

/// Refresh token lifecycle settings
#[derive(serde::Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct RefreshTokenSettings {
    pub ttl_seconds: i64,             // seconds (e.g., 2592000 for 30 days)
    pub user_identity_field: String,  // dotted path into the principal
    pub token_parameter_name: String,
    pub token_expiration_parameter_name: String,
    pub return_expiration: bool,
    pub single_use: bool,
}

impl Default for RefreshTokenSettings {
    fn default() -> Self {
        Self {
            ttl_seconds: 2_592_000,
            user_identity_field: "username".to_string(),
            token_parameter_name: "refresh_token".to_string(),
            token_expiration_parameter_name: "refresh_token_expiration".to_string(),
            return_expiration: false,
            single_use: false,
        }
    }
}

impl RefreshTokenSettings {
    /// Rejects settings the lifecycle cannot work with.
    pub fn validate(&self) -> Result<(), crate::error::ConfigError> {
        use crate::error::ConfigError as AppConfigError;

        if self.ttl_seconds <= 0 {
            return Err(AppConfigError::InvalidValue(format!(
                "refresh_token.ttl_seconds must be positive, got {}",
                self.ttl_seconds
            )));
        }
        if chrono::Duration::try_seconds(self.ttl_seconds).is_none() {
            return Err(AppConfigError::InvalidValue(format!(
                "refresh_token.ttl_seconds {} is out of range",
                self.ttl_seconds
            )));
        }
        if self.token_parameter_name.trim().is_empty() {
            return Err(AppConfigError::MissingRequired(
                "refresh_token.token_parameter_name".to_string(),
            ));
        }
        if self.return_expiration && self.token_expiration_parameter_name.trim().is_empty() {
            return Err(AppConfigError::MissingRequired(
                "refresh_token.token_expiration_parameter_name".to_string(),
            ));
        }
        if self.user_identity_field.trim().is_empty() {
            return Err(AppConfigError::MissingRequired(
                "refresh_token.user_identity_field".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loads `configuration.{yaml,toml,json}` (optional) overlaid with `APP__*`
/// environment variables, e.g. `APP__REFRESH_TOKEN__SINGLE_USE=true`.
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;
    settings.try_deserialize::<Settings>()
}
