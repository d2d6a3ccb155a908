use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::eligibility::DEFAULT_CAPACITY_RATIO;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub otp: OtpConfig,
    pub documents: DocumentsConfig,
    pub eligibility: EligibilityConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct OtpConfig {
    pub resend_window_secs: u64,
    pub min_phone_digits: usize,
    /// Unset keeps verification open for as many attempts as the user makes.
    pub max_verify_attempts: Option<u32>,
    pub countdown_tick_millis: u64,
}

#[derive(Clone, Debug)]
pub struct DocumentsConfig {
    pub default_max_file_size_bytes: u64,
    pub default_allowed_extensions: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct EligibilityConfig {
    pub capacity_ratio: Decimal,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub resend_window_secs: Option<u64>,
    pub min_phone_digits: Option<usize>,
    pub max_verify_attempts: Option<u32>,
    pub capacity_ratio: Option<Decimal>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            otp: OtpConfig {
                resend_window_secs: 60,
                min_phone_digits: 10,
                max_verify_attempts: None,
                countdown_tick_millis: 1_000,
            },
            documents: DocumentsConfig {
                default_max_file_size_bytes: 10 * 1024 * 1024,
                default_allowed_extensions: ["pdf", "jpg", "jpeg", "png"]
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            },
            eligibility: EligibilityConfig { capacity_ratio: DEFAULT_CAPACITY_RATIO },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("verifly.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.normalize();
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(otp) = patch.otp {
            if let Some(resend_window_secs) = otp.resend_window_secs {
                self.otp.resend_window_secs = resend_window_secs;
            }
            if let Some(min_phone_digits) = otp.min_phone_digits {
                self.otp.min_phone_digits = min_phone_digits;
            }
            if let Some(max_verify_attempts) = otp.max_verify_attempts {
                self.otp.max_verify_attempts = Some(max_verify_attempts);
            }
            if let Some(countdown_tick_millis) = otp.countdown_tick_millis {
                self.otp.countdown_tick_millis = countdown_tick_millis;
            }
        }

        if let Some(documents) = patch.documents {
            if let Some(max_size) = documents.default_max_file_size_bytes {
                self.documents.default_max_file_size_bytes = max_size;
            }
            if let Some(extensions) = documents.default_allowed_extensions {
                self.documents.default_allowed_extensions = extensions;
            }
        }

        if let Some(eligibility) = patch.eligibility {
            if let Some(capacity_ratio) = eligibility.capacity_ratio {
                self.eligibility.capacity_ratio = capacity_ratio;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("VERIFLY_OTP_RESEND_WINDOW_SECS") {
            self.otp.resend_window_secs = parse_env("VERIFLY_OTP_RESEND_WINDOW_SECS", &value)?;
        }
        if let Some(value) = read_env("VERIFLY_OTP_MIN_PHONE_DIGITS") {
            self.otp.min_phone_digits = parse_env("VERIFLY_OTP_MIN_PHONE_DIGITS", &value)?;
        }
        if let Some(value) = read_env("VERIFLY_OTP_MAX_VERIFY_ATTEMPTS") {
            self.otp.max_verify_attempts =
                Some(parse_env("VERIFLY_OTP_MAX_VERIFY_ATTEMPTS", &value)?);
        }

        if let Some(value) = read_env("VERIFLY_DOCUMENTS_MAX_FILE_SIZE_BYTES") {
            self.documents.default_max_file_size_bytes =
                parse_env("VERIFLY_DOCUMENTS_MAX_FILE_SIZE_BYTES", &value)?;
        }

        if let Some(value) = read_env("VERIFLY_ELIGIBILITY_CAPACITY_RATIO") {
            self.eligibility.capacity_ratio =
                parse_env("VERIFLY_ELIGIBILITY_CAPACITY_RATIO", &value)?;
        }

        let log_level =
            read_env("VERIFLY_LOGGING_LEVEL").or_else(|| read_env("VERIFLY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("VERIFLY_LOGGING_FORMAT").or_else(|| read_env("VERIFLY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(resend_window_secs) = overrides.resend_window_secs {
            self.otp.resend_window_secs = resend_window_secs;
        }
        if let Some(min_phone_digits) = overrides.min_phone_digits {
            self.otp.min_phone_digits = min_phone_digits;
        }
        if let Some(max_verify_attempts) = overrides.max_verify_attempts {
            self.otp.max_verify_attempts = Some(max_verify_attempts);
        }
        if let Some(capacity_ratio) = overrides.capacity_ratio {
            self.eligibility.capacity_ratio = capacity_ratio;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
    }

    fn normalize(&mut self) {
        for extension in &mut self.documents.default_allowed_extensions {
            *extension = extension.trim().trim_start_matches('.').to_ascii_lowercase();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_otp(&self.otp)?;
        validate_documents(&self.documents)?;
        validate_eligibility(&self.eligibility)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("verifly.toml"), PathBuf::from("config/verifly.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_otp(otp: &OtpConfig) -> Result<(), ConfigError> {
    if otp.resend_window_secs == 0 || otp.resend_window_secs > 3_600 {
        return Err(ConfigError::Validation(
            "otp.resend_window_secs must be in range 1..=3600".to_string(),
        ));
    }

    if otp.min_phone_digits == 0 || otp.min_phone_digits > 15 {
        return Err(ConfigError::Validation(
            "otp.min_phone_digits must be in range 1..=15 (E.164 numbers carry at most 15 digits)"
                .to_string(),
        ));
    }

    if otp.max_verify_attempts == Some(0) {
        return Err(ConfigError::Validation(
            "otp.max_verify_attempts must be greater than zero when set".to_string(),
        ));
    }

    if otp.countdown_tick_millis == 0 || otp.countdown_tick_millis > 60_000 {
        return Err(ConfigError::Validation(
            "otp.countdown_tick_millis must be in range 1..=60000".to_string(),
        ));
    }

    Ok(())
}

fn validate_documents(documents: &DocumentsConfig) -> Result<(), ConfigError> {
    if documents.default_max_file_size_bytes == 0 {
        return Err(ConfigError::Validation(
            "documents.default_max_file_size_bytes must be greater than zero".to_string(),
        ));
    }

    if documents.default_allowed_extensions.is_empty() {
        return Err(ConfigError::Validation(
            "documents.default_allowed_extensions must list at least one extension".to_string(),
        ));
    }

    if documents.default_allowed_extensions.iter().any(|extension| extension.is_empty()) {
        return Err(ConfigError::Validation(
            "documents.default_allowed_extensions must not contain empty entries".to_string(),
        ));
    }

    Ok(())
}

fn validate_eligibility(eligibility: &EligibilityConfig) -> Result<(), ConfigError> {
    let ratio = eligibility.capacity_ratio;
    if ratio <= Decimal::ZERO || ratio > Decimal::ONE {
        return Err(ConfigError::Validation(format!(
            "eligibility.capacity_ratio must be in range (0, 1], got {ratio}"
        )));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    otp: Option<OtpPatch>,
    documents: Option<DocumentsPatch>,
    eligibility: Option<EligibilityPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct OtpPatch {
    resend_window_secs: Option<u64>,
    min_phone_digits: Option<usize>,
    max_verify_attempts: Option<u32>,
    countdown_tick_millis: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct DocumentsPatch {
    default_max_file_size_bytes: Option<u64>,
    default_allowed_extensions: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct EligibilityPatch {
    capacity_ratio: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use rust_decimal::Decimal;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_match_documented_values() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.otp.resend_window_secs == 60, "resend window defaults to 60s")?;
        ensure(config.otp.min_phone_digits == 10, "phone numbers need 10 digits by default")?;
        ensure(config.otp.max_verify_attempts.is_none(), "no lockout by default")?;
        ensure(
            config.eligibility.capacity_ratio == Decimal::new(33, 2),
            "capacity ratio defaults to 0.33",
        )?;
        ensure(matches!(config.logging.format, LogFormat::Compact), "compact logging by default")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_VERIFLY_WINDOW", "90");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("verifly.toml");
            fs::write(
                &path,
                r#"
[otp]
resend_window_secs = ${TEST_VERIFLY_WINDOW}

[documents]
default_allowed_extensions = [".PDF", "heic"]
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.otp.resend_window_secs == 90, "window should be interpolated from env")?;
            ensure(
                config.documents.default_allowed_extensions == vec!["pdf", "heic"],
                "extensions are normalised to bare lowercase suffixes",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_VERIFLY_WINDOW"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("VERIFLY_OTP_RESEND_WINDOW_SECS", "45");
        env::set_var("VERIFLY_LOG_LEVEL", "warn");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("verifly.toml");
            fs::write(
                &path,
                r#"
[otp]
resend_window_secs = 120
min_phone_digits = 11

[eligibility]
capacity_ratio = "0.30"

[logging]
level = "debug"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    capacity_ratio: Some(Decimal::new(25, 2)),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.otp.resend_window_secs == 45, "env window should win over file")?;
            ensure(config.otp.min_phone_digits == 11, "file value should win over default")?;
            ensure(config.logging.level == "warn", "env alias should win over file")?;
            ensure(
                config.eligibility.capacity_ratio == Decimal::new(25, 2),
                "explicit override should win over file",
            )?;
            Ok(())
        })();

        clear_vars(&["VERIFLY_OTP_RESEND_WINDOW_SECS", "VERIFLY_LOG_LEVEL"]);
        result
    }

    #[test]
    fn invalid_env_override_is_reported_with_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("VERIFLY_OTP_MIN_PHONE_DIGITS", "ten");

        let result = match AppConfig::load(LoadOptions::default()) {
            Ok(_) => Err("expected env override failure".to_string()),
            Err(ConfigError::InvalidEnvOverride { key, .. }) => {
                ensure(key == "VERIFLY_OTP_MIN_PHONE_DIGITS", "error should name the variable")
            }
            Err(other) => Err(format!("unexpected error: {other}")),
        };

        clear_vars(&["VERIFLY_OTP_MIN_PHONE_DIGITS"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let error = match AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                capacity_ratio: Some(Decimal::new(15, 1)),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("expected validation failure but config load succeeded".into()),
            Err(error) => error,
        };

        let has_message = matches!(
            error,
            ConfigError::Validation(ref message) if message.contains("eligibility.capacity_ratio")
        );
        ensure(has_message, "validation failure should mention eligibility.capacity_ratio")
    }

    #[test]
    fn zero_attempt_lockout_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let result = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                max_verify_attempts: Some(0),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        });

        ensure(
            matches!(
                result,
                Err(ConfigError::Validation(ref message)) if message.contains("max_verify_attempts")
            ),
            "zero attempts should be rejected",
        )
    }

    #[test]
    fn missing_required_file_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let result = AppConfig::load(LoadOptions {
            config_path: Some(dir.path().join("absent.toml")),
            require_file: true,
            ..LoadOptions::default()
        });

        ensure(matches!(result, Err(ConfigError::MissingConfigFile(_))), "missing file reported")
    }
}
