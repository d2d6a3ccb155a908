use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use toml::Value;
use verifly_core::config::{AppConfig, LoadOptions};

struct Field<'a> {
    key_path: &'a str,
    value: String,
    env_keys: &'a [&'a str],
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let fields = [
        Field {
            key_path: "otp.resend_window_secs",
            value: config.otp.resend_window_secs.to_string(),
            env_keys: &["VERIFLY_OTP_RESEND_WINDOW_SECS"],
        },
        Field {
            key_path: "otp.min_phone_digits",
            value: config.otp.min_phone_digits.to_string(),
            env_keys: &["VERIFLY_OTP_MIN_PHONE_DIGITS"],
        },
        Field {
            key_path: "otp.max_verify_attempts",
            value: config
                .otp
                .max_verify_attempts
                .map(|attempts| attempts.to_string())
                .unwrap_or_else(|| "<unlimited>".to_string()),
            env_keys: &["VERIFLY_OTP_MAX_VERIFY_ATTEMPTS"],
        },
        Field {
            key_path: "otp.countdown_tick_millis",
            value: config.otp.countdown_tick_millis.to_string(),
            env_keys: &[],
        },
        Field {
            key_path: "documents.default_max_file_size_bytes",
            value: config.documents.default_max_file_size_bytes.to_string(),
            env_keys: &["VERIFLY_DOCUMENTS_MAX_FILE_SIZE_BYTES"],
        },
        Field {
            key_path: "documents.default_allowed_extensions",
            value: config.documents.default_allowed_extensions.join(","),
            env_keys: &[],
        },
        Field {
            key_path: "eligibility.capacity_ratio",
            value: config.eligibility.capacity_ratio.to_string(),
            env_keys: &["VERIFLY_ELIGIBILITY_CAPACITY_RATIO"],
        },
        Field {
            key_path: "logging.level",
            value: config.logging.level.clone(),
            env_keys: &["VERIFLY_LOGGING_LEVEL", "VERIFLY_LOG_LEVEL"],
        },
        Field {
            key_path: "logging.format",
            value: format!("{:?}", config.logging.format),
            env_keys: &["VERIFLY_LOGGING_FORMAT", "VERIFLY_LOG_FORMAT"],
        },
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(fields.iter().map(|field| {
        render_line(
            field.key_path,
            &field.value,
            field_source(
                field.key_path,
                field.env_keys,
                config_file_doc.as_ref(),
                config_file_path.as_deref(),
            ),
        )
    }));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("verifly.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/verifly.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

#[cfg(test)]
mod tests {
    use super::{contains_path, render_line};

    #[test]
    fn dotted_paths_resolve_nested_tables() {
        let doc: toml::Value = "[otp]\nresend_window_secs = 30\n".parse().expect("toml");

        assert!(contains_path(&doc, "otp.resend_window_secs"));
        assert!(!contains_path(&doc, "otp.min_phone_digits"));
        assert!(!contains_path(&doc, "logging.level"));
    }

    #[test]
    fn lines_name_their_source() {
        assert_eq!(
            render_line("logging.level", "debug", "default".to_string()),
            "- logging.level = debug (source: default)"
        );
    }
}
