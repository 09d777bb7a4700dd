use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::completion::{RetryPolicy, TransientClassifier};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Eliza, a friendly AI support agent. \
     Keep responses short, polite, and solution-focused.";
pub const DEFAULT_DATA_FILE: &str = "data/chats.json";
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_WAIT_SECS: f64 = 3.0;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_SESSION_IDLE_SECS: u64 = 3600;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{key} must be {expected}, got {value:?}")]
    Invalid {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RetrySettings {
    pub max_retries: Option<u32>,
    pub wait_secs: Option<f64>,
}

/// Defaults read from the process environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GlobalConfigDefaults {
    pub default_model: Option<String>,
    pub system_prompt: Option<String>,
    pub retry: Option<RetrySettings>,
}

/// Values given on the command line; they beat the environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CliOverrides {
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub retry: Option<RetrySettings>,
}

/// Per live session settings, editable from the chat UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SessionSettings {
    pub system_prompt: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SessionSettingsPatch {
    pub system_prompt: Option<String>,
    pub model: Option<String>,
}

impl SessionSettings {
    pub fn apply_patch(&mut self, patch: SessionSettingsPatch) {
        if let Some(p) = patch.system_prompt {
            self.system_prompt = Some(p);
        }
        if let Some(m) = patch.model {
            self.model = Some(m);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveSettings {
    pub model: String,
    /// `None` means no system message is sent.
    pub system_prompt: Option<String>,
    pub retry: RetryPolicy,
}

pub fn resolve_effective_settings(
    global: &GlobalConfigDefaults,
    cli: &CliOverrides,
    session: &SessionSettings,
) -> EffectiveSettings {
    let model = session
        .model
        .clone()
        .or_else(|| cli.model.clone())
        .or_else(|| global.default_model.clone())
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());

    let system_prompt = session
        .system_prompt
        .clone()
        .or_else(|| cli.system_prompt.clone())
        .or_else(|| global.system_prompt.clone())
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
    let system_prompt = Some(system_prompt.trim().to_string()).filter(|s| !s.is_empty());

    let max_retries = cli
        .retry
        .as_ref()
        .and_then(|r| r.max_retries)
        .or_else(|| global.retry.as_ref().and_then(|r| r.max_retries))
        .unwrap_or(DEFAULT_MAX_RETRIES);
    let wait_secs = cli
        .retry
        .as_ref()
        .and_then(|r| r.wait_secs)
        .or_else(|| global.retry.as_ref().and_then(|r| r.wait_secs))
        .unwrap_or(DEFAULT_RETRY_WAIT_SECS);

    let wait = retry_wait(wait_secs).unwrap_or_else(|| {
        warn!(wait_secs, "retry wait out of range, using the default");
        Duration::from_secs_f64(DEFAULT_RETRY_WAIT_SECS)
    });

    EffectiveSettings {
        model,
        system_prompt,
        retry: RetryPolicy::new(max_retries, wait),
    }
}

/// A retry wait in seconds as a `Duration`; `None` for negative, non-finite
/// or overflowing values.
pub fn retry_wait(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

/// The process-level layers a live session resolves against.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SettingsLayers {
    pub global: GlobalConfigDefaults,
    pub cli: CliOverrides,
}

impl SettingsLayers {
    pub fn resolve(&self, session: &SessionSettings) -> EffectiveSettings {
        resolve_effective_settings(&self.global, &self.cli, session)
    }
}

/// Process-wide configuration: credentials, endpoint, storage and retry classification.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: Option<String>,
    pub base_url: url::Url,
    pub request_timeout: Duration,
    /// Live server sessions untouched for this long are dropped.
    pub session_idle_timeout: Duration,
    pub data_file: PathBuf,
    pub classifier: TransientClassifier,
    pub defaults: GlobalConfigDefaults,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("GOOGLE_API_KEY").filter(|k| !k.trim().is_empty());

        let raw_base =
            lookup("ELIZA_GEMINI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.into());
        let base_url = url::Url::parse(&raw_base).map_err(|_| ConfigError::Invalid {
            key: "ELIZA_GEMINI_BASE_URL",
            expected: "an absolute URL",
            value: raw_base.clone(),
        })?;

        let request_timeout = Duration::from_secs(parse_env(
            &lookup,
            "ELIZA_REQUEST_TIMEOUT_SECS",
            "a whole number of seconds",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?);
        let session_idle_timeout = Duration::from_secs(parse_env(
            &lookup,
            "ELIZA_SESSION_IDLE_SECS",
            "a whole number of seconds",
            DEFAULT_SESSION_IDLE_SECS,
        )?);

        let data_file = lookup("ELIZA_DATA_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_FILE));

        let mut classifier = TransientClassifier::default();
        if let Some(raw) = lookup("ELIZA_TRANSIENT_STATUSES") {
            classifier.statuses = split_list(&raw)
                .map(|s| {
                    s.parse::<u16>().map_err(|_| ConfigError::Invalid {
                        key: "ELIZA_TRANSIENT_STATUSES",
                        expected: "a comma separated list of HTTP status codes",
                        value: raw.clone(),
                    })
                })
                .collect::<Result<_, _>>()?;
        }
        if let Some(raw) = lookup("ELIZA_TRANSIENT_MARKERS") {
            classifier.markers = split_list(&raw).map(str::to_string).collect();
        }

        let max_retries =
            parse_opt_env(&lookup, "ELIZA_MAX_RETRIES", "a non-negative integer")?;
        let wait_secs =
            parse_opt_env::<f64, _>(&lookup, "ELIZA_RETRY_WAIT_SECS", "a number of seconds")?;
        if let Some(w) = wait_secs.filter(|w| retry_wait(*w).is_none()) {
            return Err(ConfigError::Invalid {
                key: "ELIZA_RETRY_WAIT_SECS",
                expected: "a non-negative number of seconds",
                value: w.to_string(),
            });
        }
        let retry = (max_retries.is_some() || wait_secs.is_some()).then_some(RetrySettings {
            max_retries,
            wait_secs,
        });

        let defaults = GlobalConfigDefaults {
            default_model: lookup("ELIZA_MODEL").filter(|m| !m.trim().is_empty()),
            system_prompt: lookup("ELIZA_SYSTEM_PROMPT"),
            retry,
        };

        Ok(Self {
            api_key,
            base_url,
            request_timeout,
            session_idle_timeout,
            data_file,
            classifier,
            defaults,
        })
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_opt_env<T, F>(
    lookup: &F,
    key: &'static str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                key,
                expected,
                value: raw,
            }),
    }
}

fn parse_env<T, F>(
    lookup: &F,
    key: &'static str,
    expected: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_opt_env(lookup, key, expected)?.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn precedence_session_over_cli_over_global() {
        let global = GlobalConfigDefaults {
            default_model: Some("global-model".into()),
            system_prompt: Some("global prompt".into()),
            retry: Some(RetrySettings {
                max_retries: Some(5),
                wait_secs: Some(1.0),
            }),
        };
        let cli = CliOverrides {
            model: Some("cli-model".into()),
            system_prompt: None,
            retry: Some(RetrySettings {
                max_retries: None,
                wait_secs: Some(0.5),
            }),
        };
        let session = SessionSettings {
            system_prompt: Some("session prompt".into()),
            model: None,
        };

        let eff = resolve_effective_settings(&global, &cli, &session);

        assert_eq!(eff.model, "cli-model");
        assert_eq!(eff.system_prompt.as_deref(), Some("session prompt"));
        assert_eq!(eff.retry.max_attempts(), 5); // from global
        assert_eq!(eff.retry.wait, Duration::from_millis(500)); // from cli
    }

    #[test]
    fn builtin_defaults_apply_when_nothing_is_set() {
        let eff = resolve_effective_settings(
            &GlobalConfigDefaults::default(),
            &CliOverrides::default(),
            &SessionSettings::default(),
        );
        assert_eq!(eff.model, DEFAULT_MODEL);
        assert_eq!(eff.system_prompt.as_deref(), Some(DEFAULT_SYSTEM_PROMPT));
        assert_eq!(eff.retry.max_attempts(), 3);
        assert_eq!(eff.retry.wait, Duration::from_secs(3));
    }

    #[test]
    fn blank_system_prompt_disables_system_message() {
        let session = SessionSettings {
            system_prompt: Some("   ".into()),
            model: None,
        };
        let eff = resolve_effective_settings(
            &GlobalConfigDefaults::default(),
            &CliOverrides::default(),
            &session,
        );
        assert_eq!(eff.system_prompt, None);
    }

    #[test]
    fn patch_only_touches_given_fields() {
        let mut s = SessionSettings {
            system_prompt: Some("a".into()),
            model: Some("m".into()),
        };
        s.apply_patch(SessionSettingsPatch {
            system_prompt: Some("b".into()),
            model: None,
        });
        assert_eq!(s.system_prompt.as_deref(), Some("b"));
        assert_eq!(s.model.as_deref(), Some("m"));
    }

    #[test]
    fn env_config_reads_all_keys() {
        let cfg = AppConfig::from_lookup(lookup_from(&[
            ("GOOGLE_API_KEY", "k-123"),
            ("ELIZA_MODEL", "gemini-test"),
            ("ELIZA_MAX_RETRIES", "4"),
            ("ELIZA_RETRY_WAIT_SECS", "0.25"),
            ("ELIZA_TRANSIENT_STATUSES", "503, 429"),
            ("ELIZA_TRANSIENT_MARKERS", "UNAVAILABLE,RESOURCE_EXHAUSTED"),
            ("ELIZA_DATA_FILE", "/tmp/x.json"),
        ]))
        .unwrap();
        assert_eq!(cfg.api_key.as_deref(), Some("k-123"));
        assert_eq!(cfg.defaults.default_model.as_deref(), Some("gemini-test"));
        let retry = cfg.defaults.retry.unwrap();
        assert_eq!(retry.max_retries, Some(4));
        assert_eq!(retry.wait_secs, Some(0.25));
        assert_eq!(cfg.classifier.statuses, vec![503, 429]);
        assert_eq!(
            cfg.classifier.markers,
            vec!["UNAVAILABLE".to_string(), "RESOURCE_EXHAUSTED".to_string()]
        );
        assert_eq!(cfg.data_file, PathBuf::from("/tmp/x.json"));
        assert_eq!(cfg.base_url.as_str(), "https://generativelanguage.googleapis.com/v1beta");
    }

    #[test]
    fn missing_key_is_not_a_config_error() {
        let cfg = AppConfig::from_lookup(lookup_from(&[])).unwrap();
        assert!(cfg.api_key.is_none());
        assert_eq!(cfg.data_file, PathBuf::from(DEFAULT_DATA_FILE));
        assert!(cfg.defaults.retry.is_none());
        assert_eq!(cfg.session_idle_timeout, Duration::from_secs(3600));
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = AppConfig::from_lookup(lookup_from(&[("ELIZA_MAX_RETRIES", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "ELIZA_MAX_RETRIES", .. }));

        for wait in ["-1", "NaN", "inf", "1e30"] {
            let err = AppConfig::from_lookup(lookup_from(&[("ELIZA_RETRY_WAIT_SECS", wait)]))
                .unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { key: "ELIZA_RETRY_WAIT_SECS", .. }),
                "{wait} accepted"
            );
        }

        let err = AppConfig::from_lookup(lookup_from(&[("ELIZA_SESSION_IDLE_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "ELIZA_SESSION_IDLE_SECS", .. }));
    }

    #[test]
    fn out_of_range_wait_falls_back_instead_of_panicking() {
        let global = GlobalConfigDefaults {
            retry: Some(RetrySettings {
                max_retries: None,
                wait_secs: Some(1e30),
            }),
            ..Default::default()
        };
        let eff = resolve_effective_settings(
            &global,
            &CliOverrides::default(),
            &SessionSettings::default(),
        );
        assert_eq!(eff.retry.wait, Duration::from_secs(3));
        assert_eq!(retry_wait(0.25), Some(Duration::from_millis(250)));
        assert_eq!(retry_wait(-0.5), None);
    }
}
