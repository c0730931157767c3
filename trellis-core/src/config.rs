// Application settings

use crate::Error;
use crate::logging::{debug, trace};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::env;

/// How implicit output is folded into responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputBuffering {
    /// Install [`OutputBuffer`](crate::OutputBuffer) as the outermost app middleware.
    #[default]
    Append,
    Off,
}

impl OutputBuffering {
    fn parse(value: &str) -> Result<Self, Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(OutputBuffering::Append),
            "off" | "false" | "0" => Ok(OutputBuffering::Off),
            other => Err(Error::Config(format!(
                "outputBuffering must be \"append\" or \"off\", got {:?}",
                other
            ))),
        }
    }
}

/// Framework settings.
///
/// Keys are camelCase when read from a JSON object. Unrecognized keys are
/// kept in [`extra`](Settings::extra) so applications can store their own
/// values alongside the framework's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub http_version: String,
    pub output_buffering: OutputBuffering,
    pub determine_route_before_app_middleware: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            http_version: "1.1".to_string(),
            output_buffering: OutputBuffering::Append,
            determine_route_before_app_middleware: false,
            extra: Map::new(),
        }
    }
}

impl Settings {
    /// Defaults overlaid with the keys present in `user`.
    ///
    /// `user` must be a JSON object; `null` is treated as an empty one.
    pub fn merged(user: &Value) -> Result<Self, Error> {
        let overrides = match user {
            Value::Null => return Ok(Self::default()),
            Value::Object(map) => map,
            other => {
                return Err(Error::Config(format!(
                    "settings must be an object, got {}",
                    kind_of(other)
                )));
            }
        };

        let mut base = match serde_json::to_value(Self::default()) {
            Ok(Value::Object(map)) => map,
            Ok(_) => Map::new(),
            Err(err) => return Err(Error::Serialization(err.to_string())),
        };
        for (key, value) in overrides {
            trace!(key = %key, "Overriding setting");
            base.insert(key.clone(), value.clone());
        }

        serde_json::from_value(Value::Object(base))
            .map_err(|err| Error::Config(format!("invalid settings: {}", err)))
    }

    /// Defaults overlaid with `<PREFIX>_HTTP_VERSION`,
    /// `<PREFIX>_OUTPUT_BUFFERING` and
    /// `<PREFIX>_DETERMINE_ROUTE_BEFORE_APP_MIDDLEWARE`.
    pub fn from_env(prefix: &str) -> Result<Self, Error> {
        let mut settings = Self::default();

        if let Some(version) = load_var(prefix, "HTTP_VERSION") {
            settings.http_version = version;
        }
        if let Some(mode) = load_var(prefix, "OUTPUT_BUFFERING") {
            settings.output_buffering = OutputBuffering::parse(&mode)?;
        }
        if let Some(flag) = load_var(prefix, "DETERMINE_ROUTE_BEFORE_APP_MIDDLEWARE") {
            settings.determine_route_before_app_middleware = parse_bool(&flag)?;
        }

        debug!(prefix = prefix, "Loaded settings from environment");
        Ok(settings)
    }

    /// Look up an application-defined key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}

fn load_var(prefix: &str, key: &str) -> Option<String> {
    let full_key = if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}_{}", prefix.to_uppercase(), key)
    };
    env::var(full_key).ok()
}

fn parse_bool(value: &str) -> Result<bool, Error> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(Error::Config(format!("expected a boolean, got {:?}", other))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.http_version, "1.1");
        assert_eq!(settings.output_buffering, OutputBuffering::Append);
        assert!(!settings.determine_route_before_app_middleware);
    }

    #[test]
    fn test_merged_overrides_only_given_keys() {
        let settings = Settings::merged(&json!({
            "httpVersion": "2",
            "determineRouteBeforeAppMiddleware": true,
        }))
        .unwrap();

        assert_eq!(settings.http_version, "2");
        assert_eq!(settings.output_buffering, OutputBuffering::Append);
        assert!(settings.determine_route_before_app_middleware);
    }

    #[test]
    fn test_merged_keeps_application_keys() {
        let settings = Settings::merged(&json!({ "displayErrorDetails": true })).unwrap();
        assert_eq!(settings.get("displayErrorDetails"), Some(&json!(true)));
    }

    #[test]
    fn test_merged_null_is_default() {
        assert_eq!(Settings::merged(&Value::Null).unwrap(), Settings::default());
    }

    #[test]
    fn test_merged_rejects_non_object() {
        let err = Settings::merged(&json!(["httpVersion"])).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("an array")));
    }

    #[test]
    fn test_merged_rejects_bad_output_buffering() {
        let err = Settings::merged(&json!({ "outputBuffering": "prepend" })).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_output_buffering_parse() {
        assert_eq!(OutputBuffering::parse("Append").unwrap(), OutputBuffering::Append);
        assert_eq!(OutputBuffering::parse("off").unwrap(), OutputBuffering::Off);
        assert!(OutputBuffering::parse("sideways").is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("yes").unwrap());
        assert!(!parse_bool("0").unwrap());
        assert!(parse_bool("maybe").is_err());
    }

    // std::env::set_var is unsafe, so only the unset case is exercised here.
    #[test]
    fn test_from_env_without_variables() {
        let settings = Settings::from_env("TRELLIS_TEST_UNSET_12345").unwrap();
        assert_eq!(settings, Settings::default());
    }
}
