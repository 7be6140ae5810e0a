use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;

fn default_host() -> String {
    "127.0.0.1".to_string()
}

/// Connection and custom settings for one coin's handler.
///
/// The common connection fields cover most RPC-backed handlers; anything
/// handler-specific goes into `custom`, which is free-form JSON. Handlers
/// read custom fields through the typed accessors below, which cast the
/// loosely-typed values operators tend to enter ("5", "true", 5, true) to
/// the type the handler actually needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub custom: HashMap<String, Value>,
}

impl Default for CoinSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
            user: None,
            password: None,
            custom: HashMap::new(),
        }
    }
}

impl CoinSettings {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: Value) -> Self {
        self.custom.insert(key.into(), value);
        self
    }

    /// Fill in missing custom keys from a handler's declared defaults.
    /// Existing keys always win.
    pub fn merge_defaults(&mut self, defaults: &HashMap<String, Value>) {
        for (key, value) in defaults {
            self.custom.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }

    pub fn custom_str(&self, key: &str) -> Option<&str> {
        self.custom.get(key).and_then(Value::as_str)
    }

    /// Numeric custom field, accepting both JSON numbers and numeric strings.
    pub fn custom_u64(&self, key: &str) -> Option<u64> {
        match self.custom.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Boolean custom field, accepting JSON booleans, 0/1 and the usual
    /// truthy strings.
    pub fn custom_bool(&self, key: &str) -> Option<bool> {
        match self.custom.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_u64().map(|n| n != 0),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Decimal custom field, accepting numbers and decimal strings.
    pub fn custom_decimal(&self, key: &str) -> Option<Decimal> {
        match self.custom.get(key)? {
            Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
            Value::String(s) => Decimal::from_str(s.trim()).ok(),
            _ => None,
        }
    }
}
