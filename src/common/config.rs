//! Reads engine settings from a json file.
//!
//! Values found in the file win over the defaults handed to [`Config::build`].  Each getter
//! can also take an explicit default that wins over the built-in ones.  The file is read once,
//! the engine never writes it back.
use json::JsonValue;
use log::{info, warn};
use regex::Regex;
use std::{error::Error, fmt, io::ErrorKind};

#[derive(Debug)]
pub struct MissingConfigError {
    key: String,
}

impl fmt::Display for MissingConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Required configuration value '{}' is missing", self.key)
    }
}

impl Error for MissingConfigError {}

pub struct Config {
    filename: String,
    settings: JsonValue,
    defaults: JsonValue,
}

impl Config {
    /// Build a config for `filename`.  A missing or unparsable file is not an error, the
    /// defaults are used instead.  A filename with odd characters is rejected.
    pub fn build(filename: String, defaults: JsonValue) -> Result<Config, std::io::Error> {
        let filename_regex = Regex::new(r"^[a-zA-Z0-9_\-\./]+\.json$")
            .map_err(|e| std::io::Error::new(ErrorKind::Other, e.to_string()))?;
        if !filename_regex.is_match(&filename) {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "Invalid filename '{}' - must contain only letters, numbers, underscore, dash, dot, slash and end in .json",
                    filename
                ),
            ));
        }
        let mut config = Config {
            filename,
            settings: json::object! {},
            defaults,
        };
        if let Err(err) = config.load_from_file() {
            warn!("Using default settings: {}", err);
        }
        Ok(config)
    }

    /// A config that never touches the disk
    pub fn from_defaults(defaults: JsonValue) -> Config {
        Config {
            filename: String::new(),
            settings: json::object! {},
            defaults,
        }
    }

    fn load_from_file(&mut self) -> std::io::Result<()> {
        let raw_data = std::fs::read_to_string(&self.filename)?;
        match json::parse(&raw_data) {
            Ok(parsed) => {
                self.settings = parsed;
                info!("Loaded settings from {}: {}", self.filename, self.settings.dump());
            }
            Err(err) => {
                warn!("Failed to parse config file {}: {}", self.filename, err);
            }
        }
        Ok(())
    }

    fn lookup<T>(
        &self,
        key: &str,
        default: Option<T>,
        extract: impl Fn(&JsonValue) -> Option<T>,
    ) -> Result<T, MissingConfigError> {
        if let Some(val) = extract(&self.settings[key]) {
            return Ok(val);
        }
        if let Some(def) = default {
            return Ok(def);
        }
        extract(&self.defaults[key]).ok_or_else(|| MissingConfigError {
            key: key.to_string(),
        })
    }

    pub fn get_str_value(&self, key: &str, default: Option<String>) -> Result<String, MissingConfigError> {
        self.lookup(key, default, |v| v.as_str().map(String::from))
    }

    pub fn get_bool_value(&self, key: &str, default: Option<bool>) -> Result<bool, MissingConfigError> {
        self.lookup(key, default, |v| v.as_bool())
    }

    pub fn get_u32_value(&self, key: &str, default: Option<u32>) -> Result<u32, MissingConfigError> {
        self.lookup(key, default, |v| v.as_u32())
    }

    pub fn get_f32_value(&self, key: &str, default: Option<f32>) -> Result<f32, MissingConfigError> {
        self.lookup(key, default, |v| v.as_f32())
    }

    /// comma separated strings, or a json array of strings
    pub fn get_list_value(&self, key: &str, default: Option<Vec<String>>) -> Result<Vec<String>, MissingConfigError> {
        self.lookup(key, default, |v| {
            if v.is_array() {
                return Some(v.members().filter_map(|m| m.as_str()).map(String::from).collect());
            }
            v.as_str().map(|s| {
                s.split(',')
                    .map(|p| p.trim())
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect()
            })
        })
    }

    pub fn set_value(&mut self, key: &str, val: impl Into<JsonValue>) -> Result<(), String> {
        let json_val = val.into();
        match json_val {
            JsonValue::Short(_) | JsonValue::String(_) | JsonValue::Boolean(_) | JsonValue::Number(_) => {
                self.settings[key] = json_val;
                Ok(())
            }
            _ => Err(format!("Unsupported value type for key: {}", key)),
        }
    }

    pub fn dump(&self) -> String {
        self.settings.pretty(2)
    }
}

#[cfg(test)]
mod test_config {
    use super::*;

    fn test_defaults() -> JsonValue {
        json::object! {
            "name": "default_name",
            "enabled": true,
            "count": 42,
            "quality": 0.5,
            "bots": "Jambot, ninbot"
        }
    }

    fn test_config(filename: &str) -> Config {
        match Config::build(filename.to_string(), test_defaults()) {
            Ok(config) => config,
            Err(e) => panic!("Failed to build config: {}", e),
        }
    }

    #[test]
    fn defaults_without_file() {
        let config = test_config("no_such_settings_file.json");
        assert_eq!(config.get_str_value("name", None).unwrap(), "default_name");
        assert_eq!(config.get_bool_value("enabled", None).unwrap(), true);
        assert_eq!(config.get_u32_value("count", None).unwrap(), 42);
        assert_eq!(config.get_f32_value("quality", None).unwrap(), 0.5);
    }

    #[test]
    fn rejects_bad_filename() {
        let boom = Config::build("I'm_;,`all_{jacked}_up".to_string(), test_defaults());
        match boom {
            Ok(_) => panic!("Expected error for invalid filename"),
            Err(e) => assert_eq!(e.kind(), ErrorKind::InvalidInput),
        }
    }

    #[test]
    fn explicit_default_wins_over_builtin() {
        let config = Config::from_defaults(test_defaults());
        assert_eq!(config.get_u32_value("count", Some(7)).unwrap(), 7);
        assert_eq!(config.get_u32_value("nope", Some(99)).unwrap(), 99);
    }

    #[test]
    fn settings_win_over_everything() {
        let mut config = Config::from_defaults(test_defaults());
        config.set_value("count", 100).unwrap();
        assert_eq!(config.get_u32_value("count", Some(7)).unwrap(), 100);
    }

    #[test]
    fn missing_key_is_an_error() {
        let config = Config::from_defaults(test_defaults());
        let boom = config.get_str_value("i_dont_exist", None);
        assert_eq!(
            boom.err().unwrap().to_string(),
            "Required configuration value 'i_dont_exist' is missing"
        );
    }

    #[test]
    fn list_values() {
        let mut config = Config::from_defaults(test_defaults());
        assert_eq!(config.get_list_value("bots", None).unwrap(), vec!["Jambot", "ninbot"]);
        config.set_value("bots", "").unwrap();
        assert!(config.get_list_value("bots", None).unwrap().is_empty());
    }

    #[test]
    fn unsupported_type() {
        let mut config = Config::from_defaults(test_defaults());
        let res = config.set_value("unsupported", json::array!["value1", "value2"]);
        assert_eq!(res.err().unwrap(), "Unsupported value type for key: unsupported");
    }
}
