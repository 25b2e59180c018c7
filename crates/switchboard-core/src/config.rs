use std::collections::HashMap;
use std::path::Path;

use chrono::Weekday;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SwitchboardError};

/// Trunk value that forces every transfer onto the public network.
pub const PUBLIC_NETWORK_SENTINEL: &str = "PSTN";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HooksConfig {
    #[serde(default)]
    pub on_session_start: Vec<String>,
    #[serde(default)]
    pub on_session_end: Vec<String>,
}

impl HooksConfig {
    pub fn is_empty(&self) -> bool {
        self.on_session_start.is_empty() && self.on_session_end.is_empty()
    }
}

/// Top-level Switchboard configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub telephony: TelephonyConfig,
    #[serde(default)]
    pub flow: FlowConfig,
    #[serde(default = "default_locales")]
    pub locales: HashMap<String, LocaleConfig>,
    #[serde(default)]
    pub business_hours: Option<BusinessHoursConfig>,
    #[serde(default)]
    pub hooks: Option<HooksConfig>,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelephonyConfig {
    /// The organization's own number.
    pub main_number: String,
    /// Private trunk identifier, or `PSTN` to always use the public network.
    #[serde(default = "default_trunk")]
    pub trunk: String,
    /// Prompt played to the caller while a transfer rings.
    #[serde(default = "default_ringback_key")]
    pub ringback_key: Option<String>,
    /// Session attribute holding the requested transfer destination.
    #[serde(default = "default_transfer_attribute")]
    pub transfer_attribute: String,
}

impl TelephonyConfig {
    /// Whether the private trunk is disabled by the sentinel.
    pub fn public_only(&self) -> bool {
        self.trunk.eq_ignore_ascii_case(PUBLIC_NETWORK_SENTINEL)
    }
}

fn default_trunk() -> String {
    PUBLIC_NETWORK_SENTINEL.to_string()
}

fn default_ringback_key() -> Option<String> {
    Some("ringing.wav".to_string())
}

fn default_transfer_attribute() -> String {
    "transferNumber".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    #[serde(default = "default_locale")]
    pub default_locale: String,
    /// Upper bound on node visits per session before giving up.
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
    #[serde(default = "default_transfer_intent")]
    pub transfer_intent: String,
    #[serde(default = "default_quit_intent")]
    pub quit_intent: String,
    /// Apology spoken on every error path.
    #[serde(default = "default_error_message")]
    pub error_message: String,
    /// Optional prompt played before anything else.
    #[serde(default)]
    pub welcome_prompt: Option<String>,
    #[serde(default = "default_open_prompt")]
    pub open_prompt: String,
    #[serde(default = "default_closed_prompt")]
    pub closed_prompt: String,
    /// Session attribute holding text the bot wants spoken before a transfer.
    #[serde(default = "default_bot_response_attribute")]
    pub bot_response_attribute: String,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            default_locale: default_locale(),
            max_hops: default_max_hops(),
            transfer_intent: default_transfer_intent(),
            quit_intent: default_quit_intent(),
            error_message: default_error_message(),
            welcome_prompt: None,
            open_prompt: default_open_prompt(),
            closed_prompt: default_closed_prompt(),
            bot_response_attribute: default_bot_response_attribute(),
        }
    }
}

fn default_locale() -> String {
    "en-US".to_string()
}

fn default_max_hops() -> usize {
    64
}

fn default_transfer_intent() -> String {
    "Transfer".to_string()
}

fn default_quit_intent() -> String {
    "Quit".to_string()
}

fn default_error_message() -> String {
    "A system error has occurred, please call back and try again".to_string()
}

fn default_open_prompt() -> String {
    "open.wav".to_string()
}

fn default_closed_prompt() -> String {
    "closed.wav".to_string()
}

fn default_bot_response_attribute() -> String {
    "botResponse".to_string()
}

/// Per-locale tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocaleConfig {
    /// Prompt spoken when the dialog engine takes over.
    pub dialog_prompt: String,
    /// Logical asset name -> prompt key, e.g. `goodbye = "goodbye-es-US.wav"`.
    #[serde(default)]
    pub assets: HashMap<String, String>,
    /// Logical phrase name -> speakable text.
    #[serde(default)]
    pub phrases: HashMap<String, String>,
}

fn default_locales() -> HashMap<String, LocaleConfig> {
    let mut locales = HashMap::new();
    locales.insert(
        "en-US".to_string(),
        LocaleConfig {
            dialog_prompt: "You can ask about our products, hours, location, or speak to one of our team members. Tell us how we can help today?".to_string(),
            assets: HashMap::from([("goodbye".to_string(), "goodbye-en-US.wav".to_string())]),
            phrases: HashMap::from([(
                "goodbye".to_string(),
                "Thank you for calling, goodbye.".to_string(),
            )]),
        },
    );
    locales.insert(
        "es-US".to_string(),
        LocaleConfig {
            dialog_prompt: "¿En qué puede ayudarte Chat GPT?".to_string(),
            assets: HashMap::from([("goodbye".to_string(), "goodbye-es-US.wav".to_string())]),
            phrases: HashMap::from([(
                "goodbye".to_string(),
                "Gracias por llamar, adiós.".to_string(),
            )]),
        },
    );
    locales
}

/// Weekly opening schedule in local time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessHoursConfig {
    /// Opening hour (0-23), inclusive.
    pub start_hour: u8,
    /// Closing hour (0-23), exclusive. May be less than `start_hour` for overnight.
    pub end_hour: u8,
    #[serde(default)]
    pub utc_offset_hours: i32,
    /// Open days. Empty means every day.
    #[serde(default = "default_open_days")]
    pub days: Vec<Weekday>,
}

fn default_open_days() -> Vec<Weekday> {
    vec![
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Buffered events per session lane.
    #[serde(default = "default_lane_buffer")]
    pub lane_buffer: usize,
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
    /// Inbound events buffered by the dispatcher.
    #[serde(default = "default_inbound_buffer")]
    pub inbound_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            lane_buffer: default_lane_buffer(),
            event_bus_capacity: default_event_bus_capacity(),
            inbound_buffer: default_inbound_buffer(),
        }
    }
}

fn default_lane_buffer() -> usize {
    16
}

fn default_event_bus_capacity() -> usize {
    256
}

fn default_inbound_buffer() -> usize {
    256
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| SwitchboardError::ConfigNotFound(path.display().to_string()))?;
        Self::from_toml(&content)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn from_toml(content: &str) -> Result<Self> {
        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| SwitchboardError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.telephony.main_number.trim().is_empty() {
            return Err(SwitchboardError::Config(
                "telephony.main_number must not be empty".into(),
            ));
        }
        if !self.locales.contains_key(&self.flow.default_locale) {
            return Err(SwitchboardError::Config(format!(
                "default locale {} has no [locales] entry",
                self.flow.default_locale
            )));
        }
        if self.flow.max_hops == 0 {
            return Err(SwitchboardError::Config("flow.max_hops must be positive".into()));
        }
        if let Some(ref hours) = self.business_hours {
            if hours.start_hour > 23 || hours.end_hour > 23 {
                return Err(SwitchboardError::Config(
                    "business_hours hours must be within 0..=23".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}
