use std::path::PathBuf;

use serde::Deserialize;

/// All configuration for the boxoffice application.
///
/// Precedence (lowest to highest): defaults → config file → env var → CLI arg.
/// CLI arg merging is done by the caller after `Config::load()`.
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub db_url: String,

    // Server
    pub port: u16,
    pub base_url: String,

    // Logging
    pub log_level: String,
    pub utc: bool,

    // Card aggregator
    pub card_secret_key: String,
    pub card_public_key: String,
    pub card_base_url: String,

    // Bank-transfer aggregator
    pub bank_api_key: String,
    pub bank_secret: String,
    pub bank_contract_code: String,
    pub bank_base_url: String,

    // Outbound email
    pub email_api_key: String,
    pub email_from: String,
}

/// Config file layout (~/.boxoffice/config.toml). All fields optional —
/// they layer on top of compiled-in defaults.
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    db_url: Option<String>,
    port: Option<u16>,
    base_url: Option<String>,
    log_level: Option<String>,
    utc: Option<bool>,
    card_secret_key: Option<String>,
    card_public_key: Option<String>,
    card_base_url: Option<String>,
    bank_api_key: Option<String>,
    bank_secret: Option<String>,
    bank_contract_code: Option<String>,
    bank_base_url: Option<String>,
    email_api_key: Option<String>,
    email_from: Option<String>,
}

impl Config {
    /// Config directory: ~/.boxoffice/
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".boxoffice")
    }

    /// Config file path: ~/.boxoffice/config.toml
    pub fn file_path() -> PathBuf {
        Self::dir().join("config.toml")
    }

    /// Load config: defaults → config file → env vars.
    /// CLI args should be merged by the caller afterward.
    pub fn load() -> Self {
        let mut config = Self::defaults();

        // Layer 2: config file
        if let Ok(contents) = std::fs::read_to_string(Self::file_path()) {
            if let Ok(file) = toml::from_str::<FileConfig>(&contents) {
                config.apply_file(file);
            }
        }

        // Layer 3: environment variables
        config.apply_env();

        config
    }

    // --- Private helpers ---

    fn defaults() -> Self {
        Self {
            db_url: "sqlite:boxoffice.db".to_string(),
            port: 3000,
            base_url: "http://localhost:3000".to_string(),
            log_level: "info".to_string(),
            utc: false,
            card_secret_key: String::new(),
            card_public_key: String::new(),
            card_base_url: "https://api.paystack.co".to_string(),
            bank_api_key: String::new(),
            bank_secret: String::new(),
            bank_contract_code: String::new(),
            bank_base_url: "https://api.monnify.com".to_string(),
            email_api_key: String::new(),
            email_from: "tickets@boxoffice.example".to_string(),
        }
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(v) = file.db_url { self.db_url = v; }
        if let Some(v) = file.port { self.port = v; }
        if let Some(v) = file.base_url { self.base_url = v; }
        if let Some(v) = file.log_level { self.log_level = v; }
        if let Some(v) = file.utc { self.utc = v; }
        if let Some(v) = file.card_secret_key { self.card_secret_key = v; }
        if let Some(v) = file.card_public_key { self.card_public_key = v; }
        if let Some(v) = file.card_base_url { self.card_base_url = v; }
        if let Some(v) = file.bank_api_key { self.bank_api_key = v; }
        if let Some(v) = file.bank_secret { self.bank_secret = v; }
        if let Some(v) = file.bank_contract_code { self.bank_contract_code = v; }
        if let Some(v) = file.bank_base_url { self.bank_base_url = v; }
        if let Some(v) = file.email_api_key { self.email_api_key = v; }
        if let Some(v) = file.email_from { self.email_from = v; }
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("BOXOFFICE_DB_URL") { self.db_url = v; }
        if let Ok(v) = std::env::var("BOXOFFICE_PORT") {
            if let Ok(p) = v.parse() { self.port = p; }
        }
        if let Ok(v) = std::env::var("BOXOFFICE_BASE_URL") { self.base_url = v; }
        if let Ok(v) = std::env::var("BOXOFFICE_LOG_LEVEL") { self.log_level = v; }
        if let Ok(v) = std::env::var("BOXOFFICE_UTC") {
            self.utc = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("CARD_GATEWAY_SECRET_KEY") { self.card_secret_key = v; }
        if let Ok(v) = std::env::var("CARD_GATEWAY_PUBLIC_KEY") { self.card_public_key = v; }
        if let Ok(v) = std::env::var("CARD_GATEWAY_BASE_URL") { self.card_base_url = v; }
        if let Ok(v) = std::env::var("BANK_GATEWAY_API_KEY") { self.bank_api_key = v; }
        if let Ok(v) = std::env::var("BANK_GATEWAY_SECRET") { self.bank_secret = v; }
        if let Ok(v) = std::env::var("BANK_GATEWAY_CONTRACT_CODE") { self.bank_contract_code = v; }
        if let Ok(v) = std::env::var("BANK_GATEWAY_BASE_URL") { self.bank_base_url = v; }
        if let Ok(v) = std::env::var("EMAIL_API_KEY") { self.email_api_key = v; }
        if let Ok(v) = std::env::var("EMAIL_FROM") { self.email_from = v; }
    }
}
