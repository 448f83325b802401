//! Robot configuration: a YAML file plus environment overrides.

use crate::AutomationError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const PASSWORD_ENV: &str = "DESKPILOT_PASSWORD";
pub const SHEETS_TOKEN_ENV: &str = "DESKPILOT_SHEETS_TOKEN";

/// Durations in the YAML file are plain milliseconds.
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RobotConfig {
    pub app: AppConfig,
    pub login: LoginConfig,
    pub store: StoreConfig,
    pub timings: Timings,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub exe_path: PathBuf,
    pub login_title_re: String,
    pub main_title_re: String,
    pub require_admin: bool,
    pub main_load_timeout_secs: u64,
    pub login_title_fallbacks: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            exe_path: PathBuf::new(),
            login_title_re: String::new(),
            main_title_re: String::new(),
            require_admin: true,
            main_load_timeout_secs: 240,
            login_title_fallbacks: vec![
                "(?i).*jardines.*renacer.*".to_string(),
                "(?i).*prueba.*jardines.*".to_string(),
            ],
        }
    }
}

impl AppConfig {
    /// Image name used to find leftover processes, e.g. `pisco.exe`.
    pub fn image_name(&self) -> Option<String> {
        self.exe_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .filter(|name| !name.is_empty())
    }

    pub fn main_load_timeout(&self) -> Duration {
        Duration::from_secs(self.main_load_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LoginConfig {
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub spreadsheet_id: String,
    pub sheet_name: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    /// Largest run of untouched rows a single ranged write may bridge.
    /// `None` writes one span per column.
    pub merge_gap: Option<u32>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: String::new(),
            sheet_name: "Hoja 1".to_string(),
            access_token: String::new(),
            merge_gap: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsConfig {
    pub base_dir: PathBuf,
    pub output_folder: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./robot"),
            output_folder: "servicios".to_string(),
        }
    }
}

impl PathsConfig {
    pub fn output_dir(&self) -> PathBuf {
        self.base_dir.join(&self.output_folder)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }
}

/// Every settle delay, poll interval and timeout the session driver uses.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Timings {
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    #[serde(with = "millis")]
    pub fast_poll_interval: Duration,
    /// Wait after the host regains focus before any control is touched.
    #[serde(with = "millis")]
    pub focus_settle: Duration,
    #[serde(with = "millis")]
    pub step_settle: Duration,
    #[serde(with = "millis")]
    pub action_backoff: Duration,
    pub text_retries: u32,
    #[serde(with = "millis")]
    pub dropdown_timeout: Duration,
    #[serde(with = "millis")]
    pub form_timeout: Duration,
    #[serde(with = "millis")]
    pub relocate_timeout: Duration,
    #[serde(with = "millis")]
    pub no_match_timeout: Duration,
    #[serde(with = "millis")]
    pub error_modal_timeout: Duration,
    #[serde(with = "millis")]
    pub calls_window_timeout: Duration,
    #[serde(with = "millis")]
    pub extract_timeout: Duration,
    #[serde(with = "millis")]
    pub login_window_timeout: Duration,
    #[serde(with = "millis")]
    pub window_timeout: Duration,
    #[serde(with = "millis")]
    pub file_dialog_timeout: Duration,
    #[serde(with = "millis")]
    pub load_result_timeout: Duration,
    #[serde(with = "millis")]
    pub confirmation_timeout: Duration,
    #[serde(with = "millis")]
    pub save_result_timeout: Duration,
    #[serde(with = "millis")]
    pub data_window_timeout: Duration,
    #[serde(with = "millis")]
    pub month_popup_timeout: Duration,
    #[serde(with = "millis")]
    pub close_timeout: Duration,
    #[serde(with = "millis")]
    pub dialog_sweep_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        let ms = Duration::from_millis;
        Self {
            poll_interval: ms(200),
            fast_poll_interval: ms(50),
            focus_settle: ms(10_000),
            step_settle: ms(250),
            action_backoff: ms(120),
            text_retries: 4,
            dropdown_timeout: ms(6_000),
            form_timeout: ms(45_000),
            relocate_timeout: ms(8_000),
            no_match_timeout: ms(800),
            error_modal_timeout: ms(1_200),
            calls_window_timeout: ms(12_000),
            extract_timeout: ms(8_000),
            login_window_timeout: ms(90_000),
            window_timeout: ms(60_000),
            file_dialog_timeout: ms(30_000),
            load_result_timeout: ms(60_000),
            confirmation_timeout: ms(20_000),
            save_result_timeout: ms(180_000),
            data_window_timeout: ms(30_000),
            month_popup_timeout: ms(20_000),
            close_timeout: ms(8_000),
            dialog_sweep_timeout: ms(2_000),
        }
    }
}

impl Timings {
    /// No settling and single-probe waits, for driving a synchronous fake.
    pub fn immediate() -> Self {
        Self {
            poll_interval: Duration::ZERO,
            fast_poll_interval: Duration::ZERO,
            focus_settle: Duration::ZERO,
            step_settle: Duration::ZERO,
            action_backoff: Duration::ZERO,
            text_retries: 3,
            dropdown_timeout: Duration::ZERO,
            form_timeout: Duration::ZERO,
            relocate_timeout: Duration::ZERO,
            no_match_timeout: Duration::ZERO,
            error_modal_timeout: Duration::ZERO,
            calls_window_timeout: Duration::ZERO,
            extract_timeout: Duration::ZERO,
            login_window_timeout: Duration::ZERO,
            window_timeout: Duration::ZERO,
            file_dialog_timeout: Duration::ZERO,
            load_result_timeout: Duration::ZERO,
            confirmation_timeout: Duration::ZERO,
            save_result_timeout: Duration::ZERO,
            data_window_timeout: Duration::ZERO,
            month_popup_timeout: Duration::ZERO,
            close_timeout: Duration::ZERO,
            dialog_sweep_timeout: Duration::ZERO,
        }
    }
}

impl RobotConfig {
    /// Reads the YAML file and layers secrets from the environment on top.
    pub fn load(path: &Path) -> Result<Self, AutomationError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AutomationError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut config = Self::from_yaml(&content)?;
        config.apply_env();
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, AutomationError> {
        serde_yaml::from_str(content)
            .map_err(|e| AutomationError::Config(format!("invalid YAML: {e}")))
    }

    pub fn apply_env(&mut self) {
        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            if !password.is_empty() {
                self.login.password = password;
            }
        }
        if let Ok(token) = std::env::var(SHEETS_TOKEN_ENV) {
            if !token.is_empty() {
                self.store.access_token = token;
            }
        }
    }

    /// Checks the fields a full run cannot do without.
    pub fn validate_for_run(&self) -> Result<(), AutomationError> {
        let missing = [
            ("app.exe_path", self.app.exe_path.as_os_str().is_empty()),
            ("app.main_title_re", self.app.main_title_re.is_empty()),
            ("login.user", self.login.user.is_empty()),
            ("store.spreadsheet_id", self.store.spreadsheet_id.is_empty()),
        ];
        let names: Vec<&str> = missing
            .iter()
            .filter(|(_, absent)| *absent)
            .map(|(name, _)| *name)
            .collect();
        if names.is_empty() {
            Ok(())
        } else {
            Err(AutomationError::Config(format!(
                "missing required settings: {}",
                names.join(", ")
            )))
        }
    }
}
