use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::sync::origin::OriginPolicy;
use crate::sync::throttle::HeightUpdateConfig;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML settings: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to parse JSON settings: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything a host page configures about the widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WidgetSettings {
    /// Values forwarded as query parameters into every booking frame.
    pub prefill: Map<String, Value>,
    pub enable_auto_resize: bool,
    pub height_config: HeightUpdateConfig,
    pub origin_policy: OriginPolicy,
    /// How long to wait for a height report before probing the frame.
    pub response_timeout_ms: u64,
    pub sidebar: Option<SidebarSettings>,
    pub floating_button: Option<FloatingButtonSettings>,
    pub video: Option<VideoSettings>,
    pub form_listeners: Vec<FormListener>,
    pub disable_modal_click_outside: bool,
    pub enable_parent_height_report: bool,
}

impl Default for WidgetSettings {
    fn default() -> Self {
        Self {
            prefill: Map::new(),
            enable_auto_resize: true,
            height_config: HeightUpdateConfig::default(),
            origin_policy: OriginPolicy::default(),
            response_timeout_ms: 2000,
            sidebar: None,
            floating_button: None,
            video: None,
            form_listeners: Vec::new(),
            disable_modal_click_outside: false,
            enable_parent_height_report: false,
        }
    }
}

impl WidgetSettings {
    /// Load settings from a YAML (`.yml`/`.yaml`) or JSON file. A missing
    /// path yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let Some(path) = path.filter(|path| path.exists()) else {
            return Ok(Self::default());
        };
        let contents = fs::read_to_string(path)?;
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yml") || ext.eq_ignore_ascii_case("yaml"));
        if is_yaml {
            Ok(serde_yaml::from_str(&contents)?)
        } else {
            Ok(serde_json::from_str(&contents)?)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SidebarPosition {
    Left,
    #[default]
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidebarSettings {
    pub link: String,
    #[serde(default)]
    pub position: SidebarPosition,
    #[serde(default = "default_sidebar_width")]
    pub width: String,
    #[serde(default = "default_sidebar_button_text")]
    pub button_text: String,
}

fn default_sidebar_width() -> String {
    "400px".to_string()
}

fn default_sidebar_button_text() -> String {
    "Book a meeting".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ButtonPosition {
    TopLeft,
    TopCenter,
    TopRight,
    MiddleLeft,
    MiddleRight,
    BottomLeft,
    BottomCenter,
    #[default]
    BottomRight,
}

impl ButtonPosition {
    /// Inline positioning declarations for a fixed element.
    pub fn declarations(self) -> &'static [(&'static str, &'static str)] {
        match self {
            ButtonPosition::TopLeft => &[("top", "20px"), ("left", "20px")],
            ButtonPosition::TopCenter => &[
                ("top", "20px"),
                ("left", "50%"),
                ("transform", "translateX(-50%)"),
            ],
            ButtonPosition::TopRight => &[("top", "20px"), ("right", "20px")],
            ButtonPosition::MiddleLeft => &[
                ("top", "50%"),
                ("left", "20px"),
                ("transform", "translateY(-50%)"),
            ],
            ButtonPosition::MiddleRight => &[
                ("top", "50%"),
                ("right", "20px"),
                ("transform", "translateY(-50%)"),
            ],
            ButtonPosition::BottomLeft => &[("bottom", "20px"), ("left", "20px")],
            ButtonPosition::BottomCenter => &[
                ("bottom", "20px"),
                ("left", "50%"),
                ("transform", "translateX(-50%)"),
            ],
            ButtonPosition::BottomRight => &[("bottom", "20px"), ("right", "20px")],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonAction {
    #[default]
    Modal,
    Sidebar,
    Link,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FloatingButtonSettings {
    pub link: String,
    #[serde(default = "default_button_text")]
    pub text: String,
    #[serde(default)]
    pub position: ButtonPosition,
    #[serde(default)]
    pub action: ButtonAction,
}

fn default_button_text() -> String {
    "Book appointment".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSettings {
    pub video_src: String,
    #[serde(default)]
    pub poster_image: Option<String>,
    pub booking_link: String,
    #[serde(default)]
    pub position: ButtonPosition,
    #[serde(default = "default_video_width")]
    pub width: u32,
    #[serde(default = "default_video_height")]
    pub height: u32,
}

fn default_video_width() -> u32 {
    200
}

fn default_video_height() -> u32 {
    158
}

/// Open the booking modal with a form's fields when it is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormListener {
    pub form_id: String,
    pub link: String,
}
