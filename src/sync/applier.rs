use crate::host::{ElementId, Host};

use super::throttle::HeightUpdateConfig;

pub const TRANSITION_CURVE: &str = "cubic-bezier(0.4, 0, 0.2, 1)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The frame was resized to this many pixels.
    Changed(u32),
    /// The frame already had this height; nothing was written.
    Unchanged(u32),
}

pub fn transition_value(config: &HeightUpdateConfig) -> String {
    let seconds = config.transition_duration as f64 / 1000.0;
    format!("height {seconds}s {TRANSITION_CURVE}")
}

/// Resize `frame` to `height`, never below `config.min_height`.
pub fn apply_height(
    host: &mut dyn Host,
    frame: ElementId,
    height: u32,
    config: &HeightUpdateConfig,
) -> Applied {
    let target = height.max(config.min_height);
    let value = format!("{target}px");
    if host.style(frame, "height").as_deref() == Some(value.as_str()) {
        return Applied::Unchanged(target);
    }

    host.set_style(frame, "transition", &transition_value(config));
    host.set_style(frame, "height", &value);
    Applied::Changed(target)
}

pub fn clear_transition(host: &mut dyn Host, frame: ElementId) {
    host.remove_style(frame, "transition");
}
