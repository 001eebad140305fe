//! Booking surfaces: modal, sidebar, floating button, video teaser and inline
//! embeds. Each owns its elements and a small open/closed state machine; the
//! widget wires them to height sync and parameter merging.

pub mod button;
pub mod embed;
pub mod modal;
pub mod sidebar;
pub mod video;

use crate::host::{ElementId, Host, HostError};

pub const SPINNER_CLASS: &str = "meetergo-spinner";

pub(crate) const BASE_CSS: &str = "\
.meetergo-spinner{width:40px;height:40px;margin:40px auto;border:4px solid #e5e7eb;border-top-color:#0a64bc;border-radius:50%;animation:meetergo-spin 1s linear infinite}\
@keyframes meetergo-spin{to{transform:rotate(360deg)}}\
.meetergo-hidden{display:none!important}";

/// Create a booking iframe pointing at `src`.
pub(crate) fn create_iframe(host: &mut dyn Host, src: &str) -> Result<ElementId, HostError> {
    let iframe = host.create_element("iframe")?;
    host.set_attribute(iframe, "src", src);
    host.set_attribute(iframe, "title", "meetergo booking");
    host.set_attribute(iframe, "frameborder", "0");
    host.set_attribute(iframe, "allow", "payment");
    host.set_style(iframe, "width", "100%");
    host.set_style(iframe, "border", "none");
    Ok(iframe)
}

pub(crate) fn create_spinner(host: &mut dyn Host) -> Result<ElementId, HostError> {
    let spinner = host.create_element("div")?;
    host.add_class(spinner, SPINNER_CLASS);
    host.set_attribute(spinner, "role", "progressbar");
    Ok(spinner)
}

pub(crate) fn create_with_class(
    host: &mut dyn Host,
    tag: &str,
    class: &str,
) -> Result<ElementId, HostError> {
    let element = host.create_element(tag)?;
    host.add_class(element, class);
    Ok(element)
}

/// Attach `element` to the document body.
pub(crate) fn mount(host: &mut dyn Host, element: ElementId) -> Result<(), HostError> {
    let body = host
        .body()
        .ok_or_else(|| HostError::ElementNotFound("body".into()))?;
    host.append_child(body, element);
    Ok(())
}
