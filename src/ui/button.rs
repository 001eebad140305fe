use tracing::warn;

use crate::context::WidgetContext;
use crate::host::{closest, ElementId, Host, HostError};
use crate::settings::{ButtonAction, FloatingButtonSettings};

use super::{create_with_class, mount, BASE_CSS};

/// Host-page elements with this class open the modal with their `link`.
pub const MODAL_BUTTON_CLASS: &str = "meetergo-modal-button";
pub const INITIALIZED_ATTR: &str = "data-meetergo-initialized";

const BUTTON_CSS: &str = "\
.meetergo-floating-button{position:fixed;z-index:9996;padding:12px 20px;border:none;border-radius:24px;background:#0a64bc;color:#fff;font-weight:600;cursor:pointer;box-shadow:0 4px 12px rgba(0,0,0,.2)}";

pub struct FloatingButton {
    element: ElementId,
    settings: FloatingButtonSettings,
}

impl FloatingButton {
    pub fn create(
        context: &WidgetContext,
        host: &mut dyn Host,
        settings: FloatingButtonSettings,
    ) -> Result<Self, HostError> {
        context.styles.inject(host, "base", BASE_CSS)?;
        context.styles.inject(host, "button", BUTTON_CSS)?;

        let element = create_with_class(host, "button", "meetergo-floating-button")?;
        host.set_text_content(element, &settings.text);
        for (property, value) in settings.position.declarations() {
            host.set_style(element, property, value);
        }
        mount(host, element)?;
        Ok(Self { element, settings })
    }

    pub fn element(&self) -> ElementId {
        self.element
    }

    pub fn action(&self) -> ButtonAction {
        self.settings.action
    }

    pub fn link(&self) -> &str {
        &self.settings.link
    }

    pub fn contains(&self, host: &dyn Host, target: ElementId) -> bool {
        closest(host, target, |el| el == self.element).is_some()
    }

    pub fn remove(&self, host: &mut dyn Host) {
        host.remove_element(self.element);
    }
}

/// The booking link an element points at, from `link` or `data-link`.
pub fn element_link(host: &dyn Host, element: ElementId) -> Option<String> {
    host.attribute(element, "link")
        .or_else(|| host.attribute(element, "data-link"))
        .map(|link| link.trim().to_string())
        .filter(|link| !link.is_empty())
}

/// Find not-yet-initialised modal buttons in the page and their links.
pub fn collect_modal_buttons(host: &mut dyn Host) -> Vec<(ElementId, String)> {
    let mut found = Vec::new();
    for element in host.elements_by_class(MODAL_BUTTON_CLASS) {
        if host.attribute(element, INITIALIZED_ATTR).is_some() {
            continue;
        }
        match element_link(&*host, element) {
            Some(link) => {
                host.set_attribute(element, INITIALIZED_ATTR, "true");
                found.push((element, link));
            }
            None => warn!(element = %element, "modal button without a link attribute"),
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ButtonPosition;

    #[test]
    fn collects_buttons_once() {
        let mut host = crate::host::MemoryHost::from_html(
            r#"<body>
                <button class="meetergo-modal-button" link="https://cal.meetergo.com/a"><span id="label">Book</span></button>
                <a class="meetergo-modal-button" data-link="https://cal.meetergo.com/b">Book</a>
                <button class="meetergo-modal-button">No link</button>
            </body>"#,
        );

        let buttons = collect_modal_buttons(&mut host);
        let links: Vec<&str> = buttons.iter().map(|(_, link)| link.as_str()).collect();
        assert_eq!(links, ["https://cal.meetergo.com/a", "https://cal.meetergo.com/b"]);
        assert!(collect_modal_buttons(&mut host).is_empty());
    }

    #[tokio::test]
    async fn floating_button_is_positioned_and_matches_inner_clicks() {
        let mut host = crate::host::MemoryHost::from_html("<html><head></head><body></body></html>");
        let context = WidgetContext::new();
        let button = FloatingButton::create(
            &context,
            &mut host,
            FloatingButtonSettings {
                link: "https://cal.meetergo.com/x".into(),
                text: "Book".into(),
                position: ButtonPosition::TopLeft,
                action: ButtonAction::Modal,
            },
        )
        .unwrap();

        assert_eq!(host.style(button.element(), "top").as_deref(), Some("20px"));
        assert_eq!(host.style(button.element(), "left").as_deref(), Some("20px"));
        assert!(button.contains(&host, button.element()));
        assert!(!button.contains(&host, host.body().unwrap()));
    }
}
