use tracing::debug;

use crate::context::WidgetContext;
use crate::host::{closest, ElementId, Host, HostError};
use crate::settings::{SidebarPosition, SidebarSettings};

use super::{create_iframe, create_with_class, mount, BASE_CSS};

const SIDEBAR_CSS: &str = "\
.meetergo-sidebar{position:fixed;top:0;height:100vh;z-index:9998;background:#fff;box-shadow:0 0 20px rgba(0,0,0,.2);transition:transform .3s ease-in-out}\
.meetergo-sidebar-left{left:0}.meetergo-sidebar-right{right:0}\
.meetergo-sidebar iframe{height:100%}\
.meetergo-sidebar-toggle{position:fixed;top:50%;z-index:9997;writing-mode:vertical-rl;padding:12px 8px;border:none;background:#0a64bc;color:#fff;cursor:pointer}\
.meetergo-sidebar-close{position:absolute;top:8px;right:12px;border:none;background:none;font-size:22px;cursor:pointer}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidebarAction {
    Toggle,
    Close,
}

#[derive(Debug, Clone, Copy)]
struct SidebarElements {
    root: ElementId,
    toggle: ElementId,
    close_button: ElementId,
    iframe: ElementId,
}

pub struct Sidebar {
    context: WidgetContext,
    settings: SidebarSettings,
    open: bool,
    elements: Option<SidebarElements>,
}

impl Sidebar {
    pub fn new(context: WidgetContext, settings: SidebarSettings) -> Self {
        Self {
            context,
            settings,
            open: false,
            elements: None,
        }
    }

    pub fn link(&self) -> &str {
        &self.settings.link
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn root(&self) -> Option<ElementId> {
        self.elements.map(|elements| elements.root)
    }

    pub fn iframe(&self) -> Option<ElementId> {
        self.elements.map(|elements| elements.iframe)
    }

    /// Build the closed sidebar and its toggle button. Returns the root.
    pub fn mount(&mut self, host: &mut dyn Host, src: &str) -> Result<ElementId, HostError> {
        if let Some(elements) = self.elements {
            return Ok(elements.root);
        }
        self.context.styles.inject(host, "base", BASE_CSS)?;
        self.context.styles.inject(host, "sidebar", SIDEBAR_CSS)?;

        let side = match self.settings.position {
            SidebarPosition::Left => "left",
            SidebarPosition::Right => "right",
        };
        let root = create_with_class(host, "div", "meetergo-sidebar")?;
        host.add_class(root, &format!("meetergo-sidebar-{side}"));
        host.set_style(root, "width", &self.settings.width);

        let close_button = create_with_class(host, "button", "meetergo-sidebar-close")?;
        host.set_attribute(close_button, "aria-label", "Close");
        host.set_text_content(close_button, "\u{00d7}");
        let iframe = create_iframe(host, src)?;
        host.append_child(root, close_button);
        host.append_child(root, iframe);

        let toggle = create_with_class(host, "button", "meetergo-sidebar-toggle")?;
        host.set_style(toggle, side, "0");
        host.set_text_content(toggle, &self.settings.button_text);

        mount(host, root)?;
        mount(host, toggle)?;

        self.elements = Some(SidebarElements {
            root,
            toggle,
            close_button,
            iframe,
        });
        self.apply_visibility(host);
        Ok(root)
    }

    pub fn open(&mut self, host: &mut dyn Host) {
        self.open = true;
        self.apply_visibility(host);
    }

    pub fn close(&mut self, host: &mut dyn Host) {
        self.open = false;
        self.apply_visibility(host);
    }

    /// Flip the sidebar; returns whether it is now open.
    pub fn toggle(&mut self, host: &mut dyn Host) -> bool {
        self.open = !self.open;
        self.apply_visibility(host);
        self.open
    }

    pub fn refresh(&mut self, host: &mut dyn Host, src: &str) {
        if let Some(elements) = self.elements {
            host.set_attribute(elements.iframe, "src", src);
        }
    }

    pub fn handle_click(&self, host: &dyn Host, target: ElementId) -> Option<SidebarAction> {
        let elements = self.elements?;
        if closest(host, target, |el| el == elements.close_button).is_some() {
            return Some(SidebarAction::Close);
        }
        if closest(host, target, |el| el == elements.toggle).is_some() {
            return Some(SidebarAction::Toggle);
        }
        None
    }

    /// Remove the sidebar. Returns its frame so the caller can release it.
    pub fn teardown(&mut self, host: &mut dyn Host) -> Option<ElementId> {
        let elements = self.elements.take()?;
        host.remove_element(elements.toggle);
        host.remove_element(elements.root);
        self.open = false;
        Some(elements.iframe)
    }

    fn apply_visibility(&self, host: &mut dyn Host) {
        let Some(elements) = self.elements else {
            return;
        };
        let hidden = match self.settings.position {
            SidebarPosition::Left => "translateX(-100%)",
            SidebarPosition::Right => "translateX(100%)",
        };
        let transform = if self.open { "translateX(0)" } else { hidden };
        host.set_style(elements.root, "transform", transform);
        host.set_attribute(elements.root, "aria-hidden", if self.open { "false" } else { "true" });
        debug!(open = self.open, "sidebar visibility changed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryHost;

    fn settings() -> SidebarSettings {
        SidebarSettings {
            link: "https://cal.meetergo.com/x".into(),
            position: SidebarPosition::Left,
            width: "380px".into(),
            button_text: "Book".into(),
        }
    }

    #[tokio::test]
    async fn toggles_between_open_and_closed() {
        let mut host = MemoryHost::from_html("<html><head></head><body></body></html>");
        let mut sidebar = Sidebar::new(WidgetContext::new(), settings());
        let root = sidebar.mount(&mut host, "https://cal.meetergo.com/x").unwrap();

        assert_eq!(host.style(root, "transform").as_deref(), Some("translateX(-100%)"));
        assert!(sidebar.toggle(&mut host));
        assert_eq!(host.style(root, "transform").as_deref(), Some("translateX(0)"));
        sidebar.close(&mut host);
        assert!(!sidebar.is_open());
    }

    #[tokio::test]
    async fn clicks_resolve_to_actions() {
        let mut host = MemoryHost::from_html("<html><head></head><body></body></html>");
        let mut sidebar = Sidebar::new(WidgetContext::new(), settings());
        sidebar.mount(&mut host, "https://cal.meetergo.com/x").unwrap();
        let elements = sidebar.elements.unwrap();

        assert_eq!(sidebar.handle_click(&host, elements.toggle), Some(SidebarAction::Toggle));
        assert_eq!(sidebar.handle_click(&host, elements.close_button), Some(SidebarAction::Close));
        assert_eq!(sidebar.handle_click(&host, elements.iframe), None);

        let frame = sidebar.teardown(&mut host);
        assert_eq!(frame, Some(elements.iframe));
        assert!(!host.is_connected(elements.root));
    }
}
