use tracing::debug;

use crate::context::WidgetContext;
use crate::host::{closest, ElementId, Host, HostError};
use crate::notify::{Level, Notification};

use super::{create_iframe, create_spinner, create_with_class, mount, BASE_CSS};

pub const MODAL_ROOT_ID: &str = "meetergo-modal";
const HIDDEN: &str = "meetergo-hidden";

const MODAL_CSS: &str = "\
.meetergo-modal{position:fixed;inset:0;z-index:9999;display:flex;align-items:center;justify-content:center}\
.meetergo-modal-overlay{position:absolute;inset:0;background:rgba(0,0,0,.6)}\
.meetergo-modal-content{position:relative;width:min(1000px,92vw);max-height:92vh;overflow:auto;background:#fff;border-radius:8px}\
.meetergo-modal-close{position:absolute;top:8px;right:12px;border:none;background:none;font-size:24px;cursor:pointer}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModalState {
    #[default]
    Closed,
    Open,
}

#[derive(Debug, Clone, Copy)]
struct ModalElements {
    root: ElementId,
    overlay: ElementId,
    content: ElementId,
    close_button: ElementId,
}

/// Result of opening the modal: the fresh booking frame, and the one it
/// replaced, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSwap {
    pub created: ElementId,
    pub removed: Option<ElementId>,
}

pub struct Modal {
    context: WidgetContext,
    state: ModalState,
    elements: Option<ModalElements>,
    iframe: Option<ElementId>,
    spinner: Option<ElementId>,
    close_on_overlay_click: bool,
}

impl Modal {
    pub fn new(context: WidgetContext, close_on_overlay_click: bool) -> Self {
        Self {
            context,
            state: ModalState::Closed,
            elements: None,
            iframe: None,
            spinner: None,
            close_on_overlay_click,
        }
    }

    pub fn state(&self) -> ModalState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ModalState::Open
    }

    pub fn iframe(&self) -> Option<ElementId> {
        self.iframe
    }

    pub fn root(&self) -> Option<ElementId> {
        self.elements.map(|elements| elements.root)
    }

    /// Show the modal with a new booking frame loading `src`.
    pub fn open(&mut self, host: &mut dyn Host, src: &str) -> Result<FrameSwap, HostError> {
        let elements = self.ensure_elements(host)?;

        let removed = self.iframe.take();
        if let Some(previous) = removed {
            host.remove_element(previous);
        }
        if let Some(spinner) = self.spinner.take() {
            host.remove_element(spinner);
        }

        let spinner = create_spinner(host)?;
        host.append_child(elements.content, spinner);
        let iframe = create_iframe(host, src)?;
        host.append_child(elements.content, iframe);

        host.remove_class(elements.root, HIDDEN);
        self.spinner = Some(spinner);
        self.iframe = Some(iframe);
        self.state = ModalState::Open;
        debug!(frame = %iframe, "opened booking modal");

        Ok(FrameSwap {
            created: iframe,
            removed,
        })
    }

    /// Hide the modal and drop its frame. Returns the removed frame.
    pub fn close(&mut self, host: &mut dyn Host) -> Option<ElementId> {
        if !self.is_open() {
            return None;
        }
        if let Some(elements) = self.elements {
            host.add_class(elements.root, HIDDEN);
        }
        if let Some(spinner) = self.spinner.take() {
            host.remove_element(spinner);
        }
        let removed = self.iframe.take();
        if let Some(frame) = removed {
            host.remove_element(frame);
        }
        self.state = ModalState::Closed;
        debug!("closed booking modal");
        removed
    }

    /// Point the open modal's frame at a new URL.
    pub fn refresh(&mut self, host: &mut dyn Host, src: &str) -> Option<ElementId> {
        let frame = self.iframe.filter(|_| self.is_open())?;
        if host.attribute(frame, "src").as_deref() != Some(src) {
            host.set_attribute(frame, "src", src);
        }
        Some(frame)
    }

    pub fn on_frame_loaded(&mut self, host: &mut dyn Host, frame: ElementId) -> bool {
        if self.iframe != Some(frame) {
            return false;
        }
        if let Some(spinner) = self.spinner.take() {
            host.remove_element(spinner);
        }
        true
    }

    /// Whether a click on `target` should close the modal.
    pub fn click_closes(&self, host: &dyn Host, target: ElementId) -> bool {
        let Some(elements) = self.elements.filter(|_| self.is_open()) else {
            return false;
        };
        if closest(host, target, |el| el == elements.close_button).is_some() {
            return true;
        }
        self.close_on_overlay_click && target == elements.overlay
    }

    pub fn teardown(&mut self, host: &mut dyn Host) -> Option<ElementId> {
        let removed = self.iframe.take();
        self.spinner = None;
        if let Some(elements) = self.elements.take() {
            host.remove_element(elements.root);
        }
        self.context.dom.invalidate(MODAL_ROOT_ID);
        self.state = ModalState::Closed;
        removed
    }

    fn ensure_elements(&mut self, host: &mut dyn Host) -> Result<ModalElements, HostError> {
        if let Some(elements) = self.elements {
            if self.context.dom.get(&*host, MODAL_ROOT_ID) == Some(elements.root) {
                return Ok(elements);
            }
            // Removed by the host page since we built it.
            self.elements = None;
            self.iframe = None;
            self.spinner = None;
            self.state = ModalState::Closed;
            let err = HostError::ElementNotFound(MODAL_ROOT_ID.to_string());
            self.context.notifier.report(
                Notification::new(Level::Error, "The booking window could not be displayed")
                    .with_context("modal")
                    .with_error(&err),
            );
            return Err(err);
        }

        self.context.styles.inject(host, "base", BASE_CSS)?;
        self.context.styles.inject(host, "modal", MODAL_CSS)?;

        let root = create_with_class(host, "div", "meetergo-modal")?;
        host.set_attribute(root, "id", MODAL_ROOT_ID);
        host.set_attribute(root, "role", "dialog");
        host.set_attribute(root, "aria-modal", "true");
        host.add_class(root, HIDDEN);

        let overlay = create_with_class(host, "div", "meetergo-modal-overlay")?;
        let content = create_with_class(host, "div", "meetergo-modal-content")?;
        let close_button = create_with_class(host, "button", "meetergo-modal-close")?;
        host.set_attribute(close_button, "aria-label", "Close");
        host.set_text_content(close_button, "\u{00d7}");

        host.append_child(root, overlay);
        host.append_child(root, content);
        host.append_child(content, close_button);
        mount(host, root)?;
        self.context.dom.remember(MODAL_ROOT_ID, root);

        let elements = ModalElements {
            root,
            overlay,
            content,
            close_button,
        };
        self.elements = Some(elements);
        Ok(elements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryHost;

    fn page() -> MemoryHost {
        MemoryHost::from_html("<html><head></head><body></body></html>")
    }

    #[tokio::test]
    async fn opens_and_closes() {
        let mut host = page();
        let mut modal = Modal::new(WidgetContext::new(), true);

        let swap = modal.open(&mut host, "https://cal.meetergo.com/x?a=1").unwrap();
        assert!(modal.is_open());
        assert_eq!(swap.removed, None);
        assert_eq!(
            host.attribute(swap.created, "src").as_deref(),
            Some("https://cal.meetergo.com/x?a=1")
        );

        let removed = modal.close(&mut host);
        assert_eq!(removed, Some(swap.created));
        assert!(!modal.is_open());
        assert!(!host.is_connected(swap.created));
        assert!(host.has_class(modal.root().unwrap(), HIDDEN));
    }

    #[tokio::test]
    async fn reopening_replaces_the_frame() {
        let mut host = page();
        let mut modal = Modal::new(WidgetContext::new(), true);
        let first = modal.open(&mut host, "https://cal.meetergo.com/a").unwrap();
        let second = modal.open(&mut host, "https://cal.meetergo.com/b").unwrap();
        assert_eq!(second.removed, Some(first.created));
        assert_eq!(host.elements_by_tag("iframe"), vec![second.created]);
    }

    #[tokio::test]
    async fn missing_root_is_reported_and_aborts() {
        let mut host = page();
        let context = WidgetContext::new();
        let mut modal = Modal::new(context.clone(), true);
        modal.open(&mut host, "https://cal.meetergo.com/a").unwrap();
        modal.close(&mut host);

        let root = modal.root().unwrap();
        host.remove_element(root);

        let result = modal.open(&mut host, "https://cal.meetergo.com/a");
        assert!(matches!(result, Err(HostError::ElementNotFound(_))));
        let active = context.notifier.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].level, Level::Error);

        // The next call rebuilds the modal.
        assert!(modal.open(&mut host, "https://cal.meetergo.com/a").is_ok());
    }

    #[tokio::test]
    async fn overlay_click_respects_setting() {
        let mut host = page();
        let mut modal = Modal::new(WidgetContext::new(), false);
        modal.open(&mut host, "https://cal.meetergo.com/a").unwrap();
        let elements = modal.elements.unwrap();

        assert!(!modal.click_closes(&host, elements.overlay));
        assert!(modal.click_closes(&host, elements.close_button));
    }
}
