//! The seam between the widget and the page it runs in.
//!
//! Every DOM read/write, cross-document message and observer registration the
//! widget performs goes through [`Host`]. A browser binding implements it over
//! the real page; [`MemoryHost`] implements it over an in-memory document.

mod memory;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

pub use memory::{FrameContent, MemoryHost, ObserverSupport, PostedMessage};

/// Opaque handle to an element owned by the host document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(pub u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObserverId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptRequestId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObserverKind {
    /// `ResizeObserver`, attached to a frame's parent container.
    Resize,
    /// `IntersectionObserver`, attached to the frame itself.
    Intersection,
}

impl ObserverKind {
    pub fn api_name(self) -> &'static str {
        match self {
            ObserverKind::Resize => "ResizeObserver",
            ObserverKind::Intersection => "IntersectionObserver",
        }
    }
}

/// Scroll heights read from a same-origin frame document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetrics {
    pub body_scroll_height: u32,
    pub root_scroll_height: u32,
}

impl DocumentMetrics {
    pub fn content_height(&self) -> u32 {
        self.body_scroll_height.max(self.root_scroll_height)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("access to frame document denied: {0}")]
    AccessDenied(String),
    #[error("element not found: {0}")]
    ElementNotFound(String),
    #[error("{} is not available", .0.api_name())]
    ObserverUnsupported(ObserverKind),
    #[error("failed to construct observer: {0}")]
    ObserverConstruction(String),
    #[error("failed to post message: {0}")]
    PostMessage(String),
    #[error("invalid element tag: {0}")]
    InvalidTag(String),
}

pub trait Host {
    // Document structure.
    fn head(&self) -> Option<ElementId>;
    fn body(&self) -> Option<ElementId>;
    fn element_by_id(&self, id: &str) -> Option<ElementId>;
    fn elements_by_class(&self, class: &str) -> Vec<ElementId>;
    fn parent(&self, element: ElementId) -> Option<ElementId>;
    fn is_connected(&self, element: ElementId) -> bool;
    fn create_element(&mut self, tag: &str) -> Result<ElementId, HostError>;
    fn append_child(&mut self, parent: ElementId, child: ElementId);
    fn remove_element(&mut self, element: ElementId);
    fn set_text_content(&mut self, element: ElementId, text: &str);

    // Attributes and inline style.
    fn attribute(&self, element: ElementId, name: &str) -> Option<String>;
    fn set_attribute(&mut self, element: ElementId, name: &str, value: &str);
    fn has_class(&self, element: ElementId, class: &str) -> bool;
    fn add_class(&mut self, element: ElementId, class: &str);
    fn remove_class(&mut self, element: ElementId, class: &str);
    fn style(&self, element: ElementId, property: &str) -> Option<String>;
    fn set_style(&mut self, element: ElementId, property: &str, value: &str);
    fn remove_style(&mut self, element: ElementId, property: &str);

    // Cross-document access.
    fn post_message(
        &mut self,
        frame: ElementId,
        message: &Value,
        target_origin: &str,
    ) -> Result<(), HostError>;
    fn frame_document_metrics(&self, frame: ElementId) -> Result<DocumentMetrics, HostError>;

    // Observers.
    fn supports_observer(&self, kind: ObserverKind) -> bool;
    fn observe(&mut self, kind: ObserverKind, target: ElementId) -> Result<ObserverId, HostError>;
    fn disconnect(&mut self, observer: ObserverId);

    // The page the widget runs in.
    fn page_url(&self) -> Option<Url>;
    fn is_embedded(&self) -> bool;
    fn post_to_parent(&mut self, message: &Value);
    fn document_scroll_height(&self) -> u32;
    /// Open `url` in a new browsing context.
    fn open_window(&mut self, url: &str);

    // Scripts and media.
    fn supports_native_hls(&self, video: ElementId) -> bool;
    fn request_script(&mut self, url: &str) -> ScriptRequestId;
    fn play(&mut self, video: ElementId);
    fn pause(&mut self, video: ElementId);
    fn set_muted(&mut self, video: ElementId, muted: bool);
}

/// Walk from `element` up through its ancestors, returning the first one
/// accepted by `predicate`.
pub fn closest(
    host: &dyn Host,
    element: ElementId,
    mut predicate: impl FnMut(ElementId) -> bool,
) -> Option<ElementId> {
    let mut current = Some(element);
    while let Some(candidate) = current {
        if predicate(candidate) {
            return Some(candidate);
        }
        current = host.parent(candidate);
    }
    None
}

/// The origin (`scheme://host[:port]`) of an element's `src` attribute.
pub fn src_origin(host: &dyn Host, element: ElementId) -> Option<String> {
    let src = host.attribute(element, "src")?;
    let url = Url::parse(&src).ok()?;
    let origin = url.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}
