use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};

use kuchiki::traits::*;
use kuchiki::NodeRef;
use serde_json::Value;
use url::Url;

use super::{
    DocumentMetrics, ElementId, Host, HostError, ObserverId, ObserverKind, ScriptRequestId,
};

/// What a simulated frame document lets the parent do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameContent {
    /// Readable by the parent; posting messages works.
    SameOrigin(DocumentMetrics),
    /// Messages can be posted, the document cannot be read.
    CrossOrigin,
    /// Neither: posting a message throws.
    Sandboxed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverSupport {
    Available,
    Missing,
    /// The constructor exists but throws.
    Failing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostedMessage {
    pub frame: ElementId,
    pub message: Value,
    pub target_origin: String,
}

#[derive(Debug, Clone, Copy, Default)]
struct MediaState {
    playing: bool,
    muted: bool,
}

/// In-memory [`Host`] over a kuchiki document.
pub struct MemoryHost {
    document: NodeRef,
    nodes: RefCell<Vec<NodeRef>>,
    page_url: Option<Url>,
    frames: HashMap<ElementId, FrameContent>,
    resize_support: ObserverSupport,
    intersection_support: ObserverSupport,
    observers: BTreeMap<ObserverId, (ObserverKind, ElementId)>,
    next_observer: u64,
    posted: Vec<PostedMessage>,
    parent_messages: Vec<Value>,
    embedded: bool,
    scroll_height: u32,
    opened_windows: Vec<String>,
    native_hls: bool,
    /// Tags `create_element` refuses.
    refused_tags: HashSet<String>,
    scripts: Vec<(ScriptRequestId, String)>,
    media: HashMap<ElementId, MediaState>,
    style_writes: HashMap<(ElementId, String), usize>,
}

impl MemoryHost {
    pub fn from_html(html: &str) -> Self {
        Self {
            document: kuchiki::parse_html().one(html),
            nodes: RefCell::new(Vec::new()),
            page_url: None,
            frames: HashMap::new(),
            resize_support: ObserverSupport::Available,
            intersection_support: ObserverSupport::Available,
            observers: BTreeMap::new(),
            next_observer: 1,
            posted: Vec::new(),
            parent_messages: Vec::new(),
            embedded: false,
            scroll_height: 0,
            opened_windows: Vec::new(),
            native_hls: false,
            refused_tags: HashSet::new(),
            scripts: Vec::new(),
            media: HashMap::new(),
            style_writes: HashMap::new(),
        }
    }

    pub fn with_page_url(mut self, url: Url) -> Self {
        self.page_url = Some(url);
        self
    }

    pub fn set_frame_content(&mut self, frame: ElementId, content: FrameContent) {
        self.frames.insert(frame, content);
    }

    pub fn set_observer_support(&mut self, kind: ObserverKind, support: ObserverSupport) {
        match kind {
            ObserverKind::Resize => self.resize_support = support,
            ObserverKind::Intersection => self.intersection_support = support,
        }
    }

    pub fn set_embedded(&mut self, embedded: bool, scroll_height: u32) {
        self.embedded = embedded;
        self.scroll_height = scroll_height;
    }

    pub fn set_native_hls(&mut self, supported: bool) {
        self.native_hls = supported;
    }

    /// Make `create_element(tag)` fail until allowed again.
    pub fn refuse_element(&mut self, tag: &str, refused: bool) {
        if refused {
            self.refused_tags.insert(tag.to_ascii_lowercase());
        } else {
            self.refused_tags.remove(&tag.to_ascii_lowercase());
        }
    }

    pub fn posted_messages(&self) -> &[PostedMessage] {
        &self.posted
    }

    pub fn messages_to(&self, frame: ElementId) -> Vec<&Value> {
        self.posted
            .iter()
            .filter(|posted| posted.frame == frame)
            .map(|posted| &posted.message)
            .collect()
    }

    pub fn parent_messages(&self) -> &[Value] {
        &self.parent_messages
    }

    pub fn opened_windows(&self) -> &[String] {
        &self.opened_windows
    }

    pub fn script_requests(&self) -> &[(ScriptRequestId, String)] {
        &self.scripts
    }

    pub fn observers_on(&self, target: ElementId) -> Vec<(ObserverId, ObserverKind)> {
        self.observers
            .iter()
            .filter(|(_, (_, observed))| *observed == target)
            .map(|(id, (kind, _))| (*id, *kind))
            .collect()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// How many times `property` was written on `element`.
    pub fn style_writes(&self, element: ElementId, property: &str) -> usize {
        self.style_writes
            .get(&(element, property.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn is_playing(&self, video: ElementId) -> bool {
        self.media.get(&video).map(|m| m.playing).unwrap_or(false)
    }

    pub fn is_muted(&self, video: ElementId) -> bool {
        self.media.get(&video).map(|m| m.muted).unwrap_or(false)
    }

    /// Connected elements with the given tag name, in document order.
    pub fn elements_by_tag(&self, tag: &str) -> Vec<ElementId> {
        let matches: Vec<NodeRef> = self
            .document
            .descendants()
            .elements()
            .filter(|element| &*element.name.local == tag)
            .map(|element| element.as_node().clone())
            .collect();
        matches.iter().map(|node| self.id_for(node)).collect()
    }

    pub fn text_content(&self, element: ElementId) -> Option<String> {
        self.node(element).map(|node| node.text_contents())
    }

    /// Serialize the current document.
    pub fn html(&self) -> String {
        let mut bytes = Vec::new();
        if self.document.serialize(&mut bytes).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn id_for(&self, node: &NodeRef) -> ElementId {
        let mut nodes = self.nodes.borrow_mut();
        if let Some(index) = nodes.iter().position(|known| known == node) {
            return ElementId(index as u64);
        }
        nodes.push(node.clone());
        ElementId((nodes.len() - 1) as u64)
    }

    fn node(&self, element: ElementId) -> Option<NodeRef> {
        self.nodes.borrow().get(element.0 as usize).cloned()
    }

    fn find_element(
        &self,
        mut predicate: impl FnMut(&kuchiki::ElementData) -> bool,
    ) -> Vec<ElementId> {
        let matches: Vec<NodeRef> = self
            .document
            .descendants()
            .elements()
            .filter(|element| predicate(&**element))
            .map(|element| element.as_node().clone())
            .collect();
        matches.iter().map(|node| self.id_for(node)).collect()
    }

    fn with_attributes<T>(
        &self,
        element: ElementId,
        f: impl FnOnce(&mut kuchiki::Attributes) -> T,
    ) -> Option<T> {
        let node = self.node(element)?;
        let data = node.as_element()?;
        let mut attributes = data.attributes.borrow_mut();
        Some(f(&mut attributes))
    }

    fn inline_styles(&self, element: ElementId) -> Vec<(String, String)> {
        self.attribute(element, "style")
            .map(|raw| parse_style(&raw))
            .unwrap_or_default()
    }

    fn write_styles(&mut self, element: ElementId, styles: &[(String, String)]) {
        let serialized = styles
            .iter()
            .map(|(property, value)| format!("{property}: {value};"))
            .collect::<Vec<_>>()
            .join(" ");
        if serialized.is_empty() {
            self.with_attributes(element, |attributes| attributes.remove("style"));
        } else {
            self.set_attribute(element, "style", &serialized);
        }
    }

    fn media_mut(&mut self, video: ElementId) -> &mut MediaState {
        self.media.entry(video).or_default()
    }
}

impl Host for MemoryHost {
    fn head(&self) -> Option<ElementId> {
        self.find_element(|element| &*element.name.local == "head")
            .into_iter()
            .next()
    }

    fn body(&self) -> Option<ElementId> {
        self.find_element(|element| &*element.name.local == "body")
            .into_iter()
            .next()
    }

    fn element_by_id(&self, id: &str) -> Option<ElementId> {
        self.find_element(|element| element.attributes.borrow().get("id") == Some(id))
            .into_iter()
            .next()
    }

    fn elements_by_class(&self, class: &str) -> Vec<ElementId> {
        self.find_element(|element| {
            element
                .attributes
                .borrow()
                .get("class")
                .map(|classes| classes.split_whitespace().any(|c| c == class))
                .unwrap_or(false)
        })
    }

    fn parent(&self, element: ElementId) -> Option<ElementId> {
        let parent = self.node(element)?.parent()?;
        parent.as_element()?;
        Some(self.id_for(&parent))
    }

    fn is_connected(&self, element: ElementId) -> bool {
        match self.node(element) {
            Some(node) => node == self.document || node.ancestors().any(|a| a == self.document),
            None => false,
        }
    }

    fn create_element(&mut self, tag: &str) -> Result<ElementId, HostError> {
        if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(HostError::InvalidTag(tag.to_string()));
        }
        if self.refused_tags.contains(&tag.to_ascii_lowercase()) {
            return Err(HostError::InvalidTag(tag.to_string()));
        }
        let fragment = kuchiki::parse_html().one(format!("<body><{tag}></{tag}></body>"));
        let created = fragment
            .select_first(tag)
            .map_err(|_| HostError::InvalidTag(tag.to_string()))?;
        let node = created.as_node().clone();
        node.detach();
        Ok(self.id_for(&node))
    }

    fn append_child(&mut self, parent: ElementId, child: ElementId) {
        if let (Some(parent), Some(child)) = (self.node(parent), self.node(child)) {
            parent.append(child);
        }
    }

    fn remove_element(&mut self, element: ElementId) {
        if let Some(node) = self.node(element) {
            node.detach();
        }
    }

    fn set_text_content(&mut self, element: ElementId, text: &str) {
        if let Some(node) = self.node(element) {
            let children: Vec<NodeRef> = node.children().collect();
            for child in children {
                child.detach();
            }
            node.append(NodeRef::new_text(text));
        }
    }

    fn attribute(&self, element: ElementId, name: &str) -> Option<String> {
        self.with_attributes(element, |attributes| attributes.get(name).map(str::to_string))
            .flatten()
    }

    fn set_attribute(&mut self, element: ElementId, name: &str, value: &str) {
        self.with_attributes(element, |attributes| {
            attributes.insert(name, value.to_string());
        });
    }

    fn has_class(&self, element: ElementId, class: &str) -> bool {
        self.attribute(element, "class")
            .map(|classes| classes.split_whitespace().any(|c| c == class))
            .unwrap_or(false)
    }

    fn add_class(&mut self, element: ElementId, class: &str) {
        if self.has_class(element, class) {
            return;
        }
        let classes = match self.attribute(element, "class") {
            Some(existing) if !existing.trim().is_empty() => format!("{} {class}", existing.trim()),
            _ => class.to_string(),
        };
        self.set_attribute(element, "class", &classes);
    }

    fn remove_class(&mut self, element: ElementId, class: &str) {
        if let Some(existing) = self.attribute(element, "class") {
            let remaining = existing
                .split_whitespace()
                .filter(|c| *c != class)
                .collect::<Vec<_>>()
                .join(" ");
            self.set_attribute(element, "class", &remaining);
        }
    }

    fn style(&self, element: ElementId, property: &str) -> Option<String> {
        self.inline_styles(element)
            .into_iter()
            .find(|(name, _)| name == property)
            .map(|(_, value)| value)
    }

    fn set_style(&mut self, element: ElementId, property: &str, value: &str) {
        let mut styles = self.inline_styles(element);
        match styles.iter_mut().find(|(name, _)| name == property) {
            Some(entry) => entry.1 = value.to_string(),
            None => styles.push((property.to_string(), value.to_string())),
        }
        self.write_styles(element, &styles);
        *self
            .style_writes
            .entry((element, property.to_string()))
            .or_insert(0) += 1;
    }

    fn remove_style(&mut self, element: ElementId, property: &str) {
        let mut styles = self.inline_styles(element);
        let before = styles.len();
        styles.retain(|(name, _)| name != property);
        if styles.len() != before {
            self.write_styles(element, &styles);
        }
    }

    fn post_message(
        &mut self,
        frame: ElementId,
        message: &Value,
        target_origin: &str,
    ) -> Result<(), HostError> {
        if !self.is_connected(frame) {
            return Err(HostError::PostMessage(format!("frame {frame} is detached")));
        }
        match self.frames.get(&frame).copied().unwrap_or(FrameContent::CrossOrigin) {
            FrameContent::Sandboxed => Err(HostError::PostMessage(format!(
                "frame {frame} has no reachable content window"
            ))),
            FrameContent::SameOrigin(_) | FrameContent::CrossOrigin => {
                self.posted.push(PostedMessage {
                    frame,
                    message: message.clone(),
                    target_origin: target_origin.to_string(),
                });
                Ok(())
            }
        }
    }

    fn frame_document_metrics(&self, frame: ElementId) -> Result<DocumentMetrics, HostError> {
        match self.frames.get(&frame).copied().unwrap_or(FrameContent::CrossOrigin) {
            FrameContent::SameOrigin(metrics) => Ok(metrics),
            FrameContent::CrossOrigin | FrameContent::Sandboxed => Err(HostError::AccessDenied(
                format!("blocked a frame from accessing cross-origin frame {frame}"),
            )),
        }
    }

    fn supports_observer(&self, kind: ObserverKind) -> bool {
        let support = match kind {
            ObserverKind::Resize => self.resize_support,
            ObserverKind::Intersection => self.intersection_support,
        };
        support != ObserverSupport::Missing
    }

    fn observe(&mut self, kind: ObserverKind, target: ElementId) -> Result<ObserverId, HostError> {
        let support = match kind {
            ObserverKind::Resize => self.resize_support,
            ObserverKind::Intersection => self.intersection_support,
        };
        match support {
            ObserverSupport::Missing => Err(HostError::ObserverUnsupported(kind)),
            ObserverSupport::Failing => Err(HostError::ObserverConstruction(format!(
                "{} constructor threw",
                kind.api_name()
            ))),
            ObserverSupport::Available => {
                let id = ObserverId(self.next_observer);
                self.next_observer += 1;
                self.observers.insert(id, (kind, target));
                Ok(id)
            }
        }
    }

    fn disconnect(&mut self, observer: ObserverId) {
        self.observers.remove(&observer);
    }

    fn page_url(&self) -> Option<Url> {
        self.page_url.clone()
    }

    fn is_embedded(&self) -> bool {
        self.embedded
    }

    fn post_to_parent(&mut self, message: &Value) {
        self.parent_messages.push(message.clone());
    }

    fn document_scroll_height(&self) -> u32 {
        self.scroll_height
    }

    fn open_window(&mut self, url: &str) {
        self.opened_windows.push(url.to_string());
    }

    fn supports_native_hls(&self, _video: ElementId) -> bool {
        self.native_hls
    }

    fn request_script(&mut self, url: &str) -> ScriptRequestId {
        let id = ScriptRequestId(self.scripts.len() as u64 + 1);
        self.scripts.push((id, url.to_string()));
        id
    }

    fn play(&mut self, video: ElementId) {
        self.media_mut(video).playing = true;
    }

    fn pause(&mut self, video: ElementId) {
        self.media_mut(video).playing = false;
    }

    fn set_muted(&mut self, video: ElementId, muted: bool) {
        self.media_mut(video).muted = muted;
    }
}

fn parse_style(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|declaration| {
            let (property, value) = declaration.split_once(':')?;
            let property = property.trim();
            let value = value.trim();
            if property.is_empty() {
                return None;
            }
            Some((property.to_string(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_and_attaches_elements() {
        let mut host = MemoryHost::from_html("<html><body><div id=\"root\"></div></body></html>");
        let root = host.element_by_id("root").unwrap();
        let frame = host.create_element("iframe").unwrap();
        assert!(!host.is_connected(frame));

        host.append_child(root, frame);
        host.set_attribute(frame, "src", "https://cal.meetergo.com/x");

        assert!(host.is_connected(frame));
        assert_eq!(host.parent(frame), Some(root));
        assert!(host.html().contains("src=\"https://cal.meetergo.com/x\""));
    }

    #[test]
    fn inline_styles_round_through_the_style_attribute() {
        let mut host =
            MemoryHost::from_html("<body><div id=\"a\" style=\"color: red\"></div></body>");
        let el = host.element_by_id("a").unwrap();
        host.set_style(el, "height", "500px");
        assert_eq!(host.style(el, "color").as_deref(), Some("red"));
        assert_eq!(host.style(el, "height").as_deref(), Some("500px"));

        host.remove_style(el, "color");
        assert_eq!(host.style(el, "color"), None);
        assert_eq!(host.style_writes(el, "height"), 1);
    }

    #[test]
    fn cross_origin_frames_deny_document_access() {
        let mut host = MemoryHost::from_html("<body><iframe id=\"f\"></iframe></body>");
        let frame = host.element_by_id("f").unwrap();
        assert!(matches!(
            host.frame_document_metrics(frame),
            Err(HostError::AccessDenied(_))
        ));

        host.set_frame_content(
            frame,
            FrameContent::SameOrigin(DocumentMetrics {
                body_scroll_height: 640,
                root_scroll_height: 700,
            }),
        );
        assert_eq!(host.frame_document_metrics(frame).unwrap().content_height(), 700);
    }

    #[test]
    fn classes_match_whole_tokens() {
        let host = MemoryHost::from_html(
            "<body><div class=\"meetergo-iframe wide\"></div><div class=\"meetergo-iframes\"></div></body>",
        );
        assert_eq!(host.elements_by_class("meetergo-iframe").len(), 1);
    }
}
