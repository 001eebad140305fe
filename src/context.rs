use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use tracing::debug;

use crate::host::{ElementId, Host, HostError};
use crate::notify::{NotificationSink, Notifier};
use crate::timers::TimerRegistry;

/// Shared collaborators handed to every widget component.
///
/// Cloning is cheap and every clone refers to the same timers, caches and
/// notifier, so state stays page-wide without module-level singletons.
#[derive(Clone)]
pub struct WidgetContext {
    pub timers: Rc<TimerRegistry>,
    pub dom: Rc<DomCache>,
    pub notifier: Rc<Notifier>,
    pub styles: Rc<StyleInjector>,
}

impl WidgetContext {
    /// Must be called inside a tokio runtime.
    pub fn new() -> Self {
        Self::with_sink(None)
    }

    pub fn with_sink(sink: Option<Box<dyn NotificationSink>>) -> Self {
        let timers = Rc::new(TimerRegistry::new());
        Self {
            notifier: Rc::new(Notifier::new(Rc::clone(&timers), sink)),
            timers,
            dom: Rc::new(DomCache::default()),
            styles: Rc::new(StyleInjector::default()),
        }
    }
}

impl Default for WidgetContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Element lookup cache keyed by element id.
#[derive(Debug, Default)]
pub struct DomCache {
    entries: RefCell<HashMap<String, ElementId>>,
}

impl DomCache {
    /// Look an element up by id, reusing a cached handle while it is still
    /// attached to the document.
    pub fn get(&self, host: &dyn Host, id: &str) -> Option<ElementId> {
        if let Some(cached) = self.entries.borrow().get(id).copied() {
            if host.is_connected(cached) {
                return Some(cached);
            }
        }
        self.entries.borrow_mut().remove(id);

        let found = host.element_by_id(id)?;
        self.entries.borrow_mut().insert(id.to_string(), found);
        Some(found)
    }

    pub fn remember(&self, id: &str, element: ElementId) {
        self.entries.borrow_mut().insert(id.to_string(), element);
    }

    pub fn invalidate(&self, id: &str) {
        self.entries.borrow_mut().remove(id);
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

/// Injects each named stylesheet into the page at most once.
#[derive(Debug, Default)]
pub struct StyleInjector {
    injected: RefCell<BTreeMap<String, ElementId>>,
}

impl StyleInjector {
    pub fn inject(&self, host: &mut dyn Host, name: &str, css: &str) -> Result<(), HostError> {
        if let Some(existing) = self.injected.borrow().get(name).copied() {
            if host.is_connected(existing) {
                return Ok(());
            }
        }

        let target = host
            .head()
            .or_else(|| host.body())
            .ok_or_else(|| HostError::ElementNotFound("head".into()))?;
        let style = host.create_element("style")?;
        host.set_attribute(style, "id", &format!("meetergo-style-{name}"));
        host.set_text_content(style, css);
        host.append_child(target, style);
        debug!(stylesheet = name, "injected stylesheet");

        self.injected.borrow_mut().insert(name.to_string(), style);
        Ok(())
    }

    pub fn is_injected(&self, name: &str) -> bool {
        self.injected.borrow().contains_key(name)
    }

    pub fn remove_all(&self, host: &mut dyn Host) {
        for (_, style) in std::mem::take(&mut *self.injected.borrow_mut()) {
            host.remove_element(style);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryHost;

    #[test]
    fn dom_cache_revalidates_detached_elements() {
        let mut host = MemoryHost::from_html("<body><div id=\"target\"></div></body>");
        let cache = DomCache::default();

        let first = cache.get(&host, "target").unwrap();
        host.remove_element(first);
        assert_eq!(cache.get(&host, "target"), None);
    }

    #[test]
    fn stylesheets_are_injected_once() {
        let mut host = MemoryHost::from_html("<html><head></head><body></body></html>");
        let styles = StyleInjector::default();

        styles.inject(&mut host, "modal", ".meetergo-modal{}").unwrap();
        styles.inject(&mut host, "modal", ".meetergo-modal{}").unwrap();

        assert_eq!(host.html().matches("meetergo-style-modal").count(), 1);
        styles.remove_all(&mut host);
        assert!(!host.html().contains("meetergo-style-modal"));
    }
}
