use tracing::{debug, warn};

use crate::context::WidgetContext;
use crate::host::{ElementId, Host, HostError};
use crate::notify::{Level, Notification};
use crate::params::append_params;

use super::button::{element_link, INITIALIZED_ATTR};
use super::{create_iframe, create_spinner, BASE_CSS};

/// Host-page containers with this class become inline booking embeds.
pub const INLINE_EMBED_CLASS: &str = "meetergo-iframe";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlineEmbed {
    pub container: ElementId,
    pub iframe: ElementId,
    spinner: Option<ElementId>,
}

impl InlineEmbed {
    pub fn is_loading(&self) -> bool {
        self.spinner.is_some()
    }

    /// Drop the spinner once the iframe has loaded.
    pub fn on_loaded(&mut self, host: &mut dyn Host) {
        if let Some(spinner) = self.spinner.take() {
            host.remove_element(spinner);
        }
    }

    pub fn remove(&mut self, host: &mut dyn Host) {
        self.on_loaded(host);
        host.remove_element(self.iframe);
    }
}

/// Turn every unprocessed inline container into a spinner plus iframe whose
/// `src` is the container link with `query` appended. A container whose
/// elements cannot be created is reported and left unprocessed; the others
/// are still built.
pub fn scan_inline_embeds(
    context: &WidgetContext,
    host: &mut dyn Host,
    query: &str,
) -> Result<Vec<InlineEmbed>, HostError> {
    let containers = host.elements_by_class(INLINE_EMBED_CLASS);
    if containers.is_empty() {
        return Ok(Vec::new());
    }
    context.styles.inject(host, "base", BASE_CSS)?;

    let mut embeds = Vec::with_capacity(containers.len());
    for container in containers {
        if host.attribute(container, INITIALIZED_ATTR).is_some() {
            continue;
        }
        let Some(link) = element_link(&*host, container) else {
            warn!(element = %container, "inline embed without a link attribute");
            continue;
        };

        match build_embed(host, container, &append_params(&link, query)) {
            Ok(embed) => embeds.push(embed),
            Err(err) => {
                context.notifier.report(
                    Notification::new(
                        Level::Error,
                        "An embedded booking page could not be displayed",
                    )
                    .with_context(format!("inline embed {container}"))
                    .with_error(&err),
                );
            }
        }
    }
    Ok(embeds)
}

/// Create the spinner and iframe, attaching nothing until both exist.
fn build_embed(
    host: &mut dyn Host,
    container: ElementId,
    src: &str,
) -> Result<InlineEmbed, HostError> {
    let spinner = create_spinner(host)?;
    let iframe = create_iframe(host, src)?;
    if let Some(height) = host.attribute(container, "data-height") {
        host.set_style(iframe, "height", &height);
    }
    host.append_child(container, spinner);
    host.append_child(container, iframe);
    host.set_attribute(container, INITIALIZED_ATTR, "true");
    debug!(container = %container, src = %src, "created inline embed");

    Ok(InlineEmbed {
        container,
        iframe,
        spinner: Some(spinner),
    })
}
