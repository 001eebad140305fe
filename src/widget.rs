//! The widget: wires host events to the booking surfaces, height sync and
//! parameter merging.

use keyboard_types::Key;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::context::WidgetContext;
use crate::host::{closest, ElementId, Host, HostError, ObserverId, ScriptRequestId};
use crate::notify::{Level, Notification};
use crate::params::{append_params, build_params, ParamSet};
use crate::settings::{ButtonAction, WidgetSettings};
use crate::sync::message::{parent_height_message, HostMessage, MessageEvent};
use crate::sync::HeightSyncController;
use crate::timers::TimerFire;
use crate::ui::button::{collect_modal_buttons, FloatingButton};
use crate::ui::embed::{scan_inline_embeds, InlineEmbed};
use crate::ui::modal::Modal;
use crate::ui::sidebar::{Sidebar, SidebarAction};
use crate::ui::video::{MediaEvent, VideoAction, VideoEmbed, VideoState};

/// Everything the host forwards to the widget.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum WidgetEvent {
    Click {
        target: ElementId,
    },
    KeyDown {
        key: Key,
    },
    Submit {
        form: ElementId,
        #[serde(default)]
        fields: Vec<(String, String)>,
    },
    Message(MessageEvent),
    FrameLoaded {
        frame: ElementId,
    },
    Observed {
        observer: ObserverId,
    },
    ScriptLoaded {
        request: ScriptRequestId,
        #[serde(default)]
        error: Option<String>,
    },
    Media {
        video: ElementId,
        event: MediaEvent,
    },
}

pub struct MeetergoWidget {
    settings: WidgetSettings,
    context: WidgetContext,
    sync: HeightSyncController,
    modal: Modal,
    /// Base link of the booking page currently shown in the modal.
    modal_link: Option<String>,
    sidebar: Option<Sidebar>,
    button: Option<FloatingButton>,
    video: Option<VideoEmbed>,
    embeds: Vec<InlineEmbed>,
    modal_buttons: Vec<(ElementId, String)>,
    booking_events: Vec<Value>,
}

impl MeetergoWidget {
    pub fn new(settings: WidgetSettings, context: WidgetContext) -> Self {
        let sync = HeightSyncController::new(
            context.clone(),
            settings.origin_policy,
            tokio::time::Duration::from_millis(settings.response_timeout_ms),
        );
        let modal = Modal::new(context.clone(), !settings.disable_modal_click_outside);
        let sidebar = settings
            .sidebar
            .clone()
            .map(|sidebar| Sidebar::new(context.clone(), sidebar));
        let video = settings
            .video
            .clone()
            .map(|video| VideoEmbed::new(context.clone(), video));
        Self {
            settings,
            context,
            sync,
            modal,
            modal_link: None,
            sidebar,
            button: None,
            video,
            embeds: Vec::new(),
            modal_buttons: Vec::new(),
            booking_events: Vec::new(),
        }
    }

    pub fn settings(&self) -> &WidgetSettings {
        &self.settings
    }

    pub fn context(&self) -> &WidgetContext {
        &self.context
    }

    pub fn sync(&self) -> &HeightSyncController {
        &self.sync
    }

    pub fn modal(&self) -> &Modal {
        &self.modal
    }

    pub fn sidebar(&self) -> Option<&Sidebar> {
        self.sidebar.as_ref()
    }

    pub fn video(&self) -> Option<&VideoEmbed> {
        self.video.as_ref()
    }

    pub fn floating_button(&self) -> Option<&FloatingButton> {
        self.button.as_ref()
    }

    pub fn inline_embeds(&self) -> &[InlineEmbed] {
        &self.embeds
    }

    /// Payloads of every `booking-successful` message received so far.
    pub fn booking_events(&self) -> &[Value] {
        &self.booking_events
    }

    /// Build every configured surface. A surface that fails to build is
    /// reported and skipped; the rest still come up.
    pub fn init(&mut self, host: &mut dyn Host) {
        let query = self.query(&*host, None);

        match scan_inline_embeds(&self.context, host, &query) {
            Ok(embeds) => {
                for embed in embeds {
                    if self.settings.enable_auto_resize {
                        self.sync.manage(&*host, embed.iframe, self.settings.height_config);
                    }
                    self.embeds.push(embed);
                }
            }
            Err(err) => self.report_init_failure("inline embeds", &err),
        }

        self.modal_buttons.extend(collect_modal_buttons(host));

        if let Some(settings) = self.settings.floating_button.clone() {
            match FloatingButton::create(&self.context, host, settings) {
                Ok(button) => self.button = Some(button),
                Err(err) => self.report_init_failure("floating button", &err),
            }
        }

        if let Some(sidebar) = self.sidebar.as_mut() {
            let src = append_params(sidebar.link(), &query);
            if let Err(err) = sidebar.mount(host, &src) {
                self.report_init_failure("sidebar", &err);
            }
        }

        if let Some(video) = self.video.as_mut() {
            if let Err(err) = video.open(host) {
                self.report_init_failure("video", &err);
            }
        }

        self.report_height_to_parent(host);
        info!(
            inline_embeds = self.embeds.len(),
            modal_buttons = self.modal_buttons.len(),
            "meetergo widget initialised"
        );
    }

    /// Dispatch one host event. Returns whether the widget acted on it.
    pub fn handle_event(&mut self, host: &mut dyn Host, event: WidgetEvent) -> bool {
        match event {
            WidgetEvent::Click { target } => self.on_click(host, target),
            WidgetEvent::KeyDown { key } => self.on_key_down(host, key),
            WidgetEvent::Submit { form, fields } => self.on_submit(host, form, fields),
            WidgetEvent::Message(message) => self.on_message(host, &message),
            WidgetEvent::FrameLoaded { frame } => {
                let mut handled = self.modal.on_frame_loaded(host, frame);
                for embed in self.embeds.iter_mut().filter(|embed| embed.iframe == frame) {
                    embed.on_loaded(host);
                    handled = true;
                }
                self.sync.on_frame_loaded(frame) || handled
            }
            WidgetEvent::Observed { observer } => self.sync.on_observer(host, observer),
            WidgetEvent::ScriptLoaded { request, error } => match self.video.as_mut() {
                Some(video) => video.on_script_loaded(host, request, error.as_deref()),
                None => false,
            },
            WidgetEvent::Media { video, event } => match self.video.as_mut() {
                Some(embed) if embed.video_element() == Some(video) => {
                    embed.on_media(event);
                    true
                }
                _ => false,
            },
        }
    }

    /// Drain and dispatch every timer that has fired. Returns how many were
    /// handled.
    pub fn poll_timers(&mut self, host: &mut dyn Host) -> usize {
        let mut handled = 0;
        while let Some(fire) = self.context.timers.try_recv_timer() {
            if self.dispatch_timer(host, fire) {
                handled += 1;
            }
        }
        handled
    }

    /// Replace the prefill values and re-point open frames at the new URLs.
    pub fn set_prefill(&mut self, host: &mut dyn Host, prefill: Map<String, Value>) {
        self.settings.prefill = prefill;
        let query = self.query(&*host, None);
        if let Some(link) = self.modal_link.as_deref() {
            self.modal.refresh(host, &append_params(link, &query));
        }
        if let Some(sidebar) = self.sidebar.as_mut() {
            let src = append_params(sidebar.link(), &query);
            sidebar.refresh(host, &src);
        }
    }

    /// Show the booking modal for `link`, replacing any frame it already
    /// holds.
    pub fn open_modal(
        &mut self,
        host: &mut dyn Host,
        link: &str,
        overrides: Option<&ParamSet>,
    ) -> Result<ElementId, HostError> {
        let src = append_params(link, &self.query(&*host, overrides));
        let swap = self.modal.open(host, &src)?;
        if let Some(removed) = swap.removed {
            self.sync.release(host, removed);
        }
        if self.settings.enable_auto_resize {
            self.sync.manage(&*host, swap.created, self.settings.height_config);
        }
        self.modal_link = Some(link.to_string());
        Ok(swap.created)
    }

    pub fn close_modal(&mut self, host: &mut dyn Host) -> bool {
        if !self.modal.is_open() {
            return false;
        }
        if let Some(frame) = self.modal.close(host) {
            self.sync.release(host, frame);
        }
        true
    }

    /// Tell the embedding page how tall this document is, when enabled and
    /// actually framed.
    pub fn report_height_to_parent(&self, host: &mut dyn Host) -> bool {
        if !self.settings.enable_parent_height_report || !host.is_embedded() {
            return false;
        }
        let height = host.document_scroll_height();
        host.post_to_parent(&parent_height_message(height));
        true
    }

    /// Remove everything the widget created and release every timer and
    /// observer it holds.
    pub fn teardown(&mut self, host: &mut dyn Host) {
        self.sync.release_all(host);
        self.modal.teardown(host);
        self.modal_link = None;
        if let Some(sidebar) = self.sidebar.as_mut() {
            sidebar.teardown(host);
        }
        if let Some(button) = self.button.take() {
            button.remove(host);
        }
        if let Some(video) = self.video.as_mut() {
            video.teardown(host);
        }
        for mut embed in self.embeds.drain(..) {
            embed.remove(host);
        }
        self.modal_buttons.clear();
        self.context.styles.remove_all(host);
        self.context.notifier.clear();
        self.context.timers.clear_all();
        self.context.dom.clear();
        debug!("meetergo widget torn down");
    }

    fn query(&self, host: &dyn Host, overrides: Option<&ParamSet>) -> String {
        build_params(host.page_url().as_ref(), Some(&self.settings.prefill), overrides)
    }

    fn dispatch_timer(&mut self, host: &mut dyn Host, fire: TimerFire) -> bool {
        if self.context.notifier.on_timer(fire.kind) || self.sync.on_timer(host, fire) {
            return true;
        }
        match self.video.as_mut() {
            Some(video) => video.on_timer(host, fire),
            None => false,
        }
    }

    fn on_click(&mut self, host: &mut dyn Host, target: ElementId) -> bool {
        if self.modal.click_closes(&*host, target) {
            return self.close_modal(host);
        }

        if let Some(sidebar) = self.sidebar.as_mut() {
            match sidebar.handle_click(&*host, target) {
                Some(SidebarAction::Toggle) => {
                    sidebar.toggle(host);
                    return true;
                }
                Some(SidebarAction::Close) => {
                    sidebar.close(host);
                    return true;
                }
                None => {}
            }
        }

        if let Some(action) = self
            .video
            .as_ref()
            .and_then(|video| video.handle_click(&*host, target))
        {
            return self.on_video_action(host, action);
        }

        if let Some((action, link)) = self
            .button
            .as_ref()
            .filter(|button| button.contains(&*host, target))
            .map(|button| (button.action(), button.link().to_string()))
        {
            return self.on_button_action(host, action, &link);
        }

        let modal_buttons = &self.modal_buttons;
        let link = closest(&*host, target, |el| modal_buttons.iter().any(|(button, _)| *button == el))
            .and_then(|button| {
                modal_buttons
                    .iter()
                    .find(|(candidate, _)| *candidate == button)
                    .map(|(_, link)| link.clone())
            });
        match link {
            Some(link) => self.open_modal_reporting(host, &link, None),
            None => false,
        }
    }

    fn on_video_action(&mut self, host: &mut dyn Host, action: VideoAction) -> bool {
        let Some(video) = self.video.as_mut() else {
            return false;
        };
        video.perform(host, action);
        if action == VideoAction::Book {
            let link = video.booking_link().to_string();
            return self.open_modal_reporting(host, &link, None);
        }
        true
    }

    fn on_button_action(&mut self, host: &mut dyn Host, action: ButtonAction, link: &str) -> bool {
        match action {
            ButtonAction::Modal => self.open_modal_reporting(host, link, None),
            ButtonAction::Sidebar => match self.sidebar.as_mut() {
                Some(sidebar) => {
                    sidebar.toggle(host);
                    true
                }
                None => {
                    warn!("floating button targets a sidebar that is not configured");
                    false
                }
            },
            ButtonAction::Link => {
                let url = append_params(link, &self.query(&*host, None));
                host.open_window(&url);
                true
            }
        }
    }

    fn on_key_down(&mut self, host: &mut dyn Host, key: Key) -> bool {
        if key != Key::Escape {
            return false;
        }
        if self.close_modal(host) {
            return true;
        }
        match self.video.as_mut() {
            Some(video) if matches!(video.state(), VideoState::Expanded | VideoState::Paused) => {
                video.minimize(host)
            }
            _ => false,
        }
    }

    fn on_submit(&mut self, host: &mut dyn Host, form: ElementId, fields: Vec<(String, String)>) -> bool {
        let Some(form_id) = host.attribute(form, "id") else {
            return false;
        };
        let Some(listener) = self
            .settings
            .form_listeners
            .iter()
            .find(|listener| listener.form_id == form_id)
        else {
            return false;
        };
        let link = listener.link.clone();
        let overrides: ParamSet = fields
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
            .collect();
        debug!(form = %form_id, fields = overrides.len(), "captured form submission");
        self.open_modal_reporting(host, &link, Some(&overrides))
    }

    fn on_message(&mut self, host: &mut dyn Host, event: &MessageEvent) -> bool {
        let Some(control) = HostMessage::parse(&event.data) else {
            return self.sync.on_message(host, event);
        };
        if !self.accepts_control_from(&*host, &event.origin) {
            debug!(origin = %event.origin, "ignoring control message from untrusted origin");
            return false;
        }
        match control {
            HostMessage::OpenModal { link, params } => {
                let Some(link) = link.or_else(|| self.modal_link.clone()) else {
                    warn!("open-modal message without a link");
                    return false;
                };
                let overrides = ParamSet::from_values(&params);
                self.open_modal_reporting(host, &link, Some(&overrides))
            }
            HostMessage::CloseModal => self.close_modal(host),
            HostMessage::BookingSuccessful(payload) => {
                info!("booking completed");
                self.booking_events.push(payload);
                true
            }
        }
    }

    /// Control messages come from the booking pages or from the host page
    /// itself.
    fn accepts_control_from(&self, host: &dyn Host, origin: &str) -> bool {
        if self.settings.origin_policy.is_trusted(origin) {
            return true;
        }
        host.page_url()
            .map(|url| url.origin())
            .filter(|page| page.is_tuple())
            .is_some_and(|page| page.ascii_serialization() == origin)
    }

    fn open_modal_reporting(&mut self, host: &mut dyn Host, link: &str, overrides: Option<&ParamSet>) -> bool {
        match self.open_modal(host, link, overrides) {
            Ok(_) => true,
            Err(err) => {
                warn!(link, error = %err, "failed to open booking modal");
                false
            }
        }
    }

    fn report_init_failure(&self, surface: &str, err: &HostError) {
        self.context.notifier.report(
            Notification::new(Level::Error, format!("Failed to set up the {surface}"))
                .with_context("init")
                .with_error(err),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_deserialize_from_tagged_json() {
        let click: WidgetEvent = serde_json::from_value(json!({"kind": "click", "target": 4})).unwrap();
        assert_eq!(click, WidgetEvent::Click { target: ElementId(4) });

        let key: WidgetEvent = serde_json::from_value(json!({"kind": "key-down", "key": "Escape"})).unwrap();
        assert_eq!(key, WidgetEvent::KeyDown { key: Key::Escape });

        let message: WidgetEvent = serde_json::from_value(json!({
            "kind": "message",
            "origin": "https://cal.meetergo.com",
            "data": {"type": "meetergo:height-update", "height": 640},
            "source": 7
        }))
        .unwrap();
        let WidgetEvent::Message(message) = message else {
            panic!("expected a message event");
        };
        assert_eq!(message.source, Some(ElementId(7)));

        let media: WidgetEvent =
            serde_json::from_value(json!({"kind": "media", "video": 3, "event": "ended"})).unwrap();
        assert_eq!(
            media,
            WidgetEvent::Media {
                video: ElementId(3),
                event: MediaEvent::Ended
            }
        );
    }

    #[test]
    fn script_errors_default_to_none() {
        let loaded: WidgetEvent =
            serde_json::from_value(json!({"kind": "script-loaded", "request": 1})).unwrap();
        assert_eq!(
            loaded,
            WidgetEvent::ScriptLoaded {
                request: ScriptRequestId(1),
                error: None
            }
        );
    }
}
