use serde::Deserialize;
use tracing::{debug, info};

use crate::context::WidgetContext;
use crate::host::{closest, ElementId, Host, HostError, ScriptRequestId};
use crate::notify::{Backoff, Level, Notification};
use crate::settings::VideoSettings;
use crate::timers::{TimerFire, TimerId, TimerKind};

use super::{create_with_class, mount, BASE_CSS};

pub const HLS_SCRIPT_URL: &str = "https://cdn.jsdelivr.net/npm/hls.js@1";
const HIDDEN: &str = "meetergo-hidden";
const EXPANDED: &str = "meetergo-video-expanded";

const VIDEO_CSS: &str = "\
.meetergo-video-embed{position:fixed;z-index:9995;overflow:hidden;border-radius:12px;box-shadow:0 6px 20px rgba(0,0,0,.25);cursor:pointer;transition:width .3s,height .3s}\
.meetergo-video-embed video{width:100%;height:100%;object-fit:cover}\
.meetergo-video-expanded{width:360px!important;height:640px!important;cursor:default}\
.meetergo-video-close{position:absolute;top:6px;right:6px;border:none;background:rgba(0,0,0,.5);color:#fff;border-radius:50%;cursor:pointer}\
.meetergo-video-book{position:absolute;bottom:12px;left:50%;transform:translateX(-50%);border:none;border-radius:20px;padding:8px 16px;background:#0a64bc;color:#fff;cursor:pointer}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoState {
    #[default]
    Closed,
    /// Small muted autoplaying teaser.
    Mini,
    Expanded,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoAction {
    Expand,
    Minimize,
    TogglePause,
    Close,
    Book,
}

/// Media element events forwarded by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaEvent {
    Play,
    Pause,
    Ended,
    Error,
}

#[derive(Debug, Clone, Copy)]
struct VideoElements {
    root: ElementId,
    video: ElementId,
    close_button: ElementId,
    book_button: ElementId,
}

pub struct VideoEmbed {
    context: WidgetContext,
    settings: VideoSettings,
    backoff: Backoff,
    state: VideoState,
    is_playing: bool,
    is_muted: bool,
    is_paused: bool,
    elements: Option<VideoElements>,
    /// Outstanding HLS script load; completions for any other request are
    /// stale and ignored.
    pending_script: Option<ScriptRequestId>,
    failed_attempts: u32,
    retry_timer: Option<TimerId>,
}

impl VideoEmbed {
    pub fn new(context: WidgetContext, settings: VideoSettings) -> Self {
        Self {
            context,
            settings,
            backoff: Backoff::default(),
            state: VideoState::Closed,
            is_playing: false,
            is_muted: true,
            is_paused: false,
            elements: None,
            pending_script: None,
            failed_attempts: 0,
            retry_timer: None,
        }
    }

    pub fn state(&self) -> VideoState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn is_muted(&self) -> bool {
        self.is_muted
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    pub fn booking_link(&self) -> &str {
        &self.settings.booking_link
    }

    pub fn root(&self) -> Option<ElementId> {
        self.elements.map(|elements| elements.root)
    }

    pub fn video_element(&self) -> Option<ElementId> {
        self.elements.map(|elements| elements.video)
    }

    /// Show the teaser, building it on first use, and start muted playback.
    pub fn open(&mut self, host: &mut dyn Host) -> Result<(), HostError> {
        let elements = match self.elements {
            Some(elements) => elements,
            None => self.build(host)?,
        };
        host.remove_class(elements.root, HIDDEN);
        host.remove_class(elements.root, EXPANDED);
        self.state = VideoState::Mini;
        self.set_muted(host, elements.video, true);
        self.play(host, elements.video);
        Ok(())
    }

    pub fn expand(&mut self, host: &mut dyn Host) -> bool {
        let Some(elements) = self.elements else {
            return false;
        };
        if !matches!(self.state, VideoState::Mini | VideoState::Paused) {
            return false;
        }
        host.add_class(elements.root, EXPANDED);
        self.state = VideoState::Expanded;
        self.set_muted(host, elements.video, false);
        self.play(host, elements.video);
        true
    }

    pub fn minimize(&mut self, host: &mut dyn Host) -> bool {
        let Some(elements) = self.elements else {
            return false;
        };
        if !matches!(self.state, VideoState::Expanded | VideoState::Paused) {
            return false;
        }
        host.remove_class(elements.root, EXPANDED);
        self.state = VideoState::Mini;
        self.set_muted(host, elements.video, true);
        self.play(host, elements.video);
        true
    }

    pub fn toggle_pause(&mut self, host: &mut dyn Host) -> bool {
        let Some(elements) = self.elements else {
            return false;
        };
        match self.state {
            VideoState::Expanded => {
                host.pause(elements.video);
                self.state = VideoState::Paused;
                self.is_playing = false;
                self.is_paused = true;
                true
            }
            VideoState::Paused => {
                self.state = VideoState::Expanded;
                self.play(host, elements.video);
                true
            }
            VideoState::Closed | VideoState::Mini => false,
        }
    }

    pub fn close(&mut self, host: &mut dyn Host) {
        if let Some(elements) = self.elements {
            host.pause(elements.video);
            host.remove_class(elements.root, EXPANDED);
            host.add_class(elements.root, HIDDEN);
        }
        self.state = VideoState::Closed;
        self.is_playing = false;
        self.is_paused = false;
    }

    pub fn handle_click(&self, host: &dyn Host, target: ElementId) -> Option<VideoAction> {
        let elements = self.elements?;
        if closest(host, target, |el| el == elements.close_button).is_some() {
            return Some(VideoAction::Close);
        }
        if closest(host, target, |el| el == elements.book_button).is_some() {
            return Some(VideoAction::Book);
        }
        closest(host, target, |el| el == elements.root)?;
        match self.state {
            VideoState::Mini => Some(VideoAction::Expand),
            VideoState::Expanded | VideoState::Paused => Some(VideoAction::TogglePause),
            VideoState::Closed => None,
        }
    }

    pub fn perform(&mut self, host: &mut dyn Host, action: VideoAction) {
        match action {
            VideoAction::Expand => {
                self.expand(host);
            }
            VideoAction::Minimize => {
                self.minimize(host);
            }
            VideoAction::TogglePause => {
                self.toggle_pause(host);
            }
            VideoAction::Close => self.close(host),
            // Opening the booking surface is the widget's job.
            VideoAction::Book => {
                self.minimize(host);
            }
        }
    }

    pub fn on_media(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::Play => {
                self.is_playing = true;
                self.is_paused = false;
            }
            MediaEvent::Pause | MediaEvent::Ended => self.is_playing = false,
            MediaEvent::Error => {
                self.is_playing = false;
                self.context.notifier.report(
                    Notification::new(Level::Warning, "The video could not be played")
                        .with_context("video"),
                );
            }
        }
    }

    /// Handle completion of a script request. Returns `false` if the request
    /// is not one this video is waiting for.
    pub fn on_script_loaded(
        &mut self,
        host: &mut dyn Host,
        request: ScriptRequestId,
        error: Option<&str>,
    ) -> bool {
        if self.pending_script != Some(request) {
            return false;
        }
        self.pending_script = None;
        // The video may have been torn down while the script loaded.
        let Some(elements) = self.elements else {
            return true;
        };

        match error {
            None => {
                self.failed_attempts = 0;
                host.set_attribute(elements.video, "data-hls", "true");
                host.set_attribute(elements.video, "src", &self.settings.video_src);
                info!(src = %self.settings.video_src, "attached HLS video source");
                if matches!(self.state, VideoState::Mini | VideoState::Expanded) {
                    self.play(host, elements.video);
                }
            }
            Some(cause) => {
                self.failed_attempts += 1;
                match self.backoff.retry_action(self.failed_attempts) {
                    Some(retry) => {
                        self.context.notifier.report(
                            Notification::new(Level::Warning, "Loading the video is taking longer than usual")
                                .with_context("video")
                                .with_error(cause)
                                .with_retry(retry),
                        );
                        self.retry_timer = Some(self.context.timers.set_timeout(
                            tokio::time::Duration::from_millis(retry.delay_ms),
                            TimerKind::RetryScript(elements.video),
                        ));
                    }
                    None => {
                        self.context.notifier.report(
                            Notification::new(Level::Error, "The video could not be loaded")
                                .with_context("video")
                                .with_error(cause),
                        );
                    }
                }
            }
        }
        true
    }

    pub fn on_timer(&mut self, host: &mut dyn Host, fire: TimerFire) -> bool {
        let TimerKind::RetryScript(video) = fire.kind else {
            return false;
        };
        if self.video_element() != Some(video) || self.retry_timer != Some(fire.timer_id) {
            return false;
        }
        self.retry_timer = None;
        debug!(attempt = self.failed_attempts + 1, "retrying HLS script load");
        self.pending_script = Some(host.request_script(HLS_SCRIPT_URL));
        true
    }

    pub fn teardown(&mut self, host: &mut dyn Host) {
        if let Some(timer) = self.retry_timer.take() {
            self.context.timers.clear_timer(timer);
        }
        self.pending_script = None;
        if let Some(elements) = self.elements.take() {
            host.pause(elements.video);
            host.remove_element(elements.root);
        }
        self.state = VideoState::Closed;
        self.is_playing = false;
        self.is_paused = false;
    }

    fn build(&mut self, host: &mut dyn Host) -> Result<VideoElements, HostError> {
        self.context.styles.inject(host, "base", BASE_CSS)?;
        self.context.styles.inject(host, "video", VIDEO_CSS)?;

        let root = create_with_class(host, "div", "meetergo-video-embed")?;
        for (property, value) in self.settings.position.declarations() {
            host.set_style(root, property, value);
        }
        host.set_style(root, "width", &format!("{}px", self.settings.width));
        host.set_style(root, "height", &format!("{}px", self.settings.height));

        let video = host.create_element("video")?;
        host.set_attribute(video, "playsinline", "");
        host.set_attribute(video, "loop", "");
        host.set_attribute(video, "muted", "");
        if let Some(poster) = &self.settings.poster_image {
            host.set_attribute(video, "poster", poster);
        }

        let close_button = create_with_class(host, "button", "meetergo-video-close")?;
        host.set_attribute(close_button, "aria-label", "Close video");
        host.set_text_content(close_button, "\u{00d7}");
        let book_button = create_with_class(host, "button", "meetergo-video-book")?;
        host.set_text_content(book_button, "Book now");

        host.append_child(root, video);
        host.append_child(root, close_button);
        host.append_child(root, book_button);
        mount(host, root)?;

        let elements = VideoElements {
            root,
            video,
            close_button,
            book_button,
        };
        self.elements = Some(elements);
        self.attach_source(host, video);
        Ok(elements)
    }

    fn attach_source(&mut self, host: &mut dyn Host, video: ElementId) {
        if is_hls_source(&self.settings.video_src) && !host.supports_native_hls(video) {
            debug!(src = %self.settings.video_src, "loading HLS support");
            self.pending_script = Some(host.request_script(HLS_SCRIPT_URL));
        } else {
            host.set_attribute(video, "src", &self.settings.video_src);
        }
    }

    fn play(&mut self, host: &mut dyn Host, video: ElementId) {
        host.play(video);
        self.is_playing = true;
        self.is_paused = false;
    }

    fn set_muted(&mut self, host: &mut dyn Host, video: ElementId, muted: bool) {
        host.set_muted(video, muted);
        self.is_muted = muted;
    }
}

fn is_hls_source(src: &str) -> bool {
    let path = src.split(['?', '#']).next().unwrap_or(src);
    path.to_ascii_lowercase().ends_with(".m3u8")
}
