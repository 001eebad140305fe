//! Height synchronisation for auto-resizing embedded frames.
//!
//! Each managed frame asks its embedded page for cooperative height reports
//! shortly after it loads. Reports from trusted origins are parsed, throttled
//! and applied. When the page cannot be reached the controller falls back to
//! reading a same-origin document, then to observers that keep re-requesting
//! the height, and finally gives up quietly.

pub mod applier;
pub mod fallback;
pub mod message;
pub mod origin;
pub mod throttle;

use std::collections::BTreeMap;

use tokio::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::context::WidgetContext;
use crate::host::{src_origin, ElementId, Host, HostError, ObserverId, ObserverKind};
use crate::notify::{Level, Notification};
use crate::timers::{TimerFire, TimerId, TimerKind};

use self::applier::{apply_height, clear_transition, Applied};
use self::fallback::{FallbackState, Trigger};
use self::message::{request_height_message, HeightMessage, MessageEvent};
use self::origin::OriginPolicy;
use self::throttle::{decide, Decision, HeightState, HeightUpdateConfig, PendingUpdate};

/// Delay between a frame's `load` event and the first height request.
pub const REQUEST_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Timers, observers and the message subscription held for one frame.
#[derive(Debug, Default)]
struct FrameResources {
    request: Option<TimerId>,
    liveness: Option<TimerId>,
    transition: Option<TimerId>,
    observers: Vec<ObserverId>,
    listening: bool,
}

#[derive(Debug)]
struct ManagedFrame {
    config: HeightUpdateConfig,
    height: HeightState,
    fallback: FallbackState,
    /// Origin of the frame's `src`, used to route messages without a source.
    origin: Option<String>,
    awaiting_response: bool,
    resources: FrameResources,
}

pub struct HeightSyncController {
    context: WidgetContext,
    policy: OriginPolicy,
    response_timeout: Duration,
    frames: BTreeMap<ElementId, ManagedFrame>,
}

impl HeightSyncController {
    pub fn new(context: WidgetContext, policy: OriginPolicy, response_timeout: Duration) -> Self {
        Self {
            context,
            policy,
            response_timeout,
            frames: BTreeMap::new(),
        }
    }

    /// Start managing `frame`. Returns `false` if it is already managed.
    pub fn manage(&mut self, host: &dyn Host, frame: ElementId, config: HeightUpdateConfig) -> bool {
        if self.frames.contains_key(&frame) {
            return false;
        }
        let origin = src_origin(host, frame);
        debug!(frame = %frame, origin = origin.as_deref().unwrap_or("unknown"), "managing frame height");
        self.frames.insert(
            frame,
            ManagedFrame {
                config,
                height: HeightState::new(Instant::now()),
                fallback: FallbackState::default(),
                origin,
                awaiting_response: false,
                resources: FrameResources {
                    listening: true,
                    ..FrameResources::default()
                },
            },
        );
        true
    }

    pub fn is_managed(&self, frame: ElementId) -> bool {
        self.frames.contains_key(&frame)
    }

    pub fn managed_frames(&self) -> Vec<ElementId> {
        self.frames.keys().copied().collect()
    }

    pub fn fallback_state(&self, frame: ElementId) -> Option<FallbackState> {
        self.frames.get(&frame).map(|managed| managed.fallback)
    }

    pub fn height_state(&self, frame: ElementId) -> Option<&HeightState> {
        self.frames.get(&frame).map(|managed| &managed.height)
    }

    /// Schedule the cooperative height request after the frame has loaded.
    pub fn on_frame_loaded(&mut self, frame: ElementId) -> bool {
        let Some(managed) = self.frames.get_mut(&frame) else {
            return false;
        };
        if let Some(previous) = managed.resources.request.take() {
            self.context.timers.clear_timer(previous);
        }
        managed.resources.request = Some(
            self.context
                .timers
                .set_timeout(REQUEST_DELAY, TimerKind::RequestHeight(frame)),
        );
        true
    }

    /// Handle a `message` event. Returns `true` if a height report was
    /// accepted for a managed frame.
    pub fn on_message(&mut self, host: &mut dyn Host, event: &MessageEvent) -> bool {
        if !self.policy.is_trusted(&event.origin) {
            trace!(origin = %event.origin, "dropping message from untrusted origin");
            return false;
        }
        let Some(report) = HeightMessage::parse(&event.data) else {
            return false;
        };

        let Some(frame) = self.route(event) else {
            trace!(origin = %event.origin, "height report matched no managed frame");
            return false;
        };
        self.accept_height(host, frame, report.height());
        true
    }

    pub fn on_observer(&mut self, host: &mut dyn Host, observer: ObserverId) -> bool {
        let owner = self
            .frames
            .iter()
            .find(|(_, managed)| managed.resources.observers.contains(&observer))
            .map(|(frame, _)| *frame);
        match owner {
            Some(frame) => {
                self.request_height(host, frame);
                true
            }
            None => false,
        }
    }

    /// Handle a timer fire. Returns `false` for timers this controller does
    /// not own.
    pub fn on_timer(&mut self, host: &mut dyn Host, fire: TimerFire) -> bool {
        match fire.kind {
            TimerKind::TrailingHeight(frame) => {
                let Some(managed) = self.frames.get_mut(&frame) else {
                    return true;
                };
                let pending = managed.height.pending;
                if let Some(pending) = pending.filter(|p| p.timer == fire.timer_id) {
                    managed.height.pending = None;
                    self.apply_now(host, frame, pending.height);
                }
                true
            }
            TimerKind::RequestHeight(frame) => {
                if let Some(managed) = self.frames.get_mut(&frame) {
                    managed.resources.request = None;
                    self.request_height(host, frame);
                }
                true
            }
            TimerKind::LivenessCheck(frame) => {
                let timed_out = match self.frames.get_mut(&frame) {
                    Some(managed) => {
                        managed.resources.liveness = None;
                        managed.awaiting_response
                    }
                    None => false,
                };
                if timed_out {
                    debug!(frame = %frame, "no height report received, probing frame document");
                    self.transition(frame, Trigger::ResponseTimedOut);
                    self.probe(host, frame);
                }
                true
            }
            TimerKind::ClearTransition(frame) => {
                if let Some(managed) = self.frames.get_mut(&frame) {
                    managed.resources.transition = None;
                    clear_transition(host, frame);
                }
                true
            }
            TimerKind::DismissNotification(_) | TimerKind::RetryScript(_) => false,
        }
    }

    /// Stop managing `frame`, releasing every timer, observer and the
    /// message subscription held for it.
    pub fn release(&mut self, host: &mut dyn Host, frame: ElementId) -> bool {
        let Some(mut managed) = self.frames.remove(&frame) else {
            return false;
        };
        let timers = &self.context.timers;
        if let Some(pending) = managed.height.pending.take() {
            timers.clear_timer(pending.timer);
        }
        for timer in [
            managed.resources.request.take(),
            managed.resources.liveness.take(),
            managed.resources.transition.take(),
        ]
        .into_iter()
        .flatten()
        {
            timers.clear_timer(timer);
        }
        for observer in managed.resources.observers.drain(..) {
            host.disconnect(observer);
        }
        managed.resources.listening = false;
        debug!(frame = %frame, "released frame height management");
        true
    }

    pub fn release_all(&mut self, host: &mut dyn Host) {
        for frame in self.managed_frames() {
            self.release(host, frame);
        }
    }

    /// Ask the embedded page to report its height.
    pub fn request_height(&mut self, host: &mut dyn Host, frame: ElementId) {
        let Some(managed) = self.frames.get(&frame) else {
            return;
        };
        if managed.fallback.is_disabled() {
            return;
        }
        let target_origin = managed.origin.clone().unwrap_or_else(|| "*".to_string());

        match host.post_message(frame, &request_height_message(), &target_origin) {
            Ok(()) => {
                let timeout = self.response_timeout;
                let timers = &self.context.timers;
                if let Some(managed) = self.frames.get_mut(&frame) {
                    managed.awaiting_response = true;
                    if let Some(previous) = managed.resources.liveness.take() {
                        timers.clear_timer(previous);
                    }
                    managed.resources.liveness =
                        Some(timers.set_timeout(timeout, TimerKind::LivenessCheck(frame)));
                }
            }
            Err(err) => {
                debug!(frame = %frame, error = %err, "height request failed, probing frame document");
                self.transition(frame, Trigger::RequestFailed);
                self.probe(host, frame);
            }
        }
    }

    /// The single frame a report belongs to. A report naming its source
    /// frame goes to that frame only; without a source it is accepted only
    /// when exactly one managed frame shares its origin.
    fn route(&self, event: &MessageEvent) -> Option<ElementId> {
        if let Some(source) = event.source {
            return self
                .frames
                .get(&source)
                .is_some_and(|managed| managed.resources.listening)
                .then_some(source);
        }

        let mut candidates = self.frames.iter().filter(|(_, managed)| {
            managed.resources.listening && managed.origin.as_deref() == Some(event.origin.as_str())
        });
        match (candidates.next(), candidates.next()) {
            (Some((frame, _)), None) => Some(*frame),
            (Some(_), Some(_)) => {
                trace!(origin = %event.origin, "height report without a source is ambiguous");
                None
            }
            _ => None,
        }
    }

    fn accept_height(&mut self, host: &mut dyn Host, frame: ElementId, height: u32) {
        let timers = &self.context.timers;
        let Some(managed) = self.frames.get_mut(&frame) else {
            return;
        };
        managed.awaiting_response = false;
        if let Some(liveness) = managed.resources.liveness.take() {
            timers.clear_timer(liveness);
        }

        match decide(&managed.height, &managed.config, height, Instant::now()) {
            Decision::Discard => {
                if let Some(stale) = managed.height.pending.take() {
                    timers.clear_timer(stale.timer);
                }
                trace!(frame = %frame, height, "height change below threshold");
            }
            Decision::ApplyNow => {
                if let Some(stale) = managed.height.pending.take() {
                    timers.clear_timer(stale.timer);
                }
                self.apply_now(host, frame, height);
            }
            Decision::Defer(delay) => {
                if let Some(stale) = managed.height.pending.take() {
                    timers.clear_timer(stale.timer);
                }
                let timer = timers.set_timeout(delay, TimerKind::TrailingHeight(frame));
                managed.height.pending = Some(PendingUpdate { timer, height });
            }
        }
    }

    fn apply_now(&mut self, host: &mut dyn Host, frame: ElementId, height: u32) {
        let timers = &self.context.timers;
        let Some(managed) = self.frames.get_mut(&frame) else {
            return;
        };
        let applied = apply_height(host, frame, height, &managed.config);
        managed.height.last_height = height;
        managed.height.last_update = Instant::now();

        if let Applied::Changed(pixels) = applied {
            debug!(frame = %frame, height = pixels, "applied frame height");
            if let Some(previous) = managed.resources.transition.take() {
                timers.clear_timer(previous);
            }
            managed.resources.transition = Some(timers.set_timeout(
                managed.config.transition(),
                TimerKind::ClearTransition(frame),
            ));
        }
    }

    fn transition(&mut self, frame: ElementId, trigger: Trigger) {
        if let Some(managed) = self.frames.get_mut(&frame) {
            let next = managed.fallback.next(trigger);
            if next != managed.fallback {
                debug!(frame = %frame, from = ?managed.fallback, to = ?next, "height fallback transition");
            }
            managed.fallback = next;
        }
    }

    /// Read the frame document directly; on denial move on to observers.
    fn probe(&mut self, host: &mut dyn Host, frame: ElementId) {
        if self.fallback_state(frame) != Some(FallbackState::SameOriginProbe) {
            return;
        }
        match host.frame_document_metrics(frame) {
            Ok(metrics) => {
                self.transition(frame, Trigger::ProbeSucceeded);
                let height = metrics.content_height();
                if height > 0 {
                    self.accept_height(host, frame, height);
                }
            }
            Err(err) => {
                trace!(frame = %frame, error = %err, "same-origin probe denied");
                self.transition(frame, Trigger::ProbeDenied);
                self.install_observers(host, frame);
            }
        }
    }

    fn install_observers(&mut self, host: &mut dyn Host, frame: ElementId) {
        let already_installed = self
            .frames
            .get(&frame)
            .map(|managed| !managed.resources.observers.is_empty())
            .unwrap_or(true);
        if already_installed {
            return;
        }

        let mut installed = Vec::new();
        for kind in [ObserverKind::Resize, ObserverKind::Intersection] {
            if !host.supports_observer(kind) {
                continue;
            }
            let target = match kind {
                ObserverKind::Resize => host.parent(frame),
                ObserverKind::Intersection => Some(frame),
            };
            let Some(target) = target else {
                continue;
            };
            match host.observe(kind, target) {
                Ok(observer) => installed.push(observer),
                Err(err) => self.report_observer_failure(frame, kind, &err),
            }
        }

        if installed.is_empty() {
            debug!(frame = %frame, "no observers available, auto-resize disabled");
            self.transition(frame, Trigger::NoObservers);
            return;
        }
        if let Some(managed) = self.frames.get_mut(&frame) {
            managed.resources.observers = installed;
        }
    }

    fn report_observer_failure(&self, frame: ElementId, kind: ObserverKind, err: &HostError) {
        self.context.notifier.report(
            Notification::new(
                Level::Warning,
                format!("Automatic height adjustment is limited: {} unavailable", kind.api_name()),
            )
            .with_context(format!("height-sync frame {frame}"))
            .with_error(err),
        );
    }
}
