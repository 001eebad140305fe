/// How a managed frame's height is currently being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackState {
    /// Waiting on (or receiving) height reports from the embedded page.
    #[default]
    AwaitingCooperative,
    /// Reading the frame document directly.
    SameOriginProbe,
    /// Observers re-request the height whenever layout or visibility changes.
    ObserverFallback,
    /// No mechanism left; the frame keeps its current height.
    Disabled,
}

/// Events that move a frame along the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Posting the height request threw.
    RequestFailed,
    /// No height report arrived within the response window.
    ResponseTimedOut,
    ProbeSucceeded,
    ProbeDenied,
    /// Neither observer could be installed.
    NoObservers,
}

impl FallbackState {
    pub fn next(self, trigger: Trigger) -> Self {
        use FallbackState::*;

        match (self, trigger) {
            (Disabled, _) => Disabled,
            (_, Trigger::RequestFailed | Trigger::ResponseTimedOut) => SameOriginProbe,
            (SameOriginProbe, Trigger::ProbeSucceeded) => AwaitingCooperative,
            (SameOriginProbe, Trigger::ProbeDenied) => ObserverFallback,
            (ObserverFallback, Trigger::NoObservers) => Disabled,
            (state, _) => state,
        }
    }

    pub fn is_disabled(self) -> bool {
        self == FallbackState::Disabled
    }
}
