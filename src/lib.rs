//! Embeddable booking widget: auto-resizing booking frames, parameter
//! forwarding and the modal, sidebar, button and video surfaces around them.
//!
//! The widget never touches a real browser. Everything it needs from the page
//! goes through [`host::Host`]; [`host::MemoryHost`] is an in-memory
//! implementation used by the replay binary and the tests.

pub mod context;
pub mod host;
pub mod notify;
pub mod params;
pub mod settings;
pub mod sync;
pub mod timers;
pub mod ui;
pub mod widget;

pub use context::WidgetContext;
pub use host::{ElementId, Host, HostError, MemoryHost};
pub use settings::WidgetSettings;
pub use sync::HeightSyncController;
pub use widget::{MeetergoWidget, WidgetEvent};
