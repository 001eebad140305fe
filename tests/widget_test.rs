use keyboard_types::Key;
use meetergo_embed::host::{ElementId, Host, MemoryHost};
use meetergo_embed::settings::{ButtonAction, FloatingButtonSettings, FormListener, SidebarSettings};
use meetergo_embed::sync::message::{MessageEvent, REQUEST_HEIGHT_TYPE};
use meetergo_embed::ui::embed::INLINE_EMBED_CLASS;
use meetergo_embed::ui::modal::MODAL_ROOT_ID;
use meetergo_embed::ui::SPINNER_CLASS;
use meetergo_embed::{MeetergoWidget, WidgetContext, WidgetEvent, WidgetSettings};
use serde_json::{json, Map, Value};
use tokio::time::{sleep, Duration};
use url::Url;

const PAGE: &str = r#"<html><head></head><body>
    <div class="meetergo-iframe" link="https://cal.meetergo.com/x"></div>
    <button id="book" class="meetergo-modal-button" link="https://cal.meetergo.com/acme/intro"><span id="label">Book</span></button>
    <form id="lead-form"></form>
</body></html>"#;

fn host() -> MemoryHost {
    let url = Url::parse("https://shop.example/landing?a=1&campaign=spring&empty=").unwrap();
    MemoryHost::from_html(PAGE).with_page_url(url)
}

fn prefill() -> Map<String, Value> {
    let Value::Object(map) = json!({ "firstname": "Ada Lovelace", "company": null }) else {
        unreachable!()
    };
    map
}

fn widget(settings: WidgetSettings) -> MeetergoWidget {
    MeetergoWidget::new(settings, WidgetContext::new())
}

async fn advance(widget: &mut MeetergoWidget, host: &mut MemoryHost, ms: u64) {
    sleep(Duration::from_millis(ms)).await;
    tokio::task::yield_now().await;
    widget.poll_timers(host);
}

fn message(origin: &str, data: Value, source: Option<ElementId>) -> WidgetEvent {
    WidgetEvent::Message(MessageEvent {
        origin: origin.to_string(),
        data,
        source,
    })
}

#[tokio::test(start_paused = true)]
async fn inline_embed_loads_and_resizes_from_a_cooperative_reply() {
    let mut host = host();
    let mut widget = widget(WidgetSettings {
        prefill: prefill(),
        ..WidgetSettings::default()
    });
    widget.init(&mut host);

    let embed = widget.inline_embeds()[0];
    let frame = embed.iframe;
    assert_eq!(
        host.attribute(frame, "src").as_deref(),
        Some("https://cal.meetergo.com/x?a=1&campaign=spring&firstname=Ada%20Lovelace")
    );
    let container = host.elements_by_class(INLINE_EMBED_CLASS)[0];
    assert_eq!(host.parent(frame), Some(container));
    assert!(widget.sync().is_managed(frame));

    assert!(widget.handle_event(&mut host, WidgetEvent::FrameLoaded { frame }));
    assert!(host.elements_by_class(SPINNER_CLASS).is_empty());

    advance(&mut widget, &mut host, 1010).await;
    let requests: Vec<&Value> = host.messages_to(frame);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["type"], REQUEST_HEIGHT_TYPE);

    let reply = json!({ "type": "meetergo:height-update", "height": "823" });
    assert!(widget.handle_event(
        &mut host,
        message("https://cal.meetergo.com", reply, Some(frame))
    ));
    assert_eq!(host.style(frame, "height").as_deref(), Some("823px"));
}

#[tokio::test(start_paused = true)]
async fn attacker_messages_leave_every_frame_alone() {
    let mut host = host();
    let mut widget = widget(WidgetSettings::default());
    widget.init(&mut host);
    let frame = widget.inline_embeds()[0].iframe;
    advance(&mut widget, &mut host, 200).await;

    let forged = json!({ "type": "meetergo:height-update", "height": "9999" });
    assert!(!widget.handle_event(
        &mut host,
        message("https://attacker.example", forged, Some(frame))
    ));
    let open = json!({ "event": "open-modal", "data": { "link": "https://evil.example" } });
    assert!(!widget.handle_event(&mut host, message("https://attacker.example", open, None)));

    assert_eq!(host.style(frame, "height"), None);
    assert!(!widget.modal().is_open());
}

#[tokio::test(start_paused = true)]
async fn modal_button_opens_and_escape_closes() {
    let mut host = host();
    let mut widget = widget(WidgetSettings::default());
    widget.init(&mut host);

    let label = host.element_by_id("label").unwrap();
    assert!(widget.handle_event(&mut host, WidgetEvent::Click { target: label }));
    assert!(widget.modal().is_open());
    let frame = widget.modal().iframe().unwrap();
    assert_eq!(
        host.attribute(frame, "src").as_deref(),
        Some("https://cal.meetergo.com/acme/intro?a=1&campaign=spring")
    );
    assert!(widget.sync().is_managed(frame));
    assert!(host.element_by_id(MODAL_ROOT_ID).is_some());

    assert!(widget.handle_event(&mut host, WidgetEvent::KeyDown { key: Key::Escape }));
    assert!(!widget.modal().is_open());
    assert!(!widget.sync().is_managed(frame));
    assert!(!host.is_connected(frame));

    assert!(!widget.handle_event(&mut host, WidgetEvent::KeyDown { key: Key::Enter }));
}

#[tokio::test(start_paused = true)]
async fn reopening_the_modal_releases_the_previous_frame() {
    let mut host = host();
    let mut widget = widget(WidgetSettings::default());
    widget.init(&mut host);

    let first = widget.open_modal(&mut host, "https://cal.meetergo.com/a", None).unwrap();
    let second = widget.open_modal(&mut host, "https://cal.meetergo.com/b", None).unwrap();
    assert_ne!(first, second);
    assert!(!widget.sync().is_managed(first));
    assert!(widget.sync().is_managed(second));
    assert_eq!(host.elements_by_tag("iframe").len(), 2, "inline embed plus one modal frame");
}

#[tokio::test(start_paused = true)]
async fn form_submission_opens_the_modal_with_captured_fields() {
    let mut host = host();
    let mut widget = widget(WidgetSettings {
        form_listeners: vec![FormListener {
            form_id: "lead-form".into(),
            link: "https://cal.meetergo.com/acme/demo".into(),
        }],
        ..WidgetSettings::default()
    });
    widget.init(&mut host);

    let form = host.element_by_id("lead-form").unwrap();
    let submitted = widget.handle_event(
        &mut host,
        WidgetEvent::Submit {
            form,
            fields: vec![
                ("email".into(), "ada@example.com".into()),
                ("campaign".into(), "form".into()),
                ("phone".into(), String::new()),
            ],
        },
    );
    assert!(submitted);
    let frame = widget.modal().iframe().unwrap();
    assert_eq!(
        host.attribute(frame, "src").as_deref(),
        Some("https://cal.meetergo.com/acme/demo?a=1&campaign=form&email=ada%40example.com")
    );
}

#[tokio::test(start_paused = true)]
async fn control_messages_from_trusted_or_own_origin() {
    let mut host = host();
    let mut widget = widget(WidgetSettings::default());
    widget.init(&mut host);

    let open = json!({
        "event": "open-modal",
        "data": { "link": "https://cal.meetergo.com/acme/call", "params": { "lang": "de" } }
    });
    assert!(widget.handle_event(&mut host, message("https://shop.example", open, None)));
    let frame = widget.modal().iframe().unwrap();
    assert_eq!(
        host.attribute(frame, "src").as_deref(),
        Some("https://cal.meetergo.com/acme/call?a=1&campaign=spring&lang=de")
    );

    let booked = json!({ "event": "booking-successful", "data": { "appointmentId": "42" } });
    assert!(widget.handle_event(&mut host, message("https://cal.meetergo.com", booked, None)));
    assert_eq!(widget.booking_events(), [json!({ "appointmentId": "42" })]);

    let close = json!({ "event": "close-modal" });
    assert!(widget.handle_event(&mut host, message("https://cal.meetergo.com", close, None)));
    assert!(!widget.modal().is_open());
}

#[tokio::test(start_paused = true)]
async fn set_prefill_repoints_open_frames() {
    let mut host = host();
    let mut widget = widget(WidgetSettings {
        sidebar: Some(SidebarSettings {
            link: "https://cal.meetergo.com/acme/sidebar".into(),
            position: Default::default(),
            width: "400px".into(),
            button_text: "Book".into(),
        }),
        ..WidgetSettings::default()
    });
    widget.init(&mut host);
    let modal_frame = widget
        .open_modal(&mut host, "https://cal.meetergo.com/acme/intro", None)
        .unwrap();

    widget.set_prefill(&mut host, prefill());
    assert_eq!(
        host.attribute(modal_frame, "src").as_deref(),
        Some("https://cal.meetergo.com/acme/intro?a=1&campaign=spring&firstname=Ada%20Lovelace")
    );
    let sidebar_frame = widget.sidebar().and_then(|sidebar| sidebar.iframe()).unwrap();
    assert_eq!(
        host.attribute(sidebar_frame, "src").as_deref(),
        Some("https://cal.meetergo.com/acme/sidebar?a=1&campaign=spring&firstname=Ada%20Lovelace")
    );
}

#[tokio::test(start_paused = true)]
async fn floating_button_actions() {
    let mut host = host();
    let mut widget = widget(WidgetSettings {
        floating_button: Some(FloatingButtonSettings {
            link: "https://cal.meetergo.com/acme/intro".into(),
            text: "Book".into(),
            position: Default::default(),
            action: ButtonAction::Link,
        }),
        ..WidgetSettings::default()
    });
    widget.init(&mut host);

    let button = widget.floating_button().unwrap().element();
    assert!(widget.handle_event(&mut host, WidgetEvent::Click { target: button }));
    assert_eq!(
        host.opened_windows(),
        ["https://cal.meetergo.com/acme/intro?a=1&campaign=spring".to_string()]
    );
    assert!(!widget.modal().is_open());
}

#[tokio::test(start_paused = true)]
async fn parent_height_is_reported_only_when_enabled_and_framed() {
    let mut host = host();
    host.set_embedded(true, 1480);
    let mut quiet = widget(WidgetSettings::default());
    quiet.init(&mut host);
    assert!(host.parent_messages().is_empty());

    let mut reporting = widget(WidgetSettings {
        enable_parent_height_report: true,
        ..WidgetSettings::default()
    });
    reporting.init(&mut host);
    assert_eq!(host.parent_messages(), [json!({ "scrollHeight": 1480 })]);
}

#[tokio::test(start_paused = true)]
async fn teardown_releases_everything() {
    let mut host = host();
    let mut widget = widget(WidgetSettings::default());
    widget.init(&mut host);
    let inline = widget.inline_embeds()[0].iframe;
    widget.handle_event(&mut host, WidgetEvent::FrameLoaded { frame: inline });
    widget
        .open_modal(&mut host, "https://cal.meetergo.com/acme/intro", None)
        .unwrap();
    advance(&mut widget, &mut host, 1100).await;
    advance(&mut widget, &mut host, 2100).await;
    assert!(host.observer_count() > 0);

    widget.teardown(&mut host);
    assert!(widget.sync().managed_frames().is_empty());
    assert_eq!(widget.context().timers.active_count(), 0);
    assert_eq!(host.observer_count(), 0);
    assert!(host.elements_by_tag("iframe").is_empty());
    assert!(host.element_by_id(MODAL_ROOT_ID).is_none());
}
