use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use meetergo_embed::host::{ElementId, Host, MemoryHost};
use meetergo_embed::{MeetergoWidget, WidgetContext, WidgetEvent, WidgetSettings};
use serde::Deserialize;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

/// One line of a replay script.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReplayStep {
    /// Let time pass, then run whatever timers fired.
    Advance { advance_ms: u64 },
    /// Deliver `load` for every frame that has not loaded yet.
    LoadFrames { load_frames: bool },
    Event(WidgetEvent),
}

fn main() -> Result<()> {
    let subscriber_result = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
    if subscriber_result.is_err() {
        // tracing was already initialised; continue silently
    }

    let mut args = env::args().skip(1);
    let page_path = args
        .next()
        .map(PathBuf::from)
        .context("usage: meetergo-embed <page.html> [events.jsonl]")?;
    let events_path = args.next().map(PathBuf::from);

    let settings_path = env::var("MEETERGO_SETTINGS")
        .ok()
        .filter(|path| !path.is_empty())
        .map(PathBuf::from);
    let settings = WidgetSettings::load(settings_path.as_deref())
        .context("failed to load widget settings")?;

    let html = fs::read_to_string(&page_path)
        .with_context(|| format!("failed to read page {}", page_path.display()))?;
    let mut host = MemoryHost::from_html(&html);
    if let Ok(raw) = env::var("MEETERGO_PAGE_URL") {
        let url = Url::parse(&raw).with_context(|| format!("invalid MEETERGO_PAGE_URL {raw}"))?;
        host = host.with_page_url(url);
    }

    let steps = match &events_path {
        Some(path) => load_steps(path)?,
        None => Vec::new(),
    };

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build the tokio runtime")?;

    rt.block_on(replay(&mut host, settings, steps));

    println!("{}", host.html());
    Ok(())
}

fn load_steps(path: &Path) -> Result<Vec<ReplayStep>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read replay script {}", path.display()))?;
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("invalid replay step on line {}", index + 1))
        })
        .collect()
}

async fn replay(host: &mut MemoryHost, settings: WidgetSettings, steps: Vec<ReplayStep>) {
    let mut widget = MeetergoWidget::new(settings, WidgetContext::new());
    widget.init(host);

    let mut loaded: BTreeSet<ElementId> = BTreeSet::new();
    for step in steps {
        match step {
            ReplayStep::Advance { advance_ms } => {
                sleep(Duration::from_millis(advance_ms)).await;
                let fired = widget.poll_timers(host);
                info!(advance_ms, fired, "advanced time");
            }
            ReplayStep::LoadFrames { load_frames } => {
                if !load_frames {
                    continue;
                }
                for frame in host.elements_by_tag("iframe") {
                    if loaded.insert(frame) {
                        widget.handle_event(host, WidgetEvent::FrameLoaded { frame });
                    }
                }
            }
            ReplayStep::Event(event) => {
                if !widget.handle_event(host, event.clone()) {
                    warn!(?event, "event was not handled");
                }
            }
        }
    }

    for frame in widget.sync().managed_frames() {
        info!(
            frame = %frame,
            src = host.attribute(frame, "src").as_deref().unwrap_or(""),
            height = host.style(frame, "height").as_deref().unwrap_or("auto"),
            fallback = ?widget.sync().fallback_state(frame),
            "managed frame"
        );
    }
    for payload in widget.booking_events() {
        info!(%payload, "booking event");
    }
}
