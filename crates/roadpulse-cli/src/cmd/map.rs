use std::collections::BTreeMap;
use std::io::{self, Write};

use anyhow::{Result, bail};
use clap::Args;
use roadpulse_core::views::ViewStats;
use roadpulse_core::views::live_map::{LiveMapView, MapCanvas, MarkerDescriptor};
use serde::Serialize;

use super::{Context, format_timestamp};
use crate::output::{pretty_kv, pretty_rule, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct MapArgs {
    /// Override the configured time window, in seconds.
    #[arg(long)]
    pub window: Option<i64>,
}

/// In-memory canvas: markers keyed by the handle it hands out.
#[derive(Debug, Default)]
pub struct TextCanvas {
    markers: BTreeMap<u32, MarkerDescriptor>,
    next: u32,
}

impl TextCanvas {
    /// Markers in draw order.
    pub fn markers(&self) -> Vec<MarkerDescriptor> {
        self.markers.values().cloned().collect()
    }
}

impl MapCanvas for TextCanvas {
    type Marker = u32;

    fn add_marker(&mut self, marker: &MarkerDescriptor) -> Result<u32> {
        let handle = self.next;
        self.next += 1;
        self.markers.insert(handle, marker.clone());
        Ok(handle)
    }

    fn update_marker(&mut self, handle: &mut u32, marker: &MarkerDescriptor) -> Result<()> {
        self.markers.insert(*handle, marker.clone());
        Ok(())
    }

    fn remove_marker(&mut self, handle: u32) -> Result<()> {
        self.markers.remove(&handle);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct MapOutput {
    signed_in: bool,
    center: [f64; 2],
    zoom: u8,
    window_secs: i64,
    markers: Vec<MarkerDescriptor>,
    stats: ViewStats,
}

/// Execute `rp map`.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or subscribed to.
pub fn run_map(args: &MapArgs, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let mut config = ctx.config.project.map.clone();
    if let Some(window) = args.window {
        if window <= 0 {
            bail!("--window must be a positive number of seconds");
        }
        config.window_secs = window;
    }
    let (center, zoom, window_secs) = (
        [config.center_latitude, config.center_longitude],
        config.zoom,
        config.window_secs,
    );

    let view = LiveMapView::open(
        &store,
        TextCanvas::default(),
        config,
        &ctx.session,
        ctx.now_us,
    )?;
    let markers = view.with_canvas(TextCanvas::markers);
    let out = MapOutput {
        signed_in: view.is_subscribed(),
        center,
        zoom,
        window_secs,
        markers,
        stats: view.close(),
    };

    render_mode(ctx.output, &out, write_text, write_pretty)
}

fn write_text(out: &MapOutput, w: &mut dyn Write) -> io::Result<()> {
    if !out.signed_in {
        return writeln!(w, "signed_out markers=0");
    }
    for m in &out.markers {
        writeln!(
            w,
            "{}\t{:.5},{:.5}\t{}\t{}\t{}",
            m.id, m.position.latitude, m.position.longitude, m.label, m.color, m.popup.title
        )?;
    }
    Ok(())
}

fn write_pretty(out: &MapOutput, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "Live traffic")?;
    pretty_kv(
        w,
        "Center",
        format!("{:.4}, {:.4} (zoom {})", out.center[0], out.center[1], out.zoom),
    )?;
    pretty_kv(w, "Window", format!("last {} min", out.window_secs / 60))?;
    if !out.signed_in {
        writeln!(w)?;
        return writeln!(w, "Sign in (--actor <uid>) to see live traffic.");
    }
    pretty_kv(w, "Markers", out.markers.len().to_string())?;
    if out.markers.is_empty() {
        return Ok(());
    }
    writeln!(w)?;
    for m in &out.markers {
        writeln!(
            w,
            "{:>4}  {:<8} {:<24} {}",
            m.label,
            m.color,
            m.popup.title,
            m.id
        )?;
        writeln!(
            w,
            "      {}  {}: {}",
            m.popup.description,
            m.popup.stage.label(),
            format_timestamp(m.popup.timestamp)
        )?;
    }
    pretty_rule(w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use roadpulse_core::model::traffic::CongestionThresholds;
    use roadpulse_core::model::{Coordinates, RecordId, TrafficSample};
    use roadpulse_core::views::live_map::PopupStage;

    fn marker(id: &str, level: u8) -> MarkerDescriptor {
        let sample = TrafficSample {
            coordinates: Coordinates {
                latitude: 10.0,
                longitude: 76.0,
            },
            congestion_level: level,
            incident_type: None,
            description: None,
            timestamp: 0,
        };
        MarkerDescriptor::describe(
            &RecordId::from(id),
            &sample,
            CongestionThresholds::default(),
            PopupStage::Reported,
        )
    }

    #[test]
    fn canvas_tracks_markers_by_handle() {
        let mut canvas = TextCanvas::default();
        let mut a = canvas.add_marker(&marker("a", 10)).expect("add");
        let b = canvas.add_marker(&marker("b", 90)).expect("add");
        assert_ne!(a, b);

        canvas.update_marker(&mut a, &marker("a", 50)).expect("update");
        canvas.remove_marker(b).expect("remove");

        let markers = canvas.markers();
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].label, "50%");
    }

    #[test]
    fn text_output_is_one_line_per_marker() {
        let out = MapOutput {
            signed_in: true,
            center: [0.0, 0.0],
            zoom: 13,
            window_secs: 7200,
            markers: vec![marker("a", 85), marker("b", 20)],
            stats: ViewStats::default(),
        };
        let mut buf = Vec::new();
        write_text(&out, &mut buf).expect("write");
        let text = String::from_utf8(buf).expect("utf8");
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("85%"));
        assert!(text.contains("Traffic Incident"));
    }
}
