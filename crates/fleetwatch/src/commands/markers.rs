//! Map markers and map center.

use serde::Serialize;
use tabled::Tabled;

use fleetwatch_core::{LatLng, LinkTemplate, MapMarker, map_center};

use crate::cli::GlobalOpts;
use crate::config::Resolved;
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Tabled)]
struct MarkerRow {
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Latitude")]
    lat: String,
    #[tabled(rename = "Longitude")]
    lng: String,
    #[tabled(rename = "Link")]
    link: String,
}

impl From<&MapMarker> for MarkerRow {
    fn from(m: &MapMarker) -> Self {
        Self {
            title: m.title.clone(),
            lat: format!("{:.5}", m.position.lat),
            lng: format!("{:.5}", m.position.lng),
            link: format!("{} ({})", m.link_text, m.link),
        }
    }
}

#[derive(Serialize)]
struct MapOutput<'a> {
    center: Option<LatLng>,
    markers: &'a [MapMarker],
}

fn detail(map: &MapOutput<'_>, color: bool) -> String {
    let Some(center) = map.center else {
        return output::dimmed("No devices to map.", color);
    };
    let rows: Vec<MarkerRow> = map.markers.iter().map(MarkerRow::from).collect();
    format!(
        "{}\n{}",
        output::render_table(&rows),
        output::dimmed(&format!("Center: {:.5}, {:.5}", center.lat, center.lng), color)
    )
}

pub async fn handle(resolved: &Resolved, global: &GlobalOpts) -> Result<(), CliError> {
    let color = output::should_color(global.color);
    let view = util::fetch_fleet(resolved, &LinkTemplate::fleet()).await?;

    let map = MapOutput {
        center: map_center(&view.markers),
        markers: &view.markers,
    };
    let out = output::render_single(
        global.output,
        &map,
        |m| detail(m, color),
        |m| {
            m.markers
                .iter()
                .map(|mk| mk.link.clone())
                .collect::<Vec<_>>()
                .join("\n")
        },
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
