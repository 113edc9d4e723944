//! Fleet summary (dashboard stat cards).

use owo_colors::OwoColorize;
use serde::Serialize;

use fleetwatch_core::{FleetSummary, LinkTemplate, add_device_link};

use crate::cli::GlobalOpts;
use crate::config::Resolved;
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Serialize)]
struct SummaryOutput {
    #[serde(flatten)]
    counts: FleetSummary,
    add_device: &'static str,
}

fn detail(s: &SummaryOutput, color: bool) -> String {
    let (online, offline) = if color {
        (
            s.counts.online.green().to_string(),
            s.counts.offline.red().to_string(),
        )
    } else {
        (s.counts.online.to_string(), s.counts.offline.to_string())
    };
    [
        format!("Devices:    {}", s.counts.total),
        format!("Online:     {online}"),
        format!("Offline:    {offline}"),
        format!("Add device: {}", output::dimmed(s.add_device, color)),
    ]
    .join("\n")
}

pub async fn handle(resolved: &Resolved, global: &GlobalOpts) -> Result<(), CliError> {
    let color = output::should_color(global.color);
    let view = util::fetch_fleet(resolved, &LinkTemplate::dashboard()).await?;

    let summary = SummaryOutput {
        counts: view.summary(),
        add_device: add_device_link(),
    };
    let out = output::render_single(
        global.output,
        &summary,
        |s| detail(s, color),
        |s| format!("{} {} {}", s.counts.total, s.counts.online, s.counts.offline),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
