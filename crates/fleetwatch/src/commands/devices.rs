//! Device command handlers.

use std::num::NonZeroUsize;

use tabled::Tabled;

use fleetwatch_core::{
    DEFAULT_PAGE_SIZE, DetailView, EnrichedDevice, LinkTemplate, SystemClock, load_detail,
    paginate,
};

use crate::cli::{DevicesArgs, DevicesCommand, GlobalOpts, OutputFormat};
use crate::config::Resolved;
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Last Seen")]
    last_seen: String,
    #[tabled(rename = "Location")]
    location: String,
}

impl DeviceRow {
    fn new(d: &EnrichedDevice, color: bool) -> Self {
        Self {
            id: d.device.id.to_string(),
            name: d.device.name.clone(),
            key: d.device.key.to_string(),
            status: output::status_label(d.is_online, color),
            last_seen: d
                .last_seen
                .map_or_else(|| "never".into(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
            location: format!("{:.5}, {:.5}", d.device.latitude, d.device.longitude),
        }
    }
}

pub(crate) fn list_table(devices: &[EnrichedDevice], color: bool) -> String {
    let rows: Vec<DeviceRow> = devices.iter().map(|d| DeviceRow::new(d, color)).collect();
    output::render_table(&rows)
}

pub(crate) fn detail(view: &DetailView, color: bool) -> String {
    let d = &view.device;
    let mut lines = vec![
        format!("ID:          {}", d.device.id),
        format!("Name:        {}", d.device.name),
        format!("Key:         {}", d.device.key),
        format!("Status:      {}", output::status_label(d.is_online, color)),
        format!(
            "Location:    {:.5}, {:.5}",
            d.device.latitude, d.device.longitude
        ),
        format!("Link:        {}", view.marker.link),
    ];
    match &view.latest {
        Some(sample) => {
            lines.push(format!(
                "Last seen:   {}",
                sample.created_at.format("%Y-%m-%d %H:%M:%S UTC")
            ));
            lines.push(format!("Temperature: {}", util::reading(sample.temperature, "°C")));
            lines.push(format!("Humidity:    {}", util::reading(sample.humidity, "%")));
            lines.push(format!("Smoke level: {}", util::reading(sample.smoke_level, "")));
            lines.push(format!(
                "Smoke:       {}",
                if sample.smoke_status { "detected" } else { "clear" }
            ));
        }
        None => lines.push(format!(
            "Last seen:   {}",
            output::dimmed("no telemetry yet", color)
        )),
    }
    lines.join("\n")
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: DevicesArgs, resolved: &Resolved, global: &GlobalOpts) -> Result<(), CliError> {
    let color = output::should_color(global.color);

    match args.command {
        DevicesCommand::List {
            page,
            page_size,
            all,
        } => {
            let view = util::fetch_fleet(resolved, &LinkTemplate::dashboard()).await?;

            if all {
                let out = output::render_list(
                    global.output,
                    &view.devices,
                    |d| DeviceRow::new(d, color),
                    |d| d.device.id.to_string(),
                );
                output::print_output(&out, global.quiet);
                return Ok(());
            }

            let size = usize::try_from(page_size)
                .ok()
                .and_then(NonZeroUsize::new)
                .unwrap_or(DEFAULT_PAGE_SIZE);
            let window = paginate(&view.devices, size, page);

            let out = output::render_list(
                global.output,
                window.items,
                |d| DeviceRow::new(d, color),
                |d| d.device.id.to_string(),
            );
            output::print_output(&out, global.quiet);

            if global.output == OutputFormat::Table && !global.quiet {
                eprintln!(
                    "{}",
                    output::dimmed(
                        &format!(
                            "Page {} of {} ({} devices)",
                            window.page, window.total_pages, window.total_items
                        ),
                        color
                    )
                );
            }
            Ok(())
        }

        DevicesCommand::Get { id } => {
            let device_id = util::parse_device_id(&id);
            let backend = util::backend(resolved)?;
            let view = load_detail(
                &backend,
                &device_id,
                &LinkTemplate::dashboard(),
                util::liveness(resolved),
                &SystemClock,
            )
            .await?
            .ok_or_else(|| CliError::device_not_found(id))?;

            let out = output::render_single(
                global.output,
                &view,
                |v| detail(v, color),
                |v| v.device.device.id.to_string(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}
