//! Live view: mount a sync controller and print each settled state
//! until interrupted.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fleetwatch_core::{QueryScope, ScreenState, ScreenView, SupabaseBackend, SyncController, SyncPhase};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::config::Resolved;
use crate::error::CliError;
use crate::output;

use super::{devices, util};

fn render_view(view: &ScreenView, global: &GlobalOpts, color: bool) -> String {
    match global.output {
        OutputFormat::Table => match view {
            ScreenView::Fleet(fleet) => {
                let summary = fleet.summary();
                format!(
                    "{}\n{}",
                    output::dimmed(
                        &format!(
                            "{}  {} devices, {} online",
                            fleet.built_at.format("%H:%M:%S"),
                            summary.total,
                            summary.online
                        ),
                        color
                    ),
                    devices::list_table(&fleet.devices, color)
                )
            }
            ScreenView::Detail(detail) => format!(
                "{}\n{}",
                output::dimmed(&detail.built_at.format("%H:%M:%S").to_string(), color),
                devices::detail(detail, color)
            ),
        },
        // One document per update so the stream stays line-parseable.
        OutputFormat::Json | OutputFormat::JsonCompact => {
            output::render_single(OutputFormat::JsonCompact, view, |_| String::new(), |_| String::new())
        }
        format => output::render_single(format, view, |_| String::new(), |v| match v {
            ScreenView::Fleet(fleet) => fleet
                .devices
                .iter()
                .map(|d| format!("{} {}", d.device.id, if d.is_online { "online" } else { "offline" }))
                .collect::<Vec<_>>()
                .join("\n"),
            ScreenView::Detail(detail) => format!(
                "{} {}",
                detail.device.device.id,
                if detail.device.is_online { "online" } else { "offline" }
            ),
        }),
    }
}

fn print_state(state: &ScreenState, global: &GlobalOpts, color: bool) {
    match state {
        ScreenState::Loading => {}
        ScreenState::Ready(view) => output::print_output(&render_view(view, global, color), global.quiet),
        ScreenState::Failed { message } => {
            warn!(%message, "refresh failed");
            eprintln!("refresh failed: {message}");
        }
        ScreenState::NotFound { id } => {
            eprintln!("device '{id}' not found; waiting for it to appear");
        }
    }
}

pub async fn handle(args: WatchArgs, resolved: Resolved, global: &GlobalOpts) -> Result<(), CliError> {
    let color = output::should_color(global.color);

    let mut sync = resolved.sync;
    if let Some(refetch) = args.refetch {
        sync.refetch = refetch.into();
    }
    let scope = match args.device.as_deref() {
        Some(raw) => QueryScope::device(util::parse_device_id(raw)),
        None => QueryScope::fleet(),
    };

    let cancel = CancellationToken::new();
    let backend = Arc::new(SupabaseBackend::connect(&resolved.backend, cancel.clone())?);
    info!(url = %resolved.backend.url, refetch = %sync.refetch, "watching");

    let controller = SyncController::mount(backend, scope, sync);
    let mut state = controller.state();
    let mut phase = controller.phase();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state.borrow_and_update().clone();
                print_state(&current, global, color);
            }
            changed = phase.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *phase.borrow_and_update();
                if current == SyncPhase::Degraded {
                    eprintln!("live updates degraded; showing last fetched data");
                }
                info!(phase = %current, "sync phase");
            }
        }
    }

    controller.teardown().await;
    cancel.cancel();
    Ok(())
}
