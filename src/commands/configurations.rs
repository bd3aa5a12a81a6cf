use anyhow::Result;
use colored::Colorize;
use dialoguer::Confirm;

use super::Session;
use crate::Context;
use crate::cli::CleanupArgs;
use crate::ui;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn list(ctx: &Context, app: Option<&str>) -> Result<()> {
    let session = Session::open(ctx)?;

    for application in session.applications(app)? {
        ui::header(&format!("Application: {}", application.name));
        let in_use = session
            .orchestrator
            .fleet(&application)
            .group()?
            .and_then(|g| g.launch_configuration_name);

        let configurations = session.orchestrator.list_configurations(&application)?;
        if configurations.is_empty() {
            ui::dim("No launch configurations");
            continue;
        }
        for (_, lc) in configurations {
            let created = lc
                .created_time
                .map(|t| t.format(TIME_FORMAT).to_string())
                .unwrap_or_default();
            let name = if in_use.as_deref() == Some(lc.name.as_str()) {
                format!("{} {}", lc.name.green().bold(), "(in use)".dimmed())
            } else {
                lc.name.clone()
            };
            println!("  {name}  {}  {}", lc.image_id, created.dimmed());
        }
    }
    Ok(())
}

pub fn cleanup(ctx: &Context, args: CleanupArgs) -> Result<()> {
    let session = Session::open(ctx)?;

    for application in session.applications(args.app.as_deref())? {
        ui::header(&format!("Application: {}", application.name));

        let candidates = session
            .orchestrator
            .cleanup_candidates(&application, args.keep)?;
        if candidates.is_empty() {
            ui::success(&format!("Nothing to delete (keeping {})", args.keep));
            continue;
        }

        ui::info(&format!(
            "{} launch configuration(s) and their images would be deleted:",
            candidates.len()
        ));
        for name in &candidates {
            ui::dim(name);
        }

        if !args.yes && !confirm()? {
            ui::warn("Skipped");
            continue;
        }

        let report = session.orchestrator.cleanup(&application, args.keep)?;
        for name in &report.deleted {
            ui::success(&format!("Deleted {name}"));
        }
        for name in &report.skipped_in_use {
            ui::warn(&format!("Kept {name}: the group still uses it"));
        }
        for failure in &report.image_failures {
            ui::warn(&format!("Image not deleted: {failure}"));
        }
    }
    Ok(())
}

fn confirm() -> Result<bool> {
    let confirmed = Confirm::new()
        .with_prompt("Delete them?")
        .default(false)
        .interact()?;
    Ok(confirmed)
}
