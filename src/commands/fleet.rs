use anyhow::Result;

use super::Session;
use crate::Context;
use crate::cli::MaintenanceCommand;
use crate::ui;

pub fn regenerate(ctx: &Context, app: &str) -> Result<()> {
    let session = Session::open(ctx)?;
    let application = session.application(app)?;

    ui::header(&format!("Regenerating {}", application.name));
    let report = session.orchestrator.regenerate(&application)?;
    if report.skipped {
        ui::warn("No running instances; nothing to replace");
        return Ok(());
    }
    ui::success(&format!(
        "Replaced {} instance(s); desired capacity back to {}",
        report.old_instances.len(),
        report.desired_capacity
    ));
    Ok(())
}

pub fn resume(ctx: &Context, app: &str) -> Result<()> {
    let session = Session::open(ctx)?;
    let application = session.application(app)?;

    if session.orchestrator.resume(&application)? {
        ui::success(&format!("Resumed scaling processes of {}", application.group.name));
    } else {
        ui::warn(&format!("Group {} does not exist", application.group.name));
    }
    Ok(())
}

pub fn maintenance(ctx: &Context, command: MaintenanceCommand) -> Result<()> {
    let (app, enable) = match command {
        MaintenanceCommand::On { app } => (app, true),
        MaintenanceCommand::Off { app } => (app, false),
    };
    let session = Session::open(ctx)?;
    let application = session.application(&app)?;

    session.orchestrator.maintenance(&application, enable)?;
    if enable {
        ui::success(&format!("{} is in maintenance mode", application.name));
        ui::dim(&format!("Leave it with: forseti maintenance off {}", application.name));
    } else {
        ui::success(&format!("{} left maintenance mode", application.name));
    }
    Ok(())
}
