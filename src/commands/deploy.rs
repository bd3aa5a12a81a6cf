use anyhow::Result;
use colored::Colorize;

use super::Session;
use crate::Context;
use crate::cli::DeployArgs;
use crate::ui;
use rollout::{DeployRequest, UpsertOutcome};
use rollout::orchestrator::format_elapsed;

pub fn run(ctx: &Context, args: DeployArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let application = session.application(&args.app)?;

    ui::header(&format!("Deploying {} ({})", application.name, application.strategy));
    if let Some(image) = &args.ami {
        ui::info(&format!("Using existing image {image}"));
    }

    let request = DeployRequest {
        image_override: args.ami,
        extra_args: args.args,
    };
    let report = session.orchestrator.deploy(&application, &request)?;

    println!();
    ui::success(&format!(
        "{} now runs {} in {}",
        report.application.bold(),
        report.launch_configuration.green(),
        format_elapsed(report.elapsed)
    ));
    ui::kv("Image", &report.image_id);
    let group = match report.group {
        UpsertOutcome::Created => "created",
        UpsertOutcome::Updated => "updated",
    };
    ui::kv("Group", group);
    if !report.scaling.policies.is_empty() {
        let policies: Vec<&str> = report.scaling.policies.keys().map(String::as_str).collect();
        ui::kv("Policies", &policies.join(", "));
    }
    if !report.scaling.alarms.is_empty() {
        ui::kv("Alarms", &report.scaling.alarms.join(", "));
    }
    if let Some(roll) = &report.roll {
        ui::kv(
            "Rolled",
            &format!(
                "{} replaced by {}",
                roll.old_instances.len(),
                roll.new_instances.len()
            ),
        );
    }
    Ok(())
}
