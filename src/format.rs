//! Status renderers.
//!
//! All three formats consume the same [`GroupStatus`] snapshot. JSON keys are
//! the snapshot's field names.

use crate::cli::StatusFormat;
use anyhow::Result;
use rollout::GroupStatus;
use rollout::fleet::InstanceStatus;
use std::fmt::Write;

/// Render `status` in `format`.
pub fn render(status: &GroupStatus, format: StatusFormat) -> Result<String> {
    Ok(match format {
        StatusFormat::Plain => plain(status),
        StatusFormat::Json => serde_json::to_string_pretty(status)?,
        StatusFormat::Tree => tree(status),
    })
}

fn or_none(value: Option<&str>) -> &str {
    value.unwrap_or("none")
}

fn balancers(instance: &InstanceStatus) -> String {
    instance
        .load_balancers
        .iter()
        .map(|lb| format!("{}={}", lb.name, lb.state))
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// Plain
// ============================================================================

fn plain(status: &GroupStatus) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Group: {}", status.name);
    let _ = writeln!(
        out,
        "Launch configuration: {}",
        or_none(status.launch_configuration.as_deref())
    );
    let _ = writeln!(
        out,
        "Capacity: desired {}, min {}, max {}",
        status.desired_capacity, status.min_size, status.max_size
    );
    let _ = writeln!(out, "Load balancers: {}", status.load_balancers);
    if !status.suspended_processes.is_empty() {
        let _ = writeln!(out, "Suspended: {}", status.suspended_processes.join(", "));
    }
    if let Some(marker) = &status.rolling {
        let _ = writeln!(out, "Rolling: {marker}");
    }

    let _ = writeln!(out, "Instances:");
    if status.instances.is_empty() {
        let _ = writeln!(out, "  none");
    }
    for instance in &status.instances {
        let _ = writeln!(
            out,
            "  {} {} {} {} {} {}",
            instance.id,
            instance.health,
            instance.lifecycle_state,
            or_none(instance.launch_configuration.as_deref()),
            instance.availability_zone,
            balancers(instance)
        );
    }

    if !status.activities.is_empty() {
        let _ = writeln!(out, "Activities:");
        for activity in &status.activities {
            let _ = writeln!(
                out,
                "  {} -> {}  {} ({})",
                activity.start, activity.end, activity.description, activity.cause
            );
        }
    }
    out
}

// ============================================================================
// Tree
// ============================================================================

struct Node {
    label: String,
    children: Vec<Node>,
}

impl Node {
    fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            children: Vec::new(),
        }
    }

    fn leaf(key: &str, value: &str) -> Self {
        Self::new(format!("{key}: {value}"))
    }

    fn with(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    fn write(&self, out: &mut String, prefix: &str) {
        for (i, child) in self.children.iter().enumerate() {
            let last = i + 1 == self.children.len();
            let (branch, indent) = if last { ("└── ", "    ") } else { ("├── ", "│   ") };
            let _ = writeln!(out, "{prefix}{branch}{}", child.label);
            child.write(out, &format!("{prefix}{indent}"));
        }
    }
}

fn tree(status: &GroupStatus) -> String {
    let mut root = Node::new(&status.name)
        .with(Node::leaf(
            "Launch configuration",
            or_none(status.launch_configuration.as_deref()),
        ))
        .with(Node::leaf(
            "Capacity",
            &format!(
                "desired {} (min {}, max {})",
                status.desired_capacity, status.min_size, status.max_size
            ),
        ))
        .with(Node::leaf("Load balancers", &status.load_balancers));
    if !status.suspended_processes.is_empty() {
        root = root.with(Node::leaf("Suspended", &status.suspended_processes.join(", ")));
    }
    if let Some(marker) = &status.rolling {
        root = root.with(Node::leaf("Rolling", &marker.to_string()));
    }

    let mut instances = Node::new(format!("Instances ({})", status.instances.len()));
    for instance in &status.instances {
        let mut node = Node::new(&instance.id)
            .with(Node::leaf("Health", &instance.health))
            .with(Node::leaf("Lifecycle", &instance.lifecycle_state))
            .with(Node::leaf(
                "Launch configuration",
                or_none(instance.launch_configuration.as_deref()),
            ))
            .with(Node::leaf("Zone", &instance.availability_zone));
        for lb in &instance.load_balancers {
            let state = match &lb.reason {
                Some(reason) => format!("{} ({reason})", lb.state),
                None => lb.state.clone(),
            };
            node = node.with(Node::leaf(&lb.name, &state));
        }
        instances = instances.with(node);
    }
    root = root.with(instances);

    if !status.activities.is_empty() {
        let mut activities = Node::new(format!("Activities ({})", status.activities.len()));
        for activity in &status.activities {
            activities = activities.with(
                Node::new(&activity.description)
                    .with(Node::leaf("Start", &activity.start))
                    .with(Node::leaf("End", &activity.end))
                    .with(Node::leaf("Cause", &activity.cause)),
            );
        }
        root = root.with(activities);
    }

    let mut out = format!("{}\n", root.label);
    root.write(&mut out, "");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollout::fleet::{ActivityStatus, LoadBalancerHealth};

    fn status() -> GroupStatus {
        GroupStatus {
            name: "web".to_string(),
            launch_configuration: Some("web-2024-05-01-2".to_string()),
            desired_capacity: 2,
            min_size: 1,
            max_size: 4,
            load_balancers: "web-lb".to_string(),
            instances: vec![
                InstanceStatus {
                    id: "i-0001".to_string(),
                    health: "Healthy".to_string(),
                    lifecycle_state: "InService".to_string(),
                    launch_configuration: Some("web-2024-05-01-2".to_string()),
                    availability_zone: "eu-west-1a".to_string(),
                    load_balancers: vec![LoadBalancerHealth {
                        name: "web-lb".to_string(),
                        state: "InService".to_string(),
                        reason: None,
                    }],
                },
                InstanceStatus {
                    id: "i-0002".to_string(),
                    health: "Healthy".to_string(),
                    lifecycle_state: "Pending".to_string(),
                    launch_configuration: Some("web-2024-05-01-2".to_string()),
                    availability_zone: "eu-west-1b".to_string(),
                    load_balancers: vec![LoadBalancerHealth {
                        name: "web-lb".to_string(),
                        state: "OutOfService".to_string(),
                        reason: Some("Instance is still booting".to_string()),
                    }],
                },
            ],
            activities: vec![ActivityStatus {
                description: "Launching a new EC2 instance: i-0002".to_string(),
                start: "2024-05-01 10:00:00".to_string(),
                end: "in progress".to_string(),
                cause: "capacity changed".to_string(),
            }],
            suspended_processes: Vec::new(),
            rolling: None,
        }
    }

    #[test]
    fn test_plain() {
        let out = render(&status(), StatusFormat::Plain).unwrap();
        assert!(out.starts_with("Group: web\n"));
        assert!(out.contains("Capacity: desired 2, min 1, max 4"));
        assert!(out.contains(
            "  i-0002 Healthy Pending web-2024-05-01-2 eu-west-1b web-lb=OutOfService"
        ));
        assert!(out.contains("2024-05-01 10:00:00 -> in progress"));
        assert!(!out.contains("Suspended"));
    }

    #[test]
    fn test_tree() {
        let out = render(&status(), StatusFormat::Tree).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "web");
        assert_eq!(lines[1], "├── Launch configuration: web-2024-05-01-2");
        assert!(lines.contains(&"├── Instances (2)"));
        assert!(lines.contains(&"│   ├── i-0001"));
        assert!(lines.contains(&"│       └── web-lb: OutOfService (Instance is still booting)"));
        assert!(lines.contains(&"└── Activities (1)"));
        assert_eq!(*lines.last().unwrap(), "        └── Cause: capacity changed");
    }

    #[test]
    fn test_json_uses_field_names() {
        let out = render(&status(), StatusFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["name"], "web");
        assert_eq!(value["load_balancers"], "web-lb");
        assert_eq!(value["instances"][1]["load_balancers"][0]["state"], "OutOfService");
        assert_eq!(value["activities"][0]["end"], "in progress");
        assert!(value["rolling"].is_null());
    }

    #[test]
    fn test_empty_group() {
        let mut status = status();
        status.instances.clear();
        status.activities.clear();
        status.suspended_processes = vec!["Launch".to_string()];
        let plain = render(&status, StatusFormat::Plain).unwrap();
        assert!(plain.contains("Instances:\n  none"));
        assert!(plain.contains("Suspended: Launch"));
        let tree = render(&status, StatusFormat::Tree).unwrap();
        assert!(tree.ends_with("└── Instances (0)\n"));
    }
}
