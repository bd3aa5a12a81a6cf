//! Tag keys and resource naming.
//!
//! Launch configurations are named `<group>-<YYYY-MM-DD>-<version>`; the
//! version is the first one that does not collide with an existing
//! configuration. Images are named `<app>-ami-<YYYY-MM-DD>-<n>`.

use chrono::Utc;
use regex::Regex;
use std::fmt;

/// Display name tag.
pub const TAG_NAME: &str = "Name";
/// Application a resource belongs to.
pub const TAG_APPLICATION: &str = "forseti:application";
/// Day a resource was created.
pub const TAG_DATE: &str = "forseti:date";
/// Instances carrying this tag are never imaged.
pub const TAG_AVOID_AMI_CREATION: &str = "forseti:avoid_ami_creation";
/// Marks a dedicated image-building instance.
pub const TAG_GOLDEN_INSTANCE: &str = "forseti:golden-instance";
/// Present on a group while a roll is in progress.
pub const TAG_ROLLING: &str = "forseti:rolling";

/// Today's date as used in resource names and tags.
pub fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// A parsed launch configuration name.
///
/// Ordering is by date, then numeric version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConfigurationName {
    /// `YYYY-MM-DD`
    pub date: String,
    /// Version within the day, starting at 1
    pub version: u32,
    /// Group the configuration belongs to
    pub group: String,
}

impl ConfigurationName {
    /// Create a name.
    pub fn new(group: &str, date: &str, version: u32) -> Self {
        Self {
            date: date.to_string(),
            version,
            group: group.to_string(),
        }
    }

    /// Parse `name` if it follows the naming pattern of `group`.
    pub fn parse(group: &str, name: &str) -> Option<Self> {
        let pattern = format!(r"^{}-(\d{{4}}-\d{{2}}-\d{{2}})-(\d+)$", regex::escape(group));
        let re = Regex::new(&pattern).ok()?;
        let caps = re.captures(name)?;
        let version = caps[2].parse().ok()?;
        Some(Self::new(group, &caps[1], version))
    }
}

impl fmt::Display for ConfigurationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.group, self.date, self.version)
    }
}

/// First configuration name for `group` on `date` not present in `existing`.
pub fn next_configuration_name(group: &str, date: &str, existing: &[String]) -> ConfigurationName {
    let mut version = 1;
    loop {
        let candidate = ConfigurationName::new(group, date, version);
        let taken = candidate.to_string();
        if !existing.iter().any(|name| *name == taken) {
            return candidate;
        }
        version += 1;
    }
}

/// Name of the `n`-th image built for `application` on `date`.
pub fn image_name(application: &str, date: &str, n: usize) -> String {
    format!("{application}-ami-{date}-{n}")
}

/// Name tag of a golden instance.
pub fn golden_instance_name(application: &str, date: &str) -> String {
    format!("golden-{application}-instance-{date}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_name_skips_taken_versions() {
        let existing = vec![
            "web-2024-03-01-1".to_string(),
            "web-2024-03-01-2".to_string(),
            "web-2024-02-28-3".to_string(),
        ];
        let next = next_configuration_name("web", "2024-03-01", &existing);
        assert_eq!(next.to_string(), "web-2024-03-01-3");

        let fresh = next_configuration_name("web", "2024-03-02", &existing);
        assert_eq!(fresh.version, 1);
    }

    #[test]
    fn test_parse_only_matches_own_group() {
        let parsed = ConfigurationName::parse("web", "web-2024-03-01-12").unwrap();
        assert_eq!(parsed.date, "2024-03-01");
        assert_eq!(parsed.version, 12);

        assert!(ConfigurationName::parse("web", "web-api-2024-03-01-1").is_none());
        assert!(ConfigurationName::parse("web", "web-2024-03-01").is_none());
        assert!(ConfigurationName::parse("web.v2", "webxv2-2024-03-01-1").is_none());
    }

    #[test]
    fn test_ordering_is_numeric_within_a_day() {
        let mut names = vec![
            ConfigurationName::parse("web", "web-2024-03-01-10").unwrap(),
            ConfigurationName::parse("web", "web-2024-03-01-9").unwrap(),
            ConfigurationName::parse("web", "web-2024-02-29-20").unwrap(),
        ];
        names.sort();
        let ordered: Vec<String> = names.iter().map(ToString::to_string).collect();
        assert_eq!(
            ordered,
            vec!["web-2024-02-29-20", "web-2024-03-01-9", "web-2024-03-01-10"]
        );
    }

    #[test]
    fn test_image_and_golden_names() {
        assert_eq!(image_name("shop", "2024-03-01", 2), "shop-ami-2024-03-01-2");
        assert_eq!(
            golden_instance_name("shop", "2024-03-01"),
            "golden-shop-instance-2024-03-01"
        );
    }
}
