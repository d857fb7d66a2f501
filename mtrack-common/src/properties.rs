//! Parsing of model CLI output and stderr classification.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// A property value read from `show`, tagged when it comes from an
/// inherited source rather than being set on the item itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyValue {
    pub value: String,
    pub inherited: bool,
}

impl PropertyValue {
    pub fn local(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            inherited: false,
        }
    }

    pub fn inherited(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            inherited: true,
        }
    }
}

pub type PropertyMap = BTreeMap<String, PropertyValue>;

static PROPERTY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s+([A-Za-z0-9_.-]+):\s?(.*?)(\s+\[\*\])?\s*$").expect("valid regex")
});

static SECTION_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Za-z_-]+):\s*$").expect("valid regex"));

/// Extract the `properties:` block of a `show -p` listing.
///
/// ```text
/// /deployments/d1/clusters/c1
///     type: vcs-cluster
///     state: Applied
///     properties:
///         cluster_id: 4771
///         low_prio_net: mgmt [*]
/// ```
pub fn parse_show_output<S: AsRef<str>>(lines: &[S]) -> PropertyMap {
    let mut props = PropertyMap::new();
    let mut section_indent: Option<usize> = None;

    for line in lines {
        let line = line.as_ref();
        if line.trim().is_empty() {
            continue;
        }
        let indent = line.len() - line.trim_start().len();

        if let Some(base) = section_indent
            && indent > base
        {
            if let Some(caps) = PROPERTY_LINE.captures(line) {
                let key = caps[1].to_string();
                let value = caps[2].trim().to_string();
                let inherited = caps.get(3).is_some();
                props.insert(key, PropertyValue { value, inherited });
            }
            continue;
        }

        section_indent = SECTION_HEADER
            .captures(line)
            .filter(|caps| caps[1].eq_ignore_ascii_case("properties"))
            .map(|_| indent);
    }

    props
}

fn contains_any<S: AsRef<str>>(lines: &[S], needles: &[&str]) -> bool {
    lines.iter().any(|line| {
        let lower = line.as_ref().to_lowercase();
        needles.iter().any(|n| lower.contains(&n.to_lowercase()))
    })
}

/// The model rejected a command because the addressed path does not exist.
///
/// Only the model's own error names count; a shell `command not found` or
/// any other failure is not an absence.
pub fn is_absent_error<S: AsRef<str>>(stderr: &[S]) -> bool {
    contains_any(stderr, &["InvalidLocationError", "Path not found"])
}

/// The command was rejected because of an unresolved dependency.
pub fn is_ordering_violation<S: AsRef<str>>(stderr: &[S]) -> bool {
    contains_any(stderr, &["ValidationError", "plan is running", "is inherited"])
}

/// `create_plan` found nothing to do.
pub fn is_do_nothing_plan<S: AsRef<str>>(stderr: &[S]) -> bool {
    contains_any(stderr, &["DoNothingPlanError", "no tasks were generated"])
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOW: &[&str] = &[
        "/deployments/d1/clusters/c1",
        "    type: vcs-cluster",
        "    state: Applied",
        "    properties:",
        "        cluster_id: 4771",
        "        low_prio_net: mgmt [*]",
        "        default_nic_monitor: netstat",
        "        empty:",
        "    children:",
        "        nodes: ...",
    ];

    #[test]
    fn test_parse_show_properties_block_only() {
        let props = parse_show_output(SHOW);
        assert_eq!(props.len(), 4);
        assert_eq!(props["cluster_id"], PropertyValue::local("4771"));
        assert_eq!(props["low_prio_net"], PropertyValue::inherited("mgmt"));
        assert_eq!(props["empty"], PropertyValue::local(""));
        assert!(!props.contains_key("type"));
        assert!(!props.contains_key("nodes"));
    }

    #[test]
    fn test_parse_show_without_properties() {
        let props = parse_show_output(&["/x", "    type: t", "    state: Initial"]);
        assert!(props.is_empty());
    }

    #[test]
    fn test_stderr_classifiers() {
        assert!(is_absent_error(&[
            "InvalidLocationError    Not found"
        ]));
        assert!(is_absent_error(&["/software/items/x    Path not found"]));
        assert!(!is_absent_error(&["bash: litp: command not found"]));
        assert!(!is_absent_error(&["sudo: litp: command not found"]));
        assert!(!is_absent_error(&["ValidationError in property"]));

        assert!(is_ordering_violation(&["/x ValidationError  Item is inherited"]));
        assert!(is_ordering_violation(&["Operation not allowed while plan is running"]));

        assert!(is_do_nothing_plan(&["DoNothingPlanError    Create plan failed: no tasks were generated"]));
        assert!(!is_do_nothing_plan::<&str>(&[]));
    }
}
