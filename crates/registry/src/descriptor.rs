//! `SKILL.md` descriptor parsing.
//!
//! The descriptor is the YAML frontmatter block at the top of the file:
//!
//! ```text
//! ---
//! name: dbt-patterns
//! description: Common dbt modelling patterns
//! version: 1.2.0
//! type: skill
//! user-invocable: true
//! ---
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Descriptor file name inside every package directory.
pub const DESCRIPTOR_FILE: &str = "SKILL.md";

/// Validate an identity: lowercase ASCII alphanumerics and hyphens, 1-64 chars.
pub fn validate_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-')
        && !name.contains("--")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    #[default]
    Skill,
    Agent,
    Other,
}

impl PackageKind {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "skill" => Self::Skill,
            "agent" => Self::Agent,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for PackageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Skill => write!(f, "skill"),
            Self::Agent => write!(f, "agent"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Behavioral fields. `None` means "not stated", which matters when a
/// re-import merges new values over an existing record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehavioralFlags {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_invocable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argument_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_model_invocation: Option<bool>,
}

impl BehavioralFlags {
    /// Users may invoke the package directly unless it says otherwise.
    pub fn invocable(&self) -> bool {
        self.user_invocable.unwrap_or(true)
    }

    /// Field-wise: stated values in `self` win, gaps keep `previous`.
    pub fn merged_over(self, previous: &Self) -> Self {
        Self {
            user_invocable: self.user_invocable.or(previous.user_invocable),
            model: self.model.or_else(|| previous.model.clone()),
            argument_hint: self.argument_hint.or_else(|| previous.argument_hint.clone()),
            disable_model_invocation: self
                .disable_model_invocation
                .or(previous.disable_model_invocation),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    pub identity: String,
    pub description: String,
    pub version: Option<String>,
    pub kind: Option<PackageKind>,
    pub flags: BehavioralFlags,
}

#[derive(Deserialize)]
struct Frontmatter {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    version: Option<serde_yaml::Value>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default, rename = "argument-hint", alias = "argument_hint")]
    argument_hint: Option<String>,
    #[serde(default, rename = "user-invocable", alias = "user_invocable")]
    user_invocable: Option<bool>,
    #[serde(
        default,
        rename = "disable-model-invocation",
        alias = "disable_model_invocation"
    )]
    disable_model_invocation: Option<bool>,
}

/// Parse descriptor content. Missing or invalid required fields are
/// validation errors.
pub fn parse_descriptor(content: &str) -> Result<PackageDescriptor> {
    let (frontmatter, _body) = split_frontmatter(content)?;
    let raw: Frontmatter = serde_yaml::from_str(&frontmatter)
        .map_err(|e| Error::validation(format!("invalid {DESCRIPTOR_FILE} frontmatter: {e}")))?;

    let identity = raw
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::validation(format!("{DESCRIPTOR_FILE} is missing 'name'")))?;
    if !validate_name(&identity) {
        return Err(Error::validation(format!(
            "invalid package name '{identity}': must be 1-64 lowercase alphanumeric/hyphen chars"
        )));
    }

    let description = raw
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .ok_or_else(|| {
            Error::validation(format!("{DESCRIPTOR_FILE} for '{identity}' is missing 'description'"))
        })?;

    Ok(PackageDescriptor {
        identity,
        description,
        version: raw.version.and_then(version_string),
        kind: raw.kind.as_deref().map(PackageKind::parse),
        flags: BehavioralFlags {
            user_invocable: raw.user_invocable,
            model: non_empty(raw.model),
            argument_hint: non_empty(raw.argument_hint),
            disable_model_invocation: raw.disable_model_invocation,
        },
    })
}

/// YAML reads `version: 1.0` as a float.
fn version_string(value: serde_yaml::Value) -> Option<String> {
    let s = match value {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Number(n) => n.to_string(),
        _ => return None,
    };
    non_empty(Some(s))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Split SKILL.md content at `---` delimiters into (frontmatter, body).
fn split_frontmatter(content: &str) -> Result<(String, String)> {
    let trimmed = content.trim_start_matches('\u{feff}').trim_start();
    let Some(after_open) = trimmed.strip_prefix("---") else {
        return Err(Error::validation(format!(
            "{DESCRIPTOR_FILE} must start with YAML frontmatter delimited by ---"
        )));
    };

    let close_pos = after_open.find("\n---").ok_or_else(|| {
        Error::validation(format!("{DESCRIPTOR_FILE} missing closing --- for frontmatter"))
    })?;

    let frontmatter = after_open[..close_pos].trim().to_string();
    let body = after_open[close_pos + 4..].trim().to_string();
    Ok((frontmatter, body))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::error::ErrorKind};

    #[test]
    fn test_validate_name() {
        assert!(validate_name("my-skill"));
        assert!(validate_name("a"));
        assert!(validate_name("skill123"));
        assert!(!validate_name(""));
        assert!(!validate_name("-bad"));
        assert!(!validate_name("bad-"));
        assert!(!validate_name("Bad"));
        assert!(!validate_name("has space"));
        assert!(!validate_name("has--double"));
        assert!(!validate_name("plugin:skill"));
        assert!(!validate_name(&"a".repeat(65)));
        assert!(validate_name(&"a".repeat(64)));
    }

    #[test]
    fn parses_all_fields() {
        let content = r#"---
name: dbt-patterns
description: Common dbt modelling patterns
version: 1.2.0
type: agent
model: opus
argument-hint: "[model name]"
user-invocable: false
disable-model-invocation: true
license: MIT
---

# dbt patterns
"#;
        let d = parse_descriptor(content).unwrap();
        assert_eq!(d.identity, "dbt-patterns");
        assert_eq!(d.description, "Common dbt modelling patterns");
        assert_eq!(d.version.as_deref(), Some("1.2.0"));
        assert_eq!(d.kind, Some(PackageKind::Agent));
        assert_eq!(d.flags.model.as_deref(), Some("opus"));
        assert_eq!(d.flags.argument_hint.as_deref(), Some("[model name]"));
        assert!(!d.flags.invocable());
        assert_eq!(d.flags.disable_model_invocation, Some(true));
    }

    #[test]
    fn optional_fields_have_no_parse_time_defaults() {
        let d = parse_descriptor("---\nname: a\ndescription: b\n---\n").unwrap();
        assert!(d.version.is_none());
        assert!(d.kind.is_none());
        assert_eq!(d.flags, BehavioralFlags::default());
        assert!(d.flags.invocable());
    }

    #[test]
    fn numeric_version_is_stringified() {
        let d = parse_descriptor("---\nname: a\ndescription: b\nversion: 2.1\n---\n").unwrap();
        assert_eq!(d.version.as_deref(), Some("2.1"));
    }

    #[test]
    fn unknown_type_is_other() {
        let d = parse_descriptor("---\nname: a\ndescription: b\ntype: Workflow\n---\n").unwrap();
        assert_eq!(d.kind, Some(PackageKind::Other));
    }

    #[test]
    fn missing_required_fields_are_validation_errors() {
        let cases = [
            "no frontmatter at all",
            "---\nname: a\ndescription: b\n",
            "---\ndescription: b\n---\n",
            "---\nname: a\n---\n",
            "---\nname: Not Valid\ndescription: b\n---\n",
            "---\nname: a\ndescription: \"   \"\n---\n",
            "---\nname: [a, b]\ndescription: b\n---\n",
        ];
        for content in cases {
            let err = parse_descriptor(content).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{content}");
        }
    }

    #[test]
    fn merged_flags_prefer_stated_values() {
        let previous = BehavioralFlags {
            user_invocable: Some(false),
            model: Some("haiku".into()),
            argument_hint: Some("<file>".into()),
            disable_model_invocation: None,
        };
        let incoming = BehavioralFlags {
            model: Some("opus".into()),
            disable_model_invocation: Some(true),
            ..Default::default()
        };
        let merged = incoming.merged_over(&previous);
        assert_eq!(merged.user_invocable, Some(false));
        assert_eq!(merged.model.as_deref(), Some("opus"));
        assert_eq!(merged.argument_hint.as_deref(), Some("<file>"));
        assert_eq!(merged.disable_model_invocation, Some(true));
    }
}
