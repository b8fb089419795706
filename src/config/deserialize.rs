// ABOUTME: Custom serde deserializers for config types.
// ABOUTME: Handles command specs and non-empty HTTP status sets.

use nonempty::NonEmpty;
use serde::Deserialize;

use super::CommandSpec;

pub fn deserialize_command<'de, D>(deserializer: D) -> Result<CommandSpec, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match CommandEntry::deserialize(deserializer)? {
        CommandEntry::Shell(line) => {
            if line.trim().is_empty() {
                return Err(serde::de::Error::custom("command cannot be empty"));
            }
            Ok(CommandSpec::shell(&line))
        }
        CommandEntry::Argv(values) => NonEmpty::from_vec(values)
            .map(CommandSpec::argv)
            .ok_or_else(|| serde::de::Error::custom("command argv cannot be empty")),
    }
}

pub fn deserialize_status_set<'de, D>(deserializer: D) -> Result<NonEmpty<u16>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let values: Vec<u16> = Vec::deserialize(deserializer)?;
    if let Some(bad) = values.iter().find(|s| !(100..=599).contains(*s)) {
        return Err(serde::de::Error::custom(format!(
            "invalid HTTP status code: {bad}"
        )));
    }
    NonEmpty::from_vec(values)
        .ok_or_else(|| serde::de::Error::custom("expected status set cannot be empty"))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CommandEntry {
    Shell(String),
    Argv(Vec<String>),
}
