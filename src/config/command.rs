// ABOUTME: External command specification used by collaborator adapters.
// ABOUTME: Accepts either a shell string or an explicit argv list.

use nonempty::NonEmpty;
use serde::Deserialize;

/// An external command as an argv vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    argv: NonEmpty<String>,
}

impl CommandSpec {
    /// Run `line` through `sh -c`.
    pub fn shell(line: &str) -> Self {
        Self {
            argv: NonEmpty {
                head: "sh".to_string(),
                tail: vec!["-c".to_string(), line.to_string()],
            },
        }
    }

    pub fn argv(argv: NonEmpty<String>) -> Self {
        Self { argv }
    }

    pub fn program(&self) -> &str {
        self.argv.first()
    }

    pub fn args(&self) -> &[String] {
        self.argv.tail()
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<&str> = self.argv.iter().map(String::as_str).collect();
        write!(f, "{}", parts.join(" "))
    }
}

impl<'de> Deserialize<'de> for CommandSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        super::deserialize::deserialize_command(deserializer)
    }
}
