//! Line-delimited request/response records exchanged with the front-end.

use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::postprocess::Classification;

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    Blank,
    Path(PathBuf),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            Self::Blank
        } else if line.eq_ignore_ascii_case("exit") {
            Self::Exit
        } else {
            Self::Path(PathBuf::from(line))
        }
    }
}

/// What to do with an empty input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlankLines {
    Skip,
    /// Answer with an `Empty path` error record.
    #[default]
    Report,
}

impl fmt::Display for BlankLines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Skip => "skip",
            Self::Report => "report",
        })
    }
}

impl FromStr for BlankLines {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "report" => Ok(Self::Report),
            other => Err(format!(
                "invalid blank-line policy '{other}'; expected 'skip' or 'report'"
            )),
        }
    }
}

/// One output line: either a full result or an error, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Success {
        status: Classification,
        score: f32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        overlay: Option<String>,
    },
    Error {
        error: String,
    },
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn empty_path() -> Self {
        Self::error("Empty path")
    }

    pub fn unreadable(path: &std::path::Path) -> Self {
        Self::error(format!("Cannot read frame {}", path.display()))
    }

    pub fn invalid_line(lossy: &str) -> Self {
        Self::error(format!("Request line is not valid UTF-8: {lossy}"))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_command_parsing() {
        assert_eq!(Command::parse("exit"), Command::Exit);
        assert_eq!(Command::parse("  EXIT \r\n"), Command::Exit);
        assert_eq!(Command::parse("   "), Command::Blank);
        assert_eq!(
            Command::parse("C:\\images\\good_1.png\r\n"),
            Command::Path(PathBuf::from("C:\\images\\good_1.png"))
        );
        assert_eq!(
            Command::parse("exit.png"),
            Command::Path(PathBuf::from("exit.png"))
        );
    }

    #[test]
    fn test_success_serialization() -> serde_json::Result<()> {
        let response = Response::Success {
            status: Classification::Anomalous,
            score: 0.75,
            overlay: Some("aGVsbG8=".to_string()),
        };
        let value: Value = serde_json::from_str(&response.to_line()?)?;
        assert_eq!(
            value,
            json!({"status": "BAD", "score": 0.75, "overlay": "aGVsbG8="})
        );
        Ok(())
    }

    #[test]
    fn test_overlay_omitted_when_absent() -> serde_json::Result<()> {
        let response = Response::Success {
            status: Classification::Normal,
            score: 0.25,
            overlay: None,
        };
        let value: Value = serde_json::from_str(&response.to_line()?)?;
        assert_eq!(value, json!({"status": "GOOD", "score": 0.25}));
        Ok(())
    }

    #[test]
    fn test_error_has_only_error_key() -> serde_json::Result<()> {
        let response = Response::unreadable(std::path::Path::new("missing.png"));
        let value: Value = serde_json::from_str(&response.to_line()?)?;
        assert_eq!(value, json!({"error": "Cannot read frame missing.png"}));
        Ok(())
    }

    #[test]
    fn test_response_parses_back() -> serde_json::Result<()> {
        let parsed: Response = serde_json::from_str(r#"{"status":"GOOD","score":0.5}"#)?;
        assert_eq!(
            parsed,
            Response::Success {
                status: Classification::Normal,
                score: 0.5,
                overlay: None
            }
        );
        let parsed: Response = serde_json::from_str(r#"{"error":"Empty path"}"#)?;
        assert_eq!(parsed, Response::empty_path());
        Ok(())
    }
}
