use regex::Regex;
use std::sync::LazyLock;

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b(?:\[[0-?]*[ -/]*[@-~]|\][^\x07\x1b]*(?:\x07|\x1b\\)|[@-Z\\-_])").unwrap()
});

const TIME_FIELDS: &[&str] = &["time", "timestamp", "ts", "@timestamp"];
const LEVEL_FIELDS: &[&str] = &["level", "severity", "lvl"];
const MESSAGE_FIELDS: &[&str] = &["message", "msg", "text"];

/// Built-in transforms selected by name instead of a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    JsonMessage,
    StripAnsi,
    Trim,
}

impl Preset {
    pub const ALL: [Preset; 3] = [Preset::JsonMessage, Preset::StripAnsi, Preset::Trim];

    pub fn name(self) -> &'static str {
        match self {
            Preset::JsonMessage => "json:message",
            Preset::StripAnsi => "strip-ansi",
            Preset::Trim => "trim",
        }
    }

    /// Exact, case-sensitive lookup by name.
    pub fn lookup(source: &str) -> Option<Preset> {
        Self::ALL.into_iter().find(|p| p.name() == source)
    }

    /// `None` means "leave the line as it is".
    pub fn apply(self, line: &str) -> Option<String> {
        match self {
            Preset::JsonMessage => json_message(line),
            Preset::StripAnsi => Some(ANSI_ESCAPE.replace_all(line, "").into_owned()),
            Preset::Trim => Some(line.trim().to_string()),
        }
    }
}

fn json_message(line: &str) -> Option<String> {
    let serde_json::Value::Object(map) = serde_json::from_str(line.trim()).ok()? else {
        return None;
    };
    let field = |names: &[&str]| {
        names.iter().find_map(|name| match map.get(*name)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        })
    };
    let message = field(MESSAGE_FIELDS)?;

    let mut parts = Vec::with_capacity(3);
    if let Some(time) = field(TIME_FIELDS) {
        parts.push(time);
    }
    if let Some(level) = field(LEVEL_FIELDS) {
        parts.push(level.to_uppercase());
    }
    parts.push(message);
    Some(parts.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_exact() {
        assert_eq!(Preset::lookup("trim"), Some(Preset::Trim));
        assert_eq!(Preset::lookup("json:message"), Some(Preset::JsonMessage));
        assert_eq!(Preset::lookup(" trim"), None);
        assert_eq!(Preset::lookup("TRIM"), None);
    }

    #[test]
    fn test_json_message() {
        let line = r#"{"ts":"12:00:01","level":"warn","msg":"disk low","extra":1}"#;
        assert_eq!(
            Preset::JsonMessage.apply(line).as_deref(),
            Some("12:00:01 WARN disk low")
        );
        assert_eq!(
            Preset::JsonMessage.apply(r#"{"message":"only"}"#).as_deref(),
            Some("only")
        );
        assert_eq!(Preset::JsonMessage.apply("plain text"), None);
        assert_eq!(Preset::JsonMessage.apply(r#"{"no":"message"}"#), None);
        assert_eq!(Preset::JsonMessage.apply("[1,2]"), None);
    }

    #[test]
    fn test_strip_ansi() {
        assert_eq!(
            Preset::StripAnsi.apply("\x1b[31mERROR\x1b[0m boom").as_deref(),
            Some("ERROR boom")
        );
        assert_eq!(Preset::StripAnsi.apply("plain").as_deref(), Some("plain"));
    }
}
