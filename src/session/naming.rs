use regex::Regex;

const MAX_ASCII: u32 = 127;

/// True when the display name needs translation before it can be used as a
/// branch and session identifier.
pub fn has_non_ascii(name: &str) -> bool {
    name.chars().any(|character| character as u32 > MAX_ASCII)
}

/// Makes an identifier safe for git branch names: lowercase, spaces to
/// hyphens, everything outside `[a-z0-9-_]` dropped, hyphen runs collapsed,
/// and separators trimmed from both ends so a non-empty result starts and
/// ends with an alphanumeric. May return an empty string.
pub fn sanitize_identifier(input: &str) -> String {
    let lowered = input.to_lowercase().replace(' ', "-");

    let Ok(unsafe_chars) = Regex::new(r"[^a-z0-9\-_]+") else {
        return lowered;
    };
    let stripped = unsafe_chars.replace_all(&lowered, "");

    let Ok(hyphen_runs) = Regex::new(r"-+") else {
        return stripped.into_owned();
    };
    let collapsed = hyphen_runs.replace_all(&stripped, "-");

    collapsed
        .trim_matches(|character| character == '-' || character == '_')
        .to_string()
}

/// Identifier used when translation fails, times out, or is not wired in.
pub fn fallback_identifier(unix_secs: i64) -> String {
    format!("session-{unix_secs}")
}

/// Turns a free-form display name into an English identifier. The remote
/// chat-API implementation lives outside the core; the supervisor only
/// depends on this seam.
pub trait NameTranslator: Send + Sync {
    fn translate(&self, display_name: &str) -> String;
}

/// Always answers with a timestamped identifier.
pub struct FallbackTranslator;

impl NameTranslator for FallbackTranslator {
    fn translate(&self, _display_name: &str) -> String {
        fallback_identifier(chrono::Utc::now().timestamp())
    }
}

#[cfg(test)]
mod tests;
