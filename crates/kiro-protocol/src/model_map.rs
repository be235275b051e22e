//! Maps client-facing model aliases onto upstream Kiro model names.
//!
//! Total and deterministic: every input string produces exactly one
//! output, including unknown names (which map to the default with a
//! caller-visible warning flag).

pub const DEFAULT_MODEL: &str = "claude-sonnet-4";

/// Outcome of a mapping: the resolved upstream name, and whether the input
/// was an unrecognized alias (the caller should note this in the flow record).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapped {
    pub upstream_model: String,
    pub unknown_alias: bool,
}

/// Map a client-requested model name to the upstream Kiro model name.
///
/// `auto` and any name already in Kiro's own namespace (`claude-*`) pass
/// through verbatim per the "auto routing" design decision — Kiro decides
/// what `auto` means, this gateway does not infer it.
pub fn map_model(requested: &str) -> Mapped {
    if requested == "auto" || requested.starts_with("claude-") {
        return Mapped {
            upstream_model: requested.to_string(),
            unknown_alias: false,
        };
    }

    let mapped = match requested {
        "gpt-4o" | "gpt-4" | "sonnet" => Some("claude-sonnet-4"),
        "gemini-1.5-pro" => Some("claude-sonnet-4.5"),
        "gpt-4o-mini" | "gpt-3.5-turbo" | "haiku" => Some("claude-haiku-4.5"),
        "o1" | "o1-preview" | "opus" => Some("claude-opus-4.5"),
        _ => None,
    };

    match mapped {
        Some(m) => Mapped {
            upstream_model: m.to_string(),
            unknown_alias: false,
        },
        None => Mapped {
            upstream_model: DEFAULT_MODEL.to_string(),
            unknown_alias: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_aliases_map_correctly() {
        assert_eq!(map_model("gpt-4o").upstream_model, "claude-sonnet-4");
        assert_eq!(map_model("gpt-4").upstream_model, "claude-sonnet-4");
        assert_eq!(map_model("sonnet").upstream_model, "claude-sonnet-4");
        assert_eq!(map_model("gemini-1.5-pro").upstream_model, "claude-sonnet-4.5");
        assert_eq!(map_model("gpt-4o-mini").upstream_model, "claude-haiku-4.5");
        assert_eq!(map_model("gpt-3.5-turbo").upstream_model, "claude-haiku-4.5");
        assert_eq!(map_model("haiku").upstream_model, "claude-haiku-4.5");
        assert_eq!(map_model("o1").upstream_model, "claude-opus-4.5");
        assert_eq!(map_model("o1-preview").upstream_model, "claude-opus-4.5");
        assert_eq!(map_model("opus").upstream_model, "claude-opus-4.5");
    }

    #[test]
    fn literal_kiro_names_pass_through() {
        let m = map_model("claude-sonnet-4.5-20250929");
        assert_eq!(m.upstream_model, "claude-sonnet-4.5-20250929");
        assert!(!m.unknown_alias);
    }

    #[test]
    fn auto_passes_through() {
        let m = map_model("auto");
        assert_eq!(m.upstream_model, "auto");
        assert!(!m.unknown_alias);
    }

    #[test]
    fn unknown_name_maps_to_default_with_warning() {
        let m = map_model("not-a-real-model");
        assert_eq!(m.upstream_model, DEFAULT_MODEL);
        assert!(m.unknown_alias);
    }

    #[test]
    fn mapping_is_deterministic() {
        assert_eq!(map_model("gpt-4o"), map_model("gpt-4o"));
        assert_eq!(map_model("bogus"), map_model("bogus"));
    }
}
