// Public model id → canonical Kiro model id table.

use once_cell::sync::Lazy;
use std::collections::BTreeMap;

/// Fallback for unknown public model names.
pub const DEFAULT_KIRO_MODEL_ID: &str = "CLAUDE_SONNET_4_5_20250929_V1_0";

/// Public names → the ids Kiro's generation endpoints accept. The right-hand
/// side mixes two upstream conventions (screaming ids for older entries,
/// dotted ids for newer ones) because Kiro itself does.
static KIRO_MODEL_TABLE: Lazy<BTreeMap<&'static str, &'static str>> = Lazy::new(|| {
    BTreeMap::from([
        ("claude-sonnet-4-5", "CLAUDE_SONNET_4_5_20250929_V1_0"),
        ("claude-sonnet-4-5-20250929", "CLAUDE_SONNET_4_5_20250929_V1_0"),
        ("claude-sonnet-4", "CLAUDE_SONNET_4_20250514_V1_0"),
        ("claude-sonnet-4-20250514", "CLAUDE_SONNET_4_20250514_V1_0"),
        ("claude-3-7-sonnet-20250219", "CLAUDE_3_7_SONNET_20250219_V1_0"),
        ("claude-opus-4-5", "claude-opus-4.5"),
        ("claude-opus-4-5-20251101", "claude-opus-4.5"),
        ("claude-haiku-4-5", "claude-haiku-4.5"),
        ("claude-haiku-4-5-20251001", "claude-haiku-4.5"),
    ])
});

/// Map a public model name to its Kiro internal id. `amazonq` ids pass
/// through untouched (they also select the streaming endpoint); unknown
/// names fall back to the default.
pub fn map_model_id(public: &str) -> String {
    let lower = public.to_lowercase();
    if lower.starts_with("amazonq") {
        return public.to_string();
    }
    KIRO_MODEL_TABLE
        .get(lower.as_str())
        .copied()
        .unwrap_or(DEFAULT_KIRO_MODEL_ID)
        .to_string()
}

/// Whether this model routes to the `SendMessageStreaming` endpoint.
pub fn is_amazonq(model: &str) -> bool {
    model.to_lowercase().starts_with("amazonq")
}

/// Public model ids advertised on `/v1/models`, sorted.
pub fn public_model_ids() -> Vec<&'static str> {
    KIRO_MODEL_TABLE.keys().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_models() {
        assert_eq!(map_model_id("claude-sonnet-4-5"), "CLAUDE_SONNET_4_5_20250929_V1_0");
        assert_eq!(map_model_id("claude-opus-4-5"), "claude-opus-4.5");
        assert_eq!(map_model_id("claude-haiku-4-5"), "claude-haiku-4.5");
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(map_model_id("Claude-Sonnet-4-5"), "CLAUDE_SONNET_4_5_20250929_V1_0");
    }

    #[test]
    fn test_unknown_falls_back_to_default() {
        assert_eq!(map_model_id("gpt-4o"), DEFAULT_KIRO_MODEL_ID);
        assert_eq!(map_model_id(""), DEFAULT_KIRO_MODEL_ID);
    }

    #[test]
    fn test_amazonq_detection() {
        assert!(is_amazonq("amazonq-developer"));
        assert!(!is_amazonq("claude-sonnet-4-5"));
    }

    #[test]
    fn test_amazonq_passes_through() {
        assert_eq!(map_model_id("amazonq-developer"), "amazonq-developer");
    }

    #[test]
    fn test_public_ids_sorted_and_nonempty() {
        let ids = public_model_ids();
        assert!(!ids.is_empty());
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert!(ids.contains(&"claude-sonnet-4-5"));
    }
}
