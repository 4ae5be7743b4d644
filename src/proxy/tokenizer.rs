// Advisory token estimation. Counts are used for response usage fields and
// the pre-flight context warning; nothing is ever rejected on size.

use crate::proxy::mappers::claude::models::{
    ClaudeRequest, ContentBlock, MessageContent, SystemPrompt,
};

/// Estimated tokens at which a context warning is attached.
pub const CONTEXT_WARN_TOKENS: u32 = 170_000;
/// Estimated tokens at which the warning escalates.
pub const CONTEXT_STRONG_WARN_TOKENS: u32 = 190_000;

/// chars/4 heuristic, rounded up. Never returns 0 for non-empty text.
pub fn estimate_tokens(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    ((text.len() + 3) / 4) as u32
}

/// Walk a request and estimate its prompt size.
pub fn estimate_request_tokens(request: &ClaudeRequest) -> u32 {
    let mut total: u32 = 0;

    if let Some(system) = &request.system {
        match system {
            SystemPrompt::String(s) => total += estimate_tokens(s),
            SystemPrompt::Array(blocks) => {
                for block in blocks {
                    total += estimate_tokens(&block.text);
                }
            }
        }
    }

    for msg in &request.messages {
        total += 4;
        match &msg.content {
            MessageContent::String(s) => total += estimate_tokens(s),
            MessageContent::Array(blocks) => {
                for block in blocks {
                    match block {
                        ContentBlock::Text { text } => total += estimate_tokens(text),
                        ContentBlock::Image { .. } => total += 100,
                        ContentBlock::ToolResult { content, .. } => {
                            total += estimate_tokens(&content.to_string())
                        }
                        _ => total += 10,
                    }
                }
            }
        }
    }

    total += 3;
    total
}

/// Context-length warning for the given estimate, if any.
pub fn context_warning(estimated: u32) -> Option<String> {
    if estimated >= CONTEXT_STRONG_WARN_TOKENS {
        Some(format!(
            "Estimated input is ~{} tokens, very close to the model context limit; responses may be truncated or rejected upstream.",
            estimated
        ))
    } else if estimated >= CONTEXT_WARN_TOKENS {
        Some(format!(
            "Estimated input is ~{} tokens, approaching the model context limit.",
            estimated
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::mappers::claude::models::Message;

    #[test]
    fn test_estimate_empty() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_estimate_rounds_up() {
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(400)), 100);
    }

    #[test]
    fn test_context_warning_thresholds() {
        assert!(context_warning(100).is_none());
        assert!(context_warning(CONTEXT_WARN_TOKENS - 1).is_none());

        let soft = context_warning(CONTEXT_WARN_TOKENS).unwrap();
        assert!(soft.contains("approaching"));

        let strong = context_warning(CONTEXT_STRONG_WARN_TOKENS).unwrap();
        assert!(strong.contains("very close"));
    }

    #[test]
    fn test_estimate_request_counts_system_and_messages() {
        let request = ClaudeRequest {
            model: "claude-sonnet-4-5".into(),
            system: Some(SystemPrompt::String("be brief".into())),
            messages: vec![Message {
                role: "user".into(),
                content: MessageContent::String("hello world".into()),
            }],
            ..Default::default()
        };
        let estimate = estimate_request_tokens(&request);
        // system (2) + per-message overhead (4) + text (3) + trailer (3)
        assert!(estimate >= 10);
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_estimate_monotonic_in_length(a in "[a-z]{0,200}", b in "[a-z]{1,50}") {
            let longer = format!("{a}{b}");
            prop_assert!(estimate_tokens(&longer) >= estimate_tokens(&a));
        }

        #[test]
        fn prop_estimate_nonzero_for_nonempty(s in "[a-zA-Z0-9 ]{1,100}") {
            prop_assert!(estimate_tokens(&s) > 0);
        }
    }
}
