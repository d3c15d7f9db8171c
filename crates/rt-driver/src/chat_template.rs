use rt_model::config::ChatTemplateType;

/// Formats a single user turn into the literal prompt string a model's
/// chosen chat convention expects, ending right where the assistant's
/// reply should start.
pub fn format_turn(template: ChatTemplateType, prompt: &str) -> String {
    match template {
        ChatTemplateType::TurnBased => format!("<start_of_turn>user\n{prompt}<end_of_turn>\n<start_of_turn>model\n"),
        ChatTemplateType::HeaderBased => {
            format!("<|begin_of_text|><|start_header_id|>user<|end_header_id|>\n\n{prompt}<|eot_id|><|start_header_id|>assistant<|end_header_id|>\n\n")
        }
        ChatTemplateType::ChannelBased => format!("<|start|>user<|message|>{prompt}<|end|><|start|>assistant<|channel|>final<|message|>"),
        ChatTemplateType::ChatMl => format!("<|im_start|>user\n{prompt}<|im_end|>\n<|im_start|>assistant\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_based_literal() {
        assert_eq!(
            format_turn(ChatTemplateType::TurnBased, "hi"),
            "<start_of_turn>user\nhi<end_of_turn>\n<start_of_turn>model\n"
        );
    }

    #[test]
    fn test_chatml_literal() {
        assert_eq!(format_turn(ChatTemplateType::ChatMl, "hi"), "<|im_start|>user\nhi<|im_end|>\n<|im_start|>assistant\n");
    }

    #[test]
    fn test_header_based_literal() {
        assert_eq!(
            format_turn(ChatTemplateType::HeaderBased, "hi"),
            "<|begin_of_text|><|start_header_id|>user<|end_header_id|>\n\nhi<|eot_id|><|start_header_id|>assistant<|end_header_id|>\n\n"
        );
    }

    #[test]
    fn test_channel_based_literal() {
        assert_eq!(
            format_turn(ChatTemplateType::ChannelBased, "hi"),
            "<|start|>user<|message|>hi<|end|><|start|>assistant<|channel|>final<|message|>"
        );
    }
}
