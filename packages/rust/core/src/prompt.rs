//! Prompt assembly for one chunk.

use postscout_shared::PromptConfig;

/// Build the prompt: instruction, optional competitor context, then the content.
pub fn build_prompt(config: &PromptConfig, content: &str) -> String {
    let mut prompt = config.instruction.trim().to_string();

    if !config.primary_competitors.is_empty() {
        prompt.push_str("\n\nPrimary Competitors: ");
        prompt.push_str(&config.primary_competitors.join(", "));
    }
    if !config.other_competitors.is_empty() {
        prompt.push_str("\n\nOther DXP/CMS Competitors: ");
        prompt.push_str(&config.other_competitors.join(", "));
    }

    prompt.push_str("\n\nContent: ");
    prompt.push_str(content);
    prompt
}
