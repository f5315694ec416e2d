use super::types::UNKNOWN_KEY;

/// Ordered inference rules: the first entry with a matching fragment wins.
pub const PROVIDER_RULES: &[(&[&str], &str)] = &[
    (&["claude", "anthropic"], "anthropic"),
    (&["gpt", "o1", "o3", "davinci"], "openai"),
    (&["gemini", "palm"], "google"),
    (&["mistral", "mixtral"], "mistral"),
    (&["deepseek"], "deepseek"),
    (&["llama", "meta"], "meta"),
];

/// Guess the provider of a model id by case-insensitive substring match.
pub fn infer_provider(model: Option<&str>) -> &'static str {
    let Some(model) = model else {
        return UNKNOWN_KEY;
    };
    let lowered = model.to_lowercase();

    PROVIDER_RULES
        .iter()
        .find(|(fragments, _)| fragments.iter().any(|f| lowered.contains(f)))
        .map(|(_, provider)| *provider)
        .unwrap_or(UNKNOWN_KEY)
}
