use chrono::{DateTime, Utc};

use super::provider::infer_provider;
use super::ranking::TokenTally;
use super::types::{
    window_duration, AggregateStats, ModelUsage, ProviderUsage, UsageEvent, TOP_N, UNKNOWN_KEY,
};

/// Full (untruncated) totals for one user's window.
#[derive(Debug, Clone, Default)]
pub struct WindowTotals {
    pub total_tokens: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_messages: u64,
    pub session_count: u64,
    pub cost: f64,
    pub models: TokenTally,
    pub providers: TokenTally,
}

impl WindowTotals {
    /// Fold every event created at or after `now - 24h`.
    pub fn collect<'a, I>(events: I, now: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = &'a UsageEvent>,
    {
        let cutoff = now - window_duration();
        let mut totals = Self::default();
        for event in events.into_iter().filter(|e| e.created_at >= cutoff) {
            totals.add(event);
        }
        totals
    }

    fn add(&mut self, event: &UsageEvent) {
        self.total_tokens = self.total_tokens.saturating_add(event.total_tokens);
        self.prompt_tokens = self.prompt_tokens.saturating_add(event.prompt_tokens);
        self.completion_tokens = self
            .completion_tokens
            .saturating_add(event.completion_tokens);
        self.total_messages = self
            .total_messages
            .saturating_add(event.message_count.unwrap_or(0));
        self.cost += event.cost;
        self.session_count += 1;

        let model = event.model();
        self.models
            .add(model.unwrap_or(UNKNOWN_KEY), event.total_tokens);

        let provider = event.provider().unwrap_or_else(|| infer_provider(model));
        self.providers.add(provider, event.total_tokens);
    }

    pub fn into_stats(self) -> AggregateStats {
        AggregateStats {
            total_tokens: self.total_tokens,
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_messages: self.total_messages,
            session_count: self.session_count,
            cost: self.cost,
            top_models: self
                .models
                .top(TOP_N)
                .into_iter()
                .map(|(model, tokens)| ModelUsage { model, tokens })
                .collect(),
            top_providers: self
                .providers
                .top(TOP_N)
                .into_iter()
                .map(|(provider, tokens)| ProviderUsage { provider, tokens })
                .collect(),
        }
    }
}

/// Aggregate a user's history into the wrapped stats as of `now`.
pub fn aggregate_window<'a, I>(events: I, now: DateTime<Utc>) -> AggregateStats
where
    I: IntoIterator<Item = &'a UsageEvent>,
{
    WindowTotals::collect(events, now).into_stats()
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn event(id: &str, model: Option<&str>, tokens: u64, at: DateTime<Utc>) -> UsageEvent {
        UsageEvent {
            id: id.to_string(),
            user_id: "u1".to_string(),
            created_at: at,
            prompt_tokens: tokens / 2,
            completion_tokens: tokens - tokens / 2,
            total_tokens: tokens,
            cost: tokens as f64 / 1000.0,
            message_count: Some(2),
            model: model.map(str::to_string),
            provider: None,
        }
    }

    #[test]
    fn end_to_end_ranking() {
        let now = Utc::now();
        let events = vec![
            event("e1", Some("gpt-4"), 100, now - Duration::hours(3)),
            event("e2", Some("gpt-4"), 50, now - Duration::hours(2)),
            event("e3", Some("claude-3"), 200, now - Duration::hours(1)),
        ];

        let stats = aggregate_window(&events, now);
        assert_eq!(stats.total_tokens, 350);
        assert_eq!(stats.session_count, 3);
        assert_eq!(stats.total_messages, 6);
        assert_eq!(
            stats.top_models,
            vec![
                ModelUsage { model: "claude-3".into(), tokens: 200 },
                ModelUsage { model: "gpt-4".into(), tokens: 150 },
            ]
        );
        assert_eq!(
            stats.top_providers,
            vec![
                ProviderUsage { provider: "anthropic".into(), tokens: 200 },
                ProviderUsage { provider: "openai".into(), tokens: 150 },
            ]
        );
    }

    #[test]
    fn window_lower_bound_is_inclusive() {
        let now = Utc::now();
        let events = vec![
            event("edge", Some("gpt-4"), 10, now - Duration::hours(24)),
            event("old", Some("gpt-4"), 99, now - Duration::hours(24) - Duration::milliseconds(1)),
        ];
        let stats = aggregate_window(&events, now);
        assert_eq!(stats.total_tokens, 10);
        assert_eq!(stats.session_count, 1);
    }

    #[test]
    fn empty_window_is_all_zero() {
        let stats = aggregate_window(&Vec::<UsageEvent>::new(), Utc::now());
        assert_eq!(stats, AggregateStats::default());
    }

    #[test]
    fn explicit_provider_wins_over_inference() {
        let now = Utc::now();
        let mut e = event("e1", Some("gpt-4"), 40, now);
        e.provider = Some("azure".into());
        let stats = aggregate_window(&[e], now);
        assert_eq!(stats.top_providers[0].provider, "azure");
    }

    #[test]
    fn missing_model_and_messages_default() {
        let now = Utc::now();
        let mut e = event("e1", None, 40, now);
        e.message_count = None;
        let stats = aggregate_window(&[e], now);
        assert_eq!(stats.top_models[0].model, "unknown");
        assert_eq!(stats.top_providers[0].provider, "unknown");
        assert_eq!(stats.total_messages, 0);
    }

    #[test]
    fn full_model_map_sums_to_total_even_when_truncated() {
        let now = Utc::now();
        let events: Vec<_> = (0..8)
            .map(|i| event(&format!("e{i}"), Some(format!("m{i}").as_str()), 10 + i, now))
            .collect();
        let totals = WindowTotals::collect(&events, now);
        assert_eq!(totals.models.total(), totals.total_tokens);
        let stats = totals.into_stats();
        assert_eq!(stats.top_models.len(), 5);
        assert!(stats.top_models.iter().map(|m| m.tokens).sum::<u64>() < stats.total_tokens);
    }
}
