use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::ExtractError;
use crate::provider::{GeneratedText, RosterProvider, ROSTER_INSTRUCTION, TAGS_INSTRUCTION};
use crate::sanitizer::{sanitize, sanitize_tag_map};
use crate::schema::{ExtractionMeta, RosterRecord};

/// Extract a roster for a free-text team query, trying providers in registry
/// order. The winning record carries `meta` naming the provider and timing.
pub async fn extract_roster(
    providers: &[Box<dyn RosterProvider>],
    query: &str,
) -> Result<RosterRecord, ExtractError> {
    let prompt = format!("Extract the roster for: {}. Return ONLY valid JSON.", query);
    let (mut record, meta) = generate_with_fallback(providers, &prompt, ROSTER_INSTRUCTION, |text| {
        sanitize(text, query)
    })
    .await?;
    record.meta = Some(meta);
    Ok(record)
}

/// Generate search aliases for a set of athlete names over the same provider
/// registry. Diagnostics are logged rather than returned; the alias map is
/// the whole result.
pub async fn generate_player_tags(
    providers: &[Box<dyn RosterProvider>],
    names: &[String],
    team_name: Option<&str>,
    sport: Option<&str>,
) -> Result<BTreeMap<String, Vec<String>>, ExtractError> {
    let prompt = tags_prompt(names, team_name, sport);
    let (tags, meta) =
        generate_with_fallback(providers, &prompt, TAGS_INSTRUCTION, sanitize_tag_map).await?;
    info!(
        "Generated tags for {} athletes via {} in {}ms",
        tags.len(),
        meta.provider,
        meta.latency_ms
    );
    Ok(tags)
}

/// One attempt per provider, strictly sequential. Retryable failures advance
/// to the next provider after a 2^attempt-second backoff (none after the
/// last); auth and bad-request failures abort the loop immediately.
async fn generate_with_fallback<T>(
    providers: &[Box<dyn RosterProvider>],
    prompt: &str,
    system_instruction: &str,
    parse: impl Fn(&str) -> Result<T, ExtractError>,
) -> Result<(T, ExtractionMeta), ExtractError> {
    let mut last_error = None;

    for (attempt, provider) in providers.iter().enumerate() {
        info!(
            "Attempt {}/{}: {}",
            attempt + 1,
            providers.len(),
            provider.id()
        );

        let start = Instant::now();
        let outcome = match provider.generate(prompt, system_instruction).await {
            Ok(generated) => parse(&generated.text).map(|parsed| (parsed, generated)),
            Err(e) => Err(e),
        };

        match outcome {
            Ok((parsed, generated)) => {
                return Ok((parsed, build_meta(provider.id(), start, &generated)));
            }
            Err(e) => {
                warn!("Provider {} failed ({}): {}", provider.id(), e.class(), e);
                if !e.is_retryable() {
                    return Err(e);
                }
                last_error = Some(e);

                if attempt + 1 < providers.len() {
                    let backoff = Duration::from_secs(2u64.pow(attempt as u32 + 1));
                    info!(
                        "Backing off {}s before next provider",
                        backoff.as_secs()
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| ExtractError::Other("no providers configured".into())))
}

fn build_meta(provider: &str, start: Instant, generated: &GeneratedText) -> ExtractionMeta {
    ExtractionMeta {
        provider: provider.to_string(),
        latency_ms: start.elapsed().as_millis() as u64,
        prompt_tokens: generated.prompt_tokens,
        completion_tokens: generated.completion_tokens,
        total_tokens: generated.total_tokens,
    }
}

fn tags_prompt(names: &[String], team_name: Option<&str>, sport: Option<&str>) -> String {
    let mut prompt = String::from("Generate search aliases for the following athletes:\n");
    for name in names {
        prompt.push_str(&format!("- {}\n", name));
    }
    let context = [team_name, sport]
        .iter()
        .flatten()
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    if !context.is_empty() {
        prompt.push_str(&format!("Context: {}\n", context));
    }
    prompt.push_str("\nReturn ONLY valid JSON. No markdown, no explanation.");
    prompt
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    enum Script {
        Succeed(&'static str),
        Fail(fn() -> ExtractError),
    }

    struct Scripted {
        name: &'static str,
        script: Script,
        calls: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn new(name: &'static str, script: Script) -> Self {
            Self {
                name,
                script,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl RosterProvider for Scripted {
        fn id(&self) -> &str {
            self.name
        }

        async fn generate(
            &self,
            _prompt: &str,
            _system_instruction: &str,
        ) -> Result<GeneratedText, ExtractError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.script {
                Script::Succeed(text) => Ok(GeneratedText {
                    text: (*text).to_string(),
                    prompt_tokens: 10,
                    completion_tokens: 20,
                    total_tokens: 30,
                }),
                Script::Fail(make) => Err(make()),
            }
        }
    }

    fn registry(scripted: Vec<Scripted>) -> (Vec<Box<dyn RosterProvider>>, Vec<Arc<AtomicUsize>>) {
        let counters = scripted.iter().map(|s| Arc::clone(&s.calls)).collect();
        let boxed = scripted
            .into_iter()
            .map(|s| Box::new(s) as Box<dyn RosterProvider>)
            .collect();
        (boxed, counters)
    }

    const GOOD: &str = r#"{"teamName":"Atoms","sport":"Football","players":[{"name":"Bob Smith","position":"QB"}]}"#;

    #[tokio::test(start_paused = true)]
    async fn first_success_stops_the_loop() {
        let (providers, calls) = registry(vec![
            Scripted::new("alpha", Script::Succeed(GOOD)),
            Scripted::new("beta", Script::Succeed(GOOD)),
        ]);

        let record = extract_roster(&providers, "Atoms").await.unwrap();
        assert_eq!(record.team_name, "Atoms");
        let meta = record.meta.unwrap();
        assert_eq!(meta.provider, "alpha");
        assert_eq!(meta.total_tokens, 30);
        assert_eq!(calls[0].load(Ordering::SeqCst), 1);
        assert_eq!(calls[1].load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failures_advance_to_the_next_provider() {
        let (providers, calls) = registry(vec![
            Scripted::new("alpha", Script::Fail(|| ExtractError::RateLimit("quota".into()))),
            Scripted::new("beta", Script::Fail(|| ExtractError::Unavailable("503".into()))),
            Scripted::new("gamma", Script::Succeed(GOOD)),
        ]);

        let record = extract_roster(&providers, "Atoms").await.unwrap();
        assert_eq!(record.meta.unwrap().provider, "gamma");
        assert_eq!(calls[0].load(Ordering::SeqCst), 1);
        assert_eq!(calls[1].load(Ordering::SeqCst), 1);
        assert_eq!(calls[2].load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_aborts_without_trying_the_next() {
        let (providers, calls) = registry(vec![
            Scripted::new("alpha", Script::Fail(|| ExtractError::Auth("key rejected".into()))),
            Scripted::new("beta", Script::Succeed(GOOD)),
        ]);

        let err = extract_roster(&providers, "Atoms").await.unwrap_err();
        assert!(matches!(err, ExtractError::Auth(_)));
        assert_eq!(calls[0].load(Ordering::SeqCst), 1);
        assert_eq!(calls[1].load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_surfaces_the_last_error() {
        let (providers, _) = registry(vec![
            Scripted::new("alpha", Script::Fail(|| ExtractError::RateLimit("quota".into()))),
            Scripted::new("beta", Script::Fail(|| ExtractError::Unavailable("outage".into()))),
        ]);

        let err = extract_roster(&providers, "Atoms").await.unwrap_err();
        assert!(matches!(err, ExtractError::Unavailable(_)));
        assert!(err.to_string().contains("outage"));
    }

    #[tokio::test(start_paused = true)]
    async fn unparseable_output_falls_through_to_the_next_provider() {
        let (providers, calls) = registry(vec![
            Scripted::new("alpha", Script::Succeed("no structure here at all")),
            Scripted::new("beta", Script::Succeed(GOOD)),
        ]);

        let record = extract_roster(&providers, "Atoms").await.unwrap();
        assert_eq!(record.meta.unwrap().provider, "beta");
        assert_eq!(calls[0].load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_registry_reports_configuration_error() {
        let providers: Vec<Box<dyn RosterProvider>> = Vec::new();
        let err = extract_roster(&providers, "Atoms").await.unwrap_err();
        assert!(matches!(err, ExtractError::Other(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn tags_use_the_same_fallback_loop() {
        let (providers, _) = registry(vec![
            Scripted::new("alpha", Script::Fail(|| ExtractError::Unavailable("503".into()))),
            Scripted::new(
                "beta",
                Script::Succeed(r##"{"Bob Smith": ["Bobby", "#12"]}"##),
            ),
        ]);

        let names = vec!["Bob Smith".to_string()];
        let tags = generate_player_tags(&providers, &names, Some("Atoms"), Some("Football"))
            .await
            .unwrap();
        assert_eq!(tags["Bob Smith"], vec!["Bobby", "#12"]);
    }

    #[test]
    fn tags_prompt_lists_names_and_context() {
        let names = vec!["Bob Smith".to_string(), "Alice Young".to_string()];
        let prompt = tags_prompt(&names, Some("Atoms"), None);
        assert!(prompt.contains("- Bob Smith"));
        assert!(prompt.contains("- Alice Young"));
        assert!(prompt.contains("Context: Atoms"));
    }
}
