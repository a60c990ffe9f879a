use std::{collections::BTreeMap, env, str::FromStr, sync::Arc, time::Duration};

use rand::seq::SliceRandom;
use serde::Serialize;
use tokio::{task::JoinSet, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    errors::ConfigError,
    models::{GenerationRequest, GenerationResult},
    registry::BackendRegistry,
    relay::CompletionRelay,
};

macro_rules! prompt {
    ($question:literal) => {
        concat!(
            "### Database Schema:\nTable: employees\n",
            "Columns: id, name, department_id, salary, hire_date\n\n",
            "### Question:\n",
            $question,
            "\n\n### SQL:\n"
        )
    };
}

pub const DEFAULT_PROMPTS: [&str; 5] = [
    prompt!("List all employees hired after 2020."),
    prompt!("Find employees in department 5 earning more than 100000."),
    prompt!("Show employee names and salaries ordered by salary descending."),
    prompt!("Count the number of employees in each department."),
    prompt!("What is the average salary of employees hired after 2015?"),
];

pub trait PromptSource: Send + Sync {
    fn prompts_for(&self, caller: usize, count: usize) -> Vec<String>;
}

#[derive(Debug, Clone)]
pub struct PromptPool {
    prompts: Vec<String>,
}

impl PromptPool {
    pub fn new(prompts: Vec<String>) -> Self {
        Self { prompts }
    }
}

impl Default for PromptPool {
    fn default() -> Self {
        Self::new(DEFAULT_PROMPTS.iter().map(|prompt| (*prompt).to_owned()).collect())
    }
}

impl PromptSource for PromptPool {
    fn prompts_for(&self, _caller: usize, count: usize) -> Vec<String> {
        if self.prompts.is_empty() {
            return vec![String::new(); count];
        }

        let mut rng = rand::thread_rng();
        let mut selected = Vec::with_capacity(count);
        while selected.len() < count {
            let take = (count - selected.len()).min(self.prompts.len());
            selected.extend(self.prompts.choose_multiple(&mut rng, take).cloned());
        }
        selected
    }
}

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub concurrency: usize,
    pub requests_per_caller: usize,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub stop: Option<Vec<String>>,
}

impl HarnessConfig {
    pub fn new(model: impl Into<String>, concurrency: usize, requests_per_caller: usize) -> Self {
        Self {
            concurrency,
            requests_per_caller,
            model: model.into(),
            max_tokens: 128,
            temperature: Some(0.3),
            stop: Some(vec![";".to_owned()]),
        }
    }

    pub fn from_env(registry: &BackendRegistry) -> Result<Self, ConfigError> {
        Self::from_lookup(registry, |name| env::var(name).ok())
    }

    // Without RELAY_LOADTEST_MODEL the first registered model is driven.
    pub fn from_lookup<F>(registry: &BackendRegistry, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let model = lookup("RELAY_LOADTEST_MODEL")
            .filter(|value| !value.trim().is_empty())
            .or_else(|| registry.models().first().map(|model| (*model).to_owned()))
            .ok_or(ConfigError::EmptyRegistry)?;

        let mut config = Self::new(
            model,
            read_parsed(&lookup, "CONCURRENCY", 10)?,
            read_parsed(&lookup, "REQUESTS_PER_CLIENT", 5)?,
        );
        for (name, value) in [
            ("CONCURRENCY", config.concurrency),
            ("REQUESTS_PER_CLIENT", config.requests_per_caller),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    name,
                    value: "0".to_owned(),
                });
            }
        }
        config.max_tokens = read_parsed(&lookup, "MAX_TOKENS", 128)?;
        config.temperature = Some(read_parsed(&lookup, "TEMPERATURE", 0.3)?);
        Ok(config)
    }

    pub fn expected_calls(&self) -> usize {
        self.concurrency.saturating_mul(self.requests_per_caller)
    }

    fn request(&self, prompt: String) -> GenerationRequest {
        GenerationRequest {
            model: self.model.clone(),
            prompt,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: None,
            stop: self.stop.clone(),
        }
    }
}

fn read_parsed<T, F>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        None => Ok(default),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CallRecord {
    pub caller: usize,
    pub sequence: usize,
    #[serde(serialize_with = "as_millis")]
    pub latency: Duration,
    pub error: Option<&'static str>,
}

impl CallRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct LatencySummary {
    pub min_ms: f64,
    pub mean_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateStats {
    pub expected: usize,
    pub count: usize,
    pub successes: usize,
    pub failures: usize,
    pub success_rate: f64,
    pub latency: Option<LatencySummary>,
    pub errors: BTreeMap<String, usize>,
    pub elapsed_secs: f64,
    pub throughput: f64,
    #[serde(skip)]
    pub records: Vec<CallRecord>,
}

impl AggregateStats {
    pub fn from_records(expected: usize, records: Vec<CallRecord>, elapsed: Duration) -> Self {
        let count = records.len();
        let successes = records.iter().filter(|record| record.succeeded()).count();
        let failures = count - successes;

        let latencies = records
            .iter()
            .filter(|record| record.succeeded())
            .map(|record| millis(record.latency))
            .collect::<Vec<_>>();
        let latency = (!latencies.is_empty()).then(|| LatencySummary {
            min_ms: latencies.iter().copied().fold(f64::INFINITY, f64::min),
            mean_ms: latencies.iter().sum::<f64>() / latencies.len() as f64,
            max_ms: latencies.iter().copied().fold(0.0, f64::max),
        });

        let mut errors = BTreeMap::new();
        for label in records.iter().filter_map(|record| record.error) {
            *errors.entry(label.to_owned()).or_insert(0) += 1;
        }

        let elapsed_secs = elapsed.as_secs_f64();
        Self {
            expected,
            count,
            successes,
            failures,
            success_rate: if count == 0 {
                0.0
            } else {
                successes as f64 / count as f64
            },
            latency,
            errors,
            elapsed_secs,
            throughput: if elapsed_secs > 0.0 {
                successes as f64 / elapsed_secs
            } else {
                0.0
            },
            records,
        }
    }

    pub fn lost(&self) -> usize {
        self.expected.saturating_sub(self.count)
    }

    pub fn log_summary(&self) {
        info!(
            expected = self.expected,
            total = self.count,
            successes = self.successes,
            failures = self.failures,
            success_rate = self.success_rate,
            elapsed_secs = self.elapsed_secs,
            throughput = self.throughput,
            "load test finished"
        );
        if let Some(latency) = self.latency {
            info!(
                min_ms = latency.min_ms,
                mean_ms = latency.mean_ms,
                max_ms = latency.max_ms,
                "latency of successful calls"
            );
        }
        for (kind, occurrences) in &self.errors {
            warn!(kind = %kind, occurrences, "load test errors");
        }
    }
}

pub async fn run(
    relay: Arc<CompletionRelay>,
    config: &HarnessConfig,
    prompts: Arc<dyn PromptSource>,
) -> AggregateStats {
    info!(
        model = %config.model,
        concurrency = config.concurrency,
        requests_per_caller = config.requests_per_caller,
        "starting load test"
    );

    let started = Instant::now();
    let mut callers = JoinSet::new();
    for caller in 1..=config.concurrency {
        let relay = relay.clone();
        let requests = prompts
            .prompts_for(caller, config.requests_per_caller)
            .into_iter()
            .map(|prompt| config.request(prompt))
            .collect::<Vec<_>>();
        callers.spawn(simulate_caller(relay, caller, requests));
    }

    let mut records = Vec::with_capacity(config.expected_calls());
    while let Some(joined) = callers.join_next().await {
        match joined {
            Ok(caller_records) => records.extend(caller_records),
            Err(error) => warn!(error = %error, "caller task did not finish"),
        }
    }
    let elapsed = started.elapsed();

    AggregateStats::from_records(config.expected_calls(), records, elapsed)
}

async fn simulate_caller(
    relay: Arc<CompletionRelay>,
    caller: usize,
    requests: Vec<GenerationRequest>,
) -> Vec<CallRecord> {
    let mut records = Vec::with_capacity(requests.len());
    for (index, request) in requests.into_iter().enumerate() {
        let started = Instant::now();
        let result = relay.generate(request).await;
        let latency = started.elapsed();

        let error = match &result {
            GenerationResult::Success { text } => {
                debug!(
                    caller,
                    sequence = index + 1,
                    latency_ms = latency.as_millis() as u64,
                    chars = text.len(),
                    "call succeeded"
                );
                None
            }
            GenerationResult::Failure { kind, .. } => Some(kind.label()),
        };
        records.push(CallRecord {
            caller,
            sequence: index + 1,
            latency,
            error,
        });
    }
    records
}

fn as_millis<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(millis(*value))
}

fn millis(value: Duration) -> f64 {
    value.as_micros() as f64 / 1_000.0
}
