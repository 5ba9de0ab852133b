use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::access::{AccessResolver, MappingStore};
use crate::cache::TtlCache;
use crate::config::Settings;
use crate::execute::{ExecutionError, ExecutionResult, QueryExecutor};
use crate::extract::{CandidateQuery, ExtractionError, ExtractionStrategy, extract_with_strategy};
use crate::generation::{GenerationBackend, GenerationError};
use crate::introspect::{Catalog, DescriptionStore, SchemaIntrospector};
use crate::models::{SchemaDescriptor, ScopeMapping};
use crate::prompt::build_prompt;
use crate::record::{OutcomeRecorder, OutcomeReport, OutcomeSink};
use crate::sqlite::{AppStore, ConnectionPools};
use crate::validate::{QueryValidator, ValidationVerdict};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("query rejected: {}", .verdict.message())]
    Rejected {
        candidate: CandidateQuery,
        verdict: ValidationVerdict,
    },

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("request deadline passed before {stage}")]
    DeadlineExceeded { stage: &'static str },
}

impl PipelineError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::Generation(GenerationError::Timeout(_)) | Self::DeadlineExceeded { .. } => {
                "deadline_exceeded"
            }
            Self::Generation(_) => "generation_failed",
            Self::Extraction(_) => "no_query",
            Self::Rejected { .. } => "query_rejected",
            Self::Execution(error) => error.code(),
        }
    }

    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest(_) | Self::Extraction(_) | Self::Rejected { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryAnswer {
    pub scope: ScopeMapping,
    pub language: String,
    pub candidate: CandidateQuery,
    pub extraction: ExtractionStrategy,
    pub degraded_schema: bool,
    pub result: ExecutionResult,
    pub elapsed_seconds: f64,
}

pub struct Engine {
    resolver: AccessResolver,
    introspector: SchemaIntrospector,
    backend: Arc<dyn GenerationBackend>,
    validator: QueryValidator,
    executor: QueryExecutor,
    recorder: OutcomeRecorder,
    scopes: TtlCache<String, ScopeMapping>,
    descriptors: TtlCache<String, SchemaDescriptor>,
    request_timeout: Duration,
    max_request_chars: usize,
}

impl Engine {
    pub fn open(settings: &Settings, backend: Arc<dyn GenerationBackend>) -> anyhow::Result<Self> {
        let store = Arc::new(AppStore::open(&settings.app_store)?);
        let pools = Arc::new(ConnectionPools::from_settings(settings));
        Ok(Self::new(settings, store, pools, backend))
    }

    #[must_use]
    pub fn new(
        settings: &Settings,
        store: Arc<AppStore>,
        pools: Arc<ConnectionPools>,
        backend: Arc<dyn GenerationBackend>,
    ) -> Self {
        let mappings: Arc<dyn MappingStore> = store.clone();
        let descriptions: Arc<dyn DescriptionStore> = store.clone();
        let sink: Arc<dyn OutcomeSink> = store;
        let catalog: Arc<dyn Catalog> = pools.clone();

        Self {
            resolver: AccessResolver::new(mappings, settings),
            introspector: SchemaIntrospector::new(catalog, descriptions, settings.include_views),
            backend,
            validator: QueryValidator::new(settings.limits.max_query_chars),
            executor: QueryExecutor::new(pools, settings.limits.max_rows),
            recorder: OutcomeRecorder::new(sink),
            scopes: TtlCache::new(settings.cache_ttl(), settings.cache_max_entries),
            descriptors: TtlCache::new(settings.cache_ttl(), settings.cache_max_entries),
            request_timeout: settings.request_timeout(),
            max_request_chars: settings.limits.max_request_chars,
        }
    }

    #[must_use]
    pub fn with_outcome_sink(mut self, sink: Arc<dyn OutcomeSink>) -> Self {
        self.recorder = OutcomeRecorder::new(sink);
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn ask(
        &self,
        identity: Option<&str>,
        request: &str,
        language: Option<&str>,
    ) -> Result<QueryAnswer, PipelineError> {
        let started = Instant::now();
        let deadline = started + self.request_timeout;
        let mut candidate = None;

        let outcome = self.run(identity, request, language, deadline, &mut candidate);
        let elapsed_seconds = started.elapsed().as_secs_f64();
        let error_text = outcome.as_ref().err().map(ToString::to_string);

        self.recorder.record(OutcomeReport {
            identity: identity.unwrap_or_default(),
            request,
            candidate: candidate.as_ref().map(CandidateQuery::as_str),
            row_count: outcome.as_ref().map_or(0, |answer| answer.result.row_count),
            elapsed_seconds,
            success: outcome.is_ok(),
            error: error_text.as_deref(),
        });

        match &outcome {
            Ok(answer) => info!(
                role = %answer.scope.role_name,
                rows = answer.result.row_count,
                elapsed_seconds,
                "request answered"
            ),
            Err(error) => warn!(code = error.code(), error = %error, elapsed_seconds, "request failed"),
        }

        outcome.map(|mut answer| {
            answer.elapsed_seconds = elapsed_seconds;
            answer
        })
    }

    fn run(
        &self,
        identity: Option<&str>,
        request: &str,
        language: Option<&str>,
        deadline: Instant,
        candidate_slot: &mut Option<CandidateQuery>,
    ) -> Result<QueryAnswer, PipelineError> {
        let request = request.trim();
        if request.is_empty() {
            return Err(PipelineError::InvalidRequest("request is empty".to_string()));
        }
        let request_chars = request.chars().count();
        if request_chars > self.max_request_chars {
            return Err(PipelineError::InvalidRequest(format!(
                "request is {request_chars} characters; the limit is {}",
                self.max_request_chars
            )));
        }

        let scope = self.scope_for(identity);
        let language = language
            .map(str::trim)
            .filter(|language| !language.is_empty())
            .map_or_else(|| self.resolver.response_language(identity), str::to_string);
        info!(
            identity = %scope.identity,
            role = %scope.role_name,
            database = %scope.database_name,
            schema = %scope.schema_name,
            source = ?scope.source,
            "scope resolved"
        );

        let descriptor = self.describe(&scope, deadline);
        let prompt = build_prompt(request, &descriptor, &language);

        let remaining = remaining_before(deadline, "generation")?;
        let generation_started = Instant::now();
        let raw = self.backend.generate(&prompt, remaining)?;
        info!(
            backend = self.backend.name(),
            elapsed_seconds = generation_started.elapsed().as_secs_f64(),
            "generation finished"
        );

        let (strategy, candidate) = extract_with_strategy(&raw)?;
        *candidate_slot = Some(candidate.clone());

        let verdict = self.validator.validate(&candidate);
        if !verdict.accepted {
            return Err(PipelineError::Rejected { candidate, verdict });
        }

        remaining_before(deadline, "execution")?;
        let result = match self.executor.execute(&candidate, &scope, deadline) {
            Ok(result) => result,
            Err(error) => {
                if matches!(error, ExecutionError::PermissionDenied(_)) {
                    self.invalidate(identity);
                }
                return Err(error.into());
            }
        };

        Ok(QueryAnswer {
            scope,
            language,
            candidate,
            extraction: strategy,
            degraded_schema: descriptor.degraded,
            result,
            elapsed_seconds: 0.0,
        })
    }

    fn scope_for(&self, identity: Option<&str>) -> ScopeMapping {
        let key = cache_key(identity);
        if let Some(scope) = self.scopes.get(&key) {
            return scope;
        }
        let scope = self.resolver.resolve(identity);
        self.scopes.insert(key, scope.clone());
        scope
    }

    /// The permitted schema for `scope`. A cached descriptor is only reused
    /// when it was built for the same role, database and schema.
    pub fn describe(&self, scope: &ScopeMapping, deadline: Instant) -> SchemaDescriptor {
        let key = cache_key(Some(&scope.identity));
        if let Some(descriptor) = self
            .descriptors
            .get(&key)
            .filter(|descriptor| descriptor.covers(scope))
        {
            return descriptor;
        }
        let descriptor = self.introspector.introspect(scope, deadline);
        // Degraded descriptors are retried on the next request.
        if !descriptor.degraded {
            self.descriptors.insert(key, descriptor.clone());
        }
        descriptor
    }

    pub fn invalidate(&self, identity: Option<&str>) {
        let key = cache_key(identity);
        self.scopes.invalidate(&key);
        self.descriptors.invalidate(&key);
    }

    #[must_use]
    pub fn cached_scopes(&self) -> usize {
        self.scopes.len()
    }
}

fn cache_key(identity: Option<&str>) -> String {
    identity.map(str::trim).unwrap_or_default().to_string()
}

fn remaining_before(deadline: Instant, stage: &'static str) -> Result<Duration, PipelineError> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(PipelineError::DeadlineExceeded { stage });
    }
    Ok(remaining)
}
