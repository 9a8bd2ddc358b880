//! End-to-end analysis of one input.
//!
//! ```text
//! RawInput ──▶ SourceResolver ──▶ NutriScore ──▶ AnalystAgent ──▶ VerdictReconciler ──▶ Verdict
//!                    │                                                                    │
//!              catalog / OCR                                                        HistoryStore
//! ```
//!
//! The stages run sequentially under one deadline. When the deadline
//! expires the in-flight future is dropped, which cancels any outstanding
//! HTTP request, and [`PipelineError::Timeout`] is returned. Recording the
//! verdict in history happens after the deadline and never fails the call.

use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::analyst::AnalystAgent;
use crate::catalog;
use crate::config::Config;
use crate::error::PipelineError;
use crate::guidelines;
use crate::history::HistoryStore;
use crate::label::ImageCrateEnhancer;
use crate::llm;
use crate::models::{HistoryEntry, RawInput, Verdict};
use crate::nutriscore::{self, ScoreModifiers};
use crate::ocr;
use crate::reconcile::VerdictReconciler;
use crate::resolver::{ResolverSettings, SourceResolver};
use crate::traits::ProductCatalog;

pub struct Pipeline {
    resolver: SourceResolver,
    analyst: AnalystAgent,
    reconciler: VerdictReconciler,
    history: Arc<dyn HistoryStore>,
    default_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        resolver: SourceResolver,
        analyst: AnalystAgent,
        reconciler: VerdictReconciler,
        history: Arc<dyn HistoryStore>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            analyst,
            reconciler,
            history,
            default_timeout,
        }
    }

    /// Wire up the production collaborators named in `config`.
    ///
    /// API keys are read from the environment here, once.
    pub fn from_config(config: &Config, history: Arc<dyn HistoryStore>) -> Result<Self> {
        let catalog = catalog::create_catalog(&config.catalog)?;
        let reader = ocr::create_reader(&config.ocr)?;
        let model = llm::create_model(&config.llm)?;

        info!(
            catalog = catalog.name(),
            ocr = reader.name(),
            model = model.name(),
            "pipeline ready"
        );

        let resolver = SourceResolver::new(
            catalog,
            reader,
            Arc::new(ImageCrateEnhancer::default()),
            ResolverSettings::from_config(config),
        );

        Ok(Self::new(
            resolver,
            AnalystAgent::new(model),
            VerdictReconciler::new(config.scoring.clone()),
            history,
            Duration::from_secs(config.pipeline.request_timeout_secs),
        ))
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    /// Analyze one input. `timeout` overrides the configured default.
    pub async fn analyze(
        &self,
        input: &RawInput,
        timeout: Option<Duration>,
    ) -> Result<Verdict, PipelineError> {
        let limit = timeout.unwrap_or(self.default_timeout);
        let kind = input.kind();
        let start = Instant::now();
        info!(kind = kind.as_str(), "analysis started");

        let verdict = match tokio::time::timeout(limit, self.run(input)).await {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                warn!(kind = kind.as_str(), code = e.code(), error = %e, "analysis failed");
                return Err(e);
            }
            Err(_) => {
                warn!(kind = kind.as_str(), timeout_secs = limit.as_secs_f64(), "analysis timed out");
                return Err(PipelineError::Timeout { after: limit });
            }
        };

        match self
            .history
            .append(HistoryEntry::new(verdict.clone(), kind))
            .await
        {
            Ok(outcome) => {
                info!(identity = %verdict.product_identity, id = outcome.id(), "verdict recorded")
            }
            Err(e) => {
                warn!(identity = %verdict.product_identity, error = %e, "failed to record verdict in history")
            }
        }

        info!(
            identity = %verdict.product_identity,
            score = verdict.final_score,
            band = %verdict.band,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "analysis complete"
        );
        Ok(verdict)
    }

    async fn run(&self, input: &RawInput) -> Result<Verdict, PipelineError> {
        let record = self.resolver.resolve(input).await?;

        let facts = record.nutrition.clone().unwrap_or_default();
        let modifiers = ScoreModifiers {
            non_nutritive_sweeteners: guidelines::has_non_nutritive_sweetener(&record.ingredients),
        };
        let rule = nutriscore::score_with(&facts, record.category, modifiers);

        let assessment = self.analyst.analyze(&record, &rule).await;
        self.reconciler.reconcile(&record, &rule, assessment)
    }
}
