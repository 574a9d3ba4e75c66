//! Proposal pipeline: search → (identify products) → retrieve → assemble → generate → persist.
//!
//! A [`Pipeline`] is an ordered list of [`StageId`]s. Each stage takes the
//! [`PipelineState`] by value and returns a new one with only its own fields
//! changed. Stages never return errors: a failing collaborator leaves the
//! stage's output empty (or at a default), records a [`StageFailure`], and the
//! run moves on. `run` always returns a state, even when every stage failed.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use rmproposal_providers::{TextGenerator, WebHit, WebQuery, WebSearch};
use rmproposal_shared::{
    AppConfig, FailureKind, Origin, Result, RmProposalError, SourceFragment, WorkItem,
};

use crate::assembler::{self, AssembledContext, ContextInput};
use crate::dedup;
use crate::products;
use crate::prompts;
use crate::retrieval::{IndexStatus, RetrievalIndex};
use crate::writer;

// ---------------------------------------------------------------------------
// Stages and variants
// ---------------------------------------------------------------------------

/// Pipeline stages, declared in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    SearchWeb,
    IdentifyProducts,
    RetrieveInternal,
    Assemble,
    Generate,
    Persist,
}

impl StageId {
    /// Human-readable stage name, used in failure messages and progress output.
    pub fn label(&self) -> &'static str {
        match self {
            Self::SearchWeb => "Web search",
            Self::IdentifyProducts => "Product identification",
            Self::RetrieveInternal => "Internal retrieval",
            Self::Assemble => "Context assembly",
            Self::Generate => "Analysis generation",
            Self::Persist => "Save",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which proposal flavour to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalVariant {
    /// Web search plus general internal documents.
    Basic,
    /// Web search, product identification, and product information sheets.
    Eligibility,
}

impl ProposalVariant {
    pub fn has_product_identification(&self) -> bool {
        matches!(self, Self::Eligibility)
    }
}

impl fmt::Display for ProposalVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic => f.write_str("basic"),
            Self::Eligibility => f.write_str("eligibility"),
        }
    }
}

impl FromStr for ProposalVariant {
    type Err = RmProposalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" | "hybrid" => Ok(Self::Basic),
            "eligibility" => Ok(Self::Eligibility),
            other => Err(RmProposalError::validation(format!(
                "unknown proposal variant '{other}' (expected 'basic' or 'eligibility')"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// A recorded stage failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageFailure {
    pub stage: StageId,
    pub kind: FailureKind,
    pub message: String,
}

/// The record threaded through the stages.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineState {
    pub item: WorkItem,
    pub variant: ProposalVariant,
    pub web: Vec<SourceFragment>,
    pub products: Vec<String>,
    pub internal: Vec<SourceFragment>,
    pub product_info: Vec<SourceFragment>,
    pub context: AssembledContext,
    pub analysis: String,
    pub artifact_path: Option<PathBuf>,
    pub failures: Vec<StageFailure>,
    pub completed: Vec<StageId>,
}

impl PipelineState {
    pub fn new(item: WorkItem, variant: ProposalVariant) -> Self {
        Self {
            item,
            variant,
            web: Vec::new(),
            products: Vec::new(),
            internal: Vec::new(),
            product_info: Vec::new(),
            context: AssembledContext::default(),
            analysis: String::new(),
            artifact_path: None,
            failures: Vec::new(),
            completed: Vec::new(),
        }
    }

    /// All failure messages joined, or `None` for a clean run.
    pub fn error(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        Some(
            self.failures
                .iter()
                .map(|f| f.message.as_str())
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }

    fn with_failure(mut self, stage: StageId, kind: FailureKind, message: String) -> Self {
        warn!(stage = %stage, %kind, %message, "stage degraded");
        self.failures.push(StageFailure {
            stage,
            kind,
            message,
        });
        self
    }

    fn with_error(self, stage: StageId, err: &RmProposalError) -> Self {
        let message = format!("{} failed: {err}", stage.label());
        self.with_failure(stage, err.failure_kind(), message)
    }
}

// ---------------------------------------------------------------------------
// Settings and collaborators
// ---------------------------------------------------------------------------

/// Policy knobs for a run, usually derived from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub search_max_results: u32,
    pub search_time_range: String,
    pub internal_top_k: usize,
    pub product_top_k: usize,
    pub dedup_prefix_chars: usize,
    pub product_context_chars: usize,
    pub max_products: usize,
    pub default_products: Vec<String>,
    pub market: String,
    pub temperature: f32,
    pub output_dir: PathBuf,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            search_max_results: config.search.max_results,
            search_time_range: config.search.time_range.clone(),
            internal_top_k: config.pipeline.internal_top_k,
            product_top_k: config.pipeline.product_top_k,
            dedup_prefix_chars: config.pipeline.dedup_prefix_chars,
            product_context_chars: config.pipeline.product_context_chars,
            max_products: config.pipeline.max_products,
            default_products: config.pipeline.default_products.clone(),
            market: config.pipeline.market.clone(),
            temperature: config.generation.temperature,
            output_dir: PathBuf::from(&config.pipeline.output_dir),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// External services a run talks to.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub search: &'a dyn WebSearch,
    pub generator: &'a dyn TextGenerator,
    /// `None` when no document index is configured for this run.
    pub index: Option<&'a dyn RetrievalIndex>,
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting stage transitions.
pub trait ProgressReporter: Send + Sync {
    fn stage_started(&self, stage: StageId);
    /// `summary` is a short description of what the stage produced.
    fn stage_finished(&self, stage: StageId, summary: &str, degraded: bool);
    fn done(&self, state: &PipelineState);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage_started(&self, _stage: StageId) {}
    fn stage_finished(&self, _stage: StageId, _summary: &str, _degraded: bool) {}
    fn done(&self, _state: &PipelineState) {}
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// An ordered, validated stage list for one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    variant: ProposalVariant,
    stages: Vec<StageId>,
}

impl Pipeline {
    /// The full stage list for `variant`.
    pub fn for_variant(variant: ProposalVariant) -> Self {
        let stages = [
            StageId::SearchWeb,
            StageId::IdentifyProducts,
            StageId::RetrieveInternal,
            StageId::Assemble,
            StageId::Generate,
            StageId::Persist,
        ]
        .into_iter()
        .filter(|s| *s != StageId::IdentifyProducts || variant.has_product_identification())
        .collect();

        Self { variant, stages }
    }

    /// A custom stage list. It must start with [`StageId::SearchWeb`], keep
    /// canonical order without repeats, and only include product
    /// identification for variants that have it.
    pub fn with_stages(variant: ProposalVariant, stages: Vec<StageId>) -> Result<Self> {
        if stages.first() != Some(&StageId::SearchWeb) {
            return Err(RmProposalError::validation(
                "pipeline must start with the web search stage",
            ));
        }
        if stages.windows(2).any(|w| w[0] >= w[1]) {
            return Err(RmProposalError::validation(
                "pipeline stages must be unique and in canonical order",
            ));
        }
        if stages.contains(&StageId::IdentifyProducts) && !variant.has_product_identification() {
            return Err(RmProposalError::validation(format!(
                "the {variant} variant has no product identification stage"
            )));
        }
        Ok(Self { variant, stages })
    }

    /// This pipeline without the persist stage.
    pub fn without_persist(self) -> Self {
        Self {
            stages: self
                .stages
                .into_iter()
                .filter(|s| *s != StageId::Persist)
                .collect(),
            ..self
        }
    }

    pub fn variant(&self) -> ProposalVariant {
        self.variant
    }

    pub fn stages(&self) -> &[StageId] {
        &self.stages
    }

    /// Run every stage in order. Never fails; inspect `failures` on the result.
    #[instrument(skip_all, fields(subject = %item.subject(), variant = %self.variant))]
    pub async fn run(
        &self,
        item: WorkItem,
        collaborators: &Collaborators<'_>,
        settings: &PipelineSettings,
        progress: &dyn ProgressReporter,
    ) -> PipelineState {
        let start = Instant::now();
        info!(stages = self.stages.len(), "starting proposal pipeline");

        let mut state = PipelineState::new(item, self.variant);

        for &stage in &self.stages {
            progress.stage_started(stage);
            let failures_before = state.failures.len();

            state = match stage {
                StageId::SearchWeb => search_web(state, collaborators.search, settings).await,
                StageId::IdentifyProducts => {
                    identify_products(state, collaborators.generator, settings).await
                }
                StageId::RetrieveInternal => {
                    retrieve_internal(state, collaborators.index, settings).await
                }
                StageId::Assemble => assemble_context(state),
                StageId::Generate => generate(state, collaborators.generator, settings).await,
                StageId::Persist => persist(state, settings),
            };

            state.completed.push(stage);
            let degraded = state.failures.len() > failures_before;
            progress.stage_finished(stage, &stage_summary(stage, &state), degraded);
        }

        progress.done(&state);

        info!(
            web = state.web.len(),
            internal = state.internal.len(),
            product_info = state.product_info.len(),
            failures = state.failures.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "proposal pipeline complete"
        );

        state
    }
}

/// One-line description of a stage's output.
fn stage_summary(stage: StageId, state: &PipelineState) -> String {
    match stage {
        StageId::SearchWeb => format!("{} web sources", state.web.len()),
        StageId::IdentifyProducts => state.products.join(", "),
        StageId::RetrieveInternal if state.variant.has_product_identification() => {
            format!("{} product info fragments", state.product_info.len())
        }
        StageId::RetrieveInternal => format!("{} internal fragments", state.internal.len()),
        StageId::Assemble => format!("{} characters of context", state.context.text.chars().count()),
        StageId::Generate => format!("{} characters of analysis", state.analysis.chars().count()),
        StageId::Persist => state
            .artifact_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "not saved".into()),
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

fn web_fragments(hits: Vec<WebHit>) -> Vec<SourceFragment> {
    hits.into_iter()
        .enumerate()
        .map(|(i, hit)| SourceFragment {
            origin: Origin::Web,
            ordinal: i + 1,
            title: Some(hit.title),
            body: hit.content,
            locator: hit.url,
            file_type: None,
            relevance: hit.score,
        })
        .collect()
}

#[instrument(skip_all, fields(query = %state.item.web_query()))]
async fn search_web(
    state: PipelineState,
    search: &dyn WebSearch,
    settings: &PipelineSettings,
) -> PipelineState {
    let query = WebQuery {
        text: state.item.web_query().to_string(),
        max_results: settings.search_max_results,
        time_range: settings.search_time_range.clone(),
    };

    match search.search(&query).await {
        Ok(hits) => {
            let web = web_fragments(hits);
            info!(sources = web.len(), "web search complete");
            PipelineState { web, ..state }
        }
        Err(e) => PipelineState {
            web: Vec::new(),
            ..state
        }
        .with_error(StageId::SearchWeb, &e),
    }
}

#[instrument(skip_all)]
async fn identify_products(
    state: PipelineState,
    generator: &dyn TextGenerator,
    settings: &PipelineSettings,
) -> PipelineState {
    let defaults = settings.default_products.clone();

    if state.web.is_empty() {
        info!("no web context; using default products");
        return PipelineState {
            products: defaults,
            ..state
        };
    }

    let web_context = assembler::render_fragments(&state.web);
    let request = prompts::product_identification_request(
        state.item.subject(),
        products::truncate_chars(&web_context, settings.product_context_chars),
        settings.temperature,
    );

    let parsed = match generator.generate(&request).await {
        Ok(response) => products::parse_product_list(&response, settings.max_products),
        Err(e) => Err(e),
    };

    match parsed {
        Ok(products) => {
            info!(products = ?products, "products identified");
            PipelineState { products, ..state }
        }
        Err(e) => PipelineState {
            products: defaults,
            ..state
        }
        .with_error(StageId::IdentifyProducts, &e),
    }
}

#[instrument(skip_all, fields(enabled = state.item.internal_enabled()))]
async fn retrieve_internal(
    state: PipelineState,
    index: Option<&dyn RetrievalIndex>,
    settings: &PipelineSettings,
) -> PipelineState {
    let stage = StageId::RetrieveInternal;

    if !state.item.internal_enabled() {
        debug!("internal retrieval disabled for this item");
        return state;
    }

    let Some(index) = index else {
        return state.with_failure(
            stage,
            FailureKind::Provider,
            "Internal retrieval failed: no document index is configured".into(),
        );
    };

    match index.status().await {
        Ok(IndexStatus::Ready) => {}
        Ok(IndexStatus::NotBuilt) => {
            return state.with_failure(
                stage,
                FailureKind::Provider,
                "Internal retrieval skipped: document index has not been built \
                 (run `rmproposal index build`)"
                    .into(),
            );
        }
        Err(e) => return state.with_error(stage, &e),
    }

    if state.variant.has_product_identification() {
        retrieve_product_info(state, index, settings).await
    } else {
        retrieve_general(state, index, settings).await
    }
}

async fn retrieve_general(
    state: PipelineState,
    index: &dyn RetrievalIndex,
    settings: &PipelineSettings,
) -> PipelineState {
    let query = state.item.effective_internal_query().to_string();

    match index.query(&query, settings.internal_top_k).await {
        Ok(chunks) => {
            let internal: Vec<SourceFragment> = chunks
                .into_iter()
                .enumerate()
                .map(|(i, c)| c.into_fragment(Origin::Internal, i + 1))
                .collect();
            info!(fragments = internal.len(), "internal documents retrieved");
            PipelineState { internal, ..state }
        }
        Err(e) => state.with_error(StageId::RetrieveInternal, &e),
    }
}

async fn retrieve_product_info(
    mut state: PipelineState,
    index: &dyn RetrievalIndex,
    settings: &PipelineSettings,
) -> PipelineState {
    let mut gathered = Vec::new();

    for product in state.products.clone() {
        let query = products::product_sheet_query(&product);
        match index.query(&query, settings.product_top_k).await {
            Ok(chunks) => {
                debug!(%product, hits = chunks.len(), "product sheet query complete");
                gathered.extend(
                    chunks
                        .into_iter()
                        .map(|c| c.into_fragment(Origin::ProductInfo, 0)),
                );
            }
            Err(e) => {
                let message = format!("Product info retrieval for '{product}' failed: {e}");
                state = state.with_failure(StageId::RetrieveInternal, e.failure_kind(), message);
            }
        }
    }

    let total = gathered.len();
    let product_info = dedup::renumber(dedup::dedup_fragments(
        gathered,
        settings.dedup_prefix_chars,
    ));
    info!(
        fragments = product_info.len(),
        duplicates = total - product_info.len(),
        "product information retrieved"
    );

    PipelineState {
        product_info,
        ..state
    }
}

fn assemble_context(state: PipelineState) -> PipelineState {
    let context = assembler::assemble(&ContextInput {
        web: &state.web,
        products: &state.products,
        internal: &state.internal,
        product_info: &state.product_info,
    });
    debug!(sections = ?context.sections, chars = context.text.len(), "context assembled");
    PipelineState { context, ..state }
}

#[instrument(skip_all)]
async fn generate(
    state: PipelineState,
    generator: &dyn TextGenerator,
    settings: &PipelineSettings,
) -> PipelineState {
    if !state.context.has_sources() {
        return state.with_failure(
            StageId::Generate,
            FailureKind::Provider,
            "Analysis generation skipped: no source context was gathered".into(),
        );
    }

    let request = prompts::analysis_request(
        state.variant,
        &settings.market,
        state.item.subject(),
        &state.context.text,
        settings.temperature,
    );

    match generator.generate(&request).await {
        Ok(analysis) => {
            info!(chars = analysis.len(), "analysis generated");
            PipelineState { analysis, ..state }
        }
        Err(e) => PipelineState {
            analysis: String::new(),
            ..state
        }
        .with_error(StageId::Generate, &e),
    }
}

fn persist(state: PipelineState, settings: &PipelineSettings) -> PipelineState {
    match writer::write_artifact(&state, &settings.output_dir) {
        Ok(path) => PipelineState {
            artifact_path: Some(path),
            ..state
        },
        Err(e) => state.with_error(StageId::Persist, &e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use rmproposal_providers::GenerationRequest;

    use crate::assembler::WEB_HEADER;
    use crate::retrieval::RetrievedChunk;

    // --- Fakes ---

    struct FakeSearch {
        hits: Option<Vec<WebHit>>,
        queries: Mutex<Vec<WebQuery>>,
    }

    impl FakeSearch {
        fn returning(hits: Vec<WebHit>) -> Self {
            Self {
                hits: Some(hits),
                queries: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                hits: None,
                queries: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl WebSearch for FakeSearch {
        async fn search(&self, query: &WebQuery) -> Result<Vec<WebHit>> {
            self.queries.lock().unwrap().push(query.clone());
            self.hits
                .clone()
                .ok_or_else(|| RmProposalError::Provider("search API unreachable".into()))
        }
    }

    struct FakeGenerator {
        responses: Mutex<VecDeque<Result<String>>>,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl FakeGenerator {
        fn new(responses: Vec<Result<String>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TextGenerator for FakeGenerator {
        async fn generate(&self, request: &GenerationRequest) -> Result<String> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(RmProposalError::Provider("no scripted response".into())))
        }
    }

    struct FakeIndex {
        status: IndexStatus,
        results: HashMap<String, Vec<RetrievedChunk>>,
        failing_queries: Vec<String>,
        queries: Mutex<Vec<(String, usize)>>,
    }

    impl FakeIndex {
        fn ready(results: Vec<(&str, Vec<RetrievedChunk>)>) -> Self {
            Self {
                status: IndexStatus::Ready,
                results: results
                    .into_iter()
                    .map(|(q, r)| (q.to_string(), r))
                    .collect(),
                failing_queries: Vec::new(),
                queries: Mutex::new(Vec::new()),
            }
        }

        fn not_built() -> Self {
            Self {
                status: IndexStatus::NotBuilt,
                ..Self::ready(Vec::new())
            }
        }

        fn query_log(&self) -> Vec<(String, usize)> {
            self.queries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RetrievalIndex for FakeIndex {
        async fn status(&self) -> Result<IndexStatus> {
            Ok(self.status)
        }

        async fn query(&self, text: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
            self.queries.lock().unwrap().push((text.to_string(), k));
            if self.failing_queries.iter().any(|q| q == text) {
                return Err(RmProposalError::Storage("index read failed".into()));
            }
            Ok(self.results.get(text).cloned().unwrap_or_default())
        }
    }

    // --- Helpers ---

    fn hit(n: usize) -> WebHit {
        WebHit {
            title: format!("Acme headline {n}"),
            url: format!("https://news.example/acme-{n}"),
            content: format!("Acme Corp story number {n}."),
            score: Some(0.9),
        }
    }

    fn chunk(source: &str, body: &str) -> RetrievedChunk {
        RetrievedChunk {
            body: body.into(),
            source: source.into(),
            file_type: ".txt".into(),
            score: 0.8,
        }
    }

    fn item(internal_enabled: bool) -> WorkItem {
        WorkItem::new(
            "Acme Corp",
            Some("Acme Corp news".into()),
            None,
            internal_enabled,
            "{subject} Malaysia news",
        )
        .unwrap()
    }

    fn settings(output_dir: &std::path::Path) -> PipelineSettings {
        PipelineSettings {
            output_dir: output_dir.to_path_buf(),
            ..PipelineSettings::default()
        }
    }

    // --- Pipeline construction ---

    #[test]
    fn variant_stage_lists() {
        assert_eq!(
            Pipeline::for_variant(ProposalVariant::Basic).stages(),
            &[
                StageId::SearchWeb,
                StageId::RetrieveInternal,
                StageId::Assemble,
                StageId::Generate,
                StageId::Persist
            ]
        );
        assert_eq!(Pipeline::for_variant(ProposalVariant::Eligibility).stages().len(), 6);
    }

    #[test]
    fn custom_stage_lists_are_validated() {
        use StageId::*;
        assert!(Pipeline::with_stages(ProposalVariant::Basic, vec![SearchWeb, Assemble]).is_ok());
        assert!(Pipeline::with_stages(ProposalVariant::Basic, vec![Assemble]).is_err());
        assert!(Pipeline::with_stages(ProposalVariant::Basic, vec![]).is_err());
        assert!(
            Pipeline::with_stages(ProposalVariant::Basic, vec![SearchWeb, Generate, Assemble])
                .is_err()
        );
        assert!(
            Pipeline::with_stages(ProposalVariant::Basic, vec![SearchWeb, Assemble, Assemble])
                .is_err()
        );
        assert!(
            Pipeline::with_stages(ProposalVariant::Basic, vec![SearchWeb, IdentifyProducts])
                .is_err()
        );
    }

    #[test]
    fn without_persist_drops_only_persist() {
        let pipeline = Pipeline::for_variant(ProposalVariant::Eligibility).without_persist();
        assert_eq!(pipeline.stages().len(), 5);
        assert!(!pipeline.stages().contains(&StageId::Persist));
    }

    #[test]
    fn variant_parsing() {
        assert_eq!("basic".parse::<ProposalVariant>().unwrap(), ProposalVariant::Basic);
        assert_eq!(
            " Eligibility ".parse::<ProposalVariant>().unwrap(),
            ProposalVariant::Eligibility
        );
        assert!("fancy".parse::<ProposalVariant>().is_err());
    }

    // --- Runs ---

    #[tokio::test]
    async fn web_only_run_cites_two_sources() {
        let out = tempfile::tempdir().unwrap();
        let search = FakeSearch::returning(vec![hit(1), hit(2)]);
        let generator = FakeGenerator::new(vec![Ok("## EXECUTIVE SUMMARY\nAcme is growing [Web Source 1].".into())]);
        let index = FakeIndex::ready(Vec::new());
        let collaborators = Collaborators {
            search: &search,
            generator: &generator,
            index: Some(&index),
        };

        let state = Pipeline::for_variant(ProposalVariant::Basic)
            .run(item(false), &collaborators, &settings(out.path()), &SilentProgress)
            .await;

        assert!(state.failures.is_empty(), "{:?}", state.failures);
        assert_eq!(state.context.sections, vec![assembler::SectionKind::Web]);
        assert!(state.context.text.contains("[Web Source 1]"));
        assert!(state.context.text.contains("[Web Source 2]"));
        assert!(!state.context.text.contains("[Web Source 3]"));
        assert!(index.query_log().is_empty());

        let query = &search.queries.lock().unwrap()[0];
        assert_eq!(query.text, "Acme Corp news");
        assert_eq!(query.max_results, 30);
        assert_eq!(query.time_range, "year");

        let path = state.artifact_path.clone().expect("artifact written");
        assert!(path.ends_with("Acme_Corp_hybrid_analysis.txt"));
        let artifact = std::fs::read_to_string(path).unwrap();
        assert!(artifact.contains("[Web Source 2] Acme headline 2"));
        assert!(!artifact.contains("[Web Source 3]"));
        assert!(artifact.contains("https://news.example/acme-2"));
        assert!(!artifact.contains("INTERNAL DOCUMENTS"));
        assert!(!artifact.contains("DEGRADED"));
        assert_eq!(state.completed.len(), 5);
    }

    #[tokio::test]
    async fn search_outage_still_uses_internal_documents() {
        let out = tempfile::tempdir().unwrap();
        let search = FakeSearch::failing();
        let generator = FakeGenerator::new(vec![Ok("Analysis from [Internal Doc 1].".into())]);
        let index = FakeIndex::ready(vec![(
            "Acme Corp news",
            vec![chunk("/docs/acme_credit_memo.txt", "Acme has a 10-year relationship.")],
        )]);
        let collaborators = Collaborators {
            search: &search,
            generator: &generator,
            index: Some(&index),
        };

        let state = Pipeline::for_variant(ProposalVariant::Basic)
            .run(item(true), &collaborators, &settings(out.path()), &SilentProgress)
            .await;

        assert!(state.web.is_empty());
        assert_eq!(state.internal.len(), 1);
        assert_eq!(state.internal[0].citation(), "[Internal Doc 1]");
        assert!(!state.context.text.contains(WEB_HEADER));
        assert_eq!(state.analysis, "Analysis from [Internal Doc 1].");

        let error = state.error().expect("error recorded");
        assert!(error.contains("Web search failed"), "{error}");
        assert_eq!(state.failures[0].kind, FailureKind::Provider);
        assert_eq!(index.query_log(), vec![("Acme Corp news".to_string(), 5)]);

        let artifact = std::fs::read_to_string(state.artifact_path.unwrap()).unwrap();
        assert!(artifact.contains("RUN STATUS: DEGRADED"));
        assert!(artifact.contains("[Internal Doc 1] acme_credit_memo.txt"));
    }

    #[tokio::test]
    async fn eligibility_run_dedups_product_sheets() {
        let out = tempfile::tempdir().unwrap();
        let search = FakeSearch::returning(vec![hit(1)]);
        let generator = FakeGenerator::new(vec![
            Ok("```json\n[\"Trade Finance\", \"Term Loan\"]\n```".into()),
            Ok("## ELIGIBILITY ASSESSMENT ✓✗".into()),
        ]);
        let shared = chunk("/sheets/general_terms.txt", "General terms apply to all facilities.");
        let index = FakeIndex::ready(vec![
            (
                "Trade Finance product information sheet eligibility criteria requirements",
                vec![chunk("/sheets/trade.txt", "Trade finance: 2 years trading."), shared.clone()],
            ),
            (
                "Term Loan product information sheet eligibility criteria requirements",
                vec![shared, chunk("/sheets/term.txt", "Term loan: audited accounts.")],
            ),
        ]);
        let collaborators = Collaborators {
            search: &search,
            generator: &generator,
            index: Some(&index),
        };

        let state = Pipeline::for_variant(ProposalVariant::Eligibility)
            .run(item(true), &collaborators, &settings(out.path()), &SilentProgress)
            .await;

        assert!(state.failures.is_empty(), "{:?}", state.failures);
        assert_eq!(state.products, vec!["Trade Finance", "Term Loan"]);

        let queries: Vec<String> = index.query_log().into_iter().map(|(q, _)| q).collect();
        assert_eq!(queries.len(), 2);
        assert!(queries[0].starts_with("Trade Finance"));

        let sources: Vec<&str> = state.product_info.iter().map(|f| f.locator_name()).collect();
        assert_eq!(sources, vec!["trade.txt", "general_terms.txt", "term.txt"]);
        let ordinals: Vec<usize> = state.product_info.iter().map(|f| f.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3]);

        assert_eq!(
            state.context.sections,
            vec![
                assembler::SectionKind::Web,
                assembler::SectionKind::SuggestedProducts,
                assembler::SectionKind::ProductInfo
            ]
        );
        assert!(state.context.text.contains("[Product Info 3] term.txt"));

        let requests = generator.requests.lock().unwrap();
        assert!(requests[0].user.contains("[Web Source 1]"));
        assert!(requests[1].system.contains("[Product Info N]"));

        let path = state.artifact_path.clone().unwrap();
        assert!(path.ends_with("Acme_Corp_eligibility_analysis.txt"));
        let artifact = std::fs::read_to_string(path).unwrap();
        assert!(artifact.contains("   1. Trade Finance"));
        assert!(artifact.contains("PRODUCT INFORMATION SHEETS"));
    }

    #[tokio::test]
    async fn product_identification_gets_bare_web_fragments() {
        let search = FakeSearch::returning(vec![hit(1), hit(2)]);
        let generator = FakeGenerator::new(vec![
            Ok("[\"Trade Finance\"]".into()),
            Ok("analysis".into()),
        ]);
        let collaborators = Collaborators {
            search: &search,
            generator: &generator,
            index: None,
        };

        let state = Pipeline::for_variant(ProposalVariant::Eligibility)
            .without_persist()
            .run(item(false), &collaborators, &PipelineSettings::default(), &SilentProgress)
            .await;
        assert_eq!(state.products, vec!["Trade Finance"]);

        let requests = generator.requests.lock().unwrap();
        let user = &requests[0].user;
        assert!(!user.contains(WEB_HEADER), "{user}");
        assert!(user.contains("[Web Source 1]\nTitle: Acme headline 1"));
        assert!(user.contains("[Web Source 2]"));
    }

    #[tokio::test]
    async fn eligibility_search_outage_uses_default_products() {
        let out = tempfile::tempdir().unwrap();
        let search = FakeSearch::failing();
        let generator = FakeGenerator::new(vec![Ok("Eligibility per [Product Info 1].".into())]);
        let index = FakeIndex::ready(vec![(
            "Working Capital Loan product information sheet eligibility criteria requirements",
            vec![chunk("/sheets/working_capital.txt", "Working capital: 3 years trading.")],
        )]);
        let collaborators = Collaborators {
            search: &search,
            generator: &generator,
            index: Some(&index),
        };

        let state = Pipeline::for_variant(ProposalVariant::Eligibility)
            .run(item(true), &collaborators, &settings(out.path()), &SilentProgress)
            .await;

        assert_eq!(state.products, vec!["Working Capital Loan", "Business Expansion Loan"]);
        assert_eq!(generator.calls(), 1);
        assert!(generator.requests.lock().unwrap()[0].user.contains(&state.context.text));

        let queries: Vec<String> = index.query_log().into_iter().map(|(q, _)| q).collect();
        assert_eq!(
            queries,
            vec![
                "Working Capital Loan product information sheet eligibility criteria requirements",
                "Business Expansion Loan product information sheet eligibility criteria requirements",
            ]
        );
        assert_eq!(state.product_info.len(), 1);
        assert_eq!(state.product_info[0].citation(), "[Product Info 1]");

        assert_eq!(state.failures.len(), 1);
        let error = state.error().expect("error recorded");
        assert!(error.contains("Web search failed"), "{error}");

        let artifact = std::fs::read_to_string(state.artifact_path.unwrap()).unwrap();
        assert!(artifact.contains("   1. Working Capital Loan"));
        assert!(artifact.contains("RUN STATUS: DEGRADED"));
    }

    #[tokio::test]
    async fn unparseable_products_fall_back_to_defaults() {
        let out = tempfile::tempdir().unwrap();
        let search = FakeSearch::returning(vec![hit(1)]);
        let generator = FakeGenerator::new(vec![Ok("not json".into()), Ok("analysis".into())]);
        let index = FakeIndex::ready(Vec::new());
        let collaborators = Collaborators {
            search: &search,
            generator: &generator,
            index: Some(&index),
        };

        let state = Pipeline::for_variant(ProposalVariant::Eligibility)
            .run(item(true), &collaborators, &settings(out.path()), &SilentProgress)
            .await;

        assert_eq!(
            state.products,
            vec!["Working Capital Loan", "Business Expansion Loan"]
        );
        assert_eq!(state.failures.len(), 1);
        assert_eq!(state.failures[0].stage, StageId::IdentifyProducts);
        assert_eq!(state.failures[0].kind, FailureKind::Parse);
        assert_eq!(index.query_log().len(), 2);
        assert_eq!(state.analysis, "analysis");
    }

    #[tokio::test]
    async fn product_query_failures_are_isolated() {
        let out = tempfile::tempdir().unwrap();
        let search = FakeSearch::returning(vec![hit(1)]);
        let generator =
            FakeGenerator::new(vec![Ok(r#"["Trade Finance", "Term Loan"]"#.into()), Ok("ok".into())]);
        let mut index = FakeIndex::ready(vec![(
            "Term Loan product information sheet eligibility criteria requirements",
            vec![chunk("/sheets/term.txt", "Term loan sheet.")],
        )]);
        index.failing_queries =
            vec!["Trade Finance product information sheet eligibility criteria requirements".into()];
        let collaborators = Collaborators {
            search: &search,
            generator: &generator,
            index: Some(&index),
        };

        let state = Pipeline::for_variant(ProposalVariant::Eligibility)
            .run(item(true), &collaborators, &settings(out.path()), &SilentProgress)
            .await;

        assert_eq!(state.product_info.len(), 1);
        assert_eq!(state.product_info[0].ordinal, 1);
        assert_eq!(state.failures.len(), 1);
        assert!(state.failures[0].message.contains("Trade Finance"));
    }

    #[tokio::test]
    async fn generation_failure_still_persists_sources() {
        let out = tempfile::tempdir().unwrap();
        let search = FakeSearch::returning(vec![hit(1)]);
        let generator = FakeGenerator::new(vec![Err(RmProposalError::Provider("quota".into()))]);
        let collaborators = Collaborators {
            search: &search,
            generator: &generator,
            index: None,
        };

        let state = Pipeline::for_variant(ProposalVariant::Basic)
            .run(item(false), &collaborators, &settings(out.path()), &SilentProgress)
            .await;

        assert!(state.analysis.is_empty());
        assert_eq!(state.failures[0].stage, StageId::Generate);
        let artifact = std::fs::read_to_string(state.artifact_path.unwrap()).unwrap();
        assert!(artifact.contains("[Web Source 1] Acme headline 1"));
        assert!(artifact.contains("No analysis was generated"));
    }

    #[tokio::test]
    async fn empty_context_skips_generation() {
        let out = tempfile::tempdir().unwrap();
        let search = FakeSearch::returning(Vec::new());
        let generator = FakeGenerator::new(vec![Ok("should not be used".into())]);
        let collaborators = Collaborators {
            search: &search,
            generator: &generator,
            index: None,
        };

        let state = Pipeline::for_variant(ProposalVariant::Basic)
            .run(item(false), &collaborators, &settings(out.path()), &SilentProgress)
            .await;

        assert_eq!(generator.calls(), 0);
        assert!(state.error().unwrap().contains("no source context"));
        assert!(state.artifact_path.is_some());
    }

    #[tokio::test]
    async fn unbuilt_index_degrades_retrieval() {
        let out = tempfile::tempdir().unwrap();
        let search = FakeSearch::returning(vec![hit(1)]);
        let generator = FakeGenerator::new(vec![Ok("analysis".into())]);
        let index = FakeIndex::not_built();
        let collaborators = Collaborators {
            search: &search,
            generator: &generator,
            index: Some(&index),
        };

        let state = Pipeline::for_variant(ProposalVariant::Basic)
            .run(item(true), &collaborators, &settings(out.path()), &SilentProgress)
            .await;

        assert!(index.query_log().is_empty());
        assert!(state.internal.is_empty());
        assert_eq!(state.failures.len(), 1);
        assert!(state.failures[0].message.contains("has not been built"));
        assert_eq!(state.analysis, "analysis");
    }

    #[tokio::test]
    async fn unwritable_output_is_persistence_failure() {
        let out = tempfile::tempdir().unwrap();
        let blocker = out.path().join("not_a_dir");
        std::fs::write(&blocker, "file").unwrap();

        let search = FakeSearch::returning(vec![hit(1)]);
        let generator = FakeGenerator::new(vec![Ok("analysis".into())]);
        let collaborators = Collaborators {
            search: &search,
            generator: &generator,
            index: None,
        };

        let state = Pipeline::for_variant(ProposalVariant::Basic)
            .run(item(false), &collaborators, &settings(&blocker), &SilentProgress)
            .await;

        assert_eq!(state.analysis, "analysis");
        assert!(state.artifact_path.is_none());
        let failure = state.failures.last().unwrap();
        assert_eq!(failure.stage, StageId::Persist);
        assert_eq!(failure.kind, FailureKind::Persistence);
        assert_eq!(state.completed.last(), Some(&StageId::Persist));
    }

    #[tokio::test]
    async fn no_persist_pipeline_writes_nothing() {
        let out = tempfile::tempdir().unwrap();
        let search = FakeSearch::returning(vec![hit(1)]);
        let generator = FakeGenerator::new(vec![Ok("analysis".into())]);
        let collaborators = Collaborators {
            search: &search,
            generator: &generator,
            index: None,
        };

        let state = Pipeline::for_variant(ProposalVariant::Basic)
            .without_persist()
            .run(item(false), &collaborators, &settings(out.path()), &SilentProgress)
            .await;

        assert!(state.artifact_path.is_none());
        assert!(state.failures.is_empty());
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
    }
}
