//! Pipeline state: stages, parameters, intermediate results, final artifact.
//!
//! [`PipelineState`] is owned by one orchestrator for one run. It enforces
//! the stage state machine (`pending -> in_progress -> completed | failed`,
//! at most one stage in progress) and exposes a JSON view of itself for
//! template path lookup.

use crate::error::Result;
use crate::PipelineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use tokio::time::Instant;

/// Keys under which stages store their results.
pub mod keys {
    pub const PERSONA: &str = "persona";
    pub const POPULAR_ARTICLES: &str = "popularArticles";
    pub const KEYWORDS: &str = "keywords";
    pub const RTB: &str = "rtb";
    pub const USER_PROFILE: &str = "userProfile";
    pub const EMPATHY_POINTS: &str = "empathyPoints";
    pub const ARTICLE: &str = "article";
    pub const TITLE_OPTIONS: &str = "titleOptions";
    pub const SELECTED_TITLE: &str = "selectedTitle";
    pub const COMPLIANCE_RESULT: &str = "complianceResult";
    pub const FORMATTED_RESULT: &str = "formattedResult";
}

/// The fixed pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageId {
    Params,
    Persona,
    Knowledge,
    Profile,
    Empathy,
    Article,
    Titles,
    Compliance,
    Formatting,
}

impl StageId {
    /// Every stage in declaration order.
    pub const ALL: [StageId; 9] = [
        StageId::Params,
        StageId::Persona,
        StageId::Knowledge,
        StageId::Profile,
        StageId::Empathy,
        StageId::Article,
        StageId::Titles,
        StageId::Compliance,
        StageId::Formatting,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageId::Params => "params",
            StageId::Persona => "persona",
            StageId::Knowledge => "knowledge",
            StageId::Profile => "profile",
            StageId::Empathy => "empathy",
            StageId::Article => "article",
            StageId::Titles => "titles",
            StageId::Compliance => "compliance",
            StageId::Formatting => "formatting",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            StageId::Params => "Parameters",
            StageId::Persona => "Persona",
            StageId::Knowledge => "Knowledge base",
            StageId::Profile => "User profile",
            StageId::Empathy => "Empathy points",
            StageId::Article => "Article",
            StageId::Titles => "Titles",
            StageId::Compliance => "Compliance review",
            StageId::Formatting => "Formatting",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            StageId::Params => "Collect the creative brief",
            StageId::Persona => "Derive the author persona",
            StageId::Knowledge => "Generate reference articles, keywords and proof points",
            StageId::Profile => "Describe the target reader",
            StageId::Empathy => "Extract the reader's pain points",
            StageId::Article => "Write the article body",
            StageId::Titles => "Propose candidate titles",
            StageId::Compliance => "Fix restricted wording",
            StageId::Formatting => "Polish layout and add emoji",
        }
    }

    /// Position in [`StageId::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// The stage after this one, if any.
    pub fn next(self) -> Option<StageId> {
        StageId::ALL.get(self.index() + 1).copied()
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::InProgress => "in_progress",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
        }
    }

    /// Whether `self -> to` is an allowed transition.
    pub fn can_transition_to(self, to: StageStatus) -> bool {
        matches!(
            (self, to),
            (StageStatus::Pending, StageStatus::InProgress)
                | (StageStatus::InProgress, StageStatus::Completed)
                | (StageStatus::InProgress, StageStatus::Failed)
        )
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared stage and its status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stage {
    pub id: StageId,
    pub status: StageStatus,
}

impl Stage {
    pub fn display_name(&self) -> &'static str {
        self.id.display_name()
    }

    pub fn description(&self) -> &'static str {
        self.id.description()
    }
}

/// Caller-supplied run parameters. Opaque to the pipeline apart from a few
/// well-known keys with typed accessors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineParameters(Map<String, Value>);

impl PipelineParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object. Anything else is rejected.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(PipelineError::InvalidConfig(format!(
                "parameters must be a JSON object, got {}",
                other
            ))),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Overlay `other` onto these parameters; keys in `other` win.
    pub fn merge(&mut self, other: PipelineParameters) {
        self.0.extend(other.0);
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn target_audience(&self) -> Option<&str> {
        self.get("targetAudience").and_then(Value::as_str)
    }

    pub fn feature(&self) -> Option<&str> {
        self.get("feature").and_then(Value::as_str)
    }

    pub fn enable_popular_articles(&self) -> bool {
        self.flag("enablePopularArticles")
    }

    pub fn enable_keywords(&self) -> bool {
        self.flag("enableKeywords")
    }

    pub fn enable_rtb(&self) -> bool {
        self.flag("enableRTB")
    }

    /// Requested article length in characters. Default 400.
    pub fn article_length(&self) -> u64 {
        self.get("articleLength")
            .and_then(Value::as_u64)
            .unwrap_or(400)
    }

    /// Toggle flags default to enabled unless explicitly `false`.
    fn flag(&self, key: &str) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or(true)
    }
}

/// Stage outputs keyed by result name (see [`keys`]).
///
/// A key that is absent has not been produced yet; a key holding `null` was
/// produced as intentionally empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntermediateResults(Map<String, Value>);

impl IntermediateResults {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// String value of `key`, if it holds a non-empty string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    pub(crate) fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

/// Metadata attached to the finished article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactMetadata {
    pub generated_at: DateTime<Utc>,
    /// Wall-clock time since the run started.
    pub duration_ms: u64,
    pub model_used: String,
}

/// The finished article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalArtifact {
    pub title: String,
    pub content: String,
    pub metadata: ArtifactMetadata,
}

/// State of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineState {
    stages: Vec<Stage>,
    current_step: usize,
    parameters: PipelineParameters,
    results: IntermediateResults,
    final_artifact: Option<FinalArtifact>,
    started_at: Option<Instant>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineState {
    /// All stages pending, no parameters.
    pub fn new() -> Self {
        Self {
            stages: StageId::ALL
                .iter()
                .map(|&id| Stage {
                    id,
                    status: StageStatus::Pending,
                })
                .collect(),
            current_step: 0,
            parameters: PipelineParameters::new(),
            results: IntermediateResults::default(),
            final_artifact: None,
            started_at: None,
        }
    }

    pub fn with_parameters(parameters: PipelineParameters) -> Self {
        let mut state = Self::new();
        state.parameters = parameters;
        state
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn status(&self, id: StageId) -> StageStatus {
        self.stages[id.index()].status
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    /// The stage at `current_step`.
    pub fn current_stage(&self) -> StageId {
        self.stages[self.current_step].id
    }

    /// The stage currently in progress, if any.
    pub fn in_progress(&self) -> Option<StageId> {
        self.stages
            .iter()
            .find(|s| s.status == StageStatus::InProgress)
            .map(|s| s.id)
    }

    /// The first failed stage, if any.
    pub fn failed_stage(&self) -> Option<StageId> {
        self.stages
            .iter()
            .find(|s| s.status == StageStatus::Failed)
            .map(|s| s.id)
    }

    pub fn parameters(&self) -> &PipelineParameters {
        &self.parameters
    }

    /// Merge parameters. Rejected while a run is in progress.
    pub fn set_parameters(&mut self, parameters: PipelineParameters) -> Result<()> {
        if self.is_running() {
            return Err(PipelineError::InvalidConfig(
                "parameters cannot change while a run is in progress".to_string(),
            ));
        }
        self.parameters.merge(parameters);
        Ok(())
    }

    pub fn results(&self) -> &IntermediateResults {
        &self.results
    }

    pub(crate) fn store_result(&mut self, key: &str, value: Value) {
        self.results.insert(key, value);
    }

    pub fn final_artifact(&self) -> Option<&FinalArtifact> {
        self.final_artifact.as_ref()
    }

    /// Whether `start()` was called and the run has neither finished nor failed.
    pub fn is_running(&self) -> bool {
        self.started_at.is_some() && self.final_artifact.is_none() && self.failed_stage().is_none()
    }

    pub fn is_complete(&self) -> bool {
        self.stages.iter().all(|s| s.status == StageStatus::Completed)
    }

    pub fn completed_count(&self) -> usize {
        self.stages
            .iter()
            .filter(|s| s.status == StageStatus::Completed)
            .count()
    }

    /// Completed stages as a rounded percentage.
    pub fn progress_percent(&self) -> u8 {
        let pct = (self.completed_count() as f64 / self.stages.len() as f64) * 100.0;
        pct.round() as u8
    }

    /// Milliseconds since `start()`, or 0 before it.
    pub fn elapsed_ms(&self) -> u64 {
        self.started_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }

    /// Begin a run: record the start time, reset statuses and results.
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
        self.current_step = 0;
        for stage in &mut self.stages {
            stage.status = StageStatus::Pending;
        }
        self.results = IntermediateResults::default();
        self.final_artifact = None;
    }

    /// Back to a fresh state, parameters included.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Move a stage to a new status.
    ///
    /// Fails with [`PipelineError::InvalidTransition`] when the move is not
    /// allowed, or when another stage is already in progress.
    pub fn transition(&mut self, id: StageId, to: StageStatus) -> Result<()> {
        let from = self.status(id);
        let blocked_by_other = to == StageStatus::InProgress
            && self.in_progress().is_some_and(|other| other != id);

        if !from.can_transition_to(to) || blocked_by_other {
            return Err(PipelineError::InvalidTransition {
                stage: id.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        self.stages[id.index()].status = to;
        Ok(())
    }

    /// Move `current_step` forward, never past the last stage.
    pub fn advance(&mut self) {
        if self.current_step < self.stages.len() - 1 {
            self.current_step += 1;
        }
    }

    /// Override the title the compliance stage will review.
    ///
    /// Only allowed before the compliance stage starts.
    pub fn select_title(&mut self, title: impl Into<String>) -> Result<()> {
        if self.status(StageId::Compliance) != StageStatus::Pending {
            return Err(PipelineError::InvalidConfig(
                "the title can only be changed before the compliance stage runs".to_string(),
            ));
        }
        self.results
            .insert(keys::SELECTED_TITLE, Value::String(title.into()));
        Ok(())
    }

    /// Write the final artifact. Requires every stage completed; writes once.
    pub fn set_final_artifact(
        &mut self,
        title: String,
        content: String,
        model_used: String,
    ) -> Result<&FinalArtifact> {
        if !self.is_complete() {
            return Err(PipelineError::Other(format!(
                "final artifact requires every stage completed ({} of {} done)",
                self.completed_count(),
                self.stages.len()
            )));
        }
        if self.final_artifact.is_some() {
            return Err(PipelineError::Other(
                "final artifact has already been written".to_string(),
            ));
        }

        let metadata = ArtifactMetadata {
            generated_at: Utc::now(),
            duration_ms: self.elapsed_ms(),
            model_used,
        };
        Ok(&*self.final_artifact.insert(FinalArtifact {
            title,
            content,
            metadata,
        }))
    }

    /// JSON root for template path lookup:
    /// `{"workflow": {"parameters": ..., "intermediateResults": ...}}`.
    pub fn path_root(&self) -> Value {
        json!({
            "workflow": {
                "parameters": self.parameters.to_value(),
                "intermediateResults": self.results.to_value(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::resolve_path;

    fn complete_all(state: &mut PipelineState) {
        for id in StageId::ALL {
            state.transition(id, StageStatus::InProgress).unwrap();
            state.transition(id, StageStatus::Completed).unwrap();
            state.advance();
        }
    }

    #[test]
    fn test_stage_order_and_names() {
        let ids: Vec<&str> = StageId::ALL.iter().map(|s| s.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "params", "persona", "knowledge", "profile", "empathy", "article", "titles",
                "compliance", "formatting"
            ]
        );
        assert_eq!(StageId::Article.index(), 5);
        assert_eq!(StageId::Titles.next(), Some(StageId::Compliance));
        assert_eq!(StageId::Formatting.next(), None);
        assert_eq!(serde_json::to_value(StageId::Knowledge).unwrap(), "knowledge");
        assert_eq!(serde_json::to_value(StageStatus::InProgress).unwrap(), "in_progress");
    }

    #[test]
    fn test_transition_rules() {
        let mut state = PipelineState::new();
        assert!(state
            .transition(StageId::Persona, StageStatus::Completed)
            .is_err());
        state
            .transition(StageId::Persona, StageStatus::InProgress)
            .unwrap();

        let err = state
            .transition(StageId::Knowledge, StageStatus::InProgress)
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTransition { .. }));
        assert_eq!(
            err.to_string(),
            "stage 'knowledge' cannot move from pending to in_progress"
        );

        state
            .transition(StageId::Persona, StageStatus::Failed)
            .unwrap();
        assert!(state
            .transition(StageId::Persona, StageStatus::InProgress)
            .is_err());
        assert_eq!(state.failed_stage(), Some(StageId::Persona));
    }

    #[test]
    fn test_advance_is_bounded() {
        let mut state = PipelineState::new();
        for _ in 0..20 {
            state.advance();
        }
        assert_eq!(state.current_step(), StageId::ALL.len() - 1);
        assert_eq!(state.current_stage(), StageId::Formatting);
    }

    #[test]
    fn test_progress_views() {
        let mut state = PipelineState::new();
        assert_eq!(state.progress_percent(), 0);
        state.transition(StageId::Params, StageStatus::InProgress).unwrap();
        state.transition(StageId::Params, StageStatus::Completed).unwrap();
        assert_eq!(state.completed_count(), 1);
        assert_eq!(state.progress_percent(), 11);
        assert!(!state.is_complete());

        let mut done = PipelineState::new();
        complete_all(&mut done);
        assert!(done.is_complete());
        assert_eq!(done.progress_percent(), 100);
    }

    #[test]
    fn test_parameters_typed_defaults() {
        let params = PipelineParameters::new()
            .with("targetAudience", "parents")
            .with("feature", "school bag")
            .with("enableRTB", false);
        assert_eq!(params.target_audience(), Some("parents"));
        assert_eq!(params.feature(), Some("school bag"));
        assert!(!params.enable_rtb());
        assert!(params.enable_keywords());
        assert!(params.enable_popular_articles());
        assert_eq!(params.article_length(), 400);
    }

    #[test]
    fn test_parameters_from_value_rejects_non_object() {
        assert!(PipelineParameters::from_value(json!([1, 2])).is_err());
        let params = PipelineParameters::from_value(json!({"articleLength": 800})).unwrap();
        assert_eq!(params.article_length(), 800);
    }

    #[test]
    fn test_set_parameters_merges_and_locks_while_running() {
        let mut state = PipelineState::new();
        state
            .set_parameters(PipelineParameters::new().with("a", 1).with("b", 1))
            .unwrap();
        state
            .set_parameters(PipelineParameters::new().with("b", 2))
            .unwrap();
        assert_eq!(state.parameters().get("a"), Some(&json!(1)));
        assert_eq!(state.parameters().get("b"), Some(&json!(2)));

        state.start();
        assert!(state.set_parameters(PipelineParameters::new()).is_err());
    }

    #[test]
    fn test_path_root_shape() {
        let mut state =
            PipelineState::with_parameters(PipelineParameters::new().with("feature", "bag"));
        state.store_result(keys::RTB, Value::Null);
        let root = state.path_root();
        assert_eq!(
            resolve_path(Some(&root), "workflow.parameters.feature"),
            Some(&json!("bag"))
        );
        assert_eq!(
            resolve_path(Some(&root), "workflow.intermediateResults.rtb"),
            Some(&Value::Null)
        );
        assert_eq!(
            resolve_path(Some(&root), "workflow.intermediateResults.article"),
            None
        );
    }

    #[test]
    fn test_select_title_only_before_compliance() {
        let mut state = PipelineState::new();
        state.select_title("Mine").unwrap();
        assert_eq!(state.results().get_str(keys::SELECTED_TITLE), Some("Mine"));

        state
            .transition(StageId::Compliance, StageStatus::InProgress)
            .unwrap();
        assert!(state.select_title("Too late").is_err());
    }

    #[test]
    fn test_final_artifact_requires_completion_and_writes_once() {
        let mut state = PipelineState::new();
        state.start();
        assert!(state
            .set_final_artifact("t".into(), "c".into(), "m".into())
            .is_err());

        complete_all(&mut state);
        let artifact = state
            .set_final_artifact("t".into(), "c".into(), "m".into())
            .unwrap();
        assert_eq!(artifact.title, "t");
        assert_eq!(artifact.metadata.model_used, "m");
        assert!(state
            .set_final_artifact("t2".into(), "c2".into(), "m".into())
            .is_err());
        assert!(!state.is_running());
    }

    #[test]
    fn test_start_resets_run() {
        let mut state = PipelineState::new();
        complete_all(&mut state);
        state.store_result(keys::ARTICLE, json!("old"));
        state.start();
        assert_eq!(state.current_step(), 0);
        assert_eq!(state.completed_count(), 0);
        assert!(state.results().is_empty());
        assert!(state.is_running());

        state.reset();
        assert!(!state.is_running());
    }
}
