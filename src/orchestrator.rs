//! The stage machine that drives one content-generation run.
//!
//! [`PipelineOrchestrator`] owns a [`PipelineState`] and walks the fixed
//! stage order:
//!
//! ```text
//! params -> persona -> knowledge -> profile -> empathy -> article
//!        -> titles -> compliance -> formatting -> final
//! ```
//!
//! Each stage renders its prompt from the state, calls the
//! [`GenerationClient`], stores the result and advances. A failed stage is
//! marked `failed` and aborts the run with [`PipelineError::StageFailed`],
//! except persona, which falls back to [`DEFAULT_PERSONA`].
//!
//! Callers can run everything with [`run`](PipelineOrchestrator::run), or
//! drive the stages one by one, e.g. to pick a different title between the
//! titles and compliance stages:
//!
//! ```no_run
//! # async fn demo() -> content_pipeline::Result<()> {
//! use content_pipeline::{GenerationClientBuilder, PipelineOrchestrator, PipelineParameters, StageId};
//!
//! let client = GenerationClientBuilder::from_env().build()?;
//! let params = PipelineParameters::new()
//!     .with("targetAudience", "parents")
//!     .with("feature", "school bag");
//! let mut pipeline = PipelineOrchestrator::new(client, params);
//!
//! pipeline.start()?;
//! pipeline.run_until(StageId::Titles).await?;
//! pipeline.state_mut().select_title("My own title")?;
//! pipeline.run_until(StageId::Formatting).await?;
//! let artifact = pipeline.finish()?;
//! println!("{}", artifact.title);
//! # Ok(())
//! # }
//! ```

use crate::client::{GenerationClient, GenerationConfig};
use crate::error::Result;
use crate::events::{emit, Event, EventHandler};
use crate::prompts::{ids, PromptLibrary};
use crate::state::{keys, FinalArtifact, PipelineParameters, PipelineState, StageId, StageStatus};
use crate::template::{build_variables, substitute};
use crate::PipelineError;
use serde_json::{json, Value};
use std::sync::Arc;

/// Persona used when the persona stage fails.
pub const DEFAULT_PERSONA: &str = "A warm, down-to-earth creator who shares first-hand \
experience, speaks to readers as a friend, and recommends only what they have tried.";

/// Title used when the compliance stage finds no title to review.
pub const DEFAULT_TITLE: &str = "Quality content worth sharing";

/// A prompt rendered against the current state.
struct RenderedPrompt {
    user: String,
    system: String,
    config: GenerationConfig,
}

/// Drives one pipeline run. One instance per run.
pub struct PipelineOrchestrator {
    client: GenerationClient,
    prompts: PromptLibrary,
    state: PipelineState,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl PipelineOrchestrator {
    /// New orchestrator with the built-in prompts. Events go to the client's
    /// event handler, if it has one.
    pub fn new(client: GenerationClient, parameters: PipelineParameters) -> Self {
        let event_handler = client.event_handler().cloned();
        Self {
            client,
            prompts: PromptLibrary::builtin(),
            state: PipelineState::with_parameters(parameters),
            event_handler,
        }
    }

    /// Use a different prompt library. It must define every required prompt.
    pub fn with_prompts(mut self, prompts: PromptLibrary) -> Result<Self> {
        prompts.ensure_complete()?;
        self.prompts = prompts;
        Ok(self)
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Mutable state access between stages (parameters, title override).
    pub fn state_mut(&mut self) -> &mut PipelineState {
        &mut self.state
    }

    pub fn client(&self) -> &GenerationClient {
        &self.client
    }

    pub fn into_state(self) -> PipelineState {
        self.state
    }

    /// Run every stage and assemble the final artifact.
    pub async fn run(&mut self) -> Result<FinalArtifact> {
        self.start()?;
        while self.run_next_stage().await?.is_some() {}
        self.finish()
    }

    /// Begin a run. Resets statuses and results, then completes the params stage.
    pub fn start(&mut self) -> Result<()> {
        self.state.start();
        tracing::info!(
            parameters = self.state.parameters().as_map().len(),
            "pipeline started"
        );
        self.mark(StageId::Params, StageStatus::InProgress)?;
        self.mark(StageId::Params, StageStatus::Completed)?;
        Ok(())
    }

    /// The next stage that would run, if the run is still going.
    pub fn next_stage(&self) -> Option<StageId> {
        if self.state.failed_stage().is_some() {
            return None;
        }
        self.state
            .stages()
            .iter()
            .find(|s| s.status == StageStatus::Pending)
            .map(|s| s.id)
    }

    /// Run the next pending stage. Returns the stage that ran, or `None`
    /// when every stage has completed.
    pub async fn run_next_stage(&mut self) -> Result<Option<StageId>> {
        if let Some(failed) = self.state.failed_stage() {
            return Err(PipelineError::InvalidConfig(format!(
                "pipeline already failed at stage '{}'",
                failed
            )));
        }
        if self.state.status(StageId::Params) != StageStatus::Completed {
            return Err(PipelineError::InvalidConfig(
                "pipeline has not been started".to_string(),
            ));
        }
        let Some(stage) = self.next_stage() else {
            return Ok(None);
        };
        self.run_stage(stage).await?;
        Ok(Some(stage))
    }

    /// Run pending stages up to and including `last`.
    pub async fn run_until(&mut self, last: StageId) -> Result<()> {
        while let Some(next) = self.next_stage() {
            if next.index() > last.index() {
                break;
            }
            self.run_next_stage().await?;
        }
        Ok(())
    }

    /// Assemble the final artifact from the formatting stage's output.
    pub fn finish(&mut self) -> Result<FinalArtifact> {
        let formatted = self.state.results().get(keys::FORMATTED_RESULT);
        let field = |name: &str| {
            formatted
                .and_then(|f| f.get(name))
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| PipelineError::MissingUpstreamResult {
                    key: format!("{}.{}", keys::FORMATTED_RESULT, name),
                })
        };
        let title = field("title")?;
        let content = field("content")?;
        let model = self.prompts.require(ids::FORMATTING)?.generation_config.model.clone();

        let artifact = self
            .state
            .set_final_artifact(title, content, model)?
            .clone();

        tracing::info!(
            duration_ms = artifact.metadata.duration_ms,
            title = %artifact.title,
            "pipeline completed"
        );
        self.progress(None, "Article complete");
        emit(
            &self.event_handler,
            Event::PipelineCompleted {
                duration_ms: artifact.metadata.duration_ms,
            },
        );
        Ok(artifact)
    }

    async fn run_stage(&mut self, stage: StageId) -> Result<()> {
        self.mark(stage, StageStatus::InProgress)?;
        tracing::info!(stage = %stage, "stage started");

        let outcome = match stage {
            StageId::Params => Ok(self.state.parameters().to_value()),
            StageId::Persona => Ok(self.stage_persona().await),
            StageId::Knowledge => self.stage_knowledge().await,
            StageId::Profile => self.stage_profile().await,
            StageId::Empathy => self.stage_empathy().await,
            StageId::Article => self.stage_article().await,
            StageId::Titles => self.stage_titles().await,
            StageId::Compliance => self.stage_compliance().await,
            StageId::Formatting => self.stage_formatting().await,
        };

        match outcome {
            Ok(output) => {
                self.mark(stage, StageStatus::Completed)?;
                tracing::info!(stage = %stage, step = self.state.current_step(), "stage completed");
                emit(&self.event_handler, Event::StageCompleted { stage, output });
                Ok(())
            }
            Err(e) => {
                self.mark(stage, StageStatus::Failed)?;
                tracing::error!(stage = %stage, error = %e, "stage failed");
                Err(PipelineError::StageFailed {
                    stage: stage.to_string(),
                    source: Box::new(e),
                })
            }
        }
    }

    /// Apply a status change, advance on completion, and report it.
    fn mark(&mut self, stage: StageId, status: StageStatus) -> Result<()> {
        self.state.transition(stage, status)?;
        if status == StageStatus::Completed {
            self.state.advance();
        }
        emit(
            &self.event_handler,
            Event::StageStatusChanged {
                stage,
                status,
                current_step: self.state.current_step(),
            },
        );
        Ok(())
    }

    fn progress(&self, stage: Option<StageId>, message: impl Into<String>) {
        emit(
            &self.event_handler,
            Event::Progress {
                stage,
                message: message.into(),
            },
        );
    }

    fn render(&self, prompt_id: &str, extras: Vec<(&str, Value)>) -> Result<RenderedPrompt> {
        let spec = self.prompts.require(prompt_id)?;
        let root = self.state.path_root();
        let mut variables = build_variables(&spec.variable_mapping, &root);
        for (name, value) in extras {
            variables.insert(name.to_string(), Some(value));
        }
        let user = substitute(&spec.user_prompt_template, &variables);
        tracing::debug!(prompt = prompt_id, chars = user.len(), "rendered prompt");

        Ok(RenderedPrompt {
            user,
            system: spec.system_prompt.clone(),
            config: spec.generation_config.clone(),
        })
    }

    async fn text(&self, prompt_id: &str, extras: Vec<(&str, Value)>) -> Result<String> {
        let prompt = self.render(prompt_id, extras)?;
        self.client
            .generate_text(&prompt.user, Some(&prompt.system), &prompt.config)
            .await
    }

    async fn json(&self, prompt_id: &str) -> Result<Value> {
        let prompt = self.render(prompt_id, Vec::new())?;
        self.client
            .generate_json(&prompt.user, Some(&prompt.system), &prompt.config)
            .await
    }

    /// Fail with `MissingUpstreamResult` unless an earlier stage stored `key`.
    fn require_result(&self, key: &str) -> Result<()> {
        if self.state.results().contains(key) {
            Ok(())
        } else {
            Err(PipelineError::MissingUpstreamResult {
                key: key.to_string(),
            })
        }
    }

    /// Never fails: falls back to [`DEFAULT_PERSONA`].
    async fn stage_persona(&mut self) -> Value {
        self.progress(Some(StageId::Persona), "Deriving the author persona...");

        let persona = match self.text(ids::PERSONA, Vec::new()).await {
            Ok(text) if !text.trim().is_empty() => {
                self.progress(Some(StageId::Persona), "Persona ready");
                text
            }
            outcome => {
                let reason = match outcome {
                    Err(e) => e.to_string(),
                    Ok(_) => "empty persona".to_string(),
                };
                tracing::warn!(reason = %reason, "persona generation failed, using default persona");
                emit(
                    &self.event_handler,
                    Event::Degraded {
                        stage: StageId::Persona,
                        reason,
                    },
                );
                self.progress(Some(StageId::Persona), "Using the default persona");
                DEFAULT_PERSONA.to_string()
            }
        };

        let value = Value::String(persona);
        self.state.store_result(keys::PERSONA, value.clone());
        value
    }

    /// Three sequential sub-generations, each toggleable. Disabled ones store `null`.
    async fn stage_knowledge(&mut self) -> Result<Value> {
        let stage = Some(StageId::Knowledge);
        self.progress(stage, "Building the knowledge base...");

        let params = self.state.parameters();
        let plan = [
            (
                params.enable_popular_articles(),
                ids::POPULAR_ARTICLES,
                keys::POPULAR_ARTICLES,
                "Generating reference posts...",
            ),
            (
                params.enable_keywords(),
                ids::KEYWORDS,
                keys::KEYWORDS,
                "Extracting keywords...",
            ),
            (
                params.enable_rtb(),
                ids::RTB,
                keys::RTB,
                "Writing reasons to believe...",
            ),
        ];

        let mut produced = Vec::with_capacity(plan.len());
        for (enabled, prompt_id, key, message) in plan {
            let value = if enabled {
                self.progress(stage, message);
                self.json(prompt_id).await?
            } else {
                tracing::debug!(key, "knowledge sub-generation disabled");
                Value::Null
            };
            produced.push((key, value));
        }

        for (key, value) in &produced {
            self.state.store_result(key, value.clone());
        }
        self.progress(stage, "Knowledge base ready");
        Ok(Value::Object(
            produced
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        ))
    }

    async fn stage_profile(&mut self) -> Result<Value> {
        self.require_result(keys::PERSONA)?;
        self.progress(Some(StageId::Profile), "Profiling the target reader...");

        let profile = self.text(ids::USER_PROFILE, Vec::new()).await?;
        let value = Value::String(profile);
        self.state.store_result(keys::USER_PROFILE, value.clone());
        self.progress(Some(StageId::Profile), "Reader profile ready");
        Ok(value)
    }

    async fn stage_empathy(&mut self) -> Result<Value> {
        self.require_result(keys::USER_PROFILE)?;
        self.progress(Some(StageId::Empathy), "Extracting empathy points...");

        let points = self.json(ids::EMPATHY_POINTS).await?;
        self.state.store_result(keys::EMPATHY_POINTS, points.clone());
        self.progress(Some(StageId::Empathy), "Empathy points ready");
        Ok(points)
    }

    async fn stage_article(&mut self) -> Result<Value> {
        for key in [keys::USER_PROFILE, keys::EMPATHY_POINTS, keys::RTB] {
            self.require_result(key)?;
        }
        self.progress(Some(StageId::Article), "Writing the article...");

        let length = self.state.parameters().article_length();
        let article = self
            .text(ids::ARTICLE, vec![("articleLength", json!(length))])
            .await?;
        if article.trim().is_empty() {
            return Err(PipelineError::EmptyGenerationOutput {
                what: "article body".to_string(),
            });
        }

        let value = Value::String(article);
        self.state.store_result(keys::ARTICLE, value.clone());
        self.progress(Some(StageId::Article), "Article written");
        Ok(value)
    }

    /// Stores the candidates and selects the first one by default.
    async fn stage_titles(&mut self) -> Result<Value> {
        self.require_result(keys::ARTICLE)?;
        self.progress(Some(StageId::Titles), "Proposing titles...");

        let options = self.json(ids::TITLES).await?;
        self.state.store_result(keys::TITLE_OPTIONS, options.clone());
        if let Some(first) = first_title(&options) {
            self.state
                .store_result(keys::SELECTED_TITLE, Value::String(first));
        }
        self.progress(Some(StageId::Titles), "Titles ready");
        Ok(options)
    }

    async fn stage_compliance(&mut self) -> Result<Value> {
        self.require_result(keys::ARTICLE)?;
        self.progress(Some(StageId::Compliance), "Reviewing wording for compliance...");

        if self.state.results().get_str(keys::SELECTED_TITLE).is_none() {
            let fallback = self
                .state
                .results()
                .get(keys::TITLE_OPTIONS)
                .and_then(first_title);
            let title = match fallback {
                Some(title) => {
                    tracing::warn!(title = %title, "no title selected, using the first candidate");
                    title
                }
                None => {
                    tracing::warn!("no title candidates, using the default title");
                    DEFAULT_TITLE.to_string()
                }
            };
            self.state
                .store_result(keys::SELECTED_TITLE, Value::String(title));
        }

        let response = self.json(ids::COMPLIANCE).await?;
        let compliance = match response.get("compliance") {
            Some(inner) => inner.clone(),
            None => response,
        };
        self.state
            .store_result(keys::COMPLIANCE_RESULT, compliance.clone());

        let has_issues = compliance
            .get("hasIssues")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let message = if has_issues {
            let count = compliance
                .get("issues")
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            format!("Compliance review done, fixed {} issue(s)", count)
        } else {
            "Compliance review done, no issues found".to_string()
        };
        self.progress(Some(StageId::Compliance), message);
        Ok(compliance)
    }

    /// Works on the compliance stage's corrected title and body.
    async fn stage_formatting(&mut self) -> Result<Value> {
        for field in ["fixedTitle", "fixedArticle"] {
            let present = self
                .state
                .results()
                .get(keys::COMPLIANCE_RESULT)
                .and_then(|c| c.get(field))
                .is_some_and(Value::is_string);
            if !present {
                return Err(PipelineError::MissingUpstreamResult {
                    key: format!("{}.{}", keys::COMPLIANCE_RESULT, field),
                });
            }
        }
        self.progress(Some(StageId::Formatting), "Polishing layout and adding emoji...");

        let response = self.json(ids::FORMATTING).await?;
        let formatted = match response.get("result") {
            Some(inner) => inner.clone(),
            None => response,
        };
        self.state
            .store_result(keys::FORMATTED_RESULT, formatted.clone());

        let emoji = match formatted.get("emojiCount") {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) => s.clone(),
            _ => "0".to_string(),
        };
        self.progress(
            Some(StageId::Formatting),
            format!("Formatting done, {} emoji added", emoji),
        );
        Ok(formatted)
    }
}

/// First candidate title: `titles[0].title`, or `titles[0]` when it is a bare string.
fn first_title(options: &Value) -> Option<String> {
    let first = options.get("titles")?.as_array()?.first()?;
    first
        .get("title")
        .and_then(Value::as_str)
        .or_else(|| first.as_str())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}
