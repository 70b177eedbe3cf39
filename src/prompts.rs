//! Prompt definitions for every generation call in the pipeline.
//!
//! A [`PromptSpec`] is a closed description of one call: system prompt, user
//! prompt template, where each `{{placeholder}}` gets its value from, and the
//! generation settings. [`PromptLibrary`] holds one spec per prompt id and
//! is validated when it is loaded, never at call time.

use crate::client::GenerationConfig;
use crate::error::Result;
use crate::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Prompt ids used by the orchestrator.
pub mod ids {
    pub const PERSONA: &str = "persona_generation";
    pub const POPULAR_ARTICLES: &str = "knowledge_popular_articles";
    pub const KEYWORDS: &str = "knowledge_keywords";
    pub const RTB: &str = "knowledge_rtb";
    pub const USER_PROFILE: &str = "user_profile";
    pub const EMPATHY_POINTS: &str = "empathy_points";
    pub const ARTICLE: &str = "article_generation";
    pub const TITLES: &str = "title_optimization";
    pub const COMPLIANCE: &str = "compliance_check";
    pub const FORMATTING: &str = "formatting";

    /// Every id a complete library must define.
    pub const REQUIRED: [&str; 10] = [
        PERSONA,
        POPULAR_ARTICLES,
        KEYWORDS,
        RTB,
        USER_PROFILE,
        EMPATHY_POINTS,
        ARTICLE,
        TITLES,
        COMPLIANCE,
        FORMATTING,
    ];
}

/// One prompt definition. Every field is required when deserializing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptSpec {
    pub id: String,
    pub system_prompt: String,
    pub user_prompt_template: String,
    /// Placeholder name to dotted path into the pipeline state,
    /// e.g. `"persona" -> "workflow.intermediateResults.persona"`.
    pub variable_mapping: BTreeMap<String, String>,
    pub generation_config: GenerationConfig,
}

impl PromptSpec {
    /// Check the fields serde cannot: non-empty id and template, non-empty
    /// mapping paths, sane generation settings.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(PipelineError::InvalidConfig(msg));

        if self.id.trim().is_empty() {
            return invalid("prompt id must not be empty".to_string());
        }
        if self.user_prompt_template.trim().is_empty() {
            return invalid(format!("prompt '{}' has an empty user prompt template", self.id));
        }
        if let Some((name, _)) = self
            .variable_mapping
            .iter()
            .find(|(name, path)| name.trim().is_empty() || path.trim().is_empty())
        {
            return invalid(format!(
                "prompt '{}' has an empty variable mapping entry '{}'",
                self.id, name
            ));
        }
        let config = &self.generation_config;
        if !(0.0..=2.0).contains(&config.temperature) {
            return invalid(format!(
                "prompt '{}' temperature {} is outside 0.0..=2.0",
                self.id, config.temperature
            ));
        }
        if config.max_tokens == 0 {
            return invalid(format!("prompt '{}' max_tokens must be positive", self.id));
        }
        if config.model.trim().is_empty() {
            return invalid(format!("prompt '{}' has an empty model", self.id));
        }
        Ok(())
    }
}

/// A validated set of prompt specs keyed by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptLibrary {
    specs: HashMap<String, PromptSpec>,
}

impl PromptLibrary {
    /// Build from specs, validating each and rejecting duplicate ids.
    pub fn from_specs(specs: Vec<PromptSpec>) -> Result<Self> {
        let mut map = HashMap::with_capacity(specs.len());
        for spec in specs {
            spec.validate()?;
            if map.contains_key(&spec.id) {
                return Err(PipelineError::InvalidConfig(format!(
                    "duplicate prompt id '{}'",
                    spec.id
                )));
            }
            map.insert(spec.id.clone(), spec);
        }
        Ok(Self { specs: map })
    }

    /// Load a JSON array of prompt specs.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let specs: Vec<PromptSpec> = serde_json::from_str(s).map_err(|e| {
            PipelineError::InvalidConfig(format!("invalid prompt definitions: {}", e))
        })?;
        Self::from_specs(specs)
    }

    /// Load a JSON file containing an array of prompt specs.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Load a YAML sequence of prompt specs.
    #[cfg(feature = "yaml")]
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let specs: Vec<PromptSpec> = serde_yaml::from_str(s).map_err(|e| {
            PipelineError::InvalidConfig(format!("invalid prompt definitions: {}", e))
        })?;
        Self::from_specs(specs)
    }

    /// Replace or add specs from `overrides`.
    pub fn merge(mut self, overrides: PromptLibrary) -> Self {
        self.specs.extend(overrides.specs);
        self
    }

    /// Fail unless every id in [`ids::REQUIRED`] is defined.
    pub fn ensure_complete(&self) -> Result<()> {
        let missing: Vec<&str> = ids::REQUIRED
            .iter()
            .copied()
            .filter(|id| !self.specs.contains_key(*id))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::InvalidConfig(format!(
                "prompt library is missing: {}",
                missing.join(", ")
            )))
        }
    }

    pub fn get(&self, id: &str) -> Option<&PromptSpec> {
        self.specs.get(id)
    }

    /// Like [`get`](Self::get), as an error when absent.
    pub fn require(&self, id: &str) -> Result<&PromptSpec> {
        self.get(id)
            .ok_or_else(|| PipelineError::InvalidConfig(format!("unknown prompt id '{}'", id)))
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// The built-in prompts. Complete and valid.
    pub fn builtin() -> Self {
        let specs = builtin_specs()
            .into_iter()
            .map(|spec| (spec.id.clone(), spec))
            .collect();
        Self { specs }
    }
}

const PARAMETERS: &str = "workflow.parameters";

fn result_path(key: &str) -> String {
    format!("workflow.intermediateResults.{}", key)
}

fn spec(
    id: &str,
    system_prompt: &str,
    user_prompt_template: &str,
    mapping: &[(&str, String)],
    temperature: f64,
    max_tokens: u32,
) -> PromptSpec {
    PromptSpec {
        id: id.to_string(),
        system_prompt: system_prompt.to_string(),
        user_prompt_template: user_prompt_template.trim_start().to_string(),
        variable_mapping: mapping
            .iter()
            .map(|(name, path)| (name.to_string(), path.clone()))
            .collect(),
        generation_config: GenerationConfig::default()
            .with_temperature(temperature)
            .with_max_tokens(max_tokens),
    }
}

fn builtin_specs() -> Vec<PromptSpec> {
    let params = || ("parameters", PARAMETERS.to_string());

    vec![
        spec(
            ids::PERSONA,
            "You are a persona designer for content creators. You distil a believable, \
             well-rounded author identity from a brief and its audience.",
            r#"
Create an author persona from the following brief.

Target audience:
{{targetAudience}}

Topic:
{{feature}}

Other parameters:
{{otherParams}}

The persona must be credible, share the audience's values, and sound warm rather
than clinical. Describe identity, personality, values and tone in under 200 words,
with no heading or prefix.
"#,
            &[
                ("targetAudience", format!("{}.targetAudience", PARAMETERS)),
                ("feature", format!("{}.feature", PARAMETERS)),
                ("otherParams", PARAMETERS.to_string()),
            ],
            0.7,
            600,
        ),
        spec(
            ids::POPULAR_ARTICLES,
            "You analyse viral social posts and summarise what makes them work.",
            r#"
Write 5 example viral posts for this brief:
{{parameters}}

Each needs a title, the key selling point and the emotional technique used.

Respond with this JSON shape:
{"articles": [{"title": "...", "highlights": "...", "technique": "..."}]}
"#,
            &[params()],
            0.8,
            1500,
        ),
        spec(
            ids::KEYWORDS,
            "You find the pain points and emotional hooks behind a product brief.",
            r#"
List 15 keywords (pain points, needs, feelings) for this brief:
{{parameters}}

Respond with this JSON shape:
{"keywords": [{"word": "...", "category": "pain|need|emotion", "description": "..."}]}
"#,
            &[params()],
            0.7,
            1000,
        ),
        spec(
            ids::RTB,
            "You are a product marketer who writes reasons to believe: concrete, credible proof points.",
            r#"
Write 3 reasons to believe for this brief:
{{parameters}}

Each combines a feature, the benefit to the reader and a source of trust.

Respond with this JSON shape:
{"rtbList": [{"feature": "...", "benefit": "...", "proof": "..."}]}
"#,
            &[params()],
            0.7,
            1000,
        ),
        spec(
            ids::USER_PROFILE,
            "You are a user researcher who writes vivid reader profiles.",
            r#"
Author persona:
{{persona}}

Brief:
{{parameters}}

Reference posts:
{{popularArticles}}

Keywords:
{{keywords}}

Describe the target reader in one paragraph: who they are, their day, what worries them.
"#,
            &[
                ("persona", result_path("persona")),
                params(),
                ("popularArticles", result_path("popularArticles")),
                ("keywords", result_path("keywords")),
            ],
            0.7,
            500,
        ),
        spec(
            ids::EMPATHY_POINTS,
            "You find the moments where a reader feels understood.",
            r#"
Author persona:
{{persona}}

Reader profile:
{{userProfile}}

Keywords:
{{keywords}}

Brief:
{{parameters}}

Extract the reader's core pain points.

Respond with this JSON shape:
{"empathyPoints": [{"point": "...", "scene": "...", "emotion": "..."}]}
"#,
            &[
                ("persona", result_path("persona")),
                ("userProfile", result_path("userProfile")),
                ("keywords", result_path("keywords")),
                params(),
            ],
            0.7,
            800,
        ),
        spec(
            ids::ARTICLE,
            "You write warm, conversational social posts that read like a friend's recommendation.",
            r#"
Reader profile:
{{userProfile}}

Empathy points:
{{empathyPoints}}

Reasons to believe:
{{rtb}}

Reference posts:
{{popularArticles}}

Brief:
{{parameters}}

Write the post body, about {{articleLength}} characters. Open with a relatable scene,
weave in the product naturally, and close with a gentle call to action.
Return the body text only.
"#,
            &[
                ("userProfile", result_path("userProfile")),
                ("empathyPoints", result_path("empathyPoints")),
                ("rtb", result_path("rtb")),
                ("popularArticles", result_path("popularArticles")),
                params(),
            ],
            0.8,
            2000,
        ),
        spec(
            ids::TITLES,
            "You write scroll-stopping titles for social posts.",
            r#"
Post body:
{{article}}

Brief:
{{parameters}}

Reference titles:
{{popularTitles}}

Propose exactly 10 titles under 20 words, each using a different technique
(question, contrast, number, comparison, shared feeling).

Respond with this JSON shape:
{"titles": [{"title": "...", "technique": "...", "score": "1-10"}]}
"#,
            &[
                ("article", result_path("article")),
                params(),
                ("popularTitles", result_path("popularArticles")),
            ],
            0.9,
            1500,
        ),
        spec(
            ids::COMPLIANCE,
            "You review social posts for advertising-law problems: superlatives, medical claims, \
             absolute promises, competitor bashing and forced sharing. You rewrite offending \
             phrases while keeping the tone.",
            r#"
Title:
{{title}}

Body:
{{article}}

Check every sentence and rewrite anything non-compliant. If nothing is wrong,
return the title and body unchanged with an empty issue list.

Respond with this JSON shape:
{"compliance": {"hasIssues": true, "issues": [{"original": "...", "reason": "...", "fixed": "..."}],
 "fixedTitle": "...", "fixedArticle": "..."}}
"#,
            &[
                ("title", result_path("selectedTitle")),
                ("article", result_path("article")),
            ],
            0.5,
            2500,
        ),
        spec(
            ids::FORMATTING,
            "You are a social media editor who polishes layout and places emoji.",
            r#"
Title:
{{title}}

Body:
{{article}}

Add 10 to 15 fitting emoji, keep paragraphs to 2-4 sentences with blank lines
between them, and tidy punctuation.

Respond with this JSON shape:
{"result": {"title": "...", "content": "...", "emojiCount": 12, "modifications": ["..."]}}
"#,
            &[
                ("title", result_path("complianceResult.fixedTitle")),
                ("article", result_path("complianceResult.fixedArticle")),
            ],
            0.6,
            2500,
        ),
    ]
}
