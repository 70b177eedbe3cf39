//! Export of finished articles as standalone HTML documents.

use crate::error::Result;
use crate::state::FinalArtifact;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::path::{Path, PathBuf};

/// Longest title prefix kept in an export file name, in characters.
const MAX_FILENAME_TITLE: usize = 50;

/// File name stem used when nothing of the title survives sanitizing.
const FALLBACK_STEM: &str = "article";

/// Renders an article into a document and delivers it somewhere.
#[async_trait]
pub trait ArticleExporter: Send + Sync {
    /// Render the article as a complete document.
    fn render_article_document(&self, artifact: &FinalArtifact) -> Vec<u8>;

    /// Deliver a rendered document under `filename`. Returns where it went.
    async fn trigger_download(&self, blob: &[u8], filename: &str) -> Result<PathBuf>;

    /// Render, name and deliver in one step.
    async fn export(&self, artifact: &FinalArtifact) -> Result<PathBuf> {
        let blob = self.render_article_document(artifact);
        let filename = export_filename(&artifact.title);
        self.trigger_download(&blob, &filename).await
    }
}

/// Writes self-contained HTML files into a directory.
#[derive(Debug, Clone)]
pub struct HtmlExporter {
    target_dir: PathBuf,
}

impl HtmlExporter {
    pub fn new(target_dir: impl Into<PathBuf>) -> Self {
        Self {
            target_dir: target_dir.into(),
        }
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }
}

#[async_trait]
impl ArticleExporter for HtmlExporter {
    fn render_article_document(&self, artifact: &FinalArtifact) -> Vec<u8> {
        render_html(artifact).into_bytes()
    }

    async fn trigger_download(&self, blob: &[u8], filename: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.target_dir).await?;
        let path = self.target_dir.join(filename);
        tokio::fs::write(&path, blob).await?;
        tracing::info!(path = %path.display(), bytes = blob.len(), "exported article");
        Ok(path)
    }
}

/// File name for an exported article, dated today (UTC).
pub fn export_filename(title: &str) -> String {
    export_filename_on(title, Utc::now().date_naive())
}

/// File name for an exported article: the title without characters that are
/// unsafe in file names, whitespace runs as `-`, at most 50 characters,
/// followed by `-YYYY-MM-DD.html`. An empty result becomes `article`.
pub fn export_filename_on(title: &str, date: NaiveDate) -> String {
    let mut cleaned = String::with_capacity(title.len());
    let mut in_space = false;
    for c in title.chars() {
        if matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') || ('\0'..='\u{1f}').contains(&c) {
            continue;
        }
        if c.is_whitespace() {
            if !in_space {
                cleaned.push('-');
            }
            in_space = true;
        } else {
            cleaned.push(c);
            in_space = false;
        }
    }
    let mut stem: String = cleaned.chars().take(MAX_FILENAME_TITLE).collect();
    if stem.trim_matches('-').is_empty() {
        stem = FALLBACK_STEM.to_string();
    }
    format!("{}-{}.html", stem, date.format("%Y-%m-%d"))
}

/// Escape text for HTML element content and attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn render_html(artifact: &FinalArtifact) -> String {
    let meta = &artifact.metadata;
    let title = escape_html(&artifact.title);
    let body = escape_html(&artifact.content).replace('\n', "<br>\n");
    let generated = meta.generated_at.format("%Y-%m-%d %H:%M UTC");
    let duration = if meta.duration_ms > 0 {
        format!("{} s", (meta.duration_ms as f64 / 1000.0).round() as u64)
    } else {
        "unknown".to_string()
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <meta name="generator" content="content-pipeline">
  <title>{title}</title>
  <style>
    body {{ font-family: -apple-system, "Segoe UI", Helvetica, Arial, sans-serif; line-height: 1.8; color: #333; background: #f5f5f5; padding: 20px; }}
    .container {{ max-width: 800px; margin: 0 auto; background: #fff; border-radius: 12px; overflow: hidden; }}
    .header {{ background: linear-gradient(135deg, #667eea 0%, #764ba2 100%); color: #fff; padding: 40px 30px; text-align: center; }}
    .content {{ padding: 40px 30px; font-size: 16px; line-height: 2; word-wrap: break-word; }}
    .footer {{ background: #f8f9fa; padding: 20px 30px; border-top: 1px solid #e9ecef; font-size: 14px; color: #666; }}
  </style>
</head>
<body>
  <div class="container">
    <div class="header">
      <h1 class="title">{title}</h1>
    </div>
    <div class="content">
      {body}
    </div>
    <div class="footer">
      <span>Generated: {generated}</span> |
      <span>Duration: {duration}</span> |
      <span>Model: {model}</span>
    </div>
  </div>
</body>
</html>
"#,
        title = title,
        body = body,
        generated = generated,
        duration = duration,
        model = escape_html(&meta.model_used),
    )
}
