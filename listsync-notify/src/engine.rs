//! Tera rendering engine: [`SummaryKind`] and [`Renderer`].
//!
//! | Kind | Template              | Output                         |
//! |------|-----------------------|--------------------------------|
//! | Text | `summary.txt.tera`    | plain-text summary for stdout  |
//! | Card | `card.json.tera`      | JSON payload for a chat webhook|
//!
//! Templates found in an override directory (normally `<state>/templates/`)
//! replace the embedded ones with the same name.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tera::Tera;

use listsync_engine::RunReport;

use crate::context::SummaryContext;
use crate::error::RenderError;

// ---------------------------------------------------------------------------
// Embedded templates, baked into the binary at compile time via include_str!
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[
    ("shared/macros.tera", include_str!("templates/_partials/macros.tera")),
    ("summary.txt.tera", include_str!("templates/summary.txt.tera")),
    ("card.json.tera", include_str!("templates/card.json.tera")),
];

// ---------------------------------------------------------------------------
// Template loading helpers
// ---------------------------------------------------------------------------

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io { path: path.into(), source }
}

fn normalize_template_name(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}

fn collect_template_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), RenderError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        let meta = entry.metadata().map_err(|e| io_err(&path, e))?;
        if meta.is_dir() {
            collect_template_files(&path, out)?;
        } else if meta.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

fn load_override_templates(dir: &Path) -> Result<Vec<(String, String)>, RenderError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut files = Vec::new();
    collect_template_files(dir, &mut files)?;
    let mut templates = Vec::new();
    for path in files {
        if path.extension().and_then(|s| s.to_str()) != Some("tera") {
            continue;
        }
        let rel = path.strip_prefix(dir).unwrap_or(path.as_path());
        let name = normalize_template_name(rel);
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        tracing::debug!("template override {name} from {}", path.display());
        templates.push((name, contents));
    }
    Ok(templates)
}

fn build_tera(override_dir: Option<&Path>) -> Result<Tera, RenderError> {
    let mut templates: HashMap<String, String> = HashMap::new();
    for (name, content) in TPLS {
        templates.insert(normalize_template_name(Path::new(name)), (*content).to_string());
    }
    if let Some(dir) = override_dir {
        for (name, content) in load_override_templates(dir)? {
            templates.insert(name, content);
        }
    }

    let mut tera = Tera::default();
    let items: Vec<(String, String)> = templates.into_iter().collect();
    tera.add_raw_templates(items)?;
    Ok(tera)
}

// ---------------------------------------------------------------------------
// SummaryKind
// ---------------------------------------------------------------------------

/// Output formats for a run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SummaryKind {
    Text,
    Card,
}

impl SummaryKind {
    pub fn all() -> &'static [SummaryKind] {
        &[SummaryKind::Text, SummaryKind::Card]
    }

    pub fn template_name(&self) -> &'static str {
        match self {
            SummaryKind::Text => "summary.txt.tera",
            SummaryKind::Card => "card.json.tera",
        }
    }
}

// ---------------------------------------------------------------------------
// TemplateEngine
// ---------------------------------------------------------------------------

/// Tera engine holding the embedded templates plus any overrides.
pub struct TemplateEngine {
    tera: Tera,
}

impl TemplateEngine {
    pub fn new(override_dir: Option<&Path>) -> Result<Self, RenderError> {
        let tera = build_tera(override_dir)?;
        Ok(TemplateEngine { tera })
    }

    pub fn render(&self, ctx: &SummaryContext, kind: SummaryKind) -> Result<String, RenderError> {
        let tera_ctx = ctx.to_tera_context()?;
        Ok(self.tera.render(kind.template_name(), &tera_ctx)?)
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Renders run reports. Create once and reuse.
pub struct Renderer {
    engine: TemplateEngine,
}

impl Renderer {
    /// Embedded templates only.
    pub fn new() -> Result<Self, RenderError> {
        Ok(Renderer { engine: TemplateEngine::new(None)? })
    }

    /// Embedded templates, replaced by any `.tera` files found under `dir`.
    pub fn with_overrides(dir: &Path) -> Result<Self, RenderError> {
        Ok(Renderer { engine: TemplateEngine::new(Some(dir))? })
    }

    pub fn render(&self, report: &RunReport, kind: SummaryKind) -> Result<String, RenderError> {
        let ctx = SummaryContext::from_report(report);
        self.engine.render(&ctx, kind)
    }

    /// Render the webhook card and check that it is valid JSON.
    pub fn render_card(&self, report: &RunReport) -> Result<serde_json::Value, RenderError> {
        let rendered = self.render(report, SummaryKind::Card)?;
        Ok(serde_json::from_str(&rendered)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn empty_report() -> RunReport {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut report = RunReport::new(start, true);
        report.finish(start);
        report
    }

    #[test]
    fn renderer_new_succeeds() {
        Renderer::new().expect("embedded templates parse");
    }

    #[test]
    fn every_kind_renders_an_empty_report() {
        let renderer = Renderer::new().unwrap();
        for kind in SummaryKind::all() {
            let out = renderer
                .render(&empty_report(), *kind)
                .unwrap_or_else(|e| panic!("render failed for {kind:?}: {e}"));
            assert!(out.contains("dry run"), "{kind:?} should mention dry run");
            assert!(!out.contains('\r'));
        }
    }

    #[test]
    fn empty_card_is_valid_json() {
        let renderer = Renderer::new().unwrap();
        let card = renderer.render_card(&empty_report()).unwrap();
        assert_eq!(card["listsync"]["status"], "ok");
        assert_eq!(card["listsync"]["dry_run"], true);
    }
}
