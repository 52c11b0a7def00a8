//! Posts the rendered card to a chat webhook.

use std::time::Duration;

use listsync_engine::RunReport;

use crate::engine::Renderer;
use crate::error::RenderError;

const TIMEOUT: Duration = Duration::from_secs(10);

pub struct WebhookNotifier {
    url: String,
    agent: ureq::Agent,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(TIMEOUT).build();
        Self { url: url.into(), agent }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Render the card for `report` and POST it. One attempt, no retry.
    pub fn send(&self, renderer: &Renderer, report: &RunReport) -> Result<(), RenderError> {
        let card = renderer.render_card(report)?;
        match self.agent.post(&self.url).send_json(card) {
            Ok(_) => {
                tracing::info!("run summary posted to webhook");
                Ok(())
            }
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                Err(RenderError::Webhook(format!("HTTP {code}: {body}")))
            }
            Err(e) => Err(RenderError::Webhook(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn unreachable_webhook_is_an_error() {
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/hook");
        let renderer = Renderer::new().unwrap();
        let mut report = RunReport::new(Utc::now(), false);
        report.finish(Utc::now());
        let err = notifier.send(&renderer, &report).unwrap_err();
        assert!(matches!(err, RenderError::Webhook(_)));
    }
}
