//! Built-in snapshot step

use async_trait::async_trait;

use crate::session::{Probe, Sample};

use super::{Step, StepContext, StepOutcome};

/// Captures one sample across all sessions and attaches it as a JSON
/// diagnostic. Useful between functional steps to keep raw telemetry in
/// the result.
pub struct SnapshotStep {
    name: String,
    probe: Probe,
    recover_on_crash: bool,
}

impl SnapshotStep {
    pub fn new(name: impl Into<String>, probe: Probe) -> Self {
        Self {
            name: name.into(),
            probe,
            recover_on_crash: false,
        }
    }

    pub fn with_recovery(mut self, recover: bool) -> Self {
        self.recover_on_crash = recover;
        self
    }
}

#[async_trait]
impl Step for SnapshotStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &mut StepContext<'_>) -> StepOutcome {
        let provider = ctx.provider();
        let sessions = ctx.sessions();
        let clock = ctx.clock();

        match provider.sample_all(sessions, &self.probe).await {
            Ok(signals) => {
                let sample = Sample::capture(&clock, signals);
                match serde_json::to_value(&sample) {
                    Ok(value) => {
                        ctx.record_sample(sample);
                        ctx.attach_json(self.name.as_str(), value);
                        StepOutcome::Passed
                    }
                    Err(e) => StepOutcome::Broken(format!("could not encode snapshot: {e}")),
                }
            }
            Err(e) if e.is_crash() && self.recover_on_crash => StepOutcome::from_error(e),
            Err(e) => StepOutcome::Broken(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::report::AttachmentBody;
    use crate::session::{RunClock, ScriptedProvider, SessionProvider, SessionScript};

    #[tokio::test]
    async fn snapshot_records_and_attaches() {
        let provider = ScriptedProvider::new();
        provider.script("chrome", SessionScript::texts(["connected"]));
        let sessions = vec![provider
            .acquire("caller", &SessionConfig::new("chrome"))
            .await
            .unwrap()];

        let step = SnapshotStep::new("stats snapshot", Probe::new("stats"));

        let mut samples = Vec::new();
        let mut attachments = Vec::new();
        let clock = RunClock::start();
        let mut ctx =
            StepContext::new(&provider, &sessions, clock, &mut samples, &mut attachments);

        assert_eq!(step.execute(&mut ctx).await, StepOutcome::Passed);
        assert_eq!(samples.len(), 1);
        assert_eq!(attachments.len(), 1);
        assert!(matches!(attachments[0].body, AttachmentBody::Json(_)));
    }

    #[tokio::test]
    async fn broken_session_breaks_the_snapshot() {
        let provider = ScriptedProvider::new();
        provider.script("chrome", SessionScript::new(vec![]).then_crash("gone"));
        let sessions = vec![provider
            .acquire("caller", &SessionConfig::new("chrome"))
            .await
            .unwrap()];

        let step = SnapshotStep::new("stats snapshot", Probe::new("stats"));

        let mut samples = Vec::new();
        let mut attachments = Vec::new();
        let clock = RunClock::start();
        let mut ctx =
            StepContext::new(&provider, &sessions, clock, &mut samples, &mut attachments);

        assert!(matches!(step.execute(&mut ctx).await, StepOutcome::Broken(_)));
    }
}
