use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use shared_event_bus::{EventPublisher, FileEventPublisher};
use shared_logging::LogLevel;
use uuid::Uuid;

use crate::{
    client::{GenerationBackend, GenerationClient, HttpGenerationBackend, LoopbackGenerationBackend},
    company::{Company, CompanyProfile, NewCompany},
    config::SimulatorConfig,
    decision::Decision,
    display::{DecisionView, Workspace},
    error::SimulationError,
    extractor::extract_assessment,
    file_store::FileStore,
    prompt::build_prompt,
    store::{ContextStore, DecisionStore, MemoryStore, StoreError},
    telemetry::SimulationTelemetry,
};

/// Module label used for telemetry records.
pub const TELEMETRY_MODULE: &str = "decisionsim.simulator";

/// Runs the prompt, generate, extract and persist pipeline.
pub struct DecisionSimulator {
    client: GenerationClient,
    companies: Arc<dyn ContextStore>,
    decisions: Arc<dyn DecisionStore>,
    telemetry: Option<SimulationTelemetry>,
}

impl std::fmt::Debug for DecisionSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionSimulator")
            .field("client", &self.client)
            .field("telemetry", &self.telemetry)
            .finish_non_exhaustive()
    }
}

impl DecisionSimulator {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> DecisionSimulatorBuilder {
        DecisionSimulatorBuilder::default()
    }

    /// Wires a simulator from configuration: file store under `data_dir`,
    /// HTTP backend (or loopback when `offline`), optional telemetry sinks.
    pub fn from_config(config: &SimulatorConfig, offline: bool) -> Result<Self> {
        let backend: Arc<dyn GenerationBackend> = if offline {
            Arc::new(LoopbackGenerationBackend)
        } else {
            Arc::new(
                HttpGenerationBackend::new(config.generation.clone(), config.api_key())
                    .context("building generation HTTP client")?,
            )
        };

        let mut telemetry = SimulationTelemetry::builder(TELEMETRY_MODULE);
        if let Some(path) = &config.telemetry.log_path {
            telemetry = telemetry.log_path(path);
        }
        if let Some(path) = &config.telemetry.event_log {
            let publisher: Arc<dyn EventPublisher> = Arc::new(FileEventPublisher::new(path)?);
            telemetry = telemetry.event_publisher(publisher);
        }
        let telemetry = telemetry.build().context("initialising telemetry")?;

        let client = GenerationClient::new(backend)
            .with_retry(config.retry_policy())
            .with_timeout(config.timeout())
            .with_telemetry(telemetry.clone());
        let store = Arc::new(
            FileStore::open(&config.storage.data_dir).with_context(|| {
                format!("opening data directory {}", config.storage.data_dir.display())
            })?,
        );

        Self::builder()
            .client(client)
            .store(store)
            .telemetry(telemetry)
            .build()
    }

    /// Registers a company under a new key.
    pub fn register_company(&self, input: NewCompany) -> Result<Company, SimulationError> {
        let company = self.companies.create(Company::new(input))?;
        self.log(
            None,
            LogLevel::Info,
            "company.registered",
            json!({ "company_key": company.company_key, "company_id": company.id }),
        );
        Ok(company)
    }

    /// Looks a company up by key.
    pub fn company(&self, company_key: &str) -> Result<Company, SimulationError> {
        self.companies
            .get(company_key)?
            .ok_or_else(|| SimulationError::NotFound(company_key.to_owned()))
    }

    /// Replaces a company's profile. Stored decisions keep their snapshots.
    pub fn update_company(
        &self,
        company_key: &str,
        profile: CompanyProfile,
    ) -> Result<Company, SimulationError> {
        let company = self.company(company_key)?.with_profile(profile);
        let company = self.companies.update(company)?;
        self.log(
            None,
            LogLevel::Info,
            "company.updated",
            json!({ "company_key": company.company_key }),
        );
        Ok(company)
    }

    /// Simulates a scenario for a company and persists the result.
    ///
    /// Nothing is written unless the model output yields an assessment.
    pub async fn simulate(
        &self,
        company: &Company,
        scenario: &str,
        created_by: Option<&str>,
    ) -> Result<Decision, SimulationError> {
        let run_id = Uuid::new_v4().to_string();
        self.log(
            Some(&run_id),
            LogLevel::Info,
            "simulation.started",
            json!({ "company_key": company.company_key, "scenario_chars": scenario.chars().count() }),
        );

        match self.run(company, scenario, created_by).await {
            Ok(decision) => {
                self.log(
                    Some(&run_id),
                    LogLevel::Info,
                    "simulation.completed",
                    json!({ "decision_id": decision.id }),
                );
                if let Some(telemetry) = &self.telemetry {
                    let payload = json!({
                        "company_key": company.company_key,
                        "decision_id": decision.id,
                        "run_id": run_id,
                    });
                    if let Err(err) = telemetry.event("decision.simulated", payload).await {
                        tracing::warn!(error = %err, "failed to publish decision event");
                    }
                }
                Ok(decision)
            }
            Err(err) => {
                tracing::warn!(kind = %err.kind(), error = %err, "simulation failed");
                self.log(
                    Some(&run_id),
                    LogLevel::Error,
                    "simulation.failed",
                    json!({ "kind": err.kind().as_str(), "error": err.to_string() }),
                );
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        company: &Company,
        scenario: &str,
        created_by: Option<&str>,
    ) -> Result<Decision, SimulationError> {
        let prompt = build_prompt(&company.snapshot(), scenario);
        let raw = self.client.invoke(&prompt).await?;
        let assessment = extract_assessment(&raw)?;
        let decision =
            Decision::new(company, scenario, &assessment, created_by).map_err(StoreError::Encode)?;
        Ok(self.decisions.insert(decision)?)
    }

    /// Resolves the company by key, then simulates.
    pub async fn simulate_for_key(
        &self,
        company_key: &str,
        scenario: &str,
        created_by: Option<&str>,
    ) -> Result<Decision, SimulationError> {
        let company = self.company(company_key)?;
        self.simulate(&company, scenario, created_by).await
    }

    /// Company with its decisions, newest first, ready for display.
    pub fn workspace(&self, company_key: &str) -> Result<Workspace, SimulationError> {
        let company = self.company(company_key)?;
        let decisions = self
            .decisions
            .list_by_company(company.id)?
            .into_iter()
            .map(DecisionView::project)
            .collect();
        Ok(Workspace { company, decisions })
    }

    /// Telemetry handle, if configured.
    #[must_use]
    pub const fn telemetry(&self) -> Option<&SimulationTelemetry> {
        self.telemetry.as_ref()
    }

    fn log(&self, run_id: Option<&str>, level: LogLevel, message: &str, metadata: serde_json::Value) {
        let Some(telemetry) = &self.telemetry else {
            return;
        };
        let written = match run_id {
            Some(id) => telemetry.log_correlated(id, level, message, metadata),
            None => telemetry.log(level, message, metadata),
        };
        if let Err(err) = written {
            tracing::warn!(error = %err, "failed to write telemetry record");
        }
    }
}

/// Builder for [`DecisionSimulator`].
#[derive(Default)]
pub struct DecisionSimulatorBuilder {
    client: Option<GenerationClient>,
    companies: Option<Arc<dyn ContextStore>>,
    decisions: Option<Arc<dyn DecisionStore>>,
    telemetry: Option<SimulationTelemetry>,
}

impl DecisionSimulatorBuilder {
    /// Sets the generation client. Required.
    #[must_use]
    pub fn client(mut self, client: GenerationClient) -> Self {
        self.client = Some(client);
        self
    }

    /// Uses one store for both companies and decisions.
    #[must_use]
    pub fn store<S>(mut self, store: Arc<S>) -> Self
    where
        S: ContextStore + DecisionStore + 'static,
    {
        self.companies = Some(store.clone());
        self.decisions = Some(store);
        self
    }

    /// Sets the company store.
    #[must_use]
    pub fn context_store(mut self, store: Arc<dyn ContextStore>) -> Self {
        self.companies = Some(store);
        self
    }

    /// Sets the decision store.
    #[must_use]
    pub fn decision_store(mut self, store: Arc<dyn DecisionStore>) -> Self {
        self.decisions = Some(store);
        self
    }

    /// Sets telemetry.
    #[must_use]
    pub fn telemetry(mut self, telemetry: SimulationTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Builds the simulator. Missing stores default to one shared
    /// in-memory store.
    pub fn build(self) -> Result<DecisionSimulator> {
        let client = self
            .client
            .context("a generation client is required to build the simulator")?;
        let (companies, decisions) = match (self.companies, self.decisions) {
            (Some(companies), Some(decisions)) => (companies, decisions),
            (companies, decisions) => {
                let memory = Arc::new(MemoryStore::new());
                let fallback_companies: Arc<dyn ContextStore> = memory.clone();
                let fallback_decisions: Arc<dyn DecisionStore> = memory;
                (
                    companies.unwrap_or(fallback_companies),
                    decisions.unwrap_or(fallback_decisions),
                )
            }
        };
        Ok(DecisionSimulator {
            client,
            companies,
            decisions,
            telemetry: self.telemetry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assessment::Assessment,
        client::{RetryPolicy, ScriptedGenerationBackend, TransportError},
        company::ContextSnapshot,
        error::ErrorKind,
    };
    use shared_event_bus::{EventSubscriber, MemoryEventBus};
    use shared_logging::JsonLogger;
    use std::time::Duration;
    use tempfile::tempdir;

    const GOOD: &str = r#"Here you go:
{"risk_level":"High","risk_summary":"Thin margins","best_case_outcomes":["Growth"],"worst_case_risks":"Cash crunch","second_order_effects":null,"recommendation":"Stage it"}"#;

    struct Harness {
        simulator: DecisionSimulator,
        store: Arc<MemoryStore>,
        backend: Arc<ScriptedGenerationBackend>,
    }

    fn harness(script: Vec<Result<String, TransportError>>) -> Harness {
        let backend = Arc::new(ScriptedGenerationBackend::new(script));
        let store = Arc::new(MemoryStore::new());
        let client = GenerationClient::new(backend.clone())
            .with_retry(RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
                multiplier: 2.0,
                jitter: 0.0,
            })
            .with_timeout(Duration::from_secs(2));
        let simulator = DecisionSimulator::builder()
            .client(client)
            .store(store.clone())
            .build()
            .unwrap();
        Harness {
            simulator,
            store,
            backend,
        }
    }

    fn acme() -> NewCompany {
        NewCompany {
            company_key: "acme".into(),
            profile: CompanyProfile {
                industry: "Retail".into(),
                size: "50-200".into(),
                operating_model: "Omnichannel".into(),
                risk_sensitivity: "Low".into(),
                priorities: "Footfall".into(),
            },
        }
    }

    #[tokio::test]
    async fn two_simulations_listed_newest_first_with_their_own_snapshots() {
        let h = harness(vec![Ok(GOOD.into()), Ok(GOOD.into())]);
        let company = h.simulator.register_company(acme()).unwrap();
        let first = h
            .simulator
            .simulate_for_key("acme", "Open a pop-up store", Some("ana"))
            .await
            .unwrap();

        let mut profile = company.profile.clone();
        profile.risk_sensitivity = "High".into();
        let updated = h.simulator.update_company("acme", profile.clone()).unwrap();
        let second = h
            .simulator
            .simulate_for_key("acme", "Close the flagship", None)
            .await
            .unwrap();

        profile.priorities = "Online growth".into();
        h.simulator.update_company("acme", profile).unwrap();

        let workspace = h.simulator.workspace("acme").unwrap();
        let ids: Vec<Uuid> = workspace.decisions.iter().map(|v| v.decision.id).collect();
        assert_eq!(ids, [second.id, first.id]);
        assert_eq!(workspace.company.profile.priorities, "Online growth");

        let snapshots: Vec<ContextSnapshot> = workspace
            .decisions
            .iter()
            .map(|v| v.snapshot.clone().unwrap())
            .collect();
        assert_eq!(snapshots[0], updated.snapshot());
        assert_eq!(snapshots[1], company.snapshot());
        assert_eq!(workspace.decisions[0].decision.created_by, "Team");
        assert_eq!(workspace.decisions[1].decision.created_by, "ana");

        let assessment = &workspace.decisions[0].assessment;
        assert!(!workspace.decisions[0].recovered);
        assert_eq!(assessment.worst_case_risks, vec!["Cash crunch".to_string()]);
        assert!(assessment.second_order_effects.is_empty());
        assert_eq!(assessment.recommendation_text(), "Stage it");

        let prompts = h.backend.prompts();
        assert!(prompts[0].contains("Sensitivity: Low"));
        assert!(prompts[1].contains("Sensitivity: High"));
    }

    #[tokio::test]
    async fn failures_surface_their_kind_and_write_nothing() {
        let cases: Vec<(Vec<Result<String, TransportError>>, ErrorKind)> = vec![
            (vec![Ok("   ".into())], ErrorKind::EmptyResponse),
            (vec![Ok("sorry, I can't help".into())], ErrorKind::MalformedOutput),
            (vec![Ok("result: {not valid json}".into())], ErrorKind::InvalidJson),
            (
                vec![
                    Err(TransportError::new("reset")),
                    Err(TransportError::new("reset again")),
                ],
                ErrorKind::Transport,
            ),
        ];
        for (script, kind) in cases {
            let h = harness(script);
            h.simulator.register_company(acme()).unwrap();
            let err = h
                .simulator
                .simulate_for_key("acme", "Anything", None)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), kind);
            assert_eq!(h.store.decision_count(), 0, "kind {kind}");
        }
    }

    #[tokio::test]
    async fn transient_transport_failure_is_retried() {
        let h = harness(vec![Err(TransportError::status(502, "bad gateway")), Ok(GOOD.into())]);
        h.simulator.register_company(acme()).unwrap();
        h.simulator
            .simulate_for_key("acme", "Anything", None)
            .await
            .unwrap();
        assert_eq!(h.backend.calls(), 2);
        assert_eq!(h.store.decision_count(), 1);
    }

    #[tokio::test]
    async fn unknown_and_duplicate_keys_are_rejected() {
        let h = harness(vec![Ok(GOOD.into())]);
        let err = h
            .simulator
            .simulate_for_key("ghost", "Anything", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(h.backend.calls(), 0);

        h.simulator.register_company(acme()).unwrap();
        let err = h.simulator.register_company(acme()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateKey);
        assert!(h.simulator.workspace("ghost").is_err());
    }

    #[tokio::test]
    async fn corrupted_stored_assessment_shows_fallback() {
        let h = harness(vec![]);
        let company = h.simulator.register_company(acme()).unwrap();
        let mut decision =
            Decision::new(&company, "Legacy row", &Assessment::fallback(), None).unwrap();
        decision.assessment = "{\"risk_level\": \"High\", ".into();
        h.store.insert(decision).unwrap();

        let workspace = h.simulator.workspace("acme").unwrap();
        assert!(workspace.decisions[0].recovered);
        assert_eq!(workspace.decisions[0].assessment, Assessment::fallback());
    }

    #[tokio::test]
    async fn telemetry_records_the_run() {
        let dir = tempdir().unwrap();
        let bus = Arc::new(MemoryEventBus::new(8));
        let telemetry = SimulationTelemetry::builder(TELEMETRY_MODULE)
            .log_path(dir.path().join("sim.log"))
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let backend = Arc::new(ScriptedGenerationBackend::new([Ok(GOOD.to_string())]));
        let simulator = DecisionSimulator::builder()
            .client(GenerationClient::new(backend))
            .telemetry(telemetry)
            .build()
            .unwrap();
        let mut live = bus.subscribe().await.unwrap();
        simulator.register_company(acme()).unwrap();
        let decision = simulator
            .simulate_for_key("acme", "Anything", None)
            .await
            .unwrap();

        let delivered = live.recv().await.unwrap();
        assert_eq!(delivered.event_type, "decision.simulated");
        assert_eq!(delivered.source, TELEMETRY_MODULE);
        let events = bus.events_of_type("decision.simulated");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["decision_id"], decision.id.to_string());

        let records = JsonLogger::new(dir.path().join("sim.log"))
            .unwrap()
            .read_records()
            .unwrap();
        let messages: Vec<&str> = records.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(
            messages,
            ["company.registered", "simulation.started", "simulation.completed"]
        );
        assert_eq!(records[1].correlation_id, records[2].correlation_id);
        assert!(records[1].correlation_id.is_some());
        assert!(simulator.telemetry().is_some());
    }

    #[tokio::test]
    async fn offline_configuration_persists_to_disk() {
        let dir = tempdir().unwrap();
        let config = SimulatorConfig::parse(
            "[storage]\ndata_dir = \"store\"\n\n[telemetry]\nevent_log = \"events.jsonl\"\n",
            dir.path(),
        )
        .unwrap();
        let simulator = DecisionSimulator::from_config(&config, true).unwrap();
        simulator.register_company(acme()).unwrap();
        simulator
            .simulate_for_key("acme", "Anything", None)
            .await
            .unwrap();

        let reopened = DecisionSimulator::from_config(&config, true).unwrap();
        let workspace = reopened.workspace("acme").unwrap();
        assert_eq!(workspace.decisions.len(), 1);
        assert_eq!(workspace.decisions[0].assessment.risk_level_text(), "Medium");

        let events = FileEventPublisher::new(dir.path().join("events.jsonl"))
            .unwrap()
            .read_all()
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn builder_requires_a_client() {
        assert!(DecisionSimulator::builder().build().is_err());
    }
}
