//! In-memory implementations of the gateway traits

use async_trait::async_trait;
use chrono::Utc;
use relay::gateway::legacy::{
    medication_from_drug, medication_request_from_order, practitioner_from_provider,
};
use relay::gateway::{
    CodingPayload, Destination, ResourceSource, SearchResults, TerminologyValidator,
    WriteResponse,
};
use relay::{Error, Result};
use relay_models::FhirResource;
use serde_json::{json, Value as JsonValue};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// FHIR source backed by a map
///
/// Reads of unknown resources answer "not found". Searches answer with the
/// registered results, an empty page, or "not found" when the source was
/// built with [`InMemorySource::without_search`].
pub struct InMemorySource {
    name: String,
    resources: Mutex<HashMap<String, JsonValue>>,
    searches: Mutex<HashMap<String, SearchResults>>,
    summaries: Mutex<HashMap<String, JsonValue>>,
    serves_search: bool,
    reads: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl InMemorySource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            resources: Mutex::new(HashMap::new()),
            searches: Mutex::new(HashMap::new()),
            summaries: Mutex::new(HashMap::new()),
            serves_search: true,
            reads: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn without_search(mut self) -> Self {
        self.serves_search = false;
        self
    }

    pub fn insert(&self, resource: JsonValue) {
        let key = FhirResource::from_value(resource.clone())
            .expect("test resource needs resourceType and id")
            .key()
            .to_string();
        self.resources.lock().unwrap().insert(key, resource);
    }

    pub fn insert_all(&self, resources: impl IntoIterator<Item = JsonValue>) {
        for resource in resources {
            self.insert(resource);
        }
    }

    pub fn search_result(&self, resource_type: &str, matches: Vec<JsonValue>, included: Vec<JsonValue>) {
        self.searches
            .lock()
            .unwrap()
            .insert(
                resource_type.to_string(),
                SearchResults {
                    matches,
                    included,
                    truncated: false,
                },
            );
    }

    /// Mark the registered results for `resource_type` as cut off by the page cap
    pub fn truncate_search(&self, resource_type: &str) {
        self.searches
            .lock()
            .unwrap()
            .entry(resource_type.to_string())
            .or_default()
            .truncated = true;
    }

    pub fn summary(&self, patient_id: &str, bundle: JsonValue) {
        self.summaries
            .lock()
            .unwrap()
            .insert(patient_id.to_string(), bundle);
    }

    /// Searches for `resource_type` fail with a server error
    pub fn fail_search(&self, resource_type: &str) {
        self.failing.lock().unwrap().insert(resource_type.to_string());
    }

    /// Every `Type/id` read so far, in order
    pub fn reads(&self) -> Vec<String> {
        self.reads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResourceSource for InMemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self, resource_type: &str, id: &str) -> Result<Option<JsonValue>> {
        let key = format!("{resource_type}/{id}");
        self.reads.lock().unwrap().push(key.clone());
        Ok(self.resources.lock().unwrap().get(&key).cloned())
    }

    async fn search(
        &self,
        resource_type: &str,
        _patient_id: &str,
        _includes: &[&str],
    ) -> Result<Option<SearchResults>> {
        if self.failing.lock().unwrap().contains(resource_type) {
            return Err(Error::Upstream(format!(
                "{} answered 500 for {resource_type} search",
                self.name
            )));
        }
        if !self.serves_search {
            return Ok(None);
        }
        Ok(Some(
            self.searches
                .lock()
                .unwrap()
                .get(resource_type)
                .cloned()
                .unwrap_or_default(),
        ))
    }

    async fn summary(&self, patient_id: &str) -> Result<Option<JsonValue>> {
        Ok(self.summaries.lock().unwrap().get(patient_id).cloned())
    }
}

/// Legacy REST records exposed through the real record conversions
#[derive(Default)]
pub struct LegacyRecords {
    providers: Mutex<HashMap<String, JsonValue>>,
    drugs: Mutex<HashMap<String, JsonValue>>,
    orders: Mutex<HashMap<String, Vec<JsonValue>>>,
}

impl LegacyRecords {
    pub fn provider(&self, id: &str, record: JsonValue) {
        self.providers.lock().unwrap().insert(id.to_string(), record);
    }

    pub fn drug(&self, id: &str, record: JsonValue) {
        self.drugs.lock().unwrap().insert(id.to_string(), record);
    }

    pub fn order(&self, patient_id: &str, record: JsonValue) {
        self.orders
            .lock()
            .unwrap()
            .entry(patient_id.to_string())
            .or_default()
            .push(record);
    }
}

#[async_trait]
impl ResourceSource for LegacyRecords {
    fn name(&self) -> &str {
        "legacy"
    }

    async fn read(&self, resource_type: &str, id: &str) -> Result<Option<JsonValue>> {
        let converted = match resource_type {
            "Practitioner" => self
                .providers
                .lock()
                .unwrap()
                .get(id)
                .map(|record| practitioner_from_provider(id, record)),
            "Medication" => self
                .drugs
                .lock()
                .unwrap()
                .get(id)
                .map(|record| medication_from_drug(id, record)),
            _ => None,
        };
        Ok(converted)
    }

    async fn search(
        &self,
        resource_type: &str,
        patient_id: &str,
        _includes: &[&str],
    ) -> Result<Option<SearchResults>> {
        if resource_type != "MedicationRequest" {
            return Ok(None);
        }
        let orders = self.orders.lock().unwrap();
        let Some(orders) = orders.get(patient_id) else {
            return Ok(None);
        };
        let now = Utc::now();
        Ok(Some(SearchResults {
            matches: orders
                .iter()
                .filter_map(|order| medication_request_from_order(patient_id, order, now))
                .collect(),
            ..SearchResults::default()
        }))
    }
}

/// Destination recording every write
///
/// By default every PUT succeeds. Resources can be made to depend on
/// others (answering 412 with a HAPI-style diagnostic until the dependency
/// has been stored), or to be rejected outright.
#[derive(Default)]
pub struct RecordingDestination {
    puts: Mutex<Vec<JsonValue>>,
    stored: Mutex<HashSet<String>>,
    requires: Mutex<HashMap<String, String>>,
    rejections: Mutex<HashMap<String, (u16, String)>>,
    scripted: Mutex<HashMap<String, VecDeque<Result<WriteResponse>>>>,
    transactions: Mutex<Vec<JsonValue>>,
    transaction_status: Mutex<Option<u16>>,
    delay: Mutex<Option<Duration>>,
}

impl RecordingDestination {
    /// `resource` is refused until `dependency` has been stored
    pub fn require(&self, resource: &str, dependency: &str) {
        self.requires
            .lock()
            .unwrap()
            .insert(resource.to_string(), dependency.to_string());
    }

    /// Every PUT of `resource` is rejected with `status`
    pub fn reject(&self, resource: &str, status: u16, diagnostics: &str) {
        self.rejections
            .lock()
            .unwrap()
            .insert(resource.to_string(), (status, diagnostics.to_string()));
    }

    /// Answers for the next PUTs of `resource`, before any other rule
    pub fn script(&self, resource: &str, answers: Vec<Result<WriteResponse>>) {
        self.scripted
            .lock()
            .unwrap()
            .insert(resource.to_string(), answers.into());
    }

    pub fn transaction_status(&self, status: u16) {
        *self.transaction_status.lock().unwrap() = Some(status);
    }

    pub fn delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// `Type/id` of every PUT attempt, in order
    pub fn put_keys(&self) -> Vec<String> {
        self.puts
            .lock()
            .unwrap()
            .iter()
            .map(|r| format!("{}/{}", r["resourceType"].as_str().unwrap_or(""), r["id"].as_str().unwrap_or("")))
            .collect()
    }

    /// Last body PUT for `key`
    pub fn last_put(&self, key: &str) -> Option<JsonValue> {
        self.puts
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| format!("{}/{}", r["resourceType"].as_str().unwrap_or(""), r["id"].as_str().unwrap_or("")) == key)
            .cloned()
    }

    pub fn transactions(&self) -> Vec<JsonValue> {
        self.transactions.lock().unwrap().clone()
    }
}

pub fn response(status: u16, diagnostics: Option<&str>) -> WriteResponse {
    let body = diagnostics.map(|d| {
        json!({
            "resourceType": "OperationOutcome",
            "issue": [{"severity": "error", "code": "processing", "diagnostics": d}]
        })
    });
    WriteResponse {
        status,
        text: body.as_ref().map(|b| b.to_string()).unwrap_or_default(),
        body,
    }
}

#[async_trait]
impl Destination for RecordingDestination {
    async fn put(&self, resource: &FhirResource) -> Result<WriteResponse> {
        let key = resource.key().to_string();
        self.puts.lock().unwrap().push(resource.raw.clone());

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(VecDeque::pop_front);
        if let Some(answer) = scripted {
            if matches!(&answer, Ok(r) if r.is_success()) {
                self.stored.lock().unwrap().insert(key);
            }
            return answer;
        }

        if let Some((status, diagnostics)) = self.rejections.lock().unwrap().get(&key) {
            return Ok(response(*status, Some(diagnostics)));
        }

        let required = self.requires.lock().unwrap().get(&key).cloned();
        if let Some(dependency) = required {
            if !self.stored.lock().unwrap().contains(&dependency) {
                let element = resource.resource_type.as_str();
                return Ok(response(
                    412,
                    Some(&format!(
                        "HAPI-1094: Resource {dependency} not found, specified in path: {element}"
                    )),
                ));
            }
        }

        self.stored.lock().unwrap().insert(key);
        Ok(response(200, None))
    }

    async fn submit_transaction(&self, bundle: &JsonValue) -> Result<WriteResponse> {
        self.transactions.lock().unwrap().push(bundle.clone());
        let status = self.transaction_status.lock().unwrap().unwrap_or(200);
        Ok(response(status, (status >= 400).then_some("transaction refused")))
    }
}

/// Terminology validator recording what it was asked
#[derive(Default)]
pub struct TerminologyRecorder {
    seen: Mutex<Vec<CodingPayload>>,
}

impl TerminologyRecorder {
    pub fn codes(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|c| format!("{}|{}", c.system, c.code))
            .collect()
    }
}

#[async_trait]
impl TerminologyValidator for TerminologyRecorder {
    async fn validate(&self, coding: &CodingPayload) -> Result<u16> {
        self.seen.lock().unwrap().push(coding.clone());
        Ok(200)
    }
}
