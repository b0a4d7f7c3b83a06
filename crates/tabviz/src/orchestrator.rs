use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tabviz_cache::{CacheHit, CacheInfo, CacheStore, KvStore};
use tabviz_core::{
    normalize_records, Dataset, DatasetAnalyzer, DatasetMetadata, PipelineError, Result, Schema,
    SourceFile,
};
use tokio::sync::Mutex as FlightLock;

use crate::config::ExtractionMode;
use crate::oracle::ExtractionOracle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Idle,
    CacheChecking,
    CacheHitExact,
    DisplayingProvisional,
    CacheMiss,
    Extracting,
    Extracted,
    Reconciling,
    Done,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PipelineState::Idle => "idle",
            PipelineState::CacheChecking => "checking cache",
            PipelineState::CacheHitExact => "exact cache hit",
            PipelineState::DisplayingProvisional => "showing cached data from a similar file",
            PipelineState::CacheMiss => "cache miss",
            PipelineState::Extracting => "extracting",
            PipelineState::Extracted => "extracted",
            PipelineState::Reconciling => "reconciling with cache",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// What the presentation layer receives: rows plus freshly derived metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Delivery {
    pub dataset: Dataset,
    pub metadata: DatasetMetadata,
}

#[derive(Debug, Clone)]
pub enum Progress {
    State(PipelineState),
    /// A name-matched dataset shown while fresh extraction runs.
    Provisional(Delivery),
}

/// Sequences cache lookup, oracle calls, normalization and reconciliation for
/// each upload.
pub struct Orchestrator<O, S: KvStore> {
    oracle: O,
    cache: CacheStore<S>,
    analyzer: DatasetAnalyzer,
    schema: &'static Schema,
    mode: ExtractionMode,
    generation: AtomicU64,
    state: Mutex<PipelineState>,
    current: Mutex<Option<Delivery>>,
    in_flight: Mutex<HashMap<String, Arc<FlightLock<()>>>>,
}

impl<O: ExtractionOracle, S: KvStore> Orchestrator<O, S> {
    pub fn new(oracle: O, cache: CacheStore<S>) -> Self {
        Self {
            oracle,
            cache,
            analyzer: DatasetAnalyzer::default(),
            schema: Schema::household(),
            mode: ExtractionMode::default(),
            generation: AtomicU64::new(0),
            state: Mutex::new(PipelineState::Idle),
            current: Mutex::new(None),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_mode(mut self, mode: ExtractionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_analyzer(mut self, analyzer: DatasetAnalyzer) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn with_schema(mut self, schema: &'static Schema) -> Self {
        self.schema = schema;
        self
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    /// The dataset currently on display, if any.
    pub fn current(&self) -> Option<Delivery> {
        self.current.lock().clone()
    }

    pub fn cache(&self) -> &CacheStore<S> {
        &self.cache
    }

    pub async fn process_file(&self, file: &SourceFile) -> Result<Delivery> {
        self.process_file_with(file, |_| {}).await
    }

    /// Runs one upload, reporting each state change and any provisional
    /// dataset to `observe`.
    pub async fn process_file_with<F>(&self, file: &SourceFile, mut observe: F) -> Result<Delivery>
    where
        F: FnMut(Progress) + Send,
    {
        let generation = self.generation.load(Ordering::SeqCst);
        let result = self.run(file, generation, &mut observe).await;
        match &result {
            Ok(delivery) => {
                tracing::info!(
                    file = %file.name,
                    rows = delivery.dataset.len(),
                    kind = delivery.dataset.kind_label(),
                    "upload processed"
                );
                self.enter(PipelineState::Done, &mut observe);
            }
            Err(PipelineError::Superseded) => {
                tracing::info!(file = %file.name, "upload superseded; result discarded");
            }
            Err(err) => {
                tracing::warn!(file = %file.name, error = %err, "upload failed");
                if self.ensure_current(generation).is_ok() {
                    *self.current.lock() = None;
                }
                self.enter(PipelineState::Failed, &mut observe);
            }
        }
        result
    }

    async fn run<F>(&self, file: &SourceFile, generation: u64, observe: &mut F) -> Result<Delivery>
    where
        F: FnMut(Progress) + Send,
    {
        self.enter(PipelineState::CacheChecking, observe);
        let key = self.cache.exact_key(file);
        let flight = self.flight_lock(&key);
        let result = {
            let _guard = flight.lock().await;
            self.run_locked(file, generation, observe).await
        };
        self.release_flight(&key, &flight);
        result
    }

    async fn run_locked<F>(
        &self,
        file: &SourceFile,
        generation: u64,
        observe: &mut F,
    ) -> Result<Delivery>
    where
        F: FnMut(Progress) + Send,
    {
        let lookup = self.cache.lookup(file);
        let previous = match (lookup.hit, lookup.data) {
            (CacheHit::Exact, Some(dataset)) => {
                self.enter(PipelineState::CacheHitExact, observe);
                return self.commit(generation, dataset);
            }
            (CacheHit::Name, Some(dataset)) => {
                self.enter(PipelineState::DisplayingProvisional, observe);
                let delivery = self.delivery(dataset.clone());
                if self.ensure_current(generation).is_ok() {
                    *self.current.lock() = Some(delivery.clone());
                }
                observe(Progress::Provisional(delivery));
                Some(dataset)
            }
            _ => {
                if let Some(reason) = lookup.reason.as_deref() {
                    tracing::debug!(file = %file.name, reason, "cache miss");
                }
                self.enter(PipelineState::CacheMiss, observe);
                None
            }
        };

        self.enter(PipelineState::Extracting, observe);
        let extracted = self.extract(file, previous.as_ref()).await;
        self.ensure_current(generation)?;
        let dataset = extracted?;
        self.enter(PipelineState::Extracted, observe);

        self.enter(PipelineState::Reconciling, observe);
        let updated = self.cache.reconcile(file, &dataset, previous.as_ref());
        let chosen = match previous {
            Some(prev) if !updated && prev.len() > dataset.len() => prev,
            _ => dataset,
        };
        self.commit(generation, chosen)
    }

    async fn extract(&self, file: &SourceFile, provisional: Option<&Dataset>) -> Result<Dataset> {
        let believed_canonical = match self.mode {
            ExtractionMode::Canonical => true,
            ExtractionMode::Generic => false,
            ExtractionMode::Auto => provisional.map_or(false, Dataset::is_canonical),
        };

        if believed_canonical {
            match self.extract_canonical(file).await {
                Ok(dataset) => return Ok(dataset),
                Err(err) if err.is_format_error() => {
                    tracing::warn!(file = %file.name, error = %err, "canonical extraction unreadable; trying free-form");
                }
                Err(err) => return Err(err),
            }
        }

        let rows = self.oracle.extract_generic(file).await?;
        if rows.is_empty() {
            return Err(PipelineError::NoDataExtracted(file.name.clone()));
        }
        let metadata = self.analyzer.analyze(&rows);
        if metadata.is_canonical() && !believed_canonical && self.mode != ExtractionMode::Generic {
            tracing::debug!(file = %file.name, "free-form rows look canonical; refining once");
            match self.extract_canonical(file).await {
                Ok(dataset) => return Ok(dataset),
                Err(err) => {
                    tracing::debug!(file = %file.name, error = %err, "canonical refinement failed; keeping free-form rows");
                }
            }
        }
        Ok(Dataset::Generic(rows))
    }

    async fn extract_canonical(&self, file: &SourceFile) -> Result<Dataset> {
        let rows = self.oracle.extract_canonical(file, self.schema).await?;
        if rows.is_empty() {
            return Err(PipelineError::NoDataExtracted(file.name.clone()));
        }
        Ok(Dataset::Canonical(normalize_records(&rows, self.schema)))
    }

    /// Forgets the current dataset; flows already in flight are discarded
    /// when they resume.
    pub fn reset(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.current.lock() = None;
        *self.state.lock() = PipelineState::Idle;
    }

    pub fn clear_cache(&self) -> usize {
        self.cache.clear_all()
    }

    pub fn cleanup_cache(&self) -> usize {
        self.cache.expire_and_cleanup()
    }

    pub fn cache_info(&self) -> CacheInfo {
        self.cache.info()
    }

    pub fn close(self) {
        self.cache.close();
    }

    fn delivery(&self, dataset: Dataset) -> Delivery {
        let metadata = dataset.analyze(&self.analyzer);
        Delivery { dataset, metadata }
    }

    fn enter<F: FnMut(Progress)>(&self, state: PipelineState, observe: &mut F) {
        *self.state.lock() = state;
        observe(Progress::State(state));
    }

    fn commit(&self, generation: u64, dataset: Dataset) -> Result<Delivery> {
        self.ensure_current(generation)?;
        let delivery = self.delivery(dataset);
        *self.current.lock() = Some(delivery.clone());
        Ok(delivery)
    }

    fn ensure_current(&self, generation: u64) -> Result<()> {
        if self.generation.load(Ordering::SeqCst) == generation {
            Ok(())
        } else {
            Err(PipelineError::Superseded)
        }
    }

    fn flight_lock(&self, key: &str) -> Arc<FlightLock<()>> {
        self.in_flight
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(FlightLock::new(())))
            .clone()
    }

    fn release_flight(&self, key: &str, flight: &Arc<FlightLock<()>>) {
        let mut map = self.in_flight.lock();
        // one reference in the map, one held by this flow
        if Arc::strong_count(flight) <= 2 {
            map.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tabviz_cache::MemoryKv;
    use tabviz_core::{parse_oracle_payload, GenericRecord, Value};
    use tokio::sync::Notify;

    #[derive(Clone)]
    enum Reply {
        Rows(Vec<GenericRecord>),
        Text(&'static str),
    }

    #[derive(Default)]
    struct StubOracle {
        generic: Mutex<VecDeque<Reply>>,
        canonical: Mutex<VecDeque<Reply>>,
        generic_calls: AtomicUsize,
        canonical_calls: AtomicUsize,
        entered: Option<Arc<Notify>>,
        gate: Option<Arc<Notify>>,
    }

    impl StubOracle {
        fn generic(replies: impl IntoIterator<Item = Reply>) -> Self {
            Self {
                generic: Mutex::new(replies.into_iter().collect()),
                ..Self::default()
            }
        }

        fn with_canonical(self, replies: impl IntoIterator<Item = Reply>) -> Self {
            *self.canonical.lock() = replies.into_iter().collect();
            self
        }

        fn gated(mut self, entered: Arc<Notify>, gate: Arc<Notify>) -> Self {
            self.entered = Some(entered);
            self.gate = Some(gate);
            self
        }

        async fn answer(&self, queue: &Mutex<VecDeque<Reply>>) -> Result<Vec<GenericRecord>> {
            if let Some(entered) = &self.entered {
                entered.notify_one();
            }
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let reply = queue.lock().pop_front();
            match reply {
                Some(Reply::Rows(rows)) => Ok(rows),
                Some(Reply::Text(text)) => parse_oracle_payload(text),
                None => Err(PipelineError::Oracle("no scripted reply".into())),
            }
        }
    }

    #[async_trait]
    impl ExtractionOracle for StubOracle {
        fn name(&self) -> &str {
            "stub"
        }

        async fn extract_canonical(
            &self,
            _file: &SourceFile,
            _schema: &Schema,
        ) -> Result<Vec<GenericRecord>> {
            self.canonical_calls.fetch_add(1, Ordering::SeqCst);
            self.answer(&self.canonical).await
        }

        async fn extract_generic(&self, _file: &SourceFile) -> Result<Vec<GenericRecord>> {
            self.generic_calls.fetch_add(1, Ordering::SeqCst);
            self.answer(&self.generic).await
        }
    }

    fn record(pairs: &[(&str, Value)]) -> GenericRecord {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn city_rows(n: usize) -> Vec<GenericRecord> {
        (0..n)
            .map(|i| {
                record(&[
                    ("city", Value::text(format!("city-{}", i % 5))),
                    ("revenue", Value::Number(i as f64 * 10.0)),
                ])
            })
            .collect()
    }

    fn household_rows(n: usize) -> Vec<GenericRecord> {
        (0..n)
            .map(|i| {
                record(&[
                    ("Unit_Name", Value::text(format!("Unit {i}"))),
                    ("Family_Size", Value::text("3")),
                    ("Do_you_have_solar_panels_installed", Value::text("No")),
                ])
            })
            .collect()
    }

    fn orchestrator(oracle: StubOracle) -> Orchestrator<StubOracle, MemoryKv> {
        Orchestrator::new(oracle, CacheStore::open(MemoryKv::new()))
    }

    fn survey(bytes: &[u8], modified: i64) -> SourceFile {
        SourceFile::new("survey.xlsx", bytes.to_vec(), modified)
    }

    #[tokio::test]
    async fn malformed_reply_fails_with_user_message() {
        let orch = orchestrator(StubOracle::generic([Reply::Text("not json")]));
        let err = orch.process_file(&survey(b"x", 1)).await.unwrap_err();
        assert!(err.is_format_error());
        assert!(err
            .user_message()
            .starts_with("Failed to parse the model's response"));
        assert_eq!(orch.state(), PipelineState::Failed);
        assert!(orch.current().is_none());
    }

    #[tokio::test]
    async fn failed_upload_drops_provisional_rows() {
        let orch = orchestrator(StubOracle::generic([Reply::Text("not json")]));
        orch.cache()
            .store(&survey(b"older survey", 1), &Dataset::Generic(city_rows(8)));

        let mut provisional = None;
        let err = orch
            .process_file_with(&survey(b"another survey", 2), |event| {
                if let Progress::Provisional(d) = event {
                    provisional = Some(d.dataset.len());
                }
            })
            .await
            .unwrap_err();
        assert!(err.is_format_error());
        assert_eq!(provisional, Some(8));
        assert_eq!(orch.state(), PipelineState::Failed);
        assert!(orch.current().is_none());
    }

    #[tokio::test]
    async fn larger_extraction_replaces_name_matched_cache() {
        let orch = orchestrator(StubOracle::generic([Reply::Rows(city_rows(11))]));
        let old = survey(b"first upload", 1_000);
        orch.cache().store(&old, &Dataset::Generic(city_rows(8)));

        let updated = survey(b"second upload with more rows", 2_000);
        let mut provisional = None;
        let mut states = Vec::new();
        let delivery = orch
            .process_file_with(&updated, |event| match event {
                Progress::State(state) => states.push(state),
                Progress::Provisional(d) => provisional = Some(d.dataset.len()),
            })
            .await
            .unwrap();

        assert_eq!(provisional, Some(8));
        assert_eq!(delivery.dataset.len(), 11);
        assert_eq!(delivery.metadata.row_count, 11);
        assert_eq!(
            states,
            vec![
                PipelineState::CacheChecking,
                PipelineState::DisplayingProvisional,
                PipelineState::Extracting,
                PipelineState::Extracted,
                PipelineState::Reconciling,
                PipelineState::Done,
            ]
        );
        let cached = orch.cache().lookup(&updated);
        assert_eq!(cached.hit, CacheHit::Exact);
        assert_eq!(cached.data.map(|d| d.len()), Some(11));
    }

    #[tokio::test]
    async fn smaller_extraction_keeps_cached_rows() {
        let orch = orchestrator(StubOracle::generic([Reply::Rows(city_rows(5))]));
        orch.cache()
            .store(&survey(b"complete", 1), &Dataset::Generic(city_rows(8)));

        let partial = survey(b"partial", 2);
        let delivery = orch.process_file(&partial).await.unwrap();
        assert_eq!(delivery.dataset.len(), 8);
        assert_eq!(orch.cache().lookup(&partial).hit, CacheHit::Name);
    }

    #[tokio::test]
    async fn exact_hit_skips_the_oracle() {
        let orch = orchestrator(StubOracle::generic([Reply::Rows(city_rows(3))]));
        let file = survey(b"same bytes", 5);
        orch.process_file(&file).await.unwrap();

        let mut states = Vec::new();
        let again = orch
            .process_file_with(&file, |event| {
                if let Progress::State(state) = event {
                    states.push(state);
                }
            })
            .await
            .unwrap();
        assert_eq!(again.dataset.len(), 3);
        assert_eq!(orch.oracle.generic_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            states,
            vec![
                PipelineState::CacheChecking,
                PipelineState::CacheHitExact,
                PipelineState::Done
            ]
        );
    }

    #[tokio::test]
    async fn household_rows_get_one_canonical_pass() {
        let oracle = StubOracle::generic([Reply::Rows(household_rows(2))])
            .with_canonical([Reply::Rows(household_rows(2))]);
        let orch = orchestrator(oracle);
        let delivery = orch.process_file(&survey(b"h", 1)).await.unwrap();
        match &delivery.dataset {
            Dataset::Canonical(rows) => {
                assert_eq!(rows.len(), 2);
                assert_eq!(rows[0].text("unitName"), "Unit 0");
                assert_eq!(rows[0].number("familyMembers"), 3.0);
                assert!(!rows[0].flag("hasSolarPanels"));
            }
            other => panic!("expected canonical rows, got {}", other.kind_label()),
        }
        assert!(delivery.metadata.is_canonical());
        assert_eq!(orch.oracle.canonical_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_refinement_keeps_free_form_rows() {
        let oracle = StubOracle::generic([Reply::Rows(household_rows(3))])
            .with_canonical([Reply::Text("{\"broken\": true}")]);
        let orch = orchestrator(oracle);
        let delivery = orch.process_file(&survey(b"h", 1)).await.unwrap();
        assert!(!delivery.dataset.is_canonical());
        assert_eq!(delivery.dataset.len(), 3);
        assert_eq!(orch.oracle.canonical_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn canonical_mode_falls_back_on_format_error() {
        let oracle = StubOracle::generic([Reply::Rows(city_rows(4))])
            .with_canonical([Reply::Text("I could not read that file")]);
        let orch = orchestrator(oracle).with_mode(ExtractionMode::Canonical);
        let delivery = orch.process_file(&survey(b"c", 1)).await.unwrap();
        assert!(!delivery.dataset.is_canonical());
        assert_eq!(delivery.dataset.len(), 4);
        assert_eq!(orch.oracle.generic_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn generic_mode_never_asks_for_canonical_rows() {
        let oracle = StubOracle::generic([Reply::Rows(household_rows(2))]);
        let orch = orchestrator(oracle).with_mode(ExtractionMode::Generic);
        let delivery = orch.process_file(&survey(b"g", 1)).await.unwrap();
        assert!(!delivery.dataset.is_canonical());
        assert_eq!(orch.oracle.canonical_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_extraction_is_reported() {
        let orch = orchestrator(StubOracle::generic([Reply::Text("[{\"a\": \"\"}]")]));
        let err = orch.process_file(&survey(b"e", 1)).await.unwrap_err();
        assert!(matches!(err, PipelineError::NoDataExtracted(ref name) if name == "survey.xlsx"));
    }

    #[tokio::test]
    async fn reset_discards_in_flight_results() {
        let entered = Arc::new(Notify::new());
        let gate = Arc::new(Notify::new());
        let oracle = StubOracle::generic([Reply::Rows(city_rows(2))])
            .gated(entered.clone(), gate.clone());
        let orch = Arc::new(orchestrator(oracle));
        let file = survey(b"slow", 1);

        let task = {
            let orch = orch.clone();
            let file = file.clone();
            tokio::spawn(async move { orch.process_file(&file).await })
        };
        entered.notified().await;
        orch.reset();
        gate.notify_one();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(PipelineError::Superseded)));
        assert!(orch.current().is_none());
        assert_eq!(orch.cache().lookup(&file).hit, CacheHit::Miss);
    }

    #[tokio::test]
    async fn concurrent_uploads_share_one_extraction() {
        let entered = Arc::new(Notify::new());
        let gate = Arc::new(Notify::new());
        let oracle = StubOracle::generic([Reply::Rows(city_rows(6))])
            .gated(entered.clone(), gate.clone());
        let orch = Arc::new(orchestrator(oracle));
        let file = survey(b"shared", 1);

        let spawn = |orch: Arc<Orchestrator<StubOracle, MemoryKv>>, file: SourceFile| {
            tokio::spawn(async move { orch.process_file(&file).await })
        };
        let first = spawn(orch.clone(), file.clone());
        entered.notified().await;
        let mut second = spawn(orch.clone(), file.clone());
        let waiting = tokio::time::timeout(Duration::from_millis(50), &mut second).await;
        assert!(waiting.is_err(), "second upload finished while the first held the lock");
        assert_eq!(orch.oracle.generic_calls.load(Ordering::SeqCst), 1);
        gate.notify_one();

        let a = first.await.unwrap().unwrap();
        let b = second.await.unwrap().unwrap();
        assert_eq!(a.dataset.len(), 6);
        assert_eq!(b.dataset, a.dataset);
        assert_eq!(orch.oracle.generic_calls.load(Ordering::SeqCst), 1);
        assert!(orch.in_flight.lock().is_empty());
    }

    #[tokio::test]
    async fn clear_cache_forces_fresh_extraction() {
        let orch = orchestrator(StubOracle::generic([
            Reply::Rows(city_rows(2)),
            Reply::Rows(city_rows(2)),
        ]));
        let file = survey(b"again", 1);
        orch.process_file(&file).await.unwrap();
        assert_eq!(orch.clear_cache(), 2);
        orch.process_file(&file).await.unwrap();
        assert_eq!(orch.oracle.generic_calls.load(Ordering::SeqCst), 2);
    }
}
