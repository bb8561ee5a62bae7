// Per-file indexing pipeline and run orchestration

pub mod codec;
pub mod dispatcher;
pub mod extractor;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::ast::{AstProvider, ParseOptions};
use crate::compdb::CompileCommand;
use crate::config::Config;
use crate::error::{CodecError, IndexError};
use crate::index::cache::{Cache, CacheKey, KeyStrategy};
use crate::index::FileRecord;

use self::codec::TranslationUnitCodec;
use self::dispatcher::Dispatcher;
use self::extractor::{Diagnostics, Extractor, ExtractorConfig};

/// One unit of work: a source file and its compile flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub filename: String,
    pub flags: Vec<String>,
}

impl Job {
    pub fn new(filename: impl Into<String>, flags: Vec<String>) -> Self {
        Self {
            filename: filename.into(),
            flags,
        }
    }
}

impl From<CompileCommand> for Job {
    fn from(command: CompileCommand) -> Self {
        Self::new(command.file, command.arguments)
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.filename)
    }
}

/// Terminal outcome of a successful pipeline run for one file.
#[derive(Debug)]
pub enum FileOutcome {
    /// A stored record exists; its AST was restored and nothing was re-parsed.
    CacheHit,
    /// The file was parsed. `persisted` is false when the cache write failed.
    Indexed { record: FileRecord, persisted: bool },
}

#[derive(Debug, Clone)]
pub struct IndexerOptions {
    /// Worker count, 0 for the available parallelism
    pub jobs: usize,
    pub queue_capacity: usize,
    pub key_strategy: KeyStrategy,
    pub parse_options: ParseOptions,
    pub scratch_dir: Option<PathBuf>,
    /// Count node kinds the extractor leaves unclassified
    pub diagnostics: bool,
}

impl Default for IndexerOptions {
    fn default() -> Self {
        Self {
            jobs: 0,
            queue_capacity: 64,
            key_strategy: KeyStrategy::default(),
            parse_options: ParseOptions::default(),
            scratch_dir: None,
            diagnostics: false,
        }
    }
}

impl IndexerOptions {
    pub fn from_config(config: &Config, root: &Path) -> Self {
        Self {
            jobs: config.indexing.jobs,
            queue_capacity: config.indexing.queue_capacity,
            key_strategy: config.indexing.key_strategy,
            parse_options: config.parse_options(),
            scratch_dir: config.scratch_dir(root),
            diagnostics: false,
        }
    }
}

/// Counts of an indexing run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub submitted: usize,
    pub cache_hits: usize,
    pub indexed: usize,
    pub failed: usize,
    /// Indexed files whose record could not be written to the cache
    pub not_persisted: usize,
    pub elapsed: Duration,
    /// Unclassified node kinds, when diagnostics were requested
    pub unhandled_kinds: Vec<(String, usize)>,
}

#[derive(Debug, Default)]
struct RunCounters {
    cache_hits: AtomicUsize,
    indexed: AtomicUsize,
    failed: AtomicUsize,
    not_persisted: AtomicUsize,
}

impl RunCounters {
    fn reset(&self) {
        for counter in [&self.cache_hits, &self.indexed, &self.failed, &self.not_persisted] {
            counter.store(0, Ordering::SeqCst);
        }
    }
}

/// Drives files through cache lookup, parsing, extraction and persistence.
pub struct Indexer<P: AstProvider> {
    provider: Arc<P>,
    cache: Arc<dyn Cache>,
    codec: TranslationUnitCodec<P>,
    extractor: Extractor,
    options: IndexerOptions,
    diagnostics: Option<Arc<Diagnostics>>,
    counters: RunCounters,
    progress: Option<ProgressBar>,
}

impl<P: AstProvider> Indexer<P> {
    pub fn new(provider: Arc<P>, cache: Arc<dyn Cache>, options: IndexerOptions) -> Self {
        let diagnostics = options.diagnostics.then(|| Arc::new(Diagnostics::new()));
        let extractor = Extractor::new(ExtractorConfig {
            diagnostics: diagnostics.clone(),
        });
        let codec = TranslationUnitCodec::new(provider.clone(), options.scratch_dir.clone());

        Self {
            provider,
            cache,
            codec,
            extractor,
            options,
            diagnostics,
            counters: RunCounters::default(),
            progress: None,
        }
    }

    /// Advance `progress` on every terminal outcome.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn options(&self) -> &IndexerOptions {
        &self.options
    }

    /// Run one file through the pipeline.
    ///
    /// Cache read problems fall through to a re-parse and a failed cache write
    /// still returns the record. Provider and codec errors fail the file.
    pub fn index_file(&self, job: &Job) -> Result<FileOutcome, IndexError> {
        let key = self
            .options
            .key_strategy
            .derive(&job.filename, &job.flags)
            .map_err(|source| IndexError::Io {
                path: PathBuf::from(&job.filename),
                source,
            })?;

        if let Some(bytes) = self.lookup(&key, &job.filename) {
            match FileRecord::from_bytes(&bytes) {
                Ok(record) => {
                    let unit = self.codec.deserialize(record.translation_unit())?;
                    drop(unit);
                    debug!("Cache hit for {} ({})", job.filename, key);
                    return Ok(FileOutcome::CacheHit);
                }
                Err(e) => warn!("Cached record for {} is unreadable, re-indexing: {}", job.filename, e),
            }
        }

        debug!("Cache miss for {}, parsing", job.filename);
        let unit = self
            .provider
            .parse(Path::new(&job.filename), &job.flags, self.options.parse_options)?;

        // Both read the unit; it is released only after both are joined
        let (serialized, mut record) = std::thread::scope(|scope| {
            let serializer = scope.spawn(|| self.codec.serialize(&unit));
            let record = self.extractor.extract(&unit, &job.filename, &job.flags);
            (serializer.join(), record)
        });
        drop(unit);

        let ast_bytes = serialized.map_err(|_| CodecError::Panicked)??;
        record.set_translation_unit(ast_bytes);
        let encoded = record.to_bytes()?;
        trace!("Record for {}: {:?}", job.filename, record);

        let persisted = match self.cache.put(&key, &job.filename, &encoded) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to persist record for {}: {}", job.filename, e);
                false
            }
        };

        debug!(
            "Indexed {}: {} entries, {} bytes",
            job.filename,
            record.entry_count(),
            encoded.len()
        );
        Ok(FileOutcome::Indexed { record, persisted })
    }

    /// Stored bytes for `key`, or `None` on a miss or an unreadable store.
    fn lookup(&self, key: &CacheKey, filename: &str) -> Option<Vec<u8>> {
        match self.cache.has(key) {
            Ok(true) => match self.cache.get(key) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!("Cache read failed for {}, treating as miss: {}", filename, e);
                    None
                }
            },
            Ok(false) => None,
            Err(e) => {
                warn!("Cache lookup failed for {}, treating as miss: {}", filename, e);
                None
            }
        }
    }

    /// `index_file` plus run bookkeeping.
    pub fn process(&self, job: &Job) -> Result<FileOutcome, IndexError> {
        if let Some(progress) = &self.progress {
            progress.set_message(job.filename.clone());
        }

        let result = self.index_file(job);
        match &result {
            Ok(FileOutcome::CacheHit) => {
                self.counters.cache_hits.fetch_add(1, Ordering::SeqCst);
            }
            Ok(FileOutcome::Indexed { persisted, .. }) => {
                self.counters.indexed.fetch_add(1, Ordering::SeqCst);
                if !persisted {
                    self.counters.not_persisted.fetch_add(1, Ordering::SeqCst);
                }
            }
            Err(_) => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
            }
        }

        self.tick();
        result
    }

    fn tick(&self) {
        if let Some(progress) = &self.progress {
            progress.inc(1);
        }
    }

    /// Index every job on the worker pool and wait for all of them.
    ///
    /// An empty job list is a configuration error. Individual file failures
    /// are logged and counted, never returned.
    pub async fn run(self: Arc<Self>, jobs: Vec<Job>) -> Result<RunSummary, IndexError> {
        if jobs.is_empty() {
            return Err(IndexError::config("no files to index"));
        }

        let start = Instant::now();
        self.counters.reset();
        if let Some(progress) = &self.progress {
            progress.set_length(jobs.len() as u64);
        }

        let indexer = self.clone();
        let mut dispatcher = Dispatcher::new(self.options.jobs, self.options.queue_capacity, move |job: Job| {
            let indexer = indexer.clone();
            async move {
                let worker = indexer.clone();
                match tokio::task::spawn_blocking(move || worker.process(&job)).await {
                    Ok(result) => result.map(|_| ()).map_err(anyhow::Error::from),
                    Err(e) => {
                        indexer.counters.failed.fetch_add(1, Ordering::SeqCst);
                        indexer.tick();
                        Err(anyhow::anyhow!("indexing task aborted: {}", e))
                    }
                }
            }
        });

        info!(
            "Indexing {} files with {} workers",
            jobs.len(),
            dispatcher.workers()
        );
        dispatcher.start();
        for job in jobs {
            if let Err(e) = dispatcher.add(job).await {
                warn!("Stopped submitting jobs: {}", e);
                break;
            }
        }
        let report = dispatcher.wait().await;
        debug_assert!(report.is_complete(), "dispatcher lost jobs: {:?}", report);

        if let Some(progress) = &self.progress {
            progress.finish_and_clear();
        }

        let summary = RunSummary {
            submitted: report.submitted,
            cache_hits: self.counters.cache_hits.load(Ordering::SeqCst),
            indexed: self.counters.indexed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            not_persisted: self.counters.not_persisted.load(Ordering::SeqCst),
            elapsed: start.elapsed(),
            unhandled_kinds: self
                .diagnostics
                .as_ref()
                .map(|d| d.snapshot())
                .unwrap_or_default(),
        };

        info!(
            "Indexed {} files in {:.2?} ({} cached, {} parsed, {} failed)",
            summary.submitted, summary.elapsed, summary.cache_hits, summary.indexed, summary.failed
        );
        for (kind, count) in &summary.unhandled_kinds {
            debug!("Unhandled node kind {}: {}", kind, count);
        }

        Ok(summary)
    }
}
