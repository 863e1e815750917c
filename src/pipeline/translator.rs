use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{anyhow, Context};

use crate::catalog::Catalog;
use crate::models::chat::BatchTranslator;
use crate::models::mt::{translate_one, Fallback, MachineTranslator};
use crate::progress::ConsoleProgress;
use crate::quality::{similarity, SimilarityJudge};

use super::config::BatchSettings;

/// Where an entry's final text came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tier {
    /// Accepted from the chat model in this round (1-based).
    Primary { round: u32 },
    Fallback,
    /// Left as the source text: the fallback skipped it or failed.
    Unchanged,
}

impl Tier {
    pub fn label(&self) -> String {
        match self {
            Tier::Primary { round: 1 } => "llm".to_string(),
            Tier::Primary { round } => format!("llm, round {round}"),
            Tier::Fallback => "mt".to_string(),
            Tier::Unchanged => "unchanged".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Resolution {
    pub text: String,
    pub tier: Tier,
    /// Similarity to the source when it was scored.
    pub ratio: Option<f32>,
}

/// Per-entry retry state, alive only while its batch is being resolved.
struct Attempt {
    source: String,
    rounds: u32,
    resolved: Option<Resolution>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TranslationStats {
    pub pending: usize,
    pub batches: usize,
    pub primary: usize,
    pub fallback: usize,
    pub unchanged: usize,
    /// Primary calls that failed outright and were treated as echoes.
    pub failed_calls: usize,
}

impl TranslationStats {
    fn record(&mut self, tier: Tier) {
        match tier {
            Tier::Primary { .. } => self.primary += 1,
            Tier::Fallback => self.fallback += 1,
            Tier::Unchanged => self.unchanged += 1,
        }
    }
}

impl AddAssign for TranslationStats {
    fn add_assign(&mut self, rhs: Self) {
        self.pending += rhs.pending;
        self.batches += rhs.batches;
        self.primary += rhs.primary;
        self.fallback += rhs.fallback;
        self.unchanged += rhs.unchanged;
        self.failed_calls += rhs.failed_calls;
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub files: usize,
    pub saved: usize,
    pub stats: TranslationStats,
}

pub struct TranslatorPipeline<'a> {
    batch: BatchSettings,
    judge: SimilarityJudge,
    primary: &'a dyn BatchTranslator,
    fallback: &'a dyn MachineTranslator,
    progress: ConsoleProgress,
    dry_run: bool,
}

impl<'a> TranslatorPipeline<'a> {
    pub fn new(
        batch: BatchSettings,
        primary: &'a dyn BatchTranslator,
        fallback: &'a dyn MachineTranslator,
        progress: ConsoleProgress,
    ) -> Self {
        let judge = SimilarityJudge::new(batch.similarity_threshold);
        Self {
            batch,
            judge,
            primary,
            fallback,
            progress,
            dry_run: false,
        }
    }

    /// Run everything but leave the catalogs on disk untouched.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Resolves one batch of source strings, returning one result per input in order.
    ///
    /// Every still-unresolved entry goes to the chat model together; candidates that
    /// echo their source are retried up to `max_retries` more times, then sent one by
    /// one to the fallback tier, whose answer is final.
    pub fn resolve_batch(&self, sources: &[String]) -> (Vec<Resolution>, usize) {
        let mut attempts: Vec<Attempt> = sources
            .iter()
            .map(|s| Attempt {
                source: s.clone(),
                rounds: 0,
                resolved: None,
            })
            .collect();
        let mut unresolved: Vec<usize> = (0..attempts.len()).collect();
        let mut failed_calls = 0usize;
        let rounds = self.batch.max_retries.saturating_add(1);

        for round in 1..=rounds {
            if unresolved.is_empty() {
                break;
            }
            if round > 1 {
                tracing::debug!(round, remaining = unresolved.len(), "retrying echoed entries");
                if !self.batch.retry_delay.is_zero() {
                    thread::sleep(self.batch.retry_delay);
                }
            }

            let texts: Vec<String> = unresolved
                .iter()
                .map(|&i| attempts[i].source.clone())
                .collect();
            let candidates = match self.primary.translate_batch(&texts) {
                Ok(out) if out.len() == texts.len() => out,
                Ok(out) => {
                    tracing::warn!(
                        round,
                        expected = texts.len(),
                        got = out.len(),
                        "primary translator returned a misaligned batch; keeping source text"
                    );
                    failed_calls += 1;
                    texts.clone()
                }
                Err(err) => {
                    tracing::warn!(round, size = texts.len(), error = %err, "primary batch failed; keeping source text");
                    failed_calls += 1;
                    texts.clone()
                }
            };

            let mut still_open = Vec::new();
            for (&idx, candidate) in unresolved.iter().zip(candidates) {
                let attempt = &mut attempts[idx];
                attempt.rounds = round;
                let verdict = self.judge.judge(&attempt.source, &candidate);
                if verdict.is_accepted() {
                    attempt.resolved = Some(Resolution {
                        text: candidate,
                        tier: Tier::Primary { round },
                        ratio: verdict.ratio(),
                    });
                } else {
                    tracing::debug!(round, ratio = ?verdict.ratio(), source = %attempt.source, "candidate too close to source");
                    still_open.push(idx);
                }
            }
            unresolved = still_open;
        }

        for idx in unresolved {
            let attempt = &mut attempts[idx];
            let resolution = match translate_one(self.fallback, &attempt.source) {
                Fallback::Translated(text) => Resolution {
                    ratio: Some(similarity(&attempt.source, &text)),
                    text,
                    tier: Tier::Fallback,
                },
                Fallback::Skipped => Resolution {
                    text: attempt.source.clone(),
                    tier: Tier::Unchanged,
                    ratio: None,
                },
                Fallback::Failed(err) => {
                    tracing::warn!(rounds = attempt.rounds, source = %attempt.source, error = %err, "fallback failed; keeping source text");
                    Resolution {
                        text: attempt.source.clone(),
                        tier: Tier::Unchanged,
                        ratio: None,
                    }
                }
            };
            attempt.resolved = Some(resolution);
        }

        let resolutions = attempts
            .into_iter()
            .map(|a| {
                a.resolved.unwrap_or(Resolution {
                    text: a.source,
                    tier: Tier::Unchanged,
                    ratio: None,
                })
            })
            .collect();
        (resolutions, failed_calls)
    }

    /// Fills `msgstr` of every pending entry, batch by batch, in catalog order.
    pub fn translate_catalog(&self, catalog: &mut Catalog) -> anyhow::Result<TranslationStats> {
        let mut pending = catalog.pending_indices();
        if let Some(max) = self.batch.max_entries {
            if pending.len() > max {
                self.progress.info(format!("Max entries: {max} of {}", pending.len()));
                pending.truncate(max);
            }
        }

        let mut stats = TranslationStats {
            pending: pending.len(),
            ..TranslationStats::default()
        };
        let mut done = 0usize;
        for chunk in pending.chunks(self.batch.size.max(1)) {
            let sources: Vec<String> = chunk
                .iter()
                .map(|&i| {
                    catalog
                        .entry(i)
                        .map(|e| e.msgid.clone())
                        .ok_or_else(|| anyhow!("catalog entry out of range: {i}"))
                })
                .collect::<anyhow::Result<_>>()?;

            let (resolutions, failed) = self.resolve_batch(&sources);
            stats.batches += 1;
            stats.failed_calls += failed;

            for ((&idx, source), res) in chunk.iter().zip(&sources).zip(resolutions) {
                catalog.set_msgstr(idx, &res.text)?;
                self.progress
                    .resolved(source, &res.text, res.ratio, &res.tier.label());
                stats.record(res.tier);
            }
            done += chunk.len();
            self.progress.progress("Entries", done, stats.pending);
        }
        Ok(stats)
    }

    pub fn translate_file(&self, path: &Path) -> anyhow::Result<TranslationStats> {
        self.progress.info(format!("Read catalog: {}", path.display()));
        let mut catalog = Catalog::load(path)?;
        let stats = self
            .translate_catalog(&mut catalog)
            .with_context(|| format!("translate catalog: {}", path.display()))?;

        if stats.pending == 0 {
            self.progress.info("Nothing to translate");
        } else if self.dry_run {
            self.progress.info(format!("Dry run, not saving: {}", path.display()));
        } else if catalog.is_modified() {
            catalog.save(path)?;
            self.progress.info(format!("Saved translated file: {}", path.display()));
        }
        tracing::info!(
            path = %path.display(),
            pending = stats.pending,
            primary = stats.primary,
            fallback = stats.fallback,
            unchanged = stats.unchanged,
            failed_calls = stats.failed_calls,
            "catalog done"
        );
        Ok(stats)
    }

    /// Translates each file in order; the first unreadable or unwritable file aborts the run.
    pub fn run(&self, files: &[PathBuf]) -> anyhow::Result<RunSummary> {
        let mut summary = RunSummary::default();
        for path in files {
            let stats = self.translate_file(path)?;
            summary.files += 1;
            if stats.pending > 0 && !self.dry_run {
                summary.saved += 1;
            }
            summary.stats += stats;
        }
        Ok(summary)
    }
}

/// Files directly under `dir` whose name ends with `suffix`, sorted by path.
pub fn collect_inputs(dir: &Path, suffix: &str) -> anyhow::Result<Vec<PathBuf>> {
    let rd = std::fs::read_dir(dir)
        .with_context(|| format!("read input dir: {}", dir.display()))?;
    let mut files = Vec::new();
    for ent in rd {
        let ent = ent.with_context(|| format!("read input dir: {}", dir.display()))?;
        let path = ent.path();
        let matches = path
            .file_name()
            .and_then(|s| s.to_str())
            .map(|name| name.ends_with(suffix) && !name.starts_with('.'))
            .unwrap_or(false);
        if matches && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::models::TranslateError;

    /// Chat fake: answers from a lookup table and echoes anything unknown.
    struct TableTranslator {
        table: HashMap<String, String>,
        calls: RefCell<Vec<Vec<String>>>,
        fail_rounds: Cell<usize>,
    }

    impl TableTranslator {
        fn new(pairs: &[(&str, &str)]) -> Self {
            Self {
                table: pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                calls: RefCell::new(Vec::new()),
                fail_rounds: Cell::new(0),
            }
        }

        fn failing_first(self, n: usize) -> Self {
            self.fail_rounds.set(n);
            self
        }

        fn call_count(&self) -> usize {
            self.calls.borrow().len()
        }
    }

    impl BatchTranslator for TableTranslator {
        fn translate_batch(&self, texts: &[String]) -> Result<Vec<String>, TranslateError> {
            self.calls.borrow_mut().push(texts.to_vec());
            if self.fail_rounds.get() > 0 {
                self.fail_rounds.set(self.fail_rounds.get() - 1);
                return Err(TranslateError::EmptyContent);
            }
            Ok(texts
                .iter()
                .map(|t| self.table.get(t).cloned().unwrap_or_else(|| t.clone()))
                .collect())
        }
    }

    /// Chat fake that drops the last item of every answer.
    struct ShortTranslator;

    impl BatchTranslator for ShortTranslator {
        fn translate_batch(&self, texts: &[String]) -> Result<Vec<String>, TranslateError> {
            Ok(texts.iter().skip(1).map(|t| format!("译:{t}")).collect())
        }
    }

    struct RecordingMt {
        reply: Option<String>,
        seen: RefCell<Vec<String>>,
    }

    impl RecordingMt {
        fn new(reply: Option<&str>) -> Self {
            Self {
                reply: reply.map(str::to_string),
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl MachineTranslator for RecordingMt {
        fn translate_text(&self, text: &str) -> Result<String, TranslateError> {
            self.seen.borrow_mut().push(text.to_string());
            self.reply
                .as_ref()
                .map(|r| format!("{r}:{text}"))
                .ok_or(TranslateError::Disabled)
        }
    }

    fn settings() -> BatchSettings {
        BatchSettings {
            retry_delay: Duration::ZERO,
            ..BatchSettings::default()
        }
    }

    fn strings(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn accepted_on_first_round() {
        let chat = TableTranslator::new(&[("Hello, Captain.", "你好，舰长。")]);
        let mt = RecordingMt::new(Some("mt"));
        let pipeline = TranslatorPipeline::new(settings(), &chat, &mt, ConsoleProgress::silent());

        let (out, failed) = pipeline.resolve_batch(&strings(&["Hello, Captain."]));
        assert_eq!(failed, 0);
        assert_eq!(out[0].text, "你好，舰长。");
        assert_eq!(out[0].tier, Tier::Primary { round: 1 });
        assert_eq!(chat.call_count(), 1);
        assert!(mt.seen.borrow().is_empty());
    }

    #[test]
    fn non_latin_entries_bypass_retry_and_fallback() {
        let chat = TableTranslator::new(&[]);
        let mt = RecordingMt::new(Some("mt"));
        let pipeline = TranslatorPipeline::new(settings(), &chat, &mt, ConsoleProgress::silent());

        let (out, _) = pipeline.resolve_batch(&strings(&["123", "→"]));
        assert_eq!(out[0].text, "123");
        assert_eq!(out[1].text, "→");
        assert!(out.iter().all(|r| r.tier == Tier::Primary { round: 1 }));
        assert_eq!(chat.call_count(), 1);
        assert!(mt.seen.borrow().is_empty());
    }

    #[test]
    fn retries_only_the_unresolved_subset() {
        let chat = TableTranslator::new(&[("Shields up", "护盾升起")]);
        let mt = RecordingMt::new(Some("mt"));
        let pipeline = TranslatorPipeline::new(settings(), &chat, &mt, ConsoleProgress::silent());

        let (out, _) = pipeline.resolve_batch(&strings(&["Shields up", "Warp", "7"]));
        let calls = chat.calls.borrow();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], strings(&["Shields up", "Warp", "7"]));
        assert_eq!(calls[1], strings(&["Warp"]));
        assert_eq!(calls[2], strings(&["Warp"]));
        assert_eq!(out[0].text, "护盾升起");
        assert_eq!(out[1].text, "mt:Warp");
        assert_eq!(out[1].tier, Tier::Fallback);
        assert_eq!(out[2].text, "7");
        assert_eq!(mt.seen.borrow().as_slice(), ["Warp".to_string()]);
    }

    #[test]
    fn exhaustion_routes_everything_to_fallback() {
        let chat = TableTranslator::new(&[]);
        let mt = RecordingMt::new(Some("mt"));
        let batch = BatchSettings {
            max_retries: 3,
            ..settings()
        };
        let pipeline = TranslatorPipeline::new(batch, &chat, &mt, ConsoleProgress::silent());

        let sources = strings(&["Engage", "Red alert", "Hail them"]);
        let (out, _) = pipeline.resolve_batch(&sources);
        assert_eq!(chat.call_count(), 4);
        for (res, src) in out.iter().zip(&sources) {
            assert_eq!(res.tier, Tier::Fallback);
            assert_eq!(res.text, format!("mt:{src}"));
        }
        assert_eq!(*mt.seen.borrow(), sources);
    }

    #[test]
    fn exhaustion_with_failing_fallback_keeps_source() {
        let chat = TableTranslator::new(&[]);
        let mt = RecordingMt::new(None);
        let pipeline = TranslatorPipeline::new(settings(), &chat, &mt, ConsoleProgress::silent());

        let (out, _) = pipeline.resolve_batch(&strings(&["Engage", "X"]));
        assert_eq!(out[0].text, "Engage");
        assert_eq!(out[0].tier, Tier::Unchanged);
        assert_eq!(out[1].text, "X");
        assert_eq!(out[1].tier, Tier::Unchanged);
        // "X" is a single character and never reaches the fallback.
        assert_eq!(mt.seen.borrow().as_slice(), ["Engage".to_string()]);
    }

    #[test]
    fn failed_call_degrades_then_recovers() {
        let chat = TableTranslator::new(&[("Engage", "启动")]).failing_first(1);
        let mt = RecordingMt::new(Some("mt"));
        let pipeline = TranslatorPipeline::new(settings(), &chat, &mt, ConsoleProgress::silent());

        let (out, failed) = pipeline.resolve_batch(&strings(&["Engage", "99"]));
        assert_eq!(failed, 1);
        assert_eq!(out[0].text, "启动");
        assert_eq!(out[0].tier, Tier::Primary { round: 2 });
        assert_eq!(out[1].text, "99");
        assert_eq!(chat.call_count(), 2);
    }

    #[test]
    fn misaligned_answer_is_treated_as_failure() {
        let mt = RecordingMt::new(Some("mt"));
        let batch = BatchSettings {
            max_retries: 0,
            ..settings()
        };
        let pipeline = TranslatorPipeline::new(batch, &ShortTranslator, &mt, ConsoleProgress::silent());

        let (out, failed) = pipeline.resolve_batch(&strings(&["Engage", "Warp"]));
        assert_eq!(failed, 1);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].text, "mt:Engage");
        assert_eq!(out[1].text, "mt:Warp");
    }

    #[test]
    fn zero_retries_goes_straight_to_fallback() {
        let chat = TableTranslator::new(&[]);
        let mt = RecordingMt::new(Some("mt"));
        let batch = BatchSettings {
            max_retries: 0,
            ..settings()
        };
        let pipeline = TranslatorPipeline::new(batch, &chat, &mt, ConsoleProgress::silent());
        pipeline.resolve_batch(&strings(&["Engage"]));
        assert_eq!(chat.call_count(), 1);
        assert_eq!(mt.seen.borrow().len(), 1);
    }

    #[test]
    fn catalog_is_filled_in_batches_and_order() {
        let mut po = String::new();
        for i in 0..5 {
            po.push_str(&format!("msgid \"Item {i}\"\nmsgstr \"\"\n\n"));
        }
        po.push_str("msgid \"Kept\"\nmsgstr \"保留\"\n");
        let mut catalog = Catalog::parse(&po);

        let pairs: Vec<(String, String)> = (0..5)
            .map(|i| (format!("Item {i}"), format!("物品 {i}")))
            .collect();
        let pair_refs: Vec<(&str, &str)> =
            pairs.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
        let chat = TableTranslator::new(&pair_refs);
        let mt = RecordingMt::new(Some("mt"));
        let batch = BatchSettings {
            size: 2,
            ..settings()
        };
        let pipeline = TranslatorPipeline::new(batch, &chat, &mt, ConsoleProgress::silent());

        let stats = pipeline.translate_catalog(&mut catalog).expect("translate");
        assert_eq!(stats.pending, 5);
        assert_eq!(stats.batches, 3);
        assert_eq!(stats.primary, 5);
        let sizes: Vec<usize> = chat.calls.borrow().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        for i in 0..5 {
            assert_eq!(catalog.entry(i).expect("entry").msgstr, format!("物品 {i}"));
        }
        assert_eq!(catalog.entry(5).expect("kept").msgstr, "保留");
        assert!(catalog.pending_indices().is_empty());
    }

    #[test]
    fn max_entries_limits_work() {
        let po = "msgid \"One\"\nmsgstr \"\"\n\nmsgid \"Two\"\nmsgstr \"\"\n";
        let mut catalog = Catalog::parse(po);
        let chat = TableTranslator::new(&[("One", "一"), ("Two", "二")]);
        let mt = RecordingMt::new(None);
        let batch = BatchSettings {
            max_entries: Some(1),
            ..settings()
        };
        let pipeline = TranslatorPipeline::new(batch, &chat, &mt, ConsoleProgress::silent());
        let stats = pipeline.translate_catalog(&mut catalog).expect("translate");
        assert_eq!(stats.pending, 1);
        assert_eq!(catalog.pending_indices(), vec![1]);
    }

    #[test]
    fn collect_inputs_filters_and_sorts() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["b.txt", "a.txt", "notes.md", ".a.txt.tmp", ".hidden.txt"] {
            std::fs::write(dir.path().join(name), "").expect("write");
        }
        std::fs::create_dir(dir.path().join("dir.txt")).expect("mkdir");
        let files = collect_inputs(dir.path(), ".txt").expect("collect");
        let names: Vec<String> = files
            .iter()
            .filter_map(|p| p.file_name().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        assert_eq!(names, vec!["a.txt".to_string(), "b.txt".to_string()]);
    }

    #[test]
    fn missing_input_dir_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = collect_inputs(&dir.path().join("uploaded"), ".txt").expect_err("missing");
        assert!(format!("{err:#}").contains("read input dir"));
    }

    #[test]
    fn tier_labels() {
        assert_eq!(Tier::Primary { round: 1 }.label(), "llm");
        assert_eq!(Tier::Primary { round: 3 }.label(), "llm, round 3");
        assert_eq!(Tier::Fallback.label(), "mt");
        assert_eq!(Tier::Unchanged.label(), "unchanged");
    }
}
