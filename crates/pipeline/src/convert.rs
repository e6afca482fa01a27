use crate::cache::{self, cache_key, CacheConfig};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::eval::{eval, EvalCheck, EvalIssue, EvalReport};
use crate::repair::{apply_patch, request_patch, RejectedOp, RepairRequest, Repairer};
use crate::stats::ConversionStats;
use canon_extract::{
    detect_format, embedded_raster_payload, extract_deterministic, extract_drawio_page,
    extract_raster, TextRecognizer,
};
use canon_ir::{enrich, source_hash, ArtifactStore, DiagramIr, SourceFormat};
use canon_render::{parse_rendered, render};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// How the IR was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    #[serde(rename = "xml")]
    Xml,
    #[serde(rename = "dsl")]
    Dsl,
    #[serde(rename = "cv+repair")]
    CvRepair,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Xml => "xml",
            Self::Dsl => "dsl",
            Self::CvRepair => "cv+repair",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRecord {
    pub source_hash: String,
    pub method: Method,
    pub ir_ref: String,
    pub rendered_ref: String,
    pub valid: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub violations: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Repair attempts made; zero for deterministic sources
    #[serde(default)]
    pub attempts: usize,
}

/// Cached value: the record plus the rendered text
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedConversion {
    record: ConversionRecord,
    rendered: String,
}

#[derive(Debug, Clone)]
pub struct ConversionOutput {
    pub record: ConversionRecord,
    pub rendered: String,
    pub cached: bool,
    pub rejected_ops: Vec<RejectedOp>,
}

/// Extraction route chosen before the cache lookup
enum Route {
    Deterministic(SourceFormat),
    Mermaid,
    Raster(Vec<u8>),
}

impl Route {
    fn method(&self) -> Method {
        match self {
            Self::Deterministic(SourceFormat::Dsl) | Self::Mermaid => Method::Dsl,
            Self::Deterministic(_) => Method::Xml,
            Self::Raster(_) => Method::CvRepair,
        }
    }
}

struct Attempt {
    ir: DiagramIr,
    report: EvalReport,
    json: String,
    rejected: Vec<RejectedOp>,
}

impl Attempt {
    fn new(ir: DiagramIr, report: EvalReport, rejected: Vec<RejectedOp>) -> Self {
        let json = ir.to_canonical_json().unwrap_or_default();
        Self {
            ir,
            report,
            json,
            rejected,
        }
    }

    /// Fewest violations, then fewest warnings, then canonical JSON order
    fn beats(&self, other: &Attempt) -> bool {
        (self.report.rank(), self.json.as_str()) < (other.report.rank(), other.json.as_str())
    }
}

/// Content-addressed conversion of one diagram source
pub struct Converter {
    config: PipelineConfig,
    cache: CacheConfig,
    store: ArtifactStore,
    repairer: Arc<dyn Repairer>,
    recognizer: Arc<dyn TextRecognizer>,
}

impl Converter {
    pub fn new(
        config: PipelineConfig,
        cache: CacheConfig,
        repairer: Arc<dyn Repairer>,
        recognizer: Arc<dyn TextRecognizer>,
    ) -> Self {
        let store = ArtifactStore::new(cache.dir.clone());
        Self {
            config,
            cache,
            store,
            repairer,
            recognizer,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    fn route(bytes: &[u8], format: SourceFormat) -> Route {
        match format {
            SourceFormat::Raster => Route::Raster(bytes.to_vec()),
            SourceFormat::Mermaid => Route::Mermaid,
            SourceFormat::Svg => match embedded_raster_payload(bytes) {
                Some(payload) => {
                    debug!("SVG wraps a bitmap; using the raster path");
                    Route::Raster(payload)
                }
                None => Route::Deterministic(SourceFormat::Svg),
            },
            other => Route::Deterministic(other),
        }
    }

    fn extract(&self, bytes: &[u8], format: SourceFormat) -> Result<DiagramIr> {
        if format == SourceFormat::Drawio && self.config.drawio_page > 0 {
            let mut ir = extract_drawio_page(bytes, self.config.drawio_page)?;
            ir.metadata.source_hash = Some(source_hash(bytes));
            enrich(&mut ir);
            return Ok(ir);
        }
        Ok(extract_deterministic(bytes, format)?)
    }

    fn parse_mermaid(bytes: &[u8]) -> Result<DiagramIr> {
        let text = String::from_utf8_lossy(bytes);
        let mut ir = parse_rendered(&text)?;
        ir.metadata.source_hash = Some(source_hash(bytes));
        enrich(&mut ir);
        Ok(ir)
    }

    /// Raster path: partial IR, then up to `1 + max_retries` repair attempts,
    /// keeping the best-ranked one.
    async fn repair_loop(&self, hash: &str, raster: &[u8]) -> (Attempt, usize) {
        let (partial, confidence) = extract_raster(raster, self.recognizer.as_ref());
        debug!(
            "Raster extraction: {} nodes, {} edges, {} confidence entries",
            partial.nodes.len(),
            partial.edges.len(),
            confidence.len()
        );

        let baseline = eval(&partial, None, self.config.drift_threshold);
        let mut best = Attempt::new(partial.clone(), baseline, Vec::new());
        if best.report.ok {
            return (best, 0);
        }

        let mut feedback = best.report.violation_messages();
        let mut attempts = 0usize;
        for attempt in 0..=self.config.max_retries {
            let request = RepairRequest {
                source_hash: hash.to_string(),
                attempt,
                partial: partial.clone(),
                feedback: feedback.clone(),
            };
            attempts += 1;
            let patch = match request_patch(
                self.repairer.as_ref(),
                &request,
                self.config.repair_timeout(),
            )
            .await
            {
                Ok(patch) => patch,
                Err(err) => {
                    warn!("Repair attempt {attempt} for {hash} failed: {err}");
                    best.report.warnings.push(EvalIssue::new(
                        EvalCheck::Repair,
                        "repair",
                        format!("repair unavailable: {err}"),
                    ));
                    break;
                }
            };

            let outcome = apply_patch(&partial, &patch, self.config.confidence_threshold);
            let mut ir = outcome.ir;
            enrich(&mut ir);
            let report = eval(&ir, Some(&partial), self.config.drift_threshold);
            debug!(
                "Repair attempt {attempt}: {} violation(s), {} warning(s)",
                report.violations.len(),
                report.warnings.len()
            );
            let candidate = Attempt::new(ir, report, outcome.rejected);
            let done = candidate.report.ok;
            feedback = candidate.report.violation_messages();
            if candidate.beats(&best) {
                best = candidate;
            }
            if done {
                break;
            }
        }
        (best, attempts)
    }

    /// Converts `bytes`; the format is sniffed when not given.
    pub async fn convert(
        &self,
        bytes: &[u8],
        format: Option<SourceFormat>,
    ) -> Result<ConversionOutput> {
        let started = Instant::now();
        let hash = source_hash(bytes);
        let format = format
            .or_else(|| detect_format(bytes))
            .ok_or(PipelineError::UnknownFormat)?;
        let route = Self::route(bytes, format);
        let method = route.method();
        let key = cache_key(&hash, method.as_str());

        if let Some(hit) = cache::load::<CachedConversion>(&self.cache, &key).await? {
            debug!("Cache hit for {key}");
            return Ok(ConversionOutput {
                record: hit.record,
                rendered: hit.rendered,
                cached: true,
                rejected_ops: Vec::new(),
            });
        }

        let (mut best, attempts) = match &route {
            Route::Deterministic(format) => {
                let ir = self.extract(bytes, *format)?;
                let report = eval(&ir, None, self.config.drift_threshold);
                (Attempt::new(ir, report, Vec::new()), 0)
            }
            Route::Mermaid => {
                let ir = Self::parse_mermaid(bytes)?;
                let report = eval(&ir, None, self.config.drift_threshold);
                (Attempt::new(ir, report, Vec::new()), 0)
            }
            Route::Raster(raster) => self.repair_loop(&hash, raster).await,
        };

        best.ir.metadata.source_hash = Some(hash.clone());
        best.ir
            .metadata
            .extra
            .insert("extraction_method".to_string(), method.as_str().to_string());
        let rendered = render(&best.ir);
        let ir_ref = self.store.write_ir(&hash, &best.ir).await?;
        let rendered_ref = self.store.write_rendered(&hash, &rendered).await?;

        let record = ConversionRecord {
            source_hash: hash.clone(),
            method,
            ir_ref: ir_ref.display().to_string(),
            rendered_ref: rendered_ref.display().to_string(),
            valid: best.report.ok,
            created_at: Utc::now(),
            violations: best.report.violation_messages(),
            warnings: best.report.warning_messages(),
            attempts,
        };

        // best-effort results are recomputed next time instead of cached
        if record.valid {
            let entry = CachedConversion {
                record: record.clone(),
                rendered: rendered.clone(),
            };
            cache::save(&self.cache, &key, &entry).await?;
        }
        info!(
            "Converted {} via {} in {}ms (valid: {})",
            &hash[..12.min(hash.len())],
            method,
            started.elapsed().as_millis(),
            record.valid
        );

        Ok(ConversionOutput {
            record,
            rendered,
            cached: false,
            rejected_ops: best.rejected,
        })
    }

    /// Converts several sources; a failing source is recorded and skipped.
    pub async fn convert_all(
        &self,
        sources: Vec<(String, Vec<u8>)>,
        format: Option<SourceFormat>,
    ) -> (Vec<(String, ConversionOutput)>, ConversionStats) {
        let mut stats = ConversionStats::new();
        let mut outputs = Vec::new();
        for (name, bytes) in sources {
            match self.convert(&bytes, format).await {
                Ok(output) => {
                    stats.add_output(&output);
                    outputs.push((name, output));
                }
                Err(err) => {
                    warn!("Conversion of {name} failed: {err}");
                    stats.add_error(format!("{name}: {err}"));
                }
            }
        }
        (outputs, stats)
    }
}
