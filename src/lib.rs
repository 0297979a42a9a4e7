//! A context-anchored patch engine that applies chunk edits using fuzzy
//! anchor matching.
//!
//! `cpatch` applies edits to a text document, but with a key difference from
//! the standard `patch` command: it doesn't rely on line numbers at all. Each
//! requested edit (a *chunk*) carries a short **context marker** (typically a
//! nearby line of the original document) and an ordered list of add/remove/
//! context operations. The engine locates the marker inside the *current*
//! document, which may have drifted from what the edit's author assumed
//! (different whitespace, different Unicode normalization, or simply stale
//! positions), and applies the operations from the resolved anchor forward.
//!
//! This makes it resilient to edits that are "out of date" because of
//! preceding changes, which is a common scenario when working with
//! AI-generated edits, code from pull requests, or snippets from
//! documentation.
//!
//! ## Getting Started
//!
//! The engine is a pure function of (document, chunks, config) → result. It
//! performs no I/O; callers own reading the source file and writing the
//! result back.
//!
//! ```rust
//! use cpatch::{process_chunks, ChunkConfig, ChunkRequest};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let content = "a\nb\nc\n";
//! let requests = vec![ChunkRequest {
//!     context_marker: "b".to_string(),
//!     change_lines: vec![" b".to_string(), "-c".to_string(), "+d".to_string()],
//! }];
//!
//! let result = process_chunks(content, &requests, &ChunkConfig::default())?;
//!
//! assert!(result.success);
//! assert!(result.has_changes());
//! assert_eq!(result.modified_content, "a\nb\nd\n");
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Concepts
//!
//! ### The Processing Pipeline
//!
//! [`process_chunks`] sequences three stages, each of which is also exposed
//! on its own for callers that want finer control:
//!
//! 1. **Parsing:** [`parse_chunks`] turns raw [`ChunkRequest`]s into
//!    structured [`ParsedChunk`]s. Parsing is total: unknown line prefixes
//!    degrade to context lines instead of failing, so downstream validation
//!    is the only place a chunk can be rejected.
//! 2. **Validation:** [`validate_chunks`] statically checks the whole batch
//!    against the document before any mutation starts: non-empty markers
//!    and change lists, and every removal target present somewhere in the
//!    document. All problems are reported at once.
//! 3. **Application:** [`apply_chunks`] resolves every chunk's anchor via
//!    the matcher chain, and only if *all* resolve does it mutate a working
//!    copy of the line buffer, processing chunks in descending anchor order
//!    so earlier edits never shift the anchors of edits above them.
//!
//! ### Anchor Matching
//!
//! [`find_best_match`] tries a fixed, ordered chain of strategies (exact,
//! whitespace-tolerant, and Unicode-normalizing), each producing a
//! confidence in `[0, 1]`. The chain stops at the first result that clears
//! [`ChunkConfig::min_confidence`]; an exact match is therefore always
//! preferred when present, and latency stays bounded and deterministic.
//!
//! ```rust
//! use cpatch::{find_best_match, ChunkConfig};
//!
//! let lines = vec!["fn main() {".to_string(), "    foo  bar".to_string()];
//! let result = find_best_match(&lines, "foo bar", &ChunkConfig::default());
//!
//! assert!(result.found);
//! assert_eq!(result.line_number, 1);
//! assert_eq!(result.strategy, "whitespace-tolerant");
//! assert!(result.confidence < 1.0);
//! ```
//!
//! ### Failure Semantics
//!
//! Expected failures are never raised past the engine boundary; they are
//! collected as diagnostic strings in the returned result. An unresolved
//! anchor is fatal for the whole batch and guarantees the returned content
//! is byte-identical to the input. A failure while splicing one chunk is
//! isolated to that chunk; the remaining chunks still apply, and the result
//! reports `success = false` alongside the partially modified content. The
//! only error the engine itself returns is [`ConfigError`] for a malformed
//! [`ChunkConfig`].
//!
//! ## Feature Flags
//!
//! ### `parallel`
//!
//! - **Enabled by default.**
//! - Resolves chunk anchors across multiple threads using
//!   [`rayon`](https://crates.io/crates/rayon). Resolution is read-only over
//!   the document, so it parallelizes safely; mutation is always strictly
//!   serialized by the bottom-up apply order. Disable with
//!   `default-features = false` for targets without threading support.

use log::{debug, info, trace, warn};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use similar::TextDiff;
use std::fmt::Write as _;
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

// --- Error Types ---

/// Represents an invalid run configuration.
///
/// This is the only error the engine raises; every expected failure mode
/// (unresolved anchors, invalid chunks, apply failures) is reported as
/// diagnostic strings inside the returned result instead.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    /// `min_confidence` must lie in `[0.0, 1.0]`.
    #[error("min_confidence must be between 0.0 and 1.0 (got {0})")]
    ConfidenceOutOfRange(f64),
    /// `max_search_lines` must be at least 1, otherwise no matcher could
    /// ever scan anything.
    #[error("max_search_lines must be greater than zero")]
    EmptySearchWindow,
}

// --- Configuration ---

/// Options for configuring how a batch of chunks is matched and applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkConfig {
    /// If `true`, line comparisons are case sensitive.
    pub case_sensitive: bool,
    /// If `true`, the exact matcher compares lines without trimming
    /// surrounding whitespace first.
    pub preserve_whitespace: bool,
    /// The maximum number of document lines any matcher strategy scans.
    pub max_search_lines: usize,
    /// The acceptance threshold for a match's confidence (0.0 to 1.0).
    /// Higher is stricter.
    pub min_confidence: f64,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            case_sensitive: true,
            preserve_whitespace: false,
            max_search_lines: 100,
            min_confidence: 0.7,
        }
    }
}

impl ChunkConfig {
    /// Creates a new builder for `ChunkConfig`.
    ///
    /// # Example
    ///
    /// ```
    /// # use cpatch::ChunkConfig;
    /// let config = ChunkConfig::builder()
    ///     .case_sensitive(false)
    ///     .min_confidence(0.8)
    ///     .build();
    ///
    /// assert!(!config.case_sensitive);
    /// assert_eq!(config.min_confidence, 0.8);
    /// assert_eq!(config.max_search_lines, 100);
    /// ```
    pub fn builder() -> ChunkConfigBuilder {
        ChunkConfigBuilder::default()
    }

    /// Checks the configuration for programmer errors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::ConfidenceOutOfRange(self.min_confidence));
        }
        if self.max_search_lines == 0 {
            return Err(ConfigError::EmptySearchWindow);
        }
        Ok(())
    }
}

/// A builder for creating a [`ChunkConfig`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkConfigBuilder {
    case_sensitive: Option<bool>,
    preserve_whitespace: Option<bool>,
    max_search_lines: Option<usize>,
    min_confidence: Option<f64>,
}

impl ChunkConfigBuilder {
    /// If `true`, line comparisons are case sensitive.
    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = Some(case_sensitive);
        self
    }

    /// If `true`, the exact matcher compares lines without trimming first.
    pub fn preserve_whitespace(mut self, preserve_whitespace: bool) -> Self {
        self.preserve_whitespace = Some(preserve_whitespace);
        self
    }

    /// Sets the maximum number of document lines a matcher strategy scans.
    pub fn max_search_lines(mut self, max_search_lines: usize) -> Self {
        self.max_search_lines = Some(max_search_lines);
        self
    }

    /// Sets the acceptance threshold for match confidence (0.0 to 1.0).
    pub fn min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = Some(min_confidence);
        self
    }

    /// Builds the `ChunkConfig`.
    pub fn build(self) -> ChunkConfig {
        let default = ChunkConfig::default();
        ChunkConfig {
            case_sensitive: self.case_sensitive.unwrap_or(default.case_sensitive),
            preserve_whitespace: self
                .preserve_whitespace
                .unwrap_or(default.preserve_whitespace),
            max_search_lines: self.max_search_lines.unwrap_or(default.max_search_lines),
            min_confidence: self.min_confidence.unwrap_or(default.min_confidence),
        }
    }
}

// --- Data Structures ---

/// One operation inside a chunk, in the order the applier walks them.
///
/// There are exactly three behaviors, so this is a closed sum type matched
/// exhaustively in the applier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOperation {
    /// Insert the given content at the cursor.
    Add(String),
    /// Delete the nearest line matching the given content.
    Remove(String),
    /// Expect the given content at the cursor; used to verify position and
    /// self-heal against minor anchor drift.
    Context(String),
}

impl ChangeOperation {
    /// The content string carried by the operation, regardless of kind.
    pub fn content(&self) -> &str {
        match self {
            ChangeOperation::Add(s)
            | ChangeOperation::Remove(s)
            | ChangeOperation::Context(s) => s,
        }
    }
}

/// One raw requested edit, as supplied by the caller.
///
/// Each change line is prefixed `+` (add), `-` (remove), or a space
/// (context). See [`parse_chunk`] for the full prefix rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    /// A short anchor string, typically a nearby line of the original
    /// document, used to locate where the chunk applies.
    pub context_marker: String,
    /// The ordered, prefixed change lines.
    pub change_lines: Vec<String>,
}

/// A structured chunk: a cleaned context marker plus ordered operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedChunk {
    /// The context marker with literal `@@` tokens stripped and trimmed.
    pub context_marker: String,
    /// The operations the applier walks from the anchor forward.
    pub changes: Vec<ChangeOperation>,
}

impl ParsedChunk {
    /// Returns the contents of all `Add` operations, in order.
    pub fn added_lines(&self) -> Vec<&str> {
        self.changes
            .iter()
            .filter_map(|op| match op {
                ChangeOperation::Add(s) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Returns the contents of all `Remove` operations, in order.
    pub fn removed_lines(&self) -> Vec<&str> {
        self.changes
            .iter()
            .filter_map(|op| match op {
                ChangeOperation::Remove(s) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Returns the contents of all `Context` operations, in order.
    pub fn context_lines(&self) -> Vec<&str> {
        self.changes
            .iter()
            .filter_map(|op| match op {
                ChangeOperation::Context(s) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Checks whether the chunk contains any `Add` operations.
    pub fn has_additions(&self) -> bool {
        self.changes
            .iter()
            .any(|op| matches!(op, ChangeOperation::Add(_)))
    }

    /// Checks whether the chunk contains any `Remove` operations.
    pub fn has_removals(&self) -> bool {
        self.changes
            .iter()
            .any(|op| matches!(op, ChangeOperation::Remove(_)))
    }

    /// Checks whether the chunk contains any effective changes.
    ///
    /// A chunk with only context operations verifies position but mutates
    /// nothing.
    pub fn has_changes(&self) -> bool {
        self.has_additions() || self.has_removals()
    }
}

/// The outcome of one matching attempt for one chunk.
///
/// Produced by exactly one strategy per attempt and never mutated after
/// construction.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Whether an acceptable anchor line was found.
    pub found: bool,
    /// The 0-based line index of the anchor. Only meaningful when `found`.
    pub line_number: usize,
    /// How certain the strategy is that this is the right line (0.0 to 1.0).
    pub confidence: f64,
    /// The name of the strategy that produced this result.
    pub strategy: &'static str,
    /// A human-readable account of what happened.
    pub reason: String,
}

impl MatchResult {
    fn matched(line_number: usize, confidence: f64, strategy: &'static str) -> Self {
        Self {
            found: true,
            line_number,
            confidence,
            strategy,
            reason: format!(
                "{} match at line {} (confidence {:.3})",
                strategy,
                line_number + 1,
                confidence
            ),
        }
    }

    fn unmatched(strategy: &'static str, reason: impl Into<String>) -> Self {
        Self {
            found: false,
            line_number: 0,
            confidence: 0.0,
            strategy,
            reason: reason.into(),
        }
    }
}

/// The outcome of statically checking a batch of chunks against a document.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    /// `false` if any chunk failed a structural or existence check.
    pub valid: bool,
    /// One entry per failed check, across all chunks.
    pub errors: Vec<String>,
    /// Non-fatal observations, e.g. chunks with no effective changes.
    pub warnings: Vec<String>,
}

/// The outcome of resolving and applying a batch of chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyResult {
    /// `true` if every chunk resolved and applied without error.
    pub success: bool,
    /// The resulting line buffer. Identical to the input when resolution
    /// failed for any chunk.
    pub lines: Vec<String>,
    /// A textual summary per applied chunk.
    pub applied: Vec<String>,
    /// Resolution and apply-time failures.
    pub errors: Vec<String>,
    /// Non-fatal observations, e.g. overlapping resolved edit ranges.
    pub warnings: Vec<String>,
}

/// The single outward-facing result of a full processing run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessResult {
    /// `true` if the batch validated, resolved, and applied completely.
    pub success: bool,
    /// The document content as supplied.
    pub original_content: String,
    /// The document content after applying. Byte-identical to the original
    /// when nothing was applied.
    pub modified_content: String,
    /// A textual summary per applied chunk.
    pub applied_changes: Vec<String>,
    /// All errors accumulated across validation and application.
    pub errors: Vec<String>,
    /// All warnings accumulated across validation and application.
    pub warnings: Vec<String>,
}

impl ProcessResult {
    /// Checks whether the run changed the document at all.
    pub fn has_changes(&self) -> bool {
        self.original_content != self.modified_content
    }

    /// Renders a human-readable report of the run.
    ///
    /// # Example
    ///
    /// ```
    /// # use cpatch::{process_chunks, ChunkConfig};
    /// let result = process_chunks("a\n", &[], &ChunkConfig::default()).unwrap();
    /// let report = result.summary();
    /// assert!(report.contains("succeeded"));
    /// assert!(report.contains("0 chunk(s) applied"));
    /// ```
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let status = if self.success { "succeeded" } else { "failed" };
        let _ = writeln!(
            out,
            "Processing {}: {} chunk(s) applied, {} error(s), {} warning(s).",
            status,
            self.applied_changes.len(),
            self.errors.len(),
            self.warnings.len()
        );
        for change in &self.applied_changes {
            let _ = writeln!(out, "  - {}", change);
        }
        for error in &self.errors {
            let _ = writeln!(out, "  error: {}", error);
        }
        for warning in &self.warnings {
            let _ = writeln!(out, "  warning: {}", warning);
        }
        if !self.has_changes() {
            let _ = writeln!(out, "  (document unchanged)");
        }
        out
    }
}

// --- Line Handling ---

/// Splits document content into lines on `\r\n`, `\r`, or `\n`.
///
/// A trailing empty line produced by a final newline is not included;
/// instead the second element of the return value records whether the
/// content ended with a line terminator, so [`join_lines`] can round-trip
/// the document.
pub fn split_lines(content: &str) -> (Vec<String>, bool) {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut chars = content.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\n' => lines.push(std::mem::take(&mut current)),
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                lines.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    let ends_with_newline = content.ends_with('\n') || content.ends_with('\r');
    (lines, ends_with_newline)
}

/// Rejoins a line buffer with `\n`, restoring the trailing newline if the
/// original document had one.
pub fn join_lines(lines: &[String], ends_with_newline: bool) -> String {
    let mut content = lines.join("\n");
    if ends_with_newline && !lines.is_empty() {
        content.push('\n');
    }
    content
}

/// Compares two lines the way the applier and validator do: trimmed, with
/// case folding per the configuration.
fn lines_equal(a: &str, b: &str, config: &ChunkConfig) -> bool {
    if config.case_sensitive {
        a.trim() == b.trim()
    } else {
        a.trim().to_lowercase() == b.trim().to_lowercase()
    }
}

fn fold_case(s: &str, config: &ChunkConfig) -> String {
    if config.case_sensitive {
        s.to_string()
    } else {
        s.to_lowercase()
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Applies canonical (NFC) normalization and drops zero-width characters,
/// BOM/word-joiner marks, and variation selectors.
fn normalize_unicode(s: &str) -> String {
    s.nfc()
        .filter(|c| {
            !matches!(
                c,
                '\u{200B}'..='\u{200D}' | '\u{FEFF}' | '\u{2060}' | '\u{FE00}'..='\u{FE0F}'
            )
        })
        .collect()
}

// --- Chunk Parsing ---

/// Parses one raw requested edit into a structured [`ParsedChunk`].
///
/// Parsing never fails. Each change line is classified by its first
/// character: `+` is an addition, `-` is a removal, a leading space is
/// context, and an empty line is empty context. Any other prefix degrades to
/// a context operation carrying the *whole* raw line, so malformed input
/// reaches validation instead of being silently dropped or raising an
/// error. Literal `@@` tokens in the marker are stripped and the marker is
/// trimmed.
///
/// # Example
///
/// ```
/// # use cpatch::{parse_chunk, ChangeOperation, ChunkRequest};
/// let request = ChunkRequest {
///     context_marker: "@@ fn main() @@".to_string(),
///     change_lines: vec![
///         "+new line".to_string(),
///         "-old line".to_string(),
///         " kept line".to_string(),
///         "unprefixed".to_string(),
///     ],
/// };
/// let chunk = parse_chunk(&request);
/// assert_eq!(chunk.context_marker, "fn main()");
/// assert_eq!(chunk.changes[0], ChangeOperation::Add("new line".to_string()));
/// assert_eq!(chunk.changes[1], ChangeOperation::Remove("old line".to_string()));
/// assert_eq!(chunk.changes[2], ChangeOperation::Context("kept line".to_string()));
/// assert_eq!(chunk.changes[3], ChangeOperation::Context("unprefixed".to_string()));
/// ```
pub fn parse_chunk(request: &ChunkRequest) -> ParsedChunk {
    let context_marker = request.context_marker.replace("@@", "").trim().to_string();
    let changes = request
        .change_lines
        .iter()
        .map(|raw| parse_change_line(raw))
        .collect();
    trace!(
        "Parsed chunk with marker '{}' ({} operation(s)).",
        context_marker,
        request.change_lines.len()
    );
    ParsedChunk {
        context_marker,
        changes,
    }
}

/// Parses a batch of raw requests, preserving order.
pub fn parse_chunks(requests: &[ChunkRequest]) -> Vec<ParsedChunk> {
    requests.iter().map(parse_chunk).collect()
}

fn parse_change_line(raw: &str) -> ChangeOperation {
    if let Some(rest) = raw.strip_prefix('+') {
        ChangeOperation::Add(rest.to_string())
    } else if let Some(rest) = raw.strip_prefix('-') {
        ChangeOperation::Remove(rest.to_string())
    } else if let Some(rest) = raw.strip_prefix(' ') {
        ChangeOperation::Context(rest.to_string())
    } else if raw.is_empty() {
        ChangeOperation::Context(String::new())
    } else {
        // Lenient fallback: treat the whole raw line as context.
        ChangeOperation::Context(raw.to_string())
    }
}

// --- Context Matching ---

/// A strategy for locating a context marker inside the document.
///
/// Strategies are tried in a fixed order of decreasing specificity; each
/// scans at most [`ChunkConfig::max_search_lines`] lines and reports its
/// first candidate with a strategy-specific confidence.
pub trait MatchStrategy {
    /// The stable name reported in [`MatchResult::strategy`].
    fn name(&self) -> &'static str;

    /// Attempts to locate `marker` within `lines`.
    fn try_match(&self, lines: &[String], marker: &str, config: &ChunkConfig) -> MatchResult;
}

/// Byte-for-byte line equality, respecting `case_sensitive` and
/// `preserve_whitespace`. Confidence is always 1.0.
pub struct ExactStrategy;

impl MatchStrategy for ExactStrategy {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn try_match(&self, lines: &[String], marker: &str, config: &ChunkConfig) -> MatchResult {
        let want = if config.preserve_whitespace {
            fold_case(marker, config)
        } else {
            fold_case(marker.trim(), config)
        };
        for (i, line) in lines.iter().take(config.max_search_lines).enumerate() {
            let have = if config.preserve_whitespace {
                fold_case(line, config)
            } else {
                fold_case(line.trim(), config)
            };
            if have == want {
                return MatchResult::matched(i, 1.0, self.name());
            }
        }
        MatchResult::unmatched(self.name(), "no exact match within search window")
    }
}

/// Collapses runs of whitespace and trims before comparing.
///
/// The confidence is derived from the character-level similarity between the
/// raw marker and the raw candidate line, so heavier whitespace drift scores
/// lower, but any line that is equal after collapsing still clears the
/// default threshold. The score is always strictly below 1.0.
pub struct WhitespaceTolerantStrategy;

impl MatchStrategy for WhitespaceTolerantStrategy {
    fn name(&self) -> &'static str {
        "whitespace-tolerant"
    }

    fn try_match(&self, lines: &[String], marker: &str, config: &ChunkConfig) -> MatchResult {
        let want = fold_case(&collapse_whitespace(marker), config);
        if want.is_empty() {
            return MatchResult::unmatched(self.name(), "marker is empty after collapsing");
        }
        for (i, line) in lines.iter().take(config.max_search_lines).enumerate() {
            if fold_case(&collapse_whitespace(line), config) == want {
                let ratio = TextDiff::from_chars(marker, line.as_str()).ratio() as f64;
                let confidence = (ratio * 0.95).clamp(0.8, 0.95);
                return MatchResult::matched(i, confidence, self.name());
            }
        }
        MatchResult::unmatched(
            self.name(),
            "no whitespace-tolerant match within search window",
        )
    }
}

/// Applies canonical Unicode normalization and strips zero-width and variant
/// characters before comparing whitespace-collapsed lines.
///
/// Scores strictly below [`WhitespaceTolerantStrategy`], reflecting the
/// further-reduced certainty.
pub struct UnicodeNormalizingStrategy;

impl MatchStrategy for UnicodeNormalizingStrategy {
    fn name(&self) -> &'static str {
        "unicode-normalizing"
    }

    fn try_match(&self, lines: &[String], marker: &str, config: &ChunkConfig) -> MatchResult {
        let normalized_marker = normalize_unicode(marker);
        let want = fold_case(&collapse_whitespace(&normalized_marker), config);
        if want.is_empty() {
            return MatchResult::unmatched(self.name(), "marker is empty after normalization");
        }
        for (i, line) in lines.iter().take(config.max_search_lines).enumerate() {
            let normalized_line = normalize_unicode(line);
            if fold_case(&collapse_whitespace(&normalized_line), config) == want {
                let ratio =
                    TextDiff::from_chars(normalized_marker.as_str(), normalized_line.as_str())
                        .ratio() as f64;
                let confidence = (ratio * 0.9).clamp(0.75, 0.9);
                return MatchResult::matched(i, confidence, self.name());
            }
        }
        MatchResult::unmatched(
            self.name(),
            "no unicode-normalized match within search window",
        )
    }
}

/// The fixed strategy chain, ordered by specificity.
static STRATEGIES: [&(dyn MatchStrategy + Sync); 3] = [
    &ExactStrategy,
    &WhitespaceTolerantStrategy,
    &UnicodeNormalizingStrategy,
];

/// Locates the best position for a chunk's context marker inside the
/// document's current lines.
///
/// The strategy chain is evaluated in order and stops at the first result
/// whose confidence reaches [`ChunkConfig::min_confidence`]; it does not
/// search for a globally best match across strategies. If no strategy
/// clears the bar, the returned result has `found == false` and a reason
/// naming the marker.
pub fn find_best_match(lines: &[String], marker: &str, config: &ChunkConfig) -> MatchResult {
    if marker.trim().is_empty() {
        return MatchResult::unmatched("none", "context marker is empty");
    }
    for strategy in STRATEGIES {
        let result = strategy.try_match(lines, marker, config);
        if result.found && result.confidence >= config.min_confidence {
            debug!(
                "Resolved marker '{}' via {} strategy at line {} (confidence {:.3}).",
                marker,
                result.strategy,
                result.line_number + 1,
                result.confidence
            );
            return result;
        }
        trace!(
            "Strategy {} did not resolve '{}': {}",
            strategy.name(),
            marker,
            result.reason
        );
    }
    MatchResult::unmatched(
        "none",
        format!(
            "no strategy reached confidence {:.2} for marker '{}'",
            config.min_confidence, marker
        ),
    )
}

/// Runs every strategy and returns all results, for testing and inspection.
///
/// Unlike [`find_best_match`], this does not stop at the first acceptable
/// result and has no effect on apply behavior.
pub fn find_all_matches(lines: &[String], marker: &str, config: &ChunkConfig) -> Vec<MatchResult> {
    STRATEGIES
        .iter()
        .map(|strategy| strategy.try_match(lines, marker, config))
        .collect()
}

// --- Validation ---

/// Statically checks a batch of parsed chunks against the document before
/// any mutation starts.
///
/// Per chunk: the context marker must be non-empty, the change list must be
/// non-empty, and every removal target (trimmed) must equal some line
/// (trimmed) *anywhere* in the document: a global existence check, not a
/// positional one. Validation never mutates the document and never
/// short-circuits; a caller sees every problem at once. Chunks with no
/// effective changes are reported as warnings.
pub fn validate_chunks(
    chunks: &[ParsedChunk],
    lines: &[String],
    config: &ChunkConfig,
) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for (index, chunk) in chunks.iter().enumerate() {
        let label = index + 1;
        if chunk.context_marker.trim().is_empty() {
            errors.push(format!("chunk {}: context marker is empty", label));
        }
        if chunk.changes.is_empty() {
            errors.push(format!("chunk {}: change list is empty", label));
        } else if !chunk.has_changes() {
            warnings.push(format!(
                "chunk {}: contains only context lines, nothing to apply",
                label
            ));
        }
        for removal in chunk.removed_lines() {
            if !lines.iter().any(|line| lines_equal(line, removal, config)) {
                errors.push(format!(
                    "chunk {}: line to remove not found anywhere in document: '{}'",
                    label,
                    removal.trim()
                ));
            }
        }
    }

    if !errors.is_empty() {
        warn!("Validation failed with {} error(s).", errors.len());
    }
    ValidationResult {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

/// Flags resolved edit ranges that intersect.
///
/// Takes `(start, length)` spans in document coordinates and returns one
/// warning per span that starts inside an earlier span. Overlaps are reported, not
/// rejected: bottom-up application keeps overlapping chunks from corrupting
/// each other's anchors, but the outcome depends on chunk order, which is
/// worth surfacing.
pub fn detect_overlaps(spans: &[(usize, usize)]) -> Vec<String> {
    let mut indexed: Vec<(usize, usize, usize)> = spans
        .iter()
        .enumerate()
        .map(|(i, &(start, len))| (start, len, i))
        .collect();
    indexed.sort_unstable_by_key(|&(start, _, _)| start);

    // Track the furthest-reaching span seen so far; a long span can contain
    // several later ones, so comparing only adjacent neighbors is not enough.
    let mut warnings = Vec::new();
    let mut covering: Option<(usize, usize, usize)> = None;
    for &(start, len, idx) in &indexed {
        let end = start + len.max(1);
        if let Some((cover_end, cover_start, cover_idx)) = covering {
            if start < cover_end {
                warnings.push(format!(
                    "chunks {} and {} resolve to overlapping ranges (lines {} and {})",
                    cover_idx + 1,
                    idx + 1,
                    cover_start + 1,
                    start + 1
                ));
            }
            if end <= cover_end {
                continue;
            }
        }
        covering = Some((end, start, idx));
    }
    warnings
}

// --- Chunk Application ---

struct ResolvedChunk<'a> {
    chunk: &'a ParsedChunk,
    anchor: usize,
}

/// The number of document lines a chunk occupies once resolved: every
/// operation that consumes an existing line.
fn resolved_span(chunk: &ParsedChunk) -> usize {
    chunk
        .changes
        .iter()
        .filter(|op| !matches!(op, ChangeOperation::Add(_)))
        .count()
        .max(1)
}

/// Resolves every chunk's anchor and, only if all resolve, applies the
/// batch to a working copy of `lines`, bottom-up.
///
/// Phase 1 resolves each chunk via [`find_best_match`]. Any unresolved
/// chunk aborts the batch: the returned buffer is the unmodified input and
/// the errors name each failed marker.
///
/// Phase 2 sorts resolved chunks by anchor descending and applies them in
/// that order. An edit that changes the document's length therefore never
/// invalidates the still-pending anchors of chunks above it, without
/// re-resolving between chunks. A failure while applying one chunk is
/// recorded for that chunk only; the remaining chunks still apply, and the
/// partially modified buffer is returned with `success == false`.
pub fn apply_chunks(chunks: &[ParsedChunk], lines: &[String], config: &ChunkConfig) -> ApplyResult {
    // Phase 1: resolve all anchors against the unmodified document.
    #[cfg(feature = "parallel")]
    let resolutions: Vec<MatchResult> = chunks
        .par_iter()
        .map(|chunk| find_best_match(lines, &chunk.context_marker, config))
        .collect();
    #[cfg(not(feature = "parallel"))]
    let resolutions: Vec<MatchResult> = chunks
        .iter()
        .map(|chunk| find_best_match(lines, &chunk.context_marker, config))
        .collect();

    let mut resolution_errors = Vec::new();
    let mut resolved = Vec::with_capacity(chunks.len());
    for (chunk, resolution) in chunks.iter().zip(&resolutions) {
        if resolution.found {
            resolved.push(ResolvedChunk {
                chunk,
                anchor: resolution.line_number,
            });
        } else {
            resolution_errors.push(format!(
                "could not resolve context marker '{}': {}",
                chunk.context_marker, resolution.reason
            ));
        }
    }

    if !resolution_errors.is_empty() {
        warn!(
            "Aborting batch: {} of {} chunk(s) failed to resolve. Document left unmodified.",
            resolution_errors.len(),
            chunks.len()
        );
        return ApplyResult {
            success: false,
            lines: lines.to_vec(),
            applied: Vec::new(),
            errors: resolution_errors,
            warnings: Vec::new(),
        };
    }

    let spans: Vec<(usize, usize)> = resolved
        .iter()
        .map(|rc| (rc.anchor, resolved_span(rc.chunk)))
        .collect();
    let warnings = detect_overlaps(&spans);

    // Phase 2: apply bottom-up. The stable sort keeps the request order for
    // chunks that share an anchor.
    resolved.sort_by(|a, b| b.anchor.cmp(&a.anchor));

    let mut working = lines.to_vec();
    let mut applied = Vec::new();
    let mut errors = Vec::new();
    for rc in &resolved {
        info!(
            "Applying chunk anchored at line {} ('{}').",
            rc.anchor + 1,
            rc.chunk.context_marker
        );
        match apply_single_chunk(rc.chunk, rc.anchor, &mut working, config) {
            Ok(summary) => applied.push(summary),
            Err(message) => {
                warn!(
                    "Failed to apply chunk with marker '{}': {}",
                    rc.chunk.context_marker, message
                );
                errors.push(format!(
                    "chunk with marker '{}': {}",
                    rc.chunk.context_marker, message
                ));
            }
        }
    }

    ApplyResult {
        success: errors.is_empty(),
        lines: working,
        applied,
        errors,
        warnings,
    }
}

/// How far a context operation looks around the cursor to self-heal against
/// minor anchor drift.
const CONTEXT_HEAL_RADIUS: usize = 5;
/// How far forward a removal searches from the cursor.
const REMOVE_FORWARD_WINDOW: usize = 10;
/// How far backward a removal falls back to after the forward scan.
const REMOVE_BACKWARD_WINDOW: usize = 2;

/// Walks one chunk's operations with a cursor starting at the anchor,
/// mutating the working buffer in place.
fn apply_single_chunk(
    chunk: &ParsedChunk,
    anchor: usize,
    lines: &mut Vec<String>,
    config: &ChunkConfig,
) -> Result<String, String> {
    let mut cursor = anchor;
    let mut added = 0usize;
    let mut removed = 0usize;

    for op in &chunk.changes {
        match op {
            ChangeOperation::Context(expected) => {
                // An empty expected context line matches anything.
                if !expected.trim().is_empty() {
                    let at_cursor =
                        cursor < lines.len() && lines_equal(&lines[cursor], expected, config);
                    if !at_cursor {
                        if let Some(index) = find_context_nearby(lines, cursor, expected, config) {
                            trace!(
                                "Context '{}' relocated cursor from line {} to line {}.",
                                expected.trim(),
                                cursor + 1,
                                index + 1
                            );
                            cursor = index;
                        } else {
                            trace!(
                                "Context '{}' not found near line {}; advancing anyway.",
                                expected.trim(),
                                cursor + 1
                            );
                        }
                    }
                }
                cursor += 1;
            }
            ChangeOperation::Remove(expected) => {
                let index =
                    find_removal_target(lines, cursor, expected, config).ok_or_else(|| {
                        format!(
                            "line to remove not found near line {}: '{}'",
                            cursor + 1,
                            expected.trim()
                        )
                    })?;
                lines.remove(index);
                removed += 1;
                if index < cursor {
                    cursor -= 1;
                }
            }
            ChangeOperation::Add(content) => {
                let at = cursor.min(lines.len());
                lines.insert(at, content.clone());
                added += 1;
                cursor = at + 1;
            }
        }
    }

    Ok(format!(
        "applied chunk at line {} ({} added, {} removed)",
        anchor + 1,
        added,
        removed
    ))
}

/// Searches a symmetric window around the cursor for a line matching the
/// expected context, nearest first, forward before backward at equal
/// distance.
fn find_context_nearby(
    lines: &[String],
    cursor: usize,
    expected: &str,
    config: &ChunkConfig,
) -> Option<usize> {
    for distance in 1..=CONTEXT_HEAL_RADIUS {
        let forward = cursor + distance;
        if forward < lines.len() && lines_equal(&lines[forward], expected, config) {
            return Some(forward);
        }
        if let Some(backward) = cursor.checked_sub(distance) {
            // The cursor itself may sit past the end of the buffer.
            if backward < lines.len() && lines_equal(&lines[backward], expected, config) {
                return Some(backward);
            }
        }
    }
    None
}

/// Finds the line a removal operation targets: forward from the cursor
/// first, then a short backward fallback.
fn find_removal_target(
    lines: &[String],
    cursor: usize,
    expected: &str,
    config: &ChunkConfig,
) -> Option<usize> {
    for offset in 0..=REMOVE_FORWARD_WINDOW {
        let index = cursor + offset;
        if index < lines.len() && lines_equal(&lines[index], expected, config) {
            return Some(index);
        }
    }
    for offset in 1..=REMOVE_BACKWARD_WINDOW {
        if let Some(index) = cursor.checked_sub(offset) {
            if index < lines.len() && lines_equal(&lines[index], expected, config) {
                return Some(index);
            }
        }
    }
    None
}

// --- Orchestration ---

/// Runs the full pipeline: parse, validate, resolve, and apply a batch of
/// requested edits against the given document content.
///
/// This is the engine's single outward-facing entry point. It performs no
/// I/O. The returned [`ProcessResult`] carries the success flag, the
/// original and modified content, per-chunk summaries, and all accumulated
/// errors and warnings; expected failures are reported there rather than
/// raised. The only `Err` this function returns is [`ConfigError`] for a
/// malformed configuration.
///
/// Guarantees:
///
/// - zero requests: `success == true` and the modified content is
///   byte-identical to the input;
/// - any validation error or unresolved anchor: `success == false` and the
///   modified content is byte-identical to the input;
/// - an apply-time failure in one chunk: `success == false`, the other
///   chunks still apply, and the partially modified content is returned.
pub fn process_chunks(
    content: &str,
    requests: &[ChunkRequest],
    config: &ChunkConfig,
) -> Result<ProcessResult, ConfigError> {
    config.validate()?;

    let (lines, ends_with_newline) = split_lines(content);
    info!(
        "Processing {} chunk request(s) against {} document line(s).",
        requests.len(),
        lines.len()
    );

    if requests.is_empty() {
        return Ok(ProcessResult {
            success: true,
            original_content: content.to_string(),
            modified_content: content.to_string(),
            applied_changes: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        });
    }

    let chunks = parse_chunks(requests);
    let validation = validate_chunks(&chunks, &lines, config);
    if !validation.valid {
        return Ok(ProcessResult {
            success: false,
            original_content: content.to_string(),
            modified_content: content.to_string(),
            applied_changes: Vec::new(),
            errors: validation.errors,
            warnings: validation.warnings,
        });
    }

    let apply = apply_chunks(&chunks, &lines, config);

    // Keep the output byte-identical (separators included) whenever the
    // line buffer came through untouched.
    let modified_content = if apply.lines == lines {
        content.to_string()
    } else {
        join_lines(&apply.lines, ends_with_newline)
    };

    let mut warnings = validation.warnings;
    warnings.extend(apply.warnings);

    Ok(ProcessResult {
        success: apply.success,
        original_content: content.to_string(),
        modified_content,
        applied_changes: apply.applied,
        errors: apply.errors,
        warnings,
    })
}
