use cpatch::{
    apply_chunks, detect_overlaps, find_all_matches, find_best_match, join_lines, parse_chunk,
    parse_chunks, process_chunks, split_lines, validate_chunks, ChangeOperation, ChunkConfig,
    ChunkRequest, ConfigError, ParsedChunk,
};
use indoc::indoc;

fn request(marker: &str, change_lines: &[&str]) -> ChunkRequest {
    ChunkRequest {
        context_marker: marker.to_string(),
        change_lines: change_lines.iter().map(|s| s.to_string()).collect(),
    }
}

fn doc(lines: &[&str]) -> Vec<String> {
    lines.iter().map(|s| s.to_string()).collect()
}

// --- Parsing ---

#[test]
fn test_parse_prefix_rules() {
    let chunk = parse_chunk(&request(
        "@@ fn main() @@",
        &["+added", "-removed", " context", "", "no prefix"],
    ));
    assert_eq!(chunk.context_marker, "fn main()");
    assert_eq!(
        chunk.changes,
        vec![
            ChangeOperation::Add("added".to_string()),
            ChangeOperation::Remove("removed".to_string()),
            ChangeOperation::Context("context".to_string()),
            ChangeOperation::Context(String::new()),
            // Lenient fallback keeps the whole raw line.
            ChangeOperation::Context("no prefix".to_string()),
        ]
    );
}

#[test]
fn test_parse_chunks_preserves_order() {
    let requests = vec![request("first", &["+a"]), request("second", &["+b"])];
    let chunks = parse_chunks(&requests);
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].context_marker, "first");
    assert_eq!(chunks[1].context_marker, "second");
}

#[test]
fn test_chunk_projections() {
    let chunk = parse_chunk(&request("m", &["+a", "-r", " c", "+a2"]));
    assert!(chunk.has_additions());
    assert!(chunk.has_removals());
    assert!(chunk.has_changes());
    assert_eq!(chunk.added_lines(), vec!["a", "a2"]);
    assert_eq!(chunk.removed_lines(), vec!["r"]);
    assert_eq!(chunk.context_lines(), vec!["c"]);
    assert_eq!(chunk.changes[1].content(), "r");

    let context_only = parse_chunk(&request("m", &[" c1", " c2"]));
    assert!(!context_only.has_changes());
}

// --- Matching ---

#[test]
fn test_exact_match_is_preferred() {
    let lines = doc(&["alpha", "beta", "gamma"]);
    let result = find_best_match(&lines, "beta", &ChunkConfig::default());
    assert!(result.found);
    assert_eq!(result.line_number, 1);
    assert_eq!(result.confidence, 1.0);
    assert_eq!(result.strategy, "exact");
}

#[test]
fn test_whitespace_tolerant_confidence_ordering() {
    let lines = doc(&["foo  bar"]);
    let config = ChunkConfig::default();
    let result = find_best_match(&lines, "foo bar", &config);
    assert!(result.found);
    assert_eq!(result.line_number, 0);
    assert_eq!(result.strategy, "whitespace-tolerant");
    assert!(result.confidence >= config.min_confidence);
    assert!(result.confidence < 1.0);
}

#[test]
fn test_unicode_zero_width_drift() {
    // The document line carries a zero-width space the marker lacks.
    let lines = doc(&["let x\u{200B} = 1;"]);
    let result = find_best_match(&lines, "let x = 1;", &ChunkConfig::default());
    assert!(result.found);
    assert_eq!(result.line_number, 0);
    assert_eq!(result.strategy, "unicode-normalizing");
    assert!(result.confidence < 1.0);
}

#[test]
fn test_unicode_normalization_form_drift() {
    // Decomposed "e" + combining acute in the document, precomposed in the marker.
    let lines = doc(&["cafe\u{0301}"]);
    let result = find_best_match(&lines, "caf\u{00E9}", &ChunkConfig::default());
    assert!(result.found);
    assert_eq!(result.strategy, "unicode-normalizing");
}

#[test]
fn test_empty_marker_never_matches() {
    let lines = doc(&["a", "", "b"]);
    let result = find_best_match(&lines, "", &ChunkConfig::default());
    assert!(!result.found);
}

#[test]
fn test_find_all_matches_runs_every_strategy() {
    let lines = doc(&["foo bar"]);
    let results = find_all_matches(&lines, "foo bar", &ChunkConfig::default());
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].strategy, "exact");
    assert_eq!(results[1].strategy, "whitespace-tolerant");
    assert_eq!(results[2].strategy, "unicode-normalizing");
    // Every strategy can locate this marker; exact is the most confident.
    assert!(results.iter().all(|r| r.found));
    assert_eq!(results[0].confidence, 1.0);
}

#[test]
fn test_max_search_lines_bounds_the_scan() {
    let lines: Vec<String> = (0..10).map(|i| format!("line {}", i)).collect();
    let config = ChunkConfig::builder().max_search_lines(3).build();
    let result = find_best_match(&lines, "line 5", &config);
    assert!(!result.found);

    let within = find_best_match(&lines, "line 2", &config);
    assert!(within.found);
    assert_eq!(within.line_number, 2);
}

#[test]
fn test_case_insensitive_matching() {
    let lines = doc(&["Hello World"]);
    let config = ChunkConfig::builder().case_sensitive(false).build();
    let result = find_best_match(&lines, "hello world", &config);
    assert!(result.found);
    assert_eq!(result.strategy, "exact");

    let sensitive = find_best_match(&lines, "hello world", &ChunkConfig::default());
    assert!(!sensitive.found);
}

#[test]
fn test_preserve_whitespace_requires_exact_indentation() {
    let lines = doc(&["    indented"]);
    let config = ChunkConfig::builder().preserve_whitespace(true).build();
    let trimmed_marker = find_all_matches(&lines, "indented", &config);
    assert!(!trimmed_marker[0].found, "exact strategy must not trim");

    let full_marker = find_best_match(&lines, "    indented", &config);
    assert!(full_marker.found);
    assert_eq!(full_marker.strategy, "exact");
}

// --- Validation ---

#[test]
fn test_validation_rejects_empty_marker_and_empty_changes() {
    let lines = doc(&["a"]);
    let config = ChunkConfig::default();
    let chunks = vec![
        parse_chunk(&request("@@", &["+x"])),
        ParsedChunk {
            context_marker: "a".to_string(),
            changes: Vec::new(),
        },
    ];
    let result = validate_chunks(&chunks, &lines, &config);
    assert!(!result.valid);
    assert_eq!(result.errors.len(), 2);
    assert!(result.errors[0].contains("context marker is empty"));
    assert!(result.errors[1].contains("change list is empty"));
}

#[test]
fn test_removal_existence_gate() {
    // The removal target appears nowhere in the document, so validation
    // fails before any matcher is invoked; the unresolvable marker is
    // never reported.
    let content = "a\nb\nc\n";
    let requests = vec![request("definitely absent", &["-zzz"])];
    let result = process_chunks(content, &requests, &ChunkConfig::default()).unwrap();
    assert!(!result.success);
    assert_eq!(result.modified_content, content);
    assert!(result
        .errors
        .iter()
        .any(|e| e.contains("not found anywhere in document") && e.contains("zzz")));
    assert!(result
        .errors
        .iter()
        .all(|e| !e.contains("could not resolve")));
}

#[test]
fn test_validation_accumulates_all_errors() {
    let lines = doc(&["a"]);
    let config = ChunkConfig::default();
    let chunks = parse_chunks(&[
        request("", &["-missing one"]),
        request("a", &["-missing two"]),
    ]);
    let result = validate_chunks(&chunks, &lines, &config);
    assert!(!result.valid);
    // Empty marker, plus one nonexistent removal per chunk.
    assert_eq!(result.errors.len(), 3);
}

#[test]
fn test_validation_warns_on_context_only_chunk() {
    let lines = doc(&["a"]);
    let chunks = parse_chunks(&[request("a", &[" a"])]);
    let result = validate_chunks(&chunks, &lines, &ChunkConfig::default());
    assert!(result.valid);
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].contains("only context lines"));
}

#[test]
fn test_detect_overlaps() {
    assert!(detect_overlaps(&[(0, 3), (5, 2)]).is_empty());
    let warnings = detect_overlaps(&[(0, 3), (2, 2)]);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("overlapping"));
}

#[test]
fn test_detect_overlaps_spans_contained_in_a_long_span() {
    // A long span can contain several later spans, not just its nearest
    // neighbor; each containment is reported.
    let warnings = detect_overlaps(&[(0, 10), (2, 1), (5, 1)]);
    assert_eq!(warnings.len(), 2);
    assert!(warnings.iter().all(|w| w.contains("chunks 1 and")));
}

// --- Application ---

#[test]
fn test_basic_apply_scenario() {
    let content = "a\nb\nc";
    let requests = vec![request("b", &[" b", "-c", "+d"])];
    let result = process_chunks(content, &requests, &ChunkConfig::default()).unwrap();
    assert!(result.success);
    assert!(result.has_changes());
    assert_eq!(result.modified_content, "a\nb\nd");
    assert_eq!(result.applied_changes.len(), 1);
    assert!(result.applied_changes[0].contains("line 2"));
}

#[test]
fn test_unresolved_marker_is_fatal_and_atomic() {
    let content = "a\nb\nc\n";
    let requests = vec![request("x", &["+d"])];
    let result = process_chunks(content, &requests, &ChunkConfig::default()).unwrap();
    assert!(!result.success);
    assert!(!result.has_changes());
    assert_eq!(result.modified_content, content);
    assert!(result
        .errors
        .iter()
        .any(|e| e.contains("could not resolve context marker 'x'")));
}

#[test]
fn test_one_unresolved_marker_blocks_resolvable_chunks() {
    let content = "a\nb\nc\n";
    let requests = vec![request("b", &["+fine"]), request("x", &["+never"])];
    let result = process_chunks(content, &requests, &ChunkConfig::default()).unwrap();
    assert!(!result.success);
    assert_eq!(result.modified_content, content);
    assert!(result.applied_changes.is_empty());
}

#[test]
fn test_all_resolution_failures_are_reported() {
    let lines = doc(&["a"]);
    let chunks = parse_chunks(&[request("x", &["+1"]), request("y", &["+2"])]);
    let result = apply_chunks(&chunks, &lines, &ChunkConfig::default());
    assert!(!result.success);
    assert_eq!(result.errors.len(), 2);
    assert_eq!(result.lines, lines);
}

#[test]
fn test_bottom_up_application_keeps_later_anchors_valid() {
    // The chunk at line 10 inserts three lines; the chunk anchored at
    // line 20 must still land on the original line-20 content.
    let content: String = (0..30)
        .map(|i| format!("line {}\n", i))
        .collect::<Vec<_>>()
        .join("");
    let requests = vec![
        request("line 10", &["+ins 1", "+ins 2", "+ins 3"]),
        request("line 20", &["-line 20", "+replaced 20"]),
    ];
    let result = process_chunks(&content, &requests, &ChunkConfig::default()).unwrap();
    assert!(result.success, "errors: {:?}", result.errors);

    let (lines, _) = split_lines(&result.modified_content);
    assert_eq!(lines[10], "ins 1");
    assert_eq!(lines[11], "ins 2");
    assert_eq!(lines[12], "ins 3");
    // Shifted down by the three insertions above it.
    assert_eq!(lines[23], "replaced 20");
    assert_eq!(lines.len(), 33);
}

#[test]
fn test_context_cursor_self_heals_nearby() {
    let content = "alpha\nbeta\ngamma\ndelta\n";
    // Anchored at "alpha" but the first context line is two lines away;
    // the cursor relocates within the healing window.
    let requests = vec![request("alpha", &[" gamma", "+inserted"])];
    let result = process_chunks(content, &requests, &ChunkConfig::default()).unwrap();
    assert!(result.success);
    assert_eq!(
        result.modified_content,
        "alpha\nbeta\ngamma\ninserted\ndelta\n"
    );
}

#[test]
fn test_unmatched_context_still_advances_cursor() {
    let content = "a\nb\nc\n";
    // The expected context never appears; the cursor advances anyway and
    // the addition lands one line past the anchor.
    let requests = vec![request("a", &[" nowhere to be found", "+x"])];
    let result = process_chunks(content, &requests, &ChunkConfig::default()).unwrap();
    assert!(result.success);
    assert_eq!(result.modified_content, "a\nx\nb\nc\n");
}

#[test]
fn test_context_scan_past_end_of_document() {
    // Repeated unmatched context lines walk the cursor past the last line;
    // the self-heal scan must tolerate a cursor beyond the buffer instead
    // of indexing past it.
    let content = "a\n";
    let requests = vec![request("a", &[" a", " b", " c", "+x"])];
    let result = process_chunks(content, &requests, &ChunkConfig::default()).unwrap();
    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.modified_content, "a\nx\n");
}

#[test]
fn test_empty_context_matches_anything() {
    let content = "a\nb\nc\n";
    let requests = vec![request("a", &["", "+x"])];
    let result = process_chunks(content, &requests, &ChunkConfig::default()).unwrap();
    assert!(result.success);
    assert_eq!(result.modified_content, "a\nx\nb\nc\n");
}

#[test]
fn test_remove_backward_fallback() {
    let content = "a\nb\nc\n";
    // Anchored below the removal target; the short backward window finds it.
    let requests = vec![request("c", &["-b"])];
    let result = process_chunks(content, &requests, &ChunkConfig::default()).unwrap();
    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.modified_content, "a\nc\n");
}

#[test]
fn test_apply_failure_is_isolated_and_partial_mutation_is_kept() {
    // "target" exists globally (so validation passes) but sits far outside
    // the failing chunk's removal windows. The other chunk still applies.
    let mut lines: Vec<String> = (0..40).map(|i| format!("line {}", i)).collect();
    lines[30] = "target".to_string();
    let content = lines.join("\n") + "\n";

    let requests = vec![
        request("line 0", &["-target"]),
        request("line 35", &["+added line"]),
    ];
    let result = process_chunks(&content, &requests, &ChunkConfig::default()).unwrap();

    assert!(!result.success);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("line 0"));
    assert!(result.errors[0].contains("not found near"));
    // The successful chunk's mutation is preserved.
    assert!(result.has_changes());
    assert!(result.modified_content.contains("added line"));
    assert_eq!(result.applied_changes.len(), 1);
}

#[test]
fn test_overlapping_chunks_warn_but_apply() {
    let content = "a\nb\nc\nd\n";
    let requests = vec![
        request("a", &[" a", " b", "+x"]),
        request("b", &[" b", "+y"]),
    ];
    let result = process_chunks(content, &requests, &ChunkConfig::default()).unwrap();
    assert!(result.success);
    assert!(result.warnings.iter().any(|w| w.contains("overlapping")));
    assert!(result.modified_content.contains('x'));
    assert!(result.modified_content.contains('y'));
}

#[test]
fn test_case_insensitive_apply() {
    let content = "FOO\nBAR\n";
    let config = ChunkConfig::builder().case_sensitive(false).build();
    let requests = vec![request("foo", &[" foo", "-bar", "+baz"])];
    let result = process_chunks(content, &requests, &config).unwrap();
    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.modified_content, "FOO\nbaz\n");
}

// --- Orchestration & Round-Trips ---

#[test]
fn test_zero_chunks_is_a_byte_identical_noop() {
    let content = "a\r\nb\r\n";
    let result = process_chunks(content, &[], &ChunkConfig::default()).unwrap();
    assert!(result.success);
    assert!(!result.has_changes());
    assert_eq!(result.modified_content, content);
}

#[test]
fn test_crlf_document_is_untouched_on_failure() {
    let content = "a\r\nb\r\nc\r\n";
    let requests = vec![request("x", &["+d"])];
    let result = process_chunks(content, &requests, &ChunkConfig::default()).unwrap();
    assert!(!result.success);
    assert_eq!(result.modified_content, content);
}

#[test]
fn test_crlf_document_rejoins_with_newlines_on_success() {
    let content = "a\r\nb\r\nc\r\n";
    let requests = vec![request("b", &["-c"])];
    let result = process_chunks(content, &requests, &ChunkConfig::default()).unwrap();
    assert!(result.success);
    assert_eq!(result.modified_content, "a\nb\n");
}

#[test]
fn test_missing_trailing_newline_is_preserved() {
    let content = "a\nb\nc";
    let requests = vec![request("a", &["-c"])];
    let result = process_chunks(content, &requests, &ChunkConfig::default()).unwrap();
    assert!(result.success);
    assert_eq!(result.modified_content, "a\nb");
}

#[test]
fn test_split_and_join_lines() {
    assert_eq!(
        split_lines("a\r\nb\rc\nd"),
        (doc(&["a", "b", "c", "d"]), false)
    );
    assert_eq!(split_lines(""), (Vec::<String>::new(), false));
    assert_eq!(split_lines("\n"), (doc(&[""]), true));
    assert_eq!(split_lines("a\n"), (doc(&["a"]), true));

    assert_eq!(join_lines(&doc(&["a", "b"]), true), "a\nb\n");
    assert_eq!(join_lines(&doc(&["a", "b"]), false), "a\nb");
    assert_eq!(join_lines(&[], true), "");
    assert_eq!(join_lines(&doc(&[""]), true), "\n");
}

#[test]
fn test_multiline_document_scenario() {
    let content = indoc! {"
        fn main() {
            println!(\"hello\");
        }
    "};
    let requests = vec![request(
        "fn main() {",
        &[
            " fn main() {",
            "-    println!(\"hello\");",
            "+    println!(\"goodbye\");",
        ],
    )];
    let result = process_chunks(content, &requests, &ChunkConfig::default()).unwrap();
    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(
        result.modified_content,
        indoc! {"
            fn main() {
                println!(\"goodbye\");
            }
        "}
    );
}

#[test]
fn test_summary_reports_outcome() {
    let content = "a\n";
    let requests = vec![request("x", &["+b"])];
    let result = process_chunks(content, &requests, &ChunkConfig::default()).unwrap();
    let report = result.summary();
    assert!(report.contains("failed"));
    assert!(report.contains("could not resolve"));
    assert!(report.contains("(document unchanged)"));
}

// --- Configuration ---

#[test]
fn test_config_defaults() {
    let config = ChunkConfig::default();
    assert!(config.case_sensitive);
    assert!(!config.preserve_whitespace);
    assert_eq!(config.max_search_lines, 100);
    assert_eq!(config.min_confidence, 0.7);
    assert_eq!(ChunkConfig::builder().build(), config);
}

#[test]
fn test_config_validation() {
    let bad_confidence = ChunkConfig::builder().min_confidence(1.5).build();
    assert_eq!(
        bad_confidence.validate(),
        Err(ConfigError::ConfidenceOutOfRange(1.5))
    );

    let bad_window = ChunkConfig::builder().max_search_lines(0).build();
    assert_eq!(bad_window.validate(), Err(ConfigError::EmptySearchWindow));

    let err = process_chunks("a\n", &[request("a", &["+b"])], &bad_window);
    assert_eq!(err, Err(ConfigError::EmptySearchWindow));
}

#[test]
fn test_stricter_threshold_rejects_fuzzy_match() {
    // Whitespace drift caps confidence below 1.0, so a threshold of 1.0
    // only accepts exact matches.
    let content = "foo  bar\n";
    let config = ChunkConfig::builder().min_confidence(1.0).build();
    let requests = vec![request("foo bar", &["+x"])];
    let result = process_chunks(content, &requests, &config).unwrap();
    assert!(!result.success);
    assert_eq!(result.modified_content, content);
}
