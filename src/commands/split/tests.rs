use std::fs;

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};

use crate::cli::SplitArgs;
use crate::pdf;
use crate::session::RunSession;

use super::boundary::PrintPlan;
use super::emit::DocumentEmitter;
use super::outline_walk::OutlineWalker;
use super::section::{LeafRecord, collect_leaves, finalize_spans};

struct Bookmark {
    title: &'static str,
    page: u32,
    children: Vec<Bookmark>,
}

fn bm(title: &'static str, page: u32) -> Bookmark {
    Bookmark {
        title,
        page,
        children: Vec::new(),
    }
}

fn bm_with(title: &'static str, page: u32, children: Vec<Bookmark>) -> Bookmark {
    Bookmark {
        title,
        page,
        children,
    }
}

// Fixture document with one text-showing operation per page and an optional
// outline tree wired through First/Last/Next/Prev references.
fn build_pdf(page_texts: &[&str], bookmarks: &[Bookmark]) -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();

    let mut page_ids = Vec::new();
    for text in page_texts {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new(
                    "Tf",
                    vec![Object::Name(b"F1".to_vec()), Object::Integer(12)],
                ),
                Operation::new("Td", vec![Object::Integer(72), Object::Integer(720)]),
                Operation::new(
                    "Tj",
                    vec![Object::String(
                        text.as_bytes().to_vec(),
                        StringFormat::Literal,
                    )],
                ),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));

        let page = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(pages_id)),
            (
                "MediaBox",
                Object::Array(vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(612),
                    Object::Integer(792),
                ]),
            ),
            ("Contents", Object::Reference(content_id)),
        ]);
        page_ids.push(doc.add_object(page));
    }

    let pages = Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Pages".to_vec())),
        ("Count", Object::Integer(page_ids.len() as i64)),
        (
            "Kids",
            Object::Array(page_ids.iter().map(|id| Object::Reference(*id)).collect()),
        ),
    ]);
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let mut catalog = Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]);

    if !bookmarks.is_empty() {
        let outlines_id = doc.new_object_id();
        let (first, last, count) = insert_outline_items(&mut doc, outlines_id, bookmarks, &page_ids);
        let outlines = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Outlines".to_vec())),
            ("First", Object::Reference(first)),
            ("Last", Object::Reference(last)),
            ("Count", Object::Integer(count)),
        ]);
        doc.objects.insert(outlines_id, Object::Dictionary(outlines));
        catalog.set("Outlines", Object::Reference(outlines_id));
    }

    let catalog_id = doc.add_object(catalog);
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}

fn insert_outline_items(
    doc: &mut Document,
    parent_id: ObjectId,
    bookmarks: &[Bookmark],
    page_ids: &[ObjectId],
) -> (ObjectId, ObjectId, i64) {
    let ids: Vec<ObjectId> = bookmarks.iter().map(|_| doc.new_object_id()).collect();

    for (index, bookmark) in bookmarks.iter().enumerate() {
        let mut item = Dictionary::from_iter(vec![
            (
                "Title",
                Object::String(bookmark.title.as_bytes().to_vec(), StringFormat::Literal),
            ),
            ("Parent", Object::Reference(parent_id)),
            (
                "Dest",
                Object::Array(vec![
                    Object::Reference(page_ids[(bookmark.page - 1) as usize]),
                    Object::Name(b"Fit".to_vec()),
                ]),
            ),
        ]);
        if index > 0 {
            item.set("Prev", Object::Reference(ids[index - 1]));
        }
        if index + 1 < ids.len() {
            item.set("Next", Object::Reference(ids[index + 1]));
        }
        if !bookmark.children.is_empty() {
            let (first, last, count) =
                insert_outline_items(doc, ids[index], &bookmark.children, page_ids);
            item.set("First", Object::Reference(first));
            item.set("Last", Object::Reference(last));
            item.set("Count", Object::Integer(count));
        }
        doc.objects.insert(ids[index], Object::Dictionary(item));
    }

    (ids[0], *ids.last().unwrap(), bookmarks.len() as i64)
}

fn treasury_fixture() -> Vec<u8> {
    build_pdf(
        &[
            "SITUATION 2023 AC1001 Alpha",
            "detail Alpha",
            "AC1002 Alpha",
            "detail",
            "AC2001 Beta",
        ],
        &[bm_with(
            "SITUATION",
            1,
            vec![
                bm_with("Alpha", 1, vec![bm("AC1001", 1), bm("AC1002", 3)]),
                bm_with("Beta", 5, vec![bm("AC2001", 5)]),
            ],
        )],
    )
}

fn output_page_count(path: &std::path::Path) -> usize {
    let doc = Document::load(path).unwrap();
    doc.get_pages().len()
}

#[test]
fn read_outline_yields_leaves_followed_by_their_containers() {
    let bytes = treasury_fixture();
    let doc = Document::load_mem(&bytes).unwrap();

    let nodes = pdf::read_outline(&doc).unwrap();
    assert_eq!(nodes.len(), 2);
    assert!(matches!(&nodes[0], pdf::OutlineNode::Leaf(leaf) if leaf.title == "SITUATION"));
    let pdf::OutlineNode::Container(children) = &nodes[1] else {
        panic!("expected a container after the document leaf");
    };
    // Alpha leaf, Alpha's codes, Beta leaf, Beta's codes
    assert_eq!(children.len(), 4);
}

#[test]
fn walked_tree_resolves_expected_page_spans() {
    let bytes = treasury_fixture();
    let doc = Document::load_mem(&bytes).unwrap();

    let nodes = pdf::read_outline(&doc).unwrap();
    let mut walker = OutlineWalker::new(false);
    let mut sections = walker.walk(&nodes);
    assert_eq!(walker.page_base(), 1);

    finalize_spans(&mut sections, 5);
    let leaves = collect_leaves(&sections, 0, None);

    // first leaf lands on page 0 regardless of the native reference
    assert_eq!(leaves[0].start_page, 0);
    let counts: Vec<usize> = leaves.iter().map(|leaf| leaf.page_count).collect();
    assert_eq!(counts, vec![2, 2, 1]);
    // conservation: the leaves tile the whole document section
    assert_eq!(counts.iter().sum::<usize>(), sections[0].page_count);
}

#[test]
fn split_writes_one_file_per_leaf() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("treasury_2023_04.pdf");
    fs::write(&input, treasury_fixture()).unwrap();
    let out_root = dir.path().join("out");
    let report_path = dir.path().join("report.json");

    let args = SplitArgs {
        files: vec![input],
        config: None,
        restrict: 0,
        output_root: Some(out_root.clone()),
        report_path: Some(report_path.clone()),
    };
    super::run(args).unwrap();

    let month_dir = out_root.join("treasury").join("2023").join("04");
    assert_eq!(output_page_count(&month_dir.join("AC1001_Alpha.pdf")), 2);
    assert_eq!(output_page_count(&month_dir.join("AC1002_Alpha.pdf")), 2);
    assert_eq!(output_page_count(&month_dir.join("AC2001_Beta.pdf")), 1);

    let report: serde_json::Value =
        serde_json::from_slice(&fs::read(&report_path).unwrap()).unwrap();
    assert_eq!(report["totals"]["documents_emitted"], 3);
    assert_eq!(report["totals"]["pages_emitted"], 5);
    assert_eq!(report["totals"]["files_failed"], 0);
    assert_eq!(report["files"][0]["status"], "completed");
    // nothing should have been quarantined
    assert!(!out_root.join("problem").exists());
}

#[test]
fn restrict_caps_the_emitted_pages() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("treasury_2023_05.pdf");
    fs::write(&input, treasury_fixture()).unwrap();
    let out_root = dir.path().join("out");

    let args = SplitArgs {
        files: vec![input],
        config: None,
        restrict: 2,
        output_root: Some(out_root.clone()),
        report_path: Some(dir.path().join("report.json")),
    };
    super::run(args).unwrap();

    let month_dir = out_root.join("treasury").join("2023").join("05");
    assert!(month_dir.join("AC1001_Alpha.pdf").exists());
    assert!(!month_dir.join("AC1002_Alpha.pdf").exists());
}

#[test]
fn duplicated_bookmark_key_fails_the_file_before_any_output() {
    let bytes = build_pdf(
        &["AC1001 Alpha", "detail", "AC1001 Alpha again"],
        &[bm_with(
            "SITUATION",
            1,
            vec![bm_with(
                "Alpha",
                1,
                vec![bm("AC1001", 1), bm("AC1001", 3)],
            )],
        )],
    );
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("treasury_2023_06.pdf");
    fs::write(&input, bytes).unwrap();
    let out_root = dir.path().join("out");
    let report_path = dir.path().join("report.json");

    let args = SplitArgs {
        files: vec![input],
        config: None,
        restrict: 0,
        output_root: Some(out_root.clone()),
        report_path: Some(report_path.clone()),
    };
    let err = super::run(args).unwrap_err();
    assert!(err.to_string().contains("1 of 1"));

    let month_dir = out_root.join("treasury").join("2023").join("06");
    assert!(!month_dir.join("AC1001_Alpha.pdf").exists());

    let report: serde_json::Value =
        serde_json::from_slice(&fs::read(&report_path).unwrap()).unwrap();
    assert_eq!(report["files"][0]["status"], "failed");
    let reason = report["files"][0]["failure_reason"].as_str().unwrap();
    assert!(reason.contains("incoherence"), "unexpected reason: {reason}");
}

#[test]
fn same_start_page_emits_a_single_page_and_advances() {
    let bytes = build_pdf(&["AC1 AC2 Alpha", "AC2 tail Alpha"], &[]);
    let doc = Document::load_mem(&bytes).unwrap();
    let dir = tempfile::tempdir().unwrap();

    let mut emitter = DocumentEmitter::new(
        &doc,
        1,
        dir.path().join("out"),
        dir.path().join("problem"),
        false,
        false,
    )
    .unwrap();
    let mut session = RunSession::new();

    let leaf = LeafRecord {
        start_page: 0,
        page_count: 1,
        code: "AC1".to_string(),
        entity: "Alpha".to_string(),
    };
    let plan = PrintPlan {
        print_all_remaining: false,
        next_start: Some(0),
    };
    let cursor = emitter.emit(&leaf, &plan, 0, 2, &mut session).unwrap();

    assert_eq!(cursor, 1);
    assert_eq!(
        output_page_count(&dir.path().join("out").join("AC1_Alpha.pdf")),
        1
    );
}

#[test]
fn print_all_remaining_consumes_to_the_end_bound() {
    let bytes = build_pdf(&["AC1 Alpha", "tail", "tail", "next section"], &[]);
    let doc = Document::load_mem(&bytes).unwrap();
    let dir = tempfile::tempdir().unwrap();

    let mut emitter = DocumentEmitter::new(
        &doc,
        1,
        dir.path().join("out"),
        dir.path().join("problem"),
        false,
        false,
    )
    .unwrap();
    let mut session = RunSession::new();

    let leaf = LeafRecord {
        start_page: 0,
        page_count: 1,
        code: "AC1".to_string(),
        entity: "Alpha".to_string(),
    };
    let plan = PrintPlan {
        print_all_remaining: true,
        next_start: None,
    };
    let cursor = emitter.emit(&leaf, &plan, 0, 3, &mut session).unwrap();

    assert_eq!(cursor, 3);
    assert_eq!(
        output_page_count(&dir.path().join("out").join("AC1_Alpha.pdf")),
        3
    );
}

#[test]
fn emitting_the_same_name_twice_is_an_incoherence() {
    let bytes = build_pdf(&["AC1 Alpha", "AC1 Alpha"], &[]);
    let doc = Document::load_mem(&bytes).unwrap();
    let dir = tempfile::tempdir().unwrap();

    let mut emitter = DocumentEmitter::new(
        &doc,
        1,
        dir.path().join("out"),
        dir.path().join("problem"),
        false,
        false,
    )
    .unwrap();
    let mut session = RunSession::new();

    let leaf = LeafRecord {
        start_page: 0,
        page_count: 1,
        code: "AC1".to_string(),
        entity: "Alpha".to_string(),
    };
    emitter.emit_range(&leaf, 0, 1, &mut session).unwrap();
    let err = emitter.emit_range(&leaf, 1, 1, &mut session).unwrap_err();
    assert!(matches!(err, crate::error::SplitError::Incoherence(_)));
    // the first file is still the only one on disk
    assert_eq!(fs::read_dir(dir.path().join("out")).unwrap().count(), 1);
}

#[test]
fn reverse_naming_swaps_code_and_entity() {
    let bytes = build_pdf(&["AC1 Alpha"], &[]);
    let doc = Document::load_mem(&bytes).unwrap();
    let dir = tempfile::tempdir().unwrap();

    let mut emitter = DocumentEmitter::new(
        &doc,
        1,
        dir.path().join("out"),
        dir.path().join("problem"),
        true,
        false,
    )
    .unwrap();
    let mut session = RunSession::new();

    let leaf = LeafRecord {
        start_page: 0,
        page_count: 1,
        code: "AC1".to_string(),
        entity: "Alpha".to_string(),
    };
    emitter.emit_range(&leaf, 0, 1, &mut session).unwrap();
    assert!(dir.path().join("out").join("Alpha_AC1.pdf").exists());
}

#[test]
fn failed_verification_moves_the_file_to_the_problem_directory() {
    let bytes = build_pdf(&["completely different text"], &[]);
    let doc = Document::load_mem(&bytes).unwrap();
    let dir = tempfile::tempdir().unwrap();

    let mut emitter = DocumentEmitter::new(
        &doc,
        1,
        dir.path().join("out"),
        dir.path().join("problem"),
        false,
        true,
    )
    .unwrap();
    let mut session = RunSession::new();

    let leaf = LeafRecord {
        start_page: 0,
        page_count: 1,
        code: "AC9".to_string(),
        entity: "Nobody".to_string(),
    };
    let written = emitter.emit_range(&leaf, 0, 1, &mut session).unwrap();

    assert!(written.starts_with(dir.path().join("problem")));
    assert!(dir.path().join("problem").join("AC9_Nobody.pdf").exists());
    assert!(!dir.path().join("out").join("AC9_Nobody.pdf").exists());
}

#[cfg(unix)]
mod payroll_subprocess {
    use std::os::unix::fs::PermissionsExt;

    use super::*;
    use crate::config::PayrollRules;
    use crate::commands::split::payroll::PayrollFieldExtractor;

    fn write_script(dir: &std::path::Path, body: &str) -> std::path::PathBuf {
        let script = dir.join("fields.sh");
        fs::write(&script, body).unwrap();
        let mut perms = fs::metadata(&script).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script, perms).unwrap();
        script
    }

    #[test]
    fn extractor_parses_the_labeled_output_lines() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "#!/bin/sh\necho 'ANCODE 4010'\necho 'NAME Mme Dupont'\n",
        );
        let pdf_path = dir.path().join("payroll_2023_01.pdf");
        let rules = PayrollRules::default();

        let extractor = PayrollFieldExtractor::new(&script, &rules, &pdf_path);
        let (code, name) = extractor.extract(0).unwrap();
        assert_eq!(code, "4010");
        assert_eq!(name, "Dupont");
    }

    #[test]
    fn nonzero_exit_is_a_typed_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "#!/bin/sh\nexit 1\n");
        let pdf_path = dir.path().join("payroll_2023_01.pdf");
        let rules = PayrollRules::default();

        let extractor = PayrollFieldExtractor::new(&script, &rules, &pdf_path);
        let err = extractor.extract(3).unwrap_err();
        let crate::error::SplitError::Parse { page, command, .. } = err else {
            panic!("expected a parse error");
        };
        assert_eq!(page, 3);
        // the 1-indexed page number reaches the command line
        assert!(command.ends_with(" 4"), "command was: {command}");
    }

    #[test]
    fn error_marker_in_stdout_is_a_parse_error_even_on_exit_zero() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "#!/bin/sh\necho 'Error (page unreadable)'\n");
        let pdf_path = dir.path().join("payroll_2023_01.pdf");
        let rules = PayrollRules::default();

        let extractor = PayrollFieldExtractor::new(&script, &rules, &pdf_path);
        let err = extractor.extract(0).unwrap_err();
        assert!(matches!(err, crate::error::SplitError::Parse { .. }));
    }

    #[test]
    fn flat_records_merge_consecutive_pages_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            concat!(
                "#!/bin/sh\n",
                "case \"$2\" in\n",
                "  1|2)\n",
                "    echo 'ANCODE 4010'\n",
                "    echo 'NAME Mme Dupont'\n",
                "    ;;\n",
                "  *)\n",
                "    echo 'ANCODE 4020'\n",
                "    echo 'NAME M Martin'\n",
                "    ;;\n",
                "esac\n",
            ),
        );
        let input = dir.path().join("payroll_2023_02.pdf");
        fs::write(&input, build_pdf(&["a", "b", "c"], &[])).unwrap();
        let out_root = dir.path().join("out");

        let config_path = dir.path().join("config.json");
        fs::write(
            &config_path,
            format!("{{\"payroll_preprocessor\": \"{}\"}}", script.display()),
        )
        .unwrap();

        let args = SplitArgs {
            files: vec![input],
            config: Some(config_path),
            restrict: 0,
            output_root: Some(out_root.clone()),
            report_path: Some(dir.path().join("report.json")),
        };
        super::super::run(args).unwrap();

        let month_dir = out_root.join("payroll").join("2023").join("02");
        assert_eq!(output_page_count(&month_dir.join("4010_Dupont.pdf")), 2);
        assert_eq!(output_page_count(&month_dir.join("4020_Martin.pdf")), 1);
    }
}
