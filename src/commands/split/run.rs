use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use lopdf::Document;
use tracing::{error, info, warn};

use crate::cli::SplitArgs;
use crate::config::RunConfig;
use crate::error::SplitError;
use crate::model::{InputDescriptor, OutlineSegment, Strategy, builtin_strategy};
use crate::pdf::{self, PageSet};
use crate::session::RunSession;
use crate::util::{ensure_directory, fold_ascii, sha256_file, write_json_pretty};

use super::boundary::BoundaryResolver;
use super::emit::DocumentEmitter;
use super::outline_walk::OutlineWalker;
use super::payroll::{PayrollFieldExtractor, PayrollRecord, RecordAccumulator};
use super::section::{LeafRecord, Section, collect_leaves, finalize_spans};

pub fn run(args: SplitArgs) -> Result<()> {
    let config = RunConfig::load(args.config.as_deref())?;
    let restrict = if args.restrict != 0 {
        args.restrict
    } else {
        config.restrict
    };
    if restrict != 0 {
        info!(restrict, "analysis restricted to the first pages");
    }
    let output_root = args
        .output_root
        .clone()
        .unwrap_or_else(|| config.output_root.clone());

    let mut session = RunSession::new();
    info!(
        run_id = %session.run_id(),
        files = args.files.len(),
        "starting split run"
    );

    for file in &args.files {
        let descriptor = match InputDescriptor::from_path(file) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                error!(file = %file.display(), error = %err, "input rejected");
                session.fail_unparsed(file, &err.to_string());
                continue;
            }
        };
        let sha256 = match sha256_file(file) {
            Ok(sha256) => sha256,
            Err(err) => {
                error!(file = %file.display(), error = %err, "input unreadable");
                session.fail_unparsed(file, &err.to_string());
                continue;
            }
        };
        info!(
            file = %file.display(),
            doctype = %descriptor.doctype,
            sha256 = %sha256,
            "loading input"
        );
        session.begin_file(&descriptor, sha256);

        match process_document(&descriptor, &config, restrict, &output_root, &mut session) {
            Ok(()) => session.finish_file(),
            Err(err) => {
                error!(file = %file.display(), error = %err, "splitting failed");
                for cause in err.chain().skip(1) {
                    error!(cause = %cause, "caused by");
                }
                session.fail_file(&err.to_string());
            }
        }
    }

    let report_path = args.report_path.clone().unwrap_or_else(|| {
        output_root.join(format!("split_report_{}.json", session.run_id()))
    });
    let failures = session.failed_files();
    let report = session.into_report();
    write_json_pretty(&report_path, &report)?;
    info!(
        path = %report_path.display(),
        documents = report.totals.documents_emitted,
        pages = report.totals.pages_emitted,
        seconds = report.duration_seconds,
        "wrote run report"
    );

    if failures > 0 {
        bail!("{failures} of {} input file(s) failed", report.files.len());
    }
    Ok(())
}

fn process_document(
    descriptor: &InputDescriptor,
    config: &RunConfig,
    restrict: usize,
    output_root: &Path,
    session: &mut RunSession,
) -> Result<()> {
    let strategy = config
        .composite
        .get(&descriptor.doctype)
        .map(|segments| Strategy::Composite(segments.clone()))
        .or_else(|| builtin_strategy(&descriptor.doctype))
        .with_context(|| format!("unknown document type: {}", descriptor.doctype))?;

    let doc = pdf::load_document(&descriptor.path)
        .with_context(|| format!("failed to load {}", descriptor.path.display()))?;
    let total_pages = pdf::page_count(&doc);
    if total_pages == 0 {
        bail!("{} has no pages", descriptor.path.display());
    }
    info!(pages = total_pages, "input document loaded");

    let output_dir = output_root
        .join(&descriptor.doctype)
        .join(&descriptor.year)
        .join(&descriptor.month);
    ensure_directory(&output_dir)?;
    let problem_dir = output_root.join(&config.problem_dir);

    match strategy {
        Strategy::FlatRecords => split_flat_records(
            descriptor,
            config,
            restrict,
            &doc,
            total_pages,
            output_dir,
            problem_dir,
            session,
        ),
        Strategy::Outline => split_outline(
            config,
            restrict,
            &doc,
            total_pages,
            output_dir,
            problem_dir,
            &[OutlineSegment::default()],
            session,
        ),
        Strategy::Composite(segments) => split_outline(
            config,
            restrict,
            &doc,
            total_pages,
            output_dir,
            problem_dir,
            &segments,
            session,
        ),
    }
}

#[allow(clippy::too_many_arguments)]
fn split_outline(
    config: &RunConfig,
    restrict: usize,
    doc: &Document,
    total_pages: usize,
    output_dir: PathBuf,
    problem_dir: PathBuf,
    segments: &[OutlineSegment],
    session: &mut RunSession,
) -> Result<()> {
    let nodes = pdf::read_outline(doc)?;
    if nodes.is_empty() {
        bail!("no outline data could be extracted, not splitting");
    }
    if config.no_entity_name {
        error!("flat outline configured (no_entity_name): entity names come from document titles");
    }

    let mut walker = OutlineWalker::new(config.no_entity_name);
    let mut sections = walker.walk(&nodes);
    if sections.is_empty() {
        bail!("outline walk produced no sections");
    }

    let page_base = walker.page_base();
    if page_base as usize > total_pages {
        bail!("outline targets page {page_base} beyond the {total_pages}-page document");
    }
    let logical_end = total_pages + 1 - page_base as usize;
    finalize_spans(&mut sections, logical_end);
    info!(sections = sections.len(), pages = logical_end, "outline parsed");

    let document_starts: Vec<usize> = sections.iter().map(|section| section.start_page).collect();
    let mut emitter = DocumentEmitter::new(
        doc,
        page_base,
        output_dir,
        problem_dir,
        config.reverse_naming,
        true,
    )?;
    let mut pages = PageSet::new(doc, page_base);
    let mut registered: HashSet<String> = HashSet::new();

    for segment in segments {
        let leaves = collect_leaves(&sections, segment.skip_sections, segment.main_sections_count);
        if leaves.is_empty() {
            warn!(
                skip = segment.skip_sections,
                "no analytic codes found in outline segment"
            );
            continue;
        }
        register_leaves(&leaves, &mut registered)?;
        info!(documents = leaves.len(), "expected output documents");

        let mut resolver = BoundaryResolver::new(&mut pages, &leaves, &document_starts, logical_end);
        let mut cursor = leaves[0].start_page;

        for (index, leaf) in leaves.iter().enumerate() {
            if restrict != 0 && cursor >= restrict {
                info!(restrict, "stopping as requested by the page limit");
                break;
            }
            let plan = resolver.plan(index + 1, cursor);
            let end_bound = resolver.section_end(cursor);
            cursor = emitter.emit(leaf, &plan, cursor, end_bound, session)?;
        }
    }

    Ok(())
}

/// The composite key (entity, code) must be unique across the whole run on
/// one file; a repeat means a structurally duplicated bookmark.
fn register_leaves(leaves: &[LeafRecord], registered: &mut HashSet<String>) -> Result<()> {
    for leaf in leaves {
        let key = format!("{}_{}", fold_ascii(&leaf.entity), fold_ascii(&leaf.code));
        if !registered.insert(key.clone()) {
            return Err(SplitError::Incoherence(format!("{key} already registered")).into());
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn split_flat_records(
    descriptor: &InputDescriptor,
    config: &RunConfig,
    restrict: usize,
    doc: &Document,
    total_pages: usize,
    output_dir: PathBuf,
    problem_dir: PathBuf,
    session: &mut RunSession,
) -> Result<()> {
    let extractor = PayrollFieldExtractor::new(
        &config.payroll_preprocessor,
        &config.payroll,
        &descriptor.path,
    );
    // payroll pages often have no text layer of their own, so post-write
    // re-extraction cannot be required here
    let mut emitter = DocumentEmitter::new(
        doc,
        1,
        output_dir,
        problem_dir,
        config.reverse_naming,
        false,
    )?;
    let mut accumulator = RecordAccumulator::new();

    let limit = if restrict != 0 {
        restrict.min(total_pages)
    } else {
        total_pages
    };

    for page in 0..limit {
        let (code, name) = extractor.extract(page)?;
        if let Some(record) = accumulator.push(page, code, name)? {
            emit_payroll_record(&mut emitter, &record, session)?;
        }
    }
    if let Some(record) = accumulator.finish() {
        emit_payroll_record(&mut emitter, &record, session)?;
    }

    Ok(())
}

fn emit_payroll_record(
    emitter: &mut DocumentEmitter<'_>,
    record: &PayrollRecord,
    session: &mut RunSession,
) -> Result<(), SplitError> {
    let leaf = LeafRecord {
        start_page: record.start_page,
        page_count: record.page_count,
        code: record.code.clone(),
        entity: record.name.clone(),
    };
    emitter.emit_range(&leaf, record.start_page, record.page_count, session)?;
    Ok(())
}

pub fn sections_for_inspection(
    doc: &Document,
    no_entity_name: bool,
) -> Result<(Vec<Section>, u32, usize)> {
    let nodes = pdf::read_outline(doc)?;
    if nodes.is_empty() {
        return Ok((Vec::new(), 1, pdf::page_count(doc)));
    }
    let mut walker = OutlineWalker::new(no_entity_name);
    let mut sections = walker.walk(&nodes);
    let page_base = walker.page_base();
    let total_pages = pdf::page_count(doc);
    let logical_end = (total_pages + 1).saturating_sub(page_base as usize);
    finalize_spans(&mut sections, logical_end);
    Ok((sections, page_base, logical_end))
}
