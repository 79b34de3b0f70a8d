use anyhow::Result;
use tracing::{error, info, warn};

use crate::cli::InspectArgs;
use crate::commands::split::section::Section;
use crate::commands::split::sections_for_inspection;
use crate::config::RunConfig;
use crate::model::InputDescriptor;
use crate::pdf;

/// Walk and resolve each input's outline without writing any output.
pub fn run(args: InspectArgs) -> Result<()> {
    let config = RunConfig::load(args.config.as_deref())?;
    let mut failures = 0_usize;

    for file in &args.files {
        let outcome = InputDescriptor::from_path(file)
            .and_then(|descriptor| inspect_file(&descriptor, &config));
        if let Err(err) = outcome {
            error!(file = %file.display(), error = %err, "inspection failed");
            failures += 1;
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} input file(s) could not be inspected");
    }
    Ok(())
}

fn inspect_file(descriptor: &InputDescriptor, config: &RunConfig) -> Result<()> {
    let doc = pdf::load_document(&descriptor.path)?;
    info!(
        file = %descriptor.path.display(),
        doctype = %descriptor.doctype,
        pages = pdf::page_count(&doc),
        "inspecting input"
    );

    let (sections, page_base, logical_end) =
        sections_for_inspection(&doc, config.no_entity_name)?;
    if sections.is_empty() {
        warn!("no outline in this document; only the flat-records strategy applies");
        return Ok(());
    }

    info!(page_base, logical_pages = logical_end, "resolved outline");
    for section in &sections {
        render(section, 0);
    }
    Ok(())
}

fn render(section: &Section, depth: usize) {
    info!(
        "{:indent$}{} p{:>3} [{:>3}] {}",
        "",
        section.level.label(),
        section.start_page,
        section.page_count,
        section.title,
        indent = depth * 2
    );
    for child in &section.children {
        render(child, depth + 1);
    }
}
