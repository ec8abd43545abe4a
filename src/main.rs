use clap::{ArgAction, Parser, Subcommand};
use log::{info, warn};
use rsrcfix::error::{FormatError, Result};
use rsrcfix::heap::{self, Claim};
use rsrcfix::tree::{self, Element};
use rsrcfix::typedesc::{TableRange, TdKind, TypeDesc, TypeDescTable};
use rsrcfix::{Document, LvVersion};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rsrcfix", about = "RSRC container repair CLI")]
struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Repair a mirror-tree document in place
    Fix {
        /// Root XML document of the extracted file
        root: PathBuf,
        /// Write the repaired tree here instead of overwriting the input
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Remove this section entirely (repeatable)
        #[arg(long = "drop-section", value_name = "NAME")]
        drop_section: Vec<String>,
        /// Recompute this section's derived content even if present (repeatable)
        #[arg(long = "force-recreate", value_name = "NAME")]
        force_recreate: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        })
        .init();

    if let Err(err) = run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Fix { root, output, drop_section, force_recreate } => {
            let src = std::fs::read_to_string(&root)?;
            let mut doc_tree = tree::parse(&src)?;

            let version = document_version(&doc_tree)?;
            info!("document version {version}");
            let mut doc = Document::new(version);

            // ── uid repair ───────────────────────────────────────────────────
            let (reassigned, pruned) = heap::repair_uids(&mut doc_tree);
            if reassigned + pruned > 0 {
                warn!("uid repair: {reassigned} uid(s) reassigned, {pruned} element(s) pruned");
            }

            // ── heap reconstruction over the type-list section ───────────────
            if let Some(section) = section_mut(&mut doc_tree, "VCTP") {
                let forced = force_recreate.iter().any(|n| n == "VCTP");
                let already = section.children.iter().any(|c| c.tag == "DcoMatch");
                if forced || !already {
                    load_type_table(section, &mut doc.table)?;
                    let claims = load_claims(section)?;
                    let repair = heap::reconstruct(&doc.table, &claims);
                    write_repair(section, &repair);
                    info!("VCTP: {} object(s) matched, {} index(es) unexplained",
                        repair.matches.len(), repair.leftovers.len());
                }
            }

            // ── section drops ────────────────────────────────────────────────
            for name in &drop_section {
                let before = doc_tree.children.len();
                doc_tree.children.retain(|c| {
                    !(c.tag == "Section" && c.attr("name") == Some(name.as_str()))
                });
                if doc_tree.children.len() == before {
                    warn!("--drop-section {name}: no such section");
                }
            }

            let dest = output.unwrap_or(root);
            std::fs::write(&dest, tree::serialize(&doc_tree))?;
            info!("wrote {}", dest.display());
            Ok(())
        }
    }
}

fn document_version(root: &Element) -> Result<LvVersion> {
    let code = root.attr_u32("version_code")?;
    let new_layout = root.attr("version_layout") != Some("old");
    LvVersion::decode(code, new_layout)
}

fn section_mut<'a>(root: &'a mut Element, name: &str) -> Option<&'a mut Element> {
    root.children
        .iter_mut()
        .find(|c| c.tag == "Section" && c.attr("name") == Some(name))
}

/// Rebuild the shared table from a type-list section: one `<Type>` child
/// per top-level entry, cluster members nested.
fn load_type_table(section: &Element, table: &mut TypeDescTable) -> Result<()> {
    for t in section.children_named("Type") {
        let flat = load_type(t, table)?;
        table.add_top_level(flat);
    }
    Ok(())
}

fn load_type(elem: &Element, table: &mut TypeDescTable) -> Result<usize> {
    let kind_name = elem.attr("kind").ok_or_else(|| FormatError::Tree {
        elem:   elem.tag.clone(),
        reason: "missing attribute \"kind\"".to_string(),
    })?;
    let kind = TdKind::from_name(kind_name).ok_or_else(|| FormatError::Tree {
        elem:   elem.tag.clone(),
        reason: format!("unknown type kind {kind_name:?}"),
    })?;
    let mut td = TypeDesc::simple(kind);
    if let Some(label) = elem.attr("label") {
        td.label = Some(label.as_bytes().to_vec());
    }
    for member in elem.children_named("Type") {
        let flat = load_type(member, table)?;
        td.children.push(flat);
    }
    // Same-entry pairs (booleans in particular) must dedup to one slot.
    Ok(table.append_flat(td, true))
}

fn load_claims(section: &Element) -> Result<Vec<Claim>> {
    let mut claims = Vec::new();
    for c in section.children_named("Claim") {
        let source = c.attr("source").unwrap_or("unnamed").to_string();
        let range = TableRange {
            shift: c.attr_u32("shift")? as usize,
            count: c.attr_u32("count")? as usize,
        };
        let mut claim = Claim::new(source, range);
        claim.enabled = c.attr("enabled") != Some("0");
        claims.push(claim);
    }
    Ok(claims)
}

/// Replace any previous reconstruction report in the section.
fn write_repair(section: &mut Element, repair: &heap::HeapRepair) {
    section.children.retain(|c| c.tag != "DcoMatch" && c.tag != "Leftover");
    for m in &repair.matches {
        let mut e = Element::new("DcoMatch");
        e.set_attr("shape", m.shape.name());
        e.set_attr("dco_type_index", m.dco_type_index.to_string());
        e.set_attr("ddo_type_index", m.ddo_type_index.to_string());
        if !m.sub_type_indices.is_empty() {
            let subs: Vec<String> = m.sub_type_indices.iter().map(usize::to_string).collect();
            e.set_attr("sub_type_indices", subs.join(","));
        }
        section.push(e);
    }
    for &idx in &repair.leftovers {
        let mut e = Element::new("Leftover");
        e.set_attr("index", idx.to_string());
        section.push(e);
    }
}
