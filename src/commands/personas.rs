use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::PersonasArgs;
use crate::pipeline::{PersonaFile, PersonaStore};
use crate::util::{now_utc_string, write_json_pretty};

pub const PERSONA_INVENTORY_FILE: &str = "persona_inventory.json";

#[derive(Debug, Clone, Serialize)]
pub struct PersonaInventoryManifest {
    pub manifest_version: u32,
    pub generated_at: String,
    pub source_directory: String,
    pub file_count: usize,
    pub persona_count: usize,
    pub personas: Vec<String>,
    pub files: Vec<PersonaFile>,
}

pub fn run(args: PersonasArgs) -> Result<()> {
    let manifest = build_manifest(&args.persona_dir)?;

    if args.dry_run {
        info!(
            persona_count = manifest.persona_count,
            file_count = manifest.file_count,
            source = %manifest.source_directory,
            "persona inventory dry-run complete"
        );
        return Ok(());
    }

    let manifest_path = args
        .manifest_path
        .unwrap_or_else(|| default_manifest_path(&args.persona_dir));

    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote persona inventory manifest");
    info!(persona_count = manifest.persona_count, "persona inventory completed");

    Ok(())
}

/// `manifests/` next to the persona directory, so the manifest is never read
/// back as a persona file.
pub fn default_manifest_path(persona_dir: &Path) -> PathBuf {
    persona_dir
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("manifests")
        .join(PERSONA_INVENTORY_FILE)
}

pub fn build_manifest(persona_dir: &Path) -> Result<PersonaInventoryManifest> {
    let store = PersonaStore::load(persona_dir)?;
    if store.is_empty() {
        warn!(path = %persona_dir.display(), "no personas loaded");
    }
    let files = store.files().to_vec();

    Ok(PersonaInventoryManifest {
        manifest_version: 1,
        generated_at: now_utc_string(),
        source_directory: persona_dir.display().to_string(),
        file_count: files.len(),
        persona_count: store.len(),
        personas: store.names().map(str::to_string).collect(),
        files,
    })
}
