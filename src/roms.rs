//! Discovery of ROM images in the configured search directory.

use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Error, Result};

const ROM_EXTENSIONS: [&str; 2] = ["gb", "gbc"];

fn is_rom(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ROM_EXTENSIONS.iter().any(|r| ext.eq_ignore_ascii_case(r)))
}

/// `.gb`/`.gbc` files directly inside `dir`, sorted by path.
pub fn find_roms(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| Error::io(e, format!("listing ROMs in {}", dir.display())))?;

    let mut roms: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_rom(path))
        .collect();
    roms.sort();
    debug!("Found {} ROM(s) in {}", roms.len(), dir.display());
    Ok(roms)
}
