use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

pub fn now_utc_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn utc_compact_string(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%SZ").to_string()
}

pub fn ensure_directory(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory: {}", path.display()))
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("failed to open file for hashing: {}", path.display()))?;

    let mut hasher = Sha256::new();
    let mut buf = [0_u8; 8192];

    loop {
        let count = file
            .read(&mut buf)
            .with_context(|| format!("failed to read file for hashing: {}", path.display()))?;
        if count == 0 {
            break;
        }
        hasher.update(&buf[..count]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }

    let data = serde_json::to_vec_pretty(value)
        .with_context(|| format!("failed to serialize json: {}", path.display()))?;

    let mut file = File::create(path)
        .with_context(|| format!("failed to create json file: {}", path.display()))?;
    file.write_all(&data)
        .with_context(|| format!("failed to write json file: {}", path.display()))?;
    file.write_all(b"\n")
        .with_context(|| format!("failed to finalize json file: {}", path.display()))?;

    Ok(())
}

/// Best-effort ASCII folding for the accented characters that show up in the
/// accounting exports. Non-foldable non-ASCII characters are dropped.
pub fn fold_ascii(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            'à' | 'â' | 'ä' | 'á' | 'ã' => out.push('a'),
            'À' | 'Â' | 'Ä' | 'Á' => out.push('A'),
            'é' | 'è' | 'ê' | 'ë' => out.push('e'),
            'É' | 'È' | 'Ê' | 'Ë' => out.push('E'),
            'î' | 'ï' | 'í' => out.push('i'),
            'Î' | 'Ï' => out.push('I'),
            'ô' | 'ö' | 'ó' | 'õ' => out.push('o'),
            'Ô' | 'Ö' => out.push('O'),
            'ù' | 'û' | 'ü' | 'ú' => out.push('u'),
            'Ù' | 'Û' | 'Ü' => out.push('U'),
            'ç' => out.push('c'),
            'Ç' => out.push('C'),
            'ñ' => out.push('n'),
            'ÿ' => out.push('y'),
            'œ' => out.push_str("oe"),
            'Œ' => out.push_str("OE"),
            'æ' => out.push_str("ae"),
            'Æ' => out.push_str("AE"),
            _ if ch.is_ascii() => out.push(ch),
            _ => {}
        }
    }
    out
}

/// Filesystem-safe slug: ASCII-folded, non-word characters stripped,
/// whitespace and dash runs collapsed to a single dash.
pub fn slugify(input: &str) -> String {
    let folded = fold_ascii(input);

    let mut out = String::with_capacity(folded.len());
    let mut separator_pending = false;
    for ch in folded.trim().chars() {
        if ch == '-' || ch.is_ascii_whitespace() {
            separator_pending = true;
            continue;
        }
        if !ch.is_ascii_alphanumeric() && ch != '_' {
            continue;
        }
        if separator_pending && !out.is_empty() {
            out.push('-');
        }
        separator_pending = false;
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_ascii_transliterates_accents() {
        assert_eq!(fold_ascii("Mélèze & Cie"), "Meleze & Cie");
        assert_eq!(fold_ascii("Cœur d'Açaï"), "Coeur d'Acai");
    }

    #[test]
    fn slugify_collapses_separators_and_strips_symbols() {
        assert_eq!(slugify("4010_Atelier Méca - Nord"), "4010_Atelier-Meca-Nord");
        assert_eq!(slugify("  Société  (Sud)  "), "Societe-Sud");
    }

    #[test]
    fn slugify_keeps_underscores() {
        assert_eq!(slugify("AC12_Dupont"), "AC12_Dupont");
    }
}
