use std::fs;
use std::path::Path;
use std::time::Instant;

use aegis_compiler::{compile_network_rules, merge_collections, parse_filter_text, CompileOutput, CosmeticCollection};
use aegis_core::NETWORK_RULES;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct CompileStats {
    pub lines: usize,
    pub network_entries: usize,
    pub skipped_lines: usize,
    pub rules: usize,
    pub truncated: usize,
    pub regex_rejected: usize,
    pub cosmetic_selectors: usize,
    pub total_ms: f64,
}

#[derive(Debug)]
pub struct CompiledLists {
    pub output: CompileOutput,
    pub cosmetics: CosmeticCollection,
    pub stats: CompileStats,
}

/// Parse every input file, compile the network entries in input order into
/// the network rule range, and merge the cosmetic selectors.
pub fn compile_lists(inputs: &[String], verbose: bool) -> Result<CompiledLists, String> {
    if inputs.is_empty() {
        return Err("No input files specified".to_string());
    }

    let start = Instant::now();
    let mut entries = Vec::new();
    let mut collections = Vec::with_capacity(inputs.len());
    let mut lines = 0usize;
    let mut skipped_lines = 0usize;

    for (index, path) in inputs.iter().enumerate() {
        let content = fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;
        let parsed = parse_filter_text(&content);

        if verbose {
            println!(
                "  [{}] {} - {} lines, {} network, {} cosmetic, {} skipped",
                index,
                Path::new(path).file_name().unwrap_or_default().to_string_lossy(),
                parsed.diagnostics.line_count,
                parsed.network.len(),
                parsed.cosmetics.selector_count(),
                parsed.diagnostics.skipped_count,
            );
        }

        lines += parsed.diagnostics.line_count;
        skipped_lines += parsed.diagnostics.skipped_count;
        entries.extend(parsed.network);
        collections.push(parsed.cosmetics);
    }

    let output = compile_network_rules(&entries, NETWORK_RULES);
    let cosmetics = merge_collections(collections);

    let stats = CompileStats {
        lines,
        network_entries: entries.len(),
        skipped_lines,
        rules: output.rules.len(),
        truncated: output.truncated(),
        regex_rejected: output.rejected(),
        cosmetic_selectors: cosmetics.selector_count(),
        total_ms: start.elapsed().as_secs_f64() * 1000.0,
    };

    Ok(CompiledLists { output, cosmetics, stats })
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| format!("Failed to create '{}': {}", parent.display(), e))?;
        }
    }
    let json = serde_json::to_string_pretty(value).map_err(|e| format!("Failed to encode '{}': {}", path.display(), e))?;
    fs::write(path, json).map_err(|e| format!("Failed to write '{}': {}", path.display(), e))
}
