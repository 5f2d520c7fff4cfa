//! WebAssembly bindings for Aegis
//!
//! Exposes the pure compiler stages to a JavaScript host that drives the
//! browser rule engine itself. Everything crossing the boundary is plain
//! JSON-shaped objects.

use aegis_compiler::{
    build_allowlist_rules as build_allow_rules, compile_network_rules, merge_collections,
    parse_filter_text as parse_text, CompileOutput, CosmeticCollection,
};
use aegis_core::{normalize_host as normalize, ALLOWLIST_RULES, NETWORK_RULES};
use serde::Serialize;
use wasm_bindgen::prelude::*;

/// Per-list numbers reported back to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListStat {
    pub lines: usize,
    pub network_entries: usize,
    pub cosmetic_selectors: usize,
    pub skipped: usize,
}

/// Result of compiling several list texts together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compilation {
    pub output: CompileOutput,
    pub cosmetics: CosmeticCollection,
    pub list_stats: Vec<ListStat>,
}

/// Parse every text, compile all network entries into the network rule
/// range in list order, and merge the cosmetic selectors.
pub fn compile_texts<S: AsRef<str>>(texts: &[S]) -> Compilation {
    let mut entries = Vec::new();
    let mut collections = Vec::with_capacity(texts.len());
    let mut list_stats = Vec::with_capacity(texts.len());

    for text in texts {
        let text = text.as_ref();
        let parsed = parse_text(text);
        list_stats.push(ListStat {
            lines: parsed.diagnostics.line_count,
            network_entries: parsed.network.len(),
            cosmetic_selectors: parsed.cosmetics.selector_count(),
            skipped: parsed.diagnostics.skipped_count,
        });
        entries.extend(parsed.network);
        collections.push(parsed.cosmetics);
    }

    Compilation {
        output: compile_network_rules(&entries, NETWORK_RULES),
        cosmetics: merge_collections(collections),
        list_stats,
    }
}

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    let json = serde_json::to_string(value).map_err(|e| JsValue::from_str(&format!("Failed to encode result: {}", e)))?;
    js_sys::JSON::parse(&json)
}

#[wasm_bindgen]
pub fn parse_filter_text(text: &str) -> Result<JsValue, JsValue> {
    to_js(&parse_text(text))
}

#[wasm_bindgen]
pub fn compile_filter_lists(list_texts: JsValue) -> Result<JsValue, JsValue> {
    let list_array = js_sys::Array::from(&list_texts);
    if list_array.length() == 0 {
        return Err(JsValue::from_str("No list texts provided"));
    }

    let mut texts = Vec::with_capacity(list_array.length() as usize);
    for value in list_array.iter() {
        let text = value
            .as_string()
            .ok_or_else(|| JsValue::from_str("List text must be a string"))?;
        texts.push(text);
    }

    let compilation = compile_texts(&texts);
    let truncated = compilation.output.truncated();
    if truncated > 0 {
        web_sys::console::warn_1(&JsValue::from_str(&format!(
            "Rule budget exhausted, {} entries dropped",
            truncated
        )));
    }

    let js_result = js_sys::Object::new();
    let _ = js_sys::Reflect::set(&js_result, &"rules".into(), &to_js(&compilation.output.rules)?);
    let _ = js_sys::Reflect::set(&js_result, &"errors".into(), &to_js(&compilation.output.errors)?);
    let _ = js_sys::Reflect::set(&js_result, &"nextId".into(), &JsValue::from(compilation.output.next_id));
    let _ = js_sys::Reflect::set(&js_result, &"cosmetics".into(), &to_js(&compilation.cosmetics)?);
    let _ = js_sys::Reflect::set(&js_result, &"truncated".into(), &JsValue::from(truncated as u32));
    let _ = js_sys::Reflect::set(
        &js_result,
        &"regexRejected".into(),
        &JsValue::from(compilation.output.rejected() as u32),
    );

    let list_stats = js_sys::Array::new_with_length(compilation.list_stats.len() as u32);
    for (i, stat) in compilation.list_stats.iter().enumerate() {
        let obj = js_sys::Object::new();
        let _ = js_sys::Reflect::set(&obj, &"lines".into(), &JsValue::from(stat.lines as u32));
        let _ = js_sys::Reflect::set(&obj, &"networkEntries".into(), &JsValue::from(stat.network_entries as u32));
        let _ = js_sys::Reflect::set(&obj, &"cosmeticSelectors".into(), &JsValue::from(stat.cosmetic_selectors as u32));
        let _ = js_sys::Reflect::set(&obj, &"skipped".into(), &JsValue::from(stat.skipped as u32));
        list_stats.set(i as u32, obj.into());
    }
    let _ = js_sys::Reflect::set(&js_result, &"listStats".into(), &list_stats);

    Ok(js_result.into())
}

#[wasm_bindgen]
pub fn build_allowlist_rules(hosts: JsValue) -> Result<JsValue, JsValue> {
    let host_array = js_sys::Array::from(&hosts);
    let hosts: Vec<String> = host_array.iter().filter_map(|v| v.as_string()).collect();
    to_js(&build_allow_rules(&hosts, ALLOWLIST_RULES))
}

/// Normalized hostname, or `undefined` when the input has no host.
#[wasm_bindgen]
pub fn normalize_host(input: &str) -> Option<String> {
    normalize(input)
}
