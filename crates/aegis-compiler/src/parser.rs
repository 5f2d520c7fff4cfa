use std::borrow::Cow;
use std::collections::BTreeSet;

use aegis_core::types::{DomainType, ResourceType, ResourceTypes};
use serde::{Deserialize, Serialize};

use crate::cosmetic::CosmeticCollection;

/// Modifiers the rule engine cannot express. Dropped without a trace.
const UNSUPPORTED_MODIFIERS: [&str; 6] = ["badfilter", "rewrite", "redirect", "popup", "important", "permissions"];

/// Include/exclude sets for one domain axis.
///
/// A domain is in at most one of the two sets; excluding a domain that was
/// previously included moves it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DomainConstraint {
    pub include: BTreeSet<String>,
    pub exclude: BTreeSet<String>,
}

impl DomainConstraint {
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    fn add_include(&mut self, domain: String) {
        if !self.exclude.contains(&domain) {
            self.include.insert(domain);
        }
    }

    fn add_exclude(&mut self, domain: String) {
        self.include.remove(&domain);
        self.exclude.insert(domain);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkOptions {
    pub resource_types: ResourceTypes,
    /// `domain=` / `from-domain=`
    pub initiator: DomainConstraint,
    /// `to-domain=`
    pub request: DomainConstraint,
    pub domain_type: Option<DomainType>,
    pub match_case: bool,
    /// Unrecognized option tokens, kept for forward compatibility.
    pub flags: BTreeSet<String>,
}

/// A parsed request-blocking directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRuleEntry {
    /// Plain URL-matching pattern, or a `/regex/` body with its delimiters.
    pub pattern: String,
    pub is_exception: bool,
    pub options: NetworkOptions,
    /// 1-based line number in the source text
    pub line: usize,
}

impl NetworkRuleEntry {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            is_exception: false,
            options: NetworkOptions::default(),
            line: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseDiagnostics {
    pub line_count: usize,
    pub comment_count: usize,
    /// Lines recognized but not supported, or malformed.
    pub skipped_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedFilterList {
    pub network: Vec<NetworkRuleEntry>,
    pub cosmetics: CosmeticCollection,
    pub diagnostics: ParseDiagnostics,
}

/// Parse filter list text into network entries and cosmetic selectors.
///
/// Never fails: anything that can't be understood is counted in
/// `diagnostics.skipped_count` and dropped.
pub fn parse_filter_text(text: &str) -> ParsedFilterList {
    let mut parsed = ParsedFilterList::default();

    for (index, raw_line) in text.lines().enumerate() {
        parsed.diagnostics.line_count += 1;

        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        if is_comment_line(line) {
            parsed.diagnostics.comment_count += 1;
            continue;
        }

        if is_unsupported_cosmetic(line) {
            parsed.diagnostics.skipped_count += 1;
            continue;
        }

        if line.contains("##") {
            if !parse_cosmetic_line(line, &mut parsed.cosmetics) {
                parsed.diagnostics.skipped_count += 1;
            }
            continue;
        }

        match parse_network_line(line, index + 1) {
            Some(entry) => parsed.network.push(entry),
            None => parsed.diagnostics.skipped_count += 1,
        }
    }

    parsed
}

fn is_comment_line(line: &str) -> bool {
    // `[Adblock Plus 2.0]` style headers are not rules either
    line.starts_with('!') || line.starts_with('[')
}

/// Cosmetic exceptions (`#@#`), scriptlets and advanced operators (`#$#`, `#%#`).
fn is_unsupported_cosmetic(line: &str) -> bool {
    line.contains("#@") || line.contains("#$") || line.contains("#%")
}

fn parse_cosmetic_line(line: &str, cosmetics: &mut CosmeticCollection) -> bool {
    let line = collapse_hash_run(line);
    let Some((domain_part, selector_part)) = line.split_once("##") else {
        return false;
    };

    let selector = sanitize_selector(selector_part);
    if selector.is_empty() {
        return false;
    }

    let domains: Vec<String> = domain_part
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_lowercase)
        .collect();

    if domains.is_empty() {
        cosmetics.insert_global(selector);
    } else {
        for domain in domains {
            cosmetics.insert_for_domain(domain, selector.clone());
        }
    }

    true
}

/// Collapse the first run of three or more `#` into `##`.
fn collapse_hash_run(line: &str) -> Cow<'_, str> {
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'#' {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && bytes[i] == b'#' {
            i += 1;
        }
        if i - start >= 3 {
            return Cow::Owned(format!("{}##{}", &line[..start], &line[i..]));
        }
    }
    Cow::Borrowed(line)
}

fn sanitize_selector(selector: &str) -> String {
    selector
        .chars()
        .filter(|&c| c != '<' && c != '>')
        .collect::<String>()
        .trim()
        .to_string()
}

fn parse_network_line(line: &str, line_number: usize) -> Option<NetworkRuleEntry> {
    if line.ends_with("$badfilter") {
        return None;
    }

    let (is_exception, rest) = match line.strip_prefix("@@") {
        Some(rest) => (true, rest),
        None => (false, line),
    };

    let (pattern_part, options_text) = split_rule_options(rest);
    let pattern = pattern_part.trim();
    if pattern.is_empty() {
        return None;
    }

    Some(NetworkRuleEntry {
        pattern: pattern.to_string(),
        is_exception,
        options: options_text.map(parse_options).unwrap_or_default(),
        line: line_number,
    })
}

fn split_rule_options(line: &str) -> (&str, Option<&str>) {
    match line.find('$') {
        Some(pos) => (&line[..pos], Some(&line[pos + 1..])),
        None => (line, None),
    }
}

fn parse_options(text: &str) -> NetworkOptions {
    let mut options = NetworkOptions::default();

    for raw in text.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let token = raw.to_ascii_lowercase();
        let token = token.as_str();

        if token == "third-party" {
            options.domain_type = Some(DomainType::ThirdParty);
            continue;
        }

        if token == "~third-party" {
            options.domain_type = Some(DomainType::FirstParty);
            continue;
        }

        if token == "match-case" {
            options.match_case = true;
            continue;
        }

        if let Some(value) = token.strip_prefix("domain=").or_else(|| token.strip_prefix("from-domain=")) {
            parse_domain_option(value, &mut options.initiator);
            continue;
        }

        if let Some(value) = token.strip_prefix("to-domain=") {
            parse_domain_option(value, &mut options.request);
            continue;
        }

        let name = token.replacen('-', "_", 1);

        if let Some(resource_type) = ResourceType::from_option_name(&name) {
            options.resource_types |= resource_type.flag();
            continue;
        }

        if !UNSUPPORTED_MODIFIERS.contains(&name.as_str()) {
            options.flags.insert(name);
        }
    }

    options
}

fn parse_domain_option(value: &str, constraint: &mut DomainConstraint) {
    for raw in value.split('|') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        match raw.strip_prefix('~') {
            Some(domain) if !domain.is_empty() => constraint.add_exclude(domain.to_lowercase()),
            Some(_) => {}
            None => constraint.add_include(raw.to_lowercase()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_input_yields_empty_result() {
        let parsed = parse_filter_text("");
        assert!(parsed.network.is_empty());
        assert!(parsed.cosmetics.is_empty());
        assert_eq!(parsed.diagnostics.skipped_count, 0);
    }

    #[test]
    fn parses_domain_scoped_script_rule() {
        let parsed = parse_filter_text("||ads.example.com^$script,domain=foo.com|~bar.com");
        assert_eq!(parsed.network.len(), 1);

        let entry = &parsed.network[0];
        assert_eq!(entry.pattern, "||ads.example.com^");
        assert!(!entry.is_exception);
        assert_eq!(entry.options.resource_types, ResourceTypes::SCRIPT);
        assert_eq!(entry.options.initiator.include, set(&["foo.com"]));
        assert_eq!(entry.options.initiator.exclude, set(&["bar.com"]));
        assert!(entry.options.request.is_empty());
        assert_eq!(entry.line, 1);
    }

    #[test]
    fn skips_comments_and_headers() {
        let parsed = parse_filter_text("[Adblock Plus 2.0]\n! Title: test\n\n||ads.com^\n");
        assert_eq!(parsed.network.len(), 1);
        assert_eq!(parsed.diagnostics.comment_count, 2);
        assert_eq!(parsed.diagnostics.line_count, 4);
        assert_eq!(parsed.network[0].line, 4);
    }

    #[test]
    fn handles_crlf_line_endings() {
        let parsed = parse_filter_text("||a.com^\r\n||b.com^\r\n");
        let patterns: Vec<_> = parsed.network.iter().map(|e| e.pattern.as_str()).collect();
        assert_eq!(patterns, vec!["||a.com^", "||b.com^"]);
    }

    #[test]
    fn exception_prefix_is_stripped() {
        let parsed = parse_filter_text("@@||cdn.example.com^$image");
        let entry = &parsed.network[0];
        assert!(entry.is_exception);
        assert_eq!(entry.pattern, "||cdn.example.com^");
        assert_eq!(entry.options.resource_types, ResourceTypes::IMAGE);
    }

    #[test]
    fn empty_patterns_are_skipped() {
        let parsed = parse_filter_text("@@\n$script\n@@$image");
        assert!(parsed.network.is_empty());
        assert_eq!(parsed.diagnostics.skipped_count, 3);
    }

    #[test]
    fn badfilter_lines_are_skipped() {
        let parsed = parse_filter_text("||ads.com^$badfilter\n@@||ads.com^$badfilter\n||ads.com^");
        assert_eq!(parsed.network.len(), 1);
        assert_eq!(parsed.diagnostics.skipped_count, 2);
    }

    #[test]
    fn unsupported_cosmetics_are_skipped_not_misparsed() {
        let text = "example.com#@#.ad\nexample.com#$#abort-on-property-read foo\nexample.com#%#//scriptlet('x')\nexample.com##+js(noop)";
        let parsed = parse_filter_text(text);
        assert!(parsed.network.is_empty());
        assert_eq!(parsed.diagnostics.skipped_count, 3);
        // `##+js(...)` is a plain `##` line as far as the grammar goes
        assert_eq!(parsed.cosmetics.selectors_for("example.com"), Some(&set(&["+js(noop)"])));
    }

    #[test]
    fn global_and_domain_cosmetics() {
        let parsed = parse_filter_text("##.banner\nExample.com, news.org ##.sidebar-ad\n###sponsor");
        assert_eq!(parsed.cosmetics.global, set(&[".banner", "#sponsor"]));
        assert_eq!(parsed.cosmetics.selectors_for("example.com"), Some(&set(&[".sidebar-ad"])));
        assert_eq!(parsed.cosmetics.selectors_for("news.org"), Some(&set(&[".sidebar-ad"])));
    }

    #[test]
    fn triple_hash_collapses_before_split() {
        let parsed = parse_filter_text("example.com###ad-slot");
        assert_eq!(parsed.cosmetics.selectors_for("example.com"), Some(&set(&["ad-slot"])));
    }

    #[test]
    fn selectors_are_sanitized() {
        let parsed = parse_filter_text("##div > .ad<script>\n##<>");
        assert_eq!(parsed.cosmetics.global, set(&["div  .adscript"]));
        assert_eq!(parsed.diagnostics.skipped_count, 1);
    }

    #[test]
    fn excluded_cosmetic_domain_is_kept_literally() {
        let parsed = parse_filter_text("example.com,~sub.example.com##.banner-ad");
        assert_eq!(parsed.cosmetics.selectors_for("example.com"), Some(&set(&[".banner-ad"])));
        assert_eq!(parsed.cosmetics.selectors_for("~sub.example.com"), Some(&set(&[".banner-ad"])));
        assert!(parsed.cosmetics.global.is_empty());
    }

    #[test]
    fn classifies_option_tokens() {
        let parsed = parse_filter_text(
            "/ads/$third-party,match-case,xhr,subdocument,document,csp_report,to-domain=cdn.com|~safe.cdn.com,important,popup,redirect,generichide,Frame-Src",
        );
        let options = &parsed.network[0].options;
        assert_eq!(options.domain_type, Some(DomainType::ThirdParty));
        assert!(options.match_case);
        assert_eq!(
            options.resource_types,
            ResourceTypes::XMLHTTPREQUEST | ResourceTypes::SUB_FRAME | ResourceTypes::MAIN_FRAME | ResourceTypes::CSP_REPORT
        );
        assert_eq!(options.request.include, set(&["cdn.com"]));
        assert_eq!(options.request.exclude, set(&["safe.cdn.com"]));
        assert_eq!(options.flags, set(&["generichide", "frame_src"]));
    }

    #[test]
    fn first_party_and_from_domain() {
        let parsed = parse_filter_text("||tracker.net^$~third-party,from-domain=A.com|b.com");
        let options = &parsed.network[0].options;
        assert_eq!(options.domain_type, Some(DomainType::FirstParty));
        assert_eq!(options.initiator.include, set(&["a.com", "b.com"]));
    }

    #[test]
    fn domain_is_never_both_included_and_excluded() {
        let parsed = parse_filter_text("||x.com^$domain=a.com|~a.com\n||y.com^$domain=~b.com|b.com");
        for entry in &parsed.network {
            assert!(entry.options.initiator.include.is_disjoint(&entry.options.initiator.exclude));
        }
        assert_eq!(parsed.network[0].options.initiator.exclude, set(&["a.com"]));
        assert_eq!(parsed.network[1].options.initiator.exclude, set(&["b.com"]));
        assert!(parsed.network[1].options.initiator.include.is_empty());
    }

    #[test]
    fn options_split_on_first_dollar() {
        let parsed = parse_filter_text("||example.com/ad$script,$image");
        let entry = &parsed.network[0];
        assert_eq!(entry.pattern, "||example.com/ad");
        assert_eq!(entry.options.resource_types, ResourceTypes::SCRIPT);
        assert_eq!(entry.options.flags, set(&["$image"]));
    }
}
