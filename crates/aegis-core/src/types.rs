//! Core type definitions for Aegis
//!
//! These types map directly onto the host engine's declarative rule format
//! and are shared by the compiler and the lifecycle engine.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ts_rs::TS;

// =============================================================================
// Priority Tiers
// =============================================================================

/// Priority tiers for installed rules. Higher wins; tiers never tie.
pub mod priority {
    /// Ordinary list-driven block rule
    pub const BLOCK: u32 = 1;
    /// User allowlist overlay rule
    pub const ALLOWLIST: u32 = 10_000;
    /// `@@` exception rule from a filter list
    pub const EXCEPTION: u32 = 20_000;
    /// The disable-all sentinel
    pub const SENTINEL: u32 = 1_000_000;
}

// =============================================================================
// Rule Actions
// =============================================================================

/// Action type of an installed rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum RuleActionType {
    /// Cancels the matched request
    Block,
    /// Lets the matched request through, overriding lower-priority blocks
    Allow,
}

/// Rule action as the host engine expects it: `{ "type": "block" }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RuleAction {
    #[serde(rename = "type")]
    pub kind: RuleActionType,
}

impl RuleAction {
    pub const fn block() -> Self {
        Self { kind: RuleActionType::Block }
    }

    pub const fn allow() -> Self {
        Self { kind: RuleActionType::Allow }
    }
}

// =============================================================================
// Resource Types (bit mask for option parsing)
// =============================================================================

bitflags::bitflags! {
    /// Resource type set collected while parsing `$` options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResourceTypes: u16 {
        const SCRIPT = 1 << 0;
        const IMAGE = 1 << 1;
        const STYLESHEET = 1 << 2;
        const XMLHTTPREQUEST = 1 << 3;
        const FONT = 1 << 4;
        const MEDIA = 1 << 5;
        const SUB_FRAME = 1 << 6;    // iframe/frame
        const MAIN_FRAME = 1 << 7;   // top-level document
        const OBJECT = 1 << 8;
        const PING = 1 << 9;
        const WEBSOCKET = 1 << 10;
        const CSP_REPORT = 1 << 11;
        const OTHER = 1 << 12;
    }
}

/// A single resource type as named by the host engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ResourceType {
    Script,
    Image,
    Stylesheet,
    Xmlhttprequest,
    Font,
    Media,
    SubFrame,
    MainFrame,
    Object,
    Ping,
    Websocket,
    CspReport,
    Other,
}

impl ResourceType {
    /// Every resource type, in emission order.
    pub const ALL: [ResourceType; 13] = [
        Self::Script,
        Self::Image,
        Self::Stylesheet,
        Self::Xmlhttprequest,
        Self::Font,
        Self::Media,
        Self::SubFrame,
        Self::MainFrame,
        Self::Object,
        Self::Ping,
        Self::Websocket,
        Self::CspReport,
        Self::Other,
    ];

    /// Map a filter option name onto a resource type.
    ///
    /// Accepts the list-syntax aliases (`xhr`, `subdocument`, `document`).
    pub fn from_option_name(name: &str) -> Option<Self> {
        match name {
            "script" => Some(Self::Script),
            "image" => Some(Self::Image),
            "stylesheet" => Some(Self::Stylesheet),
            "xmlhttprequest" | "xhr" => Some(Self::Xmlhttprequest),
            "font" => Some(Self::Font),
            "media" => Some(Self::Media),
            "subdocument" => Some(Self::SubFrame),
            "document" => Some(Self::MainFrame),
            "object" => Some(Self::Object),
            "ping" => Some(Self::Ping),
            "websocket" => Some(Self::Websocket),
            "csp_report" => Some(Self::CspReport),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    /// Name used by the host engine.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::Image => "image",
            Self::Stylesheet => "stylesheet",
            Self::Xmlhttprequest => "xmlhttprequest",
            Self::Font => "font",
            Self::Media => "media",
            Self::SubFrame => "sub_frame",
            Self::MainFrame => "main_frame",
            Self::Object => "object",
            Self::Ping => "ping",
            Self::Websocket => "websocket",
            Self::CspReport => "csp_report",
            Self::Other => "other",
        }
    }

    pub const fn flag(self) -> ResourceTypes {
        match self {
            Self::Script => ResourceTypes::SCRIPT,
            Self::Image => ResourceTypes::IMAGE,
            Self::Stylesheet => ResourceTypes::STYLESHEET,
            Self::Xmlhttprequest => ResourceTypes::XMLHTTPREQUEST,
            Self::Font => ResourceTypes::FONT,
            Self::Media => ResourceTypes::MEDIA,
            Self::SubFrame => ResourceTypes::SUB_FRAME,
            Self::MainFrame => ResourceTypes::MAIN_FRAME,
            Self::Object => ResourceTypes::OBJECT,
            Self::Ping => ResourceTypes::PING,
            Self::Websocket => ResourceTypes::WEBSOCKET,
            Self::CspReport => ResourceTypes::CSP_REPORT,
            Self::Other => ResourceTypes::OTHER,
        }
    }
}

impl ResourceTypes {
    /// Member types in a stable order, deduplicated by construction.
    pub fn types(self) -> impl Iterator<Item = ResourceType> {
        ResourceType::ALL
            .into_iter()
            .filter(move |t| self.contains(t.flag()))
    }
}

impl From<ResourceType> for ResourceTypes {
    fn from(value: ResourceType) -> Self {
        value.flag()
    }
}

impl Serialize for ResourceTypes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.types())
    }
}

impl<'de> Deserialize<'de> for ResourceTypes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let types = Vec::<ResourceType>::deserialize(deserializer)?;
        Ok(types.into_iter().fold(Self::empty(), |acc, t| acc | t.flag()))
    }
}

// =============================================================================
// Domain Type
// =============================================================================

/// First-party / third-party constraint (`$third-party`, `$~third-party`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum DomainType {
    FirstParty,
    ThirdParty,
}

// =============================================================================
// Compiled Rule
// =============================================================================

/// Match condition of an installed rule.
///
/// Empty constraint lists are omitted entirely: an absent field means
/// "unconstrained", which is not the same as an empty set to the host engine.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RuleCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub url_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub regex_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub is_url_filter_case_sensitive: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_types: Vec<ResourceType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub initiator_domains: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_initiator_domains: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_domains: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_request_domains: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub domain_type: Option<DomainType>,
}

impl RuleCondition {
    /// Condition matching every URL.
    pub fn match_all() -> Self {
        Self {
            regex_filter: Some(".*".to_string()),
            ..Self::default()
        }
    }
}

/// A declarative rule ready to hand to the host rule engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CompiledRule {
    pub id: u32,
    pub priority: u32,
    pub action: RuleAction,
    pub condition: RuleCondition,
}

impl CompiledRule {
    pub fn is_allow(&self) -> bool {
        self.action.kind == RuleActionType::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_tiers_are_strictly_ordered() {
        assert!(priority::BLOCK < priority::ALLOWLIST);
        assert!(priority::ALLOWLIST < priority::EXCEPTION);
        assert!(priority::EXCEPTION < priority::SENTINEL);
    }

    #[test]
    fn option_aliases_map_to_host_names() {
        assert_eq!(ResourceType::from_option_name("xhr"), Some(ResourceType::Xmlhttprequest));
        assert_eq!(ResourceType::from_option_name("subdocument").map(ResourceType::as_str), Some("sub_frame"));
        assert_eq!(ResourceType::from_option_name("document").map(ResourceType::as_str), Some("main_frame"));
        assert_eq!(ResourceType::from_option_name("beacon"), None);
    }

    #[test]
    fn resource_type_set_iterates_in_stable_order() {
        let set = ResourceTypes::OTHER | ResourceTypes::SCRIPT | ResourceTypes::IMAGE;
        let types: Vec<_> = set.types().collect();
        assert_eq!(types, vec![ResourceType::Script, ResourceType::Image, ResourceType::Other]);
    }

    #[test]
    fn resource_type_set_serializes_as_names() {
        let set = ResourceTypes::SUB_FRAME | ResourceTypes::SCRIPT;
        let json = serde_json::to_string(&set).expect("serialize");
        assert_eq!(json, r#"["script","sub_frame"]"#);
        let back: ResourceTypes = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, set);
    }

    #[test]
    fn empty_condition_fields_are_omitted() {
        let rule = CompiledRule {
            id: 7,
            priority: priority::BLOCK,
            action: RuleAction::block(),
            condition: RuleCondition {
                url_filter: Some("||ads.example.com^".to_string()),
                ..RuleCondition::default()
            },
        };
        let json = serde_json::to_value(&rule).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({
                "id": 7,
                "priority": 1,
                "action": { "type": "block" },
                "condition": { "urlFilter": "||ads.example.com^" }
            })
        );
    }
}
