// options.rs — Construction-time capability options.
//
// Each option is either "allow" (keep the native capability untamed) or any
// other value, which selects the default restrictive behavior. Unknown option
// names are ignored so newer configuration files still load on older builds.

use std::fmt;

use serde::de::{self, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// How one ambient capability is treated in a new environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapabilityMode {
    /// Keep the native capability untamed.
    Allow,
    /// Apply the capability's taming shim (the default).
    #[default]
    Tame,
}

impl CapabilityMode {
    pub fn is_allow(self) -> bool {
        self == CapabilityMode::Allow
    }

    /// Only the exact string `"allow"` allows; everything else tames.
    pub fn parse(value: &str) -> Self {
        if value == "allow" {
            CapabilityMode::Allow
        } else {
            CapabilityMode::Tame
        }
    }
}

impl Serialize for CapabilityMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(match self {
            CapabilityMode::Allow => "allow",
            CapabilityMode::Tame => "tame",
        })
    }
}

impl<'de> Deserialize<'de> for CapabilityMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ModeVisitor)
    }
}

/// Accepts any value: strings are compared against "allow", every other
/// shape (numbers, booleans, tables) means the restrictive default.
struct ModeVisitor;

impl<'de> Visitor<'de> for ModeVisitor {
    type Value = CapabilityMode;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a capability mode")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(CapabilityMode::parse(v))
    }

    fn visit_bool<E: de::Error>(self, _: bool) -> Result<Self::Value, E> {
        Ok(CapabilityMode::Tame)
    }

    fn visit_i64<E: de::Error>(self, _: i64) -> Result<Self::Value, E> {
        Ok(CapabilityMode::Tame)
    }

    fn visit_u64<E: de::Error>(self, _: u64) -> Result<Self::Value, E> {
        Ok(CapabilityMode::Tame)
    }

    fn visit_f64<E: de::Error>(self, _: f64) -> Result<Self::Value, E> {
        Ok(CapabilityMode::Tame)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(CapabilityMode::Tame)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        Ok(CapabilityMode::Tame)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
        Ok(CapabilityMode::Tame)
    }
}

/// The recognized construction options.
///
/// Every field defaults to [`CapabilityMode::Tame`]; an empty table is the
/// most restrictive configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfinementOptions {
    /// Clock queries report wall time when allowed, `NaN` otherwise.
    pub clock_mode: CapabilityMode,
    /// Randomness queries report entropy when allowed, `NaN` otherwise.
    pub random_mode: CapabilityMode,
    /// Locale-aware formatting is removed unless allowed.
    pub locale_mode: CapabilityMode,
    /// Stack/trace hooks are removed unless allowed; allowing also widens
    /// the policy to re-admit them.
    pub diagnostic_mode: CapabilityMode,
    /// Legacy pattern-matching state is removed unless allowed.
    pub pattern_mode: CapabilityMode,
    /// When allowed, a restricted `console` is installed.
    pub output_mode: CapabilityMode,
}

impl ConfinementOptions {
    /// Every option set to allow. Useful for debugging hosts and tests.
    pub fn permissive() -> Self {
        Self {
            clock_mode: CapabilityMode::Allow,
            random_mode: CapabilityMode::Allow,
            locale_mode: CapabilityMode::Allow,
            diagnostic_mode: CapabilityMode::Allow,
            pattern_mode: CapabilityMode::Allow,
            output_mode: CapabilityMode::Allow,
        }
    }
}

/// The capability-specific taming transformations.
///
/// Each shim touches exactly one capability, so application order between
/// shims does not matter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShimKind {
    Clock,
    Random,
    Locale,
    Diagnostic,
    Pattern,
}

impl ShimKind {
    /// The global binding this shim operates on.
    pub fn capability(self) -> &'static str {
        match self {
            ShimKind::Clock => "Date",
            ShimKind::Random => "Math",
            ShimKind::Locale => "Intl",
            ShimKind::Diagnostic => "Error",
            ShimKind::Pattern => "RegExp",
        }
    }
}

impl fmt::Display for ShimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShimKind::Clock => "clock",
            ShimKind::Random => "random",
            ShimKind::Locale => "locale",
            ShimKind::Diagnostic => "diagnostic",
            ShimKind::Pattern => "pattern",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_exact_allow_allows() {
        assert_eq!(CapabilityMode::parse("allow"), CapabilityMode::Allow);
        assert_eq!(CapabilityMode::parse("Allow"), CapabilityMode::Tame);
        assert_eq!(CapabilityMode::parse("deny"), CapabilityMode::Tame);
        assert_eq!(CapabilityMode::parse(""), CapabilityMode::Tame);
    }

    #[test]
    fn defaults_are_restrictive() {
        let options = ConfinementOptions::default();
        assert_eq!(options.clock_mode, CapabilityMode::Tame);
        assert_eq!(options.output_mode, CapabilityMode::Tame);
    }

    #[test]
    fn any_non_string_value_tames() {
        let options: ConfinementOptions = serde_json::from_str(
            r#"{
                "clock_mode": "allow",
                "random_mode": true,
                "locale_mode": 1,
                "diagnostic_mode": {"nested": "allow"},
                "pattern_mode": ["allow"],
                "output_mode": null
            }"#,
        )
        .unwrap();
        assert_eq!(options.clock_mode, CapabilityMode::Allow);
        assert_eq!(options.random_mode, CapabilityMode::Tame);
        assert_eq!(options.locale_mode, CapabilityMode::Tame);
        assert_eq!(options.diagnostic_mode, CapabilityMode::Tame);
        assert_eq!(options.pattern_mode, CapabilityMode::Tame);
        assert_eq!(options.output_mode, CapabilityMode::Tame);
    }

    #[test]
    fn unknown_options_are_ignored() {
        let options: ConfinementOptions =
            serde_json::from_str(r#"{"teleport_mode": "allow", "clock_mode": "allow"}"#).unwrap();
        assert!(options.clock_mode.is_allow());
    }

    #[test]
    fn toml_form_parses() {
        let options: ConfinementOptions =
            toml::from_str("pattern_mode = \"allow\"\nrandom_mode = \"sometimes\"\n").unwrap();
        assert!(options.pattern_mode.is_allow());
        assert!(!options.random_mode.is_allow());
    }

    #[test]
    fn shim_capabilities_are_disjoint() {
        let all = [
            ShimKind::Clock,
            ShimKind::Random,
            ShimKind::Locale,
            ShimKind::Diagnostic,
            ShimKind::Pattern,
        ];
        let names: std::collections::BTreeSet<_> = all.iter().map(|s| s.capability()).collect();
        assert_eq!(names.len(), all.len());
    }
}
