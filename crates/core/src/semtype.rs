//! The epistemic type model and its fixed compatibility matrix.
//!
//! Equality of user-defined types is nominal: two types with identical
//! structure but different names are unrelated. Epistemic kinds encode the
//! knowledge status of a value; `Uncertainty` is assignable anywhere but
//! taints whatever consumes it.

use std::collections::BTreeMap;

use crate::ast::{TypeDef, TypeExpr};

/// The epistemic kinds with dedicated rules in the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Epistemic {
    FactualClaim,
    Opinion,
    Uncertainty,
    Speculation,
    CitedFact,
}

impl Epistemic {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "FactualClaim" => Some(Epistemic::FactualClaim),
            "Opinion" => Some(Epistemic::Opinion),
            "Uncertainty" => Some(Epistemic::Uncertainty),
            "Speculation" => Some(Epistemic::Speculation),
            "CitedFact" => Some(Epistemic::CitedFact),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Epistemic::FactualClaim => "FactualClaim",
            Epistemic::Opinion => "Opinion",
            Epistemic::Uncertainty => "Uncertainty",
            Epistemic::Speculation => "Speculation",
            Epistemic::CitedFact => "CitedFact",
        }
    }
}

/// A resolved semantic type.
#[derive(Debug, Clone, PartialEq)]
pub enum SemType {
    Nominal(String),
    Refined {
        base: Box<SemType>,
        lo: f64,
        hi: f64,
    },
    Epistemic(Epistemic),
    List(Box<SemType>),
    Optional(Box<SemType>),
}

impl SemType {
    /// The surface name used in diagnostics and the compatibility matrix.
    pub fn display_name(&self) -> String {
        match self {
            SemType::Nominal(n) => n.clone(),
            SemType::Refined { base, .. } => base.display_name(),
            SemType::Epistemic(e) => e.name().to_string(),
            SemType::List(inner) => format!("List<{}>", inner.display_name()),
            SemType::Optional(inner) => format!("{}?", inner.display_name()),
        }
    }

    pub fn is_uncertainty(&self) -> bool {
        match self {
            SemType::Epistemic(Epistemic::Uncertainty) => true,
            SemType::Optional(inner) => inner.is_uncertainty(),
            _ => false,
        }
    }

    /// True when the type is, or contains, `Uncertainty` (a
    /// `List<Uncertainty>` taints its consumers like a bare one).
    pub fn carries_uncertainty(&self) -> bool {
        match self {
            SemType::Epistemic(Epistemic::Uncertainty) => true,
            SemType::List(inner) | SemType::Optional(inner) => inner.carries_uncertainty(),
            _ => false,
        }
    }
}

/// Built-in scalar and content type names.
pub const BUILTIN_TYPES: [&str; 20] = [
    "String",
    "Integer",
    "Float",
    "Boolean",
    "Duration",
    "List",
    "Document",
    "Chunk",
    "EntityMap",
    "Summary",
    "Translation",
    "RiskScore",
    "ConfidenceScore",
    "SentimentScore",
    "ReasoningChain",
    "Contradiction",
    "StructuredReport",
    "FactualClaim",
    "Opinion",
    "Uncertainty",
];

/// Whether a name resolves without a user declaration.
pub fn is_builtin(name: &str) -> bool {
    BUILTIN_TYPES.contains(&name) || matches!(name, "Speculation" | "CitedFact")
}

/// Built-in range bounds for ranged analysis types.
pub fn builtin_range(name: &str) -> Option<(f64, f64)> {
    match name {
        "RiskScore" | "ConfidenceScore" => Some((0.0, 1.0)),
        "SentimentScore" => Some((-1.0, 1.0)),
        _ => None,
    }
}

/// Resolve a surface type expression against the user type table.
pub fn resolve(expr: &TypeExpr, user_types: &BTreeMap<String, TypeDef>) -> SemType {
    let base = resolve_name(&expr.name, expr.generic.as_deref(), user_types);
    if expr.optional {
        SemType::Optional(Box::new(base))
    } else {
        base
    }
}

fn resolve_name(
    name: &str,
    generic: Option<&str>,
    user_types: &BTreeMap<String, TypeDef>,
) -> SemType {
    if name == "List" {
        let inner = generic
            .map(|g| resolve_name(g, None, user_types))
            .unwrap_or_else(|| SemType::Nominal("String".to_string()));
        return SemType::List(Box::new(inner));
    }
    if let Some(e) = Epistemic::from_name(name) {
        return SemType::Epistemic(e);
    }
    if let Some((lo, hi)) = builtin_range(name) {
        return SemType::Refined {
            base: Box::new(SemType::Nominal(name.to_string())),
            lo,
            hi,
        };
    }
    if let Some(def) = user_types.get(name) {
        if let Some((lo, hi)) = def.range {
            return SemType::Refined {
                base: Box::new(SemType::Nominal(name.to_string())),
                lo,
                hi,
            };
        }
    }
    SemType::Nominal(name.to_string())
}

/// Outcome of an assignability query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignability {
    /// The source may substitute for the target.
    Ok,
    /// Assignable, but the consumer's output must widen to `Uncertainty`.
    Taint,
    /// Statically rejected.
    Reject,
}

/// Allowed substitutions: (source, target) pairs.
const ALLOWED: [(&str, &str); 5] = [
    ("FactualClaim", "String"),
    ("FactualClaim", "CitedFact"),
    ("RiskScore", "Float"),
    ("ConfidenceScore", "Float"),
    ("SentimentScore", "Float"),
];

/// Hard incompatibilities: (source, target) pairs rejected statically.
const REJECTED: [(&str, &str); 7] = [
    ("Opinion", "FactualClaim"),
    ("Opinion", "CitedFact"),
    ("Speculation", "FactualClaim"),
    ("Speculation", "CitedFact"),
    ("Float", "RiskScore"),
    ("Float", "ConfidenceScore"),
    ("Float", "SentimentScore"),
];

/// May `source` be used where `target` is expected?
pub fn assignable(source: &SemType, target: &SemType) -> Assignability {
    // Uncertainty goes anywhere but is infectious.
    if source.carries_uncertainty() {
        return Assignability::Taint;
    }

    match (source, target) {
        // Optional targets accept the bare inner type.
        (_, SemType::Optional(t_inner)) => {
            if let SemType::Optional(s_inner) = source {
                assignable(s_inner, t_inner)
            } else {
                assignable(source, t_inner)
            }
        }
        // Optional sources do not satisfy non-optional targets.
        (SemType::Optional(_), _) => Assignability::Reject,

        (SemType::List(s_inner), SemType::List(t_inner)) => assignable(s_inner, t_inner),
        (SemType::List(_), _) | (_, SemType::List(_)) => Assignability::Reject,

        _ => assignable_by_name(&base_name(source), &base_name(target)),
    }
}

fn base_name(t: &SemType) -> String {
    match t {
        SemType::Nominal(n) => n.clone(),
        SemType::Refined { base, .. } => base_name(base),
        SemType::Epistemic(e) => e.name().to_string(),
        SemType::List(_) | SemType::Optional(_) => t.display_name(),
    }
}

fn assignable_by_name(source: &str, target: &str) -> Assignability {
    if source == target {
        return Assignability::Ok;
    }
    if REJECTED.contains(&(source, target)) {
        return Assignability::Reject;
    }
    if ALLOWED.contains(&(source, target)) {
        return Assignability::Ok;
    }
    // A structured report satisfies any output contract.
    if source == "StructuredReport" {
        return Assignability::Ok;
    }
    // Everything else is nominal: names must match.
    Assignability::Reject
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nominal(name: &str) -> SemType {
        SemType::Nominal(name.to_string())
    }

    fn epistemic(name: &str) -> SemType {
        SemType::Epistemic(Epistemic::from_name(name).unwrap())
    }

    #[test]
    fn identity_is_compatible() {
        assert_eq!(assignable(&nominal("Party"), &nominal("Party")), Assignability::Ok);
    }

    #[test]
    fn nominal_types_with_different_names_are_unrelated() {
        assert_eq!(assignable(&nominal("PartyA"), &nominal("PartyB")), Assignability::Reject);
        assert_eq!(assignable(&nominal("PartyB"), &nominal("PartyA")), Assignability::Reject);
    }

    #[test]
    fn allowed_substitutions() {
        assert_eq!(
            assignable(&epistemic("FactualClaim"), &nominal("String")),
            Assignability::Ok
        );
        assert_eq!(
            assignable(&epistemic("FactualClaim"), &epistemic("CitedFact")),
            Assignability::Ok
        );
        let risk = SemType::Refined {
            base: Box::new(nominal("RiskScore")),
            lo: 0.0,
            hi: 1.0,
        };
        assert_eq!(assignable(&risk, &nominal("Float")), Assignability::Ok);
    }

    #[test]
    fn hard_incompatibilities() {
        assert_eq!(
            assignable(&epistemic("Opinion"), &epistemic("FactualClaim")),
            Assignability::Reject
        );
        assert_eq!(
            assignable(&epistemic("Speculation"), &epistemic("CitedFact")),
            Assignability::Reject
        );
        assert_eq!(
            assignable(&nominal("Float"), &nominal("RiskScore")),
            Assignability::Reject
        );
    }

    #[test]
    fn uncertainty_taints_everything() {
        assert_eq!(
            assignable(&epistemic("Uncertainty"), &epistemic("FactualClaim")),
            Assignability::Taint
        );
        let list_unc = SemType::List(Box::new(epistemic("Uncertainty")));
        assert_eq!(
            assignable(&list_unc, &SemType::List(Box::new(epistemic("FactualClaim")))),
            Assignability::Taint
        );
    }

    #[test]
    fn list_covariance() {
        let list_fact = SemType::List(Box::new(epistemic("FactualClaim")));
        let list_string = SemType::List(Box::new(nominal("String")));
        let list_opinion = SemType::List(Box::new(epistemic("Opinion")));
        assert_eq!(assignable(&list_fact, &list_string), Assignability::Ok);
        assert_eq!(
            assignable(&list_opinion, &SemType::List(Box::new(epistemic("FactualClaim")))),
            Assignability::Reject
        );
    }

    #[test]
    fn optional_accepts_bare_but_not_reverse() {
        let opt = SemType::Optional(Box::new(nominal("String")));
        assert_eq!(assignable(&nominal("String"), &opt), Assignability::Ok);
        assert_eq!(assignable(&opt, &nominal("String")), Assignability::Reject);
    }

    #[test]
    fn builtin_ranges() {
        assert_eq!(builtin_range("RiskScore"), Some((0.0, 1.0)));
        assert_eq!(builtin_range("SentimentScore"), Some((-1.0, 1.0)));
        assert_eq!(builtin_range("String"), None);
    }
}
