//! Permission set algebra.
//!
//! Stateless functions that merge permission and metadata sources and
//! evaluate a requested permission list against an effective set.
//!
//! Tokens are plain strings with two reserved forms:
//!
//! - `"*"` grants everything
//! - `"-name"` explicitly denies `name`
//!
//! There is no other pattern matching.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// The grant-all token.
pub const WILDCARD: &str = "*";

/// Prefix marking a negated token.
pub const NEGATION_PREFIX: char = '-';

/// How the wildcard interacts with negated tokens during evaluation.
///
/// `Compatible` keeps the historical ordering: a `"*"` anywhere in the
/// effective set satisfies every request before negations are consulted, so a
/// blanket grant overrides an explicit `"-name"`. That ordering over-grants
/// and is kept only because existing permission files depend on it.
/// `NegationFirst` consults negations first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WildcardPrecedence {
    /// `"*"` short-circuits before negation is checked.
    #[default]
    Compatible,
    /// `"-name"` denies `name` even when `"*"` is present.
    NegationFirst,
}

/// The negated form of a token.
pub fn negate(token: &str) -> String {
    let mut negated = String::with_capacity(token.len() + 1);
    negated.push(NEGATION_PREFIX);
    negated.push_str(token);
    negated
}

/// Whether the token is a negation.
pub fn is_negation(token: &str) -> bool {
    token.starts_with(NEGATION_PREFIX)
}

/// Union of permission sources. Order does not affect the result.
pub fn merge<I, S, T>(sources: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: IntoIterator<Item = T>,
    T: Into<String>,
{
    let mut merged = BTreeSet::new();
    for source in sources {
        merged.extend(source.into_iter().map(Into::into));
    }
    merged
}

/// Overlay of metadata sources. Later sources win on key collisions.
pub fn merge_metadata<I, S, K, V>(sources: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = S>,
    S: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut merged = BTreeMap::new();
    for source in sources {
        for (key, value) in source {
            merged.insert(key.into(), value.into());
        }
    }
    merged
}

/// Check every requested token against an effective set.
///
/// An empty request is always granted.
pub fn matches_all<S: AsRef<str>>(
    effective: &BTreeSet<String>,
    requested: &[S],
    precedence: WildcardPrecedence,
) -> bool {
    if requested.is_empty() {
        return true;
    }

    let wildcard = effective.contains(WILDCARD);

    match precedence {
        WildcardPrecedence::Compatible => {
            if wildcard {
                return true;
            }
            requested.iter().all(|p| granted(effective, p.as_ref()))
        }
        WildcardPrecedence::NegationFirst => requested.iter().all(|p| {
            let p = p.as_ref();
            if effective.contains(&negate(p)) {
                return false;
            }
            wildcard || effective.contains(p)
        }),
    }
}

fn granted(effective: &BTreeSet<String>, token: &str) -> bool {
    effective.contains(token) && !effective.contains(&negate(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(tokens: &[&str]) -> BTreeSet<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_empty_request_is_granted() {
        let empty: [&str; 0] = [];
        assert!(matches_all(&set(&[]), &empty, WildcardPrecedence::Compatible));
        assert!(matches_all(&set(&["-x"]), &empty, WildcardPrecedence::NegationFirst));
    }

    #[test]
    fn test_plain_grant_and_negation() {
        let p = WildcardPrecedence::Compatible;
        assert!(!matches_all(&set(&[]), &["x"], p));
        assert!(matches_all(&set(&["x"]), &["x"], p));
        assert!(!matches_all(&set(&["x", "-x"]), &["x"], p));
        assert!(!matches_all(&set(&["-x"]), &["x"], p));
    }

    #[test]
    fn test_all_tokens_required() {
        let effective = set(&["a", "b"]);
        assert!(matches_all(&effective, &["a", "b"], WildcardPrecedence::Compatible));
        assert!(!matches_all(&effective, &["a", "c"], WildcardPrecedence::Compatible));
    }

    #[test]
    fn test_wildcard_short_circuits_in_compatible_mode() {
        let effective = set(&["*", "-fly"]);
        assert!(matches_all(&effective, &["anything"], WildcardPrecedence::Compatible));
        assert!(matches_all(&effective, &["fly"], WildcardPrecedence::Compatible));
    }

    #[test]
    fn test_negation_first_overrides_wildcard() {
        let effective = set(&["*", "-fly"]);
        assert!(matches_all(&effective, &["anything"], WildcardPrecedence::NegationFirst));
        assert!(!matches_all(&effective, &["fly"], WildcardPrecedence::NegationFirst));
        assert!(!matches_all(&effective, &["build", "fly"], WildcardPrecedence::NegationFirst));
    }

    #[test]
    fn test_negation_is_textual() {
        assert_eq!(negate("fly"), "-fly");
        assert!(is_negation("-fly"));
        assert!(!is_negation("fly"));
        // "-fly" does not revoke "fly.fast"
        let effective = set(&["fly.fast", "-fly"]);
        assert!(matches_all(&effective, &["fly.fast"], WildcardPrecedence::Compatible));
    }

    #[test]
    fn test_merge_is_union() {
        let a = set(&["a", "b"]);
        let b = set(&["b", "c"]);
        assert_eq!(merge([&a, &b]), set(&["a", "b", "c"]));
        assert_eq!(merge([&b, &a]), merge([&a, &b]));
    }

    #[test]
    fn test_merge_metadata_later_wins() {
        let mut base = BTreeMap::new();
        base.insert("prefix".to_string(), "[guest]".to_string());
        base.insert("color".to_string(), "gray".to_string());

        let mut top = BTreeMap::new();
        top.insert("prefix".to_string(), "[vip]".to_string());

        let merged = merge_metadata([&base, &top]);
        assert_eq!(merged["prefix"], "[vip]");
        assert_eq!(merged["color"], "gray");
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn tokens() -> impl Strategy<Value = BTreeSet<String>> {
            prop::collection::btree_set("-?[a-c]{1,2}|\\*", 0..6)
        }

        proptest! {
            #[test]
            fn merge_ignores_source_order(a in tokens(), b in tokens(), c in tokens()) {
                prop_assert_eq!(merge([&a, &b, &c]), merge([&c, &a, &b]));
            }

            #[test]
            fn adding_a_negation_never_grants_more(effective in tokens(), token in "[a-c]{1,2}") {
                let mut negated = effective.clone();
                negated.insert(negate(&token));
                for precedence in [WildcardPrecedence::Compatible, WildcardPrecedence::NegationFirst] {
                    if matches_all(&negated, &[&token], precedence) {
                        prop_assert!(matches_all(&effective, &[&token], precedence));
                    }
                }
            }
        }
    }
}
