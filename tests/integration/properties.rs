//! Property-based tests for rule application
//!
//! Filler text is drawn from `[a-m ]`, so it can never spell `needle`
//! and the occurrence count of a generated document is known up front.

use proptest::prelude::*;
use textpatch::{
    apply_rule, Matcher, PatchError, PatchSet, Replacement, RuleOptions, RuleStatus, Scope,
    SubstitutionRule,
};

fn document_with(fillers: &[String]) -> String {
    fillers.join("needle")
}

fn filler() -> impl Strategy<Value = String> {
    "[a-m ]{0,20}"
}

proptest! {
    #[test]
    fn optional_rule_without_match_leaves_document_unchanged(doc in "[a-m \n]{0,200}") {
        let rule = SubstitutionRule::literal("absent", "ZZZ", "x", Scope::All)
            .unwrap()
            .optional();

        let outcome = apply_rule(&doc, &rule).unwrap();
        prop_assert_eq!(&*outcome.document, doc.as_str());
        prop_assert_eq!(outcome.status, RuleStatus::Skipped);
        prop_assert!(!outcome.matched());
    }

    #[test]
    fn required_rule_without_match_names_the_rule(doc in "[a-m \n]{0,200}") {
        let rule = SubstitutionRule::literal("must-match", "ZZZ", "x", Scope::First).unwrap();

        match apply_rule(&doc, &rule) {
            Err(PatchError::RuleNotMatched { rule }) => prop_assert_eq!(rule, "must-match"),
            other => prop_assert!(false, "expected RuleNotMatched, got {:?}", other),
        }
    }

    #[test]
    fn required_miss_ignores_replacement_text(
        prefix in "[a-m \n]{0,100}",
        suffix in "[a-m \n]{0,100}",
    ) {
        // The replacement text is in the document; the matcher is not.
        let doc = format!("{prefix}label{suffix}");
        let rule = SubstitutionRule::literal("must-match", "ZZZ", "label", Scope::All).unwrap();

        match apply_rule(&doc, &rule) {
            Err(PatchError::RuleNotMatched { rule }) => prop_assert_eq!(rule, "must-match"),
            other => prop_assert!(false, "expected RuleNotMatched, got {:?}", other),
        }
    }

    #[test]
    fn scope_all_replaces_every_occurrence(fillers in prop::collection::vec(filler(), 2..8)) {
        let doc = document_with(&fillers);
        let expected = fillers.len() - 1;
        let rule = SubstitutionRule::literal("all", "needle", "thread", Scope::All).unwrap();

        let outcome = apply_rule(&doc, &rule).unwrap();
        prop_assert_eq!(outcome.occurrences(), expected);
        prop_assert_eq!(outcome.document.matches("needle").count(), 0);
        prop_assert_eq!(outcome.document.matches("thread").count(), expected);
    }

    #[test]
    fn scope_first_replaces_exactly_one(fillers in prop::collection::vec(filler(), 2..8)) {
        let doc = document_with(&fillers);
        let before = fillers.len() - 1;
        let rule = SubstitutionRule::literal("first", "needle", "thread", Scope::First).unwrap();

        let outcome = apply_rule(&doc, &rule).unwrap();
        prop_assert_eq!(outcome.occurrences(), 1);
        prop_assert_eq!(outcome.document.matches("needle").count(), before - 1);
        let expected_prefix = format!("{}thread", fillers[0]);
        prop_assert!(outcome.document.starts_with(&expected_prefix));
    }

    #[test]
    fn reapplying_a_set_is_a_no_op(fillers in prop::collection::vec(filler(), 2..8)) {
        let doc = document_with(&fillers);
        let set = PatchSet::new(
            "props",
            vec![
                SubstitutionRule::with_options(
                    "rename",
                    Matcher::literal("needle"),
                    Replacement::Text("thread".to_string()),
                    Scope::All,
                    RuleOptions {
                        required: true,
                        applied_marker: Some("thread".to_string()),
                    },
                )
                .unwrap(),
                SubstitutionRule::pattern("spaces", "  +", " ", Scope::All)
                    .unwrap()
                    .optional(),
            ],
        )
        .unwrap();

        let once = set.apply(&doc);
        prop_assert!(once.is_success());

        let twice = set.apply(&once.document);
        prop_assert!(twice.is_success());
        prop_assert_eq!(&twice.document, &once.document);
        prop_assert!(twice.rules.iter().all(|r| !r.status.matched()));
        prop_assert!(set.check_idempotent(&doc).is_ok());
    }
}
