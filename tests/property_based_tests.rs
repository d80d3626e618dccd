//! Property-based tests for identity matching and log parsing

use coastline::analyzer::parse_line;
use coastline::sink::format_return;
use coastline::{CodeId, FunctionIdentity, Target};
use proptest::prelude::*;

fn ident(name: String, path: String, line: u32) -> FunctionIdentity {
    FunctionIdentity::new(name, path, line)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_identity_matches_itself(
        name in "[a-z_]{1,12}",
        path in "[a-z/]{1,20}\\.rs",
        line in 0u32..10_000,
        code in proptest::option::of(any::<u64>()),
    ) {
        let mut f = ident(name, path, line);
        f.code = code.map(CodeId::new);
        prop_assert!(f.matches(&f));
    }

    #[test]
    fn prop_wildcard_target_matches_every_line(
        name in "[a-z_]{1,12}",
        path in "[a-z/]{1,20}\\.rs",
        lines in prop::collection::vec(1u32..10_000, 1..20),
    ) {
        let target = Target::new(ident(name.clone(), path.clone(), 0));
        for line in lines {
            prop_assert!(target.matches(&ident(name.clone(), path.clone(), line)));
        }
    }

    #[test]
    fn prop_exact_target_matches_only_its_line(
        name in "[a-z_]{1,12}",
        target_line in 1u32..1000,
        line in 1u32..1000,
    ) {
        let target = Target::new(ident(name.clone(), "src/a.rs".into(), target_line));
        let candidate = ident(name, "src/a.rs".into(), line).with_code(CodeId::new(1));
        prop_assert_eq!(target.matches(&candidate), line == target_line);
    }

    #[test]
    fn prop_resolved_target_keeps_matching(
        name in "[a-z_]{1,12}",
        code in any::<u64>(),
        line in 1u32..1000,
    ) {
        let target = Target::new(ident(name.clone(), "src/a.rs".into(), 0));
        let frame = ident(name.clone(), "src/a.rs".into(), line).with_code(CodeId::new(code));
        prop_assert!(target.matches(&frame));
        prop_assert_eq!(target.resolved(), Some(CodeId::new(code)));
        prop_assert!(target.matches(&frame));
    }

    #[test]
    fn prop_formatted_returns_parse_back(
        t in 0u64..4_000_000_000_000,
        name in "[A-Za-z_][A-Za-z0-9_:]{0,20}",
        path in "[a-z/]{1,20}\\.rs",
        line in 0u32..100_000,
        coast in 0.0f64..100_000.0,
    ) {
        let text = format_return(t, &ident(name.clone(), path.clone(), line), coast);
        let record = parse_line(&text).unwrap();
        prop_assert_eq!(record.timestamp_ms, t);
        prop_assert_eq!(record.name, name);
        prop_assert_eq!(record.path, path);
        prop_assert_eq!(record.line, line);
        prop_assert_eq!(record.duration_ms, coast);
    }

    #[test]
    fn prop_parse_line_never_panics(s in "\\PC*") {
        let _ = parse_line(&s);
    }
}
