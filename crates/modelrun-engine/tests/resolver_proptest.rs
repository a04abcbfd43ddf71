use modelrun_engine::config::{parser, validator};
use modelrun_engine::namelist::NamelistStore;
use modelrun_engine::ResourceResolver;
use modelrun_types::{uri, NamelistDocument, NamelistSection, NamelistValue};
use proptest::prelude::*;

fn section(pairs: &[(String, i64)]) -> NamelistSection {
    pairs
        .iter()
        .map(|(k, v)| (k.clone(), NamelistValue::from(*v)))
        .collect()
}

proptest! {
    #[test]
    fn plain_paths_resolve_unchanged(path in "[a-zA-Z0-9_./-]{0,40}") {
        let resolver = ResourceResolver::new();
        prop_assert_eq!(resolver.resolve(&path).expect("plain path must resolve"), path);
    }

    #[test]
    fn registered_token_expands_prefix(
        name in "[A-Z][A-Z0-9_]{0,12}",
        real in "/[a-z0-9_/]{1,30}",
        rest in "(/[a-z0-9_.]{1,10}){0,3}",
    ) {
        let token = uri::token(&name);
        let mut resolver = ResourceResolver::new();
        resolver.register(&token, real.clone()).expect("generated token must register");

        let resolved = resolver.resolve(&format!("{token}{rest}")).expect("must resolve");
        prop_assert_eq!(resolved, format!("{real}{rest}"));
    }

    #[test]
    fn chained_tokens_resolve_to_innermost(depth in 1_usize..6) {
        let mut resolver = ResourceResolver::new();
        resolver.register(&uri::token("L0"), "/base").unwrap();
        for level in 1..=depth {
            let inner = uri::token(&format!("L{}", level - 1));
            resolver
                .register(&uri::token(&format!("L{level}")), format!("{inner}/d{level}"))
                .unwrap();
        }

        let resolved = resolver.resolve(&uri::token(&format!("L{depth}"))).unwrap();
        let expected: String = std::iter::once("/base".to_string())
            .chain((1..=depth).map(|level| format!("/d{level}")))
            .collect();
        prop_assert_eq!(resolved, expected);
    }

    #[test]
    fn update_merges_sections_shallowly(
        base in proptest::collection::vec(("[a-f]", any::<i64>()), 0..6),
        incoming in proptest::collection::vec(("[a-f]", any::<i64>()), 0..6),
    ) {
        let mut store = NamelistStore::new();
        store.register_id("nl");
        let mut first = NamelistDocument::new();
        first.insert("grp".into(), section(&base));
        store.update(first, "nl").unwrap();
        let mut second = NamelistDocument::new();
        second.insert("grp".into(), section(&incoming));
        store.update(second, "nl").unwrap();

        let merged = store.get("nl").unwrap();
        let grp = &merged["grp"];
        let incoming = section(&incoming);
        for (key, value) in section(&base) {
            let expected = incoming.get(&key).unwrap_or(&value);
            prop_assert_eq!(&grp[&key], expected);
        }
        for (key, value) in &incoming {
            prop_assert_eq!(&grp[key], value);
        }
    }

    #[test]
    fn mpi_requires_single_token_command(args in 1_usize..4, cores in 0_u32..3) {
        let command = if args == 1 {
            "./wrf.exe".to_string()
        } else {
            format!("[{}]", vec!["./wrf.exe"; args].join(", "))
        };
        let yaml = format!(
            r#"
version: "1.0"
pipeline: prop_mpi
stages:
  - name: wrf
    kind: command
    command: {command}
    mpi:
      cores: {cores}
"#
        );

        let config = parser::parse_pipeline_str(&yaml).expect("generated yaml must parse");
        let result = validator::validate_pipeline(&config);

        if args == 1 && cores > 0 {
            prop_assert!(result.is_ok());
        } else {
            prop_assert!(result.is_err());
        }
    }
}
