use anyhow::Result;
use bson::doc;
use ironbeam_mongo::io::mongo::{Limit, split};
use ironbeam_mongo::testing::*;
use ironbeam_mongo::{CountBasis, DataContext, ExecMode, ReadMongoOptions, read_mongo};
use proptest::prelude::*;

fn read_all(
    m: i32,
    n: usize,
    basis: CountBasis,
    filter_below: Option<i32>,
) -> Result<ironbeam_mongo::MaterializedDataset> {
    let (_, connector) = seeded_connector("db", "coll", numeric_docs(0..m));
    let ctx = DataContext::default()
        .with_exec_mode(ExecMode::Sequential)
        .with_count_basis(basis);
    let mut opts = ReadMongoOptions::new(TEST_URI, "db", "coll")
        .with_schema(numeric_schema())
        .with_override_num_blocks(n);
    if let Some(k) = filter_below {
        opts = opts.with_pipeline(vec![doc! { "$match": { "int_field": { "$lt": k } } }]);
    }
    read_mongo(connector, &ctx, opts)?.materialize()
}

fn count_basis() -> impl Strategy<Value = CountBasis> {
    prop_oneof![Just(CountBasis::Estimated), Just(CountBasis::Exact)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn split_windows_are_contiguous(total in 0u64..10_000, n in 1usize..300) {
        let windows = split(total, n);
        prop_assert_eq!(windows.len(), n);
        prop_assert_eq!(windows[0].skip, 0);
        for pair in windows.windows(2) {
            prop_assert_eq!(pair[0].end(), Some(pair[1].skip));
        }
        prop_assert_eq!(windows[n - 1].limit, Limit::Remainder);
        prop_assert_eq!(windows.iter().map(|w| w.rows_within(total)).sum::<u64>(), total);
    }

    #[test]
    fn every_document_is_read_exactly_once(
        m in 0i32..40,
        n in 1usize..60,
        basis in count_basis(),
    ) {
        let ds = read_all(m, n, basis, None).unwrap();
        let expected: Vec<i64> = (0..i64::from(m)).collect();
        assert_disjoint_cover(&ds, "int_field", &expected);

        let m = usize::try_from(m).unwrap();
        let blocks = match basis {
            CountBasis::Estimated => n,
            CountBasis::Exact => n.min(m.max(1)),
        };
        prop_assert_eq!(ds.num_blocks(), blocks);
    }

    #[test]
    fn filtered_reads_cover_only_matches(
        m in 1i32..40,
        k in 0i32..45,
        n in 1usize..20,
        basis in count_basis(),
    ) {
        let ds = read_all(m, n, basis, Some(k)).unwrap();
        let expected: Vec<i64> = (0..i64::from(k.min(m))).collect();
        assert_disjoint_cover(&ds, "int_field", &expected);
    }
}
