//! Property-based tests for cycle ranges, rate specs and parameter maps.

use cyclegen_core::{CycleRange, ParamMap, RateSpec};
use proptest::prelude::*;

proptest! {
    #[test]
    fn prop_range_forms_agree(first in 0u64..1_000_000, len in 1u64..1_000_000) {
        let absolute = CycleRange::parse(&format!("{}..{}", first, first + len)).unwrap();
        let relative = CycleRange::parse(&format!("{first}..+{len}")).unwrap();
        prop_assert_eq!(&absolute, &relative);
        prop_assert_eq!(absolute.count(), len);
        prop_assert!(absolute.contains(first));
        prop_assert!(!absolute.contains(first + len));
    }

    #[test]
    fn prop_inverted_ranges_rejected(a in 0u64..1_000_000, b in 0u64..1_000_000) {
        prop_assume!(a >= b);
        let text = format!("{a}..{b}");
        prop_assert!(CycleRange::parse(&text).is_err());
        prop_assert!(CycleRange::new(a, b).is_err());
    }

    #[test]
    fn prop_kilo_suffix_scales(n in 1u64..1_000_000) {
        let range = CycleRange::parse(&format!("{n}K")).unwrap();
        prop_assert_eq!(range.count(), n * 1_000);
    }

    #[test]
    fn prop_burst_ratio_bound(rate in 1u32..100_000, ratio in 0.0f64..3.0) {
        let parsed = RateSpec::parse(&format!("{rate},{ratio}"));
        prop_assert_eq!(parsed.is_ok(), ratio >= 1.0);
    }

    #[test]
    fn prop_param_map_display_reparses(
        entries in proptest::collection::btree_map("[a-z]{1,8}", "[a-z0-9.]{1,8}", 0..8)
    ) {
        let map: ParamMap = entries.into_iter().collect();
        let reparsed = ParamMap::parse(&map.to_string()).unwrap();
        prop_assert_eq!(reparsed, map);
    }
}
