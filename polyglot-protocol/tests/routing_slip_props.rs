//! Property tests for routing slip algebra.

use polyglot_protocol::{RoutingSlip, RoutingSlipError};
use proptest::prelude::*;

fn kernel_uris() -> impl Strategy<Value = Vec<String>> {
    prop::collection::hash_set("[a-z]{1,6}", 0..8).prop_map(|names| {
        names
            .into_iter()
            .map(|n| format!("kernel://host/{n}"))
            .collect()
    })
}

proptest! {
    #[test]
    fn stamping_any_entry_twice_fails(uris in kernel_uris()) {
        let mut slip = RoutingSlip::new();
        for uri in &uris {
            slip.stamp(uri).unwrap();
        }
        for uri in &uris {
            let is_duplicate = matches!(slip.stamp(uri), Err(RoutingSlipError::AlreadyStamped { .. }));
            prop_assert!(is_duplicate);
        }
        prop_assert_eq!(slip.len(), uris.len());
    }

    #[test]
    fn continue_with_is_idempotent(local in kernel_uris(), remote in kernel_uris()) {
        let mut slip = RoutingSlip::from_uris(&local).unwrap();
        let other = RoutingSlip::from_uris(&remote).unwrap();

        let first = slip.continue_with(&other);
        let after_first = slip.clone();
        let second = slip.continue_with(&other);

        match first {
            Ok(()) => {
                // The second call may succeed with nothing to add or report a
                // collision, but it never appends.
                let _ = second;
                prop_assert_eq!(&slip, &after_first);
            }
            Err(_) => {
                prop_assert!(second.is_err());
                prop_assert_eq!(&slip, &RoutingSlip::from_uris(&local).unwrap());
            }
        }
    }

    #[test]
    fn continuing_an_extension_of_self_appends_only_the_suffix(
        prefix in kernel_uris(),
        suffix in kernel_uris(),
    ) {
        let suffix: Vec<String> = suffix.into_iter().filter(|s| !prefix.contains(s)).collect();
        let mut slip = RoutingSlip::from_uris(&prefix).unwrap();
        let extended = RoutingSlip::from_uris(prefix.iter().chain(&suffix)).unwrap();

        slip.continue_with(&extended).unwrap();
        prop_assert_eq!(slip, extended);
    }
}
