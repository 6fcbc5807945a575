use std::net::Ipv4Addr;

use proptest::prelude::*;

use ipoe::CorrelationKey;

fn optional_bytes() -> impl Strategy<Value = Option<Box<[u8]>>> {
    prop::option::of(prop::collection::vec(any::<u8>(), 0..4).prop_map(Vec::into_boxed_slice))
}

// Small domains so that equal and unequal keys both show up often.
fn key() -> impl Strategy<Value = CorrelationKey> {
    (
        0u32..3,
        prop::sample::select(vec![Ipv4Addr::UNSPECIFIED, Ipv4Addr::new(192, 0, 2, 1)]),
        optional_bytes(),
        optional_bytes(),
        optional_bytes(),
        prop::sample::select(vec![[2u8, 0, 0, 0, 0, 1], [2u8, 0, 0, 0, 0, 2]]),
    )
        .prop_map(
            |(xid, giaddr, agent_circuit_id, agent_remote_id, client_id, hwaddr)| CorrelationKey {
                xid,
                giaddr,
                agent_circuit_id,
                agent_remote_id,
                client_id,
                hwaddr,
            },
        )
}

proptest! {
    #[test]
    fn matching_is_symmetric(a in key(), b in key()) {
        prop_assert_eq!(a.matches(&b), b.matches(&a));
    }

    #[test]
    fn matching_equals_field_identity(a in key(), b in key()) {
        prop_assert_eq!(a.matches(&b), a == b);
    }

    #[test]
    fn key_matches_itself(a in key()) {
        prop_assert!(a.matches(&a.clone()));
    }

    #[test]
    fn dropping_an_optional_field_breaks_the_match(a in key()) {
        prop_assume!(a.agent_circuit_id.is_some());
        let stripped = CorrelationKey { agent_circuit_id: None, ..a.clone() };
        prop_assert!(!a.matches(&stripped));
        prop_assert!(!stripped.matches(&a));
    }
}
