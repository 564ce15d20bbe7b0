//! Random operation sequences never break the session invariants.

use proptest::prelude::*;
use tether_core::{Client, ClientConfig, ConnectionState, InboundEvent};

#[derive(Debug, Clone)]
enum Op {
    Connect,
    Authenticate(Option<String>, String),
    Join(String),
    Leave,
    Publish(Vec<u8>),
    SendToPeer(String, Vec<u8>),
    RenewToken(String),
    Disconnect,
}

fn ident() -> impl Strategy<Value = String> {
    prop_oneof![Just(String::new()), "[a-z]{1,6}"]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Connect),
        (proptest::option::of(ident()), ident()).prop_map(|(t, p)| Op::Authenticate(t, p)),
        ident().prop_map(Op::Join),
        Just(Op::Leave),
        proptest::collection::vec(any::<u8>(), 0..8).prop_map(Op::Publish),
        (ident(), proptest::collection::vec(any::<u8>(), 0..8))
            .prop_map(|(t, p)| Op::SendToPeer(t, p)),
        ident().prop_map(Op::RenewToken),
        Just(Op::Disconnect),
    ]
}

fn apply(client: &mut Client, op: &Op) -> bool {
    match op {
        Op::Connect => client.connect().is_ok(),
        Op::Authenticate(token, participant) => {
            client.authenticate(token.as_deref(), participant).is_ok()
        }
        Op::Join(channel) => client.join_channel(channel).is_ok(),
        Op::Leave => client.leave_channel().is_ok(),
        Op::Publish(payload) => client.publish_to_channel(payload.clone()).is_ok(),
        Op::SendToPeer(target, payload) => client.send_to_peer(target, payload.clone()).is_ok(),
        Op::RenewToken(token) => client.renew_token(token).is_ok(),
        Op::Disconnect => client.disconnect().is_ok(),
    }
}

proptest! {
    #[test]
    fn invariants_hold_after_every_operation(ops in proptest::collection::vec(op(), 0..40)) {
        let mut client =
            Client::simulated(ClientConfig::new("A", "u1"), |_: &InboundEvent| {}).unwrap();

        for op in &ops {
            let before = client.state();
            let accepted = apply(&mut client, op);
            let after = client.state();

            // Membership exists exactly in ChannelJoined.
            prop_assert_eq!(client.channel().is_some(), after == ConnectionState::ChannelJoined);
            // A participant exists exactly when authenticated.
            prop_assert_eq!(client.participant_id().is_some(), after.is_authenticated());

            if !accepted {
                // Only a refused rejoin may move the state on failure.
                let refused_rejoin = matches!(op, Op::Join(_))
                    && before == ConnectionState::ChannelJoined
                    && after == ConnectionState::Authenticated;
                prop_assert!(after == before || refused_rejoin);
            }

            match (before, after) {
                (ConnectionState::Disconnected, ConnectionState::Authenticated)
                | (ConnectionState::Disconnected, ConnectionState::ChannelJoined)
                | (ConnectionState::Connected, ConnectionState::ChannelJoined) => {
                    prop_assert!(false, "skipped a state: {:?} -> {:?}", before, after);
                }
                _ => {}
            }

            if matches!(op, Op::Disconnect) {
                prop_assert_eq!(after, ConnectionState::Disconnected);
            }
        }
    }
}
