//! Property-based tests for the state machine
//!
//! These tests verify key invariants hold across all possible inputs.

use super::*;
use crate::domain::{
    Channel, ChannelDraft, ChannelId, ChannelStatus, ChatId, MediaKind, MediaRef, Order,
    OrderAction, OrderId, OrderStatus, PaymentMethod, Price, PriceList, PrincipalId,
};
use crate::error::BrokerError;
use crate::gate::AdminRights;
use chrono::Utc;
use proptest::prelude::*;

// ============================================================================
// Test Helpers
// ============================================================================

fn test_context() -> ConvContext {
    ConvContext::new(PrincipalId(2), "Alice", false)
}

fn prices() -> PriceList {
    PriceList::parse("post: 100\nstory: 40.50").unwrap()
}

fn channel(id: i64) -> Channel {
    Channel {
        id: ChannelId(id),
        owner_id: PrincipalId(1),
        chat_id: ChatId(-1000 - id),
        title: format!("Channel {id}"),
        username: None,
        status: ChannelStatus::Active,
        prices: prices(),
        created_at: Utc::now(),
    }
}

fn order(id: i64, status: OrderStatus) -> Order {
    Order {
        id: OrderId(id),
        buyer_id: PrincipalId(2),
        channel_id: ChannelId(1),
        ad_type: "post".to_string(),
        price: Price(10_000),
        status,
        payment: None,
        creative: None,
        post: None,
        note: None,
        created_at: Utc::now(),
        paid_at: None,
        posted_at: None,
        completed_at: None,
    }
}

fn is_valid_state(state: &ConvState) -> bool {
    match state {
        ConvState::Idle | ConvState::AwaitingChannelForward => true,
        ConvState::AwaitingPricing { target } => !target.title().is_empty(),
        ConvState::AwaitingAdTypeSelection { prices, .. } => !prices.is_empty(),
        ConvState::AwaitingPurchaseConfirmation { ad_type, price, .. } => {
            !ad_type.is_empty() && price.cents() > 0
        }
        ConvState::AwaitingPaymentSelection { price, .. } => price.cents() > 0,
        ConvState::AwaitingCreativeText { .. } => true,
        ConvState::AwaitingCreativeMedia { text, .. } => !text.trim().is_empty(),
    }
}

fn collaborator_effects(effects: &[Effect]) -> usize {
    effects.iter().filter(|e| e.operation().is_some()).count()
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_order_id() -> impl Strategy<Value = OrderId> {
    (1i64..6).prop_map(OrderId)
}

fn arb_channel_id() -> impl Strategy<Value = ChannelId> {
    (1i64..4).prop_map(ChannelId)
}

fn arb_draft() -> impl Strategy<Value = ChannelDraft> {
    ("[A-Za-z ]{1,20}", -2000i64..-1000).prop_map(|(title, chat)| ChannelDraft {
        chat_id: ChatId(chat),
        title,
        username: None,
    })
}

fn arb_target() -> impl Strategy<Value = PricingTarget> {
    prop_oneof![
        arb_draft().prop_map(|draft| PricingTarget::New { draft }),
        arb_channel_id().prop_map(|channel_id| PricingTarget::Existing {
            channel_id,
            chat_id: ChatId(-1000 - channel_id.0),
            title: format!("Channel {channel_id}"),
        }),
    ]
}

fn arb_state() -> impl Strategy<Value = ConvState> {
    prop_oneof![
        Just(ConvState::Idle),
        Just(ConvState::AwaitingChannelForward),
        arb_target().prop_map(|target| ConvState::AwaitingPricing { target }),
        arb_channel_id().prop_map(|channel_id| ConvState::AwaitingAdTypeSelection {
            channel_id,
            channel_title: format!("Channel {channel_id}"),
            prices: prices(),
        }),
        (arb_channel_id(), prop::sample::select(vec!["post", "story"])).prop_map(
            |(channel_id, ad_type)| ConvState::AwaitingPurchaseConfirmation {
                channel_id,
                channel_title: format!("Channel {channel_id}"),
                ad_type: ad_type.to_string(),
                price: prices().get(ad_type).unwrap(),
            }
        ),
        arb_order_id().prop_map(|order_id| ConvState::AwaitingPaymentSelection {
            order_id,
            price: Price(10_000),
        }),
        arb_order_id().prop_map(|order_id| ConvState::AwaitingCreativeText { order_id }),
        (arb_order_id(), "[a-z]{1,10}")
            .prop_map(|(order_id, text)| ConvState::AwaitingCreativeMedia { order_id, text }),
    ]
}

fn arb_action() -> impl Strategy<Value = Action> {
    prop_oneof![
        Just(Action::MainMenu),
        Just(Action::OwnerMenu),
        Just(Action::AdvertiserMenu),
        Just(Action::AddChannel),
        Just(Action::MyChannels),
        Just(Action::Browse),
        Just(Action::MyOrders),
        arb_channel_id().prop_map(Action::EditPrices),
        arb_channel_id().prop_map(Action::ToggleChannel),
        arb_channel_id().prop_map(Action::SelectChannel),
        prop::sample::select(vec!["post", "story", "banner"])
            .prop_map(|t| Action::SelectAdType(t.to_string())),
        Just(Action::ConfirmPurchase),
        prop::sample::select(PaymentMethod::ALL.to_vec()).prop_map(Action::Pay),
        arb_order_id().prop_map(Action::CancelOrder),
        arb_order_id().prop_map(Action::SubmitCreative),
        Just(Action::SkipMedia),
        arb_order_id().prop_map(Action::Approve),
        arb_order_id().prop_map(Action::Reject),
        arb_order_id().prop_map(Action::ConfirmCompletion),
    ]
}

fn arb_command() -> impl Strategy<Value = Command> {
    prop_oneof![
        Just(Command::Start),
        Just(Command::Help),
        Just(Command::Cancel),
        Just(Command::Browse),
        Just(Command::MyOrders),
        Just(Command::MyChannels),
        arb_order_id().prop_map(Command::Refund),
        (arb_order_id(), proptest::option::of("[a-z ]{1,20}"))
            .prop_map(|(order_id, note)| Command::Reject { order_id, note }),
        Just(Command::Usage("/refund <order id>")),
        "[a-z]{1,8}".prop_map(Command::Unknown),
    ]
}

fn arb_media() -> impl Strategy<Value = MediaRef> {
    (prop::sample::select(vec![MediaKind::Photo, MediaKind::Video]), "[A-Za-z0-9]{4,12}")
        .prop_map(|(kind, file_id)| MediaRef { kind, file_id })
}

fn arb_input_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        arb_command().prop_map(Event::Command),
        arb_action().prop_map(Event::Action),
        arb_draft().prop_map(Event::ForwardedChannel),
        prop_oneof![
            "[a-z]{1,10}: [0-9]{1,4}".boxed(),
            "[a-zA-Z ]{0,30}".boxed(),
        ]
        .prop_map(Event::Text),
        (arb_media(), proptest::option::of("[a-zA-Z ]{0,20}"))
            .prop_map(|(media, caption)| Event::Media { media, caption }),
    ]
}

fn arb_status() -> impl Strategy<Value = OrderStatus> {
    prop::sample::select(OrderStatus::ALL.to_vec())
}

fn arb_order_action() -> impl Strategy<Value = OrderAction> {
    prop::sample::select(OrderAction::ALL.to_vec())
}

fn arb_operation() -> impl Strategy<Value = Operation> {
    prop::sample::select(vec![
        Operation::VerifyChannel,
        Operation::PrepareRepricing,
        Operation::RegisterChannel,
        Operation::RepriceChannel,
        Operation::ToggleChannel,
        Operation::ListChannels,
        Operation::ListOrders,
        Operation::LoadChannel,
        Operation::CreateOrder,
        Operation::PayOrder,
        Operation::CancelOrder,
        Operation::SubmitCreative,
        Operation::Approve,
        Operation::Reject,
        Operation::ConfirmCompletion,
        Operation::Refund,
    ])
}

fn arb_broker_error() -> impl Strategy<Value = BrokerError> {
    prop_oneof![
        Just(BrokerError::validation("bad input")),
        Just(BrokerError::authorization("not yours")),
        Just(BrokerError::conflict("already processed")),
        Just(BrokerError::unavailable("timeout")),
        Just(BrokerError::not_found("gone")),
    ]
}

fn arb_rights() -> impl Strategy<Value = AdminRights> {
    (any::<bool>(), any::<bool>()).prop_map(|(is_admin, can_post)| AdminRights {
        is_admin,
        can_post: is_admin && can_post,
    })
}

fn arb_result_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        (arb_target(), arb_rights())
            .prop_map(|(target, rights)| Event::ChannelVerified { target, rights }),
        (1i64..4, any::<bool>()).prop_map(|(id, created)| Event::ChannelSaved {
            channel: channel(id),
            created,
        }),
        (1i64..4).prop_map(|id| Event::ChannelToggled {
            channel: channel(id)
        }),
        any::<bool>().prop_map(|owned| Event::ChannelsListed {
            channels: vec![channel(1), channel(2)],
            owned,
        }),
        (1i64..6, arb_status()).prop_map(|(id, status)| Event::OrdersListed {
            orders: vec![order(id, status)],
            awaiting_review: vec![],
        }),
        (1i64..4).prop_map(|id| Event::ChannelLoaded {
            channel: channel(id)
        }),
        (1i64..6).prop_map(|id| Event::OrderCreated {
            order: order(id, OrderStatus::PendingPayment),
            channel_title: "Channel 1".to_string(),
        }),
        (1i64..6, arb_status(), arb_order_action()).prop_map(|(id, status, action)| {
            Event::OrderUpdated {
                order: order(id, status),
                action,
            }
        }),
        (arb_operation(), arb_broker_error())
            .prop_map(|(op, error)| Event::OperationFailed { op, error }),
    ]
}

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![3 => arb_input_event(), 2 => arb_result_event()]
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    // Invariant 1: Valid state after any event sequence
    #[test]
    fn prop_transitions_preserve_validity(events in proptest::collection::vec(arb_event(), 0..25)) {
        let mut state = ConvState::Idle;
        let ctx = test_context();

        for event in events {
            let is_input = event.is_input();
            match transition(&state, &ctx, event) {
                Ok(result) => {
                    state = result.new_state;
                    prop_assert!(is_valid_state(&state), "Invalid state: {:?}", state);
                    if is_input {
                        prop_assert!(collaborator_effects(&result.effects) <= 1);
                    } else {
                        // Results only ever produce replies
                        prop_assert_eq!(collaborator_effects(&result.effects), 0);
                    }
                }
                Err(_) => { /* rejected input or stray result is OK */ }
            }
        }
    }

    // Invariant 2: Start-over always reaches Idle with a single reply
    #[test]
    fn prop_start_over_reaches_idle(
        state in arb_state(),
        event in prop_oneof![
            Just(Event::Command(Command::Start)),
            Just(Event::Command(Command::Cancel)),
            Just(Event::Action(Action::MainMenu)),
        ]
    ) {
        let result = transition(&state, &test_context(), event).unwrap();
        prop_assert_eq!(result.new_state, ConvState::Idle);
        prop_assert_eq!(result.effects.len(), 1);
        prop_assert!(matches!(result.effects[0], Effect::Reply(_)));
    }

    // Invariant 3: Principal input is never an invalid transition; it is
    // either handled or answered with a validation message
    #[test]
    fn prop_input_never_invalid_transition(state in arb_state(), event in arb_input_event()) {
        let result = transition(&state, &test_context(), event);
        prop_assert!(!matches!(result, Err(TransitionError::InvalidTransition(_))));
    }

    // Invariant 4: The strict steps accept nothing but their own input
    #[test]
    fn prop_strict_steps_guard_input(
        target in arb_target(),
        event in arb_input_event(),
    ) {
        let allowed = matches!(
            &event,
            Event::Command(Command::Start | Command::Cancel | Command::Help)
                | Event::Action(Action::MainMenu)
        );

        let forward = ConvState::AwaitingChannelForward;
        match transition(&forward, &test_context(), event.clone()) {
            Ok(result) => {
                prop_assert!(allowed || matches!(event, Event::ForwardedChannel(_)));
                if !allowed {
                    prop_assert_eq!(result.new_state, forward);
                }
            }
            Err(e) => prop_assert!(matches!(e, TransitionError::Validation(_))),
        }

        let pricing = ConvState::AwaitingPricing { target };
        match transition(&pricing, &test_context(), event.clone()) {
            Ok(result) => {
                prop_assert!(allowed || matches!(event, Event::Text(_)));
                if !allowed {
                    prop_assert_eq!(&result.new_state, &pricing);
                    let registers = matches!(
                        result.effects[..],
                        [Effect::RegisterChannel { .. } | Effect::RepriceChannel { .. }]
                    );
                    prop_assert!(registers);
                }
            }
            Err(e) => prop_assert!(matches!(e, TransitionError::Validation(_))),
        }
    }

    // Invariant 5: Side operations keep the current step
    #[test]
    fn prop_side_operations_keep_state(
        state in arb_state().prop_filter("lenient states", |s| {
            !matches!(s, ConvState::AwaitingChannelForward | ConvState::AwaitingPricing { .. })
        }),
        action in prop_oneof![
            arb_order_id().prop_map(Action::Approve),
            arb_order_id().prop_map(Action::Reject),
            arb_order_id().prop_map(Action::ConfirmCompletion),
            arb_channel_id().prop_map(Action::ToggleChannel),
            Just(Action::MyOrders),
            Just(Action::MyChannels),
        ]
    ) {
        let result = transition(&state, &test_context(), Event::Action(action)).unwrap();
        prop_assert_eq!(result.new_state, state);
        prop_assert_eq!(collaborator_effects(&result.effects), 1);
    }

    // Invariant 6: Failures end a flow only when they are final
    #[test]
    fn prop_failure_rule(
        state in arb_state(),
        op in arb_operation(),
        error in arb_broker_error(),
    ) {
        let ends_flow = op.is_flow_step() && error.kind().ends_flow();
        let result = transition(
            &state,
            &test_context(),
            Event::OperationFailed { op, error },
        )
        .unwrap();

        if ends_flow {
            prop_assert_eq!(result.new_state, ConvState::Idle);
        } else {
            prop_assert_eq!(result.new_state, state);
        }
        prop_assert!(matches!(result.effects[..], [Effect::Reply(_)]));
    }

    // Invariant 7: Rejected rights never reach the pricing step
    #[test]
    fn prop_pricing_requires_both_rights(draft in arb_draft(), rights in arb_rights()) {
        let result = transition(
            &ConvState::AwaitingChannelForward,
            &test_context(),
            Event::ChannelVerified {
                target: PricingTarget::New { draft },
                rights,
            },
        )
        .unwrap();

        let in_pricing = matches!(result.new_state, ConvState::AwaitingPricing { .. });
        prop_assert_eq!(in_pricing, rights.is_admin && rights.can_post);
    }
}
