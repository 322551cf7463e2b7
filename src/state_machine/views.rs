//! Reply rendering
//!
//! Builds the messages and keyboards the conversation sends back. Pure
//! functions over domain values so transitions stay free of I/O.

use super::event::Action;
use super::state::PricingTarget;
use crate::domain::{
    Channel, ChannelStatus, Order, OrderAction, OrderId, OrderStatus, PaymentMethod, Price,
};
use crate::messaging::{Button, OutboundMessage};

const SEPARATOR: &str = "━━━━━━━━━━━━━━━━━━━━";

fn menu_button() -> Button {
    Button::new("🏠 Main menu", Action::MainMenu)
}

pub fn main_menu(name: &str) -> OutboundMessage {
    OutboundMessage::text(format!(
        "👋 Welcome, {name}!\n\n\
         Buy and sell ad slots in channels.\n\
         {SEPARATOR}\n\
         👑 Channel owners list a channel, set prices and approve ads.\n\
         💼 Advertisers pick a channel, pay and send their creative."
    ))
    .with_column([
        Button::new("👑 I own a channel", Action::OwnerMenu),
        Button::new("💼 I want to advertise", Action::AdvertiserMenu),
        Button::new("📦 My orders", Action::MyOrders),
    ])
}

pub fn owner_menu() -> OutboundMessage {
    OutboundMessage::text("👑 Channel owner menu").with_column([
        Button::new("➕ Add channel", Action::AddChannel),
        Button::new("📺 My channels", Action::MyChannels),
        menu_button(),
    ])
}

pub fn advertiser_menu() -> OutboundMessage {
    OutboundMessage::text("💼 Advertiser menu").with_column([
        Button::new("🔍 Browse channels", Action::Browse),
        Button::new("📦 My orders", Action::MyOrders),
        menu_button(),
    ])
}

pub fn help() -> OutboundMessage {
    OutboundMessage::text(
        "ℹ️ Commands\n\n\
         /start – main menu\n\
         /browse – channels accepting ads\n\
         /myorders – your orders and reviews waiting for you\n\
         /mychannels – channels you listed\n\
         /reject <order> [reason] – reject a creative with a reason\n\
         /cancel – leave the current step\n\
         /help – this message",
    )
    .with_row(vec![menu_button()])
}

// ============================================================================
// Channels
// ============================================================================

pub fn forward_prompt() -> OutboundMessage {
    OutboundMessage::text(
        "➕ Add a channel\n\n\
         1. Add this bot to your channel as an administrator\n\
         2. Allow it to post messages\n\
         3. Forward any message from the channel here",
    )
    .with_row(vec![Button::new("❌ Cancel", Action::MainMenu)])
}

pub fn pricing_prompt(target: &PricingTarget) -> OutboundMessage {
    let intro = match target {
        PricingTarget::New { .. } => format!("✅ Verified! I can post in {}.", target.title()),
        PricingTarget::Existing { .. } => format!("✏️ New prices for {}.", target.title()),
    };
    OutboundMessage::text(format!(
        "{intro}\n\n\
         Send your prices in USD, one ad type per line:\n\
         post: 100\n\
         story: 40.50"
    ))
    .with_row(vec![Button::new("❌ Cancel", Action::MainMenu)])
}

pub fn channel_saved(channel: &Channel, created: bool) -> OutboundMessage {
    let headline = if created {
        format!("🎉 {} is now listed!", channel.title)
    } else {
        format!("💾 Prices for {} updated.", channel.title)
    };
    OutboundMessage::text(format!("{headline}\n\n{}", channel.prices.summary())).with_column([
        Button::new("📺 My channels", Action::MyChannels),
        menu_button(),
    ])
}

pub fn channel_toggled(channel: &Channel) -> OutboundMessage {
    let text = match channel.status {
        ChannelStatus::Active => format!("▶️ {} is accepting orders again.", channel.title),
        ChannelStatus::Inactive => format!("⏸ {} is hidden from advertisers.", channel.title),
    };
    OutboundMessage::text(text).with_row(vec![Button::new("📺 My channels", Action::MyChannels)])
}

fn cheapest(channel: &Channel) -> Option<Price> {
    channel.prices.iter().map(|(_, p)| p).min()
}

pub fn channel_list(channels: &[Channel], owned: bool) -> OutboundMessage {
    if channels.is_empty() {
        let (text, next) = if owned {
            ("📺 You haven't listed any channels yet.", Action::AddChannel)
        } else {
            ("🔍 No channels are accepting ads right now.", Action::MainMenu)
        };
        let label = if owned { "➕ Add channel" } else { "🏠 Main menu" };
        return OutboundMessage::text(text).with_row(vec![Button::new(label, next)]);
    }

    if owned {
        let mut message = OutboundMessage::text(format!(
            "📺 Your channels\n{SEPARATOR}\n{}",
            channels
                .iter()
                .map(|c| format!(
                    "{} ({}) · {}\n{}",
                    c.title,
                    c.handle(),
                    c.status.as_str(),
                    c.prices.summary()
                ))
                .collect::<Vec<_>>()
                .join("\n\n")
        ));
        for channel in channels {
            let toggle = match channel.status {
                ChannelStatus::Active => "⏸ Pause",
                ChannelStatus::Inactive => "▶️ Resume",
            };
            message = message.with_row(vec![
                Button::new(
                    format!("✏️ {}", channel.title),
                    Action::EditPrices(channel.id),
                ),
                Button::new(toggle, Action::ToggleChannel(channel.id)),
            ]);
        }
        return message.with_row(vec![menu_button()]);
    }

    OutboundMessage::text(format!(
        "🔍 Channels accepting ads\n{SEPARATOR}\nPick one to see its prices."
    ))
    .with_column(channels.iter().map(|c| {
        let from = cheapest(c).map(|p| format!(" · from {p}")).unwrap_or_default();
        Button::new(format!("📺 {}{from}", c.title), Action::SelectChannel(c.id))
    }))
    .with_row(vec![menu_button()])
}

pub fn ad_type_menu(channel: &Channel) -> OutboundMessage {
    OutboundMessage::text(format!(
        "📺 {} ({})\n{SEPARATOR}\nChoose an ad type:",
        channel.title,
        channel.handle()
    ))
    .with_column(channel.prices.iter().map(|(ad_type, price)| {
        Button::new(
            format!("{ad_type} · {price}"),
            Action::SelectAdType(ad_type.to_string()),
        )
    }))
    .with_row(vec![Button::new("◀️ Back", Action::Browse)])
}

pub fn purchase_summary(channel_title: &str, ad_type: &str, price: Price) -> OutboundMessage {
    OutboundMessage::text(format!(
        "🛒 Order summary\n{SEPARATOR}\n\
         Channel: {channel_title}\n\
         Ad type: {ad_type}\n\
         Price: {price}"
    ))
    .with_row(vec![
        Button::new("✅ Confirm", Action::ConfirmPurchase),
        Button::new("❌ Cancel", Action::MainMenu),
    ])
}

// ============================================================================
// Orders
// ============================================================================

pub fn payment_menu(order_id: OrderId, price: Price) -> OutboundMessage {
    OutboundMessage::text(format!(
        "📦 Order #{order_id} created.\n\nAmount due: {price}\nChoose a payment method:"
    ))
    .with_row(
        PaymentMethod::ALL
            .into_iter()
            .map(|method| {
                let label = match method {
                    PaymentMethod::Card => "💳 Card",
                    PaymentMethod::Crypto => "🪙 Crypto",
                };
                Button::new(label, Action::Pay(method))
            })
            .collect(),
    )
    .with_row(vec![Button::new(
        "❌ Cancel order",
        Action::CancelOrder(order_id),
    )])
}

pub fn creative_text_prompt(order_id: OrderId) -> OutboundMessage {
    OutboundMessage::text(format!(
        "✏️ Order #{order_id}: send the text of your ad.\n\n\
         You can also send a photo or video with the text as its caption."
    ))
}

pub fn creative_media_prompt() -> OutboundMessage {
    OutboundMessage::text("🖼️ Now send a photo or video for your ad, or skip it.")
        .with_row(vec![Button::new("⏭ Skip", Action::SkipMedia)])
}

pub fn creative_submitted(order: &Order) -> OutboundMessage {
    OutboundMessage::text(format!(
        "📤 Creative for order #{} sent to the channel owner for review.\n\
         I'll let you know when it's published.",
        order.id
    ))
    .with_row(vec![menu_button()])
}

/// Reply after a lifecycle action the principal triggered
pub fn order_updated(order: &Order, action: OrderAction) -> OutboundMessage {
    let text = match action {
        OrderAction::Approve => match &order.post {
            Some(_) => format!("📢 Order #{} approved and published.", order.id),
            None => format!("👍 Order #{} approved.", order.id),
        },
        OrderAction::Reject => format!(
            "👎 Order #{} rejected. The advertiser can send a new creative.",
            order.id
        ),
        OrderAction::Complete => format!("🎉 Order #{} completed.", order.id),
        OrderAction::Cancel => format!("❌ Order #{} cancelled.", order.id),
        OrderAction::Refund => format!("↩️ Order #{} refunded.", order.id),
        OrderAction::Pay | OrderAction::SubmitCreative => {
            format!("Order #{}: {}", order.id, order.status.label())
        }
    };
    OutboundMessage::text(text).with_row(vec![Button::new("📦 My orders", Action::MyOrders)])
}

fn order_line(order: &Order) -> String {
    format!(
        "#{} · {} · {} · {}",
        order.id,
        order.ad_type,
        order.price,
        order.status.label()
    )
}

fn order_buttons(order: &Order) -> Vec<Button> {
    match order.status {
        OrderStatus::PendingPayment => vec![Button::new(
            format!("❌ Cancel #{}", order.id),
            Action::CancelOrder(order.id),
        )],
        OrderStatus::Paid => vec![Button::new(
            format!("✏️ Creative for #{}", order.id),
            Action::SubmitCreative(order.id),
        )],
        OrderStatus::Posted => vec![Button::new(
            format!("✅ Confirm #{}", order.id),
            Action::ConfirmCompletion(order.id),
        )],
        _ => Vec::new(),
    }
}

pub fn order_list(orders: &[Order], awaiting_review: &[Order]) -> OutboundMessage {
    if orders.is_empty() && awaiting_review.is_empty() {
        return OutboundMessage::text("📦 You have no orders yet.").with_column([
            Button::new("🔍 Browse channels", Action::Browse),
            menu_button(),
        ]);
    }

    let mut sections = Vec::new();
    if !orders.is_empty() {
        sections.push(format!(
            "📦 Your orders\n{SEPARATOR}\n{}",
            orders.iter().map(order_line).collect::<Vec<_>>().join("\n")
        ));
    }
    if !awaiting_review.is_empty() {
        sections.push(format!(
            "📝 Waiting for your review\n{SEPARATOR}\n{}",
            awaiting_review
                .iter()
                .map(order_line)
                .collect::<Vec<_>>()
                .join("\n")
        ));
    }

    let mut message = OutboundMessage::text(sections.join("\n\n"));
    for order in orders {
        message = message.with_row(order_buttons(order));
    }
    for order in awaiting_review {
        message = message.with_row(vec![
            Button::new(format!("👍 Approve #{}", order.id), Action::Approve(order.id)),
            Button::new(format!("👎 Reject #{}", order.id), Action::Reject(order.id)),
        ]);
    }
    message.with_row(vec![menu_button()])
}
