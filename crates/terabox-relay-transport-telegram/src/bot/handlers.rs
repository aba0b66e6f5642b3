use anyhow::Result;
use std::sync::Arc;
use teloxide::{prelude::*, utils::command::BotCommands};
use terabox_relay_core::{RelayPipeline, UserIdentity};
use tracing::{debug, info};

/// Bot commands.
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    /// Greet the user
    #[command(description = "Start the bot.")]
    Start,
    /// Liveness probe
    #[command(description = "Check that the bot is alive.")]
    Healthcheck,
}

/// Sender of `msg`; an empty identity with ID 0 when Telegram omits it.
#[must_use]
pub fn user_identity(msg: &Message) -> UserIdentity {
    msg.from.as_ref().map_or_else(
        || UserIdentity {
            id: 0,
            first_name: String::new(),
            last_name: None,
            username: None,
        },
        |u| UserIdentity {
            id: u.id.0.cast_signed(),
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
            username: u.username.clone(),
        },
    )
}

/// Text of the `/start` reply.
#[must_use]
pub fn greeting(user: &UserIdentity) -> String {
    format!(
        "🙏 Hello {} ! \n \nSend me a Terabox link, and I'll download the file for you.",
        user.full_name()
    )
}

/// Whether `text` should go to the relay pipeline rather than a command handler.
#[must_use]
pub fn is_relay_text(text: &str) -> bool {
    !text.starts_with('/')
}

/// Handle `/start`.
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn start(bot: Bot, msg: Message) -> Result<()> {
    let user = user_identity(&msg);
    info!("User {} initiated /start command.", user.id);

    bot.send_message(msg.chat.id, greeting(&user)).await?;
    Ok(())
}

/// Handle `/healthcheck`.
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn healthcheck(bot: Bot, msg: Message) -> Result<()> {
    bot.send_message(msg.chat.id, "OK").await?;
    Ok(())
}

/// Run a text message through the relay pipeline.
///
/// # Errors
///
/// Never fails today; pipeline failures are answered in the chat.
pub async fn handle_text(bot: Bot, msg: Message, pipeline: Arc<RelayPipeline>) -> Result<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let user = user_identity(&msg);
    info!(user_id = user.id, "Received message");

    let transport = super::TelegramRelayTransport::new(bot, msg.chat.id);
    let outcome = pipeline.handle_incoming(&transport, &user, text).await;
    debug!(user_id = user.id, stage = %outcome.stage(), "Message handled");
    Ok(())
}
