use crate::bot::handlers::{self, is_relay_text, Command};
use crate::config::BotSettings;
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use terabox_relay_core::RelayPipeline;
use tracing::{error, info};

/// Run the Telegram transport runtime.
pub async fn run_bot(settings: Arc<BotSettings>) {
    let pipeline = init_pipeline(&settings);

    let bot = Bot::new(settings.telegram.telegram_api_key.clone());
    let handler = setup_handler();

    info!("Bot is running...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![pipeline])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn init_pipeline(settings: &BotSettings) -> Arc<RelayPipeline> {
    match RelayPipeline::new(settings.relay.as_ref()) {
        Ok(pipeline) => {
            info!(
                log_dir = %settings.relay.log_dir.display(),
                timeout_secs = settings.relay.download_timeout_secs,
                "Relay pipeline initialized."
            );
            Arc::new(pipeline)
        }
        Err(e) => {
            error!("Failed to initialize relay pipeline: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(
            dptree::filter(|msg: Message| msg.text().is_some_and(is_relay_text))
                .endpoint(handle_text),
        )
}

async fn handle_command(bot: Bot, msg: Message, cmd: Command) -> Result<(), teloxide::RequestError> {
    let res = match cmd {
        Command::Start => handlers::start(bot, msg).await,
        Command::Healthcheck => handlers::healthcheck(bot, msg).await,
    };
    if let Err(e) = res {
        error!("Command error: {}", e);
    }
    respond(())
}

async fn handle_text(
    bot: Bot,
    msg: Message,
    pipeline: Arc<RelayPipeline>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_text(bot, msg, pipeline).await {
        error!("Text handler error: {}", e);
    }
    respond(())
}
