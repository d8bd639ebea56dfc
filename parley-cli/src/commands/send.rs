//! Send command: one message, one reply.

use anyhow::{bail, Result};
use parley_client::{ConversationConfig, SendReceipt};

use super::Session;

/// Send `message` in text mode and print the reply.
pub async fn run(config: ConversationConfig, mock: bool, message: &str) -> Result<()> {
    let session = Session::start(config, mock).await?;
    let result = session.send(message).await;
    session.chat.shutdown().await;

    match result? {
        SendReceipt::Replied(reply) => {
            println!("{}", reply.text_or_empty());
            Ok(())
        }
        SendReceipt::Queued(id) => bail!("No reply to {id}"),
        SendReceipt::ReplyNotRequested { id, reason } => {
            bail!("Sent {id}, but no reply was requested: {reason}")
        }
    }
}
