use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use meshim_packet::{MessagePush, MessageReq, MessageResp, Status};
use meshim_router::{Context, Handler, RouterError};
use tracing::debug;

/// `chat.user.talk`: deliver a message to the account named in the header's
/// `dest`, then acknowledge the sender.
#[derive(Debug, Default)]
pub struct ChatTalk {
    next_id: AtomicU64,
}

impl ChatTalk {
    pub fn new() -> Self {
        Self::default()
    }

    fn message_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

#[async_trait]
impl Handler for ChatTalk {
    async fn handle(&self, ctx: &mut Context) {
        let req: MessageReq = match ctx.read_body() {
            Ok(req) => req,
            Err(err) => {
                let _ = ctx.resp_with_error(Status::InvalidPacketBody, err).await;
                return;
            }
        };
        let receiver = ctx.header().dest.clone();
        if receiver.is_empty() {
            let _ = ctx.resp_with_error(Status::NoDestination, "dest is empty").await;
            return;
        }

        let found = ctx.storage().get_locations(&[receiver.clone()]).await;
        let locations = match found {
            Ok(locations) => locations,
            Err(RouterError::SessionNotFound) => {
                let reason = format!("{receiver} is offline");
                let _ = ctx.resp_with_error(Status::NoDestination, reason).await;
                return;
            }
            Err(err) => {
                let _ = ctx.resp_with_error(Status::SystemException, err).await;
                return;
            }
        };

        let message_id = self.message_id();
        let send_time = unix_millis();
        let push = MessagePush {
            message_id,
            kind: req.kind,
            body: req.body,
            extra: req.extra,
            sender: ctx.session().account.clone(),
            send_time,
        };
        debug!(message_id, receiver = %receiver, "user talk");
        if let Err(err) = ctx.dispatch(&push, &locations).await {
            let _ = ctx.resp_with_error(Status::SystemException, err).await;
            return;
        }
        let resp = MessageResp {
            message_id,
            send_time,
        };
        let _ = ctx.resp(Status::Success, &resp).await;
    }
}
