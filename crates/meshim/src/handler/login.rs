use async_trait::async_trait;
use meshim_packet::{KickoutNotify, LoginResp, Session, Status};
use meshim_router::{Context, Handler, RouterError};
use tracing::info;

/// `login.signin`: kick out the account's previous connection, then store
/// the new session.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignIn;

#[async_trait]
impl Handler for SignIn {
    async fn handle(&self, ctx: &mut Context) {
        let session: Session = match ctx.read_body() {
            Ok(session) => session,
            Err(err) => {
                let _ = ctx.resp_with_error(Status::InvalidPacketBody, err).await;
                return;
            }
        };
        info!(
            channel = %session.channel_id,
            account = %session.account,
            remote_ip = %session.remote_ip,
            "do login"
        );

        let previous = ctx.storage().get_location(&session.account, "").await;
        match previous {
            Ok(old) => {
                let notify = KickoutNotify {
                    channel_id: old.channel_id.clone(),
                };
                let _ = ctx.dispatch(&notify, &[old]).await;
            }
            Err(RouterError::SessionNotFound) => {}
            Err(err) => {
                let _ = ctx.resp_with_error(Status::SystemException, err).await;
                return;
            }
        }

        if let Err(err) = ctx.storage().add(&session).await {
            let _ = ctx.resp_with_error(Status::SystemException, err).await;
            return;
        }
        let resp = LoginResp {
            channel_id: session.channel_id,
        };
        let _ = ctx.resp(Status::Success, &resp).await;
    }
}

/// `login.signout`: forget the sender's session.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignOut;

#[async_trait]
impl Handler for SignOut {
    async fn handle(&self, ctx: &mut Context) {
        let session = ctx.session().clone();
        info!(channel = %session.channel_id, account = %session.account, "do logout");

        if let Err(err) = ctx
            .storage()
            .delete(&session.account, &session.channel_id)
            .await
        {
            let _ = ctx.resp_with_error(Status::SystemException, err).await;
            return;
        }
        let _ = ctx.resp_status(Status::Success).await;
    }
}
