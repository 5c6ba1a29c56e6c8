//! Command handlers of the bundled login and chat services.

mod chat;
mod login;

pub use chat::ChatTalk;
pub use login::{SignIn, SignOut};

use std::sync::Arc;

use meshim_packet::{COMMAND_CHAT_USER_TALK, COMMAND_LOGIN_SIGN_IN, COMMAND_LOGIN_SIGN_OUT};
use meshim_router::{HandlerFunc, Router};

/// Router with the login and chat commands registered.
pub fn default_router() -> Router {
    let mut router = Router::new();
    router
        .handle(COMMAND_LOGIN_SIGN_IN, [Arc::new(SignIn) as HandlerFunc])
        .handle(COMMAND_LOGIN_SIGN_OUT, [Arc::new(SignOut) as HandlerFunc])
        .handle(COMMAND_CHAT_USER_TALK, [Arc::new(ChatTalk::new()) as HandlerFunc]);
    router
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use meshim_packet::{
        Flag, KickoutNotify, LoginResp, LogicPkt, MessagePush, MessageReq, MessageResp, Session,
        Status, META_DEST_SERVER,
    };
    use meshim_router::{Dispatcher, MemoryStorage, SessionStorage};

    use super::*;

    #[derive(Default)]
    struct RecordingDispatcher {
        pushes: Mutex<Vec<(String, Vec<String>, LogicPkt)>>,
    }

    impl RecordingDispatcher {
        fn take(&self) -> Vec<(String, Vec<String>, LogicPkt)> {
            std::mem::take(&mut *self.pushes.lock().expect("dispatcher lock"))
        }
    }

    #[async_trait]
    impl Dispatcher for RecordingDispatcher {
        async fn push(
            &self,
            gateway: &str,
            channels: &[String],
            packet: LogicPkt,
        ) -> meshim_router::Result<()> {
            self.pushes.lock().expect("dispatcher lock").push((
                gateway.to_string(),
                channels.to_vec(),
                packet,
            ));
            Ok(())
        }
    }

    struct Harness {
        router: Router,
        dispatcher: Arc<RecordingDispatcher>,
        storage: Arc<MemoryStorage>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                router: default_router(),
                dispatcher: Arc::new(RecordingDispatcher::default()),
                storage: Arc::new(MemoryStorage::new()),
            }
        }

        async fn serve(&self, packet: LogicPkt) {
            let session = self.storage.get(&packet.header.channel_id).await.ok();
            self.router
                .serve(packet, self.dispatcher.clone(), self.storage.clone(), session)
                .await;
        }

        async fn login(&self, account: &str, channel: &str) {
            let mut packet = LogicPkt::new(COMMAND_LOGIN_SIGN_IN).with_channel(channel);
            packet.add_meta(META_DEST_SERVER, "gate-1");
            packet
                .write_body(&Session {
                    channel_id: channel.to_string(),
                    gate_id: "gate-1".to_string(),
                    account: account.to_string(),
                    ..Session::default()
                })
                .expect("session should encode");
            self.serve(packet).await;
        }
    }

    #[tokio::test]
    async fn sign_in_stores_session_and_answers() {
        let h = Harness::new();
        h.login("alice", "gate-1_alice_1").await;

        let session = h.storage.get("gate-1_alice_1").await.expect("session should be stored");
        assert_eq!(session.account, "alice");

        let pushes = h.dispatcher.take();
        assert_eq!(pushes.len(), 1);
        let (gateway, channels, resp) = &pushes[0];
        assert_eq!(gateway, "gate-1");
        assert_eq!(channels, &vec!["gate-1_alice_1".to_string()]);
        assert_eq!(resp.header.status, Status::Success);
        let body: LoginResp = resp.read_body().expect("login response should decode");
        assert_eq!(body.channel_id, "gate-1_alice_1");
    }

    #[tokio::test]
    async fn second_sign_in_kicks_out_previous_channel() {
        let h = Harness::new();
        h.login("alice", "gate-1_alice_1").await;
        h.dispatcher.take();

        h.login("alice", "gate-1_alice_2").await;
        let pushes = h.dispatcher.take();
        assert_eq!(pushes.len(), 2);

        let (_, channels, kickout) = &pushes[0];
        assert_eq!(channels, &vec!["gate-1_alice_1".to_string()]);
        assert_eq!(kickout.header.flag, Flag::Push);
        let notify: KickoutNotify = kickout.read_body().expect("kickout should decode");
        assert_eq!(notify.channel_id, "gate-1_alice_1");

        let (_, channels, resp) = &pushes[1];
        assert_eq!(channels, &vec!["gate-1_alice_2".to_string()]);
        assert_eq!(resp.header.flag, Flag::Response);
    }

    #[tokio::test]
    async fn sign_out_removes_session() {
        let h = Harness::new();
        h.login("alice", "gate-1_alice_1").await;
        h.dispatcher.take();

        h.serve(LogicPkt::new(COMMAND_LOGIN_SIGN_OUT).with_channel("gate-1_alice_1"))
            .await;

        assert!(h.storage.get("gate-1_alice_1").await.is_err());
        assert!(h.storage.get_location("alice", "").await.is_err());
        let pushes = h.dispatcher.take();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].2.header.status, Status::Success);
    }

    fn talk(from: &str, to: &str, text: &str) -> LogicPkt {
        let mut packet = LogicPkt::new(COMMAND_CHAT_USER_TALK)
            .with_channel(from)
            .with_dest(to);
        packet
            .write_body(&MessageReq {
                kind: 1,
                body: text.to_string(),
                extra: String::new(),
            })
            .expect("message should encode");
        packet
    }

    #[tokio::test]
    async fn talk_is_pushed_to_receiver_and_acknowledged() {
        let h = Harness::new();
        h.login("alice", "gate-1_alice_1").await;
        h.login("bob", "gate-2_bob_1").await;
        h.dispatcher.take();

        h.serve(talk("gate-1_alice_1", "bob", "hello bob")).await;

        let pushes = h.dispatcher.take();
        assert_eq!(pushes.len(), 2);
        let (gateway, channels, push) = &pushes[0];
        assert_eq!(gateway, "gate-2");
        assert_eq!(channels, &vec!["gate-2_bob_1".to_string()]);
        let message: MessagePush = push.read_body().expect("push should decode");
        assert_eq!(message.sender, "alice");
        assert_eq!(message.body, "hello bob");

        let (gateway, _, ack) = &pushes[1];
        assert_eq!(gateway, "gate-1");
        let resp: MessageResp = ack.read_body().expect("ack should decode");
        assert_eq!(resp.message_id, message.message_id);
    }

    #[tokio::test]
    async fn talk_to_offline_account_has_no_destination() {
        let h = Harness::new();
        h.login("alice", "gate-1_alice_1").await;
        h.dispatcher.take();

        h.serve(talk("gate-1_alice_1", "carol", "anyone?")).await;

        let pushes = h.dispatcher.take();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].2.header.status, Status::NoDestination);
    }
}
