use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use meshim_packet::{ErrorResp, LogicPkt, Session, Status};
use tracing::debug;

use crate::context::{Context, Handler, HandlerFunc};
use crate::dispatcher::Dispatcher;
use crate::storage::SessionStorage;

/// Idle contexts kept for reuse.
pub const MAX_POOLED_CONTEXTS: usize = 256;

/// Answers commands nobody registered.
struct NotImplemented;

#[async_trait]
impl Handler for NotImplemented {
    async fn handle(&self, ctx: &mut Context) {
        let body = ErrorResp {
            message: "NotImplemented".to_string(),
        };
        let _ = ctx.resp(Status::NotImplemented, &body).await;
    }
}

/// Maps commands to handler chains.
pub struct Router {
    handlers: HashMap<String, Arc<Vec<HandlerFunc>>>,
    not_found: Arc<Vec<HandlerFunc>>,
    pool: Mutex<Vec<Context>>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            not_found: Arc::new(vec![Arc::new(NotImplemented) as HandlerFunc]),
            pool: Mutex::new(Vec::new()),
        }
    }

    /// Append `handlers` to the chain of `command`.
    pub fn handle(
        &mut self,
        command: impl Into<String>,
        handlers: impl IntoIterator<Item = HandlerFunc>,
    ) -> &mut Self {
        let chain = self.handlers.entry(command.into()).or_default();
        Arc::make_mut(chain).extend(handlers);
        self
    }

    pub fn get(&self, command: &str) -> Option<&[HandlerFunc]> {
        self.handlers.get(command).map(|chain| chain.as_slice())
    }

    /// Run the chain registered for `packet`'s command.
    ///
    /// `session` is the sender's stored session; when absent, handlers see
    /// one generated from the request.
    pub async fn serve(
        &self,
        packet: LogicPkt,
        dispatcher: Arc<dyn Dispatcher>,
        storage: Arc<dyn SessionStorage>,
        session: Option<Session>,
    ) {
        let chain = match self.handlers.get(&packet.header.command) {
            Some(chain) => Arc::clone(chain),
            None => {
                debug!(command = %packet.header.command, "no handler");
                Arc::clone(&self.not_found)
            }
        };

        let pooled = self.lock_pool().pop();
        let mut ctx = match pooled {
            Some(ctx) => ctx,
            None => Context::new(Arc::clone(&dispatcher), Arc::clone(&storage)),
        };
        ctx.prepare(packet, chain, dispatcher, storage, session);
        ctx.next().await;
        ctx.reset();

        let mut pool = self.lock_pool();
        if pool.len() < MAX_POOLED_CONTEXTS {
            pool.push(ctx);
        }
    }

    /// Contexts currently waiting for reuse.
    pub fn pooled(&self) -> usize {
        self.lock_pool().len()
    }

    fn lock_pool(&self) -> std::sync::MutexGuard<'_, Vec<Context>> {
        self.pool.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut commands: Vec<_> = self.handlers.keys().collect();
        commands.sort();
        f.debug_struct("Router")
            .field("commands", &commands)
            .field("pooled", &self.pooled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use meshim_packet::{Flag, META_DEST_SERVER};

    use super::*;
    use crate::context::tests::RecordingDispatcher;
    use crate::storage::MemoryStorage;

    /// Appends its name to a shared log, optionally around `ctx.next()`.
    struct Step {
        name: &'static str,
        wrap: bool,
        log: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl Handler for Step {
        async fn handle(&self, ctx: &mut Context) {
            self.log.lock().expect("log lock").push(format!("{}:in", self.name));
            if self.wrap {
                ctx.next().await;
                self.log.lock().expect("log lock").push(format!("{}:out", self.name));
            }
        }
    }

    fn step(name: &'static str, wrap: bool, log: &Arc<StdMutex<Vec<String>>>) -> HandlerFunc {
        Arc::new(Step {
            name,
            wrap,
            log: Arc::clone(log),
        })
    }

    fn request(command: &str) -> LogicPkt {
        let mut packet = LogicPkt::new(command).with_channel("gate-1_alice_1");
        packet.add_meta(META_DEST_SERVER, "gate-1");
        packet
    }

    #[tokio::test]
    async fn chain_runs_in_order_with_middleware() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let mut router = Router::new();
        router
            .handle("chat.user.talk", [step("auth", true, &log)])
            .handle("chat.user.talk", [step("a", false, &log), step("b", false, &log)]);
        assert_eq!(router.get("chat.user.talk").map(<[_]>::len), Some(3));

        router
            .serve(
                request("chat.user.talk"),
                Arc::new(RecordingDispatcher::default()),
                Arc::new(MemoryStorage::new()),
                None,
            )
            .await;

        let log = log.lock().expect("log lock").clone();
        assert_eq!(log, vec!["auth:in", "a:in", "b:in", "auth:out"]);
    }

    #[tokio::test]
    async fn unknown_command_is_not_implemented() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let router = Router::new();
        router
            .serve(
                request("chat.group.create"),
                dispatcher.clone(),
                Arc::new(MemoryStorage::new()),
                None,
            )
            .await;

        let pushes = dispatcher.pushes();
        assert_eq!(pushes.len(), 1);
        let packet = &pushes[0].2;
        assert_eq!(packet.header.status, Status::NotImplemented);
        assert_eq!(packet.header.flag, Flag::Response);
        let body: ErrorResp = packet.read_body().expect("body should decode");
        assert_eq!(body.message, "NotImplemented");
    }

    #[tokio::test]
    async fn contexts_are_reused() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let mut router = Router::new();
        router.handle("chat.user.talk", [step("a", false, &log)]);
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(RecordingDispatcher::default());
        let storage: Arc<dyn SessionStorage> = Arc::new(MemoryStorage::new());

        for _ in 0..3 {
            router
                .serve(
                    request("chat.user.talk"),
                    Arc::clone(&dispatcher),
                    Arc::clone(&storage),
                    None,
                )
                .await;
        }
        assert_eq!(router.pooled(), 1);
        assert_eq!(log.lock().expect("log lock").len(), 3);
    }
}
