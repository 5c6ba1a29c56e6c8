use std::sync::Arc;

use meshim::config::NodeConfig;
use meshim::gateway::GatewayHandler;
use meshim::mesh::Container;
use meshim::packet::{SN_CHAT, SN_LOGIN};
use meshim::transport::{TcpDialer, TcpServer};
use tracing::info;

use crate::cmd::NodeArgs;
use crate::exit::{config_error, mesh_error, CliResult, SUCCESS};

pub async fn run(args: NodeArgs) -> CliResult<i32> {
    let config = NodeConfig::load(&args.config).map_err(config_error)?;
    let deps = if config.deps.is_empty() {
        vec![SN_LOGIN.to_string(), SN_CHAT.to_string()]
    } else {
        config.deps.clone()
    };

    let container = Container::builder()
        .naming(Arc::new(config.naming()))
        .dialer(Arc::new(TcpDialer::new(config.service_id.clone())))
        .config(config.container_config())
        .build();

    let handler = Arc::new(GatewayHandler::new(
        config.service_id.clone(),
        Arc::clone(&container),
    ));
    let server = TcpServer::new(config.listen.clone(), config.registration())
        .with_acceptor(handler.clone())
        .with_message_listener(handler.clone())
        .with_state_listener(handler)
        .with_options(config.server_options());

    info!(id = %config.service_id, listen = %config.listen, deps = ?deps, "gateway starting");
    container
        .init(Arc::new(server), deps)
        .map_err(|err| mesh_error("init", err))?;
    if let Some(listen) = &args.monitor {
        let addr = container
            .enable_monitor(listen)
            .await
            .map_err(|err| mesh_error("monitor", err))?;
        info!(monitor = %addr, "monitor enabled");
    }
    container
        .start()
        .await
        .map_err(|err| mesh_error("gateway", err))?;
    Ok(SUCCESS)
}
