use std::sync::Arc;

use meshim::config::NodeConfig;
use meshim::handler::default_router;
use meshim::mesh::Container;
use meshim::router::{MemoryStorage, ServHandler};
use meshim::transport::{TcpDialer, TcpServer};
use tracing::info;

use crate::cmd::NodeArgs;
use crate::exit::{config_error, mesh_error, CliResult, SUCCESS};

pub async fn run(args: NodeArgs) -> CliResult<i32> {
    let config = NodeConfig::load(&args.config).map_err(config_error)?;

    let container = Container::builder()
        .naming(Arc::new(config.naming()))
        .dialer(Arc::new(TcpDialer::new(config.service_id.clone())))
        .config(config.container_config())
        .build();

    let handler = Arc::new(ServHandler::new(
        Arc::new(default_router()),
        Arc::clone(&container),
        Arc::new(MemoryStorage::new()),
    ));
    let server = TcpServer::new(config.listen.clone(), config.registration())
        .with_acceptor(handler.clone())
        .with_message_listener(handler.clone())
        .with_state_listener(handler)
        .with_options(config.server_options());

    info!(
        id = %config.service_id,
        name = %config.service_name,
        listen = %config.listen,
        "service starting"
    );
    container
        .init(Arc::new(server), config.deps.clone())
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
        .map_err(|err| mesh_error("service", err))?;
    Ok(SUCCESS)
}
