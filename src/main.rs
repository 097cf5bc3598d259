use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use log::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod api;
mod blockchain;
mod config;
mod node;
mod pubsub;
mod wallet;

use blockchain::Blockchain;
use config::NodeConfig;
use node::Node;
use pubsub::gossip::GossipTransport;
use pubsub::PubSub;
use wallet::Wallet;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_blocks,
        api::handlers::get_transaction_pool_map,
        api::handlers::mine,
        api::handlers::transact,
        api::handlers::mine_transactions,
        api::handlers::wallet_info,
        api::handlers::validate_chain
    ),
    components(
        schemas(
            blockchain::Block,
            wallet::Transaction,
            wallet::TransactionInput,
            wallet::Address,
            wallet::DigitalSignature,
            node::WalletInfo,
            api::handlers::MineRequest,
            api::handlers::TransactRequest,
            api::handlers::TransactResponse
        )
    ),
    tags(
        (name = "proof-ledger", description = "Proof-of-work ledger node API")
    ),
    info(
        title = "Proof Ledger API",
        version = "0.1.0",
        description = "Command surface of a proof-of-work ledger node",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = NodeConfig::from_env()?;

    let (transport, inbound) = GossipTransport::spawn(config.p2p_port, &config.peers)?;
    let pubsub = PubSub::new(Arc::new(transport));
    info!("Pub/sub session id {}", pubsub.session_id());

    let wallet = Wallet::new();
    info!("Node wallet address: {}", wallet.address());

    let node = Node::new(Blockchain::new(), wallet, pubsub);
    node.spawn_sync(inbound);

    if !config.is_root() {
        info!("Bootstrapping from {}", config.root_node_address);
        if let Err(err) = node.bootstrap(&config.root_node_address).await {
            warn!("Bootstrap from {} failed: {}", config.root_node_address, err);
        }
    }

    let node = web::Data::new(node);

    info!("Starting HTTP server at http://localhost:{}", config.http_port);

    HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        // Configure OpenAPI documentation
        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(node.clone())
            // API routes
            .configure(api::configure_routes)
            // Swagger UI
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone())
            )
    })
    .bind(("127.0.0.1", config.http_port))?
    .run()
    .await?;

    Ok(())
}
