use actix_web::{middleware, web, App, HttpServer};
use actix_web_prom::PrometheusMetricsBuilder;
use aim_controller::{errors, init_controller, metrics, views, AimEnvironmentConfig, Config};
use kube::client::Client;
use log::{debug, info, warn};
use prometheus::Registry;

#[actix_rt::main]
async fn main() -> Result<(), errors::Error> {
    env_logger::init();

    let env_config: AimEnvironmentConfig = envy::from_env::<AimEnvironmentConfig>()
        .map_err(|error| errors::Error::Config(format!("Failed to load environment config: {}", error)))?;
    debug!("Environment config: {:?}", &env_config);
    let aim_config = Config::from_env_config(env_config)?;
    info!("Starting with config: {:?}", aim_config);

    let bind_address = format!("{}:{}", &aim_config.server_host, aim_config.server_port);

    let client = Client::try_default().await?;
    let controller = init_controller(client, aim_config).await?;

    let registry = Registry::new();
    metrics::custom_metrics(&registry).map_err(|err| errors::Error::Config(err.to_string()))?;
    let prometheus = PrometheusMetricsBuilder::new(metrics::METRICS_NAMESPACE)
        .registry(registry)
        .endpoint("/metrics")
        .build()
        .map_err(|err| errors::Error::Config(err.to_string()))?;

    let run = HttpServer::new(move || {
        App::new()
            .wrap(prometheus.clone())
            .wrap(middleware::Logger::default().exclude("/health").exclude("/metrics"))
            .service(web::resource("/health").to(views::health))
    })
    .bind(&bind_address)
    .map_err(|err| errors::Error::Config(format!("Could not bind to '{}': {}", &bind_address, err)))?
    .run();

    tokio::select! {
        _ = controller => warn!("controller drained"),
        _ = run => info!("actix exited"),
    }
    Ok(())
}
