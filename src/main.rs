use aws_config::BehaviorVersion;
use connected_vehicle_services::config::Config;
use connected_vehicle_services::events::Combined;
use connected_vehicle_services::{AwsClients, Services};
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Error> {
    connected_vehicle_services::set_up_logging();

    info!(
        "Initializing {} version {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let aws_config = aws_config::load_defaults(BehaviorVersion::v2023_11_09()).await;
    let clients = AwsClients::new(&aws_config);
    let config = Config::load_from_env()?;
    let services = Services::new(&clients, &config);

    run(service_fn(|request: LambdaEvent<Combined>| {
        connected_vehicle_services::function_handler(&services, &config, request)
    }))
    .await
}
