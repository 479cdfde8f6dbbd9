use std::path::Path;

use aws_config::BehaviorVersion;
use connected_vehicle_services::loader;
use connected_vehicle_services::store::DynamoStore;
use lambda_runtime::Error;
use tracing::info;

/// Seeds a reference-data table from a CSV file.
///
/// Usage: seed <dtc|poi> <table-name> <csv-path>
#[tokio::main]
async fn main() -> Result<(), Error> {
    connected_vehicle_services::set_up_logging();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        return Err("usage: seed <dtc|poi> <table-name> <csv-path>".into());
    }
    let kind = args[1].as_str();
    let table = args[2].as_str();
    let path = Path::new(&args[3]);

    let aws_config = aws_config::load_defaults(BehaviorVersion::v2023_11_09()).await;
    let store = DynamoStore::new(aws_sdk_dynamodb::Client::new(&aws_config));

    let loaded = match kind {
        "dtc" => loader::load_dtc_codes(&store, table, path).await?,
        "poi" => loader::load_pois(&store, table, path).await?,
        other => return Err(format!("unknown dataset kind {}", other).into()),
    };

    info!("loaded {} items into {}", loaded, table);
    Ok(())
}
