use std::sync::Arc;

use aws_config::SdkConfig;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_sdk_iot::Client as IotClient;
use aws_sdk_sns::Client as SnsClient;
use lambda_runtime::{Error, LambdaEvent};
use serde_json::json;
use tracing::level_filters::LevelFilter;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::anomaly::AnomalyService;
use crate::api::Router;
use crate::config::Config;
use crate::driversafety::DriverSafetyService;
use crate::dtc::DtcService;
use crate::events::Combined;
use crate::marketing::MarketingService;
use crate::notify::{NotificationDispatcher, SnsDispatcher};
use crate::provision::ProvisioningService;
use crate::store::{DynamoStore, RecordStore};
use crate::telemetry::TelemetryMessage;
use crate::vehicle::{HealthReportService, VehicleService};

pub mod anomaly;
pub mod api;
pub mod config;
pub mod driversafety;
pub mod dtc;
pub mod error;
pub mod events;
pub mod loader;
pub mod marketing;
pub mod notify;
pub mod provision;
pub mod records;
pub mod store;
pub mod telemetry;
pub mod vehicle;

pub fn set_up_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();
}

/// A type used to hold the AWS clients required to interact with AWS services
/// used by the lambda function.
#[derive(Clone)]
pub struct AwsClients {
    pub dynamodb: DynamoDbClient,
    pub sns: SnsClient,
    pub iot: IotClient,
}

impl AwsClients {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        AwsClients {
            dynamodb: DynamoDbClient::new(sdk_config),
            sns: SnsClient::new(sdk_config),
            iot: IotClient::new(sdk_config),
        }
    }
}

/// The service graph for one function instance. Each service is constructed
/// once, with the store and dispatcher injected through its constructor; the
/// router shares the same instances as the streaming path.
pub struct Services {
    pub router: Router,
    pub dtcs: Arc<DtcService>,
    pub anomalies: Arc<AnomalyService>,
    pub marketing: MarketingService,
    pub driversafety: Arc<DriverSafetyService>,
    pub provisioner: ProvisioningService,
}

impl Services {
    pub fn new(clients: &AwsClients, config: &Config) -> Self {
        let store: Arc<dyn RecordStore> = Arc::new(DynamoStore::new(clients.dynamodb.clone()));
        let dispatcher: Arc<dyn NotificationDispatcher> = Arc::new(SnsDispatcher::new(
            clients.sns.clone(),
            config.notification_topic_arn.clone(),
        ));

        let vehicles = Arc::new(VehicleService::new(
            store.clone(),
            config.owner_table.clone(),
        ));
        let dtcs = Arc::new(DtcService::new(
            store.clone(),
            dispatcher.clone(),
            config.vehicle_dtc_table.clone(),
            config.dtc_reference_table.clone(),
        ));
        let anomalies = Arc::new(AnomalyService::new(
            store.clone(),
            dispatcher.clone(),
            config.anomaly_table.clone(),
        ));
        let driversafety = Arc::new(DriverSafetyService::new(
            store.clone(),
            dispatcher.clone(),
            config.trip_table.clone(),
        ));
        let health_reports = Arc::new(HealthReportService::new(
            store.clone(),
            config.health_report_table.clone(),
        ));

        Services {
            router: Router::new(
                vehicles,
                dtcs.clone(),
                anomalies.clone(),
                driversafety.clone(),
                health_reports,
            ),
            dtcs,
            anomalies,
            marketing: MarketingService::new(
                store,
                dispatcher,
                config.marketing_table.clone(),
                config.poi_table.clone(),
            ),
            driversafety,
            provisioner: ProvisioningService::new(clients.iot.clone()),
        }
    }
}

// lambda handler
pub async fn function_handler(
    services: &Services,
    config: &Config,
    evt: LambdaEvent<Combined>,
) -> Result<serde_json::Value, Error> {
    info!("Handling lambda invocation");

    match evt.payload {
        Combined::ApiGateway(request) => {
            let response = services.router.route(*request).await;
            Ok(serde_json::to_value(response)?)
        }
        Combined::Kinesis(kinesis_event) => {
            for record in kinesis_event.records {
                debug!("Kinesis record: {:?}", record);
                let message: TelemetryMessage = serde_json::from_slice(&record.kinesis.data.0)?;
                handle_telemetry(services, message).await?;
            }
            Ok(json!({"result": "telemetry processed"}))
        }
        Combined::CertificateRegistration(event) => {
            let result = services
                .provisioner
                .register_certificate(&event, &config.region)
                .await?;
            Ok(json!(result))
        }
    }
}

async fn handle_telemetry(services: &Services, message: TelemetryMessage) -> Result<(), Error> {
    match message {
        TelemetryMessage::Dtc(reading) => {
            services.dtcs.ingest(reading).await?;
        }
        TelemetryMessage::Anomaly(reading) => {
            services.anomalies.evaluate(reading).await?;
        }
        TelemetryMessage::Location(update) => {
            let marker = services.marketing.evaluate(update).await?;
            debug!("{marker}");
        }
        TelemetryMessage::TripAggregate(trip) => {
            services.driversafety.score(trip).await?;
        }
    }

    Ok(())
}
