//! # Tasklink Service
//!
//! Binary entry point for the Tasklink webhook intake service.
//!
//! This executable:
//! - Loads configuration from environment and files
//! - Initializes observability (logging, tracing)
//! - Seeds configured integrations through the secret cipher
//! - Wires stores, engines, and the event dispatcher
//!
//! The HTTP transport in front of the dispatcher is owned by the
//! surrounding platform; this binary hosts the processing machinery.

mod collaborators;
mod config;
mod dispatcher;
mod secret_cipher;

use collaborators::{UnconfiguredTaskDirectory, UnconfiguredWorkItemCommands};
use config::ServiceConfig;
use dispatcher::EventDispatcher;
use secret_cipher::LiteralSecretCipher;
use std::sync::Arc;
use tasklink_core::adapters::{
    InMemoryEntityStore, InMemoryExecutionStore, InMemoryIntegrationStore, InMemoryLinkStore,
    InMemoryWebhookEventStore,
};
use tasklink_core::{
    EntityUpserter, Integration, IntegrationStore, LinkingEngine, OrganizationId, ProjectId,
    SecretCipher, SmartCommitEngine, WebhookEventPipeline, WebhookSecret,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tasklink_service=info,tasklink_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Tasklink Service");

    // -------------------------------------------------------------------------
    // Load configuration
    //
    // Sources (applied in order — later sources override earlier ones):
    //  1. /etc/tasklink/service.yaml       — system-wide defaults
    //  2. ./config/service.yaml            — deployment-local override
    //  3. Path given by TL_CONFIG_FILE env — operator-specified file
    //  4. Environment variables prefixed TL__ (double-underscore separator)
    //     e.g. TL__ENVIRONMENT=staging sets environment = staging
    //
    // All fields carry serde defaults, so absent files or an entirely
    // unconfigured environment produces a valid configuration. A malformed
    // file or an uncoercible environment variable IS a hard error.
    // -------------------------------------------------------------------------
    let mut config_builder = ::config::Config::builder()
        .add_source(
            ::config::File::with_name("/etc/tasklink/service")
                .required(false)
                .format(::config::FileFormat::Yaml),
        )
        .add_source(
            ::config::File::with_name("config/service")
                .required(false)
                .format(::config::FileFormat::Yaml),
        );

    // Optional explicit path supplied by the operator.
    if let Ok(explicit_path) = std::env::var("TL_CONFIG_FILE") {
        if !explicit_path.is_empty() {
            config_builder = config_builder.add_source(
                ::config::File::with_name(&explicit_path)
                    .required(true)
                    .format(::config::FileFormat::Yaml),
            );
            info!(path = %explicit_path, "Loading configuration from explicit path");
        }
    }

    let raw_config = match config_builder
        .add_source(::config::Environment::with_prefix("TL").separator("__"))
        .build()
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "Failed to build configuration; aborting");
            std::process::exit(3);
        }
    };

    let service_config: ServiceConfig = match raw_config.try_deserialize() {
        Ok(sc) => sc,
        Err(e) => {
            error!(
                error = %e,
                "Could not deserialize service configuration; aborting. \
                 Fix the configuration and restart."
            );
            std::process::exit(3);
        }
    };

    if let Err(e) = service_config.validate() {
        error!(error = %e, "Service configuration is invalid; aborting");
        std::process::exit(3);
    }

    info!(
        environment = %service_config.environment,
        integrations = service_config.integrations.len(),
        "Configuration loaded"
    );

    // -------------------------------------------------------------------------
    // Wire stores and engines
    // -------------------------------------------------------------------------
    let cipher = LiteralSecretCipher::new();

    let events = Arc::new(InMemoryWebhookEventStore::new());
    let integrations = Arc::new(InMemoryIntegrationStore::new());
    let entities = Arc::new(InMemoryEntityStore::new());
    let links = Arc::new(InMemoryLinkStore::new());
    let executions = Arc::new(InMemoryExecutionStore::new());

    for seed in &service_config.integrations {
        let token = match cipher.encrypt(&seed.access_token).await {
            Ok(token) => token,
            Err(e) => {
                error!(repository = %seed.repository_name, error = %e, "Token encryption failed");
                std::process::exit(3);
            }
        };

        let mut integration = Integration::new(
            seed.provider,
            OrganizationId::from_uuid(seed.organization_id),
            ProjectId::from_uuid(seed.project_id),
            seed.repository_name.clone(),
            seed.repository_url.clone(),
            token,
        )
        .with_settings(seed.settings.clone());

        if let Some(secret) = &seed.webhook_secret {
            integration = integration.with_webhook_secret(WebhookSecret::new(secret.clone()));
        }

        info!(
            integration_id = %integration.id,
            provider = %integration.provider,
            repository = %integration.repository_name,
            "Integration registered"
        );
        integrations.insert(integration).await?;
    }

    let directory = Arc::new(UnconfiguredTaskDirectory::new());
    let commands = Arc::new(UnconfiguredWorkItemCommands::new());

    let pipeline = Arc::new(WebhookEventPipeline::new(
        events,
        integrations,
        EntityUpserter::new(entities.clone()),
        LinkingEngine::new(entities, links.clone(), directory.clone()),
        SmartCommitEngine::new(links, executions, directory, commands),
    ));

    let _dispatcher = EventDispatcher::new(pipeline);

    info!("Tasklink Service ready; waiting for shutdown signal");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received; exiting");

    Ok(())
}
