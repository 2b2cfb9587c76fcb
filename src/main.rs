mod config;
mod consumer;
mod heartbeat;
mod identity;
mod logging;
mod normalize;
mod publisher;
mod relay;
mod schema;
mod shutdown;
mod utils;
mod wire;

use std::process;
use std::time::Duration;

use tracing::{error, info};

use config::AppConfig;
use consumer::BugzillaConsumer;
use identity::{CacheBackend, FasjsonDirectory, IdentityCache, IdentityResolver};
use logging::{LogLevel, LoggerConfig};
use publisher::{StompPublisher, StompPublisherConfig};
use relay::{run_until_stopped, MessageRelay, RelaySettings};
use shutdown::ShutdownHooks;
use utils::runtime::ensure_posix_or_exit;
use utils::startup_banner::print_startup_banner;
use wire::codec::MAX_FRAME_SIZE_BYTES;
use wire::session::{SessionConfig, StompSession, TcpConnector};

/// Publisher sessions only live between publishes, so they do not beat.
const PUBLISHER_HEARTBEAT_MS: u64 = 0;

fn main() {
    ensure_posix_or_exit();
    print_startup_banner();

    let app_config = load_config_or_exit();
    let log_level = LogLevel::from_config_value(&app_config.logging.level).unwrap_or_else(|| {
        eprintln!(
            "invalid logging.level '{}'. Allowed values: error, warn, info, debug, verbose",
            app_config.logging.level
        );
        process::exit(2);
    });
    if let Err(error) = logging::init(&LoggerConfig {
        min_level: log_level,
        human_friendly: app_config.logging.human_friendly,
    }) {
        eprintln!("logging initialization error: {error}");
        process::exit(2);
    }

    let resolver = build_resolver_or_exit(&app_config);
    let publisher = build_publisher_or_exit(&app_config);
    let settings = RelaySettings {
        products: app_config.bugzilla.products.clone(),
        bz4compat: app_config.bugzilla.bz4compat,
        weburl_base: app_config.bugzilla.weburl_base.clone(),
        list_domain: app_config.identity.list_domain.clone(),
        topic_prefix: app_config.publisher.topic_prefix(),
    };
    let relay = MessageRelay::new(&publisher, resolver, settings);

    let stomp_addresses = app_config.stomp.broker_addresses().unwrap_or_else(|error| {
        eprintln!("configuration error: {error}");
        process::exit(2);
    });
    let session = StompSession::new(
        TcpConnector::failover(
            stomp_addresses.clone(),
            app_config.stomp.connect_timeout(),
            app_config.stomp.read_timeout(),
        ),
        SessionConfig {
            host: virtual_host(&stomp_addresses),
            login: app_config.stomp.login(),
            passcode: app_config.stomp.passcode(),
            heartbeat_ms: app_config.stomp.heartbeat_ms,
            connect_timeout: app_config.stomp.connect_timeout(),
            max_frame_size: MAX_FRAME_SIZE_BYTES,
        },
    );
    let mut consumer = BugzillaConsumer::new(session, relay, app_config.stomp.queue.clone());

    let _shutdown_hooks = ShutdownHooks::install(consumer.stop_handle().flag()).unwrap_or_else(|error| {
        eprintln!("failed to install shutdown hooks: {error}");
        process::exit(2);
    });
    info!(
        version = env!("CARGO_PKG_VERSION"),
        brokers = ?stomp_addresses,
        queue = %app_config.stomp.queue,
        products = ?app_config.bugzilla.products,
        bz4compat = app_config.bugzilla.bz4compat,
        "Starting {}",
        env!("CARGO_PKG_NAME")
    );

    let outcome = run_until_stopped(
        &mut consumer,
        Duration::from_millis(app_config.relay.reconnect_delay_ms),
    );
    publisher.close();

    match outcome {
        Ok(()) => info!("Shutdown signal received, relay stopped"),
        Err(failure) => {
            error!(error = %failure, "Relay stopped on an unrecoverable error");
            process::exit(1);
        }
    }
}

fn load_config_or_exit() -> AppConfig {
    match AppConfig::load_with_discovery(std::env::args().skip(1)) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("configuration error: {error}");
            process::exit(2);
        }
    }
}

fn build_resolver_or_exit(app_config: &AppConfig) -> IdentityResolver<FasjsonDirectory> {
    let backend = CacheBackend::from_config_value(&app_config.cache.backend).unwrap_or_else(|| {
        eprintln!(
            "invalid cache.backend '{}'. Allowed values: memory, null",
            app_config.cache.backend
        );
        process::exit(2);
    });
    let directory = FasjsonDirectory::new(
        &app_config.identity.fasjson_url,
        Duration::from_millis(app_config.identity.request_timeout_ms),
    )
    .unwrap_or_else(|error| {
        eprintln!("identity directory error: {error}");
        process::exit(2);
    });

    IdentityResolver::new(
        directory,
        IdentityCache::new(backend, Duration::from_secs(app_config.cache.expiration_secs)),
        &app_config.identity.first_party_domain,
    )
}

fn build_publisher_or_exit(app_config: &AppConfig) -> StompPublisher<TcpConnector> {
    let addresses = app_config.publisher.broker_addresses().unwrap_or_else(|error| {
        eprintln!("configuration error: {error}");
        process::exit(2);
    });
    let session = StompSession::new(
        TcpConnector::failover(
            addresses.clone(),
            app_config.stomp.connect_timeout(),
            app_config.stomp.read_timeout(),
        ),
        SessionConfig {
            host: virtual_host(&addresses),
            login: app_config.publisher.login(),
            passcode: app_config.publisher.passcode(),
            heartbeat_ms: PUBLISHER_HEARTBEAT_MS,
            connect_timeout: app_config.stomp.connect_timeout(),
            max_frame_size: MAX_FRAME_SIZE_BYTES,
        },
    );

    StompPublisher::new(
        session,
        StompPublisherConfig {
            destination_prefix: app_config.publisher.destination_prefix.clone(),
            receipt_timeout: app_config.publisher.receipt_timeout(),
        },
    )
}

fn virtual_host(addresses: &[String]) -> String {
    addresses
        .first()
        .and_then(|address| address.rsplit_once(':'))
        .map(|(host, _)| host.to_owned())
        .unwrap_or_else(|| "localhost".to_owned())
}
