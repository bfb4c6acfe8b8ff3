// GNSS Registry Demo
// Drives a registry over the in-memory transport with random bursts and reports
// per-instance stream statistics and teardown leaks

use clap::{Parser, ValueEnum};
use gnss_registry::device::{offset_address, DEFAULT_I2C_ADDRESS};
use gnss_registry::power::{MockPins, PinDriver};
use gnss_registry::transport::{MockTransport, TransportDriver};
use gnss_registry::{
    DeviceHandle, ModuleType, Registry, RegistryConfig, TransportEndpoint, TransportType,
};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Link {
    Uart,
    Uart2,
    I2c,
    Spi,
}

impl From<Link> for TransportType {
    fn from(link: Link) -> Self {
        match link {
            Link::Uart => TransportType::Uart,
            Link::Uart2 => TransportType::Uart2,
            Link::I2c => TransportType::I2c,
            Link::Spi => TransportType::Spi,
        }
    }
}

#[derive(Parser)]
#[command(author, version, about = "Stream random bursts through simulated GNSS receivers")]
struct Args {
    /// Number of receiver instances
    #[arg(short, long, default_value_t = 2)]
    instances: u8,

    /// Transport every instance is attached through
    #[arg(short, long, value_enum, default_value_t = Link::Uart)]
    transport: Link,

    /// Ring buffer size per instance, in bytes
    #[arg(short, long, default_value_t = 2048)]
    buffer_size: usize,

    /// Largest burst a receiver sends at once
    #[arg(long, default_value_t = 256)]
    burst: usize,

    /// Gap between bursts, in milliseconds
    #[arg(long, default_value_t = 20)]
    interval_ms: u64,

    /// How long to stream, in milliseconds
    #[arg(short, long, default_value_t = 1000)]
    duration_ms: u64,

    /// Consume buffered bytes as they arrive instead of letting the buffers fill
    #[arg(long)]
    drain: bool,

    /// First power-enable pin; instance N uses pin + N
    #[arg(long)]
    power_pin: Option<u32>,

    /// Log every received chunk in hex (needs RUST_LOG=debug)
    #[arg(long)]
    print: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mock = Arc::new(MockTransport::new());
    let pins = Arc::new(MockPins::new());
    let driver: Arc<dyn TransportDriver> = mock.clone();
    let pin_driver: Arc<dyn PinDriver> = pins.clone();

    let config = RegistryConfig::new().with_ring_buffer_size(args.buffer_size);
    let registry = Registry::init(config, driver, pin_driver)?;

    let transport_type = TransportType::from(args.transport);
    let mut devices: Vec<(DeviceHandle, TransportEndpoint, Option<u8>)> = Vec::new();

    for index in 0..args.instances {
        // I2C receivers share bus 0 and are told apart by address
        let endpoint = match transport_type {
            TransportType::I2c => TransportEndpoint::I2c(0),
            other => TransportEndpoint::new(other, i32::from(index)),
        };
        let power_pin = args.power_pin.map(|pin| pin + u32::from(index));

        let handle = registry.add(ModuleType::M10, endpoint, power_pin, false).await?;
        let address = if transport_type == TransportType::I2c {
            let address = offset_address(DEFAULT_I2C_ADDRESS, index).ok_or_else(|| {
                format!("no 7-bit I2C address left for instance {} on a shared bus", index)
            })?;
            registry.set_i2c_address(handle, address).await?;
            Some(address)
        } else {
            None
        };

        registry.set_ubx_message_print(handle, args.print).await?;
        registry.power_on(handle).await?;
        devices.push((handle, endpoint, address));
    }

    info!(instances = devices.len(), transport = %transport_type, "streaming");

    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    let deadline = tokio::time::Instant::now() + Duration::from_millis(args.duration_ms);
    let mut consumed = 0usize;

    while tokio::time::Instant::now() < deadline {
        ticker.tick().await;

        for (handle, endpoint, address) in &devices {
            let burst = {
                let mut rng = rand::thread_rng();
                let len = rng.gen_range(1..=args.burst.max(1));
                (0..len).map(|_| rng.gen::<u8>()).collect::<Vec<u8>>()
            };
            mock.push_incoming(*endpoint, *address, &burst);

            if args.drain {
                consumed += registry.read(*handle, usize::MAX).await?.len();
            }
        }
    }

    // Let every receiver pick up the last bursts
    tokio::time::sleep(registry.config().poll_interval() * 5).await;

    println!(
        "{:<10} {:>10} {:>10} {:>10} {:>8}",
        "device", "received", "lost", "buffered", "errors"
    );
    for (handle, _, _) in &devices {
        let stats = registry.receive_stats(*handle).await?;
        println!(
            "{:<10} {:>10} {:>10} {:>10} {:>8}",
            handle.to_string(),
            stats.bytes_received,
            stats.bytes_lost,
            stats.bytes_buffered,
            stats.read_errors
        );
    }
    if args.drain {
        println!("consumed {} bytes", consumed);
    }

    for (handle, _, _) in &devices {
        registry.power_off(*handle).await?;
    }
    registry.deinit().await;

    let leftover = registry.resources();
    println!("resources left after deinit: {}", leftover.total());
    if leftover.total() != 0 {
        return Err(format!("leaked resources: {:?}", leftover).into());
    }

    Ok(())
}
