// Registry Tests
// Tests for instance lifecycle, endpoint ownership, addressing, power and streaming

use gnss_registry::power::{MockPins, PinDriver, PowerState};
use gnss_registry::registry::{HandleAllocator, InstanceInfo};
use gnss_registry::transport::{MockTransport, TransportDriver, TransportError};
use gnss_registry::{
    DeviceHandle, GnssError, ModuleType, PortNumber, Registry, RegistryConfig, TransportEndpoint,
    TransportType,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

struct Harness {
    mock: Arc<MockTransport>,
    pins: Arc<MockPins>,
    registry: Registry,
}

fn fast_config() -> RegistryConfig {
    RegistryConfig::new()
        .with_poll_interval(1)
        .with_power_on_timeout(50)
        .with_ready_poll_interval(2)
}

fn harness_with(config: RegistryConfig) -> Harness {
    let mock = Arc::new(MockTransport::new());
    let pins = Arc::new(MockPins::new());
    let driver: Arc<dyn TransportDriver> = mock.clone();
    let pin_driver: Arc<dyn PinDriver> = pins.clone();

    Harness {
        registry: Registry::init(config, driver, pin_driver).unwrap(),
        mock,
        pins,
    }
}

fn harness() -> Harness {
    harness_with(fast_config())
}

/// Wait until the receiver has taken `bytes` off the transport
async fn wait_for_received(registry: &Registry, handle: DeviceHandle, bytes: u64) -> bool {
    for _ in 0..500 {
        if registry.receive_stats(handle).await.unwrap().bytes_received >= bytes {
            return true;
        }
        sleep(Duration::from_millis(2)).await;
    }
    false
}

// ============================================================================
// INIT
// ============================================================================

#[tokio::test]
async fn test_init_empty() {
    let h = harness();

    assert_eq!(h.registry.live_count().await, 0);
    assert!(h.registry.handles().await.is_empty());
    assert_eq!(h.registry.resources().total(), 0);
}

#[test]
fn test_init_rejects_invalid_config() {
    let driver: Arc<dyn TransportDriver> = Arc::new(MockTransport::new());
    let pins: Arc<dyn PinDriver> = Arc::new(MockPins::new());

    let result = Registry::init(RegistryConfig::new().with_ring_buffer_size(0), driver, pins);

    assert!(matches!(result, Err(GnssError::InvalidConfig(_))));
}

// ============================================================================
// ADD / REMOVE
// ============================================================================

#[tokio::test]
async fn test_add_returns_distinct_handles() {
    let h = harness();

    let a = h.registry.add(ModuleType::M9, TransportEndpoint::Uart(1), None, false).await.unwrap();
    let b = h.registry.add(ModuleType::M9, TransportEndpoint::Spi(1), None, false).await.unwrap();

    assert_ne!(a, b);
    assert_eq!(h.registry.live_count().await, 2);
    assert_eq!(h.registry.handles().await, vec![a, b]);
}

#[tokio::test]
async fn test_uart_alias_scenario() {
    let h = harness();

    let h1 = h
        .registry
        .add(ModuleType::M10, TransportEndpoint::Uart(5), None, false)
        .await
        .unwrap();
    let duplicate = h.registry.add(ModuleType::M10, TransportEndpoint::Uart2(5), None, false).await;
    assert_eq!(
        duplicate,
        Err(GnssError::DuplicateTransport(TransportEndpoint::Uart2(5), h1))
    );

    h.registry.remove(h1).await.unwrap();
    let h2 = h
        .registry
        .add(ModuleType::M10, TransportEndpoint::Uart2(5), None, false)
        .await
        .unwrap();

    assert_eq!(
        h.registry.transport_handle(h2).await.unwrap(),
        (TransportType::Uart2, TransportEndpoint::Uart2(5))
    );
}

#[tokio::test]
async fn test_spi_endpoint_exclusive() {
    let h = harness();

    let first = h
        .registry
        .add(ModuleType::F9, TransportEndpoint::Spi(0), None, false)
        .await
        .unwrap();
    let second = h.registry.add(ModuleType::F9, TransportEndpoint::Spi(0), None, false).await;

    assert_eq!(second, Err(GnssError::DuplicateTransport(TransportEndpoint::Spi(0), first)));
    assert_eq!(h.registry.live_count().await, 1);
}

#[tokio::test]
async fn test_same_raw_handle_different_kinds_allowed() {
    let h = harness();

    h.registry.add(ModuleType::M9, TransportEndpoint::Uart(3), None, false).await.unwrap();
    h.registry.add(ModuleType::M9, TransportEndpoint::Spi(3), None, false).await.unwrap();
    h.registry.add(ModuleType::M9, TransportEndpoint::I2c(3), None, false).await.unwrap();

    assert_eq!(h.registry.live_count().await, 3);
}

#[tokio::test]
async fn test_uniqueness_across_add_remove_sequence() {
    let h = harness();
    let endpoints = [
        TransportEndpoint::Uart(1),
        TransportEndpoint::Uart2(1),
        TransportEndpoint::Spi(1),
        TransportEndpoint::Uart2(2),
        TransportEndpoint::Uart(2),
    ];

    let mut live: Vec<(DeviceHandle, TransportEndpoint)> = Vec::new();
    for round in 0..4 {
        for endpoint in endpoints {
            let owned = live.iter().any(|(_, e)| e.same_physical(&endpoint));
            let result = h.registry.add(ModuleType::M8, endpoint, None, false).await;
            match result {
                Ok(handle) => {
                    assert!(!owned);
                    live.push((handle, endpoint));
                }
                Err(GnssError::DuplicateTransport(..)) => assert!(owned),
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        // Drop every other instance before the next round
        let removed: Vec<(DeviceHandle, TransportEndpoint)> =
            live.iter().copied().skip(round % 2).step_by(2).collect();
        for (handle, _) in &removed {
            h.registry.remove(*handle).await.unwrap();
        }
        live.retain(|entry| !removed.contains(entry));
    }

    for (i, (_, a)) in live.iter().enumerate() {
        for (_, b) in live.iter().skip(i + 1) {
            assert!(!a.same_physical(b));
        }
    }
    assert_eq!(h.registry.live_count().await, live.len());
}

#[tokio::test]
async fn test_remove_unknown_handle() {
    let h = harness();

    let result = h.registry.remove(DeviceHandle::from_raw(99)).await;

    assert_eq!(result, Err(GnssError::InvalidHandle(DeviceHandle::from_raw(99))));
}

#[tokio::test]
async fn test_remove_twice() {
    let h = harness();
    let handle = h
        .registry
        .add(ModuleType::M9, TransportEndpoint::Uart(1), None, false)
        .await
        .unwrap();

    h.registry.remove(handle).await.unwrap();

    assert!(h.registry.remove(handle).await.unwrap_err().is_invalid_handle());
}

#[tokio::test]
async fn test_handles_not_reused() {
    let h = harness();

    let first = h
        .registry
        .add(ModuleType::M9, TransportEndpoint::Uart(1), None, false)
        .await
        .unwrap();
    h.registry.remove(first).await.unwrap();
    let second = h
        .registry
        .add(ModuleType::M9, TransportEndpoint::Uart(1), None, false)
        .await
        .unwrap();

    assert_ne!(first, second);
    assert!(h.registry.module_type(first).await.unwrap_err().is_invalid_handle());
}

#[test]
fn test_handle_allocator_starts_at_one() {
    let handles = HandleAllocator::new();

    assert_eq!(handles.allocate(), Some(DeviceHandle::from_raw(1)));
    assert_eq!(handles.allocate(), Some(DeviceHandle::from_raw(2)));
}

#[test]
fn test_handle_allocator_exhaustion_never_wraps() {
    let handles = HandleAllocator::starting_at(u32::MAX - 1);

    assert_eq!(handles.allocate(), Some(DeviceHandle::from_raw(u32::MAX - 1)));
    assert_eq!(handles.allocate(), None);
    // Stays exhausted rather than wrapping back to handles already issued
    assert_eq!(handles.allocate(), None);
}

#[tokio::test]
async fn test_instance_limit() {
    let h = harness_with(fast_config().with_max_instances(2));

    h.registry.add(ModuleType::M9, TransportEndpoint::Uart(1), None, false).await.unwrap();
    h.registry.add(ModuleType::M9, TransportEndpoint::Uart(2), None, false).await.unwrap();
    let third = h.registry.add(ModuleType::M9, TransportEndpoint::Uart(3), None, false).await;

    assert!(matches!(third, Err(GnssError::AllocationFailure(_))));
    assert_eq!(h.registry.resources().instances, 2);
}

// ============================================================================
// PORT NUMBER
// ============================================================================

#[tokio::test]
async fn test_port_number_per_transport() {
    let h = harness();

    let uart = h
        .registry
        .add(ModuleType::M9, TransportEndpoint::Uart(1), None, false)
        .await
        .unwrap();
    let uart2 = h
        .registry
        .add(ModuleType::M9, TransportEndpoint::Uart2(2), None, false)
        .await
        .unwrap();
    let i2c = h.registry.add(ModuleType::M9, TransportEndpoint::I2c(0), None, false).await.unwrap();
    let spi = h.registry.add(ModuleType::M9, TransportEndpoint::Spi(0), None, false).await.unwrap();

    assert_eq!(h.registry.port_number(uart).await.unwrap(), PortNumber::Uart1);
    assert_eq!(h.registry.port_number(uart2).await.unwrap(), PortNumber::Uart2);
    assert_eq!(h.registry.port_number(i2c).await.unwrap(), PortNumber::I2c);
    assert_eq!(h.registry.port_number(spi).await.unwrap(), PortNumber::Spi);
}

#[tokio::test]
async fn test_port_number_stable_across_recreate() {
    let h = harness_with(fast_config().with_uart_via_usb(true));
    let endpoint = TransportEndpoint::Uart(4);

    let mut seen = Vec::new();
    for _ in 0..3 {
        let handle = h.registry.add(ModuleType::M10, endpoint, None, false).await.unwrap();
        seen.push(h.registry.port_number(handle).await.unwrap());
        seen.push(h.registry.port_number(handle).await.unwrap());
        h.registry.remove(handle).await.unwrap();
    }

    assert!(seen.iter().all(|port| *port == PortNumber::Usb));
}

#[tokio::test]
async fn test_port_number_override() {
    let h = harness_with(fast_config().with_port_override(Some(PortNumber::Uart2)));

    let i2c = h.registry.add(ModuleType::M9, TransportEndpoint::I2c(0), None, false).await.unwrap();

    assert_eq!(h.registry.port_number(i2c).await.unwrap(), PortNumber::Uart2);
}

// ============================================================================
// SETTINGS
// ============================================================================

#[tokio::test]
async fn test_ubx_message_print_toggle() {
    let h = harness();
    let handle = h
        .registry
        .add(ModuleType::M9, TransportEndpoint::Uart(1), None, false)
        .await
        .unwrap();

    assert!(!h.registry.ubx_message_print(handle).await.unwrap());
    h.registry.set_ubx_message_print(handle, true).await.unwrap();
    assert!(h.registry.ubx_message_print(handle).await.unwrap());
    h.registry.set_ubx_message_print(handle, false).await.unwrap();
    assert!(!h.registry.ubx_message_print(handle).await.unwrap());
}

#[tokio::test]
async fn test_timeout_and_retries_defaults() {
    let h = harness_with(fast_config().with_default_timeout(1500).with_default_retries(4));
    let handle = h
        .registry
        .add(ModuleType::M9, TransportEndpoint::Uart(1), None, false)
        .await
        .unwrap();

    assert_eq!(h.registry.timeout(handle).await.unwrap(), 1500);
    assert_eq!(h.registry.retries(handle).await.unwrap(), 4);

    h.registry.set_timeout(handle, 250).await.unwrap();
    h.registry.set_retries(handle, 0).await.unwrap();

    assert_eq!(h.registry.timeout(handle).await.unwrap(), 250);
    assert_eq!(h.registry.retries(handle).await.unwrap(), 0);
}

#[tokio::test]
async fn test_module_type_query() {
    let h = harness();
    let handle = h
        .registry
        .add(ModuleType::F9, TransportEndpoint::Spi(2), None, false)
        .await
        .unwrap();

    assert_eq!(h.registry.module_type(handle).await.unwrap(), ModuleType::F9);
}

// ============================================================================
// I2C ADDRESSING
// ============================================================================

#[tokio::test]
async fn test_shared_i2c_bus_scenario() {
    let h = harness();
    let bus = TransportEndpoint::I2c(2);

    let h1 = h.registry.add(ModuleType::M9, bus, None, false).await.unwrap();
    let h2 = h.registry.add(ModuleType::M9, bus, None, false).await.unwrap();
    assert_eq!(h.registry.i2c_address(h1).await.unwrap(), 0x42);
    assert_eq!(h.registry.i2c_address(h2).await.unwrap(), 0x42);

    h.registry.set_i2c_address(h2, 0x43).await.unwrap();

    assert_eq!(h.registry.i2c_address(h1).await.unwrap(), 0x42);
    assert_eq!(h.registry.i2c_address(h2).await.unwrap(), 0x43);
}

#[tokio::test]
async fn test_i2c_address_round_trip() {
    let h = harness();
    let bus = TransportEndpoint::I2c(0);
    let h1 = h.registry.add(ModuleType::M10, bus, None, false).await.unwrap();
    let h2 = h.registry.add(ModuleType::M10, bus, None, false).await.unwrap();
    h.registry.set_i2c_address(h1, 0x10).await.unwrap();

    for address in [0x00, 0x08, 0x42, 0x55, 0x7F] {
        h.registry.set_i2c_address(h2, address).await.unwrap();
        assert_eq!(h.registry.i2c_address(h2).await.unwrap(), address);
        assert_eq!(h.registry.i2c_address(h1).await.unwrap(), 0x10);
    }
}

#[tokio::test]
async fn test_i2c_address_not_applicable() {
    let h = harness();
    let uart = h
        .registry
        .add(ModuleType::M9, TransportEndpoint::Uart(1), None, false)
        .await
        .unwrap();

    assert_eq!(
        h.registry.i2c_address(uart).await,
        Err(GnssError::AddressNotApplicable(uart, TransportType::Uart))
    );
    assert_eq!(
        h.registry.set_i2c_address(uart, 0x43).await,
        Err(GnssError::AddressNotApplicable(uart, TransportType::Uart))
    );
}

#[tokio::test]
async fn test_i2c_address_invalid() {
    let h = harness();
    let handle = h
        .registry
        .add(ModuleType::M9, TransportEndpoint::I2c(0), None, false)
        .await
        .unwrap();

    assert_eq!(
        h.registry.set_i2c_address(handle, 0x80).await,
        Err(GnssError::InvalidAddress(0x80))
    );
    assert_eq!(h.registry.i2c_address(handle).await.unwrap(), 0x42);
}

#[tokio::test]
async fn test_i2c_receiver_follows_new_address() {
    let h = harness();
    let bus = TransportEndpoint::I2c(1);
    let handle = h.registry.add(ModuleType::M9, bus, None, false).await.unwrap();

    h.registry.set_i2c_address(handle, 0x50).await.unwrap();
    h.mock.push_incoming(bus, Some(0x50), &[1, 2, 3]);

    assert!(wait_for_received(&h.registry, handle, 3).await);
    assert_eq!(h.registry.read(handle, 16).await.unwrap(), vec![1, 2, 3]);
    assert_eq!(h.mock.pending_incoming(bus, Some(0x50)), 0);
}

// ============================================================================
// POWER
// ============================================================================

#[tokio::test]
async fn test_power_on_without_pin() {
    let h = harness();
    let handle = h
        .registry
        .add(ModuleType::M10, TransportEndpoint::Uart(1), None, false)
        .await
        .unwrap();
    assert_eq!(h.registry.power_state(handle).await.unwrap(), PowerState::Off);

    h.registry.power_on(handle).await.unwrap();

    assert_eq!(h.registry.power_state(handle).await.unwrap(), PowerState::On);
    assert!(h.pins.history().is_empty());
}

#[tokio::test]
async fn test_power_on_with_pin() {
    let h = harness();
    let handle = h
        .registry
        .add(ModuleType::M10, TransportEndpoint::Uart(1), Some(12), false)
        .await
        .unwrap();

    h.registry.power_on(handle).await.unwrap();
    assert_eq!(h.pins.level(12), Some(true));

    h.registry.power_off(handle).await.unwrap();
    assert_eq!(h.pins.level(12), Some(false));
    assert_eq!(h.registry.power_state(handle).await.unwrap(), PowerState::Off);
}

#[tokio::test]
async fn test_power_on_timeout_restores_off() {
    let h = harness();
    let endpoint = TransportEndpoint::Uart(1);
    let handle = h.registry.add(ModuleType::M10, endpoint, Some(12), false).await.unwrap();
    h.mock.set_ready(endpoint, None, false);

    let result = h.registry.power_on(handle).await;

    assert_eq!(result, Err(GnssError::PowerOnTimeout));
    assert_eq!(h.registry.power_state(handle).await.unwrap(), PowerState::Off);
    assert_eq!(h.pins.level(12), Some(false));
}

#[tokio::test]
async fn test_power_on_waits_for_device() {
    let h = harness_with(fast_config().with_power_on_timeout(1000));
    let endpoint = TransportEndpoint::I2c(0);
    let handle = h.registry.add(ModuleType::M9, endpoint, Some(3), false).await.unwrap();
    h.mock.set_ready(endpoint, Some(0x42), false);

    let mock = Arc::clone(&h.mock);
    let waker = tokio::spawn(async move {
        sleep(Duration::from_millis(20)).await;
        mock.set_ready(endpoint, Some(0x42), true);
    });

    h.registry.power_on(handle).await.unwrap();
    waker.await.unwrap();

    assert_eq!(h.registry.power_state(handle).await.unwrap(), PowerState::On);
}

#[tokio::test]
async fn test_leave_power_alone() {
    let h = harness();
    let endpoint = TransportEndpoint::Uart(1);
    let handle = h.registry.add(ModuleType::M10, endpoint, Some(12), true).await.unwrap();
    h.mock.set_ready(endpoint, None, false);

    h.registry.power_on(handle).await.unwrap();
    h.registry.power_off(handle).await.unwrap();

    assert!(h.pins.history().is_empty());
}

#[tokio::test]
async fn test_is_alive() {
    let h = harness();
    let endpoint = TransportEndpoint::Spi(0);
    let handle = h.registry.add(ModuleType::M9, endpoint, None, false).await.unwrap();

    assert!(h.registry.is_alive(handle).await.unwrap());
    h.mock.set_ready(endpoint, None, false);
    assert!(!h.registry.is_alive(handle).await.unwrap());
}

// ============================================================================
// STREAMING
// ============================================================================

#[tokio::test]
async fn test_stream_delivers_bytes_in_order() {
    let h = harness();
    let endpoint = TransportEndpoint::Uart(1);
    let handle = h.registry.add(ModuleType::M10, endpoint, None, false).await.unwrap();

    h.mock.push_incoming(endpoint, None, b"\xB5\x62\x01\x07");
    h.mock.push_incoming(endpoint, None, b"\x5C\x00");

    assert!(wait_for_received(&h.registry, handle, 6).await);
    assert_eq!(h.registry.bytes_available(handle).await.unwrap(), 6);
    assert_eq!(h.registry.peek(handle, 2).await.unwrap(), vec![0xB5, 0x62]);
    assert_eq!(
        h.registry.read(handle, 64).await.unwrap(),
        vec![0xB5, 0x62, 0x01, 0x07, 0x5C, 0x00]
    );
    assert_eq!(h.registry.bytes_available(handle).await.unwrap(), 0);
}

#[tokio::test]
async fn test_no_loss_when_drained() {
    let h = harness_with(fast_config().with_ring_buffer_size(64));
    let endpoint = TransportEndpoint::Uart(1);
    let handle = h.registry.add(ModuleType::M10, endpoint, None, false).await.unwrap();

    let mut expected = Vec::new();
    let mut received = Vec::new();
    for i in 0..50u8 {
        let burst = [i; 32];
        expected.extend_from_slice(&burst);
        h.mock.push_incoming(endpoint, None, &burst);

        assert!(wait_for_received(&h.registry, handle, expected.len() as u64).await);
        received.extend(h.registry.read(handle, 64).await.unwrap());
    }

    assert_eq!(h.registry.stream_loss(handle).await.unwrap(), 0);
    assert_eq!(received, expected);
}

#[tokio::test]
async fn test_bounded_loss_on_overflow() {
    let h = harness_with(fast_config().with_ring_buffer_size(100));
    let endpoint = TransportEndpoint::Spi(0);
    let handle = h.registry.add(ModuleType::F9, endpoint, None, false).await.unwrap();
    let data: Vec<u8> = (0..250u32).map(|i| i as u8).collect();

    h.mock.push_incoming(endpoint, None, &data);

    assert!(wait_for_received(&h.registry, handle, 250).await);
    assert_eq!(h.registry.stream_loss(handle).await.unwrap(), 150);
    assert_eq!(h.registry.read(handle, 1000).await.unwrap(), data[..100].to_vec());
}

#[tokio::test]
async fn test_loss_survives_power_cycle() {
    let h = harness_with(fast_config().with_ring_buffer_size(8));
    let endpoint = TransportEndpoint::Uart(1);
    let handle = h.registry.add(ModuleType::M9, endpoint, None, false).await.unwrap();

    h.mock.push_incoming(endpoint, None, &[0; 20]);
    assert!(wait_for_received(&h.registry, handle, 20).await);

    h.registry.power_on(handle).await.unwrap();
    h.registry.power_off(handle).await.unwrap();

    assert_eq!(h.registry.stream_loss(handle).await.unwrap(), 12);
}

#[tokio::test]
async fn test_receive_error_recorded_and_streaming_continues() {
    let h = harness();
    let endpoint = TransportEndpoint::Uart(1);
    let handle = h.registry.add(ModuleType::M9, endpoint, None, false).await.unwrap();

    h.mock.inject_read_error(endpoint, None, TransportError::IoError("framing".to_string()));
    h.mock.push_incoming(endpoint, None, &[7, 7, 7]);

    assert!(wait_for_received(&h.registry, handle, 3).await);
    let stats = h.registry.receive_stats(handle).await.unwrap();
    assert_eq!(stats.read_errors, 1);
    assert_eq!(stats.last_error.as_deref(), Some("IO error: framing"));
    assert_eq!(stats.bytes_buffered, 3);
}

#[tokio::test]
async fn test_write_reaches_device() {
    let h = harness();
    let bus = TransportEndpoint::I2c(0);
    let handle = h.registry.add(ModuleType::M9, bus, None, false).await.unwrap();
    h.registry.set_i2c_address(handle, 0x44).await.unwrap();

    assert_eq!(h.registry.write(handle, &[0xB5, 0x62]).await.unwrap(), 2);
    assert_eq!(h.mock.take_outgoing(bus, Some(0x44)), vec![0xB5, 0x62]);
}

#[tokio::test]
async fn test_write_to_absent_device() {
    let h = harness();
    let bus = TransportEndpoint::I2c(0);
    let handle = h.registry.add(ModuleType::M9, bus, None, false).await.unwrap();
    h.mock.set_ready(bus, Some(0x42), false);

    let result = h.registry.write(handle, &[1]).await;

    assert_eq!(result, Err(GnssError::Transport(TransportError::Nack(0x42))));
}

// ============================================================================
// INFO
// ============================================================================

#[tokio::test]
async fn test_info_snapshot() {
    let h = harness_with(fast_config().with_ring_buffer_size(512));
    let handle = h
        .registry
        .add(ModuleType::M10, TransportEndpoint::I2c(1), Some(4), false)
        .await
        .unwrap();
    h.registry.set_i2c_address(handle, 0x45).await.unwrap();

    let info = h.registry.info(handle).await.unwrap();

    assert_eq!(info.handle, handle);
    assert_eq!(info.module_type, ModuleType::M10);
    assert_eq!(info.endpoint, TransportEndpoint::I2c(1));
    assert_eq!(info.port_number, PortNumber::I2c);
    assert_eq!(info.i2c_address, Some(0x45));
    assert_eq!(info.power_state, PowerState::Off);
    assert_eq!(info.power_pin, Some(4));
    assert!(!info.leave_power_alone);
    assert_eq!(info.ring_buffer_size, 512);
    assert_eq!(info.stats.bytes_lost, 0);
}

#[tokio::test]
async fn test_info_export_import() {
    let h = harness();
    let handle = h
        .registry
        .add(ModuleType::M8, TransportEndpoint::Uart2(3), None, false)
        .await
        .unwrap();
    let info = h.registry.info(handle).await.unwrap();

    let bytes = info.export_state().unwrap();
    let restored = InstanceInfo::import_state(&bytes).unwrap();

    assert_eq!(restored, info);
}

#[test]
fn test_info_import_garbage() {
    let result = InstanceInfo::import_state(&[0xFF, 0xFF, 0xFF]);

    assert!(matches!(result, Err(GnssError::SerializationError(_))));
}

// ============================================================================
// DEINIT
// ============================================================================

#[tokio::test]
async fn test_deinit_clean_teardown() {
    let h = harness();
    let baseline = h.registry.resources();

    let mut handles = Vec::new();
    for i in 0..4 {
        handles.push(
            h.registry
                .add(ModuleType::M9, TransportEndpoint::Uart(i), None, false)
                .await
                .unwrap(),
        );
    }
    handles.push(
        h.registry
            .add(ModuleType::M9, TransportEndpoint::I2c(0), None, false)
            .await
            .unwrap(),
    );
    assert_eq!(h.registry.resources().receivers, 5);

    h.registry.deinit().await;

    assert_eq!(h.registry.live_count().await, 0);
    assert_eq!(h.registry.resources(), baseline);
    for handle in handles {
        assert!(h.registry.stream_loss(handle).await.unwrap_err().is_invalid_handle());
        assert!(h.registry.power_on(handle).await.unwrap_err().is_invalid_handle());
    }
}

#[tokio::test]
async fn test_deinit_empty_registry() {
    let h = harness();

    h.registry.deinit().await;
    h.registry.deinit().await;

    assert_eq!(h.registry.live_count().await, 0);
}

#[tokio::test]
async fn test_remove_stops_receiver_before_releasing_buffer() {
    let h = harness();
    let endpoint = TransportEndpoint::Uart(1);
    let handle = h.registry.add(ModuleType::M9, endpoint, None, false).await.unwrap();
    h.mock.push_incoming(endpoint, None, &[1; 32]);
    assert!(wait_for_received(&h.registry, handle, 32).await);

    h.registry.remove(handle).await.unwrap();

    let calls = h.mock.read_calls();
    h.mock.push_incoming(endpoint, None, &[2; 32]);
    sleep(Duration::from_millis(20)).await;

    assert_eq!(h.mock.read_calls(), calls);
    assert_eq!(h.mock.pending_incoming(endpoint, None), 32);
    assert_eq!(h.registry.resources().total(), 0);
}
