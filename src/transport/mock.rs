// Mock Transport
// In-memory TransportDriver for tests and the demo binary

use crate::transport::{
    RawHandle, TransportConfig, TransportDriver, TransportEndpoint, TransportError,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Physical channel; both UART aliases map onto `Serial`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Bus {
    Serial(RawHandle),
    I2c(RawHandle),
    Spi(RawHandle),
}

impl Bus {
    fn of(endpoint: TransportEndpoint) -> Self {
        match endpoint {
            TransportEndpoint::Uart(h) | TransportEndpoint::Uart2(h) => Self::Serial(h),
            TransportEndpoint::I2c(h) => Self::I2c(h),
            TransportEndpoint::Spi(h) => Self::Spi(h),
        }
    }
}

/// A device on a bus: the bus itself for point-to-point links, bus + address for I2C
type Channel = (Bus, Option<u8>);

fn channel(endpoint: TransportEndpoint, i2c_address: Option<u8>) -> Channel {
    let bus = Bus::of(endpoint);
    match bus {
        Bus::I2c(_) => (bus, i2c_address),
        _ => (bus, None),
    }
}

#[derive(Default)]
struct MockState {
    next_handle: RawHandle,
    open: HashMap<RawHandle, TransportConfig>,
    incoming: HashMap<Channel, VecDeque<u8>>,
    outgoing: HashMap<Channel, Vec<u8>>,
    errors: HashMap<Channel, VecDeque<TransportError>>,
    unready: HashSet<Channel>,
    in_flight: HashMap<Bus, usize>,
    overlaps: u64,
    read_calls: u64,
}

/// Mock implementation of TransportDriver.
///
/// Bytes pushed with [`MockTransport::push_incoming`] are handed out by
/// `read_available` in order, at most `max_chunk` per call. Raw handles do
/// not need to be opened before use.
pub struct MockTransport {
    state: Mutex<MockState>,
    max_chunk: Option<usize>,
    transaction_delay: Option<Duration>,
}

impl MockTransport {
    /// Create a new mock where every device is present and ready
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            max_chunk: None,
            transaction_delay: None,
        }
    }

    /// Limit how many bytes a single read returns
    pub fn with_max_chunk(mut self, max_chunk: usize) -> Self {
        self.max_chunk = Some(max_chunk.max(1));
        self
    }

    /// Hold every transaction open for a while, to expose interleaving
    pub fn with_transaction_delay(mut self, delay: Duration) -> Self {
        self.transaction_delay = Some(delay);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue bytes as if the device had sent them
    pub fn push_incoming(&self, endpoint: TransportEndpoint, i2c_address: Option<u8>, data: &[u8]) {
        self.lock()
            .incoming
            .entry(channel(endpoint, i2c_address))
            .or_default()
            .extend(data.iter().copied());
    }

    /// Bytes queued but not yet read
    pub fn pending_incoming(&self, endpoint: TransportEndpoint, i2c_address: Option<u8>) -> usize {
        self.lock()
            .incoming
            .get(&channel(endpoint, i2c_address))
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Take everything written to a device so far
    pub fn take_outgoing(&self, endpoint: TransportEndpoint, i2c_address: Option<u8>) -> Vec<u8> {
        self.lock()
            .outgoing
            .remove(&channel(endpoint, i2c_address))
            .unwrap_or_default()
    }

    /// Make the next read on a device fail
    pub fn inject_read_error(
        &self,
        endpoint: TransportEndpoint,
        i2c_address: Option<u8>,
        error: TransportError,
    ) {
        self.lock()
            .errors
            .entry(channel(endpoint, i2c_address))
            .or_default()
            .push_back(error);
    }

    /// Control whether a device answers probes
    pub fn set_ready(&self, endpoint: TransportEndpoint, i2c_address: Option<u8>, ready: bool) {
        let mut state = self.lock();
        let key = channel(endpoint, i2c_address);
        if ready {
            state.unready.remove(&key);
        } else {
            state.unready.insert(key);
        }
    }

    /// Number of raw handles currently open
    pub fn open_count(&self) -> usize {
        self.lock().open.len()
    }

    /// Total read_available calls served
    pub fn read_calls(&self) -> u64 {
        self.lock().read_calls
    }

    /// Transactions that started while another was in flight on the same bus
    pub fn overlapping_transactions(&self) -> u64 {
        self.lock().overlaps
    }

    async fn transaction<T>(
        &self,
        endpoint: TransportEndpoint,
        body: impl FnOnce(&mut MockState) -> T,
    ) -> T {
        let bus = Bus::of(endpoint);
        {
            let mut state = self.lock();
            let count = {
                let count = state.in_flight.entry(bus).or_insert(0);
                *count += 1;
                *count
            };
            if count > 1 {
                state.overlaps += 1;
            }
        }

        let _in_flight = InFlight { mock: self, bus };

        if let Some(delay) = self.transaction_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        body(&mut *state)
    }
}

/// Ends a transaction on drop, so a cancelled one leaves the bus idle
struct InFlight<'a> {
    mock: &'a MockTransport,
    bus: Bus,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(count) = self.mock.lock().in_flight.get_mut(&self.bus) {
            *count = count.saturating_sub(1);
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportDriver for MockTransport {
    async fn open(&self, config: &TransportConfig) -> Result<RawHandle, TransportError> {
        config.validate()?;

        let mut state = self.lock();
        let handle = state.next_handle;
        state.next_handle += 1;
        state.open.insert(handle, config.clone());
        Ok(handle)
    }

    async fn close(&self, handle: RawHandle) -> Result<(), TransportError> {
        self.lock()
            .open
            .remove(&handle)
            .map(|_| ())
            .ok_or(TransportError::NotOpen(handle))
    }

    async fn read_available(
        &self,
        endpoint: TransportEndpoint,
        i2c_address: Option<u8>,
    ) -> Result<Vec<u8>, TransportError> {
        let key = channel(endpoint, i2c_address);
        let max_chunk = self.max_chunk;

        self.transaction(endpoint, |state| {
            state.read_calls += 1;

            if let Some(error) = state.errors.get_mut(&key).and_then(VecDeque::pop_front) {
                return Err(error);
            }

            let Some(queue) = state.incoming.get_mut(&key) else {
                return Ok(Vec::new());
            };
            let count = max_chunk.unwrap_or(queue.len()).min(queue.len());
            Ok(queue.drain(..count).collect())
        })
        .await
    }

    async fn write(
        &self,
        endpoint: TransportEndpoint,
        i2c_address: Option<u8>,
        data: &[u8],
    ) -> Result<usize, TransportError> {
        let key = channel(endpoint, i2c_address);

        self.transaction(endpoint, |state| {
            if state.unready.contains(&key) {
                return match key.1 {
                    Some(address) => Err(TransportError::Nack(address)),
                    None => Err(TransportError::Timeout),
                };
            }
            state.outgoing.entry(key).or_default().extend_from_slice(data);
            Ok(data.len())
        })
        .await
    }

    async fn probe(
        &self,
        endpoint: TransportEndpoint,
        i2c_address: Option<u8>,
    ) -> Result<bool, TransportError> {
        let key = channel(endpoint, i2c_address);

        self.transaction(endpoint, |state| Ok(!state.unready.contains(&key)))
            .await
    }
}
