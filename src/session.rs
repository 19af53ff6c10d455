/*!
    session lifecycle: one exclusively-owned network interface, one chain.

    A [Session] wraps a [Link] and walks through the phases of driving a
    chain: discovery ([Session::scan]), state control
    ([Session::request_state]), process-image negotiation
    ([Session::configure_images]). Cyclic operation then runs through
    [crate::Cyclic], which borrows the session shared and thereby freezes the
    configuration phase out.
*/

use core::time::Duration;
use futures_concurrency::future::Join;

use crate::{
    device::{Device, Registry, SelectionFilter},
    error::{Error, Result},
    link::{Exchange, Link},
    frame::Command,
    process::{ProcessLayout, ProcessMap},
    registers::{self, AlControlRequest, AlError, AlState, DeviceIdentity},
    data::WireData,
    socket::BusSocket,
    };

/// first configured station address handed out by the scan
pub const FIXED_BASE: u16 = 0x1000;

/// probe retries before a chain position is declared empty
const PROBE_ATTEMPTS: usize = 3;
/// status polls granted to each single state transition
const STATE_POLL_BUDGET: usize = 50;
/// default bound of one frame round trip
const ROUNDTRIP_TIMEOUT: Duration = Duration::from_millis(100);

/**
    master session over one network interface.

    The borrow checker separates the two modes of a session: discovery and
    configuration methods take `&mut self`, while [crate::Cyclic] holds
    `&self` for as long as cyclic operation runs.
*/
pub struct Session {
    link: Link,
    registry: Registry,
}

impl Session {
    /// open a session on the given socket with the default round-trip timeout
    pub fn new<S: BusSocket + 'static>(socket: S) -> Self {
        Self::with_timeout(socket, ROUNDTRIP_TIMEOUT)
    }

    /// open a session with a chosen round-trip timeout, which bounds every blocking call
    pub fn with_timeout<S: BusSocket + 'static>(socket: S, timeout: Duration) -> Self {
        Self {
            link: Link::new(socket, timeout),
            registry: Registry::new(),
        }
    }

    pub fn registry(&self) -> &Registry {&self.registry}
    pub(crate) fn link(&self) -> &Link {&self.link}

    /// devices discovered by the scan, in chain position order
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.registry.iter()
    }

    /// first device satisfying the filter, see [SelectionFilter]
    pub fn find(&self, filter: &SelectionFilter) -> Result<&Device> {
        self.registry.find(filter)
    }

    /**
        walk the chain once and register every device found.

        Positions are probed in order with auto-increment reads; a position
        that stays silent over the probe budget ends the chain. Each
        responding device is assigned a configured address, then its
        identification block is read in one multi-datagram frame. An empty
        chain is not an error. A second scan without [Session::reset] is
        refused with [Error::AlreadyScanned].
    */
    pub async fn scan(&mut self) -> Result<usize> {
        if self.registry.registered() {
            return Err(Error::AlreadyScanned);
        }
        let mut devices = Vec::new();
        for position in 0 .. u16::MAX {
            if ! self.probe(position).await? {break}

            let address = FIXED_BASE + position;
            self.link.apwr(position, registers::address::fixed, address).await?.one()?;
            let device = self.identify(position, address).await?;
            log::info!(
                "position {}: address {:#06x}, vendor {:#x}, product {:#x}, alias {}",
                position, address, {device.identity.vendor}, {device.identity.product}, device.alias,
                );
            devices.push(device);
        }
        let found = devices.len();
        self.registry.register(devices)?;
        log::info!("scan complete, {} devices", found);
        Ok(found)
    }

    /// true if a device answers at this chain position
    async fn probe(&self, position: u16) -> Result<bool> {
        for attempt in 0 .. PROBE_ATTEMPTS {
            match self.link.aprd(position, registers::al::status).await {
                Ok(answer) if answer.answers >= 1 => return Ok(true),
                // the frame circulated but nobody executed: end of chain
                Ok(_) => return Ok(false),
                Err(Error::Timeout(_)) => {
                    log::debug!("position {} silent (attempt {})", position, attempt + 1);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(false)
    }

    /// read the identification block of a freshly addressed device
    async fn identify(&self, position: u16, address: u16) -> Result<Device> {
        let mut batch = [
            Exchange {
                command: Command::FPRD, slave: address,
                offset: registers::identity.byte as u16,
                data: vec![0; registers::identity.len],
                answers: 0,
            },
            Exchange {
                command: Command::FPRD, slave: address,
                offset: registers::address::alias.byte as u16,
                data: vec![0; registers::address::alias.len],
                answers: 0,
            },
            Exchange {
                command: Command::FPRD, slave: address,
                offset: registers::description.byte as u16,
                data: vec![0; registers::description.len],
                answers: 0,
            },
        ];
        self.link.run(&mut batch).await?;
        for exchange in &batch {
            if exchange.answers != 1 {
                return Err(Error::LostFrame {expected: 1, got: exchange.answers});
            }
        }
        let identity = DeviceIdentity::unpack(&batch[0].data)?;
        let alias = u16::from_le_bytes([batch[1].data[0], batch[1].data[1]]);
        let description = decode_description(&batch[2].data);
        Ok(Device {
            position,
            address,
            alias,
            identity,
            description,
            state: AlState::Init,
        })
    }

    /**
        clear the session and the chain addressing, re-arming [Session::scan].

        Configured addresses are reset on every device and a transition back
        to Init is requested; aliases are device-resident and left untouched.
    */
    pub async fn reset(&mut self) -> Result<()> {
        self.registry = Registry::new();
        let mut init = AlControlRequest::default();
        init.set_state(AlState::Init.into());
        init.set_ack(true);
        let (addresses, states) = (
            self.link.bwr(registers::address::fixed, 0u16),
            self.link.bwr(registers::al::control, init),
        ).join().await;
        addresses?;
        states?;
        Ok(())
    }

    /**
        drive one device to the target state.

        Forward requests are issued one ordered step at a time, each step being
        a control write followed by a bounded status poll; a pending fault is
        acknowledged before the step. Requesting the state already reached is a
        no-op; backward requests are issued in a single hop.
    */
    pub async fn request_state(&mut self, position: u16, target: AlState) -> Result<()> {
        let address = self.registry.get(position)
            .ok_or(Error::NotFound)?
            .address;

        let current = self.device_state(address).await?;
        if target.rank() < current.rank() {
            self.step(position, address, target).await?;
        }
        else {
            for step in &AlState::SEQUENCE[current.rank() + 1 ..= target.rank()] {
                self.step(position, address, *step).await?;
            }
        }
        // no-op when target == current
        if let Some(device) = self.registry.get_mut(position) {
            device.state = target;
        }
        Ok(())
    }

    /// drive every discovered device to the target state, in chain order
    pub async fn request_state_all(&mut self, target: AlState) -> Result<()> {
        for position in 0 .. self.registry.len() as u16 {
            self.request_state(position, target).await?;
        }
        Ok(())
    }

    /// current state as reported by the device itself
    async fn device_state(&self, address: u16) -> Result<AlState> {
        let status = self.link.fprd(address, registers::al::status).await?.one()?;
        AlState::try_from(status.state())
            .map_err(Error::MalformedFrame)
    }

    /// one write-control/poll-status transition
    async fn step(&mut self, position: u16, address: u16, target: AlState) -> Result<()> {
        // acknowledge a pending fault first, the device refuses transitions otherwise
        let status = self.link.fprd(address, registers::al::status).await?.one()?;
        if status.fault() {
            let code = AlError::from(self.link.fprd(address, registers::al::error).await?.one()?);
            log::debug!("device {} fault before transition: {}", position, code);
            let mut ack = AlControlRequest::default();
            ack.set_state(status.state());
            ack.set_ack(true);
            self.link.fpwr(address, registers::al::control, ack).await?.one()?;
        }

        let mut request = AlControlRequest::default();
        request.set_state(target.into());
        self.link.fpwr(address, registers::al::control, request).await?.one()?;

        for _ in 0 .. STATE_POLL_BUDGET {
            let status = self.link.fprd(address, registers::al::status).await?.one()?;
            if status.fault() {
                let code = AlError::from(self.link.fprd(address, registers::al::error).await?.one()?);
                return Err(Error::TransitionTimeout {
                    device: position,
                    state: target,
                    fault: Some(code),
                });
            }
            if AlState::try_from(status.state()) == Ok(target) {
                log::debug!("device {} reached {:?}", position, target);
                if let Some(device) = self.registry.get_mut(position) {
                    device.state = target;
                }
                return Ok(());
            }
        }
        Err(Error::TransitionTimeout {device: position, state: target, fault: None})
    }

    /**
        place the given devices in the logical memory and configure them for it.

        Layouts are packed contiguously in chain position order. Only legal
        while every concerned device is still in Init or PreOperational; the
        mapping is then fixed for the session.
    */
    pub async fn configure_images(&mut self, layouts: &[(u16, ProcessLayout)]) -> Result<ProcessMap> {
        if ! self.registry.registered() {
            return Err(Error::Master("scan the chain before mapping process images"));
        }
        for (position, _) in layouts {
            let device = self.registry.get(*position).ok_or(Error::NotFound)?;
            if device.state.rank() > AlState::PreOperational.rank() {
                return Err(Error::Master("process images must be configured before SafeOperational"));
            }
        }
        let map = ProcessMap::build(layouts);
        for (segment, (_, layout)) in map.segments().iter().zip({
            let mut sorted = layouts.to_vec();
            sorted.sort_by_key(|(position, _)| *position);
            sorted
        }) {
            let device = self.registry.get(segment.position).ok_or(Error::NotFound)?;
            self.link.fpwr(device.address, registers::pdi::config, registers::PdiConfig {
                logical_start: segment.output.start as u32,
                output_len: layout.outputs,
                input_len: layout.inputs,
                enable: 1,
                }).await?.one()?;
        }
        log::info!("process image mapped, {} bytes over {} devices", map.len(), map.segments().len());
        Ok(map)
    }

    /// shut the link down, dropping the session does the same
    pub fn close(mut self) {
        self.link.close();
    }
}

/// decode the zero-padded description register
fn decode_description(raw: &[u8]) -> Option<String> {
    let end = raw.iter().position(|byte| *byte == 0).unwrap_or(raw.len());
    if end == 0 {return None}
    Some(String::from_utf8_lossy(&raw[.. end]).into_owned())
}
