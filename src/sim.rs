/*!
    in-process simulated device chain, for development and tests without hardware.

    [SimChain] models a daisy chain of devices each carrying a register memory,
    the AL state machine, and optionally a [servo drive](SimDevice::servo)
    mapped in the logical memory. [SimChain::socket] yields a [BusSocket] that
    executes every sent frame synchronously against the chain and queues the
    answer, so a [crate::Session] runs on it unmodified.

    The chain handle stays usable after the socket was given away: fault and
    link failure injection act on the live chain between frames.
*/

use std::{
    collections::VecDeque,
    io,
    sync::{Arc, Condvar, Mutex},
    time::Duration,
    };
use crate::{
    data::WireData,
    frame::{self, Command, FrameBuf},
    motion::{ControlWord, OperationMode, StatusWord},
    registers::{self, AlControlRequest, AlError, AlState, AlStatusResponse, DeviceIdentity, PdiConfig},
    socket::BusSocket,
    };

/// simulated register memory size per device, covers every register in [crate::registers]
const MEMORY_SIZE: usize = 0x1000;
/// cycles a simulated homing run takes
const HOMING_CYCLES: u32 = 3;
/// position change per cycle while positioning, when no profile speed is commanded
const POSITION_SPEED: i32 = 1_000;
/// how long a receive call waits for an answer before reporting itself idle
const RECEIVE_POLL: Duration = Duration::from_millis(5);

/// description of one simulated device, to be pushed on a [SimChain]
pub struct SimDevice {
    identity: DeviceIdentity,
    alias: u16,
    description: Option<String>,
    servo: bool,
}
impl SimDevice {
    pub fn new(identity: DeviceIdentity) -> Self {
        Self {identity, alias: 0, description: None, servo: false}
    }
    /// preset station alias, as if burned in non-volatile memory
    pub fn alias(mut self, alias: u16) -> Self {
        self.alias = alias;
        self
    }
    /// human readable description, truncated to its register size
    pub fn description(mut self, text: &str) -> Self {
        self.description = Some(text.to_string());
        self
    }
    /// attach a servo drive model behind the process-data interface
    pub fn servo(mut self) -> Self {
        self.servo = true;
        self
    }
}

/**
    handle on a simulated chain of devices

    Cloning the handle is cheap and every clone acts on the same chain, as
    does the socket obtained from [Self::socket].
*/
#[derive(Clone)]
pub struct SimChain {
    inner: Arc<Inner>,
}

struct Inner {
    chain: Mutex<ChainState>,
    receivable: Condvar,
}

struct ChainState {
    devices: Vec<SimSlave>,
    answers: VecDeque<Vec<u8>>,
    /// frames to swallow without answering
    drop_budget: u32,
}

impl SimChain {
    pub fn new() -> Self {
        Self {inner: Arc::new(Inner {
            chain: Mutex::new(ChainState {
                devices: Vec::new(),
                answers: VecDeque::new(),
                drop_budget: 0,
                }),
            receivable: Condvar::new(),
            })}
    }

    /// append a device at the end of the chain
    pub fn push(&self, device: SimDevice) {
        self.inner.chain.lock().unwrap().devices.push(SimSlave::new(device));
    }

    /// socket to run a [crate::Session] on
    pub fn socket(&self) -> SimSocket {
        SimSocket {inner: self.inner.clone()}
    }

    /// plug or unplug a device, as if the chain was physically cut there
    pub fn set_online(&self, position: u16, online: bool) {
        self.device(position, |slave| slave.online = online);
    }
    /// make a device stop answering state change requests, its AL state stays put
    pub fn freeze_al(&self, position: u16, frozen: bool) {
        self.device(position, |slave| slave.frozen = frozen);
    }
    /// make the next state change request of a device fail with this error code
    pub fn inject_al_fault(&self, position: u16, code: AlError) {
        self.device(position, |slave| slave.pending_al_fault = Some(u16::from(code)));
    }
    /// raise a fault on the servo drive of a device
    pub fn inject_drive_fault(&self, position: u16) {
        self.device(position, |slave| if let Some(servo) = &mut slave.servo {
            servo.fault = true;
        });
    }
    /// swallow the next `count` frames without answering
    pub fn drop_frames(&self, count: u32) {
        self.inner.chain.lock().unwrap().drop_budget = count;
    }

    /// current AL state of a device, None while faulted out of a known state
    pub fn al_state(&self, position: u16) -> AlState {
        self.device(position, |slave| slave.state)
    }
    /// fixed address currently programmed in a device
    pub fn fixed_address(&self, position: u16) -> u16 {
        self.device(position, |slave| registers::address::fixed.get(&slave.memory))
    }
    /// actual position of the servo drive of a device
    pub fn servo_position(&self, position: u16) -> i32 {
        self.device(position, |slave| slave.servo.as_ref()
            .map(|servo| servo.position)
            .unwrap_or(0))
    }

    fn device<T>(&self, position: u16, access: impl FnOnce(&mut SimSlave) -> T) -> T {
        let mut chain = self.inner.chain.lock().unwrap();
        access(&mut chain.devices[usize::from(position)])
    }
}

impl Default for SimChain {
    fn default() -> Self {Self::new()}
}

/// [BusSocket] side of a [SimChain]
pub struct SimSocket {
    inner: Arc<Inner>,
}

impl BusSocket for SimSocket {
    fn receive(&self, buffer: &mut [u8]) -> io::Result<usize> {
        let chain = self.inner.chain.lock().unwrap();
        let (mut chain, _) = self.inner.receivable
            .wait_timeout_while(chain, RECEIVE_POLL, |chain| chain.answers.is_empty())
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "simulated chain poisoned"))?;
        let answer = match chain.answers.pop_front() {
            Some(answer) => answer,
            None => return Err(io::ErrorKind::WouldBlock.into()),
        };
        if buffer.len() < answer.len() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "receive buffer too small"));
        }
        buffer[.. answer.len()].copy_from_slice(&answer);
        Ok(answer.len())
    }

    fn send(&self, frame: &[u8]) -> io::Result<()> {
        let mut chain = self.inner.chain.lock().unwrap();
        if chain.drop_budget > 0 {
            chain.drop_budget -= 1;
            return Ok(());
        }
        let answer = chain.execute(frame)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
        chain.answers.push_back(answer);
        self.inner.receivable.notify_one();
        Ok(())
    }
}

impl ChainState {
    /// run one frame through the whole chain and return the answer frame
    fn execute(&mut self, frame: &[u8]) -> crate::error::Result<Vec<u8>> {
        struct Done {
            command: Command,
            token: u8,
            slave: u16,
            offset: u16,
            data: Vec<u8>,
            working_count: u16,
        }
        let mut processed = Vec::new();
        for datagram in frame::parse(frame)? {
            let datagram = datagram?;
            let command = Command::from(datagram.header.command());
            let sent = datagram.data;
            let mut data = sent.to_vec();
            let mut working_count = datagram.working_count;
            let mut slave = datagram.header.slave();
            let offset = datagram.header.offset();

            match command {
                Command::NOP => {}
                Command::APRD | Command::APWR | Command::APRW => {
                    for device in self.devices.iter_mut().filter(|device| device.online) {
                        if slave == 0 && device.physical(command, offset, sent, &mut data) {
                            working_count += 1;
                        }
                        slave = slave.wrapping_add(1);
                    }
                }
                Command::FPRD | Command::FPWR | Command::FPRW => {
                    for device in self.devices.iter_mut().filter(|device| device.online) {
                        let fixed = registers::address::fixed.get(&device.memory);
                        if fixed == slave && device.physical(command, offset, sent, &mut data) {
                            working_count += 1;
                        }
                    }
                }
                Command::BRD | Command::BWR | Command::BRW => {
                    for device in self.devices.iter_mut().filter(|device| device.online) {
                        if device.physical(command, offset, sent, &mut data) {
                            working_count += 1;
                        }
                    }
                }
                Command::LRD | Command::LWR | Command::LRW => {
                    for device in self.devices.iter_mut().filter(|device| device.online) {
                        if device.logical(command, &mut data) {
                            working_count += 1;
                        }
                    }
                }
            }
            processed.push(Done {command, token: datagram.header.token(), slave, offset, data, working_count});
        }

        let mut answer = FrameBuf::new();
        for done in processed {
            answer.push(done.command, done.token, done.slave, done.offset, &done.data, done.working_count)?;
        }
        Ok(answer.finish().to_vec())
    }
}

/// one simulated device: register memory, AL state machine, optional servo
struct SimSlave {
    online: bool,
    frozen: bool,
    pending_al_fault: Option<u16>,
    state: AlState,
    fault: bool,
    error: u16,
    memory: Vec<u8>,
    servo: Option<ServoModel>,
}

impl SimSlave {
    fn new(device: SimDevice) -> Self {
        let mut memory = vec![0; MEMORY_SIZE];
        registers::address::alias.set(&mut memory, device.alias);
        registers::identity.set(&mut memory, device.identity);
        if let Some(text) = &device.description {
            let raw = text.as_bytes();
            let len = raw.len().min(registers::description.len);
            memory[registers::description.byte ..][.. len].copy_from_slice(&raw[.. len]);
        }
        Self {
            online: true,
            frozen: false,
            pending_al_fault: None,
            state: AlState::Init,
            fault: false,
            error: 0,
            memory,
            servo: device.servo.then(ServoModel::default),
        }
    }

    /// one register access, returns true when the device executed the command
    fn physical(&mut self, command: Command, offset: u16, sent: &[u8], data: &mut [u8]) -> bool {
        let start = usize::from(offset);
        let Some(end) = start.checked_add(data.len()).filter(|end| *end <= MEMORY_SIZE)
            else {return false};

        // project the live state into memory so reads see it
        registers::al::status.set(&mut self.memory, AlStatusResponse::new(
            self.state.into(),
            self.fault,
            ));
        registers::al::error.set(&mut self.memory, self.error);

        match command {
            Command::APRD | Command::FPRD => {
                data.copy_from_slice(&self.memory[start .. end]);
            }
            Command::BRD => {
                // broadcast reads accumulate with a bitwise or
                for (acc, byte) in data.iter_mut().zip(&self.memory[start .. end]) {
                    *acc |= *byte;
                }
            }
            Command::APWR | Command::FPWR | Command::BWR => {
                self.memory[start .. end].copy_from_slice(sent);
                self.written(start, end);
            }
            Command::APRW | Command::FPRW | Command::BRW => {
                data.copy_from_slice(&self.memory[start .. end]);
                self.memory[start .. end].copy_from_slice(sent);
                self.written(start, end);
            }
            _ => return false,
        }
        true
    }

    /// side effects of a register write
    fn written(&mut self, start: usize, end: usize) {
        let control = registers::al::control.byte;
        if (start .. end).contains(&control) {
            self.control_request(AlControlRequest::from(self.memory[control]));
        }
    }

    /// the AL state machine: forward transitions one step at a time,
    /// backward transitions accepted from anywhere
    fn control_request(&mut self, request: AlControlRequest) {
        if self.frozen {return}
        if request.ack() && self.fault {
            self.fault = false;
            self.error = 0;
        }
        if self.fault {return}

        let target = match AlState::try_from(request.state()) {
            Ok(target) => target,
            Err(_) => {
                self.fail(u16::from(AlError::UnknownStateRequest));
                return;
            }
        };
        if let Some(code) = self.pending_al_fault.take() {
            self.fail(code);
        }
        else if target == self.state || target.rank() < self.state.rank() {
            self.state = target;
        }
        else if target.rank() == self.state.rank() + 1 {
            self.state = target;
        }
        else {
            self.fail(u16::from(AlError::InvalidStateRequest));
        }
    }

    fn fail(&mut self, code: u16) {
        self.fault = true;
        self.error = code;
    }

    /// one logical memory access, returns true when the device took part
    fn logical(&mut self, command: Command, image: &mut [u8]) -> bool {
        let Ok(config) = PdiConfig::unpack(&self.memory[registers::pdi::config.byte ..])
            else {return false};
        if config.enable == 0 {return false}
        // inputs become valid in SafeOperational, outputs apply in Operational
        if self.state.rank() < AlState::SafeOperational.rank() {return false}

        let start = config.logical_start as usize;
        let outputs = start .. start + usize::from(config.output_len);
        let inputs = outputs.end .. outputs.end + usize::from(config.input_len);
        if inputs.end > image.len() {return false}

        if let Some(servo) = &mut self.servo {
            let commanded = (self.state == AlState::Operational
                && matches!(command, Command::LWR | Command::LRW))
                .then(|| image[outputs].to_vec());
            servo.cycle(commanded.as_deref());
            if matches!(command, Command::LRD | Command::LRW) {
                servo.report(&mut image[inputs]);
            }
        }
        true
    }
}

/// simplified servo drive behind the process image of a device
#[derive(Default)]
struct ServoModel {
    enabled: bool,
    fault: bool,
    homed: bool,
    position: i32,
    target: i32,
    /// a setpoint was latched and is being executed
    latched: bool,
    /// level of the start bit on the previous cycle, for edge detection
    prev_start: bool,
    homing_left: u32,
    mode: OperationMode,
    /// mode specific acknowledge reported in the status word
    ack: bool,
}

impl ServoModel {
    /// one control cycle, `outputs` is None while the master outputs are not applied
    fn cycle(&mut self, outputs: Option<&[u8]>) {
        let Some(outputs) = outputs else {return};
        if outputs.len() < 11 {return}
        let control = ControlWord::from(u16::from_le_bytes([outputs[0], outputs[1]]));
        self.mode = OperationMode::from(outputs[2]);
        let target = i32::from_le_bytes([outputs[3], outputs[4], outputs[5], outputs[6]]);
        let velocity = i32::from_le_bytes([outputs[7], outputs[8], outputs[9], outputs[10]]);

        if control.reset_fault() && self.fault {
            self.fault = false;
            self.enabled = false;
            self.homed = false;
            self.latched = false;
            self.prev_start = false;
            return;
        }
        if self.fault {return}

        self.enabled = control.switch_on()
            && control.enable_voltage()
            && control.quick_stop()
            && control.enable_operation();
        if ! self.enabled {
            self.latched = false;
            self.prev_start = false;
            self.homing_left = 0;
            self.ack = false;
            return;
        }

        let rising = control.start() && ! self.prev_start;
        match self.mode {
            OperationMode::Homing => {
                if rising && ! self.homed {
                    self.homing_left = HOMING_CYCLES;
                }
                if self.homing_left > 0 {
                    self.homing_left -= 1;
                    if self.homing_left == 0 {
                        self.homed = true;
                        self.position = 0;
                    }
                }
                self.ack = self.homed;
            }
            OperationMode::ProfilePosition => {
                if rising {
                    self.target = target;
                    self.latched = true;
                }
                self.ack = self.latched && control.start();
                if self.latched {
                    // commanded profile speed, drive default when unset
                    let speed = if velocity > 0 {velocity} else {POSITION_SPEED};
                    let gap = self.target.saturating_sub(self.position);
                    self.position += gap.clamp(-speed, speed);
                }
            }
            OperationMode::ProfileVelocity => {
                self.position = self.position.wrapping_add(velocity);
                self.ack = false;
            }
            OperationMode::Off => {
                self.ack = false;
            }
        }
        self.prev_start = control.start();
    }

    /// fill the input image with the drive status
    fn report(&self, inputs: &mut [u8]) {
        if inputs.len() < 7 {return}
        let mut status = StatusWord::default();
        status.set_ready_switch_on(! self.fault);
        status.set_switched_on(self.enabled);
        status.set_operation_enabled(self.enabled);
        status.set_fault(self.fault);
        status.set_voltage_enabled(self.enabled);
        status.set_quick_stop(self.enabled);
        status.set_target_reached(self.latched && self.position == self.target);
        status.set_ack(self.ack);
        status.set_homed(self.homed);
        inputs[0 .. 2].copy_from_slice(&u16::from(status).to_le_bytes());
        inputs[2] = u8::from(self.mode);
        inputs[3 .. 7].copy_from_slice(&self.position.to_le_bytes());
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn chain(count: usize) -> SimChain {
        let chain = SimChain::new();
        for serial in 0 .. count as u32 {
            chain.push(SimDevice::new(DeviceIdentity {
                vendor: 0xe7f,
                product: 0x1000,
                revision: 1,
                serial,
                }));
        }
        chain
    }

    fn roundtrip(chain: &SimChain, command: Command, slave: u16, offset: u16, data: &[u8]) -> (Vec<u8>, u16) {
        let mut frame = FrameBuf::new();
        frame.push(command, 0, slave, offset, data, 0).unwrap();
        let answer = chain.inner.chain.lock().unwrap().execute(frame.finish()).unwrap();
        let datagram = frame::parse(&answer).unwrap().next().unwrap().unwrap();
        (datagram.data.to_vec(), datagram.working_count)
    }

    #[test]
    fn positional_addressing_hits_one_device() {
        let chain = chain(3);
        let (_, count) = roundtrip(&chain, Command::APWR, 0u16.wrapping_sub(2), 0x0010, &0x1002u16.to_le_bytes());
        assert_eq!(count, 1);
        assert_eq!(chain.fixed_address(2), 0x1002);
        assert_eq!(chain.fixed_address(0), 0);

        // past the end of the chain, nobody answers
        let (_, count) = roundtrip(&chain, Command::APRD, 0u16.wrapping_sub(3), 0x0130, &[0]);
        assert_eq!(count, 0);
    }

    #[test]
    fn al_transitions_walk_the_ladder() {
        let chain = chain(1);
        let request = |state: AlState| [u8::from(AlControlRequest::new(state.into(), false))];
        // skipping a state faults the device
        let (_, count) = roundtrip(&chain, Command::BWR, 0, 0x0120, &request(AlState::Operational));
        assert_eq!(count, 1);
        assert_eq!(chain.al_state(0), AlState::Init);
        let (status, _) = roundtrip(&chain, Command::BRD, 0, 0x0130, &[0]);
        assert_ne!(status[0] & 0x10, 0);

        // acknowledge, then walk one step at a time
        roundtrip(&chain, Command::BWR, 0, 0x0120, &[u8::from(AlControlRequest::new(AlState::Init.into(), true))]);
        roundtrip(&chain, Command::BWR, 0, 0x0120, &request(AlState::PreOperational));
        roundtrip(&chain, Command::BWR, 0, 0x0120, &request(AlState::SafeOperational));
        roundtrip(&chain, Command::BWR, 0, 0x0120, &request(AlState::Operational));
        assert_eq!(chain.al_state(0), AlState::Operational);
    }
}
